use rcgen::{
    BasicConstraints, Certificate, CertificateParams, CertificateSigningRequestParams, DnType,
    IsCa, KeyPair,
};
use rocket::{config::LogLevel, get, http::Status, put, routes, Shutdown, State};
use rustls::pki_types::CertificateSigningRequestDer;
use std::{
    collections::{BTreeMap, BTreeSet},
    net::Ipv4Addr,
    path::PathBuf,
    sync::{Arc, Mutex},
};
use time::{Duration, OffsetDateTime};

/// A throwaway CA for minting leaf certificates in tests.
pub(crate) struct TestCa {
    cert: Certificate,
    key: KeyPair,
}

pub(crate) struct IssuedCert {
    pub cert_pem: String,
    pub key_pem: String,
}

impl TestCa {
    pub fn staging() -> Self {
        Self::new("(STAGING) Test Root X1")
    }

    pub fn production() -> Self {
        Self::new("Test Root X1")
    }

    fn new(common_name: &str) -> Self {
        let key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
        params
            .distinguished_name
            .push(DnType::CommonName, common_name);
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        let cert = params.self_signed(&key).unwrap();
        Self { cert, key }
    }

    /// Issue a leaf for `domain` that expires `days` from now.
    pub fn issue(&self, domain: &str, days: i64) -> IssuedCert {
        let key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::new(vec![domain.to_string()]).unwrap();
        params.distinguished_name.push(DnType::CommonName, domain);
        set_validity(&mut params, days);
        let cert = params.signed_by(&key, &self.cert, &self.key).unwrap();
        IssuedCert {
            cert_pem: format!("{}{}", cert.pem(), self.cert.pem()),
            key_pem: key.serialize_pem(),
        }
    }

    /// Sign a DER CSR, returning the PEM chain the way an ACME CA would.
    pub fn sign_csr(&self, csr_der: &[u8], days: i64) -> String {
        let der = CertificateSigningRequestDer::from(csr_der.to_vec());
        let mut csr = CertificateSigningRequestParams::from_der(&der).unwrap();
        set_validity(&mut csr.params, days);
        let cert = csr.signed_by(&self.cert, &self.key).unwrap();
        format!("{}{}", cert.pem(), self.cert.pem())
    }
}

fn set_validity(params: &mut CertificateParams, days: i64) {
    let now = OffsetDateTime::now_utc();
    let not_after = now + Duration::days(days);
    params.not_before = now.min(not_after) - Duration::days(1);
    params.not_after = not_after;
}

type Files = Arc<Mutex<BTreeMap<String, Vec<u8>>>>;

/// Names whose next GET answers 503.
#[derive(Default)]
struct Failures(Mutex<BTreeSet<String>>);

/// An in-process small-file service speaking the remote store protocol.
pub(crate) struct FileService {
    pub endpoint: String,
    pub files: Files,
    failures: Arc<Failures>,
    shutdown: Shutdown,
}

#[get("/files/<ns>/<name..>")]
fn get_file(
    files: &State<Files>,
    failures: &State<Arc<Failures>>,
    ns: &str,
    name: PathBuf,
) -> Result<Vec<u8>, Status> {
    let name = name.display().to_string();
    if failures.0.lock().unwrap().remove(&name) {
        return Err(Status::ServiceUnavailable);
    }
    let key = format!("{ns}/{name}");
    files.lock().unwrap().get(&key).cloned().ok_or(Status::NotFound)
}

#[put("/files/<ns>/<name..>", data = "<body>")]
fn put_file(files: &State<Files>, ns: &str, name: PathBuf, body: Vec<u8>) {
    let key = format!("{ns}/{}", name.display());
    files.lock().unwrap().insert(key, body);
}

impl FileService {
    pub async fn start() -> Self {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let config = rocket::Config {
            address: Ipv4Addr::LOCALHOST.into(),
            port,
            log_level: LogLevel::Off,
            ..rocket::Config::debug_default()
        };
        let files = Files::default();
        let failures = Arc::new(Failures::default());
        let rocket = rocket::custom(config)
            .mount("/", routes![get_file, put_file])
            .manage(files.clone())
            .manage(failures.clone())
            .ignite()
            .await
            .unwrap();
        let shutdown = rocket.shutdown();
        tokio::spawn(rocket.launch());

        for _ in 0..50 {
            if tokio::net::TcpStream::connect(("127.0.0.1", port)).await.is_ok() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        Self {
            endpoint: format!("http://127.0.0.1:{port}/"),
            files,
            failures,
            shutdown,
        }
    }

    /// Answer the next GET of the logical `name` with 503.
    pub fn fail_next_get(&self, name: &str) {
        self.failures.0.lock().unwrap().insert(name.to_string());
    }
}

impl Drop for FileService {
    fn drop(&mut self) {
        self.shutdown.clone().notify();
    }
}
