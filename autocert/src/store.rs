use anyhow::{Context, Result};
use enum_dispatch::enum_dispatch;
use tracing::warn;

use crate::CertificateMaterial;

pub use local::LocalStore;
pub use remote::RemoteStore;

mod local;
mod remote;

/// Persistence for the key, certificate chain and ACME account key.
#[allow(async_fn_in_trait)]
#[enum_dispatch]
pub trait MaterialStoreApi {
    /// Load the stored certificate chain (PEM).
    async fn load_certificate_pem(&self) -> Result<Option<String>>;

    /// Store the certificate chain and its private key.
    async fn save_certificate(&self, material: &CertificateMaterial) -> Result<()>;

    async fn load_key(&self) -> Result<Option<String>>;

    async fn save_key(&self, key_pem: &str) -> Result<()>;

    async fn load_account_key(&self) -> Result<Option<Vec<u8>>>;

    async fn save_account_key(&self, account_key: &[u8]) -> Result<()>;

    /// Load and parse the stored certificate with its key.
    ///
    /// Anything unreadable or unparsable counts as absent.
    async fn load_certificate(&self) -> Option<CertificateMaterial> {
        match read_certificate(self).await {
            Ok(material) => material,
            Err(err) => {
                warn!("stored certificate is unreadable, treating as absent: {err:#}");
                None
            }
        }
    }
}

async fn read_certificate<S: MaterialStoreApi + ?Sized>(
    store: &S,
) -> Result<Option<CertificateMaterial>> {
    let Some(cert_pem) = store.load_certificate_pem().await? else {
        return Ok(None);
    };
    let key_pem = store
        .load_key()
        .await?
        .context("certificate present without a private key")?;
    CertificateMaterial::from_pem(&cert_pem, &key_pem).map(Some)
}

/// The configured storage backend.
#[derive(Debug)]
#[enum_dispatch(MaterialStoreApi)]
pub enum MaterialStore {
    Local(LocalStore),
    Remote(RemoteStore),
}

impl MaterialStore {
    pub fn local(workdir: impl AsRef<std::path::Path>) -> Self {
        Self::Local(LocalStore::new(workdir))
    }

    pub fn remote(endpoint: impl Into<String>, app: &str, seed: &str) -> Result<Self> {
        Ok(Self::Remote(RemoteStore::new(endpoint, app, seed)?))
    }
}
