use std::sync::{Arc, PoisonError, RwLock};

use anyhow::{Context, Result};
use rustls::{
    crypto::ring::sign::any_supported_type,
    pki_types::{pem::PemObject, CertificateDer, PrivateKeyDer},
    server::{ClientHello, ResolvesServerCert},
    sign::CertifiedKey,
};
use tracing::info;

use crate::CertificateMaterial;

struct LiveCertificate {
    material: Arc<CertificateMaterial>,
    certified_key: Arc<CertifiedKey>,
}

/// The certificate currently served to TLS clients.
///
/// Replaced wholesale on publish; readers see either the previous or the new
/// certificate, never a mix.
#[derive(Default)]
pub struct ActiveTls {
    live: RwLock<Option<Arc<LiveCertificate>>>,
}

impl ActiveTls {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `material` the live certificate.
    ///
    /// The rustls key is built before the swap, so a failure here leaves the
    /// previous certificate in place.
    pub fn publish(&self, material: Arc<CertificateMaterial>) -> Result<()> {
        let certified_key = Arc::new(certified_key(&material)?);
        let live = Arc::new(LiveCertificate {
            material: material.clone(),
            certified_key,
        });
        *self.live.write().unwrap_or_else(PoisonError::into_inner) = Some(live);
        info!(
            common_name = material.common_name(),
            not_after = %material.not_after(),
            "published new TLS certificate"
        );
        Ok(())
    }

    pub fn current(&self) -> Option<Arc<CertificateMaterial>> {
        self.live()
            .map(|live| live.material.clone())
    }

    pub fn is_live(&self) -> bool {
        self.live().is_some()
    }

    fn live(&self) -> Option<Arc<LiveCertificate>> {
        self.live
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl std::fmt::Debug for ActiveTls {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveTls")
            .field("current", &self.current())
            .finish()
    }
}

impl ResolvesServerCert for ActiveTls {
    fn resolve(&self, _client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        self.live().map(|live| live.certified_key.clone())
    }
}

fn certified_key(material: &CertificateMaterial) -> Result<CertifiedKey> {
    let certs = CertificateDer::pem_slice_iter(material.certificate_pem().as_bytes())
        .collect::<Result<Vec<_>, _>>()
        .context("failed to parse certificate chain")?;
    let key = PrivateKeyDer::from_pem_slice(material.private_key_pem().as_bytes())
        .context("failed to parse private key")?;
    let signing_key = any_supported_type(&key).context("unsupported private key type")?;
    Ok(CertifiedKey::new(certs, signing_key))
}
