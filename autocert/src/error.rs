use std::time::Duration;

use thiserror::Error;

/// Why a renewal attempt did not produce a new live certificate.
///
/// Every variant except `Timeout` carries the underlying cause. A failed
/// attempt never touches the certificate currently being served.
#[derive(Debug, Error)]
pub enum RenewalError {
    #[error("certificate material is unreadable: {0:#}")]
    CertificateUnreadable(#[source] anyhow::Error),

    #[error("HTTP-01 challenge failed: {0:#}")]
    ChallengeFailed(#[source] anyhow::Error),

    #[error("ACME protocol error: {0:#}")]
    CaProtocol(#[source] anyhow::Error),

    #[error("failed to persist certificate material: {0:#}")]
    Persistence(#[source] anyhow::Error),

    #[error("failed to prepare key or CSR: {0:#}")]
    Key(#[source] anyhow::Error),

    #[error("ACME exchange timed out after {0:?}")]
    Timeout(Duration),
}
