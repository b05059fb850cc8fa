use anyhow::{bail, Context, Result};
use rcgen::KeyPair;
use time::OffsetDateTime;
use x509_parser::prelude::{Pem, X509Certificate};

/// A parsed certificate chain together with the private key it was issued for.
///
/// Only obtainable through [`CertificateMaterial::from_pem`], so the metadata
/// fields always agree with the PEM they were read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateMaterial {
    certificate_pem: String,
    private_key_pem: String,
    issued_at: OffsetDateTime,
    not_after: OffsetDateTime,
    common_name: String,
    issuer_common_name: String,
}

impl CertificateMaterial {
    /// Parse a PEM chain (leaf first) and its private key.
    ///
    /// Fails if the chain is not valid PEM/X.509 or the key does not belong
    /// to the leaf certificate.
    pub fn from_pem(certificate_pem: &str, private_key_pem: &str) -> Result<Self> {
        let pem = read_pem(certificate_pem)?;
        let cert = pem.parse_x509().context("invalid x509 certificate")?;
        let key = KeyPair::from_pem(private_key_pem).context("failed to parse private key")?;
        if key.public_key_der() != cert.public_key().raw {
            bail!("private key does not match the certificate");
        }
        let validity = cert.validity();
        Ok(Self {
            certificate_pem: certificate_pem.to_string(),
            private_key_pem: private_key_pem.to_string(),
            issued_at: validity.not_before.to_datetime(),
            not_after: validity.not_after.to_datetime(),
            common_name: subject_common_name(&cert)?,
            issuer_common_name: issuer_common_name(&cert),
        })
    }

    pub fn certificate_pem(&self) -> &str {
        &self.certificate_pem
    }

    pub fn private_key_pem(&self) -> &str {
        &self.private_key_pem
    }

    pub fn issued_at(&self) -> OffsetDateTime {
        self.issued_at
    }

    pub fn not_after(&self) -> OffsetDateTime {
        self.not_after
    }

    pub fn common_name(&self) -> &str {
        &self.common_name
    }

    pub fn issuer_common_name(&self) -> &str {
        &self.issuer_common_name
    }

    /// Whether the certificate was issued by a staging CA.
    pub fn is_staging(&self) -> bool {
        self.issuer_common_name.to_lowercase().contains("staging")
    }

    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        self.not_after <= now
    }
}

pub(crate) fn read_pem(cert_pem: &str) -> Result<Pem> {
    Pem::iter_from_buffer(cert_pem.as_bytes())
        .next()
        .transpose()
        .context("invalid pem")?
        .context("no certificate in pem")
}

fn subject_common_name(cert: &X509Certificate) -> Result<String> {
    cert.subject()
        .iter_common_name()
        .next()
        .context("certificate has no common name")?
        .as_str()
        .map(str::to_string)
        .context("certificate common name is not a string")
}

// Some issuers only carry an O/OU, an empty name is fine there.
fn issuer_common_name(cert: &X509Certificate) -> String {
    cert.issuer()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .unwrap_or_default()
        .to_string()
}
