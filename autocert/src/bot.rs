use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use rcgen::KeyPair;
use time::OffsetDateTime;
use tokio::{process::Command, sync::Mutex, time::sleep};
use tracing::{debug, error, info, warn};

use crate::{
    acme_client::{default_acme_url, AcmeApi, AcmeClient},
    evaluator::{evaluate, Decision, RemainingDays, RenewReason},
    order,
    scheduler::delay_until_next_hour,
    store::{MaterialStore, MaterialStoreApi},
    ActiveTls, CertificateMaterial, ChallengeResponder, RenewalError,
};

#[derive(Clone, Debug, bon::Builder)]
#[builder(on(String, into))]
pub struct CertManagerConfig {
    /// The single domain the certificate is issued for.
    domain: String,
    /// Use the staging directory and expect staging issuers.
    #[builder(default)]
    staging: bool,
    /// Overrides the Let's Encrypt directory picked by `staging`.
    acme_url: Option<String>,
    /// Upper bound for one whole ACME exchange.
    #[builder(default = Duration::from_secs(600))]
    renew_timeout: Duration,
    #[builder(default = Duration::from_secs(2))]
    poll_interval: Duration,
    #[builder(default)]
    remaining_days: RemainingDays,
    /// Shell command run after a renewed certificate is published.
    renewed_hook: Option<String>,
}

impl CertManagerConfig {
    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn staging(&self) -> bool {
        self.staging
    }

    /// The configured directory URL, or the Let's Encrypt one for the environment.
    pub fn acme_url(&self) -> &str {
        self.acme_url
            .as_deref()
            .unwrap_or_else(|| default_acme_url(self.staging))
    }

    pub fn renew_timeout(&self) -> Duration {
        self.renew_timeout
    }

    pub fn remaining_days(&self) -> RemainingDays {
        self.remaining_days
    }

    /// Evaluate `material` against this configuration.
    pub fn evaluate(&self, material: Option<&CertificateMaterial>) -> Decision {
        evaluate(material, &self.domain, self.staging, self.remaining_days)
    }
}

/// Result of a successful [`CertManager::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    Valid,
    Renewed(RenewReason),
}

/// Keeps a certificate for one domain live in [`ActiveTls`].
pub struct CertManager<A = AcmeClient> {
    config: CertManagerConfig,
    acme: A,
    store: MaterialStore,
    responder: Arc<ChallengeResponder>,
    active: Arc<ActiveTls>,
    renewal_guard: Mutex<()>,
}

impl CertManager<AcmeClient> {
    /// Build a manager talking to the configured ACME directory.
    ///
    /// Restores the stored ACME account, registering a new one if needed.
    pub async fn build(
        config: CertManagerConfig,
        store: MaterialStore,
        responder: Arc<ChallengeResponder>,
    ) -> Result<Self> {
        let acme = AcmeClient::load_or_create(&store, config.acme_url())
            .await
            .context("failed to set up ACME account")?;
        info!(account_id = acme.account_id(), "using ACME account");
        Ok(Self::new(config, acme, store, responder))
    }
}

impl<A: AcmeApi> CertManager<A> {
    pub fn new(
        config: CertManagerConfig,
        acme: A,
        store: MaterialStore,
        responder: Arc<ChallengeResponder>,
    ) -> Self {
        Self {
            config,
            acme,
            store,
            responder,
            active: Arc::new(ActiveTls::new()),
            renewal_guard: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &CertManagerConfig {
        &self.config
    }

    pub fn acme(&self) -> &A {
        &self.acme
    }

    pub fn store(&self) -> &MaterialStore {
        &self.store
    }

    pub fn responder(&self) -> &Arc<ChallengeResponder> {
        &self.responder
    }

    /// The TLS slot. Hand it to rustls as the certificate resolver.
    pub fn active(&self) -> &Arc<ActiveTls> {
        &self.active
    }

    /// Evaluate the live certificate.
    pub fn evaluate(&self) -> Decision {
        self.config.evaluate(self.active.current().as_deref())
    }

    /// Serve the stored certificate if it is usable, then run one check.
    ///
    /// Fails only when the check fails and nothing is live afterwards.
    pub async fn boot(&self) -> Result<(), RenewalError> {
        self.load_stored().await;
        match self.check().await {
            Ok(CheckOutcome::Valid) => info!("stored certificate is up to date"),
            Ok(CheckOutcome::Renewed(reason)) => info!(?reason, "certificate issued at boot"),
            Err(err) if self.active.is_live() => {
                error!("renewal at boot failed, serving the stored certificate: {err}");
            }
            Err(err) => return Err(err),
        }
        Ok(())
    }

    /// Publish the stored certificate unless it has expired or was issued
    /// for another domain or environment. Returns whether it is now live.
    pub async fn load_stored(&self) -> bool {
        let Some(material) = self.store.load_certificate().await else {
            info!("no stored certificate");
            return false;
        };
        if material.is_expired_at(OffsetDateTime::now_utc()) {
            info!(not_after = %material.not_after(), "stored certificate has expired");
            return false;
        }
        if let Decision::MustRenew(
            reason @ (RenewReason::DomainMismatch | RenewReason::EnvironmentMismatch),
        ) = self.config.evaluate(Some(&material))
        {
            info!(
                ?reason,
                common_name = material.common_name(),
                issuer = material.issuer_common_name(),
                "stored certificate does not fit the configuration"
            );
            return false;
        }
        match self.active.publish(Arc::new(material)) {
            Ok(()) => true,
            Err(err) => {
                warn!("failed to load stored certificate: {err:#}");
                false
            }
        }
    }

    /// Renew the certificate if the live one no longer qualifies.
    pub async fn check(&self) -> Result<CheckOutcome, RenewalError> {
        let Decision::MustRenew(reason) = self.evaluate() else {
            debug!(domain = %self.config.domain, "certificate is valid");
            return Ok(CheckOutcome::Valid);
        };
        info!(domain = %self.config.domain, ?reason, "certificate needs renewal");
        let _guard = self.renewal_guard.lock().await;
        // Another task may have renewed while we waited for the guard.
        let Decision::MustRenew(reason) = self.evaluate() else {
            info!("certificate was renewed concurrently");
            return Ok(CheckOutcome::Valid);
        };
        self.renew_locked().await?;
        Ok(CheckOutcome::Renewed(reason))
    }

    /// Request a new certificate regardless of the live one.
    pub async fn renew(&self) -> Result<Arc<CertificateMaterial>, RenewalError> {
        let _guard = self.renewal_guard.lock().await;
        self.renew_locked().await
    }

    /// Check at the top of every hour, forever.
    pub async fn run(self: Arc<Self>)
    where
        A: 'static,
    {
        loop {
            let delay = delay_until_next_hour(OffsetDateTime::now_utc());
            debug!("next certificate check in {delay:?}");
            sleep(delay).await;
            let manager = self.clone();
            tokio::spawn(async move {
                match manager.check().await {
                    Ok(CheckOutcome::Valid) => {}
                    Ok(CheckOutcome::Renewed(reason)) => info!(?reason, "certificate renewed"),
                    Err(err) => error!("failed to renew certificate: {err}"),
                }
            });
        }
    }

    async fn renew_locked(&self) -> Result<Arc<CertificateMaterial>, RenewalError> {
        let domain = self.config.domain.as_str();
        info!(domain, staging = self.config.staging, "requesting new certificate");
        let key_pem = self.prepare_key().await?;
        let chain = tokio::time::timeout(
            self.config.renew_timeout,
            order::request_certificate(
                &self.acme,
                &self.responder,
                &key_pem,
                domain,
                self.config.poll_interval,
            ),
        )
        .await
        .map_err(|_| RenewalError::Timeout(self.config.renew_timeout))??;

        let material = CertificateMaterial::from_pem(&chain, &key_pem)
            .context("issued certificate is unusable")
            .map_err(RenewalError::CertificateUnreadable)?;
        let material = Arc::new(material);
        let saved = self.store.save_certificate(&material).await;
        self.active
            .publish(material.clone())
            .map_err(RenewalError::CertificateUnreadable)?;
        if let Err(err) = saved {
            error!("renewed certificate is live but was not stored: {err:#}");
            return Err(RenewalError::Persistence(err));
        }
        info!(
            domain,
            not_after = %material.not_after(),
            issuer = material.issuer_common_name(),
            "renewed certificate"
        );
        self.run_renewed_hook().await;
        Ok(material)
    }

    /// The stored key if it parses, otherwise a fresh one that is stored
    /// before the CA sees it.
    ///
    /// A failed read aborts the renewal; the stored key may still belong to
    /// the stored certificate.
    async fn prepare_key(&self) -> Result<String, RenewalError> {
        let stored = self
            .store
            .load_key()
            .await
            .context("failed to load private key")
            .map_err(RenewalError::Persistence)?;
        match stored {
            Some(key_pem) if KeyPair::from_pem(&key_pem).is_ok() => {
                debug!("reusing stored private key");
                return Ok(key_pem);
            }
            Some(_) => warn!("stored private key is unreadable, generating a new one"),
            None => debug!("no stored private key, generating one"),
        }
        let key_pem = KeyPair::generate()
            .context("failed to generate private key")
            .map_err(RenewalError::Key)?
            .serialize_pem();
        self.store
            .save_key(&key_pem)
            .await
            .context("failed to store private key")
            .map_err(RenewalError::Persistence)?;
        Ok(key_pem)
    }

    async fn run_renewed_hook(&self) {
        let Some(hook) = &self.config.renewed_hook else {
            return;
        };
        info!("running renewed hook");
        match Command::new("/bin/sh").arg("-c").arg(hook).status().await {
            Ok(status) if !status.success() => {
                error!("renewed hook failed with status: {status}");
            }
            Ok(_) => {}
            Err(err) => error!("failed to run renewed hook: {err:?}"),
        }
    }
}
