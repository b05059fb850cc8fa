use std::future::Future;

use anyhow::{bail, Context, Result};
use instant_acme::{
    Account, AccountCredentials, AuthorizationStatus, ChallengeType, Identifier, LetsEncrypt,
    NewAccount, NewOrder, Order,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::store::{MaterialStore, MaterialStoreApi};

pub use instant_acme::OrderStatus;

/// An HTTP-01 challenge the CA expects to find served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Http01Challenge {
    pub token: String,
    pub key_authorization: String,
    pub url: String,
}

/// Errors the CA reported about the authorization itself, as opposed to
/// transport problems.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct AuthorizationRejected(pub String);

/// Entry point into an ACME directory.
pub trait AcmeApi: Send + Sync {
    type Order: AcmeOrder;

    /// Place a new order for a single DNS identifier.
    fn new_order(&self, domain: &str) -> impl Future<Output = Result<Self::Order>> + Send;
}

/// One in-flight ACME order.
pub trait AcmeOrder: Send {
    /// Fetch the current order status from the CA.
    fn refresh(&mut self) -> impl Future<Output = Result<OrderStatus>> + Send;

    /// HTTP-01 challenges for every authorization still pending.
    ///
    /// Fails with [`AuthorizationRejected`] when an authorization is in a
    /// state that can no longer succeed or offers no HTTP-01 challenge.
    fn pending_http01_challenges(
        &mut self,
    ) -> impl Future<Output = Result<Vec<Http01Challenge>>> + Send;

    fn set_challenge_ready(&mut self, url: &str) -> impl Future<Output = Result<()>> + Send;

    /// Submit the DER encoded CSR.
    fn finalize(&mut self, csr_der: &[u8]) -> impl Future<Output = Result<()>> + Send;

    /// Download the issued chain, `None` while it is not available yet.
    fn certificate(&mut self) -> impl Future<Output = Result<Option<String>>> + Send;
}

/// An ACME account backed by `instant-acme`.
pub struct AcmeClient {
    account: Account,
    credentials: Credentials,
}

#[derive(Serialize, Deserialize)]
pub(crate) struct Credentials {
    pub(crate) account_id: String,
    pub(crate) acme_url: String,
    credentials: AccountCredentials,
}

/// The directory to talk to when no explicit URL is configured.
pub fn default_acme_url(staging: bool) -> &'static str {
    if staging {
        LetsEncrypt::Staging.url()
    } else {
        LetsEncrypt::Production.url()
    }
}

impl AcmeClient {
    pub async fn load(encoded_credentials: &[u8]) -> Result<Self> {
        let credentials: Credentials =
            serde_json::from_slice(encoded_credentials).context("invalid account credentials")?;
        let account = Account::from_credentials(credentials.credentials)
            .await
            .context("failed to restore ACME account")?;
        let credentials: Credentials = serde_json::from_slice(encoded_credentials)?;
        Ok(Self {
            account,
            credentials,
        })
    }

    /// Register a new account, agreeing to the terms of service.
    pub async fn new_account(acme_url: &str) -> Result<Self> {
        let (account, credentials) = Account::create(
            &NewAccount {
                contact: &[],
                terms_of_service_agreed: true,
                only_return_existing: false,
            },
            acme_url,
            None,
        )
        .await
        .context("failed to create new account")?;
        let credentials = Credentials {
            account_id: account.id().to_string(),
            acme_url: acme_url.to_string(),
            credentials,
        };
        Ok(Self {
            account,
            credentials,
        })
    }

    /// Restore the stored account for `acme_url`, or register and store a new one.
    pub async fn load_or_create(store: &MaterialStore, acme_url: &str) -> Result<Self> {
        if let Some(encoded) = store
            .load_account_key()
            .await
            .context("failed to load account key")?
        {
            match serde_json::from_slice::<Credentials>(&encoded) {
                Ok(stored) if stored.acme_url == acme_url => {
                    return Self::load(&encoded).await;
                }
                Ok(stored) => {
                    info!(
                        stored = %stored.acme_url,
                        configured = acme_url,
                        "stored ACME account belongs to another directory"
                    );
                }
                Err(err) => warn!("stored ACME account is unreadable: {err}"),
            }
        }
        info!("creating new ACME account at {acme_url}");
        let client = Self::new_account(acme_url).await?;
        store
            .save_account_key(client.dump_credentials()?.as_bytes())
            .await
            .context("failed to store account key")?;
        info!("created new ACME account: {}", client.account_id());
        Ok(client)
    }

    /// Dump the account credentials to a JSON string.
    pub fn dump_credentials(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.credentials)?)
    }

    pub fn account_id(&self) -> &str {
        &self.credentials.account_id
    }

    pub fn acme_url(&self) -> &str {
        &self.credentials.acme_url
    }
}

impl AcmeApi for AcmeClient {
    type Order = AcmeClientOrder;

    async fn new_order(&self, domain: &str) -> Result<AcmeClientOrder> {
        debug!("creating new order for {domain}");
        let identifiers = [Identifier::Dns(domain.to_string())];
        let order = self
            .account
            .new_order(&NewOrder {
                identifiers: &identifiers,
            })
            .await
            .context("failed to create new order")?;
        Ok(AcmeClientOrder { order })
    }
}

pub struct AcmeClientOrder {
    order: Order,
}

impl AcmeOrder for AcmeClientOrder {
    async fn refresh(&mut self) -> Result<OrderStatus> {
        let state = self
            .order
            .refresh()
            .await
            .context("failed to refresh order")?;
        Ok(state.status)
    }

    async fn pending_http01_challenges(&mut self) -> Result<Vec<Http01Challenge>> {
        let authorizations = self
            .order
            .authorizations()
            .await
            .context("failed to get authorizations")?;
        let mut challenges = Vec::new();
        for authz in &authorizations {
            match authz.status {
                AuthorizationStatus::Pending => {}
                AuthorizationStatus::Valid => continue,
                _ => bail!(AuthorizationRejected(format!(
                    "unsupported authorization status: {:?}",
                    authz.status
                ))),
            }
            let Identifier::Dns(identifier) = &authz.identifier;
            let challenge = authz
                .challenges
                .iter()
                .find(|c| c.r#type == ChallengeType::Http01)
                .ok_or_else(|| {
                    AuthorizationRejected(format!("no http-01 challenge offered for {identifier}"))
                })?;
            let key_authorization = self.order.key_authorization(challenge);
            challenges.push(Http01Challenge {
                token: challenge.token.clone(),
                key_authorization: key_authorization.as_str().to_string(),
                url: challenge.url.clone(),
            });
        }
        Ok(challenges)
    }

    async fn set_challenge_ready(&mut self, url: &str) -> Result<()> {
        self.order
            .set_challenge_ready(url)
            .await
            .context("failed to set challenge ready")
    }

    async fn finalize(&mut self, csr_der: &[u8]) -> Result<()> {
        self.order
            .finalize(csr_der)
            .await
            .context("failed to finalize order")
    }

    async fn certificate(&mut self) -> Result<Option<String>> {
        self.order
            .certificate()
            .await
            .context("failed to get certificate")
    }
}
