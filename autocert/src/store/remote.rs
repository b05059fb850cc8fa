use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use sha2::{Digest, Sha256};
use tracing::debug;

use super::MaterialStoreApi;
use crate::CertificateMaterial;

const ACCOUNT_KEY_NAME: &str = "private/acme-account.json";
const CERT_NAME: &str = "tls/ssl.cert";
const KEY_NAME: &str = "tls/ssl.key";

/// Stores material in a remote small-file service.
///
/// Files are addressed by logical name under a namespace derived from the
/// application name and the deployment seed, so two deployments sharing a
/// service never see each other's keys.
#[derive(Debug, Clone)]
pub struct RemoteStore {
    client: Client,
    endpoint: String,
    namespace: String,
}

impl RemoteStore {
    pub fn new(endpoint: impl Into<String>, app: &str, seed: &str) -> Result<Self> {
        let client = Client::builder()
            .build()
            .context("failed to build http client")?;
        let endpoint = endpoint.into().trim_end_matches('/').to_string();
        Ok(Self {
            client,
            endpoint,
            namespace: namespace(app, seed),
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn url(&self, name: &str) -> String {
        format!("{}/files/{}/{name}", self.endpoint, self.namespace)
    }

    async fn get(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let url = self.url(name);
        debug!("fetching {url}");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("failed to fetch {name}"))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = response
            .error_for_status()
            .with_context(|| format!("failed to fetch {name}"))?;
        let body = response
            .bytes()
            .await
            .with_context(|| format!("failed to read {name}"))?;
        Ok(Some(body.to_vec()))
    }

    async fn put(&self, name: &str, data: &[u8]) -> Result<()> {
        let url = self.url(name);
        debug!("storing {url}");
        self.client
            .put(&url)
            .body(data.to_vec())
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .with_context(|| format!("failed to store {name}"))?;
        Ok(())
    }

    async fn get_string(&self, name: &str) -> Result<Option<String>> {
        Ok(self
            .get(name)
            .await?
            .map(|data| String::from_utf8_lossy(&data).into_owned()))
    }
}

impl MaterialStoreApi for RemoteStore {
    async fn load_certificate_pem(&self) -> Result<Option<String>> {
        self.get_string(CERT_NAME).await
    }

    async fn save_certificate(&self, material: &CertificateMaterial) -> Result<()> {
        self.put(KEY_NAME, material.private_key_pem().as_bytes())
            .await?;
        self.put(CERT_NAME, material.certificate_pem().as_bytes())
            .await
    }

    async fn load_key(&self) -> Result<Option<String>> {
        self.get_string(KEY_NAME).await
    }

    async fn save_key(&self, key_pem: &str) -> Result<()> {
        self.put(KEY_NAME, key_pem.as_bytes()).await
    }

    async fn load_account_key(&self) -> Result<Option<Vec<u8>>> {
        self.get(ACCOUNT_KEY_NAME).await
    }

    async fn save_account_key(&self, account_key: &[u8]) -> Result<()> {
        self.put(ACCOUNT_KEY_NAME, account_key).await
    }
}

fn namespace(app: &str, seed: &str) -> String {
    let digest = Sha256::digest(format!("{app}:{seed}").as_bytes());
    hex::encode(&digest[..16])
}
