use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use tokio::time::sleep;
use tracing::debug;

use crate::{
    acme_client::{AcmeApi, AcmeOrder, AuthorizationRejected, OrderStatus},
    responder::{ChallengeResponder, PendingChallenges},
    RenewalError,
};

/// Run one ACME order for `domain` to completion and return the issued PEM chain.
///
/// HTTP-01 responses are registered with `responder` for the duration of the
/// call only.
pub(crate) async fn request_certificate<A: AcmeApi>(
    acme: &A,
    responder: &ChallengeResponder,
    key_pem: &str,
    domain: &str,
    poll_interval: Duration,
) -> Result<String, RenewalError> {
    let mut pending = PendingChallenges::new(responder);
    let mut order = acme.new_order(domain).await.map_err(classify)?;
    let mut challenges_ready = false;
    loop {
        match order.refresh().await.map_err(classify)? {
            // Need to accept the challenge
            OrderStatus::Pending => {
                if challenges_ready {
                    debug!("challenges are ready, waiting for order to be ready");
                    sleep(poll_interval).await;
                    continue;
                }
                debug!("order is pending, registering http-01 challenges");
                let challenges = order
                    .pending_http01_challenges()
                    .await
                    .map_err(classify)?;
                if challenges.is_empty() {
                    return Err(RenewalError::ChallengeFailed(anyhow!(
                        "order is pending but no challenges were offered"
                    )));
                }
                for challenge in &challenges {
                    pending.register(&challenge.token, &challenge.key_authorization);
                }
                for challenge in &challenges {
                    debug!("setting challenge ready for {}", challenge.url);
                    order
                        .set_challenge_ready(&challenge.url)
                        .await
                        .map_err(classify)?;
                }
                challenges_ready = true;
            }
            // To upload CSR
            OrderStatus::Ready => {
                debug!("order is ready, uploading CSR");
                let csr = make_csr(key_pem, domain).map_err(RenewalError::Key)?;
                order.finalize(&csr).await.map_err(classify)?;
            }
            // Need to wait for the CA to issue
            OrderStatus::Processing => {
                debug!("order is processing, waiting for the CSR to be accepted");
                sleep(poll_interval).await;
            }
            // Certificate is ready
            OrderStatus::Valid => {
                debug!("order is valid, getting certificate");
                return extract_certificate(&mut order).await;
            }
            OrderStatus::Invalid => {
                return Err(RenewalError::ChallengeFailed(anyhow!(
                    "order for {domain} is invalid"
                )));
            }
        }
    }
}

/// Rejections of the authorization are challenge failures, everything else is
/// a problem talking to the CA.
fn classify(err: anyhow::Error) -> RenewalError {
    if err.downcast_ref::<AuthorizationRejected>().is_some() {
        RenewalError::ChallengeFailed(err)
    } else {
        RenewalError::CaProtocol(err)
    }
}

pub(crate) fn make_csr(key_pem: &str, domain: &str) -> Result<Vec<u8>> {
    let mut params = CertificateParams::new(vec![domain.to_string()])
        .context("failed to create certificate params")?;
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, domain);
    params.distinguished_name = dn;
    let key = KeyPair::from_pem(key_pem).context("failed to parse private key")?;
    let csr = params
        .serialize_request(&key)
        .context("failed to serialize certificate request")?;
    Ok(csr.der().as_ref().to_vec())
}

const CERTIFICATE_ATTEMPTS: usize = 5;
const CERTIFICATE_RETRY_INTERVAL: Duration = Duration::from_secs(1);

async fn extract_certificate<O: AcmeOrder>(order: &mut O) -> Result<String, RenewalError> {
    for _ in 0..CERTIFICATE_ATTEMPTS {
        if let Some(chain) = order.certificate().await.map_err(classify)? {
            return Ok(chain);
        }
        sleep(CERTIFICATE_RETRY_INTERVAL).await;
    }
    Err(RenewalError::CaProtocol(anyhow!(
        "certificate was not available after the order became valid"
    )))
}
