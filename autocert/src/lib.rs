//! Automatic TLS certificates for a single domain.
//!
//! This library keeps a certificate issued by an ACME CA (Let's Encrypt)
//! live for one domain. Ownership of the domain is proven with HTTP-01
//! challenges served from the host's own Rocket instance.
//!
//! # Features
//!
//! - Issuance at boot and hourly renewal checks, with renewals serialized
//! - Staging and production environments, with automatic replacement of a
//!   certificate from the wrong one
//! - Certificate, key and account storage on local disk or in a remote
//!   small-file service
//! - A rustls certificate resolver that always serves the latest certificate
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use autocert::{responder, CertManager, CertManagerConfig, ChallengeResponder, MaterialStore};
//!
//! #[rocket::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = CertManagerConfig::builder()
//!         .domain("example.com")
//!         .staging(true)
//!         .build();
//!     let responder = Arc::new(ChallengeResponder::new());
//!     let store = MaterialStore::local("/etc/autocert");
//!     let manager = Arc::new(CertManager::build(config, store, responder.clone()).await?);
//!
//!     let rocket = rocket::build()
//!         .mount("/", responder::routes())
//!         .manage(responder)
//!         .ignite()
//!         .await?;
//!     tokio::spawn(rocket.launch());
//!
//!     manager.boot().await?;
//!     // Hand `manager.active().clone()` to rustls as the certificate resolver.
//!     manager.run().await;
//!     Ok(())
//! }
//! ```
pub use active::ActiveTls;
pub use acme_client::{AcmeApi, AcmeClient, AcmeOrder, Http01Challenge, OrderStatus};
pub use bot::{CertManager, CertManagerConfig, CheckOutcome};
pub use error::RenewalError;
pub use evaluator::{evaluate, evaluate_at, Decision, RemainingDays, RenewReason};
pub use material::CertificateMaterial;
pub use responder::ChallengeResponder;
pub use store::{LocalStore, MaterialStore, MaterialStoreApi, RemoteStore};
pub use workdir::WorkDir;

pub mod responder;
pub mod scheduler;

mod acme_client;
mod active;
mod bot;
mod error;
mod evaluator;
mod material;
mod order;
mod store;
mod workdir;

#[cfg(test)]
mod test_utils;
