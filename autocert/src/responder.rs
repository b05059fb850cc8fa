//! HTTP-01 challenge responder.
//!
//! Holds the key authorizations for the challenges currently in flight and
//! serves them at `/.well-known/acme-challenge/<token>`.

use std::{
    collections::BTreeMap,
    sync::{Arc, PoisonError, RwLock},
};

use rocket::{get, http::Status, routes, Route, State};
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
pub struct ChallengeResponder {
    challenges: RwLock<BTreeMap<String, String>>,
}

impl ChallengeResponder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the response for `token`, replacing any previous one.
    pub fn put(&self, token: &str, key_authorization: &str) {
        debug!(token, "registering HTTP-01 challenge");
        self.challenges
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(token.to_string(), key_authorization.to_string());
    }

    pub fn remove(&self, token: &str) {
        debug!(token, "removing HTTP-01 challenge");
        self.challenges
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(token);
    }

    pub fn lookup(&self, token: &str) -> Option<String> {
        self.challenges
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(token)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.challenges
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Challenges registered during one order.
///
/// Every token registered here is removed from the responder when the set
/// is dropped, so an aborted or timed out exchange leaves nothing behind.
pub(crate) struct PendingChallenges<'a> {
    responder: &'a ChallengeResponder,
    tokens: Vec<String>,
}

impl<'a> PendingChallenges<'a> {
    pub fn new(responder: &'a ChallengeResponder) -> Self {
        Self {
            responder,
            tokens: Vec::new(),
        }
    }

    pub fn register(&mut self, token: &str, key_authorization: &str) {
        self.responder.put(token, key_authorization);
        if !self.tokens.iter().any(|t| t == token) {
            self.tokens.push(token.to_string());
        }
    }
}

impl Drop for PendingChallenges<'_> {
    fn drop(&mut self) {
        for token in self.tokens.drain(..) {
            self.responder.remove(&token);
        }
    }
}

#[get("/.well-known/acme-challenge/<token>")]
fn acme_challenge(responder: &State<Arc<ChallengeResponder>>, token: &str) -> (Status, String) {
    match responder.lookup(token) {
        Some(key_authorization) => {
            info!(token, "serving ACME challenge response");
            (Status::Ok, key_authorization)
        }
        None => {
            warn!(token, "unknown ACME challenge token");
            (Status::NotFound, String::new())
        }
    }
}

/// Routes to mount at `/`. The rocket instance must manage an `Arc<ChallengeResponder>`.
pub fn routes() -> Vec<Route> {
    routes![acme_challenge]
}
