//! In-memory token issuer.

use crate::error::{Result, SessionError};
use crate::providers::{TokenClaims, TokenIssuer};
use chrono::Duration;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

type VerifyOutcome = std::result::Result<TokenClaims, String>;

/// Token issuer that mints opaque tokens and remembers their claims.
///
/// No signing happens; a token verifies iff this issuer minted it (or a
/// failure was planted with [`plant_failure`](Self::plant_failure)).
#[derive(Debug, Clone, Default)]
pub struct MockTokenIssuer {
    tokens: Arc<Mutex<HashMap<String, VerifyOutcome>>>,
}

impl MockTokenIssuer {
    /// Create an issuer with no known tokens.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a token whose verification fails with the given reason,
    /// for exercising claim-extraction failures.
    pub fn plant_failure(&self, token: &str, reason: &str) {
        self.tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(token.to_string(), Err(reason.to_string()));
    }
}

impl TokenIssuer for MockTokenIssuer {
    async fn issue(&self, claims: &TokenClaims, _ttl: Duration) -> Result<String> {
        let token = format!("tok-{}", uuid::Uuid::new_v4().simple());
        self.tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(token.clone(), Ok(claims.clone()));
        Ok(token)
    }

    async fn verify(&self, token: &str) -> Result<TokenClaims> {
        let tokens = self.tokens.lock().unwrap_or_else(PoisonError::into_inner);
        match tokens.get(token) {
            Some(Ok(claims)) => Ok(claims.clone()),
            Some(Err(reason)) => Err(SessionError::InvalidToken {
                reason: reason.clone(),
            }),
            None => Err(SessionError::InvalidToken {
                reason: "signature verification failed".to_string(),
            }),
        }
    }
}
