//! Session-bound CSRF token issuance and validation.
//!
//! Double-submit protocol: a session requests a token once, then echoes it
//! in the `x-csrf-token` header on every mutating request. One token per
//! session; reissuing rebinds immediately and kills the previous value.
//! Comparison is keyed HMAC-SHA256 with a constant-time verify, so the
//! check leaks no timing information about the stored token.

use crate::errors::GatewayError;
use axum::http::Method;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

const TOKEN_BYTES: usize = 32;

/// Header carrying the echoed token on mutating requests.
pub const CSRF_TOKEN_HEADER: &str = "x-csrf-token";

#[derive(Debug, Clone)]
struct TokenBinding {
    value: String,
    issued_at: DateTime<Utc>,
}

pub struct CsrfGuard {
    bindings: RwLock<HashMap<String, TokenBinding>>,
    secret: Vec<u8>,
}

impl CsrfGuard {
    pub fn new(secret: &str) -> Self {
        Self {
            bindings: RwLock::new(HashMap::new()),
            secret: secret.as_bytes().to_vec(),
        }
    }

    /// Methods exempt from validation. Everything else must present a token.
    pub fn is_safe_method(method: &Method) -> bool {
        matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
    }

    /// Issue a fresh token for the session, replacing any previous binding.
    pub async fn issue(&self, session_id: &str) -> String {
        let mut bytes = [0u8; TOKEN_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        let token = hex::encode(bytes);

        let binding = TokenBinding {
            value: token.clone(),
            issued_at: Utc::now(),
        };

        let mut bindings = self.bindings.write().await;
        if let Some(previous) = bindings.insert(session_id.to_string(), binding) {
            debug!(
                "Reissued CSRF token for session {} (previous issued at {})",
                session_id, previous.issued_at
            );
        }

        token
    }

    /// Validate a presented token against the session's binding. A failed
    /// attempt leaves the binding intact; there is no lockout.
    pub async fn validate(
        &self,
        session_id: &str,
        presented: Option<&str>,
    ) -> Result<(), GatewayError> {
        let presented = presented.ok_or(GatewayError::CsrfValidation)?;

        let stored = {
            let bindings = self.bindings.read().await;
            bindings
                .get(session_id)
                .map(|binding| binding.value.clone())
        };

        let stored = stored.ok_or(GatewayError::CsrfValidation)?;

        if self.tokens_match(&stored, presented) {
            Ok(())
        } else {
            debug!("CSRF token mismatch for session {}", session_id);
            Err(GatewayError::CsrfValidation)
        }
    }

    fn tokens_match(&self, stored: &str, presented: &str) -> bool {
        let mut expected = HmacSha256::new_from_slice(&self.secret)
            .expect("HMAC accepts keys of any length");
        expected.update(stored.as_bytes());
        let expected = expected.finalize().into_bytes();

        let mut actual = HmacSha256::new_from_slice(&self.secret)
            .expect("HMAC accepts keys of any length");
        actual.update(presented.as_bytes());

        // verify_slice is constant-time over the MAC outputs
        actual.verify_slice(&expected).is_ok()
    }
}
