//! Bearer token lifecycle for the upstream API.
//!
//! The upstream issues short-lived JWT access tokens from a login exchange.
//! This module keeps exactly one cached token, hands it out while it is valid
//! for longer than the configured safety margin, and replaces it wholesale
//! when it is not.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │       CredentialManager                  │
//! │  - cached AccessToken                    │
//! │  - single-flight refresh                 │
//! └─────────────────────────────────────────┘
//!          ↓                    ↑
//!    (login exchange)     (JWT `exp` claim)
//!          ↓                    ↑
//! ┌─────────────────────────────────────────┐
//! │       Upstream POST /login               │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use teamsync::credentials::{CredentialManager, LoginCredentials};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), teamsync::SyncError> {
//! let manager = CredentialManager::new(
//!     reqwest::Client::new(),
//!     "https://platform.example/api/v4/login".to_string(),
//!     Some(LoginCredentials::new("team-bot", "s3cret")),
//!     Duration::from_secs(120),
//! );
//!
//! let token = manager.get_token().await?;
//! println!("token expires at {:?}", token.expires_at());
//! # Ok(())
//! # }
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

mod claims;
mod manager;

pub use claims::decode_expiry;
pub use manager::CredentialManager;

/// Bearer token plus its expiry as claimed by the token itself.
///
/// Never mutated in place; a refresh produces a new value.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

impl AccessToken {
    pub fn new(value: impl Into<String>, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            value: value.into(),
            expires_at,
        }
    }

    /// Build a token from a JWT, reading expiry from its `exp` claim.
    pub fn from_jwt(value: impl Into<String>) -> Result<Self, crate::SyncError> {
        let value = value.into();
        let expires_at =
            decode_expiry(&value).map_err(|e| crate::SyncError::Auth(e.to_string()))?;
        Ok(Self { value, expires_at })
    }

    /// Build a token from an operator-supplied string.
    ///
    /// Opaque (non-JWT) tokens are accepted and treated as non-expiring until
    /// the upstream rejects them.
    pub fn pre_issued(value: impl Into<String>) -> Self {
        let value = value.into();
        let expires_at = decode_expiry(&value).ok().flatten();
        Self { value, expires_at }
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("value", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Identifier + secret accepted by the login endpoint.
#[derive(Clone, Serialize)]
pub struct LoginCredentials {
    pub identifier: String,
    pub secret: String,
}

impl LoginCredentials {
    pub fn new(identifier: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            secret: secret.into(),
        }
    }
}

impl fmt::Debug for LoginCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginCredentials")
            .field("identifier", &self.identifier)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Source of "now" for expiry checks.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_secrets() {
        let token = AccessToken::new("very-secret-token", None);
        let creds = LoginCredentials::new("bot", "hunter2");

        let token_dbg = format!("{:?}", token);
        let creds_dbg = format!("{:?}", creds);

        assert!(!token_dbg.contains("very-secret-token"));
        assert!(!creds_dbg.contains("hunter2"));
        assert!(creds_dbg.contains("bot"));
    }

    #[test]
    fn test_pre_issued_opaque_token_never_expires() {
        let token = AccessToken::pre_issued("opaque-api-key");
        assert_eq!(token.value(), "opaque-api-key");
        assert!(token.expires_at().is_none());
    }

    #[test]
    fn test_from_jwt_rejects_garbage() {
        assert!(AccessToken::from_jwt("not-a-jwt").is_err());
    }
}
