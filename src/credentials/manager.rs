//! Cached bearer token with single-flight refresh.

use super::{AccessToken, Clock, LoginCredentials, SystemClock};
use crate::SyncError;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Login response. The upstream has shipped both a flat and a wrapped form.
#[derive(Deserialize)]
#[serde(untagged)]
enum LoginResponse {
    Flat { access_token: String },
    Wrapped { message: LoginMessage },
}

#[derive(Deserialize)]
struct LoginMessage {
    access_token: String,
}

impl LoginResponse {
    fn into_token(self) -> String {
        match self {
            LoginResponse::Flat { access_token } => access_token,
            LoginResponse::Wrapped { message } => message.access_token,
        }
    }
}

/// Holds the current access token and refreshes it on demand.
///
/// # Thread Safety
/// - The cached token sits behind an async `RwLock`; readers never wait on a login
///   unless the token is inside the safety margin
/// - Refreshes serialize on `refresh_lock`, so simultaneous expiry triggers one login
pub struct CredentialManager {
    http: reqwest::Client,
    login_url: String,
    credentials: Option<LoginCredentials>,
    margin: chrono::Duration,
    clock: Arc<dyn Clock>,
    current: RwLock<Option<AccessToken>>,
    refresh_lock: Mutex<()>,
}

impl CredentialManager {
    /// Creates a manager with an empty token cache.
    ///
    /// # Arguments
    /// * `http` - Client used for the login exchange
    /// * `login_url` - Absolute URL of the login endpoint
    /// * `credentials` - Identifier/secret; `None` when only a pre-issued token is used
    /// * `margin` - Tokens expiring within this window are refreshed before use
    pub fn new(
        http: reqwest::Client,
        login_url: String,
        credentials: Option<LoginCredentials>,
        margin: Duration,
    ) -> Self {
        Self {
            http,
            login_url,
            credentials,
            margin: chrono::Duration::from_std(margin).unwrap_or(chrono::Duration::MAX),
            clock: Arc::new(SystemClock),
            current: RwLock::new(None),
            refresh_lock: Mutex::new(()),
        }
    }

    /// Replaces the wall clock (tests).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Installs an operator-supplied token as the cached one.
    pub async fn seed(&self, token: AccessToken) {
        *self.current.write().await = Some(token);
    }

    /// Current cached token, without validity checks.
    pub async fn cached(&self) -> Option<AccessToken> {
        self.current.read().await.clone()
    }

    /// True when the token expires within the safety margin (or already has).
    ///
    /// Tokens without an expiry claim are never considered expiring.
    pub fn is_expiring_soon(&self, token: &AccessToken) -> bool {
        match token.expires_at() {
            Some(expires_at) => self
                .clock
                .now()
                .checked_add_signed(self.margin)
                .map_or(true, |horizon| expires_at <= horizon),
            None => false,
        }
    }

    /// Returns a token valid for at least the safety margin.
    ///
    /// Serves the cached token when possible; otherwise refreshes first.
    pub async fn get_token(&self) -> Result<AccessToken, SyncError> {
        if let Some(token) = self.cached().await {
            if !self.is_expiring_soon(&token) {
                return Ok(token);
            }
            debug!(expires_at = ?token.expires_at(), "Access token inside refresh margin");
        }

        self.refresh_single_flight(None).await
    }

    /// Replaces a token the upstream just rejected with 401.
    ///
    /// If another caller already swapped the rejected token out, its
    /// replacement is returned without a second login.
    pub async fn refresh_after_rejection(
        &self,
        rejected: &AccessToken,
    ) -> Result<AccessToken, SyncError> {
        self.refresh_single_flight(Some(rejected)).await
    }

    async fn refresh_single_flight(
        &self,
        rejected: Option<&AccessToken>,
    ) -> Result<AccessToken, SyncError> {
        let _guard = self.refresh_lock.lock().await;

        // Whoever held the lock before us may already have refreshed.
        if let Some(token) = self.cached().await {
            let superseded = rejected.map_or(true, |r| r != &token);
            if superseded && !self.is_expiring_soon(&token) {
                return Ok(token);
            }
        }

        self.refresh().await
    }

    /// Performs one login exchange and installs the resulting token.
    ///
    /// Rejected credentials fail with `SyncError::Auth` and are not retried.
    pub async fn refresh(&self) -> Result<AccessToken, SyncError> {
        let credentials = self.credentials.as_ref().ok_or_else(|| {
            SyncError::Auth("token needs refresh but no login credentials are configured".into())
        })?;

        info!(identifier = %credentials.identifier, "Refreshing upstream access token");

        let response = self
            .http
            .post(&self.login_url)
            .header("Accept", "application/json")
            .json(credentials)
            .send()
            .await
            .map_err(|e| SyncError::Transient(format!("login request failed: {}", e)))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(SyncError::Transient(format!("login returned {}", status)));
        }
        if !status.is_success() {
            warn!(status = %status, "Upstream rejected login credentials");
            return Err(SyncError::Auth(format!("credentials rejected ({})", status)));
        }

        let body: LoginResponse = response
            .json()
            .await
            .map_err(|e| SyncError::Auth(format!("unreadable login response: {}", e)))?;
        let token = AccessToken::from_jwt(body.into_token())?;

        if self.is_expiring_soon(&token) {
            return Err(SyncError::Auth(
                "upstream issued a token that expires inside the refresh margin".into(),
            ));
        }

        *self.current.write().await = Some(token.clone());

        info!(expires_at = ?token.expires_at(), "Access token refreshed");
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD as BASE64URL, Engine};
    use chrono::{DateTime, Utc};
    use mockito::Server;

    struct ManualClock(std::sync::Mutex<DateTime<Utc>>);

    impl ManualClock {
        fn starting_now() -> Arc<Self> {
            Arc::new(Self(std::sync::Mutex::new(Utc::now())))
        }

        fn advance(&self, by: chrono::Duration) {
            let mut now = self.0.lock().unwrap();
            *now = *now + by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }

    fn jwt_expiring_at(exp: DateTime<Utc>) -> String {
        format!(
            "{}.{}.sig",
            BASE64URL.encode(r#"{"alg":"HS256"}"#),
            BASE64URL.encode(format!(r#"{{"sub":"1","exp":{}}}"#, exp.timestamp()))
        )
    }

    fn make_manager(server_url: &str, clock: Arc<ManualClock>) -> CredentialManager {
        CredentialManager::new(
            reqwest::Client::new(),
            format!("{}/login", server_url),
            Some(LoginCredentials::new("bot", "secret")),
            Duration::from_secs(120),
        )
        .with_clock(clock)
    }

    #[tokio::test]
    async fn test_get_token_refreshes_once_inside_margin() {
        let mut server = Server::new_async().await;
        let clock = ManualClock::starting_now();
        let start = clock.now();

        let first_jwt = jwt_expiring_at(start + chrono::Duration::minutes(10));
        let first = server
            .mock("POST", "/login")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(format!(r#"{{"access_token":"{}"}}"#, first_jwt))
            .expect(1)
            .create_async()
            .await;

        let manager = make_manager(&server.url(), Arc::clone(&clock));

        let token = manager.get_token().await.unwrap();
        assert_eq!(token.value(), first_jwt);

        // Immediate second call is served from cache.
        let again = manager.get_token().await.unwrap();
        assert_eq!(again, token);
        first.assert_async().await;
        first.remove_async().await;

        let second_jwt = jwt_expiring_at(start + chrono::Duration::minutes(20));
        let second = server
            .mock("POST", "/login")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(format!(r#"{{"message":{{"access_token":"{}"}}}}"#, second_jwt))
            .expect(1)
            .create_async()
            .await;

        // Nine minutes later the token is inside the two-minute margin.
        clock.advance(chrono::Duration::minutes(9));
        assert!(manager.is_expiring_soon(&token));

        let refreshed = manager.get_token().await.unwrap();
        assert_eq!(refreshed.value(), second_jwt);
        second.assert_async().await;
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_login() {
        let mut server = Server::new_async().await;
        let clock = ManualClock::starting_now();
        let jwt = jwt_expiring_at(clock.now() + chrono::Duration::hours(1));

        let login = server
            .mock("POST", "/login")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(format!(r#"{{"access_token":"{}"}}"#, jwt))
            .expect(1)
            .create_async()
            .await;

        let manager = Arc::new(make_manager(&server.url(), clock));

        let calls = (0..8).map(|_| {
            let manager = Arc::clone(&manager);
            async move { manager.get_token().await }
        });
        let results = futures::future::join_all(calls).await;

        for result in results {
            assert_eq!(result.unwrap().value(), jwt);
        }
        login.assert_async().await;
    }

    #[tokio::test]
    async fn test_rejected_credentials_are_auth_error() {
        let mut server = Server::new_async().await;
        let login = server
            .mock("POST", "/login")
            .with_status(401)
            .with_body(r#"{"message":"Invalid credentials"}"#)
            .expect(1)
            .create_async()
            .await;

        let manager = make_manager(&server.url(), ManualClock::starting_now());
        let err = manager.get_token().await.unwrap_err();

        assert!(matches!(err, SyncError::Auth(_)), "got {:?}", err);
        assert!(manager.cached().await.is_none());
        login.assert_async().await;
    }

    #[tokio::test]
    async fn test_short_lived_token_is_rejected() {
        let mut server = Server::new_async().await;
        let clock = ManualClock::starting_now();
        let jwt = jwt_expiring_at(clock.now() + chrono::Duration::seconds(30));

        let _login = server
            .mock("POST", "/login")
            .with_status(200)
            .with_body(format!(r#"{{"access_token":"{}"}}"#, jwt))
            .create_async()
            .await;

        let manager = make_manager(&server.url(), clock);
        let err = manager.refresh().await.unwrap_err();
        assert!(matches!(err, SyncError::Auth(_)));
    }

    #[tokio::test]
    async fn test_refresh_after_rejection_skips_login_when_already_replaced() {
        let server = Server::new_async().await;
        let clock = ManualClock::starting_now();
        let manager = make_manager(&server.url(), Arc::clone(&clock));

        let stale = AccessToken::new("stale", None);
        let fresh = AccessToken::new("fresh", Some(clock.now() + chrono::Duration::hours(1)));
        manager.seed(fresh.clone()).await;

        // No login mock exists: any request would fail the call.
        let token = manager.refresh_after_rejection(&stale).await.unwrap();
        assert_eq!(token, fresh);
    }

    #[tokio::test]
    async fn test_pre_issued_token_without_credentials() {
        let manager = CredentialManager::new(
            reqwest::Client::new(),
            "http://localhost:9/login".to_string(),
            None,
            Duration::from_secs(120),
        );
        manager.seed(AccessToken::pre_issued("opaque")).await;

        let token = manager.get_token().await.unwrap();
        assert_eq!(token.value(), "opaque");

        // Once rejected there is no way to log in again.
        let err = manager.refresh_after_rejection(&token).await.unwrap_err();
        assert!(matches!(err, SyncError::Auth(_)));
    }

    #[test]
    fn test_unbounded_margin_treats_every_expiring_token_as_stale() {
        let manager = CredentialManager::new(
            reqwest::Client::new(),
            "http://localhost/login".to_string(),
            None,
            Duration::MAX,
        );
        let token = AccessToken::from_jwt(jwt_expiring_at(Utc::now() + chrono::Duration::days(365))).unwrap();

        assert!(manager.is_expiring_soon(&token));
        assert!(!manager.is_expiring_soon(&AccessToken::pre_issued("opaque")));
    }
}
