use crate::credentials::{AccessToken, LoginCredentials};
use crate::executor::RetryPolicy;
use crate::rate_limit::{EndpointFamily, ThrottleRegistry, ThrottleSettings};
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::info;

pub use crate::snapshot::config::BackupConfig;

/// Complete sync engine configuration
///
/// Every section and field has a default, so an empty file is valid.
/// Credentials are normally supplied through the environment.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub throttle: ThrottleConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub sync: ScheduleConfig,
    #[serde(default)]
    pub backup: BackupConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

/// Upstream API location
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    /// Versioned API root, e.g. https://platform.example/api/v4
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Team whose roster is synced
    #[serde(default)]
    pub team_id: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_base_url() -> String {
    "https://platform.example/api/v4".to_string()
}

fn default_user_agent() -> String {
    format!("teamsync/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            team_id: 0,
            user_agent: default_user_agent(),
        }
    }
}

/// Credentials and token lifecycle
#[derive(Clone, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub identifier: Option<String>,

    #[serde(default)]
    pub secret: Option<String>,

    /// Pre-issued bearer token, used until the upstream rejects it
    #[serde(default)]
    pub token: Option<String>,

    /// Tokens expiring within this many seconds are refreshed before use
    #[serde(default = "default_refresh_margin_secs")]
    pub refresh_margin_secs: u64,
}

fn default_refresh_margin_secs() -> u64 {
    120
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            identifier: None,
            secret: None,
            token: None,
            refresh_margin_secs: default_refresh_margin_secs(),
        }
    }
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("identifier", &self.identifier)
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("refresh_margin_secs", &self.refresh_margin_secs)
            .finish()
    }
}

impl AuthConfig {
    /// Login credentials, when both halves are configured
    pub fn login_credentials(&self) -> Option<LoginCredentials> {
        match (&self.identifier, &self.secret) {
            (Some(identifier), Some(secret)) => {
                Some(LoginCredentials::new(identifier.clone(), secret.clone()))
            }
            _ => None,
        }
    }

    /// Pre-issued token, with its expiry decoded when it is a JWT
    pub fn initial_token(&self) -> Option<AccessToken> {
        self.token.as_ref().map(|token| {
            AccessToken::from_jwt(token.clone())
                .unwrap_or_else(|_| AccessToken::pre_issued(token.clone()))
        })
    }

    pub fn refresh_margin(&self) -> Duration {
        Duration::from_secs(self.refresh_margin_secs)
    }
}

/// Default throttle limits plus per-family overrides
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ThrottleConfig {
    #[serde(flatten)]
    pub defaults: ThrottleSettings,

    #[serde(default)]
    pub families: HashMap<EndpointFamily, ThrottleSettings>,
}

impl ThrottleConfig {
    pub fn build_registry(&self) -> ThrottleRegistry {
        ThrottleRegistry::new(self.defaults.clone(), self.families.clone())
    }
}

/// Retry bound and backoff schedule
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before each retry (milliseconds); the last entry repeats
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: Vec<u64>,

    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_ms() -> Vec<u64> {
    vec![500, 1000, 2000, 4000]
}

fn default_jitter() -> bool {
    true
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_ms: default_backoff_ms(),
            jitter: default_jitter(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::from_millis(self.max_retries, &self.backoff_ms, self.jitter)
    }
}

/// Request timeouts
#[derive(Debug, Clone, Deserialize)]
pub struct TimeoutConfig {
    /// Per-response timeout (seconds)
    #[serde(default = "default_response_secs")]
    pub response_secs: u64,

    /// Budget for dispatches and retry backoff of one request, excluding throttle waits (seconds)
    #[serde(default = "default_deadline_secs")]
    pub deadline_secs: u64,
}

fn default_response_secs() -> u64 {
    15
}

fn default_deadline_secs() -> u64 {
    90
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            response_secs: default_response_secs(),
            deadline_secs: default_deadline_secs(),
        }
    }
}

impl TimeoutConfig {
    pub fn response(&self) -> Duration {
        Duration::from_secs(self.response_secs)
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }
}

/// Periodic sync schedule
#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    /// Seconds between periodic syncs
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Sync once immediately at startup
    #[serde(default = "default_run_on_start")]
    pub run_on_start: bool,
}

fn default_interval_secs() -> u64 {
    600
}

fn default_run_on_start() -> bool {
    true
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            run_on_start: default_run_on_start(),
        }
    }
}

impl ScheduleConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Status/trigger HTTP API
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_enabled")]
    pub enabled: bool,

    #[serde(default = "default_api_port")]
    pub port: u16,
}

fn default_api_enabled() -> bool {
    true
}

fn default_api_port() -> u16 {
    3002
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: default_api_enabled(),
            port: default_api_port(),
        }
    }
}

impl SyncConfig {
    /// Load configuration from a TOML file (if it exists), then apply
    /// `TEAMSYNC_*` environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            toml::from_str::<SyncConfig>(&contents)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?
        } else {
            info!(path = %path.display(), "Config file not found, using defaults");
            SyncConfig::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Applies `TEAMSYNC_*` overrides from `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("TEAMSYNC_BASE_URL") {
            self.upstream.base_url = v;
        }
        if let Some(v) = lookup("TEAMSYNC_TEAM_ID") {
            self.upstream.team_id = v
                .parse()
                .with_context(|| format!("TEAMSYNC_TEAM_ID is not a number: {}", v))?;
        }
        if let Some(v) = lookup("TEAMSYNC_IDENTIFIER") {
            self.auth.identifier = Some(v);
        }
        if let Some(v) = lookup("TEAMSYNC_SECRET") {
            self.auth.secret = Some(v);
        }
        if let Some(v) = lookup("TEAMSYNC_TOKEN") {
            self.auth.token = Some(v);
        }
        if let Some(v) = lookup("TEAMSYNC_API_PORT") {
            self.api.port = v
                .parse()
                .with_context(|| format!("TEAMSYNC_API_PORT is not a port: {}", v))?;
        }
        Ok(())
    }

    /// Rejects configurations that cannot run a sync.
    pub fn validate(&self) -> Result<()> {
        if self.upstream.base_url.trim().is_empty() {
            bail!("upstream.base_url is empty");
        }
        if self.upstream.team_id == 0 {
            bail!("upstream.team_id is not set (TEAMSYNC_TEAM_ID)");
        }
        if self.auth.login_credentials().is_none() && self.auth.token.is_none() {
            bail!("no credentials: set TEAMSYNC_IDENTIFIER and TEAMSYNC_SECRET, or TEAMSYNC_TOKEN");
        }

        let throttles = std::iter::once(("default", &self.throttle.defaults)).chain(
            self.throttle
                .families
                .iter()
                .map(|(family, settings)| (family.as_str(), settings)),
        );
        for (name, settings) in throttles {
            if settings.max_concurrency == 0 || settings.requests_per_window == 0 {
                bail!("throttle '{}' allows no requests", name);
            }
            if settings.window_secs == 0 {
                bail!("throttle '{}' has a zero-length window", name);
            }
        }

        if self.retry.backoff_ms.is_empty() {
            bail!("retry.backoff_ms is empty");
        }
        if self.sync.interval_secs == 0 {
            bail!("sync.interval_secs must be at least 1");
        }
        if self.timeouts.deadline_secs < self.timeouts.response_secs {
            bail!("timeouts.deadline_secs is shorter than timeouts.response_secs");
        }
        Ok(())
    }

    /// Absolute login endpoint URL
    pub fn login_url(&self) -> String {
        format!("{}/login", self.upstream.base_url.trim_end_matches('/'))
    }
}
