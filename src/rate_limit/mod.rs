// Per-endpoint-family throttles.
//
// One throttle per family, created lazily on first use and kept for the life
// of the process. Each bounds concurrency and a rolling-window request rate.
// The rate ceiling is retuned from quota headers on every response that
// carries them; families without headers keep their configured default.

mod throttle;

pub use throttle::{Throttle, ThrottlePermit, ThrottleStats, RETUNE_FACTOR};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Group of upstream endpoints sharing one server-side quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointFamily {
    Machines,
    Challenges,
    Team,
    Users,
}

impl EndpointFamily {
    pub const ALL: [EndpointFamily; 4] = [
        EndpointFamily::Machines,
        EndpointFamily::Challenges,
        EndpointFamily::Team,
        EndpointFamily::Users,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointFamily::Machines => "machines",
            EndpointFamily::Challenges => "challenges",
            EndpointFamily::Team => "team",
            EndpointFamily::Users => "users",
        }
    }
}

impl fmt::Display for EndpointFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Starting limits for one throttle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ThrottleSettings {
    /// Maximum requests in flight at once
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Requests allowed per rolling window until the server says otherwise
    #[serde(default = "default_requests_per_window")]
    pub requests_per_window: u32,

    /// Rolling window length (seconds)
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

fn default_max_concurrency() -> usize {
    8
}

fn default_requests_per_window() -> u32 {
    60
}

fn default_window_secs() -> u64 {
    60
}

impl Default for ThrottleSettings {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            requests_per_window: default_requests_per_window(),
            window_secs: default_window_secs(),
        }
    }
}

impl ThrottleSettings {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// Lazily populated map of family → throttle.
pub struct ThrottleRegistry {
    defaults: ThrottleSettings,
    overrides: HashMap<EndpointFamily, ThrottleSettings>,
    throttles: DashMap<EndpointFamily, Arc<Throttle>>,
}

impl ThrottleRegistry {
    pub fn new(
        defaults: ThrottleSettings,
        overrides: HashMap<EndpointFamily, ThrottleSettings>,
    ) -> Self {
        Self {
            defaults,
            overrides,
            throttles: DashMap::new(),
        }
    }

    /// Throttle for `family`, created on first use.
    pub fn throttle_for(&self, family: EndpointFamily) -> Arc<Throttle> {
        let entry = self.throttles.entry(family).or_insert_with(|| {
            let settings = self.overrides.get(&family).unwrap_or(&self.defaults);
            Arc::new(Throttle::new(family, settings))
        });
        Arc::clone(entry.value())
    }

    /// Applies server-reported quota metadata to `family`'s throttle.
    pub fn retune(&self, family: EndpointFamily, observed_limit: u32, observed_remaining: Option<u32>) {
        self.throttle_for(family)
            .retune(observed_limit, observed_remaining);
    }

    /// Snapshot of every throttle created so far, ordered by family.
    pub fn stats(&self) -> Vec<ThrottleStats> {
        let mut stats: Vec<ThrottleStats> = self
            .throttles
            .iter()
            .map(|entry| entry.value().stats())
            .collect();
        stats.sort_by_key(|s| s.family);
        stats
    }
}

impl Default for ThrottleRegistry {
    fn default() -> Self {
        Self::new(ThrottleSettings::default(), HashMap::new())
    }
}
