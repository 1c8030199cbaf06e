// Upstream credentials and bearer token lifecycle
pub mod credentials;

// Per-endpoint-family adaptive throttles
pub mod rate_limit;

// Throttled, retrying request execution
pub mod executor;

// Canonical entities and dual-shape merge
pub mod entity;

// Published snapshot, store and file backup
pub mod snapshot;

// TOML + environment configuration
pub mod config;

// Error taxonomy shared by fetchers and the orchestrator
pub mod error;

pub use error::SyncError;
