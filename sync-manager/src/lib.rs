//! Sync Manager - keeps a local team roster and content catalog in step with
//! the upstream platform.
//!
//! # Architecture
//!
//! ```text
//!      Upstream platform API
//!               ↓
//! ┌─────────────────────────────────────────┐
//! │   RequestExecutor (teamsync)            │
//! │  - Per-family throttles                 │
//! │  - Token refresh, retries, deadline     │
//! └─────────────────────────────────────────┘
//!               ↓
//! ┌─────────────────────────────────────────┐
//! │   UpstreamSource (CatalogSource)        │
//! │  - Paginated lists + detail fan-out     │
//! │  - Legacy/current merge per entity      │
//! └─────────────────────────────────────────┘
//!               ↓
//! ┌─────────────────────────────────────────┐
//! │   SyncOrchestrator                      │
//! │  - Single-flight sync cycles            │
//! │  - Atomic snapshot publish              │
//! │  - Backup restore and save              │
//! └─────────────────────────────────────────┘
//!               ↓
//!     SnapshotStore ← HTTP API readers
//! ```
//!
//! # Core Types
//!
//! - [`CatalogSource`] - Trait for anything that can assemble a full catalog
//! - [`UpstreamSource`] - Production source backed by the upstream HTTP API
//! - [`SyncOrchestrator`] - Runs sync cycles and owns the published snapshot

pub mod api;
pub mod orchestrator;
pub mod source;
pub mod upstream;

pub use orchestrator::{SyncOrchestrator, SyncOutcome, SyncPhase, SyncStatus};
pub use source::CatalogSource;
pub use upstream::{UpstreamClient, UpstreamSource};
