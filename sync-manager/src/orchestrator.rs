//! Sync orchestrator - drives one catalog source into the snapshot store.
//!
//! State machine: `Idle → Running → (Publishing | Failed) → Idle`.
//! A trigger while a cycle is running is rejected, never queued.

use crate::source::CatalogSource;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use teamsync::snapshot::{BackupStore, Snapshot, SnapshotStore};
use teamsync::SyncError;
use tokio::time::{self, MissedTickBehavior};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Result of one `trigger_sync` call.
#[derive(Debug)]
pub enum SyncOutcome {
    /// A new snapshot was published with this as-of time
    Completed(DateTime<Utc>),
    /// Another cycle holds the lock (always `SyncError::AlreadyRunning`)
    Rejected(SyncError),
    /// The cycle aborted; the previous snapshot is still published
    Failed(SyncError),
}

impl SyncOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, SyncOutcome::Completed(_))
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, SyncOutcome::Rejected(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Idle,
    Running,
    Publishing,
    Failed,
}

/// Counters for monitoring.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncStatus {
    /// As-of time of the last published live snapshot
    pub last_success: Option<DateTime<Utc>>,
    /// Cause of the last failed cycle (cleared by a success)
    pub last_error: Option<String>,
    pub sync_count: u64,
    pub error_count: u64,
    pub rejected_count: u64,
}

struct State {
    phase: SyncPhase,
    status: SyncStatus,
}

/// Holds the sync lock; releasing it on drop returns the phase to `Idle`.
///
/// Drop also runs while unwinding, so a panicking source cannot leave the
/// orchestrator stuck in `Running`.
struct SyncGuard<'a> {
    lock: &'a AtomicBool,
    state: &'a Mutex<State>,
}

impl<'a> SyncGuard<'a> {
    fn try_acquire(lock: &'a AtomicBool, state: &'a Mutex<State>) -> Option<Self> {
        lock.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { lock, state })
    }
}

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).phase = SyncPhase::Idle;
        self.lock.store(false, Ordering::Release);
    }
}

/// Owns the sync lock, the snapshot store and the backup hooks.
pub struct SyncOrchestrator {
    source: Arc<dyn CatalogSource>,
    store: Arc<SnapshotStore>,
    backup: Option<Arc<dyn BackupStore>>,
    lock: AtomicBool,
    state: Mutex<State>,
}

impl SyncOrchestrator {
    pub fn new(
        source: Arc<dyn CatalogSource>,
        store: Arc<SnapshotStore>,
        backup: Option<Arc<dyn BackupStore>>,
    ) -> Self {
        Self {
            source,
            store,
            backup,
            lock: AtomicBool::new(false),
            state: Mutex::new(State {
                phase: SyncPhase::Idle,
                status: SyncStatus::default(),
            }),
        }
    }

    /// Publishes the durable backup, if any, so readers are served before
    /// the first live sync. Returns whether a backup was restored.
    pub async fn bootstrap(&self) -> bool {
        let Some(backup) = &self.backup else {
            return false;
        };

        match backup.load_backup().await {
            Some(snapshot) => {
                info!(
                    as_of = %snapshot.as_of,
                    entities = snapshot.entity_count(),
                    "Restored snapshot from backup"
                );
                self.store.publish(snapshot);
                true
            }
            None => {
                info!("No backup snapshot available, serving empty snapshot until first sync");
                false
            }
        }
    }

    /// Runs one sync cycle unless one is already running.
    pub async fn trigger_sync(&self) -> SyncOutcome {
        let Some(_guard) = SyncGuard::try_acquire(&self.lock, &self.state) else {
            self.with_state(|s| s.status.rejected_count += 1);
            warn!("Sync already running, trigger rejected");
            return SyncOutcome::Rejected(SyncError::AlreadyRunning);
        };

        let sync_id = Uuid::now_v7();
        self.set_phase(SyncPhase::Running);
        info!(sync_id = %sync_id, source = self.source.name(), "Sync started");

        let catalog = match self.source.collect().await {
            Ok(catalog) => catalog,
            Err(e) => {
                self.with_state(|s| {
                    s.phase = SyncPhase::Failed;
                    s.status.last_error = Some(e.to_string());
                    s.status.error_count += 1;
                });
                error!(sync_id = %sync_id, error = %e, "Sync failed, keeping previous snapshot");
                return SyncOutcome::Failed(e);
            }
        };

        self.set_phase(SyncPhase::Publishing);
        let snapshot = Snapshot::live(catalog);
        let as_of = snapshot.as_of;
        self.store.publish(snapshot);

        self.with_state(|s| {
            s.status.last_success = Some(as_of);
            s.status.last_error = None;
            s.status.sync_count += 1;
        });
        info!(sync_id = %sync_id, as_of = %as_of, "Sync completed");

        self.spawn_backup_save();
        SyncOutcome::Completed(as_of)
    }

    fn spawn_backup_save(&self) {
        let Some(backup) = self.backup.clone() else {
            return;
        };
        let snapshot = self.store.current();
        tokio::spawn(async move {
            if !backup.save_backup(&snapshot).await {
                warn!(as_of = %snapshot.as_of, "Snapshot backup not saved");
            }
        });
    }

    /// Latest published snapshot. Never blocks on a running sync.
    pub fn current_snapshot(&self) -> Arc<Snapshot> {
        self.store.current()
    }

    pub fn last_sync_time(&self) -> Option<DateTime<Utc>> {
        self.store.last_sync_time()
    }

    pub fn phase(&self) -> SyncPhase {
        self.with_state(|s| s.phase)
    }

    pub fn status(&self) -> SyncStatus {
        self.with_state(|s| s.status.clone())
    }

    /// Triggers a sync every `interval` until the task is aborted.
    ///
    /// The immediate first tick is skipped; the startup sync is the caller's call.
    pub async fn run_periodic(self: Arc<Self>, interval: Duration) {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await;

        info!(interval_secs = interval.as_secs(), "Periodic sync scheduled");
        loop {
            ticker.tick().await;
            match self.trigger_sync().await {
                SyncOutcome::Completed(_) | SyncOutcome::Rejected(_) => {}
                SyncOutcome::Failed(e) => {
                    warn!(error = %e, "Periodic sync failed, retrying next interval");
                }
            }
        }
    }

    fn set_phase(&self, phase: SyncPhase) {
        self.with_state(|s| s.phase = phase);
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut state)
    }
}
