use super::{Snapshot, SnapshotOrigin};
use chrono::{DateTime, Utc};
use std::sync::{Arc, RwLock};
use tracing::info;

/// Holder of the one published snapshot.
///
/// Readers clone the `Arc` under a read lock held only for the clone; a
/// publish swaps the pointer under the write lock. A reader therefore sees
/// either the previous snapshot or the new one, whole.
pub struct SnapshotStore {
    current: RwLock<Arc<Snapshot>>,
}

impl SnapshotStore {
    pub fn new(initial: Snapshot) -> Self {
        Self {
            current: RwLock::new(Arc::new(initial)),
        }
    }

    /// Latest published snapshot.
    pub fn current(&self) -> Arc<Snapshot> {
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    /// Replaces the published snapshot and returns the one it superseded.
    pub fn publish(&self, snapshot: Snapshot) -> Arc<Snapshot> {
        let next = Arc::new(snapshot);
        let previous = {
            let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
            std::mem::replace(&mut *guard, Arc::clone(&next))
        };

        info!(
            as_of = %next.as_of,
            origin = ?next.origin,
            entities = next.entity_count(),
            "Snapshot published"
        );
        previous
    }

    /// As-of time of the last live snapshot, or of the restored backup.
    ///
    /// `None` while only the empty placeholder has been served.
    pub fn last_sync_time(&self) -> Option<DateTime<Utc>> {
        let snapshot = self.current();
        match snapshot.origin {
            SnapshotOrigin::Empty => None,
            SnapshotOrigin::Backup | SnapshotOrigin::Live => Some(snapshot.as_of),
        }
    }
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new(Snapshot::empty())
    }
}
