use crate::entity::{Challenge, Machine, Member, TeamStats};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;

pub mod backup;
pub mod config;
pub mod recovery;
pub mod store;

pub use backup::{BackupStore, FileBackup};
pub use config::BackupConfig;
pub use store::SnapshotStore;


/// Current on-disk format.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Every canonical entity family, keyed by upstream id.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub machines: BTreeMap<u64, Machine>,
    #[serde(default)]
    pub challenges: BTreeMap<u64, Challenge>,
    #[serde(default)]
    pub members: BTreeMap<u64, Member>,
    #[serde(default)]
    pub team: Option<TeamStats>,
}

impl Catalog {
    /// Total entities across families (for logging/display)
    pub fn entity_count(&self) -> usize {
        self.machines.len()
            + self.challenges.len()
            + self.members.len()
            + usize::from(self.team.is_some())
    }
}

/// Where the currently served snapshot came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotOrigin {
    /// Nothing synced yet and no backup available
    Empty,
    /// Restored from durable backup at startup
    Backup,
    /// Published by a successful sync
    Live,
}

/// Immutable, fully assembled catalog at a point in time
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Snapshot format version (for future schema evolution)
    pub version: u32,

    /// When the catalog was assembled
    pub as_of: DateTime<Utc>,

    pub origin: SnapshotOrigin,

    pub catalog: Catalog,
}

impl Snapshot {
    /// Placeholder served before the first sync or backup load
    pub fn empty() -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            as_of: DateTime::<Utc>::UNIX_EPOCH,
            origin: SnapshotOrigin::Empty,
            catalog: Catalog::default(),
        }
    }

    /// Snapshot of a freshly synced catalog, stamped now
    pub fn live(catalog: Catalog) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            as_of: Utc::now(),
            origin: SnapshotOrigin::Live,
            catalog,
        }
    }

    /// Save snapshot to filesystem as compressed JSON (gzip)
    ///
    /// Uses atomic write: writes to .tmp file, fsyncs, then renames.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec(self).context("Failed to serialize snapshot to JSON")?;

        let tmp_path = path.with_extension("tmp");

        {
            let tmp_file =
                File::create(&tmp_path).context("Failed to create temporary snapshot file")?;

            let mut encoder = GzEncoder::new(tmp_file, Compression::default());
            encoder
                .write_all(&json)
                .context("Failed to write compressed snapshot data")?;

            let file = encoder.finish().context("Failed to finish compression")?;

            file.sync_all()
                .context("Failed to sync snapshot file to disk")?;
        }

        fs::rename(&tmp_path, path).context("Failed to rename temporary snapshot file")?;

        Ok(())
    }

    /// Load snapshot from a compressed JSON file (.json.gz)
    ///
    /// The result is marked as restored from backup.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let file = File::open(path).context("Failed to open snapshot file")?;

        let mut decoder = GzDecoder::new(file);
        let mut json = Vec::new();
        decoder
            .read_to_end(&mut json)
            .context("Failed to decompress snapshot file")?;

        let mut snapshot: Snapshot =
            serde_json::from_slice(&json).context("Failed to deserialize snapshot JSON")?;

        if snapshot.version > SNAPSHOT_VERSION {
            anyhow::bail!(
                "Snapshot version {} is newer than supported version {}",
                snapshot.version,
                SNAPSHOT_VERSION
            );
        }

        snapshot.origin = SnapshotOrigin::Backup;
        Ok(snapshot)
    }

    /// Get entity count (for logging/display)
    pub fn entity_count(&self) -> usize {
        self.catalog.entity_count()
    }
}
