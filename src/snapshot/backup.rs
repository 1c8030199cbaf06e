use super::config::BackupConfig;
use super::{recovery, Snapshot};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::fs;
use std::path::PathBuf;
use tracing::{error, info};

/// Durable home for the last good snapshot.
///
/// Neither call may fail the caller: a missing or unreadable backup is `None`,
/// a failed save is `false`.
#[async_trait]
pub trait BackupStore: Send + Sync {
    async fn load_backup(&self) -> Option<Snapshot>;

    async fn save_backup(&self, snapshot: &Snapshot) -> bool;
}

/// Gzip JSON snapshots in a directory, newest kept, oldest pruned
pub struct FileBackup {
    config: BackupConfig,
}

impl FileBackup {
    pub fn new(config: BackupConfig) -> Self {
        Self { config }
    }

    /// Generate snapshot file path with timestamp
    ///
    /// Format: snapshot-{timestamp}.json.gz
    /// Example: snapshot-20260212T153045.123Z.json.gz
    fn snapshot_path(&self) -> PathBuf {
        let timestamp = Utc::now().format("%Y%m%dT%H%M%S%.3fZ");
        self.config
            .directory
            .join(format!("snapshot-{}.json.gz", timestamp))
    }

    fn save_blocking(config: &BackupConfig, path: PathBuf, snapshot: &Snapshot) -> Result<usize> {
        fs::create_dir_all(&config.directory).context("Failed to create snapshot directory")?;
        snapshot.save_to_file(&path)?;
        recovery::prune_snapshots(&config.directory, config.keep_count.max(1))
    }
}

#[async_trait]
impl BackupStore for FileBackup {
    async fn load_backup(&self) -> Option<Snapshot> {
        if !self.config.enabled {
            return None;
        }

        let directory = self.config.directory.clone();
        let loaded = tokio::task::spawn_blocking(move || recovery::load_latest_snapshot(&directory))
            .await
            .context("Snapshot load task panicked")
            .and_then(|result| result);

        match loaded {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!(error = %e, directory = %self.config.directory.display(), "Failed to load snapshot backup");
                None
            }
        }
    }

    async fn save_backup(&self, snapshot: &Snapshot) -> bool {
        if !self.config.enabled {
            return false;
        }

        let config = self.config.clone();
        let path = self.snapshot_path();
        let snapshot = snapshot.clone();
        let entities = snapshot.entity_count();

        let saved = tokio::task::spawn_blocking({
            let path = path.clone();
            move || Self::save_blocking(&config, path, &snapshot)
        })
        .await
        .context("Snapshot save task panicked")
        .and_then(|result| result);

        match saved {
            Ok(pruned) => {
                info!(path = %path.display(), entities, pruned, "Snapshot backup saved");
                true
            }
            Err(e) => {
                error!(error = %e, path = %path.display(), "Failed to save snapshot backup");
                false
            }
        }
    }
}
