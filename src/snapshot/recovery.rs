use crate::snapshot::Snapshot;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Load the most recent valid snapshot from directory
///
/// Returns None if no snapshots exist or all are corrupt.
/// Tries snapshots from newest to oldest until one loads successfully.
pub fn load_latest_snapshot(snapshot_dir: &Path) -> Result<Option<Snapshot>> {
    if !snapshot_dir.exists() {
        info!(
            directory = %snapshot_dir.display(),
            "Snapshot directory does not exist, starting without backup"
        );
        return Ok(None);
    }

    let mut snapshots = list_snapshots(snapshot_dir)?;

    if snapshots.is_empty() {
        info!(directory = %snapshot_dir.display(), "No snapshots found");
        return Ok(None);
    }

    // Newest first; the timestamp in the name sorts lexicographically.
    snapshots.sort_by(|a, b| b.cmp(a));

    for path in snapshots {
        match Snapshot::load_from_file(&path) {
            Ok(snapshot) => {
                info!(
                    path = %path.display(),
                    as_of = %snapshot.as_of,
                    entities = snapshot.entity_count(),
                    "Loaded snapshot backup"
                );
                return Ok(Some(snapshot));
            }
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "Corrupt snapshot, trying next oldest"
                );
            }
        }
    }

    error!(directory = %snapshot_dir.display(), "All snapshots are corrupt, starting empty");
    Ok(None)
}

/// Delete old snapshots, keeping only the most recent `keep_count`
///
/// Returns the number of files removed.
pub fn prune_snapshots(snapshot_dir: &Path, keep_count: usize) -> Result<usize> {
    let mut snapshots = list_snapshots(snapshot_dir)?;

    if snapshots.len() <= keep_count {
        return Ok(0);
    }

    snapshots.sort();

    let delete_count = snapshots.len() - keep_count;
    let mut deleted = 0;

    for path in &snapshots[..delete_count] {
        match fs::remove_file(path) {
            Ok(()) => {
                deleted += 1;
                info!(path = %path.display(), "Deleted old snapshot");
            }
            Err(e) => {
                error!(error = %e, path = %path.display(), "Failed to delete old snapshot");
            }
        }
    }

    Ok(deleted)
}

/// List all snapshot files in directory
pub(crate) fn list_snapshots(snapshot_dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(snapshot_dir).context("Failed to read snapshot directory")?;

    let mut snapshots = Vec::new();

    for entry in entries {
        let entry = entry.context("Failed to read directory entry")?;
        let path = entry.path();

        if path.is_file() {
            if let Some(filename) = path.file_name().and_then(|n| n.to_str()) {
                if filename.starts_with("snapshot-") && filename.ends_with(".json.gz") {
                    snapshots.push(path);
                }
            }
        }
    }

    Ok(snapshots)
}
