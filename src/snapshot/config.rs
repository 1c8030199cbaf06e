use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for the file backup
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Persist every published snapshot and restore it at startup
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Directory to store snapshots
    #[serde(default = "default_directory")]
    pub directory: PathBuf,

    /// Number of snapshots to keep (delete oldest)
    #[serde(default = "default_keep_count")]
    pub keep_count: usize,
}

fn default_enabled() -> bool {
    true
}

fn default_directory() -> PathBuf {
    PathBuf::from("/var/lib/teamsync/snapshots")
}

fn default_keep_count() -> usize {
    5
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            directory: default_directory(),
            keep_count: default_keep_count(),
        }
    }
}
