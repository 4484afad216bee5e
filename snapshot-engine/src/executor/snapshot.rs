//! Snapshot directory naming and creation.
//!
//! A snapshot is named `<drive>_<timestamp>`. The timestamp is captured once
//! per drive so every destination of the same run gets the same name.

use crate::utils::errors::{EngineError, Result};
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

pub fn format_timestamp(time: &DateTime<Local>) -> String {
    time.format(TIMESTAMP_FORMAT).to_string()
}

/// Filesystem-safe identifier for a source drive.
///
/// `Y:\` becomes `Y`, `/mnt/data` becomes `mnt_data`, `/` becomes `root`.
pub fn drive_label(source: &Path) -> String {
    let raw = source.to_string_lossy();
    let label: String = raw
        .trim_matches(|c| c == '/' || c == '\\')
        .chars()
        .filter(|c| *c != ':')
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect();

    if label.is_empty() {
        "root".to_string()
    } else {
        label
    }
}

pub fn snapshot_path(destination_base: &Path, source: &Path, timestamp: &str) -> PathBuf {
    destination_base.join(format!("{}_{}", drive_label(source), timestamp))
}

/// Create the snapshot directory, refusing to reuse an existing one.
///
/// Two runs of the same drive within one second would otherwise merge into
/// a single snapshot.
pub async fn create_snapshot_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| EngineError::Directory {
                path: parent.to_path_buf(),
                source,
            })?;
    }

    match tokio::fs::create_dir(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            Err(EngineError::SnapshotExists(path.to_path_buf()))
        }
        Err(source) => Err(EngineError::Directory {
            path: path.to_path_buf(),
            source,
        }),
    }
}
