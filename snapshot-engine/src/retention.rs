//! Pruning of expired snapshot directories.
//!
//! Every immediate child directory of a destination root whose modification
//! time is strictly older than `now - max_age` is removed recursively.
//! Plain files (such as a log kept next to the snapshots) are never touched.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{error, info};

const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// Paths removed or left behind by one cleanup pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionReport {
    pub deleted: Vec<PathBuf>,
    pub failed: Vec<PathBuf>,
}

#[derive(Debug, Clone, Copy)]
pub struct RetentionCleaner {
    max_age: Duration,
}

impl RetentionCleaner {
    pub fn new(max_age: Duration) -> Self {
        Self { max_age }
    }

    pub fn from_days(days: u64) -> Self {
        Self::new(Duration::from_secs(days.saturating_mul(SECS_PER_DAY)))
    }

    /// Clean every root against the current wall clock
    pub fn clean(&self, roots: &[PathBuf]) -> RetentionReport {
        self.clean_at(roots, SystemTime::now())
    }

    /// Clean every root against an explicit `now`.
    ///
    /// Missing roots are skipped silently. A failure on one entry is logged
    /// and the pass continues with the next.
    pub fn clean_at(&self, roots: &[PathBuf], now: SystemTime) -> RetentionReport {
        let cutoff = now.checked_sub(self.max_age).unwrap_or(SystemTime::UNIX_EPOCH);
        let mut report = RetentionReport::default();

        for root in roots {
            let entries = match fs::read_dir(root) {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    error!("Cannot list backup root {}: {}", root.display(), e);
                    report.failed.push(root.clone());
                    continue;
                }
            };

            for entry in entries {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        error!("Cannot read entry in {}: {}", root.display(), e);
                        continue;
                    }
                };
                let path = entry.path();

                match remove_if_expired(&path, cutoff) {
                    Ok(true) => {
                        info!("Deleted old backup: {}", path.display());
                        report.deleted.push(path);
                    }
                    Ok(false) => {}
                    Err(e) => {
                        error!("Cannot delete old backup {}: {}", path.display(), e);
                        report.failed.push(path);
                    }
                }
            }
        }

        report
    }
}

fn remove_if_expired(path: &Path, cutoff: SystemTime) -> std::io::Result<bool> {
    // symlink_metadata: a link to a directory is not a snapshot of ours
    let metadata = fs::symlink_metadata(path)?;
    if !metadata.is_dir() || metadata.modified()? >= cutoff {
        return Ok(false);
    }
    fs::remove_dir_all(path)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::FileTime;
    use tempfile::TempDir;

    fn set_mtime(path: &Path, time: SystemTime) -> std::io::Result<()> {
        filetime::set_file_mtime(path, FileTime::from_system_time(time))
    }

    #[test]
    fn test_deletes_exactly_the_older_side_of_cutoff() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path().to_path_buf();
        let now = SystemTime::UNIX_EPOCH + Duration::from_secs(1_750_000_000);
        let cleaner = RetentionCleaner::from_days(7);
        let cutoff = now - Duration::from_secs(7 * SECS_PER_DAY);

        let older = root.join("Y_2025-06-01_01-00-00");
        let newer = root.join("Y_2025-06-02_01-00-00");
        fs::create_dir(&older)?;
        fs::create_dir(&newer)?;
        fs::write(older.join("f.txt"), b"x")?;
        set_mtime(&older, cutoff - Duration::from_secs(1))?;
        set_mtime(&newer, cutoff + Duration::from_secs(1))?;

        let report = cleaner.clean_at(&[root], now);

        assert_eq!(report.deleted, vec![older.clone()]);
        assert!(!older.exists());
        assert!(newer.exists());
        Ok(())
    }

    #[test]
    fn test_files_and_missing_roots_are_ignored() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let log = temp_dir.path().join("backup_log.txt");
        fs::write(&log, b"log")?;
        set_mtime(&log, SystemTime::UNIX_EPOCH + Duration::from_secs(10))?;

        let report = RetentionCleaner::from_days(1).clean(&[
            temp_dir.path().to_path_buf(),
            temp_dir.path().join("not-mounted"),
        ]);

        assert!(report.deleted.is_empty());
        assert!(report.failed.is_empty());
        assert!(log.exists());
        Ok(())
    }

    #[test]
    fn test_second_pass_deletes_nothing() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let old = temp_dir.path().join("old");
        fs::create_dir(&old)?;
        set_mtime(&old, SystemTime::UNIX_EPOCH + Duration::from_secs(10))?;
        let cleaner = RetentionCleaner::from_days(7);
        let roots = vec![temp_dir.path().to_path_buf()];

        assert_eq!(cleaner.clean(&roots).deleted.len(), 1);
        assert_eq!(cleaner.clean(&roots), RetentionReport::default());
        Ok(())
    }

    #[test]
    fn test_cleans_every_root() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let roots = vec![temp_dir.path().join("b1"), temp_dir.path().join("b2")];
        for root in &roots {
            let old = root.join("D_2020-01-01_00-00-00");
            fs::create_dir_all(&old)?;
            set_mtime(&old, SystemTime::UNIX_EPOCH + Duration::from_secs(10))?;
        }

        let report = RetentionCleaner::from_days(7).clean(&roots);

        assert_eq!(report.deleted.len(), 2);
        Ok(())
    }

    #[test]
    fn test_unlistable_root_does_not_stop_later_roots() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let not_a_root = temp_dir.path().join("b1");
        fs::write(&not_a_root, b"a file where a backup root should be")?;
        let root = temp_dir.path().join("b2");
        let old = root.join("D_2020-01-01_00-00-00");
        fs::create_dir_all(&old)?;
        set_mtime(&old, SystemTime::UNIX_EPOCH + Duration::from_secs(10))?;

        let report = RetentionCleaner::from_days(7).clean(&[not_a_root.clone(), root]);

        assert_eq!(report.failed, vec![not_a_root]);
        assert_eq!(report.deleted, vec![old.clone()]);
        assert!(!old.exists());
        Ok(())
    }

    #[test]
    #[cfg(unix)]
    fn test_failed_deletion_does_not_stop_siblings() -> std::io::Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new()?;
        let root = temp_dir.path().to_path_buf();
        let locked = root.join("D_2020-01-01_00-00-00");
        let inner = locked.join("inner");
        let sibling = root.join("D_2020-01-02_00-00-00");
        fs::create_dir_all(&inner)?;
        fs::create_dir_all(&sibling)?;
        fs::write(inner.join("f.txt"), b"x")?;
        fs::set_permissions(&inner, fs::Permissions::from_mode(0o500))?;

        // Privileged users ignore directory permissions; nothing to provoke then
        let canary = inner.join("canary");
        if fs::write(&canary, b"").is_ok() {
            fs::remove_file(&canary)?;
            fs::set_permissions(&inner, fs::Permissions::from_mode(0o700))?;
            return Ok(());
        }

        let expired = SystemTime::UNIX_EPOCH + Duration::from_secs(10);
        set_mtime(&locked, expired)?;
        set_mtime(&sibling, expired)?;

        let report = RetentionCleaner::from_days(7).clean(&[root]);

        fs::set_permissions(&inner, fs::Permissions::from_mode(0o700))?;
        assert_eq!(report.failed, vec![locked.clone()]);
        assert_eq!(report.deleted, vec![sibling.clone()]);
        assert!(locked.exists());
        assert!(!sibling.exists());
        Ok(())
    }
}
