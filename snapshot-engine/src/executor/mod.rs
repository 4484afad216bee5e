//! Backup orchestrator - fans a run out over drives and destinations.
//!
//! One `backup_all` call:
//! - prunes expired snapshots from every destination root (once per run)
//! - backs up the configured drives concurrently, at most
//!   `max_parallel_drives` at a time
//! - for each drive, mirrors into every destination root concurrently, all
//!   snapshots of that drive sharing one timestamp
//!
//! Copy I/O from every unit goes through the single [`CopyPool`] owned here.
//! A failure is confined to its unit (or drive) and never aborts siblings.

pub mod report;
pub mod snapshot;

use crate::config::Config;
use crate::fs::{CopyPool, MirrorOptions, TreeMirror};
use crate::notify::Notifier;
use crate::retention::{RetentionCleaner, RetentionReport};
use crate::utils::errors::{EngineError, Result};
use chrono::Local;
use report::{BackupReport, DriveFailure, UnitOutcome, UnitReport, UnitState};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

/// Runs backups for a fixed configuration
#[derive(Clone)]
pub struct BackupOrchestrator {
    config: Arc<Config>,
    pool: CopyPool,
    mirror: TreeMirror,
    notifier: Arc<dyn Notifier>,
}

impl BackupOrchestrator {
    /// Create an orchestrator with a copy pool sized from `backup.max_threads`
    pub fn new(config: Arc<Config>, notifier: Arc<dyn Notifier>) -> Self {
        let pool = CopyPool::new(config.backup.max_threads);
        Self::with_pool(config, pool, notifier)
    }

    /// Create an orchestrator around an existing pool
    pub fn with_pool(config: Arc<Config>, pool: CopyPool, notifier: Arc<dyn Notifier>) -> Self {
        let mirror = TreeMirror::new(pool.clone(), MirrorOptions::from(&config.backup));
        Self {
            config,
            pool,
            mirror,
            notifier,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn pool(&self) -> &CopyPool {
        &self.pool
    }

    /// Back up every configured drive to every destination root
    pub async fn backup_all(&self) -> BackupReport {
        let started_at = Local::now();
        let start_time = Instant::now();
        let drives = self.config.backup.mapped_drives.clone();

        info!(
            "Starting full backup: {} drive(s) → {} destination(s)",
            drives.len(),
            self.config.backup.destination_bases.len()
        );

        let retention = self.clean_destinations().await;

        let parallel = self.config.backup.max_parallel_drives.min(drives.len()).max(1);
        let drive_slots = Arc::new(Semaphore::new(parallel));

        let mut handles = Vec::with_capacity(drives.len());
        for drive in drives {
            let this = self.clone();
            let slots = Arc::clone(&drive_slots);
            let task_drive = drive.clone();
            let handle = tokio::spawn(async move {
                let _permit = slots.acquire_owned().await.ok();
                this.backup_drive(&task_drive).await
            });
            handles.push((drive, handle));
        }

        let mut units = Vec::new();
        let mut drive_failures = Vec::new();
        for (drive, handle) in handles {
            match handle.await {
                Ok(drive_units) => units.extend(drive_units),
                Err(e) => {
                    error!("Backup of drive {} crashed: {}", drive.display(), e);
                    drive_failures.push(DriveFailure {
                        drive,
                        error: e.to_string(),
                    });
                }
            }
        }

        let report = BackupReport {
            started_at,
            elapsed: start_time.elapsed(),
            retention,
            units,
            drive_failures,
        };

        info!(
            "Full backup finished: {} succeeded, {} failed, {} drive crash(es), {} file(s) copied in {:.1?}",
            report.succeeded(),
            report.failed(),
            report.drive_failures.len(),
            report.files_copied(),
            report.elapsed
        );
        debug!("Copy pool totals: {}", self.pool.stats());

        report
    }

    /// Back up one drive to every destination root.
    ///
    /// Retention is not run here; [`backup_all`](Self::backup_all) prunes once
    /// before fanning out.
    pub async fn backup_drive(&self, source: &Path) -> Vec<UnitReport> {
        let timestamp = snapshot::format_timestamp(&Local::now());
        let destinations = self.config.backup.destination_bases.clone();

        let mut handles = Vec::with_capacity(destinations.len());
        for destination in destinations {
            let this = self.clone();
            let source = source.to_path_buf();
            let timestamp = timestamp.clone();
            let task_destination = destination.clone();
            let handle = tokio::spawn(async move {
                this.backup_to_destination(&source, &task_destination, &timestamp)
                    .await
            });
            handles.push((destination, handle));
        }

        let mut units = Vec::with_capacity(handles.len());
        for (destination, handle) in handles {
            let unit = match handle.await {
                Ok(unit) => unit,
                Err(e) => {
                    error!(
                        "Backup of {} to {} crashed: {}",
                        source.display(),
                        destination.display(),
                        e
                    );
                    UnitReport {
                        drive: source.to_path_buf(),
                        snapshot: snapshot::snapshot_path(&destination, source, &timestamp),
                        destination,
                        outcome: UnitOutcome::MirrorError(e.to_string()),
                    }
                }
            };
            units.push(unit);
        }
        units
    }

    /// Mirror one drive into a fresh snapshot under one destination root
    pub async fn backup_to_destination(
        &self,
        source: &Path,
        destination: &Path,
        timestamp: &str,
    ) -> UnitReport {
        let snapshot_dir = snapshot::snapshot_path(destination, source, timestamp);
        let start_time = Instant::now();
        let mut state = UnitState::Pending;
        info!("Starting backup {} → {}", source.display(), snapshot_dir.display());

        transition(&mut state, UnitState::SourceCheck, &snapshot_dir);

        let outcome = if let Err(e) = check_source(source).await {
            transition(&mut state, UnitState::Unreachable, &snapshot_dir);
            let message = e.to_string();
            error!("{}", message);
            self.notifier.notify("Backup Error", &message);
            UnitOutcome::Unreachable
        } else {
            transition(&mut state, UnitState::Mirroring, &snapshot_dir);
            let result = match snapshot::create_snapshot_dir(&snapshot_dir).await {
                Ok(()) => self.mirror.mirror(source, &snapshot_dir).await,
                Err(e) => Err(e),
            };

            match result {
                Ok(summary) => {
                    transition(&mut state, UnitState::Completed, &snapshot_dir);
                    let elapsed = start_time.elapsed();
                    let message = format!(
                        "Backup of {} to {} completed at {} ({} copied, {} unchanged, {:.1?})",
                        source.display(),
                        snapshot_dir.display(),
                        Local::now().format("%Y-%m-%d %H:%M:%S"),
                        summary.files_copied,
                        summary.files_unchanged,
                        elapsed
                    );
                    info!("{}", message);
                    if summary.files_failed > 0 || summary.directory_errors > 0 {
                        warn!(
                            "{} file(s) and {} director(ies) could not be copied from {}",
                            summary.files_failed,
                            summary.directory_errors,
                            source.display()
                        );
                    }
                    self.notifier.notify("Backup Completed", &message);
                    UnitOutcome::Completed { elapsed, summary }
                }
                Err(e) => {
                    transition(&mut state, UnitState::MirrorError, &snapshot_dir);
                    let message = format!(
                        "Backup of {} to {} failed: {}",
                        source.display(),
                        snapshot_dir.display(),
                        e
                    );
                    error!("{}", message);
                    self.notifier.notify("Backup Error", &message);
                    UnitOutcome::MirrorError(e.to_string())
                }
            }
        };

        debug_assert!(state.is_terminal());
        UnitReport {
            drive: source.to_path_buf(),
            destination: destination.to_path_buf(),
            snapshot: snapshot_dir,
            outcome,
        }
    }

    async fn clean_destinations(&self) -> RetentionReport {
        let cleaner = RetentionCleaner::from_days(self.config.backup.max_backup_age_days);
        let roots: Vec<PathBuf> = self.config.backup.destination_bases.clone();

        tokio::task::spawn_blocking(move || cleaner.clean(&roots))
            .await
            .unwrap_or_else(|e| {
                error!("Retention cleanup crashed: {}", e);
                RetentionReport::default()
            })
    }
}

/// A drive counts as reachable when its root path exists
async fn check_source(source: &Path) -> Result<()> {
    match tokio::fs::try_exists(source).await {
        Ok(true) => Ok(()),
        _ => Err(EngineError::SourceUnreachable(source.to_path_buf())),
    }
}

fn transition(state: &mut UnitState, next: UnitState, snapshot: &Path) {
    debug!(snapshot = %snapshot.display(), from = ?state, to = ?next, "Unit state change");
    *state = next;
}
