//! Configuration management for the snapshot engine.
//!
//! Loads configuration from TOML file with environment variable overrides.
//! The validated value is immutable for the lifetime of a backup run.

use crate::executor::snapshot::drive_label;
use crate::utils::errors::{EngineError, Result};
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub backup: BackupConfig,

    #[serde(default)]
    pub log: LogConfig,

    #[serde(default)]
    pub schedule: ScheduleConfig,

    #[serde(default)]
    pub notify: NotifyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Source drives / directory trees to snapshot
    #[serde(default = "default_mapped_drives")]
    pub mapped_drives: Vec<PathBuf>,

    /// Base directories under which snapshots accumulate
    #[serde(default = "default_destination_bases")]
    pub destination_bases: Vec<PathBuf>,

    /// Deepest directory level that is still descended into (root = 0)
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    /// Snapshots older than this are pruned
    #[serde(default = "default_max_backup_age_days")]
    pub max_backup_age_days: u64,

    /// Upper bound on concurrent file copies, shared by every drive
    #[serde(default = "default_max_threads")]
    pub max_threads: usize,

    /// Upper bound on drives backed up at the same time
    #[serde(default = "default_max_parallel_drives")]
    pub max_parallel_drives: usize,

    /// File extensions that are never copied (e.g. "tmp", ".bak")
    #[serde(default)]
    pub exclude_extensions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Append-only log file
    #[serde(default = "default_log_file")]
    pub file: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Local wall-clock time of the daily run, "HH:MM"
    #[serde(default = "default_daily_at")]
    pub daily_at: String,

    /// Run one backup immediately at startup
    #[serde(default = "default_run_on_start")]
    pub run_on_start: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Program invoked as `<command> <title> <message>` (e.g. notify-send)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

// Default values
fn default_mapped_drives() -> Vec<PathBuf> {
    vec![PathBuf::from("/mnt/data")]
}

fn default_destination_bases() -> Vec<PathBuf> {
    vec![PathBuf::from("/var/backups/snapshots")]
}

fn default_max_depth() -> usize {
    50
}

fn default_max_backup_age_days() -> u64 {
    7
}

fn default_max_threads() -> usize {
    8
}

fn default_max_parallel_drives() -> usize {
    4
}

fn default_log_file() -> PathBuf {
    PathBuf::from("/var/log/snapshot-daemon/backup_log.txt")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_daily_at() -> String {
    "01:00".to_string()
}

fn default_run_on_start() -> bool {
    true
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            mapped_drives: default_mapped_drives(),
            destination_bases: default_destination_bases(),
            max_depth: default_max_depth(),
            max_backup_age_days: default_max_backup_age_days(),
            max_threads: default_max_threads(),
            max_parallel_drives: default_max_parallel_drives(),
            exclude_extensions: Vec::new(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            file: default_log_file(),
            level: default_log_level(),
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            daily_at: default_daily_at(),
            run_on_start: default_run_on_start(),
        }
    }
}

impl ScheduleConfig {
    /// Parse `daily_at` into a wall-clock time
    pub fn daily_time(&self) -> Result<NaiveTime> {
        NaiveTime::parse_from_str(self.daily_at.trim(), "%H:%M").map_err(|e| {
            EngineError::Config(format!("invalid schedule.daily_at '{}': {}", self.daily_at, e))
        })
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Serialize back to TOML (used by `init-config` / `show-config`)
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Apply `SNAPSHOT_*` / `LOG_LEVEL` overrides from the process environment
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary key lookup.
    ///
    /// List values are comma-separated; blank items are dropped. Numeric
    /// values that fail to parse are ignored with a warning.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("SNAPSHOT_MAPPED_DRIVES") {
            self.backup.mapped_drives = split_path_list(&v);
        }
        if let Some(v) = lookup("SNAPSHOT_DESTINATION_BASES") {
            self.backup.destination_bases = split_path_list(&v);
        }
        if let Some(v) = lookup("SNAPSHOT_LOG_FILE") {
            self.log.file = PathBuf::from(v.trim());
        }
        if let Some(v) = lookup("LOG_LEVEL") {
            self.log.level = v.trim().to_string();
        }
        if let Some(v) = lookup("SNAPSHOT_DAILY_AT") {
            self.schedule.daily_at = v.trim().to_string();
        }
        override_number(&lookup, "SNAPSHOT_MAX_DEPTH", &mut self.backup.max_depth);
        override_number(
            &lookup,
            "SNAPSHOT_MAX_BACKUP_AGE_DAYS",
            &mut self.backup.max_backup_age_days,
        );
        override_number(&lookup, "SNAPSHOT_MAX_THREADS", &mut self.backup.max_threads);
    }

    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.backup.mapped_drives.is_empty() {
            return Err(EngineError::Config("backup.mapped_drives is empty".into()));
        }
        if self.backup.destination_bases.is_empty() {
            return Err(EngineError::Config("backup.destination_bases is empty".into()));
        }
        if self.backup.max_threads == 0 {
            return Err(EngineError::Config("backup.max_threads must be at least 1".into()));
        }
        if self.backup.max_parallel_drives == 0 {
            return Err(EngineError::Config(
                "backup.max_parallel_drives must be at least 1".into(),
            ));
        }
        self.check_drive_labels()?;
        self.schedule.daily_time()?;
        Ok(())
    }

    /// Snapshots of one run share a timestamp, so two drives mapping to the
    /// same label would claim the same snapshot directory.
    fn check_drive_labels(&self) -> Result<()> {
        let mut seen: HashMap<String, &Path> = HashMap::new();
        for drive in &self.backup.mapped_drives {
            let label = drive_label(drive);
            if let Some(other) = seen.insert(label.clone(), drive.as_path()) {
                return Err(EngineError::Config(format!(
                    "drives {} and {} both map to snapshot label '{}'",
                    other.display(),
                    drive.display(),
                    label
                )));
            }
        }
        Ok(())
    }
}

fn split_path_list(value: &str) -> Vec<PathBuf> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .collect()
}

fn override_number<F, T>(lookup: &F, key: &str, target: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    if let Some(v) = lookup(key) {
        match v.trim().parse() {
            Ok(n) => *target = n,
            Err(_) => tracing::warn!(key, value = %v, "Ignoring non-numeric override"),
        }
    }
}
