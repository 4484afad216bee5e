//! Snapshot Engine Library
//!
//! Mirrors a set of source drives into timestamped snapshot directories under
//! one or more destination roots, and prunes snapshots past their retention
//! window.

pub mod config;
pub mod executor;
pub mod fs;
pub mod notify;
pub mod retention;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use executor::report::{BackupReport, UnitOutcome, UnitReport, UnitState};
pub use executor::BackupOrchestrator;
pub use notify::{LogNotifier, Notifier};
pub use retention::{RetentionCleaner, RetentionReport};
pub use utils::errors::EngineError;
pub type Result<T> = std::result::Result<T, EngineError>;
