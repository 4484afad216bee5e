//! Fire-and-forget user notifications.
//!
//! The engine calls [`Notifier::notify`] once per (drive, destination) unit
//! when it completes or finds its drive unreachable. Implementations must
//! return promptly; nothing waits on delivery.

use crate::config::NotifyConfig;
use std::process::{Command, Stdio};
use std::sync::Arc;
use tracing::{info, warn};

pub trait Notifier: Send + Sync {
    fn notify(&self, title: &str, message: &str);
}

/// Records notifications in the log only
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, title: &str, message: &str) {
        info!(target: "snapshot_engine::notify", title, "{}", message);
    }
}

/// Runs an external program (e.g. `notify-send`) with title and message
/// as its two trailing arguments
#[derive(Debug, Clone)]
pub struct CommandNotifier {
    program: String,
    args: Vec<String>,
}

impl CommandNotifier {
    /// Build from a command line such as `"notify-send -u critical"`
    pub fn new(command_line: &str) -> Option<Self> {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self {
            program,
            args: parts.collect(),
        })
    }
}

impl Notifier for CommandNotifier {
    fn notify(&self, title: &str, message: &str) {
        let spawned = Command::new(&self.program)
            .args(&self.args)
            .arg(title)
            .arg(message)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();

        match spawned {
            Ok(mut child) => {
                // Reap in the background so the caller never blocks
                std::thread::spawn(move || {
                    let _ = child.wait();
                });
            }
            Err(e) => warn!("Failed to run notifier '{}': {}", self.program, e),
        }
    }
}

/// Pick the notifier described by the configuration
pub fn from_config(config: &NotifyConfig) -> Arc<dyn Notifier> {
    match config.command.as_deref().and_then(CommandNotifier::new) {
        Some(notifier) => Arc::new(notifier),
        None => Arc::new(LogNotifier),
    }
}
