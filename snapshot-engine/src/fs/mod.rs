//! File system side of a backup: per-file copies, the shared copy pool and
//! the tree mirror that drives them.

pub mod copy;
pub mod mirror;
pub mod pool;

pub use copy::CopyOutcome;
pub use mirror::{MirrorOptions, MirrorSummary, TreeMirror};
pub use pool::CopyPool;
