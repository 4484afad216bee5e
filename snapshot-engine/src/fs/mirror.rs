//! Recursive copy-if-different mirroring of one directory tree.
//!
//! The walk runs on a blocking thread with `walkdir`, which keeps its own
//! stack of open directories, so arbitrarily deep trees cannot exhaust the
//! call stack. Directories are visited depth-first in filesystem listing
//! order; every regular file found is sent to the async side and handed to
//! the shared [`CopyPool`], so copies run while the walk continues.

use super::copy::CopyOutcome;
use super::pool::CopyPool;
use crate::config::BackupConfig;
use crate::utils::errors::{EngineError, Result};
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

/// Outstanding copies per pool worker before the walk waits for some to finish
const IN_FLIGHT_PER_WORKER: usize = 64;

/// Options for tree mirroring
#[derive(Debug, Clone)]
pub struct MirrorOptions {
    /// Deepest directory level still descended into (root = 0)
    pub max_depth: usize,

    /// Extensions (case-insensitive) never copied
    pub exclude_extensions: Vec<String>,
}

impl Default for MirrorOptions {
    fn default() -> Self {
        Self {
            max_depth: 50,
            exclude_extensions: Vec::new(),
        }
    }
}

impl From<&BackupConfig> for MirrorOptions {
    fn from(config: &BackupConfig) -> Self {
        Self {
            max_depth: config.max_depth,
            exclude_extensions: config.exclude_extensions.clone(),
        }
    }
}

/// What one mirror run did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MirrorSummary {
    pub files_copied: usize,
    pub files_unchanged: usize,
    pub files_excluded: usize,
    pub files_failed: usize,
    pub bytes_copied: u64,
    /// Directories entered, the root included
    pub directories: usize,
    pub symlinks_skipped: usize,
    pub special_skipped: usize,
    pub directory_errors: usize,
    /// Source directories left out because they sit below `max_depth`
    pub depth_limited: Vec<PathBuf>,
}

impl MirrorSummary {
    fn tally(&mut self, outcome: CopyOutcome) {
        match outcome {
            CopyOutcome::Copied { bytes } => {
                self.files_copied += 1;
                self.bytes_copied += bytes;
            }
            CopyOutcome::Unchanged => self.files_unchanged += 1,
            CopyOutcome::Excluded => self.files_excluded += 1,
            CopyOutcome::Failed => self.files_failed += 1,
        }
    }

    fn absorb_copies(&mut self, copies: MirrorSummary) {
        self.files_copied += copies.files_copied;
        self.files_unchanged += copies.files_unchanged;
        self.files_failed += copies.files_failed;
        self.bytes_copied += copies.bytes_copied;
    }
}

/// A regular file found by the walk, ready for the pool
#[derive(Debug)]
struct CopyJob {
    source: PathBuf,
    destination: PathBuf,
}

#[derive(Debug)]
struct WalkRules {
    max_depth: usize,
    excluded: HashSet<String>,
}

/// Mirrors a source tree into a destination directory through a shared pool
#[derive(Debug, Clone)]
pub struct TreeMirror {
    pool: CopyPool,
    rules: Arc<WalkRules>,
}

impl TreeMirror {
    pub fn new(pool: CopyPool, options: MirrorOptions) -> Self {
        let excluded = options
            .exclude_extensions
            .iter()
            .map(|ext| ext.trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect();

        Self {
            pool,
            rules: Arc::new(WalkRules {
                max_depth: options.max_depth,
                excluded,
            }),
        }
    }

    /// Mirror `source` into `destination`.
    ///
    /// Returns only after every copy queued by this call has finished.
    /// Failures below the root (unreadable directories, failed copies) are
    /// logged and counted; `Err` is returned only when the root itself
    /// cannot be prepared or listed.
    pub async fn mirror(&self, source: &Path, destination: &Path) -> Result<MirrorSummary> {
        let in_flight_limit = self.pool.capacity() * IN_FLIGHT_PER_WORKER;
        let (jobs_tx, mut jobs_rx) = mpsc::channel::<CopyJob>(in_flight_limit);

        let rules = Arc::clone(&self.rules);
        let source_root = source.to_path_buf();
        let destination_root = destination.to_path_buf();
        let span = tracing::Span::current();
        let walker = tokio::task::spawn_blocking(move || {
            let _enter = span.enter();
            rules.walk(&source_root, &destination_root, &jobs_tx)
        });

        let mut copies = MirrorSummary::default();
        let mut in_flight: VecDeque<JoinHandle<CopyOutcome>> = VecDeque::new();
        while let Some(job) = jobs_rx.recv().await {
            in_flight.push_back(self.pool.submit(job.source, job.destination));
            while in_flight.len() >= in_flight_limit {
                if let Some(handle) = in_flight.pop_front() {
                    copies.tally(join_copy(handle).await);
                }
            }
        }
        while let Some(handle) = in_flight.pop_front() {
            copies.tally(join_copy(handle).await);
        }

        let mut summary = walker.await??;
        summary.absorb_copies(copies);
        Ok(summary)
    }
}

impl WalkRules {
    /// Walk `source`, creating the directory skeleton under `destination`
    /// and sending every regular file to `jobs`. Copy counters are left at
    /// zero; the receiving side fills them in.
    fn walk(
        &self,
        source: &Path,
        destination: &Path,
        jobs: &mpsc::Sender<CopyJob>,
    ) -> Result<MirrorSummary> {
        let mut summary = MirrorSummary::default();

        // One level past the limit is still yielded so cut-off directories
        // can be reported; walkdir does not descend into them.
        let mut entries = WalkDir::new(source)
            .follow_links(false)
            .max_depth(self.max_depth.saturating_add(1))
            .into_iter();

        while let Some(next) = entries.next() {
            let entry = match next {
                Ok(entry) => entry,
                Err(e) if e.depth() == 0 => {
                    error!("Cannot mirror {}: {}", source.display(), e);
                    return Err(EngineError::Directory {
                        path: source.to_path_buf(),
                        source: e.into(),
                    });
                }
                Err(e) => {
                    let path = e.path().unwrap_or(source);
                    error!("Directory error at {}: {}", path.display(), e);
                    summary.directory_errors += 1;
                    continue;
                }
            };

            if entry.depth() == 0 {
                if let Err(e) = prepare_root(entry.path(), destination) {
                    error!("Cannot mirror {}: {}", source.display(), e);
                    return Err(EngineError::Directory {
                        path: source.to_path_buf(),
                        source: e,
                    });
                }
                summary.directories += 1;
                continue;
            }

            let Ok(relative) = entry.path().strip_prefix(source) else {
                continue;
            };
            let target = destination.join(relative);
            let file_type = entry.file_type();

            if file_type.is_symlink() {
                info!("Skipping symlink: {}", entry.path().display());
                summary.symlinks_skipped += 1;
            } else if file_type.is_dir() {
                if entry.depth() > self.max_depth {
                    warn!(
                        "Depth limit {} exceeded at: {}",
                        self.max_depth,
                        entry.path().display()
                    );
                    summary.depth_limited.push(entry.into_path());
                } else if let Err(e) = std::fs::create_dir_all(&target) {
                    error!("Directory error at {}: {}", target.display(), e);
                    summary.directory_errors += 1;
                    entries.skip_current_dir();
                } else {
                    summary.directories += 1;
                }
            } else if file_type.is_file() {
                if self.is_excluded(entry.path()) {
                    debug!("Excluded by extension: {}", entry.path().display());
                    summary.tally(CopyOutcome::Excluded);
                    continue;
                }
                let job = CopyJob {
                    source: entry.into_path(),
                    destination: target,
                };
                if jobs.blocking_send(job).is_err() {
                    warn!("Mirror of {} cancelled", source.display());
                    break;
                }
            } else {
                info!("Skipping special file: {}", entry.path().display());
                summary.special_skipped += 1;
            }
        }

        Ok(summary)
    }

    fn is_excluded(&self, path: &Path) -> bool {
        if self.excluded.is_empty() {
            return false;
        }
        path.extension()
            .map(|ext| self.excluded.contains(&ext.to_string_lossy().to_ascii_lowercase()))
            .unwrap_or(false)
    }
}

/// The root may be a link to a directory (walkdir follows it); anything else
/// that is not a directory cannot be mirrored.
fn prepare_root(source: &Path, destination: &Path) -> std::io::Result<()> {
    if !std::fs::metadata(source)?.is_dir() {
        return Err(std::io::Error::other(format!(
            "{} is not a directory",
            source.display()
        )));
    }
    std::fs::create_dir_all(destination)
}

async fn join_copy(handle: JoinHandle<CopyOutcome>) -> CopyOutcome {
    match handle.await {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!("Copy task aborted: {}", e);
            CopyOutcome::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;
    use tracing_test::traced_test;

    fn mirror_with(max_depth: usize, pool_size: usize) -> TreeMirror {
        TreeMirror::new(
            CopyPool::new(pool_size),
            MirrorOptions {
                max_depth,
                exclude_extensions: Vec::new(),
            },
        )
    }

    fn build_tree(root: &Path) -> std::io::Result<()> {
        fs::create_dir_all(root.join("docs/reports"))?;
        fs::create_dir_all(root.join("empty"))?;
        fs::write(root.join("top.txt"), b"top")?;
        fs::write(root.join("docs/a.txt"), b"alpha")?;
        fs::write(root.join("docs/b.txt"), b"bravo")?;
        fs::write(root.join("docs/reports/q1.csv"), b"1,2,3")?;
        Ok(())
    }

    fn relative_files(root: &Path) -> Vec<String> {
        let mut files: Vec<String> = WalkDir::new(root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| {
                e.path()
                    .strip_prefix(root)
                    .unwrap()
                    .to_string_lossy()
                    .replace('\\', "/")
            })
            .collect();
        files.sort();
        files
    }

    #[tokio::test]
    async fn test_mirrors_full_structure() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let src = temp_dir.path().join("src");
        let dst = temp_dir.path().join("dst");
        build_tree(&src)?;

        let summary = mirror_with(50, 4).mirror(&src, &dst).await?;

        assert_eq!(summary.files_copied, 4);
        assert_eq!(summary.directories, 4);
        assert_eq!(relative_files(&src), relative_files(&dst));
        assert!(dst.join("empty").is_dir());
        assert_eq!(fs::read(dst.join("docs/reports/q1.csv"))?, b"1,2,3");
        Ok(())
    }

    #[tokio::test]
    async fn test_second_run_copies_nothing() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let src = temp_dir.path().join("src");
        let dst = temp_dir.path().join("dst");
        build_tree(&src)?;
        let mirror = mirror_with(50, 2);

        let first = mirror.mirror(&src, &dst).await?;
        let second = mirror.mirror(&src, &dst).await?;

        assert_eq!(first.files_copied, 4);
        assert_eq!(second.files_copied, 0);
        assert_eq!(second.files_unchanged, 4);
        Ok(())
    }

    #[tokio::test]
    async fn test_only_changed_file_is_recopied() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let src = temp_dir.path().join("src");
        let dst = temp_dir.path().join("dst");
        build_tree(&src)?;
        let mirror = mirror_with(50, 2);
        mirror.mirror(&src, &dst).await?;

        fs::write(src.join("docs/a.txt"), b"alphA")?;
        let summary = mirror.mirror(&src, &dst).await?;

        assert_eq!(summary.files_copied, 1);
        assert_eq!(summary.files_unchanged, 3);
        assert_eq!(fs::read(dst.join("docs/a.txt"))?, b"alphA");
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn test_depth_limit_excludes_deepest_subtree() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let src = temp_dir.path().join("src");
        let dst = temp_dir.path().join("dst");
        // depth: src=0, l1=1, l2=2, l3=3
        fs::create_dir_all(src.join("l1/l2/l3"))?;
        fs::create_dir_all(src.join("side"))?;
        fs::write(src.join("l1/l2/at-limit.txt"), b"kept")?;
        fs::write(src.join("l1/l2/l3/too-deep.txt"), b"dropped")?;
        fs::write(src.join("side/sibling.txt"), b"kept")?;

        let summary = mirror_with(2, 2).mirror(&src, &dst).await?;

        assert_eq!(summary.depth_limited, vec![src.join("l1/l2/l3")]);
        assert!(dst.join("l1/l2/at-limit.txt").exists());
        assert!(dst.join("side/sibling.txt").exists());
        assert!(!dst.join("l1/l2/l3").exists());
        assert!(logs_contain("Depth limit 2 exceeded"));
        assert!(logs_contain("l3"));
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    #[cfg(unix)]
    async fn test_symlinks_are_not_followed() -> Result<()> {
        use std::os::unix::fs::symlink;

        let temp_dir = TempDir::new()?;
        let src = temp_dir.path().join("src");
        let outside = temp_dir.path().join("outside");
        let dst = temp_dir.path().join("dst");
        fs::create_dir_all(src.join("sub"))?;
        fs::create_dir_all(&outside)?;
        fs::write(src.join("real.txt"), b"real")?;
        fs::write(outside.join("secret.txt"), b"secret")?;
        symlink(src.join("real.txt"), src.join("file-link"))?;
        symlink(&outside, src.join("sub/dir-link"))?;
        // A cycle back to the root
        symlink(&src, src.join("sub/loop"))?;

        let summary = mirror_with(50, 2).mirror(&src, &dst).await?;

        assert_eq!(summary.symlinks_skipped, 3);
        assert_eq!(summary.files_copied, 1);
        assert!(!dst.join("file-link").exists());
        assert!(!dst.join("sub/dir-link").exists());
        assert!(!dst.join("sub/loop").exists());
        assert!(logs_contain("Skipping symlink"));
        Ok(())
    }

    #[tokio::test]
    async fn test_subtree_error_does_not_stop_siblings() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let src = temp_dir.path().join("src");
        let dst = temp_dir.path().join("dst");
        fs::create_dir_all(src.join("blocked"))?;
        fs::create_dir_all(src.join("fine"))?;
        fs::write(src.join("blocked/x.txt"), b"x")?;
        fs::write(src.join("fine/y.txt"), b"y")?;
        // A plain file where the "blocked" directory must be created
        fs::create_dir_all(&dst)?;
        fs::write(dst.join("blocked"), b"in the way")?;

        let summary = mirror_with(50, 2).mirror(&src, &dst).await?;

        assert_eq!(summary.directory_errors, 1);
        assert_eq!(fs::read(dst.join("fine/y.txt"))?, b"y");
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_root_is_an_error() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let result = mirror_with(50, 2)
            .mirror(&temp_dir.path().join("nope"), &temp_dir.path().join("dst"))
            .await;

        assert!(matches!(result, Err(EngineError::Directory { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_file_as_root_is_an_error() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let src = temp_dir.path().join("plain.txt");
        fs::write(&src, b"not a tree")?;

        let result = mirror_with(50, 2)
            .mirror(&src, &temp_dir.path().join("dst"))
            .await;

        assert!(matches!(result, Err(EngineError::Directory { path, .. }) if path == src));
        Ok(())
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_linked_root_is_followed() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let real = temp_dir.path().join("real");
        let link = temp_dir.path().join("link");
        let dst = temp_dir.path().join("dst");
        build_tree(&real)?;
        std::os::unix::fs::symlink(&real, &link)?;

        let summary = mirror_with(50, 2).mirror(&link, &dst).await?;

        assert_eq!(summary.files_copied, 4);
        assert_eq!(relative_files(&real), relative_files(&dst));
        Ok(())
    }

    #[tokio::test]
    async fn test_depth_zero_copies_only_root_files() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let src = temp_dir.path().join("src");
        let dst = temp_dir.path().join("dst");
        build_tree(&src)?;

        let summary = mirror_with(0, 2).mirror(&src, &dst).await?;

        assert_eq!(summary.files_copied, 1);
        assert_eq!(summary.depth_limited.len(), 2);
        assert_eq!(relative_files(&dst), vec!["top.txt".to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn test_excluded_extensions_are_skipped() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let src = temp_dir.path().join("src");
        let dst = temp_dir.path().join("dst");
        fs::create_dir_all(&src)?;
        fs::write(src.join("keep.txt"), b"k")?;
        fs::write(src.join("scratch.TMP"), b"t")?;
        fs::write(src.join("old.bak"), b"b")?;

        let mirror = TreeMirror::new(
            CopyPool::new(2),
            MirrorOptions {
                max_depth: 50,
                exclude_extensions: vec![".tmp".into(), "bak".into()],
            },
        );
        let summary = mirror.mirror(&src, &dst).await?;

        assert_eq!(summary.files_copied, 1);
        assert_eq!(summary.files_excluded, 2);
        assert_eq!(relative_files(&dst), vec!["keep.txt".to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn test_many_files_with_single_worker() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let src = temp_dir.path().join("src");
        let dst = temp_dir.path().join("dst");
        fs::create_dir_all(&src)?;
        for i in 0..200 {
            fs::write(src.join(format!("f{i:03}.dat")), format!("payload {i}"))?;
        }

        let pool = CopyPool::new(1);
        let summary = TreeMirror::new(pool.clone(), MirrorOptions::default())
            .mirror(&src, &dst)
            .await?;

        assert_eq!(summary.files_copied, 200);
        assert_eq!(pool.stats().peak_active(), 1);
        Ok(())
    }
}
