//! Single-file copy with content comparison and metadata preservation.
//!
//! A file is copied only when its destination counterpart is missing or its
//! bytes differ. Modification time and permission bits are carried over so
//! that later runs compare against a faithful copy.

use filetime::FileTime;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::Path;
use tracing::{debug, error, info};

const COMPARE_CHUNK: usize = 64 * 1024;

/// Result of a single copy task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyOutcome {
    /// Destination was missing or different and has been rewritten
    Copied { bytes: u64 },
    /// Destination already held identical content
    Unchanged,
    /// File was filtered out before any I/O
    Excluded,
    /// An I/O error occurred; already logged
    Failed,
}

/// Copy `source` to `destination` unless the destination is already identical.
///
/// Never returns an error: failures are logged with both paths and reported
/// as [`CopyOutcome::Failed`] so sibling copies carry on.
pub fn copy_file_task(source: &Path, destination: &Path) -> CopyOutcome {
    match copy_if_changed(source, destination) {
        Ok(CopyOutcome::Copied { bytes }) => {
            info!("Copied: {} → {} ({} bytes)", source.display(), destination.display(), bytes);
            CopyOutcome::Copied { bytes }
        }
        Ok(outcome) => {
            debug!("Unchanged: {}", source.display());
            outcome
        }
        Err(e) => {
            error!(
                "Copy failed {} → {}: {}",
                source.display(),
                destination.display(),
                e
            );
            CopyOutcome::Failed
        }
    }
}

/// Fallible core of [`copy_file_task`]
pub fn copy_if_changed(source: &Path, destination: &Path) -> io::Result<CopyOutcome> {
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)?;
    }

    let needs_copy = match fs::symlink_metadata(destination) {
        Ok(_) => !files_identical(source, destination)?,
        Err(e) if e.kind() == io::ErrorKind::NotFound => true,
        Err(e) => return Err(e),
    };

    if !needs_copy {
        return Ok(CopyOutcome::Unchanged);
    }

    let bytes = copy_with_metadata(source, destination)?;
    Ok(CopyOutcome::Copied { bytes })
}

/// Byte-for-byte comparison. Sizes are checked first; equal sizes are
/// compared chunk by chunk until the first difference.
pub fn files_identical(a: &Path, b: &Path) -> io::Result<bool> {
    let meta_a = fs::metadata(a)?;
    let meta_b = fs::metadata(b)?;
    if !meta_b.is_file() || meta_a.len() != meta_b.len() {
        return Ok(false);
    }

    let mut file_a = File::open(a)?;
    let mut file_b = File::open(b)?;
    let mut buf_a = vec![0u8; COMPARE_CHUNK];
    let mut buf_b = vec![0u8; COMPARE_CHUNK];

    loop {
        let n = read_full(&mut file_a, &mut buf_a)?;
        let m = read_full(&mut file_b, &mut buf_b)?;
        if n != m || buf_a[..n] != buf_b[..m] {
            return Ok(false);
        }
        if n == 0 {
            return Ok(true);
        }
    }
}

/// Fill `buf` as far as the reader allows; returns bytes read (0 at EOF)
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Copy file contents and permission bits, then restore access and
/// modification times from the source.
pub fn copy_with_metadata(source: &Path, destination: &Path) -> io::Result<u64> {
    let source_meta = fs::metadata(source)?;

    // A previous copy may carry read-only bits from its source.
    if let Ok(existing) = fs::metadata(destination) {
        let mut perms = existing.permissions();
        if perms.readonly() {
            #[allow(clippy::permissions_set_readonly_false)]
            perms.set_readonly(false);
            fs::set_permissions(destination, perms)?;
        }
    }

    let bytes = fs::copy(source, destination)?;
    fs::set_permissions(destination, source_meta.permissions())?;

    let atime = FileTime::from_last_access_time(&source_meta);
    let mtime = FileTime::from_last_modification_time(&source_meta);
    filetime::set_file_times(destination, atime, mtime)?;

    Ok(bytes)
}
