//! Unix lock files: `flock(2)` on a file that the holder unlinks on release.

use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

pub(super) fn open_lock_file(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(path)
}

/// Nothing makes an open transiently fail on Unix.
pub(super) fn is_transient_open_error(_error: &io::Error) -> bool {
    false
}

/// Whether `path` still names the inode behind `file`
pub(super) fn still_linked(file: &File, path: &Path) -> io::Result<bool> {
    let held = file.metadata()?;
    match fs::metadata(path) {
        Ok(current) => Ok(held.dev() == current.dev() && held.ino() == current.ino()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Unlink while still holding the lock, then unlock and close.
///
/// Contenders that opened the old inode notice the unlink through
/// [`still_linked`] and reopen the path.
pub(super) fn release_locked(file: File, path: &Path) -> io::Result<()> {
    let removed = match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    };
    let unlocked = FileExt::unlock(&file);
    drop(file);
    removed.and(unlocked)
}
