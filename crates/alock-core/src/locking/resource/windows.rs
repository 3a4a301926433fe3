//! Windows lock files: `LockFileEx` on a file removed best effort after unlock.

use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::Path;

pub(super) fn open_lock_file(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(path)
}

/// A file pending deletion refuses new handles with an access error until the
/// last handle on it closes.
pub(super) fn is_transient_open_error(error: &io::Error) -> bool {
    error.kind() == io::ErrorKind::PermissionDenied
}

/// While any handle on a deleted file stays open its name stays reserved,
/// so a lock taken through an old handle is never on an orphaned file.
pub(super) fn still_linked(_file: &File, _path: &Path) -> io::Result<bool> {
    Ok(true)
}

/// Unlock and close, then try to remove the file. Removal fails harmlessly
/// when another process has it open.
pub(super) fn release_locked(file: File, path: &Path) -> io::Result<()> {
    let unlocked = FileExt::unlock(&file);
    drop(file);
    match fs::remove_file(path) {
        Err(e)
            if !matches!(
                e.kind(),
                io::ErrorKind::PermissionDenied | io::ErrorKind::NotFound
            ) =>
        {
            unlocked.and(Err(e))
        }
        _ => unlocked,
    }
}
