use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

/// Normalize a store path: empty/missing input falls back to `"simplekv"`,
/// relative paths are resolved against the current directory.
#[must_use]
pub fn normalize_store_path(name_or_path: Option<&str>) -> PathBuf {
    let raw = match name_or_path {
        Some(s) if !s.trim().is_empty() => PathBuf::from(s),
        _ => PathBuf::from("simplekv"),
    };
    if raw.is_absolute() {
        raw
    } else {
        std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")).join(raw)
    }
}

/// Create a file with restrictive permissions where supported.
///
/// On Unix this maps to mode `0o600`. Elsewhere we just avoid requesting
/// world-writable flags and let the platform default apply.
///
/// # Errors
/// Returns an error if the file cannot be created/opened.
pub fn create_secure(path: &Path) -> io::Result<File> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        OpenOptions::new().read(true).write(true).create(true).truncate(false).mode(0o600).open(path)
    }
    #[cfg(not(unix))]
    {
        OpenOptions::new().read(true).write(true).create(true).truncate(false).open(path)
    }
}

/// Open a file for read/write without truncating existing contents.
///
/// # Errors
/// Returns an error if the file cannot be opened.
pub fn open_rw_no_trunc(path: &Path) -> io::Result<File> {
    OpenOptions::new().read(true).write(true).create(true).truncate(false).open(path)
}

/// Copy `src` onto `dst`, overwriting `dst` entirely. Used by the snapshot
/// manager to take and restore whole-file checkpoints.
///
/// # Errors
/// Returns an error if either path cannot be accessed.
pub fn copy_whole(src: &Path, dst: &Path) -> io::Result<()> {
    std::fs::copy(src, dst)?;
    Ok(())
}
