//! Exclusive advisory lock on the allocation store
//!
//! The lock lives on a sidecar `<store>.lock` file rather than the store
//! itself, because saves replace the store file by rename.
//!
//! Locking uses `flock(2)` and is only available on unix. Elsewhere
//! [`StoreLock::acquire`] fails with [`std::io::ErrorKind::Unsupported`].

use gpuhub_core::GpuhubResult;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::trace;

/// Held for the duration of a read-modify-write cycle; released on drop
#[derive(Debug)]
pub struct StoreLock {
    file: File,
    path: PathBuf,
}

impl StoreLock {
    /// Block until the exclusive lock on `path` is acquired
    pub fn acquire(path: &Path) -> GpuhubResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        lock_exclusive(&file)?;
        trace!(path = %path.display(), "Acquired store lock");

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Path of the lock file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        unlock(&self.file);
        trace!(path = %self.path.display(), "Released store lock");
    }
}

#[cfg(unix)]
fn lock_exclusive(file: &File) -> std::io::Result<()> {
    use std::os::unix::io::AsRawFd;

    let fd = file.as_raw_fd();
    loop {
        let result = unsafe { libc::flock(fd, libc::LOCK_EX) };
        if result == 0 {
            return Ok(());
        }
        let err = std::io::Error::last_os_error();
        if err.kind() != std::io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

#[cfg(unix)]
fn unlock(file: &File) {
    use std::os::unix::io::AsRawFd;

    unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_UN) };
}

#[cfg(not(unix))]
fn lock_exclusive(_file: &File) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "store locking requires flock(2), which this platform lacks",
    ))
}

#[cfg(not(unix))]
fn unlock(_file: &File) {}


#[cfg(all(test, not(unix)))]
mod unsupported_tests {
    use super::*;

    #[test]
    fn test_acquire_fails_without_flock() {
        let dir = tempfile::tempdir().unwrap();
        let err = StoreLock::acquire(&dir.path().join("store.json.lock")).unwrap_err();
        assert!(matches!(
            err,
            gpuhub_core::GpuhubError::Io(ref e) if e.kind() == std::io::ErrorKind::Unsupported
        ));
    }
}
