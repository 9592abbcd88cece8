//! Advisory file locking and atomic writes.
//!
//! Advisory locks guard the marketplace cache, the session log, and the
//! per-(workspace, branch) launch. Acquisition is bounded: past the timeout
//! the caller gets an error it can surface to the user instead of hanging.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use thiserror::Error;

/// Errors from lock acquisition and atomic writes.
#[derive(Debug, Error)]
pub enum FileLockError {
    #[error("timed out waiting for lock on {0} (held by another scc command?)")]
    Timeout(PathBuf),

    #[error("failed to lock {path}: {message}")]
    LockFailed { path: PathBuf, message: String },

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Result alias for locking operations.
pub type FileLockResult<T> = Result<T, FileLockError>;

/// Options controlling lock acquisition.
#[derive(Debug, Clone)]
pub struct LockOptions {
    /// Maximum time to wait for the lock.
    pub timeout: Duration,
    /// Interval between acquisition attempts.
    pub retry_interval: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            retry_interval: Duration::from_millis(50),
        }
    }
}

impl LockOptions {
    /// Options with a custom timeout.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Default::default()
        }
    }
}

/// An exclusive advisory lock, released on drop.
#[derive(Debug)]
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// Acquire an exclusive lock on `path`, creating the lock file if needed.
    ///
    /// Retries every `retry_interval` until `timeout` elapses.
    pub fn acquire(path: impl AsRef<Path>, options: &LockOptions) -> FileLockResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let start = Instant::now();
        loop {
            match try_lock_exclusive(&file) {
                Ok(true) => return Ok(Self { file, path }),
                Ok(false) => {
                    if start.elapsed() >= options.timeout {
                        return Err(FileLockError::Timeout(path));
                    }
                    std::thread::sleep(options.retry_interval);
                }
                Err(message) => return Err(FileLockError::LockFailed { path, message }),
            }
        }
    }

    /// Acquire without waiting. Returns `None` if the lock is held elsewhere.
    pub fn try_acquire(path: impl AsRef<Path>) -> FileLockResult<Option<Self>> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        match try_lock_exclusive(&file) {
            Ok(true) => Ok(Some(Self { file, path })),
            Ok(false) => Ok(None),
            Err(message) => Err(FileLockError::LockFailed { path, message }),
        }
    }

    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        // Advisory locks are released when the descriptor closes; unlock
        // explicitly for cross-platform consistency.
        let _ = unlock(&self.file);
    }
}

#[cfg(unix)]
fn try_lock_exclusive(file: &File) -> Result<bool, String> {
    use std::os::unix::io::AsRawFd;

    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if rc == 0 {
        return Ok(true);
    }
    let err = io::Error::last_os_error();
    if err.kind() == io::ErrorKind::WouldBlock {
        Ok(false)
    } else {
        Err(err.to_string())
    }
}

#[cfg(unix)]
fn unlock(file: &File) -> Result<(), String> {
    use std::os::unix::io::AsRawFd;

    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_UN) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error().to_string())
    }
}

#[cfg(windows)]
fn try_lock_exclusive(file: &File) -> Result<bool, String> {
    use std::os::windows::io::AsRawHandle;
    use windows_sys::Win32::Foundation::ERROR_LOCK_VIOLATION;
    use windows_sys::Win32::Storage::FileSystem::{
        LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY, LockFileEx,
    };
    use windows_sys::Win32::System::IO::OVERLAPPED;

    let mut overlapped: OVERLAPPED = unsafe { std::mem::zeroed() };
    let rc = unsafe {
        LockFileEx(
            file.as_raw_handle() as _,
            LOCKFILE_EXCLUSIVE_LOCK | LOCKFILE_FAIL_IMMEDIATELY,
            0,
            u32::MAX,
            u32::MAX,
            &mut overlapped,
        )
    };
    if rc != 0 {
        return Ok(true);
    }
    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(ERROR_LOCK_VIOLATION as i32) {
        Ok(false)
    } else {
        Err(err.to_string())
    }
}

#[cfg(windows)]
fn unlock(file: &File) -> Result<(), String> {
    use std::os::windows::io::AsRawHandle;
    use windows_sys::Win32::Storage::FileSystem::UnlockFile;

    let rc = unsafe { UnlockFile(file.as_raw_handle() as _, 0, 0, u32::MAX, u32::MAX) };
    if rc != 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error().to_string())
    }
}

/// Write `contents` to `path` atomically: write a temp sibling, sync, rename.
///
/// Readers never observe a partially written file.
pub fn atomic_write(path: impl AsRef<Path>, contents: &[u8]) -> io::Result<()> {
    let path = path.as_ref();
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;

    let mut tmp = tempfile_in(dir, path)?;
    tmp.file.write_all(contents)?;
    tmp.file.sync_all()?;
    fs::rename(&tmp.path, path)?;
    tmp.committed = true;
    Ok(())
}

/// Serialize `value` as pretty JSON and write it atomically.
pub fn atomic_write_json<T: serde::Serialize>(
    path: impl AsRef<Path>,
    value: &T,
) -> io::Result<()> {
    let mut body = serde_json::to_vec_pretty(value)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    body.push(b'\n');
    atomic_write(path, &body)
}

struct TempSibling {
    file: File,
    path: PathBuf,
    committed: bool,
}

impl Drop for TempSibling {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_file(&self.path);
        }
    }
}

fn tempfile_in(dir: &Path, target: &Path) -> io::Result<TempSibling> {
    let stem = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    // Process id keeps concurrent writers from clobbering each other's temp.
    let tmp_path = dir.join(format!(".{stem}.tmp.{}", std::process::id()));
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&tmp_path)?;
    Ok(TempSibling {
        file,
        path: tmp_path,
        committed: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_is_exclusive_within_process() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join("cache.lock");

        let held = FileLock::acquire(&lock_path, &LockOptions::default()).unwrap();
        // flock is per-descriptor, so a second open descriptor must fail.
        let second = FileLock::try_acquire(&lock_path).unwrap();
        assert!(second.is_none());
        drop(held);

        let reacquired = FileLock::try_acquire(&lock_path).unwrap();
        assert!(reacquired.is_some());
    }

    #[test]
    fn acquire_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join("busy.lock");
        let _held = FileLock::acquire(&lock_path, &LockOptions::default()).unwrap();

        let options = LockOptions {
            timeout: Duration::from_millis(120),
            retry_interval: Duration::from_millis(20),
        };
        let err = FileLock::acquire(&lock_path, &options).unwrap_err();
        assert!(matches!(err, FileLockError::Timeout(_)));
    }

    #[test]
    fn atomic_write_replaces_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        atomic_write(&path, b"first").unwrap();
        atomic_write(&path, b"second").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"second");

        // No leftover temp files.
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp."))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn atomic_write_json_is_readable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meta.json");
        atomic_write_json(&path, &serde_json::json!({"version": 1})).unwrap();
        let body: serde_json::Value =
            serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(body["version"], 1);
    }
}
