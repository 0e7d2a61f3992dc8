//! File-backed history.
//!
//! Every append is a read-modify-write of the whole snapshot performed under
//! two locks: an in-process mutex and a `<snapshot>.lock` file created with
//! `O_EXCL`, so separate processes appending to the same file serialize too.
//! The new snapshot is written to a temporary file in the same directory and
//! renamed over the old one; readers see either the old or the new document.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use tempfile::NamedTempFile;

use crate::error::HistoryError;
use crate::schema::Run;
use crate::snapshot;
use crate::store::{BenchmarkHistory, Clock, SystemClock};
use crate::SnapshotFormat;

const DEFAULT_LOCK_ATTEMPTS: u32 = 50;
const DEFAULT_LOCK_DELAY: Duration = Duration::from_millis(20);

/// Exclusive hold on `<snapshot>.lock`; the file is removed on drop.
#[derive(Debug)]
struct LockFile {
    path: PathBuf,
    _file: File,
}

impl LockFile {
    fn acquire(path: &Path, attempts: u32, delay: Duration) -> Result<Self, HistoryError> {
        for attempt in 1..=attempts.max(1) {
            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(file) => {
                    return Ok(Self {
                        path: path.to_path_buf(),
                        _file: file,
                    })
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    if attempt == 1 {
                        tracing::warn!(lock = %path.display(), "snapshot lock held, waiting");
                    }
                    thread::sleep(delay);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(HistoryError::Locked(path.to_path_buf()))
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            tracing::warn!(lock = %self.path.display(), error = %e, "failed to release snapshot lock");
        }
    }
}

/// Replace `path` with `contents` via a same-directory temp file and rename.
fn write_atomic(path: &Path, contents: &str) -> io::Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(contents.as_bytes())?;
    // The temp file is created 0600; keep the mode readers already rely on.
    match fs::metadata(path) {
        Ok(meta) => tmp.as_file().set_permissions(meta.permissions())?,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// A snapshot on disk.
#[derive(Debug)]
pub struct SnapshotFile {
    path: PathBuf,
    lock_path: PathBuf,
    guard: Mutex<()>,
    lock_attempts: u32,
    lock_delay: Duration,
}

impl SnapshotFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut lock_path = path.clone().into_os_string();
        lock_path.push(".lock");
        Self {
            path,
            lock_path: PathBuf::from(lock_path),
            guard: Mutex::new(()),
            lock_attempts: DEFAULT_LOCK_ATTEMPTS,
            lock_delay: DEFAULT_LOCK_DELAY,
        }
    }

    /// How long to wait for another writer's lock file before giving up
    /// with [`HistoryError::Locked`].
    pub fn with_lock_retry(mut self, attempts: u32, delay: Duration) -> Self {
        self.lock_attempts = attempts;
        self.lock_delay = delay;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// Write an empty history. Refuses to overwrite an existing snapshot.
    pub fn create(
        &self,
        repo_url: &str,
        format: SnapshotFormat,
    ) -> Result<BenchmarkHistory, HistoryError> {
        let _held = self.guard.lock().unwrap_or_else(PoisonError::into_inner);
        let _lock = LockFile::acquire(&self.lock_path, self.lock_attempts, self.lock_delay)?;

        if self.path.exists() {
            return Err(HistoryError::SnapshotExists(self.path.clone()));
        }

        let history = BenchmarkHistory::new(repo_url);
        write_atomic(&self.path, &history.serialize(format)?)?;
        tracing::info!(path = %self.path.display(), ?format, "created snapshot");
        Ok(history)
    }

    /// Read and parse the current snapshot along with the format it is stored in.
    pub fn read(&self) -> Result<(SnapshotFormat, BenchmarkHistory), HistoryError> {
        let contents = fs::read_to_string(&self.path)?;
        snapshot::parse(&contents)
    }

    pub fn append_run(&self, suite: &str, run: Run) -> Result<BenchmarkHistory, HistoryError> {
        self.append_run_at(suite, run, &SystemClock)
    }

    /// Append under both locks and rewrite the snapshot in its existing format.
    /// Returns the history as written. On any error the file is left as it was.
    pub fn append_run_at(
        &self,
        suite: &str,
        run: Run,
        clock: &dyn Clock,
    ) -> Result<BenchmarkHistory, HistoryError> {
        let _held = self.guard.lock().unwrap_or_else(PoisonError::into_inner);
        let _lock = LockFile::acquire(&self.lock_path, self.lock_attempts, self.lock_delay)?;

        let (format, mut history) = self.read()?;
        history.append_run_at(suite, run, clock)?;
        write_atomic(&self.path, &history.serialize(format)?)?;

        tracing::debug!(path = %self.path.display(), ?format, "flushed snapshot");
        Ok(history)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_lock_file_removed_on_drop() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.js.lock");

        {
            let _lock = LockFile::acquire(&path, 1, Duration::ZERO).unwrap();
            assert!(path.exists());
        }
        assert!(!path.exists());
    }

    #[test]
    fn test_contended_lock_gives_up() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.js.lock");

        let _held = LockFile::acquire(&path, 1, Duration::ZERO).unwrap();
        let err = LockFile::acquire(&path, 3, Duration::from_millis(1)).unwrap_err();
        assert!(matches!(err, HistoryError::Locked(p) if p == path));
    }

    #[test]
    fn test_write_atomic_replaces_contents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.json");

        write_atomic(&path, "first").unwrap();
        write_atomic(&path, "second").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "second");

        let leftovers = fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_write_atomic_keeps_existing_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let path = dir.path().join("data.js");

        write_atomic(&path, "first").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();
        write_atomic(&path, "second").unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o644);
    }

    #[test]
    fn test_create_refuses_existing() {
        let dir = tempdir().unwrap();
        let file = SnapshotFile::new(dir.path().join("data.json"));

        file.create("https://example.com/repo", SnapshotFormat::Json)
            .unwrap();
        let err = file
            .create("https://example.com/repo", SnapshotFormat::Json)
            .unwrap_err();
        assert!(matches!(err, HistoryError::SnapshotExists(_)));
        assert!(!file.lock_path().exists());
    }

    #[test]
    fn test_lock_path_sits_next_to_snapshot() {
        let file = SnapshotFile::new("dev/bench/data.js");
        assert_eq!(file.lock_path(), Path::new("dev/bench/data.js.lock"));
    }
}
