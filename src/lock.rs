//! Per-table advisory lock.
//!
//! The lock is a file created with create-exclusive semantics inside the table
//! directory. It guards a single counter's read-increment-persist cycle and nothing
//! else. A contender polls until the file disappears, and gives up once the file's
//! modification time is older than the configured timeout. An abandoned lock is never
//! taken over.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::thread;
use std::time::SystemTime;

use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{Error, Result};

pub const LOCK_FILE: &str = "tbl_lock";

#[derive(Debug)]
pub struct TableLock {
    path: PathBuf,
    released: bool,
}

impl TableLock {
    pub fn acquire(table_dir: &Path, config: &Config) -> Result<Self> {
        let path = table_dir.join(LOCK_FILE);
        loop {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    if let Err(e) = write!(file, "{}", process::id()) {
                        let _ = fs::remove_file(&path);
                        return Err(Error::io_at(&path, e));
                    }
                    debug!(lock = %path.display(), "acquired table lock");
                    return Ok(TableLock {
                        path,
                        released: false,
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    let modified = match fs::metadata(&path).and_then(|m| m.modified()) {
                        Ok(modified) => modified,
                        // Released between our attempt and the stat.
                        Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                        Err(e) => return Err(Error::io_at(&path, e)),
                    };
                    let age = SystemTime::now()
                        .duration_since(modified)
                        .unwrap_or_default();
                    if age > config.lock_timeout() {
                        return Err(Error::LockTimeout {
                            path,
                            timeout_secs: config.lock_timeout_secs,
                        });
                    }
                    warn!(
                        lock = %path.display(),
                        held_for_ms = age.as_millis() as u64,
                        "table lock is held, waiting"
                    );
                    thread::sleep(config.lock_poll_interval());
                }
                Err(e) => return Err(Error::io_at(&path, e)),
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn release(mut self) -> Result<()> {
        self.released = true;
        fs::remove_file(&self.path).map_err(|e| Error::io_at(&self.path, e))?;
        debug!(lock = %self.path.display(), "released table lock");
        Ok(())
    }
}

impl Drop for TableLock {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(lock = %self.path.display(), error = %e, "failed to remove table lock");
        }
    }
}

/// Runs `f` while holding the table lock. A failed release is reported unless `f`
/// itself failed.
pub fn with_table_lock<T>(
    table_dir: &Path,
    config: &Config,
    f: impl FnOnce() -> Result<T>,
) -> Result<T> {
    let lock = TableLock::acquire(table_dir, config)?;
    let result = f();
    match (result, lock.release()) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(release_err)) => {
            warn!(error = %release_err, "failed to release table lock after error");
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::time::Duration;
    use tempfile::TempDir;

    fn fast_config(dir: &Path) -> Config {
        Config {
            root: dir.to_path_buf(),
            lock_poll_interval_ms: 10,
            lock_timeout_secs: 120,
        }
    }

    #[test]
    fn test_acquire_writes_pid_and_release_removes() {
        let dir = TempDir::new().unwrap();
        let config = fast_config(dir.path());

        let lock = TableLock::acquire(dir.path(), &config).unwrap();
        let content = fs::read_to_string(lock.path()).unwrap();
        assert_eq!(content, process::id().to_string());

        lock.release().unwrap();
        assert!(!dir.path().join(LOCK_FILE).exists());
    }

    #[test]
    fn test_drop_removes_lock() {
        let dir = TempDir::new().unwrap();
        let config = fast_config(dir.path());
        {
            let _lock = TableLock::acquire(dir.path(), &config).unwrap();
            assert!(dir.path().join(LOCK_FILE).exists());
        }
        assert!(!dir.path().join(LOCK_FILE).exists());
    }

    #[test]
    fn test_waits_for_holder_to_release() {
        let dir = TempDir::new().unwrap();
        let config = fast_config(dir.path());
        let lock_path = dir.path().join(LOCK_FILE);
        fs::write(&lock_path, "99999").unwrap();

        let holder = {
            let lock_path = lock_path.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(100));
                fs::remove_file(lock_path).unwrap();
            })
        };

        let lock = TableLock::acquire(dir.path(), &config).unwrap();
        holder.join().unwrap();
        assert_eq!(fs::read_to_string(&lock_path).unwrap(), process::id().to_string());
        lock.release().unwrap();
    }

    #[test]
    fn test_abandoned_lock_times_out() {
        let dir = TempDir::new().unwrap();
        let config = fast_config(dir.path());
        let lock_path = dir.path().join(LOCK_FILE);
        let file = File::create(&lock_path).unwrap();
        file.set_modified(SystemTime::now() - Duration::from_secs(300))
            .unwrap();
        drop(file);

        match TableLock::acquire(dir.path(), &config) {
            Err(Error::LockTimeout { path, timeout_secs }) => {
                assert_eq!(path, lock_path);
                assert_eq!(timeout_secs, 120);
            }
            other => panic!("expected lock timeout, got {:?}", other),
        }
        // The stale lock is left in place.
        assert!(lock_path.exists());
    }

    #[test]
    fn test_with_table_lock_returns_closure_value() {
        let dir = TempDir::new().unwrap();
        let config = fast_config(dir.path());
        let value = with_table_lock(dir.path(), &config, || {
            assert!(dir.path().join(LOCK_FILE).exists());
            Ok(41 + 1)
        })
        .unwrap();
        assert_eq!(value, 42);
        assert!(!dir.path().join(LOCK_FILE).exists());
    }

    #[test]
    fn test_with_table_lock_propagates_closure_error() {
        let dir = TempDir::new().unwrap();
        let config = fast_config(dir.path());
        let result: Result<()> = with_table_lock(dir.path(), &config, || {
            Err(Error::Internal("boom".to_string()))
        });
        assert!(matches!(result, Err(Error::Internal(_))));
        assert!(!dir.path().join(LOCK_FILE).exists());
    }
}
