//! Wake-lock acquisition with guaranteed release.
//!
//! A wake-lock keeps the system from suspending while the collector runs.
//! [`WakeLockGuard`] provides RAII-style management: the lock is released
//! exactly once, either explicitly through [`WakeLockGuard::release`] or when
//! the guard is dropped on an early-return path.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use sensord_core::mock::MockWakeLock;
//! use sensord_core::WakeLockGuard;
//!
//! let lock = Arc::new(MockWakeLock::new());
//! {
//!     let _guard = WakeLockGuard::acquire(lock.clone()).unwrap();
//!     assert!(lock.is_held());
//! }
//! // Released when the guard went out of scope.
//! assert!(!lock.is_held());
//! ```

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

/// Default path of the kernel wake-lock interface.
pub const SYSFS_WAKE_LOCK: &str = "/sys/power/wake_lock";
/// Default path of the kernel wake-unlock interface.
pub const SYSFS_WAKE_UNLOCK: &str = "/sys/power/wake_unlock";

/// Errors raised by wake-lock providers.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WakeLockError {
    /// The platform does not offer the wake-lock, or refused it.
    #[error("{0}")]
    Unavailable(String),

    /// Writing to the wake-lock interface failed.
    #[error("wake-lock I/O error: {0}")]
    Io(#[from] io::Error),
}

/// An exclusive OS resource that prevents system suspension while held.
///
/// Implementations do not need to track ownership themselves; the lifecycle
/// pairs every successful [`acquire`](WakeLock::acquire) with exactly one
/// [`release`](WakeLock::release) through [`WakeLockGuard`].
pub trait WakeLock: Send + Sync {
    /// Name the lock is registered under.
    fn tag(&self) -> &str;

    /// Acquire the lock.
    fn acquire(&self) -> Result<(), WakeLockError>;

    /// Release the lock.
    fn release(&self) -> Result<(), WakeLockError>;
}

/// Owned handle on an acquired wake-lock.
///
/// Dropping the guard releases the lock. Release failures are logged, not
/// propagated, since there is nothing a caller could do about them.
pub struct WakeLockGuard {
    lock: Option<Arc<dyn WakeLock>>,
}

impl WakeLockGuard {
    /// Acquire `lock` and wrap it in a guard.
    pub fn acquire(lock: Arc<dyn WakeLock>) -> Result<Self, WakeLockError> {
        lock.acquire()?;
        debug!(tag = lock.tag(), "Wake-lock acquired");
        Ok(Self { lock: Some(lock) })
    }

    /// Whether the guard still holds the lock.
    pub fn is_held(&self) -> bool {
        self.lock.is_some()
    }

    /// Release the lock now.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if let Some(lock) = self.lock.take() {
            match lock.release() {
                Ok(()) => debug!(tag = lock.tag(), "Wake-lock released"),
                Err(e) => warn!(tag = lock.tag(), error = %e, "Failed to release wake-lock"),
            }
        }
    }
}

impl std::fmt::Debug for WakeLockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WakeLockGuard")
            .field("tag", &self.lock.as_ref().map(|l| l.tag().to_string()))
            .finish()
    }
}

impl Drop for WakeLockGuard {
    fn drop(&mut self) {
        self.release_inner();
    }
}

/// Kernel wake-lock driven through `/sys/power/wake_lock`.
///
/// Writing the lock name to the lock file acquires it; writing the same name
/// to the unlock file releases it. Both paths are configurable so the lock
/// can be pointed at other files in tests.
#[derive(Debug, Clone)]
pub struct SysfsWakeLock {
    name: String,
    lock_path: PathBuf,
    unlock_path: PathBuf,
}

impl SysfsWakeLock {
    /// Create a wake-lock using the default sysfs paths.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_paths(name, SYSFS_WAKE_LOCK, SYSFS_WAKE_UNLOCK)
    }

    /// Create a wake-lock using custom lock/unlock paths.
    pub fn with_paths(
        name: impl Into<String>,
        lock_path: impl Into<PathBuf>,
        unlock_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            lock_path: lock_path.into(),
            unlock_path: unlock_path.into(),
        }
    }

    fn write_name(&self, path: &Path) -> Result<(), WakeLockError> {
        let mut file = OpenOptions::new().write(true).open(path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                WakeLockError::Unavailable(format!(
                    "wake-lock interface {} not present",
                    path.display()
                ))
            } else {
                WakeLockError::Io(e)
            }
        })?;
        file.write_all(self.name.as_bytes())?;
        Ok(())
    }
}

impl WakeLock for SysfsWakeLock {
    fn tag(&self) -> &str {
        &self.name
    }

    fn acquire(&self) -> Result<(), WakeLockError> {
        self.write_name(&self.lock_path)
    }

    fn release(&self) -> Result<(), WakeLockError> {
        self.write_name(&self.unlock_path)
    }
}

/// A wake-lock that does nothing, for platforms or setups without one.
#[derive(Debug, Clone, Default)]
pub struct NoopWakeLock;

impl WakeLock for NoopWakeLock {
    fn tag(&self) -> &str {
        "noop"
    }

    fn acquire(&self) -> Result<(), WakeLockError> {
        Ok(())
    }

    fn release(&self) -> Result<(), WakeLockError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockWakeLock;

    #[test]
    fn test_guard_releases_on_drop() {
        let lock = Arc::new(MockWakeLock::new());
        let guard = WakeLockGuard::acquire(lock.clone()).unwrap();
        assert!(guard.is_held());
        assert_eq!(lock.acquire_count(), 1);

        drop(guard);
        assert_eq!(lock.release_count(), 1);
        assert!(!lock.is_held());
    }

    #[test]
    fn test_explicit_release_happens_once() {
        let lock = Arc::new(MockWakeLock::new());
        let guard = WakeLockGuard::acquire(lock.clone()).unwrap();
        guard.release();
        assert_eq!(lock.acquire_count(), 1);
        assert_eq!(lock.release_count(), 1);
    }

    #[test]
    fn test_failed_acquire_returns_no_guard() {
        let lock = Arc::new(MockWakeLock::new());
        lock.set_should_fail(true);

        let result = WakeLockGuard::acquire(lock.clone());
        assert!(matches!(result, Err(WakeLockError::Unavailable(_))));
        assert_eq!(lock.release_count(), 0);
    }

    #[test]
    fn test_sysfs_wake_lock_writes_name() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join("wake_lock");
        let unlock_path = dir.path().join("wake_unlock");
        std::fs::write(&lock_path, "").unwrap();
        std::fs::write(&unlock_path, "").unwrap();

        let lock = Arc::new(SysfsWakeLock::with_paths("sensord", &lock_path, &unlock_path));
        let guard = WakeLockGuard::acquire(lock).unwrap();
        assert_eq!(std::fs::read_to_string(&lock_path).unwrap(), "sensord");
        assert_eq!(std::fs::read_to_string(&unlock_path).unwrap(), "");

        guard.release();
        assert_eq!(std::fs::read_to_string(&unlock_path).unwrap(), "sensord");
    }

    #[test]
    fn test_sysfs_wake_lock_missing_interface() {
        let dir = tempfile::tempdir().unwrap();
        let lock = SysfsWakeLock::with_paths(
            "sensord",
            dir.path().join("absent_lock"),
            dir.path().join("absent_unlock"),
        );
        let err = lock.acquire().unwrap_err();
        assert!(matches!(err, WakeLockError::Unavailable(_)));
        assert!(err.to_string().contains("absent_lock"));
    }

    #[test]
    fn test_noop_wake_lock() {
        let guard = WakeLockGuard::acquire(Arc::new(NoopWakeLock)).unwrap();
        assert!(guard.is_held());
        assert!(format!("{guard:?}").contains("noop"));
    }
}
