//! Filesystem generation locks.
//!
//! A lock is a file created with `create_new`, so it is exclusive across
//! threads and OS processes sharing the cache directory. It holds its
//! creation time; a lock older than the staleness threshold belongs to a
//! generator that died and may be reclaimed.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Source of the current time for lock ages.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for tests.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn advance(&self, by: Duration) {
        let by = chrono::Duration::from_std(by).unwrap_or(chrono::Duration::zero());
        *self.now.lock() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Result of trying to take a lock.
#[derive(Debug)]
pub enum LockAttempt {
    Acquired(GenerationLock),
    /// Another generator holds a fresh lock.
    Busy,
}

/// Extension of lock files in the cache directory.
pub const LOCK_FILE_EXTENSION: &str = "lock";

/// A held lock. The lock file is removed on drop.
#[derive(Debug)]
pub struct GenerationLock {
    path: PathBuf,
}

impl GenerationLock {
    /// Try to take the lock at `path`, reclaiming it if it is older than
    /// `stale_after`.
    pub fn try_acquire(path: &Path, stale_after: Duration, clock: &dyn Clock) -> io::Result<LockAttempt> {
        match create(path, clock)? {
            LockAttempt::Busy if is_stale(path, stale_after, clock) => {
                reclaim(path, stale_after, clock)
            }
            attempt => Ok(attempt),
        }
    }
}

/// Take the lock only if nothing holds `path`.
fn create(path: &Path, clock: &dyn Clock) -> io::Result<LockAttempt> {
    match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(mut file) => {
            let lock = GenerationLock {
                path: path.to_path_buf(),
            };
            file.write_all(clock.now().to_rfc3339().as_bytes())?;
            Ok(LockAttempt::Acquired(lock))
        }
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(LockAttempt::Busy),
        Err(e) => Err(e),
    }
}

/// Path of the guard serializing reclaims of the lock at `path`.
pub fn reclaim_guard_path(path: &Path) -> PathBuf {
    path.with_extension(format!("reclaim.{LOCK_FILE_EXTENSION}"))
}

/// Replace a stale lock.
///
/// Only the holder of the reclaim guard removes a lock file, and it
/// re-reads the lock's age after taking the guard. A lock that was
/// replaced by a fresh one in the meantime is left alone.
fn reclaim(path: &Path, stale_after: Duration, clock: &dyn Clock) -> io::Result<LockAttempt> {
    let guard_path = reclaim_guard_path(path);
    let _guard = match create(&guard_path, clock)? {
        LockAttempt::Acquired(guard) => guard,
        LockAttempt::Busy => {
            // A reclaimer died holding the guard.
            if is_stale(&guard_path, stale_after, clock) {
                remove_if_present(&guard_path)?;
            }
            return Ok(LockAttempt::Busy);
        }
    };

    if !is_stale(path, stale_after, clock) {
        return Ok(LockAttempt::Busy);
    }
    tracing::warn!(lock = %path.display(), "Reclaiming stale thumbnail lock");
    remove_if_present(path)?;
    create(path, clock)
}

fn remove_if_present(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

impl Drop for GenerationLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::warn!(lock = %self.path.display(), "Failed to remove lock: {}", e);
            }
        }
    }
}

/// When the lock at `path` was created. Falls back to the file's mtime
/// when the content is unreadable (e.g. a writer died mid-write).
pub fn lock_created_at(path: &Path) -> Option<DateTime<Utc>> {
    let from_content = std::fs::read_to_string(path)
        .ok()
        .and_then(|s| DateTime::parse_from_rfc3339(s.trim()).ok())
        .map(|t| t.with_timezone(&Utc));

    from_content.or_else(|| {
        std::fs::metadata(path)
            .and_then(|m| m.modified())
            .ok()
            .map(DateTime::<Utc>::from)
    })
}

/// Whether the lock at `path` is older than `stale_after`. A lock that has
/// vanished counts as stale so the caller retries.
pub fn is_stale(path: &Path, stale_after: Duration, clock: &dyn Clock) -> bool {
    match lock_created_at(path) {
        Some(created) => {
            let age = clock.now().signed_duration_since(created);
            age.to_std().map(|age| age > stale_after).unwrap_or(false)
        }
        None => !path.exists(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    const STALE: Duration = Duration::from_secs(120);

    fn clock() -> ManualClock {
        ManualClock::new(
            DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
        )
    }

    #[test]
    fn acquire_writes_timestamp_and_drop_removes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("abc.lock");
        let clock = clock();

        let attempt = GenerationLock::try_acquire(&path, STALE, &clock).unwrap();
        let LockAttempt::Acquired(lock) = attempt else {
            panic!("expected lock");
        };
        assert_eq!(lock_created_at(&path), Some(clock.now()));

        drop(lock);
        assert!(!path.exists());
    }

    #[test]
    fn fresh_lock_is_busy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("abc.lock");
        let clock = clock();

        let _held = GenerationLock::try_acquire(&path, STALE, &clock).unwrap();
        clock.advance(Duration::from_secs(60));
        assert_matches!(
            GenerationLock::try_acquire(&path, STALE, &clock).unwrap(),
            LockAttempt::Busy
        );
    }

    #[test]
    fn stale_lock_is_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("abc.lock");
        let clock = clock();

        std::fs::write(&path, clock.now().to_rfc3339()).unwrap();
        clock.advance(Duration::from_secs(121));

        let attempt = GenerationLock::try_acquire(&path, STALE, &clock).unwrap();
        assert_matches!(attempt, LockAttempt::Acquired(_));
        assert_eq!(lock_created_at(&path), Some(clock.now()));
    }

    #[test]
    fn concurrent_reclaim_yields_one_holder() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("abc.lock");
        let clock = clock();

        std::fs::write(&path, clock.now().to_rfc3339()).unwrap();
        clock.advance(Duration::from_secs(121));

        let barrier = std::sync::Barrier::new(8);
        let attempts: Vec<LockAttempt> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    s.spawn(|| {
                        barrier.wait();
                        GenerationLock::try_acquire(&path, STALE, &clock).unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let held = attempts
            .iter()
            .filter(|a| matches!(a, LockAttempt::Acquired(_)))
            .count();
        assert_eq!(held, 1);
        assert_eq!(lock_created_at(&path), Some(clock.now()));
        assert!(!reclaim_guard_path(&path).exists());
    }

    #[test]
    fn fresh_lock_survives_a_late_reclaimer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("abc.lock");
        let clock = clock();

        // Another generator already replaced the stale lock.
        let _held = GenerationLock::try_acquire(&path, STALE, &clock).unwrap();
        assert_matches!(reclaim(&path, STALE, &clock).unwrap(), LockAttempt::Busy);
        assert!(path.exists());
        assert_eq!(lock_created_at(&path), Some(clock.now()));
    }

    #[test]
    fn held_reclaim_guard_means_busy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("abc.lock");
        let clock = clock();

        std::fs::write(&path, clock.now().to_rfc3339()).unwrap();
        clock.advance(Duration::from_secs(121));
        std::fs::write(reclaim_guard_path(&path), clock.now().to_rfc3339()).unwrap();

        assert_matches!(
            GenerationLock::try_acquire(&path, STALE, &clock).unwrap(),
            LockAttempt::Busy
        );
        // The stale lock is untouched until the guard is released.
        assert!(path.exists());
        assert!(is_stale(&path, STALE, &clock));
    }

    #[test]
    fn abandoned_reclaim_guard_is_cleared() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("abc.lock");
        let clock = clock();

        std::fs::write(&path, clock.now().to_rfc3339()).unwrap();
        std::fs::write(reclaim_guard_path(&path), clock.now().to_rfc3339()).unwrap();
        clock.advance(Duration::from_secs(121));

        assert_matches!(
            GenerationLock::try_acquire(&path, STALE, &clock).unwrap(),
            LockAttempt::Busy
        );
        assert!(!reclaim_guard_path(&path).exists());
        assert_matches!(
            GenerationLock::try_acquire(&path, STALE, &clock).unwrap(),
            LockAttempt::Acquired(_)
        );
    }

    #[test]
    fn garbage_lock_uses_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("abc.lock");
        std::fs::write(&path, "not a timestamp").unwrap();

        // Just written, so fresh by wall clock.
        assert!(!is_stale(&path, STALE, &SystemClock));
        assert_matches!(
            GenerationLock::try_acquire(&path, STALE, &SystemClock).unwrap(),
            LockAttempt::Busy
        );
    }
}
