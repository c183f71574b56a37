//! Named shared/exclusive locks.
//!
//! Each index guards its on-disk tree with one named lock: shared for
//! reads, exclusive for writes and rebuilds. Requests for a name are
//! queued in arrival order. A holder that keeps the lock past its timeout
//! is forcibly expired the next time a waiter checks; if that holder was
//! flagged critical, every request queued behind it is rejected instead of
//! being allowed to proceed.

use crate::error::{LockError, LockResult};
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{trace, warn};

/// Access mode of a lock request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Any number of shared holders may coexist.
    Shared,
    /// A single holder with no other holders.
    Exclusive,
}

/// Options for a lock request.
#[derive(Debug, Clone, Copy)]
pub struct LockOptions {
    /// Maximum time to wait in the queue, and maximum time the lock may be
    /// held before it is forcibly expired.
    pub timeout: Duration,
    /// Reject all queued requests if this holder expires.
    pub critical: bool,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            critical: false,
        }
    }
}

impl LockOptions {
    /// Creates options with the given timeout.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            critical: false,
        }
    }

    /// Marks the request as critical.
    #[must_use]
    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }
}

#[derive(Debug)]
struct Holder {
    id: u64,
    mode: LockMode,
    expires: Instant,
    critical: bool,
}

#[derive(Debug)]
struct Waiter {
    id: u64,
    mode: LockMode,
}

#[derive(Debug, Default)]
struct NamedLock {
    holders: Vec<Holder>,
    queue: VecDeque<Waiter>,
    rejected: HashSet<u64>,
}

impl NamedLock {
    fn is_idle(&self) -> bool {
        self.holders.is_empty() && self.queue.is_empty() && self.rejected.is_empty()
    }

    fn can_grant(&self, id: u64, mode: LockMode) -> bool {
        let Some(pos) = self.queue.iter().position(|w| w.id == id) else {
            return false;
        };
        match mode {
            LockMode::Exclusive => pos == 0 && self.holders.is_empty(),
            LockMode::Shared => {
                self.holders.iter().all(|h| h.mode == LockMode::Shared)
                    && self.queue.iter().take(pos).all(|w| w.mode == LockMode::Shared)
            }
        }
    }

    /// Drops expired holders. Returns true if anything changed.
    fn expire_holders(&mut self, name: &str, now: Instant) -> bool {
        let before = self.holders.len();
        let mut critical_expired = false;
        self.holders.retain(|h| {
            if h.expires <= now {
                warn!(lock = name, holder = h.id, critical = h.critical, "lock expired");
                critical_expired |= h.critical;
                false
            } else {
                true
            }
        });
        if critical_expired {
            for waiter in self.queue.drain(..) {
                self.rejected.insert(waiter.id);
            }
        }
        before != self.holders.len()
    }

    fn earliest_expiry(&self) -> Option<Instant> {
        self.holders.iter().map(|h| h.expires).min()
    }
}

#[derive(Debug, Default)]
struct LockTable {
    locks: Mutex<HashMap<String, NamedLock>>,
    changed: Condvar,
}

impl LockTable {
    fn release(&self, name: &str, id: u64) {
        let mut locks = self.locks.lock();
        if let Some(lock) = locks.get_mut(name) {
            lock.holders.retain(|h| h.id != id);
            if lock.is_idle() {
                locks.remove(name);
            }
        }
        trace!(lock = name, holder = id, "lock released");
        self.changed.notify_all();
    }
}

/// Registry of named locks.
///
/// Cloning a `LockManager` yields a handle to the same lock table.
///
/// # Example
///
/// ```rust
/// use arbordb_storage::{LockManager, LockMode, LockOptions};
///
/// let locks = LockManager::new();
/// let read1 = locks.lock("users.idx", LockMode::Shared, LockOptions::default()).unwrap();
/// let read2 = locks.lock("users.idx", LockMode::Shared, LockOptions::default()).unwrap();
/// assert_eq!(locks.holder_count("users.idx"), 2);
/// drop((read1, read2));
/// assert_eq!(locks.holder_count("users.idx"), 0);
/// ```
#[derive(Debug, Clone, Default)]
pub struct LockManager {
    table: Arc<LockTable>,
    next_id: Arc<AtomicU64>,
}

impl LockManager {
    /// Creates an empty lock manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the named lock, blocking until it is granted.
    ///
    /// # Errors
    ///
    /// - [`LockError::Timeout`] if the lock is not granted within `options.timeout`
    /// - [`LockError::Rejected`] if a critical holder expired while queued
    pub fn lock(&self, name: &str, mode: LockMode, options: LockOptions) -> LockResult<LockGuard> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();
        let deadline = started + options.timeout;

        let mut locks = self.table.locks.lock();
        locks
            .entry(name.to_string())
            .or_default()
            .queue
            .push_back(Waiter { id, mode });

        loop {
            let now = Instant::now();
            let lock = locks.entry(name.to_string()).or_default();

            if lock.expire_holders(name, now) {
                self.table.changed.notify_all();
            }

            if lock.rejected.remove(&id) {
                if lock.is_idle() {
                    locks.remove(name);
                }
                return Err(LockError::Rejected {
                    name: name.to_string(),
                });
            }

            if lock.can_grant(id, mode) {
                lock.queue.retain(|w| w.id != id);
                lock.holders.push(Holder {
                    id,
                    mode,
                    expires: now + options.timeout,
                    critical: options.critical,
                });
                trace!(lock = name, holder = id, ?mode, "lock granted");
                return Ok(LockGuard {
                    table: Arc::clone(&self.table),
                    name: name.to_string(),
                    id,
                    mode,
                });
            }

            if now >= deadline {
                lock.queue.retain(|w| w.id != id);
                if lock.is_idle() {
                    locks.remove(name);
                }
                self.table.changed.notify_all();
                return Err(LockError::Timeout {
                    name: name.to_string(),
                    waited: now - started,
                });
            }

            let wake = lock
                .earliest_expiry()
                .map_or(deadline, |expiry| expiry.min(deadline));
            self.table.changed.wait_until(&mut locks, wake);
        }
    }

    /// Returns the number of current holders of the named lock.
    #[must_use]
    pub fn holder_count(&self, name: &str) -> usize {
        self.table
            .locks
            .lock()
            .get(name)
            .map_or(0, |lock| lock.holders.len())
    }

    /// Returns the number of requests queued for the named lock.
    #[must_use]
    pub fn queue_len(&self, name: &str) -> usize {
        self.table
            .locks
            .lock()
            .get(name)
            .map_or(0, |lock| lock.queue.len())
    }
}

/// A granted lock. The lock is released when the guard is dropped.
///
/// Dropping a guard whose lock was already forcibly expired is a no-op.
#[derive(Debug)]
pub struct LockGuard {
    table: Arc<LockTable>,
    name: String,
    id: u64,
    mode: LockMode,
}

impl LockGuard {
    /// Returns the lock name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the mode the lock was granted in.
    #[must_use]
    pub fn mode(&self) -> LockMode {
        self.mode
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.table.release(&self.name, self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;

    fn opts(ms: u64) -> LockOptions {
        LockOptions::with_timeout(Duration::from_millis(ms))
    }

    #[test]
    fn shared_locks_coexist() {
        let locks = LockManager::new();
        let a = locks.lock("idx", LockMode::Shared, opts(1000)).unwrap();
        let b = locks.lock("idx", LockMode::Shared, opts(1000)).unwrap();
        assert_eq!(locks.holder_count("idx"), 2);
        assert_eq!(a.mode(), LockMode::Shared);
        drop(a);
        drop(b);
        assert_eq!(locks.holder_count("idx"), 0);
    }

    #[test]
    fn exclusive_waits_for_shared_then_times_out() {
        let locks = LockManager::new();
        let _read = locks.lock("idx", LockMode::Shared, opts(10_000)).unwrap();

        let result = locks.lock("idx", LockMode::Exclusive, opts(50));
        assert!(matches!(result, Err(LockError::Timeout { .. })));
        assert_eq!(locks.queue_len("idx"), 0);
    }

    #[test]
    fn different_names_do_not_conflict() {
        let locks = LockManager::new();
        let _a = locks.lock("a.idx", LockMode::Exclusive, opts(1000)).unwrap();
        let b = locks.lock("b.idx", LockMode::Exclusive, opts(50));
        assert!(b.is_ok());
    }

    #[test]
    fn exclusive_granted_after_release() {
        let locks = LockManager::new();
        let write = locks.lock("idx", LockMode::Exclusive, opts(5000)).unwrap();

        let other = locks.clone();
        let handle = thread::spawn(move || {
            let guard = other.lock("idx", LockMode::Exclusive, opts(5000)).unwrap();
            guard.name().to_string()
        });

        thread::sleep(Duration::from_millis(30));
        drop(write);
        assert_eq!(handle.join().unwrap(), "idx");
    }

    #[test]
    fn waiters_are_served_in_arrival_order() {
        let locks = LockManager::new();
        let first = locks.lock("idx", LockMode::Exclusive, opts(5000)).unwrap();
        let (tx, rx) = mpsc::channel();

        let mut handles = Vec::new();
        for n in 0..3 {
            let worker = locks.clone();
            let tx = tx.clone();
            handles.push(thread::spawn(move || {
                let _guard = worker.lock("idx", LockMode::Exclusive, opts(5000)).unwrap();
                tx.send(n).unwrap();
                thread::sleep(Duration::from_millis(5));
            }));
            // Make sure each request is queued before the next one arrives
            while locks.queue_len("idx") < n + 1 {
                thread::sleep(Duration::from_millis(1));
            }
        }

        drop(first);
        for handle in handles {
            handle.join().unwrap();
        }
        let order: Vec<usize> = rx.try_iter().collect();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn expired_holder_lets_queue_proceed() {
        let locks = LockManager::new();
        let stale = locks.lock("idx", LockMode::Exclusive, opts(40)).unwrap();

        let next = locks.lock("idx", LockMode::Exclusive, opts(2000));
        assert!(next.is_ok());

        // Releasing the expired guard must not release the new holder
        drop(stale);
        assert_eq!(locks.holder_count("idx"), 1);
    }

    #[test]
    fn expired_critical_holder_rejects_queue() {
        let locks = LockManager::new();
        let _stale = locks
            .lock("idx", LockMode::Exclusive, opts(40).critical())
            .unwrap();

        let result = locks.lock("idx", LockMode::Shared, opts(2000));
        assert!(matches!(result, Err(LockError::Rejected { .. })));
    }
}
