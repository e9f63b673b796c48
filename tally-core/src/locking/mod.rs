//! Named mutual exclusion
//!
//! Locks are identified by a name built from a prefix and parts joined with
//! `_`, e.g. `counter_signups`. The [`LockProvider`] decides how far a lock
//! reaches; [`LocalLockProvider`] excludes within the process only.
//!
//! Lock transitions are logged at debug level under the `locks` target.

mod stack;

pub use stack::LockStack;

use parking_lot::{Condvar, Mutex};
use std::collections::HashSet;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

const NAME_SEPARATOR: char = '_';

/// Backend holding named locks
pub trait LockProvider: Send + Sync {
    /// Block until the named lock is held
    fn lock(&self, name: &str);

    /// Take the named lock if it is free
    fn try_lock(&self, name: &str) -> bool;

    /// Release the named lock. Releasing a free lock does nothing.
    fn unlock(&self, name: &str);
}

/// In-process lock provider.
///
/// Locks are not reentrant: locking a name twice from the same thread
/// without unlocking it blocks forever.
#[derive(Default)]
pub struct LocalLockProvider {
    held: Mutex<HashSet<String>>,
    released: Condvar,
}

impl LocalLockProvider {
    /// Create a provider with no locks held
    pub fn new() -> Self {
        Self::default()
    }

    /// Check whether a lock is currently held
    pub fn is_locked(&self, name: &str) -> bool {
        self.held.lock().contains(name)
    }
}

impl LockProvider for LocalLockProvider {
    fn lock(&self, name: &str) {
        let mut held = self.held.lock();
        while held.contains(name) {
            self.released.wait(&mut held);
        }
        held.insert(name.to_string());
    }

    fn try_lock(&self, name: &str) -> bool {
        self.held.lock().insert(name.to_string())
    }

    fn unlock(&self, name: &str) {
        if self.held.lock().remove(name) {
            self.released.notify_all();
        }
    }
}

/// Build a lock name from a prefix and parts
pub fn lock_name<T: Display>(prefix: &str, parts: &[T]) -> String {
    let mut name = prefix.to_string();
    for part in parts {
        name.push(NAME_SEPARATOR);
        name.push_str(&part.to_string());
    }
    name
}

/// A named lock handle. Released on drop if still held.
pub struct Lock {
    provider: Arc<dyn LockProvider>,
    name: String,
    start: Instant,
    held: bool,
}

impl Lock {
    fn new(provider: Arc<dyn LockProvider>, name: String) -> Self {
        Self {
            provider,
            name,
            start: Instant::now(),
            held: false,
        }
    }

    /// Lock name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this handle holds the lock
    pub fn is_held(&self) -> bool {
        self.held
    }

    /// Block until the lock is held
    pub fn lock(&mut self) {
        if self.held {
            return;
        }
        self.provider.lock(&self.name);
        self.acquired();
        debug!(target: "locks", "LOCKED    {}", self.name);
    }

    /// Take the lock if it is free
    pub fn try_lock(&mut self) -> bool {
        if self.held {
            return true;
        }
        if self.provider.try_lock(&self.name) {
            self.acquired();
            debug!(target: "locks", "LOCKED    {}", self.name);
            true
        } else {
            debug!(target: "locks", "MISSED    {}", self.name);
            false
        }
    }

    /// Release the lock. Does nothing if it is not held.
    pub fn unlock(&mut self) {
        if !self.held {
            return;
        }
        self.provider.unlock(&self.name);
        self.held = false;
        debug!(
            target: "locks",
            "FREED     {} {}ms",
            self.name,
            self.start.elapsed().as_millis()
        );
    }

    fn acquired(&mut self) {
        self.held = true;
        self.start = Instant::now();
    }
}

impl Drop for Lock {
    fn drop(&mut self) {
        self.unlock();
    }
}

/// Hands out locks and lock stacks over one provider
#[derive(Clone)]
pub struct LockService {
    provider: Arc<dyn LockProvider>,
    prefix: String,
}

impl LockService {
    /// Create a service over a provider. `prefix` names the lock family used
    /// by [`LockService::scoped`].
    pub fn new(provider: Arc<dyn LockProvider>, prefix: impl Into<String>) -> Self {
        Self {
            provider,
            prefix: prefix.into(),
        }
    }

    /// In-process service
    pub fn local(prefix: impl Into<String>) -> Self {
        Self::new(Arc::new(LocalLockProvider::new()), prefix)
    }

    /// An unlocked handle for `prefix` and `parts`
    pub fn lock<T: Display>(&self, prefix: &str, parts: &[T]) -> Lock {
        Lock::new(self.provider.clone(), lock_name(prefix, parts))
    }

    /// An unlocked handle in this service's lock family
    pub fn scoped<T: Display>(&self, parts: &[T]) -> Lock {
        self.lock(&self.prefix, parts)
    }

    /// An empty lock stack
    pub fn stack(&self) -> LockStack {
        LockStack::new(self.provider.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_lock_name() {
        assert_eq!(lock_name("counter", &["signups"]), "counter_signups");
        assert_eq!(lock_name("job", &[1, 2]), "job_1_2");
        assert_eq!(lock_name::<&str>("global", &[]), "global");
    }

    #[test]
    fn test_try_lock_misses_when_held() {
        let service = LockService::local("counter");
        let mut first = service.scoped(&["a"]);
        let mut second = service.scoped(&["a"]);
        let mut other = service.scoped(&["b"]);

        assert!(first.try_lock());
        assert!(!second.try_lock());
        assert!(other.try_lock());

        first.unlock();
        assert!(second.try_lock());
    }

    #[test]
    fn test_unlock_unheld_is_noop() {
        let provider = Arc::new(LocalLockProvider::new());
        let service = LockService::new(provider.clone(), "x");

        let mut holder = service.lock("x", &["1"]);
        holder.lock();
        let mut stranger = service.lock("x", &["1"]);
        stranger.unlock();

        assert!(provider.is_locked("x_1"));
        drop(holder);
        assert!(!provider.is_locked("x_1"));
    }

    #[test]
    fn test_lock_excludes_threads() {
        let service = LockService::local("shared");
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let service = service.clone();
                let inside = inside.clone();
                let max_inside = max_inside.clone();
                thread::spawn(move || {
                    for _ in 0..20 {
                        let mut lock = service.scoped(&["cell"]);
                        lock.lock();
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        max_inside.fetch_max(now, Ordering::SeqCst);
                        thread::sleep(Duration::from_micros(50));
                        inside.fetch_sub(1, Ordering::SeqCst);
                        lock.unlock();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
    }
}
