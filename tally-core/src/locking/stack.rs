//! Lock stacks

use super::{lock_name, Lock, LockProvider};
use std::fmt::Display;
use std::sync::Arc;

/// Locks taken one after another and released in reverse order
pub struct LockStack {
    provider: Arc<dyn LockProvider>,
    locks: Vec<Lock>,
}

impl LockStack {
    pub(super) fn new(provider: Arc<dyn LockProvider>) -> Self {
        Self {
            provider,
            locks: Vec::new(),
        }
    }

    /// Acquire a lock and push it on the stack
    pub fn push_lock<T: Display>(&mut self, prefix: &str, parts: &[T]) {
        let mut lock = Lock::new(self.provider.clone(), lock_name(prefix, parts));
        lock.lock();
        self.locks.push(lock);
    }

    /// Release the most recently pushed lock. Returns false on an empty stack.
    pub fn pop_lock(&mut self) -> bool {
        match self.locks.pop() {
            Some(mut lock) => {
                lock.unlock();
                true
            }
            None => false,
        }
    }

    /// Release every lock, most recent first
    pub fn release_all(&mut self) {
        while self.pop_lock() {}
    }

    /// Names of the held locks, oldest first
    pub fn names(&self) -> Vec<&str> {
        self.locks.iter().map(|l| l.name()).collect()
    }

    /// Number of held locks
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl Drop for LockStack {
    fn drop(&mut self) {
        self.release_all();
    }
}
