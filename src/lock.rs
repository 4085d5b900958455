//! Exclusive migration lock.
//!
//! A single-slot, non-blocking lock serializing forward migration, rollback,
//! and mutating cleanup. A second caller while the slot is held gets `None`
//! immediately; there is no queuing. Release happens on every exit path,
//! panics included, because the only way to hold the lock is through the
//! RAII guard.

use std::sync::atomic::{AtomicBool, Ordering};

/// Process-wide single-slot lock. One per engine instance.
#[derive(Debug, Default)]
pub struct MigrationLock {
    held: AtomicBool,
}

impl MigrationLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to take the slot. Non-blocking: returns `None` if already held.
    pub fn acquire(&self) -> Option<MigrationLockGuard<'_>> {
        if self
            .held
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            Some(MigrationLockGuard { lock: self })
        } else {
            None
        }
    }

    /// Whether an attempt currently holds the lock.
    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }
}

/// Guard returned by [`MigrationLock::acquire`]; dropping it releases the slot.
#[derive(Debug)]
pub struct MigrationLockGuard<'a> {
    lock: &'a MigrationLock,
}

impl Drop for MigrationLockGuard<'_> {
    fn drop(&mut self) {
        self.lock.held.store(false, Ordering::Release);
    }
}
