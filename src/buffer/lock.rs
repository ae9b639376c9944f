// Whole-buffer Spinlock

/*
 * SHM RELAY - SHARED MEMORY SPINLOCK
 * =================================================================
 * Component Name: src/buffer/lock.rs
 * Core Responsibility: Mutual exclusion over the single lock byte of the shared region.
 * Design Pattern: Polling Spinlock + RAII Guard
 * =================================================================
 */

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{trace, warn};

use super::region::SharedBuffer;
use super::{LOCK_FREE, LOCK_HELD};
use crate::error::{RelayError, RelayResult};

/// Delay between two polls of the lock byte.
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Lock over the whole region. Not reentrant, no owner identity, no fairness:
/// the first poller that observes "free" wins.
pub struct ShmLock {
    buffer: Arc<SharedBuffer>,
    // Serializes check-then-set among threads of this process.
    local: Mutex<()>,
}

impl ShmLock {
    pub fn new(buffer: Arc<SharedBuffer>) -> Self {
        Self {
            buffer,
            local: Mutex::new(()),
        }
    }

    /// Poll until the flag is ours or `timeout` elapses.
    pub fn acquire(&self, timeout: Duration) -> RelayResult<LockGuard<'_>> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.try_acquire() {
                trace!("LOCK: acquired on '{}'", self.buffer.name());
                return Ok(LockGuard { lock: self, armed: true });
            }

            let now = Instant::now();
            if now >= deadline {
                warn!("LOCK: timed out after {:?} on '{}'", timeout, self.buffer.name());
                return Err(RelayError::LockTimeout(timeout));
            }
            thread::sleep(POLL_INTERVAL.min(deadline - now));
        }
    }

    /// Single attempt: check, set, confirm.
    pub fn try_acquire(&self) -> bool {
        let _local = self.local.lock();
        let flag = self.buffer.lock_cell();

        if flag.load(Ordering::Acquire) != LOCK_FREE {
            return false;
        }
        // CAS instead of a plain store so two processes cannot both win.
        if flag
            .compare_exchange(LOCK_FREE, LOCK_HELD, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        flag.load(Ordering::Acquire) == LOCK_HELD
    }

    /// Free the flag. Fails if it is not currently held.
    pub fn release(&self) -> RelayResult<()> {
        let _local = self.local.lock();
        self.buffer
            .lock_cell()
            .compare_exchange(LOCK_HELD, LOCK_FREE, Ordering::Release, Ordering::Relaxed)
            .map(|_| ())
            .map_err(|_| RelayError::LockNotHeld)
    }

    pub fn is_locked(&self) -> bool {
        self.buffer.lock_cell().load(Ordering::Acquire) == LOCK_HELD
    }
}

/// Releases the lock when dropped.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct LockGuard<'a> {
    lock: &'a ShmLock,
    armed: bool,
}

impl LockGuard<'_> {
    /// Release now and report whether the flag was still ours.
    pub fn release(mut self) -> RelayResult<()> {
        self.armed = false;
        self.lock.release()
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            if let Err(e) = self.lock.release() {
                warn!("LOCK: release on drop failed: {}", e);
            }
        }
    }
}
