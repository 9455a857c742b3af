//! Time-boxed advisory locking.
//!
//! Cross-context write races (browser tabs in the original deployment,
//! processes or nodes elsewhere) are mitigated, not eliminated: a holder that
//! fails to acquire skips its bulk push and relies on the other writer plus a
//! subsequent read-sync. Losing the race produces a harmless duplicate at
//! worst, never corruption, so this is best-effort by contract.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// A generic distributed advisory lock seam. Implementations may back this
/// with shared local storage, a database row, or a lock service.
pub trait AdvisoryLock: Send + Sync {
    /// Attempts to take the lock for `ttl`. Returns `false` when another
    /// holder's unexpired claim exists. An expired claim may be stolen.
    fn try_acquire(&self, key: &str, ttl: Duration) -> bool;

    /// Releases the lock. Releasing an unheld or expired key is a no-op.
    fn release(&self, key: &str);
}

/// In-process lock keeping an expiry instant per key, mirroring the
/// expiry-timestamp semantics of a shared-storage lock.
#[derive(Debug, Default)]
pub struct InMemoryAdvisoryLock {
    held: Mutex<HashMap<String, Instant>>,
}

impl InMemoryAdvisoryLock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AdvisoryLock for InMemoryAdvisoryLock {
    fn try_acquire(&self, key: &str, ttl: Duration) -> bool {
        if let Ok(mut held) = self.held.lock() {
            let now = Instant::now();
            if let Some(expiry) = held.get(key) {
                if *expiry > now {
                    return false;
                }
            }
            held.insert(key.to_string(), now + ttl);
            true
        } else {
            false
        }
    }

    fn release(&self, key: &str) {
        if let Ok(mut held) = self.held.lock() {
            held.remove(key);
        }
    }
}
