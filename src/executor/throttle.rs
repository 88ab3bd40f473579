//! Named critical sections
//!
//! A [`MutexRegistry`] hands out one lock per name, created on first use and
//! kept for the life of the registry. Everything that acquires the same name
//! serializes, whether or not it is the same function: two tasks that happen
//! to share a name string share a critical section.
//!
//! Locks are not reentrant. Acquiring a name again while already holding it
//! from the same task waits forever.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, trace};

use crate::executor::runtime::ExecutionContext;

/// Name used when a caller does not pick one.
pub const DEFAULT_LOCK: &str = "_default";

/// Lazily created locks keyed by name.
#[derive(Clone, Default)]
pub struct MutexRegistry {
    locks: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl MutexRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the lock for a name. Repeated calls return the same lock.
    pub fn get_or_create(&self, name: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock();
        locks
            .entry(name.to_string())
            .or_insert_with(|| {
                trace!("Creating named lock '{}'", name);
                Arc::new(AsyncMutex::new(()))
            })
            .clone()
    }

    /// Wait for exclusive ownership of a name.
    pub async fn acquire(&self, name: &str) -> CriticalSection {
        let lock = self.get_or_create(name);
        debug!("Acquiring named lock '{}'", name);
        let guard = lock.lock_owned().await;
        trace!("Holding named lock '{}'", name);
        CriticalSection {
            name: name.to_string(),
            _guard: guard,
        }
    }

    /// Whether the named lock is currently held
    pub fn is_locked(&self, name: &str) -> bool {
        self.locks
            .lock()
            .get(name)
            .is_some_and(|lock| lock.try_lock().is_err())
    }

    /// Number of names seen so far
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Exclusive ownership of a named lock; released on drop.
#[must_use = "the lock is released as soon as the section is dropped"]
pub struct CriticalSection {
    name: String,
    _guard: OwnedMutexGuard<()>,
}

impl CriticalSection {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for CriticalSection {
    fn drop(&mut self) {
        trace!("Releasing named lock '{}'", self.name);
    }
}

/// Run `fut` while holding the lock called `name`.
///
/// The lock is released however the future finishes, including errors and
/// cancellation.
pub async fn with_lock<F, T>(ctx: &ExecutionContext, name: &str, fut: F) -> T
where
    F: Future<Output = T>,
{
    let _section = ctx.mutexes().acquire(name).await;
    fut.await
}
