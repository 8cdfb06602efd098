use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::timeout;
use uuid::Uuid;

use crate::error::AppError;

/// One exclusive lock per key, acquired with a bounded wait.
///
/// Holding the guard of an order id is what serializes every mutation of
/// that order; a wait that runs out is reported as a transient conflict and
/// is never retried here. Entries live only while someone holds or waits on
/// them.
#[derive(Debug)]
pub struct KeyedLocks {
    label: &'static str,
    wait: Duration,
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

/// Exclusive hold on one key. Dropping it releases the key.
#[derive(Debug)]
pub struct KeyGuard<'a> {
    owner: &'a KeyedLocks,
    key: Uuid,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyedLocks {
    pub fn new(label: &'static str, wait: Duration) -> Self {
        Self {
            label,
            wait,
            locks: DashMap::new(),
        }
    }

    pub async fn acquire(&self, key: Uuid) -> Result<KeyGuard<'_>, AppError> {
        let lock = self
            .locks
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let acquired = timeout(self.wait, lock.lock_owned()).await;
        match acquired {
            Ok(guard) => Ok(KeyGuard {
                owner: self,
                key,
                guard: Some(guard),
            }),
            Err(_) => {
                self.release_if_idle(key);
                Err(AppError::Conflict(format!(
                    "{} {key} is busy, try again",
                    self.label
                )))
            }
        }
    }

    /// The map's own reference is the only one left: nobody holds or waits.
    /// Clones are taken under the same shard lock, so the count is stable here.
    fn release_if_idle(&self, key: Uuid) {
        self.locks
            .remove_if(&key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.owner.release_if_idle(self.key);
    }
}
