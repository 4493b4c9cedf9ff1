use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::timeout;

use crate::error::BookingError;
use crate::models::OccurrenceKey;
use crate::store::ReservationStore;

/// Outcome of a slot acquisition attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Acquisition {
    pub acquired: bool,
    pub remaining: u32,
}

/// Cached confirmed count for one occurrence. `None` means the count has
/// not been read from durable state yet (first touch, or after a restart)
/// and must be recounted before any decision.
struct Slot {
    confirmed: Option<u32>,
}

/// Per-occurrence arbiter of capacity. All acquire/release traffic for one
/// occurrence key serializes on that key's mutex; different occurrences
/// never contend. The durable reservation store stays the source of truth —
/// the cached count is only ever a replay of `count_confirmed`.
pub struct CapacityLedger {
    slots: DashMap<OccurrenceKey, Arc<Mutex<Slot>>>,
    store: Arc<dyn ReservationStore>,
    lock_wait: Duration,
}

impl CapacityLedger {
    pub fn new(store: Arc<dyn ReservationStore>, lock_wait: Duration) -> Self {
        Self {
            slots: DashMap::new(),
            store,
            lock_wait,
        }
    }

    fn slot(&self, key: &OccurrenceKey) -> Arc<Mutex<Slot>> {
        self.slots
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(Slot { confirmed: None })))
            .clone()
    }

    async fn confirmed(
        &self,
        guard: &mut OwnedMutexGuard<Slot>,
        key: &OccurrenceKey,
    ) -> Result<u32, BookingError> {
        match guard.confirmed {
            Some(count) => Ok(count),
            None => {
                let count = self.store.count_confirmed(key).await?;
                guard.confirmed = Some(count);
                Ok(count)
            }
        }
    }

    /// Attempts to take one capacity unit. Exactly one of two simultaneous
    /// callers racing for the last unit gets it. Waiting longer than the
    /// configured bound fails with `Busy` and leaves no partial state.
    pub async fn try_acquire(
        &self,
        key: &OccurrenceKey,
        capacity: u32,
    ) -> Result<Acquisition, BookingError> {
        let slot = self.slot(key);
        let mut guard = timeout(self.lock_wait, slot.lock_owned())
            .await
            .map_err(|_| BookingError::Busy)?;
        let confirmed = self.confirmed(&mut guard, key).await?;
        if confirmed >= capacity {
            return Ok(Acquisition {
                acquired: false,
                remaining: capacity.saturating_sub(confirmed),
            });
        }
        guard.confirmed = Some(confirmed + 1);
        Ok(Acquisition {
            acquired: true,
            remaining: capacity - confirmed - 1,
        })
    }

    /// Returns one unit after a cancellation, or compensates an acquisition
    /// whose reservation write failed. Never times out: a skipped decrement
    /// would strand capacity until restart.
    pub async fn release(&self, key: &OccurrenceKey) -> Result<(), BookingError> {
        let slot = self.slot(key);
        let mut guard = slot.lock_owned().await;
        match guard.confirmed {
            Some(count) => guard.confirmed = Some(count.saturating_sub(1)),
            // Cold slot: the durable store already reflects the release.
            None => {
                let count = self.store.count_confirmed(key).await?;
                guard.confirmed = Some(count);
            }
        }
        Ok(())
    }

    /// Remaining capacity without acquiring anything.
    pub async fn remaining(
        &self,
        key: &OccurrenceKey,
        capacity: u32,
    ) -> Result<u32, BookingError> {
        let slot = self.slot(key);
        let mut guard = timeout(self.lock_wait, slot.lock_owned())
            .await
            .map_err(|_| BookingError::Busy)?;
        let confirmed = self.confirmed(&mut guard, key).await?;
        Ok(capacity.saturating_sub(confirmed))
    }
}
