use crate::error::PoolError;
use crate::interval::Interval;
use ahash::AHashSet;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Blocking pool of entity ids not currently engaged in a session.
///
/// Guarantees at most one in-flight customer session per customer id:
/// an id is either idle or checked out, never both. The semaphore holds
/// exactly one permit per idle id, so a successful acquire always finds an
/// id in the queue.
pub struct IdlePool {
    range: Interval,
    state: Mutex<PoolState>,
    available: Semaphore,
}

struct PoolState {
    idle: VecDeque<u64>,
    in_use: AHashSet<u64>,
}

impl IdlePool {
    /// Create a pool holding every id in `range`.
    pub fn new(range: Interval) -> Arc<Self> {
        let idle: VecDeque<u64> = range.iter().collect();
        let permits = idle.len();
        Arc::new(Self {
            range,
            state: Mutex::new(PoolState {
                idle,
                in_use: AHashSet::new(),
            }),
            available: Semaphore::new(permits),
        })
    }

    /// Wait until an id is idle, mark it checked out and return a lease for it.
    ///
    /// Fails only once the pool is closed.
    pub async fn checkout(self: &Arc<Self>) -> Result<IdleLease, PoolError> {
        let permit = self
            .available
            .acquire()
            .await
            .map_err(|_| PoolError::Closed)?;
        permit.forget();
        Ok(self.take_permitted())
    }

    /// Non-blocking checkout. `Ok(None)` when no id is idle.
    pub fn try_checkout(self: &Arc<Self>) -> Result<Option<IdleLease>, PoolError> {
        match self.available.try_acquire() {
            Ok(permit) => {
                permit.forget();
                Ok(Some(self.take_permitted()))
            }
            Err(tokio::sync::TryAcquireError::NoPermits) => Ok(None),
            Err(tokio::sync::TryAcquireError::Closed) => Err(PoolError::Closed),
        }
    }

    // Caller holds a forgotten permit, so the queue is non-empty.
    fn take_permitted(self: &Arc<Self>) -> IdleLease {
        let mut state = self.state.lock();
        let id = state
            .idle
            .pop_front()
            .unwrap_or_else(|| unreachable!("permit acquired with empty idle queue"));
        state.in_use.insert(id);
        IdleLease {
            pool: Arc::clone(self),
            id,
            released: false,
        }
    }

    /// Put a checked-out id back, waking one waiting `checkout`.
    pub fn give_back(&self, id: u64) -> Result<(), PoolError> {
        if !self.range.contains(id) {
            return Err(PoolError::OutOfRange {
                id,
                min: self.range.min(),
                max: self.range.max(),
            });
        }
        {
            let mut state = self.state.lock();
            if !state.in_use.remove(&id) {
                return Err(PoolError::NotCheckedOut(id));
            }
            state.idle.push_back(id);
        }
        self.available.add_permits(1);
        Ok(())
    }

    /// Wake every waiting `checkout` with `PoolError::Closed`. Ids may still be
    /// given back afterwards so the size invariant keeps holding.
    pub fn close(&self) {
        self.available.close();
    }

    pub fn is_closed(&self) -> bool {
        self.available.is_closed()
    }

    pub fn idle_count(&self) -> usize {
        self.state.lock().idle.len()
    }

    pub fn checked_out_count(&self) -> usize {
        self.state.lock().in_use.len()
    }

    /// Configured population, `max - min + 1`.
    pub fn capacity(&self) -> u64 {
        self.range.len()
    }

    pub fn is_checked_out(&self, id: u64) -> bool {
        self.state.lock().in_use.contains(&id)
    }
}

/// A checked-out id. Returned to its pool on `release` or drop.
pub struct IdleLease {
    pool: Arc<IdlePool>,
    id: u64,
    released: bool,
}

impl IdleLease {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn release(mut self) {
        self.give_back();
    }

    fn give_back(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(e) = self.pool.give_back(self.id) {
            tracing::error!(id = self.id, error = %e, "lease returned an id the pool did not lend");
        }
    }
}

impl Drop for IdleLease {
    fn drop(&mut self) {
        self.give_back();
    }
}

impl std::fmt::Debug for IdleLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdleLease").field("id", &self.id).finish()
    }
}
