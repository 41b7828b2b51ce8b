//! Connection arbiter.
//!
//! Hands out logical connection slots from a pool that grows lazily up to
//! `max_slots`. Slots are non-`Clone` handles, so a slot can only be
//! released once and is never shared between callers. [`SlotLease`]
//! releases its slot on drop, which is how the coordinator guarantees a
//! release on every exit path.
//!
//! Once every slot is checked out the arbiter either rejects immediately
//! ([`PoolMode::FailFast`], the default) or parks a bounded number of
//! callers for a bounded time ([`PoolMode::BoundedWait`]).

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::config::PoolMode;
use crate::error::{QueryError, Result};

/// Identity of one logical connection.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(pub u32);

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot-{}", self.0)
    }
}

/// An exclusively owned, checked-out connection handle.
#[derive(Debug)]
pub struct ConnectionSlot {
    id: SlotId,
    checked_out_at: Instant,
}

impl ConnectionSlot {
    /// Identity of the underlying logical connection.
    pub fn id(&self) -> SlotId {
        self.id
    }

    /// How long the slot has been checked out.
    pub fn held_for(&self) -> Duration {
        self.checked_out_at.elapsed()
    }
}

/// Point-in-time view of the pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolSnapshot {
    /// Pool ceiling.
    pub max_slots: usize,
    /// Slots created so far.
    pub created: usize,
    /// Created slots not checked out.
    pub idle: usize,
    /// Slots checked out.
    pub in_use: usize,
    /// Callers parked in bounded-wait mode.
    pub waiters: usize,
    /// Acquisitions rejected since creation.
    pub rejections: u64,
}

#[derive(Default)]
struct PoolState {
    created: u32,
    free: Vec<SlotId>,
    checked_out: HashSet<SlotId>,
    waiters: usize,
}

/// Bounded logical connection pool.
pub struct ConnectionArbiter {
    max_slots: usize,
    mode: PoolMode,
    state: Mutex<PoolState>,
    released: Notify,
    rejections: AtomicU64,
}

impl ConnectionArbiter {
    /// Creates an empty pool that grows up to `max_slots`.
    pub fn new(max_slots: usize, mode: PoolMode) -> Self {
        Self {
            max_slots,
            mode,
            state: Mutex::new(PoolState::default()),
            released: Notify::new(),
            rejections: AtomicU64::new(0),
        }
    }

    /// Pool ceiling.
    pub fn max_slots(&self) -> usize {
        self.max_slots
    }

    /// Exhaustion behaviour.
    pub fn mode(&self) -> PoolMode {
        self.mode
    }

    /// Takes a free slot or creates one, failing with `PoolExhausted` when
    /// the pool is at its ceiling. Never waits.
    pub fn try_acquire(&self) -> Result<ConnectionSlot> {
        match self.take_slot() {
            Some(slot) => Ok(slot),
            None => Err(self.reject()),
        }
    }

    /// Acquires a slot according to the pool mode.
    pub async fn acquire(&self) -> Result<ConnectionSlot> {
        match self.mode {
            PoolMode::FailFast => self.try_acquire(),
            PoolMode::BoundedWait {
                max_waiters,
                wait_timeout_ms,
            } => {
                self.acquire_waiting(max_waiters, Duration::from_millis(wait_timeout_ms))
                    .await
            }
        }
    }

    /// Acquires a slot wrapped in a lease that releases it on drop.
    pub async fn lease(&self) -> Result<SlotLease<'_>> {
        let slot = self.acquire().await?;
        Ok(SlotLease {
            arbiter: self,
            slot: Some(slot),
        })
    }

    /// Returns a slot to the free set. Returns `false` if the slot was not
    /// checked out from this arbiter.
    pub fn release(&self, slot: ConnectionSlot) -> bool {
        let held_for = slot.held_for();
        {
            let mut state = self.state.lock();
            if !state.checked_out.remove(&slot.id) {
                warn!(slot = %slot.id, "pool.release.unowned");
                return false;
            }
            state.free.push(slot.id);
        }
        debug!(
            slot = %slot.id,
            held_ms = held_for.as_secs_f64() * 1_000.0,
            "pool.slot.released"
        );
        self.released.notify_one();
        true
    }

    /// Current pool counters.
    pub fn snapshot(&self) -> PoolSnapshot {
        let state = self.state.lock();
        PoolSnapshot {
            max_slots: self.max_slots,
            created: state.created as usize,
            idle: state.free.len(),
            in_use: state.checked_out.len(),
            waiters: state.waiters,
            rejections: self.rejections.load(Ordering::Relaxed),
        }
    }

    fn take_slot(&self) -> Option<ConnectionSlot> {
        let mut state = self.state.lock();
        let id = match state.free.pop() {
            Some(id) => id,
            None if (state.created as usize) < self.max_slots => {
                let id = SlotId(state.created);
                state.created += 1;
                debug!(slot = %id, created = state.created, "pool.slot.created");
                id
            }
            None => return None,
        };
        state.checked_out.insert(id);
        Some(ConnectionSlot {
            id,
            checked_out_at: Instant::now(),
        })
    }

    fn reject(&self) -> QueryError {
        self.rejections.fetch_add(1, Ordering::Relaxed);
        QueryError::PoolExhausted {
            max: self.max_slots,
        }
    }

    async fn acquire_waiting(&self, max_waiters: usize, wait: Duration) -> Result<ConnectionSlot> {
        if let Some(slot) = self.take_slot() {
            return Ok(slot);
        }
        {
            let mut state = self.state.lock();
            if state.waiters >= max_waiters {
                drop(state);
                return Err(self.reject());
            }
            state.waiters += 1;
        }
        let _waiting = WaiterGuard { arbiter: self };
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let notified = self.released.notified();
            if let Some(slot) = self.take_slot() {
                return Ok(slot);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                // One last look: a release may have raced the deadline.
                return self.take_slot().ok_or_else(|| self.reject());
            }
        }
    }
}

struct WaiterGuard<'a> {
    arbiter: &'a ConnectionArbiter,
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.arbiter.state.lock();
        state.waiters = state.waiters.saturating_sub(1);
    }
}

/// A checked-out slot that is released when the lease is dropped.
pub struct SlotLease<'a> {
    arbiter: &'a ConnectionArbiter,
    slot: Option<ConnectionSlot>,
}

impl SlotLease<'_> {
    /// The leased slot.
    pub fn slot(&self) -> &ConnectionSlot {
        // Only `Drop` takes the slot out.
        self.slot.as_ref().unwrap_or_else(|| unreachable!("lease already released"))
    }
}

impl Drop for SlotLease<'_> {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            self.arbiter.release(slot);
        }
    }
}
