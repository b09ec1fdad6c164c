//! Adaptive write-concurrency throttle.
//!
//! Embedded-backend writes take a permit from a counting semaphore before
//! touching the database. The throttle watches how many lock errors each
//! write saw and tunes the number of permits:
//!
//! - every [`CHECK_THRESHOLD`] writes the lock percentage of the window is
//!   computed and the window resets
//! - at or below [`UP_THRESHOLD`] percent, capacity grows by one, at most
//!   once per process
//! - otherwise, at or above [`DOWN_THRESHOLD`] percent, capacity shrinks by
//!   one, never below 1
//!
//! Every change is persisted through the [`SettingsStore`] so the next run
//! starts from the tuned value.
//!
//! Shrinking while every permit is held cannot take a permit away
//! immediately. The shortfall is recorded as debt and paid when the next
//! permits are released.

use crate::config::{SettingsStore, WRITER_CAPACITY_KEY};
use crate::{Error, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Writes per tuning window.
pub const CHECK_THRESHOLD: u32 = 50;

/// Lock percentage at or below which capacity may grow.
pub const UP_THRESHOLD: u64 = 5;

/// Lock percentage at or above which capacity shrinks.
pub const DOWN_THRESHOLD: u64 = 5;

/// Safety cap used when the acquire timeout is configured as zero.
const MAX_ACQUIRE_TIMEOUT_MS: u64 = 60_000;

/// Self-tuning counters, guarded by the throttle's mutex.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TuningState {
    /// Current number of concurrent writers allowed.
    pub capacity: usize,
    /// Set once capacity has been raised in this process.
    pub increased: bool,
    /// Writes recorded in the current window.
    pub writes: u32,
    /// Lock errors recorded in the current window.
    pub locks: u64,
}

/// A capacity adjustment made at the end of a tuning window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapacityChange {
    /// Capacity went up to the contained value.
    Increased(usize),
    /// Capacity went down to the contained value.
    Decreased(usize),
}

/// Counting semaphore for embedded-backend writes.
pub struct ConcurrencyThrottle {
    semaphore: Arc<Semaphore>,
    state: Mutex<TuningState>,
    debt: Arc<AtomicUsize>,
    settings: Arc<dyn SettingsStore>,
    acquire_timeout_ms: u64,
}

impl ConcurrencyThrottle {
    /// Creates a throttle.
    ///
    /// A persisted `writer_capacity` setting takes precedence over
    /// `initial_capacity`. Both are clamped to at least 1.
    #[must_use]
    pub fn new(
        initial_capacity: usize,
        settings: Arc<dyn SettingsStore>,
        acquire_timeout_ms: u64,
    ) -> Self {
        let capacity = settings
            .get(WRITER_CAPACITY_KEY)
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(initial_capacity)
            .max(1);

        metrics::gauge!("cache_throttle_capacity").set(capacity as f64);
        tracing::debug!(capacity, "Write throttle initialised");

        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            state: Mutex::new(TuningState {
                capacity,
                increased: false,
                writes: 0,
                locks: 0,
            }),
            debt: Arc::new(AtomicUsize::new(0)),
            settings,
            acquire_timeout_ms,
        }
    }

    /// Current capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.lock_state().capacity
    }

    /// Snapshot of the tuning counters.
    #[must_use]
    pub fn tuning(&self) -> TuningState {
        *self.lock_state()
    }

    /// Permits available right now.
    #[must_use]
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Blocks until a write permit is available.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OperationFailed`] if no permit frees up within the
    /// acquire timeout.
    pub fn acquire(&self) -> Result<WritePermit> {
        let timeout_ms = if self.acquire_timeout_ms == 0 {
            MAX_ACQUIRE_TIMEOUT_MS
        } else {
            self.acquire_timeout_ms
        };
        let timeout = Duration::from_millis(timeout_ms);
        let start = Instant::now();

        loop {
            if let Ok(permit) = Arc::clone(&self.semaphore).try_acquire_owned() {
                return Ok(WritePermit {
                    permit: Some(permit),
                    debt: Arc::clone(&self.debt),
                });
            }

            if start.elapsed() >= timeout {
                metrics::counter!("cache_throttle_timeouts_total").increment(1);
                return Err(Error::OperationFailed {
                    operation: "throttle_acquire".to_string(),
                    cause: format!("write permit acquire timed out after {timeout_ms}ms"),
                });
            }

            std::thread::sleep(Duration::from_millis(1));
        }
    }

    /// Records one completed write and the lock errors it saw.
    ///
    /// Returns the capacity change made when this write closed a window.
    pub fn record_write(&self, locks: u32) -> Option<CapacityChange> {
        let change = {
            let mut state = self.lock_state();
            state.writes += 1;
            state.locks += u64::from(locks);
            if state.writes < CHECK_THRESHOLD {
                return None;
            }

            let lock_percent = state.locks * 100 / u64::from(state.writes);
            state.writes = 0;
            state.locks = 0;

            if lock_percent <= UP_THRESHOLD && !state.increased {
                state.capacity += 1;
                state.increased = true;
                self.grow();
                Some(CapacityChange::Increased(state.capacity))
            } else if lock_percent >= DOWN_THRESHOLD && state.capacity > 1 {
                state.capacity -= 1;
                self.shrink();
                Some(CapacityChange::Decreased(state.capacity))
            } else {
                None
            }
        }?;

        let capacity = match change {
            CapacityChange::Increased(c) | CapacityChange::Decreased(c) => c,
        };
        metrics::gauge!("cache_throttle_capacity").set(capacity as f64);
        tracing::info!(?change, "Write throttle capacity adjusted");
        if let Err(e) = self
            .settings
            .set(WRITER_CAPACITY_KEY, &capacity.to_string())
        {
            tracing::warn!(error = %e, "Failed to persist writer capacity");
        }
        Some(change)
    }

    fn grow(&self) {
        let paid = self
            .debt
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |d| d.checked_sub(1))
            .is_ok();
        if !paid {
            self.semaphore.add_permits(1);
        }
    }

    fn shrink(&self) {
        if self.semaphore.forget_permits(1) == 0 {
            self.debt.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, TuningState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A held write permit. Released on drop.
pub struct WritePermit {
    permit: Option<OwnedSemaphorePermit>,
    debt: Arc<AtomicUsize>,
}

impl Drop for WritePermit {
    fn drop(&mut self) {
        let Some(permit) = self.permit.take() else {
            return;
        };
        let owed = self
            .debt
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |d| d.checked_sub(1))
            .is_ok();
        if owed {
            permit.forget();
        }
    }
}
