//! One-shot timers for idle eviction.
//!
//! The pool only needs four operations: schedule a callback once after a
//! delay, and later enable, disable, or cancel it. [`TokioScheduler`] backs
//! them with tokio tasks.

use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Handle to a scheduled callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer-{}", self.0)
    }
}

/// Callback run when a timer fires. May run again after re-enabling.
pub type TimerCallback = Arc<dyn Fn() + Send + Sync>;

/// Event-loop timer service.
///
/// Implementations must not hold internal locks while running a callback;
/// callbacks re-enter the pool.
pub trait Scheduler: Send + Sync {
    /// Run `callback` once after `delay`.
    fn schedule_once(&self, delay: Duration, callback: TimerCallback) -> TimerId;

    /// Re-arm a timer so it fires `delay` from now. No-op if it is already
    /// armed or was cancelled.
    fn enable(&self, id: TimerId);

    /// Stop a timer from firing, keeping it available for `enable`.
    fn disable(&self, id: TimerId);

    /// Stop and forget a timer.
    fn cancel(&self, id: TimerId);
}

impl<S: Scheduler + ?Sized> Scheduler for Arc<S> {
    fn schedule_once(&self, delay: Duration, callback: TimerCallback) -> TimerId {
        (**self).schedule_once(delay, callback)
    }

    fn enable(&self, id: TimerId) {
        (**self).enable(id)
    }

    fn disable(&self, id: TimerId) {
        (**self).disable(id)
    }

    fn cancel(&self, id: TimerId) {
        (**self).cancel(id)
    }
}

struct TimerSlot {
    delay: Duration,
    callback: TimerCallback,
    /// Bumped on every arm so a stale task can tell it was superseded.
    generation: u64,
    task: Option<JoinHandle<()>>,
}

/// Scheduler running each armed timer as a tokio task.
///
/// A fired timer stays registered until cancelled, so it can be re-enabled.
/// Must be used from within a Tokio runtime.
#[derive(Clone, Default)]
pub struct TokioScheduler {
    timers: Arc<DashMap<TimerId, TimerSlot>>,
    next_id: Arc<AtomicU64>,
}

impl TokioScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered (armed or disabled) timers.
    pub fn timer_count(&self) -> usize {
        self.timers.len()
    }

    /// Number of timers currently waiting to fire.
    pub fn armed_count(&self) -> usize {
        self.timers.iter().filter(|slot| slot.task.is_some()).count()
    }

    fn arm(&self, id: TimerId, slot: &mut TimerSlot) {
        slot.generation += 1;
        let generation = slot.generation;
        // The deadline counts from arming, not from the task's first poll.
        let deadline = Instant::now() + slot.delay;
        let timers = Arc::clone(&self.timers);

        slot.task = Some(tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;

            let callback = {
                let Some(mut slot) = timers.get_mut(&id) else {
                    return;
                };
                if slot.generation != generation || slot.task.is_none() {
                    return;
                }
                slot.task = None;
                Arc::clone(&slot.callback)
            };

            tracing::trace!(timer = %id, "timer fired");
            callback();
        }));
    }
}

impl Scheduler for TokioScheduler {
    fn schedule_once(&self, delay: Duration, callback: TimerCallback) -> TimerId {
        let id = TimerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.timers.insert(id, TimerSlot { delay, callback, generation: 0, task: None });
        if let Some(mut slot) = self.timers.get_mut(&id) {
            self.arm(id, &mut slot);
        }
        id
    }

    fn enable(&self, id: TimerId) {
        if let Some(mut slot) = self.timers.get_mut(&id) {
            if slot.task.is_none() {
                self.arm(id, &mut slot);
            }
        }
    }

    fn disable(&self, id: TimerId) {
        if let Some(mut slot) = self.timers.get_mut(&id) {
            if let Some(task) = slot.task.take() {
                task.abort();
            }
        }
    }

    fn cancel(&self, id: TimerId) {
        if let Some((_, slot)) = self.timers.remove(&id) {
            if let Some(task) = slot.task {
                task.abort();
            }
        }
    }
}

impl fmt::Debug for TokioScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokioScheduler").field("timer_count", &self.timers.len()).finish()
    }
}
