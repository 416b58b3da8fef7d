use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, trace};

use super::grammar::Recurrence;

/// Handle to a recurring timer started with [`spawn_timer`].
#[derive(Debug)]
pub struct TimerHandle {
    // Held for the whole of every tick; `true` once cancelled.
    gate: Arc<Mutex<bool>>,
    task: JoinHandle<()>,
}

impl TimerHandle {
    /// Stops the timer. Waits for a tick running on another worker to
    /// finish, and no tick starts after this returns.
    ///
    /// Must not be called from inside the timer's own tick.
    pub fn cancel(&self) {
        *lock(&self.gate) = true;
        self.task.abort();
    }

    pub fn is_cancelled(&self) -> bool {
        *lock(&self.gate)
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Runs `tick` at every fire time of `recurrence` on the given runtime.
///
/// Fire times are computed on a timeline anchored at the wall clock when the
/// timer starts and advanced by the runtime's clock, so the timer follows
/// tokio's paused time in tests.
pub fn spawn_timer<F>(runtime: &Handle, recurrence: Arc<dyn Recurrence>, tick: F) -> TimerHandle
where
    F: Fn() + Send + Sync + 'static,
{
    let gate = Arc::new(Mutex::new(false));
    let ticking = Arc::clone(&gate);
    let task = runtime.spawn(async move {
        let clock = Timeline::start();
        loop {
            let Some(next) = recurrence.next_after(clock.now()) else {
                debug!(target: "scheduler", ?recurrence, "recurrence exhausted");
                break;
            };
            sleep_until(clock.deadline(next)).await;
            let cancelled = lock(&ticking);
            if *cancelled {
                break;
            }
            trace!(target: "scheduler", fire_time = %next, "timer tick");
            tick();
            drop(cancelled);
        }
    });
    TimerHandle { gate, task }
}

fn lock(gate: &Mutex<bool>) -> MutexGuard<'_, bool> {
    gate.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Timeline {
    origin: Instant,
    wall_origin: DateTime<Utc>,
}

impl Timeline {
    fn start() -> Self {
        Self {
            origin: Instant::now(),
            wall_origin: Utc::now(),
        }
    }

    fn now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.origin.elapsed()).unwrap_or_default();
        self.wall_origin + elapsed
    }

    fn deadline(&self, at: DateTime<Utc>) -> Instant {
        let offset = (at - self.wall_origin).to_std().unwrap_or_default();
        self.origin + offset
    }
}
