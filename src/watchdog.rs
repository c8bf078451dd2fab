//! Single-shot cancellation timer guarding one execution.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::driver::CancelHandle;

const ARMED: u8 = 0;
const DISARMED: u8 = 1;
const FIRED: u8 = 2;

/// How an armed watchdog ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogOutcome {
    /// Never armed (no deadline).
    Idle,
    /// Stopped before the deadline; no side effects.
    Disarmed,
    /// The deadline passed first and the connection was cancelled.
    Fired(Duration),
}

/// Timer that cancels the in-flight driver call when the deadline passes.
///
/// Whoever moves the shared state out of `ARMED` first wins, so a disarm racing the
/// timer either sees a clean stop or a completed cancellation, never half of one.
/// Dropping the watchdog disarms it.
pub struct Watchdog {
    deadline: Option<Duration>,
    state: Arc<AtomicU8>,
    stop: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl Watchdog {
    /// Start the timer. Must be called from within a tokio runtime.
    #[must_use]
    pub fn arm(deadline: Option<Duration>, canceller: Arc<dyn CancelHandle>) -> Self {
        let state = Arc::new(AtomicU8::new(ARMED));
        let stop = CancellationToken::new();
        let Some(interval) = deadline else {
            return Self {
                deadline,
                state,
                stop,
                task: None,
            };
        };

        tracing::debug!("SQL execution started with timeout {} seconds", interval.as_secs_f64());
        let task_state = Arc::clone(&state);
        let task_stop = stop.clone();
        let task = tokio::spawn(async move {
            tokio::select! {
                () = task_stop.cancelled() => {}
                () = tokio::time::sleep(interval) => {
                    if task_state
                        .compare_exchange(ARMED, FIRED, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        tracing::warn!(
                            "SQL execution timeout {} seconds exceeded, cancelling",
                            interval.as_secs_f64()
                        );
                        canceller.cancel();
                    }
                }
            }
        });

        Self {
            deadline,
            state,
            stop,
            task: Some(task),
        }
    }

    /// Stop the timer and report whether it fired first.
    pub fn disarm(mut self) -> WatchdogOutcome {
        self.stop_timer()
    }

    fn stop_timer(&mut self) -> WatchdogOutcome {
        let Some(task) = self.task.take() else {
            return WatchdogOutcome::Idle;
        };
        self.stop.cancel();
        task.abort();
        match self
            .state
            .compare_exchange(ARMED, DISARMED, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) | Err(DISARMED) => {
                tracing::debug!("SQL execution finished before its timeout");
                WatchdogOutcome::Disarmed
            }
            Err(_) => WatchdogOutcome::Fired(self.deadline.unwrap_or_default()),
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        let _ = self.stop_timer();
    }
}
