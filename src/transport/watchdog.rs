//! # Timeout Watchdog
//!
//! Background deadline enforcement for blocking network operations. Each
//! guarded operation gets its own short-lived watchdog task; there is no
//! global timer thread. The task sleeps in ~100 ms increments, re-checking
//! the operation's completion flag and the elapsed time; on expiry it runs a
//! corrective callback exactly once (typically: log, close the socket) and
//! exits.
//!
//! Cancellation is cooperative: the watchdog cannot interrupt an in-flight
//! system call, so a deadline is a race between the real operation
//! completing and the watchdog firing. Guarded callers race the two with
//! `tokio::select!` on [`WatchdogGuard::expired`]. Both outcomes are
//! idempotent: completing after expiry and expiring after completion are
//! no-ops, and the corrective callback can never run twice.
//!
//! A `None` (or zero) deadline arms nothing: the operation may block
//! forever, which is the synchronous code path's contract.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tracing::trace;

/// Re-check interval for armed watchdogs.
const TICK: Duration = Duration::from_millis(100);

#[derive(Debug)]
struct GuardState {
    completed: AtomicBool,
    expired: AtomicBool,
    notify: Notify,
}

/// Handle held by the guarded operation. Dropping the guard marks the
/// operation complete, so an early return can never leak a live timer.
#[derive(Debug)]
pub struct WatchdogGuard {
    state: Option<Arc<GuardState>>,
}

impl WatchdogGuard {
    /// A guard that never expires, for the block-forever path.
    pub fn disarmed() -> Self {
        Self { state: None }
    }

    /// Mark the guarded operation successful. The watchdog task observes the
    /// flag on its next tick and exits without firing.
    pub fn complete(&self) {
        if let Some(state) = &self.state {
            state.completed.store(true, Ordering::Release);
        }
    }

    /// Whether the deadline already fired.
    pub fn is_expired(&self) -> bool {
        self.state
            .as_ref()
            .is_some_and(|s| s.expired.load(Ordering::Acquire))
    }

    /// Resolves when the deadline fires; pends forever for a disarmed guard.
    pub async fn expired(&self) {
        match &self.state {
            Some(state) => {
                if state.expired.load(Ordering::Acquire) {
                    return;
                }
                state.notify.notified().await;
            }
            None => std::future::pending().await,
        }
    }
}

impl Drop for WatchdogGuard {
    fn drop(&mut self) {
        self.complete();
    }
}

/// Arm a watchdog for one operation. `on_expire` runs at most once, from the
/// watchdog task, if `deadline` elapses before [`WatchdogGuard::complete`].
pub fn arm<F>(deadline: Option<Duration>, on_expire: F) -> WatchdogGuard
where
    F: FnOnce() + Send + 'static,
{
    let deadline = match deadline {
        Some(d) if !d.is_zero() => d,
        _ => return WatchdogGuard::disarmed(),
    };

    let state = Arc::new(GuardState {
        completed: AtomicBool::new(false),
        expired: AtomicBool::new(false),
        notify: Notify::new(),
    });

    let task_state = Arc::clone(&state);
    tokio::spawn(async move {
        let started = Instant::now();
        loop {
            tokio::time::sleep(TICK.min(deadline)).await;
            if task_state.completed.load(Ordering::Acquire) {
                trace!("watchdog: operation completed before deadline");
                return;
            }
            if started.elapsed() >= deadline {
                if !task_state.expired.swap(true, Ordering::AcqRel) {
                    on_expire();
                    task_state.notify.notify_one();
                }
                return;
            }
        }
    });

    WatchdogGuard {
        state: Some(state),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[tokio::test]
    async fn test_completed_guard_never_fires() {
        let fired = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&fired);
        let guard = arm(Some(Duration::from_millis(150)), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        guard.complete();
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(!guard.is_expired());
    }

    #[tokio::test]
    async fn test_expiry_fires_exactly_once() {
        let fired = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&fired);
        let guard = arm(Some(Duration::from_millis(100)), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        guard.expired().await;
        assert!(guard.is_expired());
        // completing after expiry changes nothing
        guard.complete();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_zero_deadline_disables_guard() {
        let guard = arm(Some(Duration::ZERO), || panic!("must not fire"));
        assert!(!guard.is_expired());
        let none = arm(None, || panic!("must not fire"));
        tokio::select! {
            _ = none.expired() => panic!("disarmed guard resolved"),
            _ = tokio::time::sleep(Duration::from_millis(250)) => {}
        }
        drop(guard);
    }

    #[tokio::test]
    async fn test_drop_completes_guard() {
        let fired = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&fired);
        {
            let _guard = arm(Some(Duration::from_millis(100)), move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
