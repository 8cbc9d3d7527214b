//! Cancellation handles
//!
//! A [`CancelHandle`] is shared between the caller and a running generation.
//! The caller may cancel explicitly or attach a deadline; provider clients
//! check it before each HTTP request and sleep on it between polls so a
//! cancelled generation stops without starting another poll iteration.
//! Blocking requests run through [`CancelHandle::run_blocking`], which hands
//! control back to the caller as soon as the handle fires.

use drape_core::{DrapeError, Result};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// How often a caller blocked in `run_blocking` re-checks the handle
const WATCH_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Default)]
struct CancelState {
    cancelled: Mutex<bool>,
    wake: Condvar,
}

/// Cloneable cancellation signal with an optional deadline
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    state: Arc<CancelState>,
    deadline: Option<Instant>,
}

impl CancelHandle {
    /// A handle that is never cancelled unless [`cancel`](Self::cancel) is called
    pub fn new() -> Self {
        Self::default()
    }

    /// A handle that cancels itself once `timeout` has elapsed
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            state: Arc::default(),
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// Request cancellation and wake any sleeping poll loop
    pub fn cancel(&self) {
        let mut cancelled = self.lock();
        *cancelled = true;
        self.state.wake.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.lock() || self.deadline_passed()
    }

    /// `Err(Cancelled)` once cancellation has been observed
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(DrapeError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Time left before the deadline, if one is set
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Clamp a per-request timeout so it never outlives the deadline
    pub fn clamp(&self, timeout: Duration) -> Duration {
        match self.remaining() {
            Some(left) => timeout.min(left),
            None => timeout,
        }
    }

    /// Sleep for `duration`, returning early with `Err(Cancelled)` if the
    /// handle is cancelled or the deadline passes first.
    pub fn sleep(&self, duration: Duration) -> Result<()> {
        let wake_at = Instant::now() + duration;
        let mut cancelled = self.lock();
        loop {
            if *cancelled || self.deadline_passed() {
                return Err(DrapeError::Cancelled);
            }
            let now = Instant::now();
            if now >= wake_at {
                return Ok(());
            }
            let mut wait = wake_at - now;
            if let Some(left) = self.remaining() {
                // wake up at the deadline to report it
                wait = wait.min(left + Duration::from_millis(1));
            }
            cancelled = match self.state.wake.wait_timeout(cancelled, wait) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    /// Run `op` on a helper thread and wait for it, returning
    /// `Err(Cancelled)` as soon as the handle fires.
    ///
    /// An abandoned `op` keeps running until its own timeout ends it; its
    /// result is dropped.
    pub fn run_blocking<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.check()?;
        let (tx, rx) = mpsc::channel();
        thread::Builder::new()
            .name("drape-request".to_string())
            .spawn(move || {
                // receiver is gone if the caller was cancelled
                let _ = tx.send(op());
            })?;

        loop {
            match rx.recv_timeout(WATCH_INTERVAL) {
                Ok(value) => return Ok(value),
                Err(RecvTimeoutError::Timeout) => self.check()?,
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(DrapeError::Io(std::io::Error::new(
                        std::io::ErrorKind::Other,
                        "request thread exited without a result",
                    )))
                }
            }
        }
    }

    fn deadline_passed(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, bool> {
        self.state
            .cancelled
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_fresh_handle_not_cancelled() {
        let handle = CancelHandle::new();
        assert!(!handle.is_cancelled());
        assert!(handle.check().is_ok());
        assert!(handle.remaining().is_none());
    }

    #[test]
    fn test_cancel_is_shared_across_clones() {
        let handle = CancelHandle::new();
        let clone = handle.clone();
        clone.cancel();
        assert!(handle.is_cancelled());
        assert!(matches!(handle.check(), Err(DrapeError::Cancelled)));
    }

    #[test]
    fn test_sleep_completes_without_cancel() {
        let handle = CancelHandle::new();
        let start = Instant::now();
        handle.sleep(Duration::from_millis(20)).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_cancel_wakes_sleeper() {
        let handle = CancelHandle::new();
        let remote = handle.clone();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            remote.cancel();
        });

        let start = Instant::now();
        let result = handle.sleep(Duration::from_secs(30));
        assert!(matches!(result, Err(DrapeError::Cancelled)));
        assert!(start.elapsed() < Duration::from_secs(5));
        canceller.join().unwrap();
    }

    #[test]
    fn test_deadline_interrupts_sleep() {
        let handle = CancelHandle::with_timeout(Duration::from_millis(30));
        let start = Instant::now();
        assert!(handle.sleep(Duration::from_secs(30)).is_err());
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(handle.is_cancelled());
    }

    #[test]
    fn test_run_blocking_returns_value() {
        let value = CancelHandle::new().run_blocking(|| 6 * 7).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn test_run_blocking_abandons_stuck_work() {
        let handle = CancelHandle::new();
        let remote = handle.clone();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            remote.cancel();
        });

        let start = Instant::now();
        let result = handle.run_blocking(|| thread::sleep(Duration::from_secs(30)));
        assert!(matches!(result, Err(DrapeError::Cancelled)));
        assert!(start.elapsed() < Duration::from_secs(5));
        canceller.join().unwrap();
    }

    #[test]
    fn test_run_blocking_honours_deadline() {
        let handle = CancelHandle::with_timeout(Duration::from_millis(50));
        let result = handle.run_blocking(|| thread::sleep(Duration::from_secs(30)));
        assert!(matches!(result, Err(DrapeError::Cancelled)));
    }

    #[test]
    fn test_clamp_respects_deadline() {
        let handle = CancelHandle::with_timeout(Duration::from_secs(2));
        assert!(handle.clamp(Duration::from_secs(60)) <= Duration::from_secs(2));
        assert_eq!(
            CancelHandle::new().clamp(Duration::from_secs(60)),
            Duration::from_secs(60)
        );
    }
}
