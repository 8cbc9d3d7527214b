//! Fixed-interval job polling
//!
//! The polling family of providers submit a job, then report progress through
//! a status endpoint. The loop here sleeps a fixed interval before every
//! status check (no backoff), stops immediately on a provider-reported
//! failure, and gives up with [`DrapeError::Timeout`] once the attempt budget
//! is spent.

use crate::cancel::CancelHandle;
use drape_core::{DrapeError, ProviderKind, Result};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Interval and attempt budget for one provider's status polling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl PollPolicy {
    /// 5s x 60 attempts (about 5 minutes), for fast-turnaround providers
    pub const FAST: PollPolicy = PollPolicy {
        interval: Duration::from_secs(5),
        max_attempts: 60,
    };

    /// 10s x 180 attempts (about 30 minutes), for capture and splatting pipelines
    pub const LONG_RUNNING: PollPolicy = PollPolicy {
        interval: Duration::from_secs(10),
        max_attempts: 180,
    };

    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }
}

/// Normalized job state reported by one status check
#[derive(Debug, Clone, PartialEq)]
pub enum JobState<T> {
    /// Not terminal yet; carries the provider's raw status literal
    Pending(String),
    Succeeded(T),
    Failed(String),
}

/// Poll `check` until the job reaches a terminal state.
///
/// `check` receives the 1-based attempt number. Errors it returns (transport
/// failures that survived retries, malformed status bodies) abort the loop.
pub fn poll_until<T>(
    provider: ProviderKind,
    job_id: &str,
    policy: PollPolicy,
    cancel: &CancelHandle,
    mut check: impl FnMut(u32) -> Result<JobState<T>>,
) -> Result<T> {
    let started = Instant::now();
    for attempt in 1..=policy.max_attempts {
        cancel.sleep(policy.interval)?;
        cancel.check()?;

        match check(attempt)? {
            JobState::Pending(status) => {
                debug!(%provider, job_id, attempt, status = %status, "job pending");
            }
            JobState::Succeeded(output) => {
                info!(
                    %provider,
                    job_id,
                    attempt,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "job succeeded"
                );
                return Ok(output);
            }
            JobState::Failed(message) => {
                return Err(DrapeError::ProviderFailed {
                    provider: provider.to_string(),
                    message,
                });
            }
        }
    }

    Err(DrapeError::Timeout {
        provider: provider.to_string(),
        attempts: policy.max_attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn quick(max_attempts: u32) -> PollPolicy {
        PollPolicy::new(Duration::from_millis(1), max_attempts)
    }

    #[test]
    fn test_policies_match_provider_budgets() {
        assert_eq!(PollPolicy::FAST.interval, Duration::from_secs(5));
        assert_eq!(PollPolicy::FAST.max_attempts, 60);
        assert_eq!(PollPolicy::LONG_RUNNING.interval, Duration::from_secs(10));
        assert_eq!(PollPolicy::LONG_RUNNING.max_attempts, 180);
    }

    #[test]
    fn test_returns_output_on_success() {
        let out = poll_until(ProviderKind::Replicate, "job", quick(10), &CancelHandle::new(), |n| {
            Ok(if n < 3 {
                JobState::Pending("processing".to_string())
            } else {
                JobState::Succeeded(n)
            })
        })
        .unwrap();
        assert_eq!(out, 3);
    }

    #[test]
    fn test_failure_aborts_immediately() {
        let calls = Cell::new(0);
        let err = poll_until::<()>(ProviderKind::Luma, "job", quick(10), &CancelHandle::new(), |_| {
            calls.set(calls.get() + 1);
            Ok(JobState::Failed("capture rejected".to_string()))
        })
        .unwrap_err();
        assert_eq!(calls.get(), 1);
        match err {
            DrapeError::ProviderFailed { message, .. } => assert_eq!(message, "capture rejected"),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_exhaustion_is_timeout_not_failure() {
        let calls = Cell::new(0);
        let err = poll_until::<()>(
            ProviderKind::GaussianSplatting,
            "job",
            quick(4),
            &CancelHandle::new(),
            |_| {
                calls.set(calls.get() + 1);
                Ok(JobState::Pending("running".to_string()))
            },
        )
        .unwrap_err();
        assert_eq!(calls.get(), 4);
        assert!(matches!(err, DrapeError::Timeout { attempts: 4, .. }));
    }

    #[test]
    fn test_check_error_propagates() {
        let err = poll_until::<()>(
            ProviderKind::Replicate,
            "job",
            quick(5),
            &CancelHandle::new(),
            |_| Err(DrapeError::invalid_response("replicate", "no status")),
        )
        .unwrap_err();
        assert!(matches!(err, DrapeError::InvalidResponse { .. }));
    }

    #[test]
    fn test_no_iteration_after_cancel() {
        let cancel = CancelHandle::new();
        let calls = Cell::new(0);
        let err = poll_until::<()>(ProviderKind::Replicate, "job", quick(100), &cancel, |n| {
            calls.set(calls.get() + 1);
            if n == 2 {
                cancel.cancel();
            }
            Ok(JobState::Pending("processing".to_string()))
        })
        .unwrap_err();
        assert!(matches!(err, DrapeError::Cancelled));
        assert_eq!(calls.get(), 2);
    }
}
