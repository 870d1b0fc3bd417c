use std::fmt;
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::warn;

use crate::config::TransferConfig;
use crate::transfer::pool::CancelToken;

const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// Bounded retry with doubling backoff and random jitter on top.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub attempts: u32,
    pub initial_backoff: Duration,
    /// Upper bound of the random extra delay, as a percentage of the backoff.
    pub max_jitter_percent: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&TransferConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(cfg: &TransferConfig) -> Self {
        Self {
            attempts: cfg.attempts.max(1),
            initial_backoff: Duration::from_millis(cfg.initial_backoff_ms),
            max_jitter_percent: cfg.max_jitter_percent,
        }
    }

    /// Backoff before retry number `retry` (0 for the first retry).
    pub fn backoff(&self, retry: u32) -> Duration {
        self.initial_backoff
            .saturating_mul(2u32.saturating_pow(retry.min(16)))
    }

    pub fn delay(&self, retry: u32) -> Duration {
        let base = self.backoff(retry);
        let max_jitter_ms = base.as_millis() as u64 * u64::from(self.max_jitter_percent) / 100;
        if max_jitter_ms == 0 {
            return base;
        }
        base + Duration::from_millis(rand::thread_rng().gen_range(0..=max_jitter_ms))
    }
}

/// Result of a single attempt that did not succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptError {
    Retryable { status: Option<u16>, message: String },
    Terminal { status: Option<u16>, message: String },
}

impl AttemptError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable { .. })
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Retryable { status, .. } | Self::Terminal { status, .. } => *status,
        }
    }
}

impl fmt::Display for AttemptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (Self::Retryable { status, message } | Self::Terminal { status, message }) = self;
        match status {
            Some(s) => write!(f, "status {s}: {message}"),
            None => f.write_str(message),
        }
    }
}

#[derive(Debug)]
pub enum Retried<T> {
    Done { value: T, attempts: u32 },
    Failed { attempts: u32, error: AttemptError },
    Cancelled { attempts: u32 },
}

/// Calls `attempt` until it succeeds, fails terminally, runs out of attempts,
/// or `cancel` fires. The token is checked before every attempt and while
/// sleeping between attempts.
pub fn run<T>(
    policy: &RetryPolicy,
    cancel: &CancelToken,
    label: &str,
    mut attempt: impl FnMut(u32) -> Result<T, AttemptError>,
) -> Retried<T> {
    let max = policy.attempts.max(1);
    let mut n = 0;
    loop {
        if cancel.is_cancelled() {
            return Retried::Cancelled { attempts: n };
        }
        n += 1;
        let err = match attempt(n) {
            Ok(value) => return Retried::Done { value, attempts: n },
            Err(e) => e,
        };
        if !err.is_retryable() || n >= max {
            return Retried::Failed {
                attempts: n,
                error: err,
            };
        }
        let delay = policy.delay(n - 1);
        warn!(
            task = label,
            attempt = n,
            max_attempts = max,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "transfer attempt failed, retrying"
        );
        if !sleep_unless_cancelled(delay, cancel) {
            return Retried::Cancelled { attempts: n };
        }
    }
}

fn sleep_unless_cancelled(total: Duration, cancel: &CancelToken) -> bool {
    let deadline = Instant::now() + total;
    loop {
        if cancel.is_cancelled() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        std::thread::sleep((deadline - now).min(SLEEP_SLICE));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            initial_backoff: Duration::from_millis(1),
            max_jitter_percent: 0,
        }
    }

    fn retryable(status: u16) -> AttemptError {
        AttemptError::Retryable {
            status: Some(status),
            message: "unavailable".into(),
        }
    }

    #[test]
    fn backoff_doubles_and_jitter_stays_bounded() {
        let p = RetryPolicy::default();
        assert_eq!(p.backoff(0), Duration::from_secs(1));
        assert_eq!(p.backoff(1), Duration::from_secs(2));
        assert_eq!(p.backoff(2), Duration::from_secs(4));
        for _ in 0..50 {
            let d = p.delay(1);
            assert!(d >= Duration::from_secs(2));
            assert!(d <= Duration::from_secs(3));
        }
    }

    #[test]
    fn succeeds_after_retryable_failures() {
        let mut calls = 0;
        let out = run(&fast(3), &CancelToken::new(), "t", |_| {
            calls += 1;
            if calls < 3 { Err(retryable(503)) } else { Ok("body") }
        });
        match out {
            Retried::Done { value, attempts } => {
                assert_eq!(value, "body");
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn terminal_error_stops_immediately() {
        let mut calls = 0;
        let out: Retried<()> = run(&fast(3), &CancelToken::new(), "t", |_| {
            calls += 1;
            Err(AttemptError::Terminal {
                status: Some(404),
                message: "not found".into(),
            })
        });
        assert_eq!(calls, 1);
        assert!(matches!(out, Retried::Failed { attempts: 1, .. }));
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let mut calls = 0;
        let out: Retried<()> = run(&fast(3), &CancelToken::new(), "t", |_| {
            calls += 1;
            Err(retryable(500))
        });
        assert_eq!(calls, 3);
        match out {
            Retried::Failed { attempts, error } => {
                assert_eq!(attempts, 3);
                assert_eq!(error.status(), Some(500));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn cancelled_token_prevents_first_attempt() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut calls = 0;
        let out: Retried<()> = run(&fast(3), &cancel, "t", |_| {
            calls += 1;
            Ok(())
        });
        assert_eq!(calls, 0);
        assert!(matches!(out, Retried::Cancelled { attempts: 0 }));
    }
}
