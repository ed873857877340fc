//! Retry with fallback.
//!
//! [`with_fallback`] runs a primary operation under a [`RetryPolicy`]. Only
//! errors the policy's predicate accepts are retried; everything else
//! propagates at once. A [`HealthProbe`] is consulted before every attempt
//! and its failure counts against the same retry budget. Once the budget is
//! spent the fallback operation runs, if one was supplied.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use sysinfo::{CpuRefreshKind, MemoryRefreshKind, RefreshKind, System};
use tracing::{info, warn};

use crate::config::Limits;
use crate::error::{PdfSmithError, Result};

/// Memory usage above this percentage is treated as overload.
pub const MEMORY_CEILING_PERCENT: f64 = 90.0;

/// CPU usage above this percentage is treated as overload.
pub const CPU_CEILING_PERCENT: f32 = 80.0;

/// Delay between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Same delay before every retry.
    Fixed(Duration),
}

impl Backoff {
    /// Delay before retry number `attempt` (1-based).
    pub fn delay(&self, _attempt: u32) -> Duration {
        match self {
            Self::Fixed(delay) => *delay,
        }
    }
}

/// How many times to try, how long to wait, and what is worth retrying.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts of the primary operation.
    pub max_attempts: u32,
    /// Delay between attempts.
    pub backoff: Backoff,
    /// Which errors may be retried.
    pub retryable: fn(&PdfSmithError) -> bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::Fixed(Duration::from_secs(1)),
            retryable: PdfSmithError::is_retryable,
        }
    }
}

impl RetryPolicy {
    /// Policy derived from configured limits.
    pub fn from_limits(limits: &Limits) -> Self {
        Self {
            max_attempts: limits.retry_attempts.max(1),
            backoff: Backoff::Fixed(limits.retry_backoff()),
            ..Default::default()
        }
    }

    /// Policy with no delay between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: Backoff::Fixed(Duration::ZERO),
            ..Default::default()
        }
    }
}

/// Best-effort system pressure check.
pub trait HealthProbe: Send + Sync {
    /// `Err(Overload)` when the system is too busy for heavy work.
    fn check(&self) -> Result<()>;
}

/// Probe that always passes, used when no system information is available.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHealthCheck;

impl HealthProbe for NoHealthCheck {
    fn check(&self) -> Result<()> {
        Ok(())
    }
}

/// Probe backed by `sysinfo` memory and CPU figures.
pub struct SystemHealth {
    system: Mutex<System>,
}

impl SystemHealth {
    /// Create a probe.
    pub fn new() -> Self {
        let system = System::new_with_specifics(
            RefreshKind::nothing()
                .with_memory(MemoryRefreshKind::everything())
                .with_cpu(CpuRefreshKind::everything()),
        );
        Self {
            system: Mutex::new(system),
        }
    }
}

impl Default for SystemHealth {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthProbe for SystemHealth {
    fn check(&self) -> Result<()> {
        // A poisoned probe degrades to a no-op rather than blocking work.
        let Ok(mut system) = self.system.lock() else {
            return Ok(());
        };
        system.refresh_memory();
        system.refresh_cpu_usage();

        let total = system.total_memory();
        if total > 0 {
            let used_percent = system.used_memory() as f64 / total as f64 * 100.0;
            if used_percent > MEMORY_CEILING_PERCENT {
                return Err(PdfSmithError::overload(format!(
                    "system memory is {used_percent:.0}% used"
                )));
            }
        }

        let cpu = system.global_cpu_usage();
        if cpu > CPU_CEILING_PERCENT {
            return Err(PdfSmithError::overload(format!("CPU is {cpu:.0}% busy")));
        }
        Ok(())
    }
}

/// Run `primary` under `policy`, falling back to `fallback` once retries are
/// exhausted.
///
/// # Errors
///
/// Non-retryable errors from `primary` are returned immediately. Without a
/// fallback the last retryable error is returned. With one, the fallback's
/// own result is returned.
pub async fn with_fallback<T, P, PF, F, FF>(
    policy: &RetryPolicy,
    probe: &dyn HealthProbe,
    mut primary: P,
    fallback: Option<F>,
) -> Result<T>
where
    P: FnMut() -> PF,
    PF: Future<Output = Result<T>>,
    F: FnOnce() -> FF,
    FF: Future<Output = Result<T>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut last_error = None;

    for attempt in 1..=attempts {
        let outcome = match probe.check() {
            Ok(()) => primary().await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(value) => return Ok(value),
            Err(e) if !(policy.retryable)(&e) => return Err(e),
            Err(e) => {
                if attempt < attempts {
                    info!(attempt, error = %e, "attempt failed, retrying");
                    tokio::time::sleep(policy.backoff.delay(attempt)).await;
                }
                last_error = Some(e);
            }
        }
    }

    let last_error =
        last_error.unwrap_or_else(|| PdfSmithError::other("operation made no attempts"));
    match fallback {
        Some(fallback) => {
            warn!(attempts, error = %last_error, "primary operation failed, using fallback");
            fallback().await
        }
        None => Err(last_error),
    }
}
