//! Bounded status polling.
//!
//! Instruments report readiness through status queries (`*OPC?`, interrupt
//! registers) that have to be polled. Every poll loop here has a deadline and
//! fails with [`SweepError::Timeout`] when it passes.

use crate::config::SweepConfig;
use crate::error::{SweepError, SweepResult};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Poll interval and deadlines used by the instrument wrappers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    /// Deadline for an operation-complete confirmation
    pub opc_timeout: Duration,
    /// Deadline for a single acquisition
    pub acquisition_timeout: Duration,
}

impl PollSettings {
    pub fn from_sweep(sweep: &SweepConfig) -> Self {
        Self {
            interval: sweep.poll_interval,
            opc_timeout: sweep.opc_timeout,
            acquisition_timeout: sweep.acquisition_timeout,
        }
    }
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(10),
            opc_timeout: Duration::from_secs(10),
            acquisition_timeout: Duration::from_secs(60),
        }
    }
}

/// Call `probe` every `interval` until it returns `true`.
///
/// The probe is always called at least once. Errors from the probe end the
/// loop immediately.
pub async fn poll_until<F, Fut>(
    what: &str,
    interval: Duration,
    deadline: Duration,
    mut probe: F,
) -> SweepResult<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = SweepResult<bool>>,
{
    let start = Instant::now();
    loop {
        if probe().await? {
            return Ok(());
        }
        let elapsed = start.elapsed();
        if elapsed >= deadline {
            return Err(SweepError::Timeout {
                what: what.to_string(),
                elapsed,
            });
        }
        tokio::time::sleep(interval).await;
    }
}
