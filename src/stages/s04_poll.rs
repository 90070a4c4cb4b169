//! Wait for the installer to power the VM off.
//!
//! The install is driven by a human over VNC, so its duration is unknown.
//! The wait is bounded by a configurable timeout (or unbounded when none is
//! set), can be cancelled, and reports a timeout as its own outcome.

use std::time::Duration;
use thiserror::Error;

use crate::backend::{Clock, VmInventory, VmState};
use crate::config::PollConfig;
use crate::signal::CancelToken;

/// Tunables for [`wait_for_stopped`].
#[derive(Debug, Clone, PartialEq)]
pub struct PollSettings {
    pub interval: Duration,
    /// Interval multiplier applied after each poll; 1.0 keeps it fixed.
    pub backoff: f64,
    pub max_interval: Duration,
    /// `None` waits forever.
    pub timeout: Option<Duration>,
    /// Applied once after `stopped` so the disk is fully released.
    pub settle: Duration,
}

impl From<&PollConfig> for PollSettings {
    fn from(config: &PollConfig) -> Self {
        Self {
            interval: config.interval(),
            backoff: config.backoff,
            max_interval: config.max_interval(),
            timeout: config.timeout(),
            settle: config.settle(),
        }
    }
}

impl PollSettings {
    fn next_interval(&self, current: Duration) -> Duration {
        current.mul_f64(self.backoff).min(self.max_interval)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollReport {
    pub polls: u32,
    /// Time until `stopped` was observed, settle delay excluded.
    pub waited: Duration,
}

#[derive(Debug, Error)]
pub enum PollError {
    #[error("VM {uuid} did not stop within {}s (last state: {last_state})", .timeout.as_secs())]
    TimedOut {
        uuid: String,
        timeout: Duration,
        last_state: VmState,
    },
    #[error("waiting for VM {uuid} to stop was cancelled")]
    Cancelled { uuid: String },
    #[error("querying state of VM {uuid} failed")]
    Query {
        uuid: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Poll the VM state until it reads `stopped`, then apply the settle delay.
///
/// A failed state query ends the wait immediately; it is not retried.
pub fn wait_for_stopped(
    inventory: &dyn VmInventory,
    clock: &dyn Clock,
    uuid: &str,
    settings: &PollSettings,
    cancel: &CancelToken,
) -> Result<PollReport, PollError> {
    let start = clock.now();
    let mut interval = settings.interval;
    let mut polls = 0u32;
    let mut last: Option<VmState> = None;

    loop {
        if cancel.is_cancelled() {
            return Err(PollError::Cancelled {
                uuid: uuid.to_string(),
            });
        }

        let state = inventory.state(uuid).map_err(|source| PollError::Query {
            uuid: uuid.to_string(),
            source,
        })?;
        polls += 1;

        if last.as_ref() != Some(&state) {
            println!("  VM {} is {}", uuid, state);
        }
        if state == VmState::Stopped {
            break;
        }

        let elapsed = clock.now().saturating_duration_since(start);
        let sleep_for = match settings.timeout {
            Some(timeout) if elapsed >= timeout => {
                return Err(PollError::TimedOut {
                    uuid: uuid.to_string(),
                    timeout,
                    last_state: state,
                });
            }
            Some(timeout) => interval.min(timeout - elapsed),
            None => interval,
        };
        last = Some(state);

        tracing::trace!(vm = uuid, polls, ?sleep_for, "VM not stopped yet");
        clock.sleep(sleep_for);
        interval = settings.next_interval(interval);
    }

    let waited = clock.now().saturating_duration_since(start);
    tracing::debug!(vm = uuid, polls, ?waited, "VM stopped; settling");
    clock.sleep(settings.settle);

    Ok(PollReport { polls, waited })
}
