use std::thread;
use std::time::Duration;

use log::{trace, warn};

use crate::error::DfuError;
use crate::status::{DeviceState, StatusRecord};
use crate::transport::DfuTransport;

/// Status queries per wait before giving up. Bounds the total wall-clock
/// wait without hard-coding a duration: each device reports its own
/// per-step poll timeout.
const MAX_POLL_ATTEMPTS: u32 = 500;

/// Minimum sleep between queries; keeps a device that reports a zero poll
/// timeout from turning the wait into a tight loop.
const POLL_FLOOR: Duration = Duration::from_millis(10);

/// Sleep while dfuDNBUSY when the device reports no timeout of its own.
const ERASE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// dfuDNBUSY polls before an erase counts as stuck.
const MAX_ERASE_ATTEMPTS: u32 = 300;

/// Re-query interval while the device manifests the new image.
const MANIFEST_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Polling bounds and intervals. Every limit is an overridable parameter so
/// the bounds stay testable; the defaults suit STM32 system bootloaders.
#[derive(Clone, Copy, Debug)]
pub struct PollPolicy {
    pub max_attempts: u32,
    pub floor: Duration,
    pub erase_interval: Duration,
    pub erase_attempts: u32,
    pub manifest_interval: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        PollPolicy {
            max_attempts: MAX_POLL_ATTEMPTS,
            floor: POLL_FLOOR,
            erase_interval: ERASE_POLL_INTERVAL,
            erase_attempts: MAX_ERASE_ATTEMPTS,
            manifest_interval: MANIFEST_POLL_INTERVAL,
        }
    }
}

/// Poll until the device reaches dfuIDLE or dfuDNLOAD-IDLE.
///
/// A device parked in dfuERROR gets a clear-status before the next query;
/// otherwise the wait honors the device-reported poll timeout, floored by
/// [PollPolicy::floor]. The last observed record is returned on success and
/// carried inside [DfuError::ReadyTimeout] on failure.
pub fn wait_ready<T: DfuTransport + ?Sized>(
    port: &T,
    policy: &PollPolicy,
) -> Result<StatusRecord, DfuError> {
    let mut last = None;
    for attempt in 0..policy.max_attempts {
        let st = port.get_status()?;
        trace!(
            "poll {}: state {}, timeout {} ms",
            attempt, st.state, st.poll_timeout_ms
        );
        if st.state.is_ready() {
            return Ok(st);
        }
        if st.state == DeviceState::Error {
            warn!("device reports {} in dfuERROR, clearing status", st.status);
            port.clear_status()?;
        } else {
            thread::sleep(st.poll_timeout().max(policy.floor));
        }
        last = Some(st);
    }
    Err(DfuError::ReadyTimeout(last))
}

/// Wait out an in-progress erase, then fall through to [wait_ready].
///
/// Erases run materially longer than block writes, so the dfuDNBUSY phase
/// gets its own interval (the device-reported timeout when present,
/// [PollPolicy::erase_interval] otherwise) and its own bound, surfaced as
/// [DfuError::EraseTimeout].
pub fn wait_erase<T: DfuTransport + ?Sized>(
    port: &T,
    policy: &PollPolicy,
) -> Result<StatusRecord, DfuError> {
    let mut st = port.get_status()?;
    let mut polls = 0u32;
    while st.state == DeviceState::DownloadBusy {
        polls += 1;
        if polls > policy.erase_attempts {
            return Err(DfuError::EraseTimeout(st));
        }
        let interval = if st.poll_timeout_ms == 0 {
            policy.erase_interval
        } else {
            st.poll_timeout()
        };
        trace!("erase busy, sleeping {:?}", interval);
        thread::sleep(interval);
        st = port.get_status()?;
    }
    wait_ready(port, policy)
}
