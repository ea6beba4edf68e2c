//! Protocol-level tests driving the poll engine and flash sequence through
//! a scripted transport instead of real hardware.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::time::Duration;

use daisy_dfu::{
    CancelToken, DeviceState, DfuError, DfuTransport, FirmwareImage, FlashConfig, FlashStep,
    PollPolicy, ProgressStage, StatusCode, StatusRecord, erase_page, flash, wait_erase,
    wait_ready,
};
use nusb::transfer::TransferError;

const DNLOAD: u8 = 1;
const GETSTATUS: u8 = 3;
const CLRSTATUS: u8 = 4;

fn status(state: DeviceState) -> StatusRecord {
    StatusRecord {
        status: StatusCode::Ok,
        poll_timeout_ms: 0,
        state,
        string_index: 0,
    }
}

/// Zero-interval policy so tests never sleep.
fn fast_policy() -> PollPolicy {
    PollPolicy {
        floor: Duration::ZERO,
        erase_interval: Duration::ZERO,
        manifest_interval: Duration::ZERO,
        ..PollPolicy::default()
    }
}

fn fast_config(start_address: u32) -> FlashConfig {
    FlashConfig::new(start_address).with_policy(fast_policy())
}

/// Transport double: GETSTATUS replies come from a scripted queue (then
/// `fallback`, if set); every OUT transfer is recorded.
#[derive(Default)]
struct MockTransport {
    statuses: RefCell<VecDeque<Result<StatusRecord, DfuError>>>,
    fallback: Option<StatusRecord>,
    sent: RefCell<Vec<(u8, u16, Vec<u8>)>>,
    fail_finalize: bool,
    fail_out: bool,
}

impl MockTransport {
    fn with_fallback(state: DeviceState) -> Self {
        MockTransport {
            fallback: Some(status(state)),
            ..Default::default()
        }
    }

    fn push(&self, st: StatusRecord) {
        self.statuses.borrow_mut().push_back(Ok(st));
    }

    fn push_err(&self, err: DfuError) {
        self.statuses.borrow_mut().push_back(Err(err));
    }

    fn downloads(&self) -> Vec<(u16, Vec<u8>)> {
        self.sent
            .borrow()
            .iter()
            .filter(|(req, _, _)| *req == DNLOAD)
            .map(|(_, value, data)| (*value, data.clone()))
            .collect()
    }

    fn clear_count(&self) -> usize {
        self.sent
            .borrow()
            .iter()
            .filter(|(req, _, _)| *req == CLRSTATUS)
            .count()
    }
}

impl DfuTransport for MockTransport {
    fn control_out(&self, request: u8, value: u16, data: &[u8]) -> Result<(), DfuError> {
        if self.fail_out {
            return Err(DfuError::Transfer(TransferError::Disconnected));
        }
        if self.fail_finalize && request == DNLOAD && value == 0 && data.is_empty() {
            return Err(DfuError::Transfer(TransferError::Disconnected));
        }
        self.sent.borrow_mut().push((request, value, data.to_vec()));
        Ok(())
    }

    fn control_in(&self, request: u8, _value: u16, length: u16) -> Result<Vec<u8>, DfuError> {
        assert_eq!(request, GETSTATUS);
        assert_eq!(length, 6);
        match self.statuses.borrow_mut().pop_front() {
            Some(Ok(st)) => Ok(st.encode().to_vec()),
            Some(Err(err)) => Err(err),
            None => match self.fallback {
                Some(st) => Ok(st.encode().to_vec()),
                None => panic!("unscripted status query"),
            },
        }
    }
}

#[test]
fn chunking_and_block_numbers() {
    let mock = MockTransport::with_fallback(DeviceState::DownloadIdle);
    let image = FirmwareImage::new(vec![0xA5; 2500]);
    let config = fast_config(0x08000000).with_chunk_size(1024);

    flash(&mock, &image, &config, |_| {}).unwrap();

    let dl = mock.downloads();
    assert_eq!(dl.len(), 5);
    // vendor set-address command as block 0
    assert_eq!(dl[0], (0, vec![0x21, 0x00, 0x00, 0x00, 0x08]));
    // data chunks as blocks 2, 3, 4
    let sizes: Vec<(u16, usize)> = dl[1..4].iter().map(|(b, d)| (*b, d.len())).collect();
    assert_eq!(sizes, vec![(2, 1024), (3, 1024), (4, 452)]);
    // zero-length end-of-transfer block
    assert_eq!(dl[4], (0, vec![]));
}

#[test]
fn progress_is_monotonic_and_completes_at_100() {
    let mock = MockTransport::with_fallback(DeviceState::DownloadIdle);
    let image = FirmwareImage::new(vec![0; 2500]);
    let config = fast_config(0x08000000).with_chunk_size(1024);

    let mut events = Vec::new();
    flash(&mock, &image, &config, |event| events.push(event)).unwrap();

    assert_eq!(events.first().map(|e| (e.stage, e.percent)), Some((ProgressStage::Init, 0)));
    assert_eq!(events.last().map(|e| (e.stage, e.percent)), Some((ProgressStage::Complete, 100)));
    assert!(events.iter().any(|e| e.stage == ProgressStage::Write && e.percent == 5));
    assert!(events.iter().any(|e| e.stage == ProgressStage::Finalize && e.percent == 100));

    let percents: Vec<u8> = events.iter().map(|e| e.percent).collect();
    assert!(percents.windows(2).all(|w| w[0] <= w[1]));

    let downloads: Vec<u8> = events
        .iter()
        .filter(|e| e.stage == ProgressStage::Download)
        .map(|e| e.percent)
        .collect();
    assert_eq!(downloads.len(), 3);
    assert_eq!(*downloads.last().unwrap(), 90);
}

#[test]
fn ready_wait_clears_error_state() {
    let mock = MockTransport::default();
    let stuck = StatusRecord {
        status: StatusCode::Prog,
        poll_timeout_ms: 0,
        state: DeviceState::Error,
        string_index: 0,
    };
    mock.push(stuck);
    mock.push(stuck);
    mock.push(stuck);
    mock.push(status(DeviceState::DfuIdle));

    let record = wait_ready(&mock, &fast_policy()).unwrap();
    assert_eq!(record.state, DeviceState::DfuIdle);
    assert_eq!(mock.clear_count(), 3);
}

#[test]
fn ready_wait_times_out() {
    let mock = MockTransport::with_fallback(DeviceState::DownloadBusy);
    let policy = PollPolicy {
        max_attempts: 20,
        ..fast_policy()
    };

    let err = wait_ready(&mock, &policy).unwrap_err();
    match err {
        DfuError::ReadyTimeout(Some(last)) => {
            assert_eq!(last.state, DeviceState::DownloadBusy)
        }
        other => panic!("expected ReadyTimeout, got {other}"),
    }
}

#[test]
fn default_poll_bound_is_500_attempts() {
    assert_eq!(PollPolicy::default().max_attempts, 500);
}

#[test]
fn erase_waits_out_busy_state() {
    let mock = MockTransport::with_fallback(DeviceState::DfuIdle);
    mock.push(status(DeviceState::DownloadBusy));
    mock.push(status(DeviceState::DownloadBusy));
    mock.push(status(DeviceState::DownloadBusy));

    let record = erase_page(&mock, 0x08000000, &fast_policy()).unwrap();
    assert_eq!(record.state, DeviceState::DfuIdle);

    let dl = mock.downloads();
    assert_eq!(dl[0], (0, vec![0x41, 0x00, 0x00, 0x00, 0x08]));
}

#[test]
fn erase_timeout_is_distinguishable() {
    let mock = MockTransport::with_fallback(DeviceState::DownloadBusy);
    let policy = PollPolicy {
        erase_attempts: 5,
        ..fast_policy()
    };

    let err = wait_erase(&mock, &policy).unwrap_err();
    assert!(matches!(
        err,
        DfuError::EraseTimeout(st) if st.state == DeviceState::DownloadBusy
    ));
}

#[test]
fn manifest_disconnect_resolves_as_success() {
    let mock = MockTransport::default();
    // set-address wait, two chunk waits
    mock.push(status(DeviceState::DfuIdle));
    mock.push(status(DeviceState::DownloadIdle));
    mock.push(status(DeviceState::DownloadIdle));
    // manifestation: one poll, then the device drops off the bus
    mock.push(status(DeviceState::ManifestSync));
    mock.push_err(DfuError::Transfer(TransferError::Disconnected));

    let image = FirmwareImage::new(vec![0; 100]);
    let config = fast_config(0x08000000).with_chunk_size(64);
    flash(&mock, &image, &config, |_| {}).unwrap();

    let dl = mock.downloads();
    assert_eq!(dl.last(), Some(&(0, vec![])));
}

#[test]
fn manifest_tolerant_device_completes_without_disconnect() {
    let mock = MockTransport::default();
    mock.push(status(DeviceState::DfuIdle));
    mock.push(status(DeviceState::DownloadIdle));
    mock.push(status(DeviceState::ManifestSync));
    mock.push(status(DeviceState::Manifest));
    mock.push(status(DeviceState::DfuIdle));

    let image = FirmwareImage::new(vec![0; 10]);
    let config = fast_config(0x08000000);
    flash(&mock, &image, &config, |_| {}).unwrap();
}

#[test]
fn manifest_protocol_error_still_propagates() {
    let mock = MockTransport::default();
    mock.push(status(DeviceState::DfuIdle));
    mock.push(status(DeviceState::DownloadIdle));
    mock.push_err(DfuError::MalformedStatus(3));

    let image = FirmwareImage::new(vec![0; 10]);
    let err = flash(&mock, &image, &fast_config(0x08000000), |_| {}).unwrap_err();
    assert_eq!(err.step(), FlashStep::Manifest);
    assert!(matches!(err.cause(), DfuError::MalformedStatus(3)));
}

#[test]
fn finalize_send_failure_is_discarded() {
    let mock = MockTransport {
        fail_finalize: true,
        ..Default::default()
    };
    mock.push(status(DeviceState::DfuIdle));
    mock.push(status(DeviceState::DownloadIdle));
    mock.push_err(DfuError::Transfer(TransferError::Disconnected));

    let image = FirmwareImage::new(vec![0; 10]);
    flash(&mock, &image, &fast_config(0x08000000), |_| {}).unwrap();

    // the failed zero-length block was never acknowledged
    assert!(!mock.downloads().iter().any(|(block, data)| *block == 0 && data.is_empty()));
}

#[test]
fn transport_error_before_finalize_aborts() {
    let mock = MockTransport {
        fail_out: true,
        ..Default::default()
    };

    let image = FirmwareImage::new(vec![0; 10]);
    let err = flash(&mock, &image, &fast_config(0x08000000), |_| {}).unwrap_err();
    assert_eq!(err.step(), FlashStep::SetAddress);
    assert!(err.cause().is_transport());
}

#[test]
fn cancellation_stops_between_chunks() {
    let mock = MockTransport::with_fallback(DeviceState::DfuIdle);
    let token = CancelToken::new();
    token.cancel();

    let image = FirmwareImage::new(vec![0; 100]);
    let config = fast_config(0x08000000).with_cancel(token);
    let err = flash(&mock, &image, &config, |_| {}).unwrap_err();

    assert_eq!(err.step(), FlashStep::Download { block: 2 });
    assert!(matches!(err.cause(), DfuError::Cancelled));
    // only the set-address command went out
    assert_eq!(mock.downloads().len(), 1);
}

#[test]
fn zero_chunk_size_falls_back_to_default() {
    let mock = MockTransport::with_fallback(DeviceState::DownloadIdle);
    let image = FirmwareImage::new(vec![0; 1500]);

    flash(&mock, &image, &fast_config(0x08000000), |_| {}).unwrap();

    let sizes: Vec<(u16, usize)> = mock
        .downloads()
        .iter()
        .filter(|(block, _)| *block >= 2)
        .map(|(block, data)| (*block, data.len()))
        .collect();
    assert_eq!(sizes, vec![(2, 1024), (3, 476)]);
}
