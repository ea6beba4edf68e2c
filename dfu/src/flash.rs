use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use log::debug;

use crate::DEFAULT_CHUNK_SIZE;
use crate::error::DfuError;
use crate::poll::{PollPolicy, wait_erase, wait_ready};
use crate::status::StatusRecord;
use crate::transport::DfuTransport;

/// A complete firmware image, supplied whole by the caller and never
/// mutated here.
#[derive(Clone, Debug)]
pub struct FirmwareImage {
    data: Vec<u8>,
}

impl FirmwareImage {
    pub fn new(data: Vec<u8>) -> Self {
        FirmwareImage { data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

impl From<Vec<u8>> for FirmwareImage {
    fn from(data: Vec<u8>) -> Self {
        FirmwareImage::new(data)
    }
}

/// Cooperative cancellation flag, checked between chunks and never
/// mid-transfer, so the device is not left inside a block write.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Per-call configuration for [flash].
#[derive(Clone, Debug)]
pub struct FlashConfig {
    pub start_address: u32,
    /// Bytes per data block; 0 picks the default.
    pub chunk_size: usize,
    pub policy: PollPolicy,
    pub cancel: Option<CancelToken>,
}

impl FlashConfig {
    pub fn new(start_address: u32) -> Self {
        FlashConfig {
            start_address,
            chunk_size: 0,
            policy: PollPolicy::default(),
            cancel: None,
        }
    }

    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    #[must_use]
    pub fn with_policy(mut self, policy: PollPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProgressStage {
    Init,
    Write,
    Download,
    Finalize,
    Complete,
}

/// Delivered synchronously to the progress callback at defined points of
/// the flash sequence. The library never renders these.
#[derive(Clone, Debug)]
pub struct ProgressEvent {
    pub stage: ProgressStage,
    pub percent: u8,
    pub message: String,
}

impl ProgressEvent {
    fn new(stage: ProgressStage, percent: u8, message: impl Into<String>) -> Self {
        ProgressEvent {
            stage,
            percent,
            message: message.into(),
        }
    }
}

/// Where in the flash sequence a failure occurred.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlashStep {
    SetAddress,
    Download { block: u16 },
    Finalize,
    Manifest,
}

impl std::fmt::Display for FlashStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlashStep::SetAddress => write!(f, "set-address"),
            FlashStep::Download { block } => write!(f, "download (block {})", block),
            FlashStep::Finalize => write!(f, "finalize"),
            FlashStep::Manifest => write!(f, "manifestation"),
        }
    }
}

/// A failed flash sequence: the underlying error plus the step it broke at.
///
/// A failure before manifestation leaves undefined flash contents in the
/// target region; recovery is a fresh [flash] call from the start address.
#[derive(Debug)]
pub struct FlashError {
    step: FlashStep,
    source: DfuError,
}

impl FlashError {
    fn new(step: FlashStep, source: DfuError) -> Self {
        FlashError { step, source }
    }

    pub fn step(&self) -> FlashStep {
        self.step
    }

    pub fn cause(&self) -> &DfuError {
        &self.source
    }
}

impl std::error::Error for FlashError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

impl std::fmt::Display for FlashError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Flash failed during {}: {}", self.step, self.source)
    }
}

/// Run the full update sequence against an already-claimed DFU interface:
/// set the address pointer, stream the image as numbered blocks, send the
/// zero-length end-of-transfer block and wait out manifestation.
///
/// Data chunk `k` (0-indexed) travels as block `k + 2`; blocks 0 and 1 are
/// reserved for vendor commands. There are no retries beyond the poll
/// engine's own polling; on error the caller must restart the whole
/// sequence after recovering the device.
pub fn flash<T, F>(
    port: &T,
    image: &FirmwareImage,
    config: &FlashConfig,
    mut progress: F,
) -> Result<(), FlashError>
where
    T: DfuTransport + ?Sized,
    F: FnMut(ProgressEvent),
{
    progress(ProgressEvent::new(
        ProgressStage::Init,
        0,
        "starting firmware download",
    ));

    port.set_address(config.start_address)
        .map_err(|e| FlashError::new(FlashStep::SetAddress, e))?;
    wait_ready(port, &config.policy).map_err(|e| FlashError::new(FlashStep::SetAddress, e))?;

    progress(ProgressEvent::new(
        ProgressStage::Write,
        5,
        format!("address pointer set to {:#010x}", config.start_address),
    ));

    let chunk_size = if config.chunk_size == 0 {
        DEFAULT_CHUNK_SIZE
    } else {
        config.chunk_size
    };
    let total = image.len();
    let mut written = 0usize;

    for (nr, chunk) in image.as_bytes().chunks(chunk_size).enumerate() {
        let block = (nr + 2) as u16;
        if config.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
            return Err(FlashError::new(
                FlashStep::Download { block },
                DfuError::Cancelled,
            ));
        }
        port.download(block, chunk)
            .map_err(|e| FlashError::new(FlashStep::Download { block }, e))?;
        wait_ready(port, &config.policy)
            .map_err(|e| FlashError::new(FlashStep::Download { block }, e))?;
        written += chunk.len();
        let percent = 10 + (80 * written / total.max(1)) as u8;
        progress(ProgressEvent::new(
            ProgressStage::Download,
            percent,
            format!("{} of {} bytes", written, total),
        ));
    }

    progress(ProgressEvent::new(
        ProgressStage::Finalize,
        100,
        "leaving download mode",
    ));
    // The device commonly starts rebooting as soon as it sees the
    // zero-length block; a failed send here is the expected outcome.
    if let Err(err) = port.download(0, &[]) {
        debug!("end-of-transfer block not acknowledged: {}", err);
    }

    wait_manifest(port, &config.policy).map_err(|e| FlashError::new(FlashStep::Manifest, e))?;

    progress(ProgressEvent::new(
        ProgressStage::Complete,
        100,
        "firmware update complete",
    ));
    Ok(())
}

/// Poll out the manifestation phase. Losing the device here means the
/// bootloader jumped into the new firmware, which is the only completion
/// signal DFU offers, so transport failures resolve as success. This
/// inversion is scoped to this loop and must not spread to other steps.
fn wait_manifest<T: DfuTransport + ?Sized>(
    port: &T,
    policy: &PollPolicy,
) -> Result<(), DfuError> {
    let mut last = None;
    for _ in 0..policy.max_attempts {
        let st = match port.get_status() {
            Ok(st) => st,
            Err(err) if err.is_transport() => {
                debug!("device left the bus during manifestation: {}", err);
                return Ok(());
            }
            Err(err) => return Err(err),
        };
        if !st.state.in_manifest() {
            return Ok(());
        }
        last = Some(st);
        thread::sleep(policy.manifest_interval);
    }
    Err(DfuError::ReadyTimeout(last))
}

/// Erase the flash page at `addr` and wait for the device to finish.
pub fn erase_page<T: DfuTransport + ?Sized>(
    port: &T,
    addr: u32,
    policy: &PollPolicy,
) -> Result<StatusRecord, DfuError> {
    debug!("erasing page at {:#010x}", addr);
    port.erase(addr)?;
    wait_erase(port, policy)
}
