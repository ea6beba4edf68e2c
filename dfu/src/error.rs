use crate::status::{StatusCode, StatusRecord};

#[derive(Debug)]
pub enum DfuError {
    Usb(nusb::Error),
    Transfer(nusb::transfer::TransferError),
    MalformedStatus(usize),
    UnknownState(u8),
    UnknownStatus(u8),
    Status(StatusCode),
    ReadyTimeout(Option<StatusRecord>),
    EraseTimeout(StatusRecord),
    Cancelled,
}

impl DfuError {
    /// True when the USB transport itself failed (device unplugged, stalled
    /// endpoint) rather than the DFU protocol. During manifestation this is
    /// how a rebooting target announces a completed update.
    pub fn is_transport(&self) -> bool {
        matches!(self, DfuError::Usb(_) | DfuError::Transfer(_))
    }
}

impl std::error::Error for DfuError {}

impl std::fmt::Display for DfuError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DfuError::Usb(err) => write!(f, "USB error: {}", err),
            DfuError::Transfer(err) => write!(f, "Transfer error: {}", err),
            DfuError::MalformedStatus(len) => {
                write!(f, "Malformed status response ({} bytes)", len)
            }
            DfuError::UnknownState(raw) => {
                write!(f, "Unknown DFU state {:#04x}", raw)
            }
            DfuError::UnknownStatus(raw) => {
                write!(f, "Unknown DFU status code {:#04x}", raw)
            }
            DfuError::Status(code) => {
                write!(f, "Device reported {}", code)
            }
            DfuError::ReadyTimeout(last) => match last {
                Some(st) => write!(
                    f,
                    "Timed out waiting for an idle state (device stuck in {})",
                    st.state
                ),
                None => write!(f, "Timed out waiting for an idle state"),
            },
            DfuError::EraseTimeout(st) => {
                write!(f, "Erase did not complete (device stuck in {})", st.state)
            }
            DfuError::Cancelled => write!(f, "Cancelled"),
        }
    }
}

impl From<nusb::Error> for DfuError {
    fn from(err: nusb::Error) -> Self {
        DfuError::Usb(err)
    }
}

impl From<nusb::transfer::TransferError> for DfuError {
    fn from(err: nusb::transfer::TransferError) -> Self {
        DfuError::Transfer(err)
    }
}
