use std::fmt;
use std::time::Duration;

use crate::error::DfuError;

pub(crate) const STATUS_LEN: usize = 6;

/// Device state from byte 4 of a GETSTATUS response (DFU 1.1, section 6.1.2).
///
/// Declaration order matches the wire ordinals 0x00..=0x0a.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceState {
    AppIdle,
    AppDetach,
    DfuIdle,
    DownloadSync,
    DownloadBusy,
    DownloadIdle,
    ManifestSync,
    Manifest,
    ManifestWaitReset,
    UploadIdle,
    Error,
}

impl DeviceState {
    pub(crate) fn from_raw(raw: u8) -> Result<Self, DfuError> {
        Ok(match raw {
            0x00 => DeviceState::AppIdle,
            0x01 => DeviceState::AppDetach,
            0x02 => DeviceState::DfuIdle,
            0x03 => DeviceState::DownloadSync,
            0x04 => DeviceState::DownloadBusy,
            0x05 => DeviceState::DownloadIdle,
            0x06 => DeviceState::ManifestSync,
            0x07 => DeviceState::Manifest,
            0x08 => DeviceState::ManifestWaitReset,
            0x09 => DeviceState::UploadIdle,
            0x0a => DeviceState::Error,
            _ => return Err(DfuError::UnknownState(raw)),
        })
    }

    /// The host may issue the next download request in these states.
    pub fn is_ready(self) -> bool {
        matches!(self, DeviceState::DfuIdle | DeviceState::DownloadIdle)
    }

    /// Manifestation in progress; the device is validating/activating the
    /// image and may drop off the bus at any moment.
    pub fn in_manifest(self) -> bool {
        matches!(self, DeviceState::ManifestSync | DeviceState::Manifest)
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DeviceState::AppIdle => "appIDLE",
            DeviceState::AppDetach => "appDETACH",
            DeviceState::DfuIdle => "dfuIDLE",
            DeviceState::DownloadSync => "dfuDNLOAD-SYNC",
            DeviceState::DownloadBusy => "dfuDNBUSY",
            DeviceState::DownloadIdle => "dfuDNLOAD-IDLE",
            DeviceState::ManifestSync => "dfuMANIFEST-SYNC",
            DeviceState::Manifest => "dfuMANIFEST",
            DeviceState::ManifestWaitReset => "dfuMANIFEST-WAIT-RESET",
            DeviceState::UploadIdle => "dfuUPLOAD-IDLE",
            DeviceState::Error => "dfuERROR",
        })
    }
}

/// Status code from byte 0 of a GETSTATUS response (DFU 1.1, section 6.1.2).
///
/// Diagnostics only: the polling engine branches on [DeviceState], never on
/// individual status codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusCode {
    Ok,
    Target,
    File,
    Write,
    Erase,
    CheckErased,
    Prog,
    Verify,
    Address,
    NotDone,
    Firmware,
    Vendor,
    UsbReset,
    PowerOnReset,
    Unknown,
    StalledPacket,
}

impl StatusCode {
    pub(crate) fn from_raw(raw: u8) -> Result<Self, DfuError> {
        Ok(match raw {
            0x00 => StatusCode::Ok,
            0x01 => StatusCode::Target,
            0x02 => StatusCode::File,
            0x03 => StatusCode::Write,
            0x04 => StatusCode::Erase,
            0x05 => StatusCode::CheckErased,
            0x06 => StatusCode::Prog,
            0x07 => StatusCode::Verify,
            0x08 => StatusCode::Address,
            0x09 => StatusCode::NotDone,
            0x0a => StatusCode::Firmware,
            0x0b => StatusCode::Vendor,
            0x0c => StatusCode::UsbReset,
            0x0d => StatusCode::PowerOnReset,
            0x0e => StatusCode::Unknown,
            0x0f => StatusCode::StalledPacket,
            _ => return Err(DfuError::UnknownStatus(raw)),
        })
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StatusCode::Ok => "OK",
            StatusCode::Target => "errTARGET",
            StatusCode::File => "errFILE",
            StatusCode::Write => "errWRITE",
            StatusCode::Erase => "errERASE",
            StatusCode::CheckErased => "errCHECK_ERASED",
            StatusCode::Prog => "errPROG",
            StatusCode::Verify => "errVERIFY",
            StatusCode::Address => "errADDRESS",
            StatusCode::NotDone => "errNOTDONE",
            StatusCode::Firmware => "errFIRMWARE",
            StatusCode::Vendor => "errVENDOR",
            StatusCode::UsbReset => "errUSBR",
            StatusCode::PowerOnReset => "errPOR",
            StatusCode::Unknown => "errUNKNOWN",
            StatusCode::StalledPacket => "errSTALLEDPKT",
        })
    }
}

/// One decoded GETSTATUS response.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StatusRecord {
    pub status: StatusCode,
    /// Milliseconds the host should wait before the next status query;
    /// 24 bits on the wire.
    pub poll_timeout_ms: u32,
    pub state: DeviceState,
    pub string_index: u8,
}

impl StatusRecord {
    /// Decode the fixed 6-byte GETSTATUS payload: status, 24-bit
    /// little-endian poll timeout, state, string index.
    pub fn decode(raw: &[u8]) -> Result<Self, DfuError> {
        if raw.len() < STATUS_LEN {
            return Err(DfuError::MalformedStatus(raw.len()));
        }
        Ok(StatusRecord {
            status: StatusCode::from_raw(raw[0])?,
            poll_timeout_ms: u32::from_le_bytes([raw[1], raw[2], raw[3], 0]),
            state: DeviceState::from_raw(raw[4])?,
            string_index: raw[5],
        })
    }

    /// Exact inverse of [StatusRecord::decode].
    pub fn encode(&self) -> [u8; STATUS_LEN] {
        let t = self.poll_timeout_ms.to_le_bytes();
        [
            self.status as u8,
            t[0],
            t[1],
            t[2],
            self.state as u8,
            self.string_index,
        ]
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms as u64)
    }

    /// Surface a non-OK status code as an error.
    pub fn ok(&self) -> Result<(), DfuError> {
        if self.status == StatusCode::Ok {
            Ok(())
        } else {
            Err(DfuError::Status(self.status))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_timeout_little_endian() {
        let st = StatusRecord::decode(&[0, 10, 0, 0, 2, 0]).unwrap();
        assert_eq!(st.poll_timeout_ms, 10);
        assert_eq!(st.status, StatusCode::Ok);
        assert_eq!(st.state, DeviceState::DfuIdle);

        let st = StatusRecord::decode(&[0x04, 0x01, 0x02, 0x03, 0x04, 0x07]).unwrap();
        assert_eq!(st.poll_timeout_ms, 0x030201);
        assert_eq!(st.status, StatusCode::Erase);
        assert_eq!(st.state, DeviceState::DownloadBusy);
        assert_eq!(st.string_index, 0x07);
    }

    #[test]
    fn test_short_payload() {
        assert!(matches!(
            StatusRecord::decode(&[0, 10, 0, 0, 2]),
            Err(DfuError::MalformedStatus(5))
        ));
        assert!(matches!(
            StatusRecord::decode(&[]),
            Err(DfuError::MalformedStatus(0))
        ));
    }

    #[test]
    fn test_unknown_ordinals() {
        assert!(matches!(
            StatusRecord::decode(&[0, 0, 0, 0, 0x0b, 0]),
            Err(DfuError::UnknownState(0x0b))
        ));
        assert!(matches!(
            StatusRecord::decode(&[0x10, 0, 0, 0, 2, 0]),
            Err(DfuError::UnknownStatus(0x10))
        ));
    }

    #[test]
    fn test_encode_round_trip() {
        let raw = [0x05, 0xe8, 0x03, 0x00, 0x04, 0x01];
        let st = StatusRecord::decode(&raw).unwrap();
        assert_eq!(st.encode(), raw);
    }

    #[test]
    fn test_ready_states() {
        assert!(DeviceState::DfuIdle.is_ready());
        assert!(DeviceState::DownloadIdle.is_ready());
        assert!(!DeviceState::DownloadBusy.is_ready());
        assert!(!DeviceState::Error.is_ready());
        assert!(DeviceState::ManifestSync.in_manifest());
        assert!(DeviceState::Manifest.in_manifest());
        assert!(!DeviceState::ManifestWaitReset.in_manifest());
    }

    #[test]
    fn test_status_ok() {
        let st = StatusRecord::decode(&[0, 0, 0, 0, 2, 0]).unwrap();
        assert!(st.ok().is_ok());
        let st = StatusRecord {
            status: StatusCode::Verify,
            ..st
        };
        assert!(matches!(st.ok(), Err(DfuError::Status(StatusCode::Verify))));
    }
}
