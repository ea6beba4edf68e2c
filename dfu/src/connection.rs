use nusb::{
    MaybeFuture,
    transfer::{ControlIn, ControlOut, ControlType, Recipient},
};

use crate::error::DfuError;
use crate::transport::DfuTransport;
use crate::{DEFAULT_TIMEOUT, DEFAULT_TRANSFER_SIZE};

/// A claimed DFU interface on an opened device.
///
/// Dropping the connection releases the interface.
pub struct DfuConnection {
    interface: nusb::Interface,
    xfer_size: u16,
}

impl DfuConnection {
    pub(crate) fn new(interface: nusb::Interface, xfer_size: u16) -> Self {
        DfuConnection {
            interface,
            xfer_size: if xfer_size > 0 {
                xfer_size
            } else {
                DEFAULT_TRANSFER_SIZE
            },
        }
    }

    /// Preferred block size (`wTransferSize`) reported by the device.
    pub fn transfer_size(&self) -> u16 {
        self.xfer_size
    }
}

impl DfuTransport for DfuConnection {
    fn control_out(&self, request: u8, value: u16, data: &[u8]) -> Result<(), DfuError> {
        let index = self.interface.interface_number() as u16;
        Ok(self
            .interface
            .control_out(
                ControlOut {
                    control_type: ControlType::Class,
                    recipient: Recipient::Interface,
                    request,
                    value,
                    index,
                    data,
                },
                DEFAULT_TIMEOUT,
            )
            .wait()?)
    }

    fn control_in(&self, request: u8, value: u16, length: u16) -> Result<Vec<u8>, DfuError> {
        let index = self.interface.interface_number() as u16;
        Ok(self
            .interface
            .control_in(
                ControlIn {
                    control_type: ControlType::Class,
                    recipient: Recipient::Interface,
                    request,
                    value,
                    index,
                    length,
                },
                DEFAULT_TIMEOUT,
            )
            .wait()?)
    }
}
