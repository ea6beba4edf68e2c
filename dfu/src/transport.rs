use crate::command::{erase_command, set_address_command};
use crate::error::DfuError;
use crate::status::{STATUS_LEN, StatusRecord};

pub(crate) const DFU_CMD_DOWNLOAD: u8 = 1;
pub(crate) const DFU_CMD_GETSTATUS: u8 = 3;
pub(crate) const DFU_CMD_CLRSTATUS: u8 = 4;

/// Control-transfer capability against one claimed DFU interface.
///
/// The two required methods are the only thing the protocol core needs from
/// the host platform; [crate::DfuConnection] implements them over `nusb`,
/// tests implement them over scripted byte queues. The claimed interface is
/// released when the implementing value is dropped.
pub trait DfuTransport {
    fn control_out(&self, request: u8, value: u16, data: &[u8]) -> Result<(), DfuError>;
    fn control_in(&self, request: u8, value: u16, length: u16) -> Result<Vec<u8>, DfuError>;

    /// Query and decode the 6-byte status record.
    fn get_status(&self) -> Result<StatusRecord, DfuError> {
        let raw = self.control_in(DFU_CMD_GETSTATUS, 0, STATUS_LEN as u16)?;
        StatusRecord::decode(&raw)
    }

    /// Reset a device out of dfuERROR back to dfuIDLE.
    fn clear_status(&self) -> Result<(), DfuError> {
        self.control_out(DFU_CMD_CLRSTATUS, 0, &[])
    }

    /// DNLOAD request; the block number rides in the wValue field.
    fn download(&self, block: u16, data: &[u8]) -> Result<(), DfuError> {
        self.control_out(DFU_CMD_DOWNLOAD, block, data)
    }

    /// Send the set-address-pointer command as block 0.
    fn set_address(&self, addr: u32) -> Result<(), DfuError> {
        self.download(0, &set_address_command(addr))
    }

    /// Send the page erase command as block 0.
    fn erase(&self, addr: u32) -> Result<(), DfuError> {
        self.download(0, &erase_command(addr))
    }
}
