//! Host-side USB DFU client for Daisy-based guitar pedals, built on [`nusb`]
//!
//! Drives an STM32 system bootloader through the DFU protocol with ST's
//! "DfuSe" extensions: address selection, page erase, chunked firmware
//! download and manifestation. The transport is abstracted behind
//! [DfuTransport] so the whole sequence runs against scripted fakes in
//! tests.
//!
//! Useful references:
//! - DFU: [USB Device Firmware Upgrade Specification, Revision 1.1](https://www.usb.org/sites/default/files/DFU_1.1.pdf)
//! - DfuSe: [STMicroelectronics AN3156](https://www.st.com/resource/en/application_note/an3156-usb-dfu-protocol-used-in-the-stm32-bootloader-stmicroelectronics.pdf)
//!
//! # Example
//!
//! ```no_run
//! use daisy_dfu::{FirmwareImage, FlashConfig, find_dfu_devices, flash};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let devices = find_dfu_devices(Some(0x0483), Some(0xdf11))?;
//!     let device = devices.first().ok_or("no device in DFU mode")?;
//!     let connection = device.connect()?;
//!
//!     let image = FirmwareImage::new(std::fs::read("firmware.bin")?);
//!     let config = FlashConfig::new(0x0800_0000);
//!     flash(&connection, &image, &config, |event| {
//!         println!("{:3}% {}", event.percent, event.message);
//!     })?;
//!     Ok(())
//! }
//! ```
//!
//! [`nusb`]: https://docs.rs/nusb

pub(crate) const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000u64);
pub(crate) const DEFAULT_TRANSFER_SIZE: u16 = 1024 * 2;
pub(crate) const DEFAULT_CHUNK_SIZE: usize = 1024;

mod command;
mod connection;
mod descriptor;
mod device;
mod error;
mod flash;
mod memory;
mod poll;
mod status;
mod transport;

use std::time::Duration;

// Re-exports
pub use command::{erase_command, set_address_command};
pub use connection::DfuConnection;
pub use descriptor::{DFUSE_VERSION_NUMBER, DfuDescriptor};
pub use device::{DfuDevice, find_dfu_devices};
pub use error::DfuError;
pub use flash::{
    CancelToken, FirmwareImage, FlashConfig, FlashError, FlashStep, ProgressEvent,
    ProgressStage, erase_page, flash,
};
pub use memory::{MemoryLayout, MemorySegment};
pub use poll::{PollPolicy, wait_erase, wait_ready};
pub use status::{DeviceState, StatusCode, StatusRecord};
pub use transport::DfuTransport;
