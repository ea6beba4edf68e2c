use std::num::NonZeroU8;
use std::time::Duration;

use log::debug;
use nusb::{self, MaybeFuture};

use crate::DEFAULT_TIMEOUT;
use crate::connection::DfuConnection;
use crate::descriptor::{DFU_DESC_LEN, DFU_DESC_TYPE, DfuDescriptor};
use crate::error::DfuError;
use crate::memory::{MemoryLayout, parse_memory_layout};

const DFU_CLASS: u8 = 0xFE;
const DFU_SUBCLASS: u8 = 0x1;

/// A USB device exposing a DFU interface.
///
/// Only the first DFU interface/alt-setting is kept; devices exposing
/// several at once are not supported.
pub struct DfuDevice {
    dev: nusb::DeviceInfo,
    interface: u8,
    alt_setting: u8,
    layout: Option<MemoryLayout>,
    descriptor: DfuDescriptor,
}

impl DfuDevice {
    fn from_device_info(device: nusb::DeviceInfo) -> Result<Option<Self>, DfuError> {
        let open_dev: nusb::Device = device.open().wait()?;

        let Some((interface, alt_setting, name_idx)) = find_dfu_alt_setting(&open_dev) else {
            return Ok(None);
        };

        let layout = name_idx
            .and_then(|idx| get_string_descriptor(&open_dev, idx, DEFAULT_TIMEOUT))
            .and_then(|s| parse_memory_layout(&s));

        let descriptor = open_dev
            .configurations()
            .find_map(|config| {
                config.interface_alt_settings().find_map(|alt| {
                    alt.descriptors().find(|d| {
                        d.descriptor_len() == DFU_DESC_LEN
                            && d.descriptor_type() == DFU_DESC_TYPE
                    })
                })
            })
            .and_then(|raw| DfuDescriptor::from_bytes(&raw))
            .unwrap_or_default();

        Ok(Some(DfuDevice {
            dev: device,
            interface,
            alt_setting,
            layout,
            descriptor,
        }))
    }

    pub fn device_info(&self) -> &nusb::DeviceInfo {
        &self.dev
    }

    pub fn bus_id(&self) -> &str {
        self.dev.bus_id()
    }

    pub fn device_address(&self) -> u8 {
        self.dev.device_address()
    }

    pub fn vendor_id(&self) -> u16 {
        self.dev.vendor_id()
    }

    pub fn product_id(&self) -> u16 {
        self.dev.product_id()
    }

    pub fn product_string(&self) -> Option<&str> {
        self.dev.product_string()
    }

    /// Memory map advertised through the interface string descriptor, when
    /// the bootloader provides one.
    pub fn layout(&self) -> Option<&MemoryLayout> {
        self.layout.as_ref()
    }

    /// DFU functional descriptor; all-zero defaults when the device does
    /// not expose one.
    pub fn descriptor(&self) -> DfuDescriptor {
        self.descriptor
    }

    pub fn is_dfuse(&self) -> bool {
        self.descriptor.is_dfuse()
    }

    /// Start address of the first advertised segment.
    pub fn default_start_address(&self) -> Option<u32> {
        self.layout.as_ref().map(|l| l.segments.first().start())
    }

    /// Open the device and claim its DFU interface.
    pub fn connect(&self) -> Result<DfuConnection, DfuError> {
        let dev = self.dev.open().wait()?;
        let interface = dev.claim_interface(self.interface).wait()?;
        interface.set_alt_setting(self.alt_setting).wait()?;
        Ok(DfuConnection::new(interface, self.descriptor.transfer_size()))
    }
}

fn find_dfu_alt_setting(dev: &nusb::Device) -> Option<(u8, u8, Option<NonZeroU8>)> {
    dev.configurations().find_map(|config| {
        config.interface_alt_settings().find_map(|alt| {
            if alt.class() == DFU_CLASS && alt.subclass() == DFU_SUBCLASS {
                Some((
                    alt.interface_number(),
                    alt.alternate_setting(),
                    alt.string_index(),
                ))
            } else {
                None
            }
        })
    })
}

fn get_string_descriptor(
    device: &nusb::Device,
    desc_index: NonZeroU8,
    timeout: Duration,
) -> Option<String> {
    let language: u16 = device
        .get_string_descriptor_supported_languages(timeout)
        .wait()
        .ok()?
        .next()
        .unwrap_or(nusb::descriptors::language_id::US_ENGLISH);

    device
        .get_string_descriptor(desc_index, language, timeout)
        .wait()
        .ok()
}

/// Enumerate DFU-capable devices, optionally filtered by vendor/product id.
pub fn find_dfu_devices(
    vid: Option<u16>,
    pid: Option<u16>,
) -> Result<Vec<DfuDevice>, DfuError> {
    let candidates: Vec<nusb::DeviceInfo> = nusb::list_devices()
        .wait()?
        .filter(|dev| {
            vid.is_none_or(|id| dev.vendor_id() == id)
                && pid.is_none_or(|id| dev.product_id() == id)
        })
        .filter(|dev| {
            dev.interfaces()
                .any(|i| i.class() == DFU_CLASS && i.subclass() == DFU_SUBCLASS)
        })
        .collect();

    let mut devices = Vec::with_capacity(candidates.len());
    for info in candidates {
        debug!(
            "probing {:04x}:{:04x} on bus {}",
            info.vendor_id(),
            info.product_id(),
            info.bus_id()
        );
        if let Some(device) = DfuDevice::from_device_info(info)? {
            devices.push(device);
        }
    }
    Ok(devices)
}
