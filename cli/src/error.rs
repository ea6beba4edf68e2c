use std::{fmt::Display, io};

use daisy_dfu::{DfuError, FlashError};

pub enum CliError {
    IO(io::Error),
    Dfu(DfuError),
    Flash(FlashError),
    NoDfuDevice,
    ManyDfuDevices,
    NotWritable(u32),
    EmptyImage,
}

impl From<io::Error> for CliError {
    fn from(value: io::Error) -> Self {
        CliError::IO(value)
    }
}

impl From<DfuError> for CliError {
    fn from(value: DfuError) -> Self {
        CliError::Dfu(value)
    }
}

impl From<FlashError> for CliError {
    fn from(value: FlashError) -> Self {
        CliError::Flash(value)
    }
}

impl Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CliError::IO(err) => write!(f, "IO error: {err}"),
            CliError::Dfu(err) => write!(f, "DFU error: {err}"),
            CliError::Flash(err) => write!(f, "{err}"),
            CliError::NoDfuDevice => {
                write!(f, "No DFU device (is the pedal in bootloader mode?)")
            }
            CliError::ManyDfuDevices => write!(f, "More than one DFU device"),
            CliError::NotWritable(addr) => {
                write!(f, "Address {addr:#010x} is not in a writable segment")
            }
            CliError::EmptyImage => write!(f, "Firmware image is empty"),
        }
    }
}
