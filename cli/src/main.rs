use std::process::ExitCode;

use clap::{Parser, Subcommand};
use clap_num::maybe_hex;
use parse_size::parse_size;

use daisy_dfu::{DfuDevice, find_dfu_devices};
use error::CliError;
use flash::flash_file;
use list::list_dfu_devices;
use status::show_status;

mod error;
mod flash;
mod list;
mod status;

#[derive(Parser)]
#[command(version, about = "Firmware updater for Daisy-based pedals", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// list DFU devices
    List {
        /// vendor ID (ex: "0483")
        #[clap(short, long, value_parser=hex_u16)]
        vendor: Option<u16>,
        /// product ID (ex: "df11")
        #[clap(short, long, value_parser=hex_u16)]
        product: Option<u16>,
    },
    /// show the bootloader status record
    Status {
        /// vendor ID (ex: "0483")
        #[clap(short, long, value_parser=hex_u16, default_value = "0483")]
        vendor: u16,
        /// product ID (ex: "df11")
        #[clap(short, long, value_parser=hex_u16, default_value = "df11")]
        product: u16,
    },
    /// write a firmware image to the device
    Flash {
        /// raw firmware binary
        file: std::path::PathBuf,
        /// vendor ID (ex: "0483")
        #[clap(short, long, value_parser=hex_u16, default_value = "0483")]
        vendor: u16,
        /// product ID (ex: "df11")
        #[clap(short, long, value_parser=hex_u16, default_value = "df11")]
        product: u16,
        /// start address (ex: 0x08000000)
        #[clap(short, long, value_parser=maybe_hex::<u32>)]
        start_address: Option<u32>,
        /// bytes per block (ex: 1K); defaults to the device transfer size
        #[clap(short, long, value_parser=parse_chunk_size)]
        chunk_size: Option<usize>,
        /// skip the page erase pass
        #[clap(long)]
        no_erase: bool,
    },
}

impl Default for Commands {
    fn default() -> Self {
        Commands::List {
            vendor: None,
            product: None,
        }
    }
}

fn hex_u16(s: &str) -> Result<u16, String> {
    <u16>::from_str_radix(s, 16).map_err(|e| format!("{e}"))
}

fn parse_chunk_size(s: &str) -> Result<usize, String> {
    let len = parse_size(s).map_err(|e| format!("{e}"))?;
    len.try_into().map_err(|e| format!("{e}"))
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    env_logger::init();

    if let Err(err) = match cli.command.unwrap_or_default() {
        Commands::List { vendor, product } => list_dfu_devices(vendor, product),
        Commands::Status { vendor, product } => show_status(vendor, product),
        Commands::Flash {
            file,
            vendor,
            product,
            start_address,
            chunk_size,
            no_erase,
        } => flash_file(&file, vendor, product, start_address, chunk_size, no_erase),
    } {
        eprintln!("Error: {err}");
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

pub(crate) fn get_dfu_device(vid: u16, pid: u16) -> Result<DfuDevice, CliError> {
    let mut devices = find_dfu_devices(Some(vid), Some(pid))?;
    if devices.is_empty() {
        return Err(CliError::NoDfuDevice);
    }
    if devices.len() > 1 {
        return Err(CliError::ManyDfuDevices);
    }
    Ok(devices.remove(0))
}
