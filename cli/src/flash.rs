use std::{
    fs,
    io::{self, Write},
    path::Path,
};

use daisy_dfu::{
    CancelToken, FirmwareImage, FlashConfig, PollPolicy, ProgressEvent, ProgressStage,
    erase_page, flash,
};

use crate::{CliError, get_dfu_device};

const DEFAULT_START_ADDRESS: u32 = 0x0800_0000;

pub(crate) fn flash_file(
    file: &Path,
    vid: u16,
    pid: u16,
    start_address: Option<u32>,
    chunk_size: Option<usize>,
    no_erase: bool,
) -> Result<(), CliError> {
    let data = fs::read(file)?;
    if data.is_empty() {
        return Err(CliError::EmptyImage);
    }

    let device = get_dfu_device(vid, pid)?;
    let start_address = start_address
        .or_else(|| device.default_start_address())
        .unwrap_or(DEFAULT_START_ADDRESS);
    let end_address = start_address + data.len() as u32;

    if let Some(layout) = device.layout() {
        match layout.segment_containing(start_address) {
            Some(segment) if segment.writable() => {}
            _ => return Err(CliError::NotWritable(start_address)),
        }
    }

    let connection = device.connect()?;
    let policy = PollPolicy::default();

    if no_erase {
        println!("Skipping erase");
    } else if let Some(layout) = device.layout() {
        let pages = layout.page_addresses(start_address, end_address);
        let count = pages.len();
        for (nr, addr) in pages.into_iter().enumerate() {
            print!("\r  Erasing page {:2} of {:2} @ {:#010x}", nr + 1, count, addr);
            let _ = io::stdout().flush();
            if let Err(err) = erase_page(&connection, addr, &policy) {
                println!(" failed");
                return Err(err.into());
            }
        }
        println!();
    } else {
        println!("No memory layout advertised, skipping erase");
    }

    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    let _ = ctrlc::set_handler(move || handler_token.cancel());

    let chunk_size = chunk_size.unwrap_or(connection.transfer_size() as usize);
    let config = FlashConfig::new(start_address)
        .with_chunk_size(chunk_size)
        .with_policy(policy)
        .with_cancel(cancel);

    flash(&connection, &FirmwareImage::new(data), &config, render_progress)?;
    Ok(())
}

fn render_progress(event: ProgressEvent) {
    match event.stage {
        ProgressStage::Init | ProgressStage::Write => println!("{}", event.message),
        ProgressStage::Download => {
            let filled = (60 * event.percent as usize) / 100;
            print!(
                "\r  Flashing {:3}% [{}]",
                event.percent,
                "#".repeat(filled) + &" ".repeat(60 - filled)
            );
            let _ = io::stdout().flush();
        }
        ProgressStage::Finalize => {
            println!();
            println!("{}", event.message);
        }
        ProgressStage::Complete => println!("{}", event.message),
    }
}
