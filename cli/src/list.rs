use daisy_dfu::{MemorySegment, find_dfu_devices};

use crate::CliError;

pub(crate) fn list_dfu_devices(
    vid: Option<u16>,
    pid: Option<u16>,
) -> Result<(), CliError> {
    let devices = find_dfu_devices(vid, pid)?;
    if devices.is_empty() {
        println!("No DFU device found");
        return Ok(());
    }

    for device in &devices {
        println!(
            "Bus {} Device {:03}: ID {:04x}:{:04x} {} (dfuse={})",
            device.bus_id(),
            device.device_address(),
            device.vendor_id(),
            device.product_id(),
            device.product_string().unwrap_or(""),
            device.is_dfuse(),
        );

        match device.layout() {
            Some(layout) => {
                println!("  {}:", layout.name);
                for segment in layout.segments.iter() {
                    print_segment("    ", segment);
                }
            }
            None => println!("  (no memory layout advertised)"),
        }
    }
    Ok(())
}

fn print_segment(prefix: &str, segment: &MemorySegment) {
    let mut page_size = segment.page_size();
    let page_char = if page_size >= 1024 {
        page_size /= 1024;
        "K"
    } else {
        " "
    };
    println!(
        "{}0x{:08X} {:3} pages of {:4}{} bytes ({}{}{})",
        prefix,
        segment.start(),
        segment.pages(),
        page_size,
        page_char,
        if segment.readable() { "r" } else { "" },
        if segment.writable() { "w" } else { "" },
        if segment.erasable() { "e" } else { "" },
    );
}
