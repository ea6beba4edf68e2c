use daisy_dfu::DfuTransport;

use crate::{CliError, get_dfu_device};

pub(crate) fn show_status(vid: u16, pid: u16) -> Result<(), CliError> {
    let device = get_dfu_device(vid, pid)?;
    let connection = device.connect()?;
    let record = connection.get_status()?;
    println!(
        "state: {}  status: {}  poll timeout: {} ms",
        record.state, record.status, record.poll_timeout_ms
    );
    record.ok()?;
    Ok(())
}
