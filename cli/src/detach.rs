use dfu::Flasher;

use crate::CliError;

pub(crate) fn detach(flasher: &Flasher, timeout: u16) -> Result<(), CliError> {
    println!("Detaching...");
    flasher.detach(timeout)?;
    Ok(())
}

pub(crate) fn show_status(flasher: &Flasher) -> Result<(), CliError> {
    let status = flasher.status()?;
    println!(
        "state = {}, status = {}",
        status.state(),
        status.status()
    );
    if let Some(index) = status.string_index() {
        println!("status string index = {index}");
    }
    println!("poll timeout = {} ms", status.poll_timeout());
    Ok(())
}
