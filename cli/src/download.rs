use std::{
    io::{self, Write},
    path::Path,
};

use dfu::{FlashStatus, Flasher};

use crate::CliError;

pub(crate) fn download_file(
    flasher: &Flasher,
    file: &Path,
) -> Result<(), CliError> {
    println!("Downloading {}...", file.display());
    let status = FlashStatus::new();
    let result = flasher.flash_file(file, &status, |done, total| {
        let percentage = if total == 0 { 100 } else { (100 * done) / total };
        let filled = if total == 0 { 60 } else { (60 * done) / total };
        print!(
            "\r  Flashing {:3}% [{}]",
            percentage,
            "#".repeat(filled) + &" ".repeat(60 - filled)
        );
        let _ = io::stdout().flush();
    });
    println!();
    result?;
    println!("Done!");
    Ok(())
}
