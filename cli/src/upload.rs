use std::{
    fs,
    io::{self, Write},
    path::Path,
};

use dfu::Flasher;

use crate::CliError;

pub(crate) fn upload_file(
    flasher: &Flasher,
    file: &Path,
    length: Option<usize>,
) -> Result<(), CliError> {
    let data = flasher.upload(length, |done, total| {
        if total > 0 {
            let percentage = (100 * done) / total;
            let filled = (60 * done) / total;
            print!(
                "\r  Reading {:3}% [{}]",
                percentage,
                "#".repeat(filled) + &" ".repeat(60 - filled)
            );
        } else {
            print!("\r  Reading {done} bytes");
        }
        let _ = io::stdout().flush();
    })?;
    println!();

    fs::write(file, &data)?;
    println!("Wrote {} bytes to {}", data.len(), file.display());
    Ok(())
}
