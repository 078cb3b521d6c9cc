use std::{path::PathBuf, process::ExitCode, time::Duration};

use clap::{Args, Parser, Subcommand};
use clap_num::maybe_hex;
use parse_size::parse_size;

use dfu::{FlashOptions, Flasher, MatchCriteria, NusbBackend};
use dfu_file::SuffixPolicy;
use error::CliError;

use detach::*;
use download::*;
use list::*;
use upload::*;

mod detach;
mod download;
mod error;
mod list;
mod upload;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// list DFU capable devices
    List {
        #[command(flatten)]
        device: DeviceArgs,
    },
    /// download a firmware file to the device
    Download {
        /// firmware file, with or without DFU suffix
        file: PathBuf,
        #[command(flatten)]
        device: DeviceArgs,
        /// refuse files without a valid DFU suffix
        #[clap(long, conflicts_with = "no_suffix")]
        require_suffix: bool,
        /// download the whole file, even if it ends with a DFU suffix
        #[clap(long)]
        no_suffix: bool,
    },
    /// upload the device's firmware into a file
    Upload {
        /// file to write
        file: PathBuf,
        #[command(flatten)]
        device: DeviceArgs,
        /// maximum number of bytes to read (ex: 64K, 2MB), needed for
        /// devices that never end an upload with a short block
        #[clap(short, long, value_parser=parse_length)]
        length: Option<usize>,
    },
    /// ask a runtime mode device to switch to DFU mode
    Detach {
        #[command(flatten)]
        device: DeviceArgs,
        /// detach timeout in milliseconds
        #[clap(long = "detach-timeout", default_value_t = 1000)]
        timeout: u16,
    },
    /// show the DFU status of the device
    Status {
        #[command(flatten)]
        device: DeviceArgs,
    },
}

impl Default for Commands {
    fn default() -> Self {
        Commands::List {
            device: DeviceArgs::default(),
        }
    }
}

#[derive(Args, Clone, Default)]
struct DeviceArgs {
    /// vendor ID (ex: "0483")
    #[clap(short, long, value_parser=hex_u16)]
    vendor: Option<u16>,
    /// product ID (ex: "df11")
    #[clap(short, long, value_parser=hex_u16)]
    product: Option<u16>,
    /// vendor ID in DFU mode, if different
    #[clap(long, value_parser=hex_u16)]
    vendor_dfu: Option<u16>,
    /// product ID in DFU mode, if different
    #[clap(long, value_parser=hex_u16)]
    product_dfu: Option<u16>,
    /// serial number
    #[clap(short = 'S', long)]
    serial: Option<String>,
    /// serial number in DFU mode, if different
    #[clap(long)]
    serial_dfu: Option<String>,
    /// bus path (ex: "1-1.2")
    #[clap(long)]
    path: Option<String>,
    /// device address on its bus
    #[clap(long)]
    devnum: Option<u8>,
    /// configuration value
    #[clap(short, long)]
    config: Option<u8>,
    /// interface number
    #[clap(short, long)]
    interface: Option<u8>,
    /// alternate setting number or name
    #[clap(short, long)]
    alt: Option<String>,
    /// transfer size, overrides the device's wTransferSize
    #[clap(short, long, value_parser=maybe_hex::<u16>)]
    transfer_size: Option<u16>,
    /// control transfer timeout in milliseconds
    #[clap(long, default_value_t = 5000)]
    usb_timeout: u64,
}

impl DeviceArgs {
    fn criteria(&self) -> MatchCriteria {
        let (alt_setting, alt_name) = match &self.alt {
            Some(alt) => match alt.parse::<u8>() {
                Ok(num) => (Some(num), None),
                Err(_) => (None, Some(alt.clone())),
            },
            None => (None, None),
        };
        MatchCriteria {
            vendor: self.vendor,
            product: self.product,
            vendor_dfu: self.vendor_dfu,
            product_dfu: self.product_dfu,
            serial: self.serial.clone(),
            serial_dfu: self.serial_dfu.clone(),
            path: self.path.clone(),
            config: self.config,
            interface: self.interface,
            alt_setting,
            alt_name,
            devnum: self.devnum,
        }
    }

    fn flasher(&self, suffix_policy: SuffixPolicy) -> Flasher {
        let backend =
            NusbBackend::new(Duration::from_millis(self.usb_timeout));
        Flasher::new(
            backend,
            FlashOptions {
                criteria: self.criteria(),
                transfer_size: self.transfer_size,
                suffix_policy,
            },
        )
    }
}

fn hex_u16(s: &str) -> Result<u16, String> {
    <u16>::from_str_radix(s, 16).map_err(|e| format!("{e}"))
}

fn parse_length(s: &str) -> Result<usize, String> {
    let len = parse_size(s).map_err(|e| format!("{e}"))?;
    len.try_into().map_err(|e| format!("{e}"))
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    env_logger::init();

    if let Err(err) = match &cli.command.unwrap_or_default() {
        Commands::List { device } => list_dfu_devices(&device.criteria()),
        Commands::Download {
            file,
            device,
            require_suffix,
            no_suffix,
        } => {
            let policy = match (*require_suffix, *no_suffix) {
                (true, _) => SuffixPolicy::Needs,
                (_, true) => SuffixPolicy::No,
                _ => SuffixPolicy::Maybe,
            };
            download_file(&device.flasher(policy), file)
        }
        Commands::Upload {
            file,
            device,
            length,
        } => upload_file(&device.flasher(SuffixPolicy::No), file, *length),
        Commands::Detach { device, timeout } => {
            detach(&device.flasher(SuffixPolicy::No), *timeout)
        }
        Commands::Status { device } => {
            show_status(&device.flasher(SuffixPolicy::No))
        }
    } {
        eprintln!("Error: {err}");
        ExitCode::from(err.exit_code())
    } else {
        ExitCode::SUCCESS
    }
}
