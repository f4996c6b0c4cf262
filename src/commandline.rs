use clap::{Parser, Subcommand, ValueEnum};
use clap_num::maybe_hex;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use std::time::Duration;
use svbms_lib::protocol::{Command, FrameConfig, StartMarker};
use svbms_lib::receiver::{ChecksumMode, FrameReceiver};
use svbms_lib::serialport::{PortConfig, DEFAULT_BAUD_RATE};

fn default_device_name() -> String {
    if cfg!(target_os = "windows") {
        String::from("COM1")
    } else {
        String::from("/dev/ttyUSB0")
    }
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum CliCommands {
    /// Fetch the current date and time of the BMS
    Time,
    /// Fetch the protocol version spoken by the BMS
    ProtocolVersion,
    /// Fetch the device address of the BMS
    DeviceAddress,
    /// Fetch the manufacturer information
    Manufacturer,
    /// Fetch analog data: cell voltages, temperatures, current, capacity
    AnalogData {
        /// Request the fixed point data set
        #[clap(long, short, action)]
        fixed: bool,
    },
    /// Run all fetch commands one after the other
    All,
}

impl CliCommands {
    pub fn commands(&self) -> Vec<Command> {
        match self {
            CliCommands::Time => vec![Command::FetchTime],
            CliCommands::ProtocolVersion => vec![Command::FetchProtocolVersion],
            CliCommands::DeviceAddress => vec![Command::FetchDeviceAddress],
            CliCommands::Manufacturer => vec![Command::FetchManufacturer],
            CliCommands::AnalogData { fixed } => vec![Command::FetchAnalogData { fixed: *fixed }],
            CliCommands::All => Command::ALL.to_vec(),
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq)]
pub enum Soi {
    #[value(name = "3e")]
    Soi3E,
    #[value(name = "7e")]
    Soi7E,
}

impl From<Soi> for StartMarker {
    fn from(soi: Soi) -> Self {
        match soi {
            Soi::Soi3E => StartMarker::Soi3E,
            Soi::Soi7E => StartMarker::Soi7E,
        }
    }
}

const fn about_text() -> &'static str {
    "SuperVolt LiFePO4 BMS command line tool"
}

#[derive(Parser, Debug)]
#[command(version, about=about_text(), long_about = None)]
pub struct CliArgs {
    #[command(flatten)]
    pub verbose: Verbosity<InfoLevel>,

    /// Serial port device path (e.g., /dev/ttyUSB0 on Linux, COM1 on Windows)
    #[arg(short, long, default_value_t = default_device_name())]
    pub device: String,

    #[arg(short, long, default_value_t = DEFAULT_BAUD_RATE)]
    pub baud_rate: u32,

    #[command(subcommand)]
    pub command: CliCommands,

    /// Device address of the BMS, decimal or hex with 0x prefix
    #[arg(short, long, value_parser = maybe_hex::<u8>, default_value = "1")]
    pub address: u8,

    /// Start of information byte
    #[arg(long, value_enum, default_value_t = Soi::Soi3E)]
    pub soi: Soi,

    /// Send every hex digit of LENGTH and INFO as two ASCII hex digits
    #[arg(long, action)]
    pub ascii_length: bool,

    /// Send every hex digit of CHKSUM as two ASCII hex digits
    #[arg(long, action)]
    pub ascii_checksum: bool,

    /// Reject responses with an invalid CHKSUM
    #[arg(long, action)]
    pub verify_checksum: bool,

    /// Time to wait for a response (e.g., "500ms", "1s", "2s 500ms")
    #[arg(value_parser = humantime::parse_duration, long, default_value = "1s")]
    pub timeout: Duration,

    /// Print decoded responses as JSON
    #[arg(long, action)]
    pub json: bool,
}

impl CliArgs {
    pub fn frame_config(&self) -> FrameConfig {
        FrameConfig {
            start: self.soi.into(),
            address: self.address,
            length_ascii_doubled: self.ascii_length,
            checksum_ascii_doubled: self.ascii_checksum,
        }
    }

    pub fn port_config(&self) -> PortConfig {
        PortConfig {
            baud_rate: self.baud_rate,
            ..PortConfig::new(&self.device)
        }
    }

    pub fn receiver(&self) -> FrameReceiver {
        let receiver = FrameReceiver::new();
        if self.verify_checksum {
            receiver.with_checksum_verification(ChecksumMode {
                ascii_doubled: self.ascii_checksum,
            })
        } else {
            receiver
        }
    }
}
