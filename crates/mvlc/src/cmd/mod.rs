use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand, ValueEnum};
use mvlc_command::{vme, DataWidth};
use mvlc_transport::{ConnectionType, COMMAND_PORT};

use crate::exit::{CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod decode;
pub mod encode;
pub mod register;
pub mod replay;
pub mod version;
pub mod vme_read;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Describe frame header, system event header or Ethernet header words.
    Decode(DecodeArgs),
    /// Encode a command text file into controller words.
    Encode(EncodeArgs),
    /// Run a raw readout capture through the reader and parser.
    Replay(ReplayArgs),
    /// Read or write a controller register over Ethernet.
    Register(RegisterArgs),
    /// Single cycle VME read over Ethernet.
    VmeRead(VmeReadArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Decode(args) => decode::run(args, format),
        Command::Encode(args) => encode::run(args, format),
        Command::Replay(args) => replay::run(args, format),
        Command::Register(args) => register::run(args, format),
        Command::VmeRead(args) => vme_read::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct DecodeArgs {
    /// Words in hex (0x prefix optional).
    #[arg(required = true)]
    pub words: Vec<String>,
    /// Treat the two words as an Ethernet payload header.
    #[arg(long)]
    pub eth: bool,
}

#[derive(Args, Debug)]
pub struct EncodeArgs {
    /// Command text file, one command per line.
    pub file: PathBuf,
    /// Encode as a stack instead of a super command buffer.
    #[arg(long)]
    pub stack: bool,
    /// Output pipe of the stack (0 = command, 1 = data).
    #[arg(long, default_value = "1")]
    pub pipe: u8,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum ConnectionArg {
    Usb,
    Eth,
}

impl From<ConnectionArg> for ConnectionType {
    fn from(arg: ConnectionArg) -> Self {
        match arg {
            ConnectionArg::Usb => ConnectionType::Usb,
            ConnectionArg::Eth => ConnectionType::Eth,
        }
    }
}

#[derive(Args, Debug)]
pub struct ReplayArgs {
    /// Raw capture of the data pipe.
    pub file: PathBuf,
    /// Link type the capture was recorded from.
    #[arg(long, default_value = "usb")]
    pub connection: ConnectionArg,
    /// Readout stack configuration (JSON).
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
    /// Readout buffer capacity in bytes.
    #[arg(long, default_value = "1048576")]
    pub buffer_size: usize,
}

#[derive(Args, Debug)]
pub struct ControllerArgs {
    /// Controller hostname or IP address.
    pub host: String,
    /// Command pipe UDP port.
    #[arg(long, default_value_t = COMMAND_PORT)]
    pub port: u16,
    /// Read timeout per attempt (e.g. 500ms, 1s).
    #[arg(long, default_value = "500ms")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct RegisterArgs {
    #[command(flatten)]
    pub controller: ControllerArgs,
    /// Register address in hex.
    pub address: String,
    /// Value to write. Reads the register when omitted.
    pub value: Option<String>,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum WidthArg {
    D16,
    D32,
}

impl From<WidthArg> for DataWidth {
    fn from(arg: WidthArg) -> Self {
        match arg {
            WidthArg::D16 => DataWidth::D16,
            WidthArg::D32 => DataWidth::D32,
        }
    }
}

#[derive(Args, Debug)]
pub struct VmeReadArgs {
    #[command(flatten)]
    pub controller: ControllerArgs,
    /// VME address in hex.
    pub address: String,
    /// Address modifier, by name (a16, a24, a32) or number.
    #[arg(long, default_value = "a32")]
    pub amod: String,
    #[arg(long, default_value = "d16")]
    pub width: WidthArg,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Parse a hex word, with or without `0x` prefix.
pub fn parse_hex(input: &str) -> CliResult<u32> {
    let digits = input
        .trim()
        .trim_start_matches("0x")
        .trim_start_matches("0X");
    u32::from_str_radix(digits, 16)
        .map_err(|_| CliError::new(USAGE, format!("invalid hex value: {input}")))
}

pub fn parse_register_address(input: &str) -> CliResult<u16> {
    let value = parse_hex(input)?;
    u16::try_from(value)
        .map_err(|_| CliError::new(USAGE, format!("register address out of range: {input}")))
}

/// Resolve a symbolic or numeric address modifier.
pub fn parse_amod(input: &str) -> CliResult<u8> {
    if let Some(amod) = vme::amod_from_name(input) {
        return Ok(amod);
    }
    let value = parse_hex(input)?;
    u8::try_from(value)
        .ok()
        .filter(|amod| *amod <= 0x3f)
        .ok_or_else(|| CliError::new(USAGE, format!("invalid address modifier: {input}")))
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;
    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}
