use mvlc_transaction::CommandPipe;
use mvlc_transport::{connect_eth, EthConfig, EthPipe};
use serde::Serialize;

use crate::cmd::{parse_duration, parse_hex, parse_register_address, ControllerArgs, RegisterArgs};
use crate::exit::{transaction_error, transport_error, CliResult, SUCCESS};
use crate::output::{hex, print_json, OutputFormat};

#[derive(Serialize)]
struct RegisterOutput {
    address: String,
    value: String,
    written: bool,
}

pub fn run(args: RegisterArgs, format: OutputFormat) -> CliResult<i32> {
    let address = parse_register_address(&args.address)?;
    let value = args.value.as_deref().map(parse_hex).transpose()?;
    let pipe = connect(&args.controller)?;

    let out = match value {
        Some(value) => {
            pipe.write_register(address, value)
                .map_err(|err| transaction_error("register write failed", err))?;
            RegisterOutput {
                address: format!("0x{address:04x}"),
                value: hex(value),
                written: true,
            }
        }
        None => {
            let value = pipe
                .read_register(address)
                .map_err(|err| transaction_error("register read failed", err))?;
            RegisterOutput {
                address: format!("0x{address:04x}"),
                value: hex(value),
                written: false,
            }
        }
    };

    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table | OutputFormat::Pretty => {
            let op = if out.written { "wrote" } else { "read" };
            println!("{} {} {op} {}", args.controller.host, out.address, out.value);
        }
        OutputFormat::Raw => println!("{}", out.value),
    }
    Ok(SUCCESS)
}

/// Open the command pipe of an Ethernet controller.
pub fn connect(args: &ControllerArgs) -> CliResult<CommandPipe<EthPipe>> {
    let timeout = parse_duration(&args.timeout)?;
    let config = EthConfig {
        command_port: args.port,
        data_port: args.port.wrapping_add(1),
        read_timeout: Some(timeout),
        write_timeout: Some(timeout),
        data_receive_buffer: None,
        ..EthConfig::new(args.host.as_str())
    };
    let (command, _data) =
        connect_eth(&config).map_err(|err| transport_error("connect failed", err))?;
    Ok(CommandPipe::new(command))
}
