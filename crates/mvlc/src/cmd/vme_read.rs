use mvlc_command::DataWidth;
use serde::Serialize;

use crate::cmd::register::connect;
use crate::cmd::{parse_amod, parse_hex, VmeReadArgs};
use crate::exit::{transaction_error, CliResult, SUCCESS};
use crate::output::{hex, print_json, OutputFormat};

#[derive(Serialize)]
struct VmeReadOutput {
    address: String,
    amod: String,
    width: DataWidth,
    value: String,
}

pub fn run(args: VmeReadArgs, format: OutputFormat) -> CliResult<i32> {
    let address = parse_hex(&args.address)?;
    let amod = parse_amod(&args.amod)?;
    let width = DataWidth::from(args.width);
    let pipe = connect(&args.controller)?;

    let value = pipe
        .vme_read(address, amod, width)
        .map_err(|err| transaction_error("vme read failed", err))?;

    let out = VmeReadOutput {
        address: hex(address),
        amod: format!("0x{amod:02x}"),
        width,
        value: hex(value),
    };
    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table | OutputFormat::Pretty => println!(
            "{} amod={} {} -> {}",
            out.address, out.amod, out.width, out.value
        ),
        OutputFormat::Raw => println!("{}", out.value),
    }
    Ok(SUCCESS)
}
