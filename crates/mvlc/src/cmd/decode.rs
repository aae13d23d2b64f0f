use mvlc_frame::header::describe;
use mvlc_frame::PayloadHeaderInfo;
use serde::Serialize;

use crate::cmd::{parse_hex, DecodeArgs};
use crate::exit::{CliError, CliResult, SUCCESS, USAGE};
use crate::output::{hex, print_json, print_table, OutputFormat};

#[derive(Serialize)]
struct WordOutput {
    word: String,
    description: String,
}

#[derive(Serialize)]
struct EthHeaderOutput {
    header0: String,
    header1: String,
    channel: u8,
    packet_number: u16,
    controller_id: u8,
    data_words: u16,
    udp_timestamp: u32,
    next_header_pointer: Option<u16>,
}

pub fn run(args: DecodeArgs, format: OutputFormat) -> CliResult<i32> {
    let words = args
        .words
        .iter()
        .map(|w| parse_hex(w))
        .collect::<CliResult<Vec<u32>>>()?;

    if args.eth {
        let [header0, header1] = words[..] else {
            return Err(CliError::new(
                USAGE,
                format!("--eth takes exactly two words, got {}", words.len()),
            ));
        };
        print_eth(&eth_output(PayloadHeaderInfo::new(header0, header1)), format);
        return Ok(SUCCESS);
    }

    let out: Vec<WordOutput> = words
        .iter()
        .map(|&word| WordOutput {
            word: hex(word),
            description: describe(word),
        })
        .collect();
    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table => print_table(
            &["WORD", "DESCRIPTION"],
            out.iter().map(|w| vec![w.word.clone(), w.description.clone()]),
        ),
        OutputFormat::Pretty | OutputFormat::Raw => {
            for w in &out {
                println!("{} {}", w.word, w.description);
            }
        }
    }
    Ok(SUCCESS)
}

fn eth_output(info: PayloadHeaderInfo) -> EthHeaderOutput {
    EthHeaderOutput {
        header0: hex(info.header0),
        header1: hex(info.header1),
        channel: info.packet_channel(),
        packet_number: info.packet_number(),
        controller_id: info.controller_id(),
        data_words: info.data_word_count(),
        udp_timestamp: info.udp_timestamp(),
        next_header_pointer: info
            .is_next_header_pointer_present()
            .then(|| info.next_header_pointer()),
    }
}

fn print_eth(out: &EthHeaderOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(out),
        OutputFormat::Table | OutputFormat::Pretty | OutputFormat::Raw => {
            let pointer = out
                .next_header_pointer
                .map_or_else(|| "none".to_string(), |p| p.to_string());
            println!("Ethernet payload header {} {}:", out.header0, out.header1);
            println!("  Channel:        {}", out.channel);
            println!("  Packet number:  {}", out.packet_number);
            println!("  Controller id:  {}", out.controller_id);
            println!("  Data words:     {}", out.data_words);
            println!("  UDP timestamp:  {}", out.udp_timestamp);
            println!("  Header pointer: {pointer}");
        }
    }
}
