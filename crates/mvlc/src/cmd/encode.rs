use mvlc_command::{parse_command_text, Command, StackCommandBuilder, SuperCommandBuilder};
use serde::Serialize;
use tracing::debug;

use crate::cmd::EncodeArgs;
use crate::exit::{io_error, CliError, CliResult, DATA_INVALID, SUCCESS};
use crate::output::{hex, print_json, print_raw_words, print_table, OutputFormat};

#[derive(Serialize)]
struct EncodeOutput {
    kind: &'static str,
    commands: usize,
    words: Vec<String>,
}

pub fn run(args: EncodeArgs, format: OutputFormat) -> CliResult<i32> {
    let text = std::fs::read_to_string(&args.file)
        .map_err(|err| io_error(&format!("failed reading {}", args.file.display()), err))?;
    let (kind, commands, words) = encode_text(&text, args.stack.then_some(args.pipe))?;
    debug!(kind, commands, words = words.len(), "encoded command file");

    match format {
        OutputFormat::Json => print_json(&EncodeOutput {
            kind,
            commands,
            words: words.iter().copied().map(hex).collect(),
        }),
        OutputFormat::Table => print_table(
            &["INDEX", "WORD"],
            words
                .iter()
                .enumerate()
                .map(|(i, &w)| vec![i.to_string(), hex(w)]),
        ),
        OutputFormat::Pretty => {
            for word in &words {
                println!("{}", hex(*word));
            }
        }
        OutputFormat::Raw => print_raw_words(&words),
    }
    Ok(SUCCESS)
}

/// Encode a command file as a super buffer, or as a stack for `stack_pipe`.
///
/// Returns the buffer kind, the command count and the encoded words.
fn encode_text(text: &str, stack_pipe: Option<u8>) -> CliResult<(&'static str, usize, Vec<u32>)> {
    let mut errors = Vec::new();
    let mut super_builder = SuperCommandBuilder::new();
    let mut stack_builder = StackCommandBuilder::new("cli");
    let mut commands = 0;

    for parsed in parse_command_text(text) {
        let added = match (parsed.result, stack_pipe) {
            (Err(err), _) => Err(err.to_string()),
            (Ok(Command::Super(cmd)), None) => super_builder.add(cmd).map(|_| ()).map_err(|e| e.to_string()),
            (Ok(Command::Stack(cmd)), Some(_)) => stack_builder.add(cmd).map(|_| ()).map_err(|e| e.to_string()),
            (Ok(Command::Stack(cmd)), None) => Err(format!("stack command `{cmd}` needs --stack")),
            (Ok(Command::Super(cmd)), Some(_)) => Err(format!("super command `{cmd}` cannot be part of a stack")),
        };
        match added {
            Ok(()) => commands += 1,
            Err(message) => errors.push(format!("line {}: {message}", parsed.line)),
        }
    }

    if !errors.is_empty() {
        for error in &errors {
            eprintln!("{error}");
        }
        return Err(CliError::new(
            DATA_INVALID,
            format!("{} invalid line(s)", errors.len()),
        ));
    }

    Ok(match stack_pipe {
        Some(pipe) => ("stack", commands, stack_builder.encode(pipe)),
        None => ("super", commands, super_builder.encode()),
    })
}
