//! Line oriented text form of commands.
//!
//! One command per line: a verb followed by whitespace separated operands.
//! Operands are positional or named (`key=value`):
//!
//! ```text
//! vme_read 0x00112233 amod=0x09 width=d16
//! vme_read 0x09 d16 0x00112233
//! vme_block_read 0x04000000 amod=mblt64 max=65535
//! write_marker 0x87654321
//! ```
//!
//! `Display` on every command produces the canonical named form.

use std::collections::VecDeque;
use std::fmt;

use serde::Serialize;

use crate::error::ParseError;
use crate::stack_cmd::{special_word, StackCommand};
use crate::super_cmd::SuperCommand;
use crate::vme::{amod_from_name, DataWidth};

/// A command of either dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Command {
    Super(SuperCommand),
    Stack(StackCommand),
}

impl From<SuperCommand> for Command {
    fn from(cmd: SuperCommand) -> Self {
        Command::Super(cmd)
    }
}

impl From<StackCommand> for Command {
    fn from(cmd: StackCommand) -> Self {
        Command::Stack(cmd)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Super(cmd) => fmt::Display::fmt(cmd, f),
            Command::Stack(cmd) => fmt::Display::fmt(cmd, f),
        }
    }
}

impl fmt::Display for SuperCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            SuperCommand::ReferenceWord { value } => write!(f, "reference_word 0x{value:04x}"),
            SuperCommand::ReadLocal { address } => write!(f, "read_local 0x{address:04x}"),
            SuperCommand::WriteLocal { address, value } => {
                write!(f, "write_local 0x{address:04x} 0x{value:08x}")
            }
            SuperCommand::WriteReset => f.write_str("write_reset"),
        }
    }
}

impl fmt::Display for StackCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            StackCommand::VmeRead {
                address,
                amod,
                width,
                late,
            } => {
                let verb = if late { "vme_read_late" } else { "vme_read" };
                write!(f, "{verb} 0x{address:08x} amod=0x{amod:02x} width={width}")
            }
            StackCommand::VmeBlockRead {
                address,
                amod,
                max_transfers,
                fifo,
            } => {
                let verb = if fifo { "vme_block_read" } else { "vme_mem_read" };
                write!(f, "{verb} 0x{address:08x} amod=0x{amod:02x} max={max_transfers}")
            }
            StackCommand::VmeWrite {
                address,
                value,
                amod,
                width,
            } => write!(
                f,
                "vme_write 0x{address:08x} 0x{value:08x} amod=0x{amod:02x} width={width}"
            ),
            StackCommand::WriteMarker { value } => write!(f, "write_marker 0x{value:08x}"),
            StackCommand::WriteSpecial { value } => match value {
                special_word::TIMESTAMP => f.write_str("write_special timestamp"),
                special_word::ACCU => f.write_str("write_special accu"),
                _ => write!(f, "write_special 0x{value:06x}"),
            },
            StackCommand::Wait { clocks } => write!(f, "wait {clocks}"),
            StackCommand::SignalAccu => f.write_str("signal_accu"),
        }
    }
}

/// Parse one command line.
pub fn parse_command_line(line: &str) -> Result<Command, ParseError> {
    let mut tokens = line.split_whitespace();
    let verb = tokens.next().ok_or(ParseError::Empty)?.to_ascii_lowercase();
    let mut ops = Operands::new(&verb, tokens);

    let cmd: Command = match verb.as_str() {
        "reference_word" | "ref" => SuperCommand::ReferenceWord {
            value: ops.positional("value", parse_u16)?,
        }
        .into(),
        "read_local" => SuperCommand::ReadLocal {
            address: ops.positional("address", parse_u16)?,
        }
        .into(),
        "write_local" => SuperCommand::WriteLocal {
            address: ops.positional("address", parse_u16)?,
            value: ops.positional("value", parse_u32)?,
        }
        .into(),
        "write_reset" => SuperCommand::WriteReset.into(),
        "vme_read" | "vme_read_late" => {
            let (amod, width, address) = if ops.is_legacy(3) {
                (
                    ops.positional("amod", parse_amod)?,
                    ops.positional("width", parse_width)?,
                    ops.positional("address", parse_u32)?,
                )
            } else {
                let address = ops.positional("address", parse_u32)?;
                (
                    ops.named("amod", parse_amod)?,
                    ops.named("width", parse_width)?,
                    address,
                )
            };
            StackCommand::VmeRead {
                address,
                amod,
                width,
                late: verb == "vme_read_late",
            }
            .into()
        }
        "vme_block_read" | "vme_mem_read" => {
            let (amod, max_transfers, address) = if ops.is_legacy(3) {
                (
                    ops.positional("amod", parse_amod)?,
                    ops.positional("max", parse_u16)?,
                    ops.positional("address", parse_u32)?,
                )
            } else {
                let address = ops.positional("address", parse_u32)?;
                (
                    ops.named("amod", parse_amod)?,
                    ops.named("max", parse_u16)?,
                    address,
                )
            };
            StackCommand::VmeBlockRead {
                address,
                amod,
                max_transfers,
                fifo: verb == "vme_block_read",
            }
            .into()
        }
        "vme_write" => {
            let (amod, width, address, value) = if ops.is_legacy(4) {
                (
                    ops.positional("amod", parse_amod)?,
                    ops.positional("width", parse_width)?,
                    ops.positional("address", parse_u32)?,
                    ops.positional("value", parse_u32)?,
                )
            } else {
                let address = ops.positional("address", parse_u32)?;
                let value = ops.positional("value", parse_u32)?;
                (
                    ops.named("amod", parse_amod)?,
                    ops.named("width", parse_width)?,
                    address,
                    value,
                )
            };
            StackCommand::VmeWrite {
                address,
                value,
                amod,
                width,
            }
            .into()
        }
        "write_marker" | "marker" => StackCommand::WriteMarker {
            value: ops.positional("value", parse_u32)?,
        }
        .into(),
        "write_special" => StackCommand::WriteSpecial {
            value: ops.positional("value", parse_special)?,
        }
        .into(),
        "wait" => StackCommand::Wait {
            clocks: ops.positional("clocks", parse_u32)?,
        }
        .into(),
        "signal_accu" => StackCommand::SignalAccu.into(),
        _ => return Err(ParseError::UnknownCommand(verb.clone())),
    };

    ops.finish()?;
    if let Command::Stack(stack_cmd) = cmd {
        stack_cmd.validate()?;
    }
    Ok(cmd)
}

/// Result of parsing one non-blank line of a command file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedLine {
    /// 1-based line number.
    pub line: usize,
    pub result: Result<Command, ParseError>,
}

/// Parse a whole command file. Blank lines and `#` comments are skipped;
/// every other line yields its own result so one bad line does not hide
/// the rest.
pub fn parse_command_text(text: &str) -> Vec<ParsedLine> {
    text.lines()
        .enumerate()
        .filter_map(|(index, raw)| {
            let content = raw.split('#').next().unwrap_or("").trim();
            if content.is_empty() {
                return None;
            }
            Some(ParsedLine {
                line: index + 1,
                result: parse_command_line(content),
            })
        })
        .collect()
}

struct Operands<'a> {
    verb: &'a str,
    positional: VecDeque<&'a str>,
    named: Vec<(&'a str, &'a str)>,
}

impl<'a> Operands<'a> {
    fn new(verb: &'a str, tokens: impl Iterator<Item = &'a str>) -> Self {
        let mut positional = VecDeque::new();
        let mut named = Vec::new();
        for token in tokens {
            match token.split_once('=') {
                Some((key, value)) => named.push((key, value)),
                None => positional.push_back(token),
            }
        }
        Self {
            verb,
            positional,
            named,
        }
    }

    /// Whether the line uses the all-positional form with `count` operands.
    fn is_legacy(&self, count: usize) -> bool {
        self.named.is_empty() && self.positional.len() == count
    }

    fn positional<T>(
        &mut self,
        operand: &'static str,
        parse: fn(&str) -> Option<T>,
    ) -> Result<T, ParseError> {
        let token = self
            .positional
            .pop_front()
            .ok_or_else(|| ParseError::MissingOperand {
                verb: self.verb.to_string(),
                operand,
            })?;
        self.convert(operand, token, parse)
    }

    fn named<T>(
        &mut self,
        operand: &'static str,
        parse: fn(&str) -> Option<T>,
    ) -> Result<T, ParseError> {
        let index = self
            .named
            .iter()
            .position(|(key, _)| key.eq_ignore_ascii_case(operand))
            .ok_or_else(|| ParseError::MissingOperand {
                verb: self.verb.to_string(),
                operand,
            })?;
        let (_, token) = self.named.remove(index);
        self.convert(operand, token, parse)
    }

    fn convert<T>(
        &self,
        operand: &'static str,
        token: &str,
        parse: fn(&str) -> Option<T>,
    ) -> Result<T, ParseError> {
        parse(token).ok_or_else(|| ParseError::BadOperand {
            verb: self.verb.to_string(),
            operand,
            token: token.to_string(),
        })
    }

    fn finish(self) -> Result<(), ParseError> {
        let leftover = self
            .positional
            .front()
            .map(|t| t.to_string())
            .or_else(|| self.named.first().map(|(k, v)| format!("{k}={v}")));
        match leftover {
            Some(token) => Err(ParseError::UnexpectedOperand {
                verb: self.verb.to_string(),
                token,
            }),
            None => Ok(()),
        }
    }
}

fn parse_u32(token: &str) -> Option<u32> {
    let lower = token.to_ascii_lowercase();
    if let Some(hex) = lower.strip_prefix("0x") {
        u32::from_str_radix(hex, 16).ok()
    } else if let Some(bin) = lower.strip_prefix("0b") {
        u32::from_str_radix(bin, 2).ok()
    } else {
        lower.parse().ok()
    }
}

fn parse_u16(token: &str) -> Option<u16> {
    parse_u32(token).and_then(|v| u16::try_from(v).ok())
}

fn parse_amod(token: &str) -> Option<u8> {
    amod_from_name(token).or_else(|| parse_u32(token).and_then(|v| u8::try_from(v).ok()))
}

fn parse_width(token: &str) -> Option<DataWidth> {
    token.parse().ok()
}

fn parse_special(token: &str) -> Option<u32> {
    match token.to_ascii_lowercase().as_str() {
        "timestamp" => Some(special_word::TIMESTAMP),
        "accu" | "accumulator" => Some(special_word::ACCU),
        _ => parse_u32(token),
    }
}
