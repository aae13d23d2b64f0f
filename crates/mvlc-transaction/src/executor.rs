//! Execution of stack command lists of any length.
//!
//! The immediate stack only holds [`IMMEDIATE_STACK_RESERVED_WORDS`] words.
//! Longer lists, such as module init sequences, are split into parts that
//! each fit, and every part runs as its own marker-tagged stack transaction.

use std::mem;

use mvlc_command::stacks::IMMEDIATE_STACK_RESERVED_WORDS;
use mvlc_command::{CommandError, DataWidth, StackCommand, StackCommandBuilder, StackGroup};
use mvlc_transport::Pipe;
use tracing::{debug, warn};

use crate::error::{Result, TransactionError};
use crate::ops::take_block_frames;
use crate::pipe::CommandPipe;

/// Stack start and end words plus the reference marker of each part.
const PART_OVERHEAD_WORDS: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOptions {
    /// Stack words available to one part, framing included. Capped at the
    /// reserved immediate stack area.
    pub max_stack_words: u16,
    /// Run the remaining parts after a part reports a VME error. Transport
    /// and protocol failures always stop execution.
    pub continue_on_error: bool,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            max_stack_words: IMMEDIATE_STACK_RESERVED_WORDS,
            continue_on_error: false,
        }
    }
}

/// Split `commands` into runs that each fit one immediate stack of
/// `max_stack_words` words, keeping their order.
pub fn split_commands(
    commands: &[StackCommand],
    max_stack_words: u16,
) -> Result<Vec<Vec<StackCommand>>> {
    let max_words = max_stack_words.min(IMMEDIATE_STACK_RESERVED_WORDS);
    let budget = usize::from(max_words).saturating_sub(PART_OVERHEAD_WORDS);

    let mut parts = Vec::new();
    let mut part = Vec::new();
    let mut used = 0;
    for cmd in commands {
        let len = cmd.encoded_len();
        if len > budget {
            return Err(CommandError::BudgetExceeded {
                words: len + PART_OVERHEAD_WORDS,
                max: usize::from(max_words),
            }
            .into());
        }
        if used + len > budget {
            parts.push(mem::take(&mut part));
            used = 0;
        }
        part.push(*cmd);
        used += len;
    }
    if !part.is_empty() {
        parts.push(part);
    }
    Ok(parts)
}

/// Assign the words of a stack response to the commands that produced them.
///
/// Single reads are masked to their data width. Block reads yield their data
/// with the block frame headers removed. Writes and waits produce nothing.
pub fn split_response(commands: &[StackCommand], words: &[u32]) -> Result<Vec<Vec<u32>>> {
    let mut pos = 0;
    let next = |pos: &mut usize| {
        let word = words
            .get(*pos)
            .copied()
            .ok_or(TransactionError::UnexpectedResponseSize {
                expected: *pos + 1,
                actual: words.len(),
            })?;
        *pos += 1;
        Ok::<u32, TransactionError>(word)
    };

    let mut out = Vec::with_capacity(commands.len());
    for cmd in commands {
        let produced = match *cmd {
            StackCommand::VmeRead { width, .. } => {
                let value = next(&mut pos)?;
                vec![match width {
                    DataWidth::D16 => value & 0xffff,
                    DataWidth::D32 => value,
                }]
            }
            StackCommand::WriteMarker { .. } | StackCommand::WriteSpecial { .. } => {
                vec![next(&mut pos)?]
            }
            StackCommand::VmeBlockRead { .. } => {
                let (data, end) = take_block_frames(words, pos)?;
                pos = end;
                data
            }
            StackCommand::VmeWrite { .. } | StackCommand::Wait { .. } | StackCommand::SignalAccu => {
                Vec::new()
            }
        };
        out.push(produced);
    }

    if pos != words.len() {
        return Err(TransactionError::UnexpectedResponseSize {
            expected: pos,
            actual: words.len(),
        });
    }
    Ok(out)
}

/// One executed part.
#[derive(Debug)]
pub struct PartResult {
    pub commands: Vec<StackCommand>,
    /// Response words of each command, in command order.
    pub result: Result<Vec<Vec<u32>>>,
}

#[derive(Debug, Clone, Copy)]
pub enum CommandOutcome<'a> {
    Done(&'a [u32]),
    /// The part holding the command failed.
    Failed(&'a TransactionError),
    /// Execution stopped before the command's part ran.
    NotRun,
}

impl CommandOutcome<'_> {
    pub fn is_done(&self) -> bool {
        matches!(self, CommandOutcome::Done(_))
    }
}

#[derive(Debug, Clone)]
pub struct CommandResult<'a> {
    pub command: StackCommand,
    pub outcome: CommandOutcome<'a>,
}

/// Results of one named stack group.
#[derive(Debug, Clone)]
pub struct GroupResults<'a> {
    pub name: &'a str,
    pub results: Vec<CommandResult<'a>>,
}

/// Everything a multi-part execution produced.
#[derive(Debug, Default)]
pub struct ExecReport {
    pub parts: Vec<PartResult>,
    /// Commands of the parts that were not run.
    pub not_run: Vec<StackCommand>,
}

impl ExecReport {
    pub fn first_error(&self) -> Option<&TransactionError> {
        self.parts.iter().find_map(|part| part.result.as_ref().err())
    }

    /// True if every part ran and succeeded.
    pub fn is_ok(&self) -> bool {
        self.not_run.is_empty() && self.first_error().is_none()
    }

    /// Outcome of every command in execution order.
    pub fn results(&self) -> Vec<CommandResult<'_>> {
        let mut out = Vec::new();
        for part in &self.parts {
            for (i, &command) in part.commands.iter().enumerate() {
                let outcome = match &part.result {
                    Ok(responses) => {
                        CommandOutcome::Done(responses.get(i).map_or(&[][..], Vec::as_slice))
                    }
                    Err(err) => CommandOutcome::Failed(err),
                };
                out.push(CommandResult { command, outcome });
            }
        }
        out.extend(self.not_run.iter().map(|&command| CommandResult {
            command,
            outcome: CommandOutcome::NotRun,
        }));
        out
    }

    /// Regroup the results along the groups the commands came from.
    pub fn grouped<'a>(&'a self, groups: &'a [StackGroup]) -> Vec<GroupResults<'a>> {
        let mut results = self.results().into_iter();
        groups
            .iter()
            .map(|group| GroupResults {
                name: &group.name,
                results: results.by_ref().take(group.commands.len()).collect(),
            })
            .collect()
    }
}

impl<P: Pipe> CommandPipe<P> {
    /// Run `commands` through the immediate stack, split into as many parts
    /// as needed.
    ///
    /// Only a list that cannot be split is an error here. Failures of
    /// individual parts are recorded in the report.
    pub fn execute_commands(
        &self,
        commands: &[StackCommand],
        options: &ExecOptions,
    ) -> Result<ExecReport> {
        let mut parts = split_commands(commands, options.max_stack_words)?.into_iter();
        let mut report = ExecReport::default();

        for (index, part) in parts.by_ref().enumerate() {
            let result = self
                .stack_transaction(&part)
                .and_then(|response| split_response(&part, &response.words));
            let stop = match &result {
                Ok(_) => false,
                Err(TransactionError::StackExecution { flags }) => {
                    warn!(part = index, %flags, "stack part reported errors");
                    !options.continue_on_error
                }
                Err(err) => {
                    warn!(part = index, error = %err, "stack part failed");
                    true
                }
            };
            report.parts.push(PartResult {
                commands: part,
                result,
            });
            if stop {
                break;
            }
        }
        report.not_run = parts.flatten().collect();
        debug!(
            parts = report.parts.len(),
            not_run = report.not_run.len(),
            "stack execution done"
        );
        Ok(report)
    }

    /// Run every command of `stack`. Use [`ExecReport::grouped`] with
    /// `stack.groups()` to map the results back to the stack's groups.
    pub fn execute_stack(
        &self,
        stack: &StackCommandBuilder,
        options: &ExecOptions,
    ) -> Result<ExecReport> {
        self.execute_commands(&stack.commands(), options)
    }
}
