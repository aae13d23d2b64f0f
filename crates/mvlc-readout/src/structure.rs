use mvlc_command::stacks::{FIRST_READOUT_STACK_ID, READOUT_STACK_COUNT};
use mvlc_command::{StackCommand, StackCommandBuilder, StackGroup};
use serde::{Deserialize, Serialize};

use crate::error::{ReadoutError, Result};
use crate::sink::PartKind;

/// Output layout of one module group: fixed prefix words, an optional
/// block read of variable size, then fixed suffix words.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleReadoutStructure {
    pub prefix_len: usize,
    pub has_dynamic: bool,
    pub suffix_len: usize,
}

impl ModuleReadoutStructure {
    pub fn new(prefix_len: usize, has_dynamic: bool, suffix_len: usize) -> Self {
        Self {
            prefix_len,
            has_dynamic,
            suffix_len,
        }
    }

    /// Whether the module produces the given part at all.
    pub fn has_part(&self, kind: PartKind) -> bool {
        match kind {
            PartKind::Prefix => self.prefix_len > 0,
            PartKind::Dynamic => self.has_dynamic,
            PartKind::Suffix => self.suffix_len > 0,
        }
    }

    /// True if the module produces no output words.
    pub fn is_empty(&self) -> bool {
        self.prefix_len == 0 && !self.has_dynamic && self.suffix_len == 0
    }

    /// Derive the layout from the group's commands.
    ///
    /// Single reads, markers and special words each produce one output word;
    /// the block read starts the dynamic part. Writes, waits and accumulator
    /// signals produce nothing. Returns `None` for more than one block read.
    pub fn from_commands(commands: &[StackCommand]) -> Option<Self> {
        let mut module = Self::default();
        for cmd in commands {
            match cmd {
                StackCommand::VmeBlockRead { .. } => {
                    if module.has_dynamic {
                        return None;
                    }
                    module.has_dynamic = true;
                }
                StackCommand::VmeRead { .. }
                | StackCommand::WriteMarker { .. }
                | StackCommand::WriteSpecial { .. } => {
                    if module.has_dynamic {
                        module.suffix_len += 1;
                    } else {
                        module.prefix_len += 1;
                    }
                }
                StackCommand::VmeWrite { .. }
                | StackCommand::Wait { .. }
                | StackCommand::SignalAccu => {}
            }
        }
        Some(module)
    }
}

/// Per event (readout stack), the layout of each of its modules.
///
/// Event index `i` is produced by stack `i + 1`; stack 0 runs immediate
/// commands and never carries readout data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadoutStructure {
    events: Vec<Vec<ModuleReadoutStructure>>,
}

impl ReadoutStructure {
    pub fn new(events: Vec<Vec<ModuleReadoutStructure>>) -> Self {
        Self { events }
    }

    /// Build from one stack builder per event, one module per group.
    pub fn from_stacks(stacks: &[StackCommandBuilder]) -> Result<Self> {
        if stacks.len() > usize::from(READOUT_STACK_COUNT) {
            return Err(ReadoutError::TooManyStacks {
                count: stacks.len(),
                max: usize::from(READOUT_STACK_COUNT),
            });
        }
        let events = stacks
            .iter()
            .enumerate()
            .map(|(event, stack)| {
                stack
                    .groups()
                    .iter()
                    .map(|group| module_structure(event, group))
                    .collect::<Result<Vec<_>>>()
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { events })
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    pub fn event(&self, event_index: usize) -> Option<&[ModuleReadoutStructure]> {
        self.events.get(event_index).map(Vec::as_slice)
    }

    /// Event index fed by frames carrying `stack`.
    pub fn event_index_for_stack(&self, stack: u8) -> Option<usize> {
        let index = usize::from(stack.checked_sub(FIRST_READOUT_STACK_ID)?);
        (index < self.events.len()).then_some(index)
    }

    pub fn events(&self) -> &[Vec<ModuleReadoutStructure>] {
        &self.events
    }
}

fn module_structure(event: usize, group: &StackGroup) -> Result<ModuleReadoutStructure> {
    ModuleReadoutStructure::from_commands(&group.commands).ok_or_else(|| {
        ReadoutError::MultipleBlockReads {
            event,
            group: group.name.clone(),
        }
    })
}
