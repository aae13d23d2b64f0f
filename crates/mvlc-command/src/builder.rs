use serde::{Deserialize, Serialize};

use crate::codec::{encode_stack, encode_super, CommandList};
use crate::error::{CommandError, Result};
use crate::stack_cmd::{special_word, StackCommand};
use crate::stacks;
use crate::super_cmd::SuperCommand;
use crate::vme::DataWidth;

/// Largest response the controller produces for a mirrored super transaction.
pub const MIRROR_TRANSACTION_MAX_WORDS: usize = 2048;

/// Mirror budget left for commands between the buffer start and end markers.
pub const MIRROR_TRANSACTION_MAX_CONTENTS_WORDS: usize = MIRROR_TRANSACTION_MAX_WORDS - 2;

/// Collects super commands while keeping the mirrored response within budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuperCommandBuilder {
    commands: Vec<SuperCommand>,
    mirror_words: usize,
    max_mirror_words: usize,
}

impl Default for SuperCommandBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SuperCommandBuilder {
    pub fn new() -> Self {
        Self::with_budget(MIRROR_TRANSACTION_MAX_CONTENTS_WORDS)
    }

    /// Builder whose commands may produce at most `max_mirror_words` response words.
    pub fn with_budget(max_mirror_words: usize) -> Self {
        Self {
            commands: Vec::new(),
            mirror_words: 0,
            max_mirror_words,
        }
    }

    pub fn add(&mut self, cmd: SuperCommand) -> Result<&mut Self> {
        let words = self.mirror_words + cmd.mirror_len();
        if words > self.max_mirror_words {
            return Err(CommandError::BudgetExceeded {
                words,
                max: self.max_mirror_words,
            });
        }
        self.mirror_words = words;
        self.commands.push(cmd);
        Ok(self)
    }

    pub fn add_reference_word(&mut self, value: u16) -> Result<&mut Self> {
        self.add(SuperCommand::ReferenceWord { value })
    }

    pub fn add_read_local(&mut self, address: u16) -> Result<&mut Self> {
        self.add(SuperCommand::ReadLocal { address })
    }

    pub fn add_write_local(&mut self, address: u16, value: u32) -> Result<&mut Self> {
        self.add(SuperCommand::WriteLocal { address, value })
    }

    pub fn add_write_reset(&mut self) -> Result<&mut Self> {
        self.add(SuperCommand::WriteReset)
    }

    /// Append all commands, failing on the first one that does not fit.
    /// Commands added before the failure stay in the builder.
    pub fn add_all<I>(&mut self, commands: I) -> Result<&mut Self>
    where
        I: IntoIterator<Item = SuperCommand>,
    {
        for cmd in commands {
            self.add(cmd)?;
        }
        Ok(self)
    }

    pub fn commands(&self) -> &[SuperCommand] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Response words the current commands will produce.
    pub fn mirror_words(&self) -> usize {
        self.mirror_words
    }

    pub fn max_mirror_words(&self) -> usize {
        self.max_mirror_words
    }

    pub fn encode(&self) -> Vec<u32> {
        encode_super(&self.commands)
    }

    pub fn build(self) -> CommandList {
        CommandList::Super {
            commands: self.commands,
        }
    }
}

/// A named run of stack commands belonging to one module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackGroup {
    pub name: String,
    pub commands: Vec<StackCommand>,
}

impl StackGroup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            commands: Vec::new(),
        }
    }
}

/// Builds a command stack out of named module groups.
///
/// Commands are appended to the most recently started group; adding a
/// command before any group exists starts an unnamed one. The word budget
/// covers the whole encoded stack, start and end markers included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackCommandBuilder {
    name: String,
    groups: Vec<StackGroup>,
    encoded_len: usize,
    max_words: usize,
}

impl Default for StackCommandBuilder {
    fn default() -> Self {
        Self::new("")
    }
}

impl StackCommandBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_budget(name, usize::from(stacks::STACK_MEMORY_WORDS))
    }

    pub fn with_budget(name: impl Into<String>, max_words: usize) -> Self {
        Self {
            name: name.into(),
            groups: Vec::new(),
            encoded_len: 2,
            max_words,
        }
    }

    /// Rebuild a builder from existing groups, validating every command.
    pub fn from_groups(
        name: impl Into<String>,
        groups: impl IntoIterator<Item = StackGroup>,
    ) -> Result<Self> {
        let mut builder = Self::new(name);
        for group in groups {
            builder.begin_group(group.name);
            for cmd in group.commands {
                builder.add(cmd)?;
            }
        }
        Ok(builder)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn begin_group(&mut self, name: impl Into<String>) -> &mut Self {
        self.groups.push(StackGroup::new(name));
        self
    }

    pub fn add(&mut self, cmd: StackCommand) -> Result<&mut Self> {
        cmd.validate()?;
        let words = self.encoded_len + cmd.encoded_len();
        if words > self.max_words {
            return Err(CommandError::BudgetExceeded {
                words,
                max: self.max_words,
            });
        }
        if self.groups.is_empty() {
            self.groups.push(StackGroup::new(""));
        }
        if let Some(group) = self.groups.last_mut() {
            group.commands.push(cmd);
        }
        self.encoded_len = words;
        Ok(self)
    }

    pub fn add_vme_read(&mut self, address: u32, amod: u8, width: DataWidth) -> Result<&mut Self> {
        self.add(StackCommand::VmeRead {
            address,
            amod,
            width,
            late: false,
        })
    }

    pub fn add_vme_read_late(
        &mut self,
        address: u32,
        amod: u8,
        width: DataWidth,
    ) -> Result<&mut Self> {
        self.add(StackCommand::VmeRead {
            address,
            amod,
            width,
            late: true,
        })
    }

    pub fn add_vme_block_read(
        &mut self,
        address: u32,
        amod: u8,
        max_transfers: u16,
    ) -> Result<&mut Self> {
        self.add(StackCommand::VmeBlockRead {
            address,
            amod,
            max_transfers,
            fifo: true,
        })
    }

    /// Block read with an incrementing address.
    pub fn add_vme_mem_read(
        &mut self,
        address: u32,
        amod: u8,
        max_transfers: u16,
    ) -> Result<&mut Self> {
        self.add(StackCommand::VmeBlockRead {
            address,
            amod,
            max_transfers,
            fifo: false,
        })
    }

    pub fn add_vme_write(
        &mut self,
        address: u32,
        value: u32,
        amod: u8,
        width: DataWidth,
    ) -> Result<&mut Self> {
        self.add(StackCommand::VmeWrite {
            address,
            value,
            amod,
            width,
        })
    }

    pub fn add_write_marker(&mut self, value: u32) -> Result<&mut Self> {
        self.add(StackCommand::WriteMarker { value })
    }

    pub fn add_write_timestamp(&mut self) -> Result<&mut Self> {
        self.add(StackCommand::WriteSpecial {
            value: special_word::TIMESTAMP,
        })
    }

    pub fn add_write_special(&mut self, value: u32) -> Result<&mut Self> {
        self.add(StackCommand::WriteSpecial { value })
    }

    pub fn add_wait(&mut self, clocks: u32) -> Result<&mut Self> {
        self.add(StackCommand::Wait { clocks })
    }

    pub fn add_signal_accu(&mut self) -> Result<&mut Self> {
        self.add(StackCommand::SignalAccu)
    }

    pub fn groups(&self) -> &[StackGroup] {
        &self.groups
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// All commands in execution order.
    pub fn commands(&self) -> Vec<StackCommand> {
        self.groups
            .iter()
            .flat_map(|g| g.commands.iter().copied())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.iter().all(|g| g.commands.is_empty())
    }

    /// Encoded length in words, start and end markers included.
    pub fn encoded_len(&self) -> usize {
        self.encoded_len
    }

    pub fn encode(&self, output_pipe: u8) -> Vec<u32> {
        encode_stack(output_pipe, &self.commands())
    }

    pub fn build(&self, output_pipe: u8) -> CommandList {
        CommandList::Stack {
            output_pipe,
            commands: self.commands(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vme::amods;

    #[test]
    fn super_builder_fails_fast_at_budget() {
        let mut builder = SuperCommandBuilder::with_budget(5);
        builder
            .add_reference_word(1)
            .unwrap()
            .add_read_local(0x6008)
            .unwrap()
            .add_write_reset()
            .unwrap();
        assert_eq!(builder.mirror_words(), 4);

        let err = builder.add_write_local(0x1300, 0).unwrap_err();
        assert_eq!(err, CommandError::BudgetExceeded { words: 6, max: 5 });
        assert_eq!(builder.len(), 3);

        builder.add_reference_word(2).unwrap();
        assert!(builder.add_reference_word(3).is_err());
    }

    #[test]
    fn super_builder_default_budget_fills_the_mirror_limit() {
        let mut builder = SuperCommandBuilder::new();
        let mut added = 0;
        while builder.add_write_local(0x2000, 0).is_ok() {
            added += 1;
        }
        assert_eq!(added, MIRROR_TRANSACTION_MAX_CONTENTS_WORDS / 2);
        assert!(builder.mirror_words() <= MIRROR_TRANSACTION_MAX_CONTENTS_WORDS);
    }

    #[test]
    fn stack_builder_groups_commands() {
        let mut builder = StackCommandBuilder::new("event0");
        builder
            .begin_group("mdpp16")
            .add_vme_read(0x6030, amods::A32, DataWidth::D16)
            .unwrap()
            .add_vme_block_read(0x0000, amods::MBLT64, 0xffff)
            .unwrap();
        builder
            .begin_group("timestamp")
            .add_write_timestamp()
            .unwrap();

        assert_eq!(builder.group_count(), 2);
        assert_eq!(builder.groups()[0].name, "mdpp16");
        assert_eq!(builder.groups()[0].commands.len(), 2);
        assert_eq!(builder.commands().len(), 3);
        assert_eq!(builder.encoded_len(), 2 + 2 + 2 + 1);
        assert_eq!(builder.encode(1).len(), builder.encoded_len());
    }

    #[test]
    fn commands_without_group_land_in_an_unnamed_group() {
        let mut builder = StackCommandBuilder::default();
        builder.add_write_marker(0x1337).unwrap();
        assert_eq!(builder.groups()[0].name, "");
        assert!(!builder.is_empty());
    }

    #[test]
    fn stack_builder_rejects_invalid_and_oversized() {
        let mut builder = StackCommandBuilder::with_budget("tiny", 5);
        assert!(matches!(
            builder.add_vme_block_read(0, amods::A32, 10),
            Err(CommandError::InvalidAddressModifier { .. })
        ));
        builder.add_write_marker(1).unwrap();
        assert_eq!(
            builder.add_write_marker(2).unwrap_err(),
            CommandError::BudgetExceeded { words: 6, max: 5 }
        );
        builder.add_signal_accu().unwrap();
        assert_eq!(builder.encoded_len(), 5);
    }

    #[test]
    fn from_groups_revalidates() {
        let groups = vec![StackGroup {
            name: "bad".into(),
            commands: vec![StackCommand::Wait { clocks: u32::MAX }],
        }];
        assert!(StackCommandBuilder::from_groups("x", groups).is_err());
    }
}
