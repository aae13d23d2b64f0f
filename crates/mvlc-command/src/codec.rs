use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::DecodeError;
use crate::stack_cmd::{stack_opcode_of, stack_types, stack_word, StackCommand};
use crate::super_cmd::{
    super_opcode_of, super_types, SuperCommand, CMD_BUFFER_END_WORD, CMD_BUFFER_START_WORD,
};

/// An ordered list of commands of one dialect, in execution order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CommandList {
    Super {
        commands: Vec<SuperCommand>,
    },
    /// Stack output is sent to `output_pipe` (0 = command, 1 = data).
    Stack {
        output_pipe: u8,
        commands: Vec<StackCommand>,
    },
}

impl CommandList {
    pub fn len(&self) -> usize {
        match self {
            CommandList::Super { commands } => commands.len(),
            CommandList::Stack { commands, .. } => commands.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Encoded size in words, start and end markers included.
    pub fn encoded_len(&self) -> usize {
        let contents: usize = match self {
            CommandList::Super { commands } => commands.iter().map(|c| c.encoded_len()).sum(),
            CommandList::Stack { commands, .. } => commands.iter().map(|c| c.encoded_len()).sum(),
        };
        contents + 2
    }

    pub fn encode(&self) -> Vec<u32> {
        match self {
            CommandList::Super { commands } => encode_super(commands),
            CommandList::Stack {
                output_pipe,
                commands,
            } => encode_stack(*output_pipe, commands),
        }
    }

    /// Decode a buffer, detecting the dialect from its start marker.
    pub fn decode(words: &[u32]) -> Result<Self, DecodeError> {
        let first = *words.first().ok_or(DecodeError::Empty)?;
        if first == CMD_BUFFER_START_WORD {
            decode_super(words).map(|commands| CommandList::Super { commands })
        } else if stack_opcode_of(first) == stack_types::STACK_START {
            decode_stack(words).map(|(output_pipe, commands)| CommandList::Stack {
                output_pipe,
                commands,
            })
        } else {
            Err(DecodeError::MissingStartMarker(first))
        }
    }
}

/// Encode super commands between `CmdBufferStart` and `CmdBufferEnd`.
pub fn encode_super(commands: &[SuperCommand]) -> Vec<u32> {
    let mut out = Vec::with_capacity(commands.iter().map(|c| c.encoded_len()).sum::<usize>() + 2);
    out.push(CMD_BUFFER_START_WORD);
    for cmd in commands {
        cmd.encode_into(&mut out);
    }
    out.push(CMD_BUFFER_END_WORD);
    out
}

pub fn stack_start_word(output_pipe: u8) -> u32 {
    stack_word(stack_types::STACK_START, output_pipe, 0)
}

pub fn stack_end_word() -> u32 {
    stack_word(stack_types::STACK_END, 0, 0)
}

/// Encode stack commands between `StackStart` and `StackEnd`.
pub fn encode_stack(output_pipe: u8, commands: &[StackCommand]) -> Vec<u32> {
    let mut out = Vec::with_capacity(commands.iter().map(|c| c.encoded_len()).sum::<usize>() + 2);
    out.push(stack_start_word(output_pipe));
    for cmd in commands {
        cmd.encode_into(&mut out);
    }
    out.push(stack_end_word());
    out
}

pub fn decode_super(words: &[u32]) -> Result<Vec<SuperCommand>, DecodeError> {
    let first = *words.first().ok_or(DecodeError::Empty)?;
    if first != CMD_BUFFER_START_WORD {
        return Err(DecodeError::MissingStartMarker(first));
    }

    let mut commands = Vec::new();
    let mut offset = 1;
    while offset < words.len() {
        if super_opcode_of(words[offset]) == super_types::CMD_BUFFER_END {
            return finish(words, offset, commands);
        }
        let (cmd, len) = SuperCommand::decode_at(words, offset)?;
        commands.push(cmd);
        offset += len;
    }
    Err(DecodeError::MissingEndMarker)
}

/// Decode a stack buffer, returning the output pipe and the commands.
pub fn decode_stack(words: &[u32]) -> Result<(u8, Vec<StackCommand>), DecodeError> {
    let first = *words.first().ok_or(DecodeError::Empty)?;
    if stack_opcode_of(first) != stack_types::STACK_START {
        return Err(DecodeError::MissingStartMarker(first));
    }
    let output_pipe = ((first >> 16) & 0xff) as u8;

    let mut commands = Vec::new();
    let mut offset = 1;
    while offset < words.len() {
        if stack_opcode_of(words[offset]) == stack_types::STACK_END {
            return finish(words, offset, commands).map(|c| (output_pipe, c));
        }
        let (cmd, len) = StackCommand::decode_at(words, offset)?;
        commands.push(cmd);
        offset += len;
    }
    Err(DecodeError::MissingEndMarker)
}

fn finish<T>(words: &[u32], end_offset: usize, commands: Vec<T>) -> Result<Vec<T>, DecodeError> {
    let trailing = words.len() - end_offset - 1;
    if trailing > 0 {
        return Err(DecodeError::TrailingWords(trailing));
    }
    trace!(commands = commands.len(), words = words.len(), "decoded command buffer");
    Ok(commands)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::vme::{amods, DataWidth};

    #[test]
    fn super_buffer_layout() {
        let list = CommandList::Super {
            commands: vec![
                SuperCommand::ReferenceWord { value: 0x1234 },
                SuperCommand::ReadLocal { address: 0x6008 },
            ],
        };
        assert_eq!(
            list.encode(),
            vec![0xf100_0000, 0x0101_1234, 0x0102_6008, 0xf200_0000]
        );
        assert_eq!(list.encoded_len(), 4);
    }

    #[test]
    fn stack_buffer_carries_output_pipe() {
        let list = CommandList::Stack {
            output_pipe: 1,
            commands: vec![StackCommand::WriteMarker { value: 0x8765_4321 }],
        };
        let words = list.encode();
        assert_eq!(words, vec![0xf301_0000, 0xc200_0000, 0x8765_4321, 0xf400_0000]);
        assert_eq!(CommandList::decode(&words).unwrap(), list);
    }

    #[test]
    fn decode_errors() {
        assert_eq!(CommandList::decode(&[]), Err(DecodeError::Empty));
        assert_eq!(
            CommandList::decode(&[0x1234_5678]),
            Err(DecodeError::MissingStartMarker(0x1234_5678))
        );
        assert_eq!(
            CommandList::decode(&[0xf100_0000, 0x0101_0001]),
            Err(DecodeError::MissingEndMarker)
        );
        assert_eq!(
            CommandList::decode(&[0xf300_0000, 0xf400_0000, 0, 0]),
            Err(DecodeError::TrailingWords(2))
        );
    }

    #[test]
    fn empty_lists_round_trip() {
        let list = CommandList::Super { commands: vec![] };
        assert!(list.is_empty());
        assert_eq!(CommandList::decode(&list.encode()).unwrap(), list);
    }

    fn super_command() -> impl Strategy<Value = SuperCommand> {
        prop_oneof![
            any::<u16>().prop_map(|value| SuperCommand::ReferenceWord { value }),
            any::<u16>().prop_map(|address| SuperCommand::ReadLocal { address }),
            (any::<u16>(), any::<u32>())
                .prop_map(|(address, value)| SuperCommand::WriteLocal { address, value }),
            Just(SuperCommand::WriteReset),
        ]
    }

    fn width() -> impl Strategy<Value = DataWidth> {
        prop_oneof![Just(DataWidth::D16), Just(DataWidth::D32)]
    }

    fn stack_command() -> impl Strategy<Value = StackCommand> {
        let single_amod = prop_oneof![Just(amods::A16), Just(amods::A24), Just(amods::A32)];
        let block_amod = prop_oneof![Just(amods::BLT32), Just(amods::MBLT64), Just(amods::A24_BLT)];
        prop_oneof![
            (any::<u32>(), single_amod.clone(), width(), any::<bool>()).prop_map(
                |(address, amod, width, late)| StackCommand::VmeRead {
                    address,
                    amod,
                    width,
                    late
                }
            ),
            (any::<u32>(), block_amod, any::<u16>(), any::<bool>()).prop_map(
                |(address, amod, max_transfers, fifo)| StackCommand::VmeBlockRead {
                    address,
                    amod,
                    max_transfers,
                    fifo
                }
            ),
            (any::<u32>(), any::<u32>(), single_amod, width()).prop_map(
                |(address, value, amod, width)| StackCommand::VmeWrite {
                    address,
                    value,
                    amod,
                    width
                }
            ),
            any::<u32>().prop_map(|value| StackCommand::WriteMarker { value }),
            (0u32..=0xff_ffff).prop_map(|value| StackCommand::WriteSpecial { value }),
            (0u32..=0xff_ffff).prop_map(|clocks| StackCommand::Wait { clocks }),
            Just(StackCommand::SignalAccu),
        ]
    }

    fn command_list() -> impl Strategy<Value = CommandList> {
        prop_oneof![
            proptest::collection::vec(super_command(), 0..32)
                .prop_map(|commands| CommandList::Super { commands }),
            (0u8..2, proptest::collection::vec(stack_command(), 0..32)).prop_map(
                |(output_pipe, commands)| CommandList::Stack {
                    output_pipe,
                    commands
                }
            ),
        ]
    }

    proptest! {
        #[test]
        fn decode_inverts_encode(list in command_list()) {
            let words = list.encode();
            prop_assert_eq!(words.len(), list.encoded_len());
            prop_assert_eq!(CommandList::decode(&words).unwrap(), list);
        }
    }
}
