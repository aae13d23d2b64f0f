use serde::{Deserialize, Serialize};

use crate::error::DecodeError;

/// Super command opcodes, stored in the upper 16 bits of a command word.
pub mod super_types {
    pub const CMD_BUFFER_START: u16 = 0xf100;
    pub const CMD_BUFFER_END: u16 = 0xf200;
    pub const REFERENCE_WORD: u16 = 0x0101;
    pub const READ_LOCAL: u16 = 0x0102;
    pub const WRITE_LOCAL: u16 = 0x0204;
    pub const WRITE_RESET: u16 = 0x0206;
}

pub const SUPER_CMD_SHIFT: u32 = 16;
pub const SUPER_CMD_MASK: u32 = 0xffff;
pub const SUPER_CMD_ARG_MASK: u32 = 0xffff;

pub const CMD_BUFFER_START_WORD: u32 = (super_types::CMD_BUFFER_START as u32) << SUPER_CMD_SHIFT;
pub const CMD_BUFFER_END_WORD: u32 = (super_types::CMD_BUFFER_END as u32) << SUPER_CMD_SHIFT;

pub fn super_word(opcode: u16, arg: u16) -> u32 {
    (u32::from(opcode) << SUPER_CMD_SHIFT) | u32::from(arg)
}

pub fn super_opcode_of(word: u32) -> u16 {
    ((word >> SUPER_CMD_SHIFT) & SUPER_CMD_MASK) as u16
}

/// A command executed by the controller itself, addressing its internal
/// registers rather than the VME bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SuperCommand {
    /// Echoed verbatim; used to tag a transaction.
    ReferenceWord { value: u16 },
    ReadLocal { address: u16 },
    WriteLocal { address: u16, value: u32 },
    WriteReset,
}

impl SuperCommand {
    /// Number of words this command occupies in an encoded buffer.
    pub fn encoded_len(&self) -> usize {
        match self {
            SuperCommand::WriteLocal { .. } => 2,
            _ => 1,
        }
    }

    /// Number of words this command contributes to the mirrored response:
    /// the echo itself plus any result words.
    pub fn mirror_len(&self) -> usize {
        match self {
            SuperCommand::ReadLocal { .. } => self.encoded_len() + 1,
            _ => self.encoded_len(),
        }
    }

    pub fn opcode(&self) -> u16 {
        match self {
            SuperCommand::ReferenceWord { .. } => super_types::REFERENCE_WORD,
            SuperCommand::ReadLocal { .. } => super_types::READ_LOCAL,
            SuperCommand::WriteLocal { .. } => super_types::WRITE_LOCAL,
            SuperCommand::WriteReset => super_types::WRITE_RESET,
        }
    }

    pub fn encode_into(&self, out: &mut Vec<u32>) {
        match *self {
            SuperCommand::ReferenceWord { value } => out.push(super_word(self.opcode(), value)),
            SuperCommand::ReadLocal { address } => out.push(super_word(self.opcode(), address)),
            SuperCommand::WriteLocal { address, value } => {
                out.push(super_word(self.opcode(), address));
                out.push(value);
            }
            SuperCommand::WriteReset => out.push(super_word(self.opcode(), 0)),
        }
    }

    /// Decode the command starting at `words[offset]`, returning it and its width.
    pub fn decode_at(words: &[u32], offset: usize) -> Result<(Self, usize), DecodeError> {
        let word = *words.get(offset).ok_or(DecodeError::Truncated {
            offset,
            needed: 1,
            available: 0,
        })?;
        let arg = (word & SUPER_CMD_ARG_MASK) as u16;
        let cmd = match super_opcode_of(word) {
            super_types::REFERENCE_WORD => SuperCommand::ReferenceWord { value: arg },
            super_types::READ_LOCAL => SuperCommand::ReadLocal { address: arg },
            super_types::WRITE_LOCAL => {
                let value = *words.get(offset + 1).ok_or(DecodeError::Truncated {
                    offset,
                    needed: 2,
                    available: words.len() - offset,
                })?;
                SuperCommand::WriteLocal {
                    address: arg,
                    value,
                }
            }
            super_types::WRITE_RESET => SuperCommand::WriteReset,
            _ => return Err(DecodeError::UnknownCommand { word, offset }),
        };
        Ok((cmd, cmd.encoded_len()))
    }
}
