use serde::{Deserialize, Serialize};

use crate::error::{CommandError, DecodeError};
use crate::vme::{self, DataWidth};

/// Stack command opcodes, stored in the top byte of a command word.
pub mod stack_types {
    pub const STACK_START: u8 = 0xf3;
    pub const STACK_END: u8 = 0xf4;
    pub const VME_READ: u8 = 0x12;
    pub const VME_READ_MEM: u8 = 0x32;
    pub const VME_WRITE: u8 = 0x23;
    pub const WRITE_SPECIAL: u8 = 0xc1;
    pub const WRITE_MARKER: u8 = 0xc2;
    pub const WAIT: u8 = 0xc4;
    pub const SIGNAL_ACCU: u8 = 0xc6;
}

/// Bit layout of the first word of a stack command.
pub mod stack_layout {
    pub const CMD_SHIFT: u32 = 24;
    pub const CMD_MASK: u32 = 0xff;
    pub const ARG0_SHIFT: u32 = 16;
    pub const ARG0_MASK: u32 = 0xff;
    pub const ARG1_SHIFT: u32 = 0;
    pub const ARG1_MASK: u32 = 0xffff;

    pub const WIDTH_MASK: u16 = 0b11;
    pub const LATE_READ_SHIFT: u16 = 2;

    /// Immediate operand of WriteSpecial and Wait.
    pub const VALUE24_MASK: u32 = 0x00ff_ffff;
}

use stack_layout::*;

/// Special values understood by WriteSpecial.
pub mod special_word {
    pub const TIMESTAMP: u32 = 0;
    pub const ACCU: u32 = 1;
}

pub fn stack_word(opcode: u8, arg0: u8, arg1: u16) -> u32 {
    (u32::from(opcode) << CMD_SHIFT) | (u32::from(arg0) << ARG0_SHIFT) | u32::from(arg1)
}

pub fn stack_opcode_of(word: u32) -> u8 {
    ((word >> CMD_SHIFT) & CMD_MASK) as u8
}

/// A command stored in a controller stack and executed against the VME bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StackCommand {
    /// Single cycle read. `late` delays the read until the end of the cycle.
    VmeRead {
        address: u32,
        amod: u8,
        width: DataWidth,
        #[serde(default)]
        late: bool,
    },
    /// Block transfer of up to `max_transfers` cycles. `fifo` keeps the
    /// address fixed, otherwise it increments like a memory read.
    VmeBlockRead {
        address: u32,
        amod: u8,
        max_transfers: u16,
        #[serde(default = "default_fifo")]
        fifo: bool,
    },
    VmeWrite {
        address: u32,
        value: u32,
        amod: u8,
        width: DataWidth,
    },
    /// Writes `value` into the output stream.
    WriteMarker { value: u32 },
    /// Writes a controller generated word (timestamp, accumulator).
    WriteSpecial { value: u32 },
    /// Delays stack execution by `clocks` controller clock cycles.
    Wait { clocks: u32 },
    SignalAccu,
}

fn default_fifo() -> bool {
    true
}

impl StackCommand {
    pub fn encoded_len(&self) -> usize {
        match self {
            StackCommand::VmeRead { .. } | StackCommand::VmeBlockRead { .. } => 2,
            StackCommand::VmeWrite { .. } => 3,
            StackCommand::WriteMarker { .. } => 2,
            StackCommand::WriteSpecial { .. } | StackCommand::Wait { .. } => 1,
            StackCommand::SignalAccu => 1,
        }
    }

    pub fn opcode(&self) -> u8 {
        match self {
            StackCommand::VmeRead { .. } => stack_types::VME_READ,
            StackCommand::VmeBlockRead { fifo: true, .. } => stack_types::VME_READ,
            StackCommand::VmeBlockRead { fifo: false, .. } => stack_types::VME_READ_MEM,
            StackCommand::VmeWrite { .. } => stack_types::VME_WRITE,
            StackCommand::WriteMarker { .. } => stack_types::WRITE_MARKER,
            StackCommand::WriteSpecial { .. } => stack_types::WRITE_SPECIAL,
            StackCommand::Wait { .. } => stack_types::WAIT,
            StackCommand::SignalAccu => stack_types::SIGNAL_ACCU,
        }
    }

    /// Check the command's operands against what the encoding can express.
    pub fn validate(&self) -> Result<(), CommandError> {
        match *self {
            StackCommand::VmeRead { amod, .. } if vme::is_block_amod(amod) => {
                Err(CommandError::InvalidAddressModifier {
                    amod,
                    operation: "single cycle read",
                })
            }
            StackCommand::VmeBlockRead { amod, .. } if !vme::is_block_amod(amod) => {
                Err(CommandError::InvalidAddressModifier {
                    amod,
                    operation: "block read",
                })
            }
            StackCommand::VmeWrite { amod, .. } if vme::is_block_amod(amod) => {
                Err(CommandError::InvalidAddressModifier {
                    amod,
                    operation: "write",
                })
            }
            StackCommand::WriteSpecial { value } if value > VALUE24_MASK => {
                Err(CommandError::ValueOutOfRange {
                    field: "special word",
                    value,
                    max: VALUE24_MASK,
                })
            }
            StackCommand::Wait { clocks } if clocks > VALUE24_MASK => {
                Err(CommandError::ValueOutOfRange {
                    field: "wait clocks",
                    value: clocks,
                    max: VALUE24_MASK,
                })
            }
            _ => Ok(()),
        }
    }

    pub fn encode_into(&self, out: &mut Vec<u32>) {
        let opcode = self.opcode();
        match *self {
            StackCommand::VmeRead {
                address,
                amod,
                width,
                late,
            } => {
                let arg1 = width.code() | (u16::from(late) << LATE_READ_SHIFT);
                out.push(stack_word(opcode, amod, arg1));
                out.push(address);
            }
            StackCommand::VmeBlockRead {
                address,
                amod,
                max_transfers,
                ..
            } => {
                out.push(stack_word(opcode, amod, max_transfers));
                out.push(address);
            }
            StackCommand::VmeWrite {
                address,
                value,
                amod,
                width,
            } => {
                out.push(stack_word(opcode, amod, width.code()));
                out.push(address);
                out.push(value);
            }
            StackCommand::WriteMarker { value } => {
                out.push(stack_word(opcode, 0, 0));
                out.push(value);
            }
            StackCommand::WriteSpecial { value } => {
                out.push((u32::from(opcode) << CMD_SHIFT) | (value & VALUE24_MASK));
            }
            StackCommand::Wait { clocks } => {
                out.push((u32::from(opcode) << CMD_SHIFT) | (clocks & VALUE24_MASK));
            }
            StackCommand::SignalAccu => out.push(stack_word(opcode, 0, 0)),
        }
    }

    /// Decode the command starting at `words[offset]`, returning it and its width.
    pub fn decode_at(words: &[u32], offset: usize) -> Result<(Self, usize), DecodeError> {
        let rest = words.get(offset..).unwrap_or(&[]);
        let word = *rest.first().ok_or(DecodeError::Truncated {
            offset,
            needed: 1,
            available: 0,
        })?;
        let operand = |index: usize, needed: usize| {
            rest.get(index).copied().ok_or(DecodeError::Truncated {
                offset,
                needed,
                available: rest.len(),
            })
        };

        let opcode = stack_opcode_of(word);
        let amod = ((word >> ARG0_SHIFT) & ARG0_MASK) as u8;
        let arg1 = ((word >> ARG1_SHIFT) & ARG1_MASK) as u16;

        let cmd = match opcode {
            stack_types::VME_READ | stack_types::VME_READ_MEM if vme::is_block_amod(amod) => {
                StackCommand::VmeBlockRead {
                    address: operand(1, 2)?,
                    amod,
                    max_transfers: arg1,
                    fifo: opcode == stack_types::VME_READ,
                }
            }
            stack_types::VME_READ => {
                let width = DataWidth::from_code(arg1 & WIDTH_MASK).ok_or(
                    DecodeError::InvalidDataWidth {
                        width: arg1 & WIDTH_MASK,
                        offset,
                    },
                )?;
                StackCommand::VmeRead {
                    address: operand(1, 2)?,
                    amod,
                    width,
                    late: (arg1 >> LATE_READ_SHIFT) & 1 != 0,
                }
            }
            stack_types::VME_WRITE => {
                let width = DataWidth::from_code(arg1 & WIDTH_MASK).ok_or(
                    DecodeError::InvalidDataWidth {
                        width: arg1 & WIDTH_MASK,
                        offset,
                    },
                )?;
                StackCommand::VmeWrite {
                    address: operand(1, 3)?,
                    value: operand(2, 3)?,
                    amod,
                    width,
                }
            }
            stack_types::WRITE_MARKER => StackCommand::WriteMarker {
                value: operand(1, 2)?,
            },
            stack_types::WRITE_SPECIAL => StackCommand::WriteSpecial {
                value: word & VALUE24_MASK,
            },
            stack_types::WAIT => StackCommand::Wait {
                clocks: word & VALUE24_MASK,
            },
            stack_types::SIGNAL_ACCU => StackCommand::SignalAccu,
            _ => return Err(DecodeError::UnknownCommand { word, offset }),
        };
        Ok((cmd, cmd.encoded_len()))
    }
}
