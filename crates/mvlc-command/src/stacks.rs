//! Stack memory layout, trigger and offset registers.

use crate::codec::encode_stack;
use crate::error::CommandError;
use crate::stack_cmd::StackCommand;
use crate::super_cmd::SuperCommand;

pub const STACK_COUNT: u8 = 16;
pub const STACK0_TRIGGER_REGISTER: u16 = 0x1100;
/// Offset registers hold byte offsets relative to `STACK_MEMORY_BEGIN`.
pub const STACK0_OFFSET_REGISTER: u16 = 0x1200;
pub const REGISTER_INCREMENT: u16 = 4;

pub const STACK_MEMORY_BEGIN: u16 = 0x2000;
pub const STACK_MEMORY_WORDS: u16 = 2048;
pub const STACK_MEMORY_BYTES: u16 = STACK_MEMORY_WORDS * 4;
pub const STACK_MEMORY_END: u16 = STACK_MEMORY_BEGIN + STACK_MEMORY_BYTES;

/// Stack 0 runs immediate (command pipe) stacks.
pub const IMMEDIATE_STACK_ID: u8 = 0;
/// The first stack memory word is left unused.
pub const IMMEDIATE_STACK_START_OFFSET_WORDS: u16 = 1;
pub const IMMEDIATE_STACK_START_OFFSET_BYTES: u16 = IMMEDIATE_STACK_START_OFFSET_WORDS * 4;
pub const IMMEDIATE_STACK_RESERVED_WORDS: u16 = 256 - IMMEDIATE_STACK_START_OFFSET_WORDS;

pub const FIRST_READOUT_STACK_ID: u8 = 1;
pub const READOUT_STACK_COUNT: u8 = STACK_COUNT - 1;

pub const TRIGGER_BITS_MASK: u16 = 0b1_1111;
pub const TRIGGER_TYPE_SHIFT: u16 = 5;
pub const TRIGGER_TYPE_MASK: u16 = 0b111;
pub const IMMEDIATE_SHIFT: u16 = 8;

/// How a stack gets triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TriggerType {
    NoTrigger = 0,
    IrqWithIack = 1,
    IrqNoIack = 2,
    External = 3,
}

fn check_stack_id(stack_id: u8) -> Result<(), CommandError> {
    if stack_id < STACK_COUNT {
        Ok(())
    } else {
        Err(CommandError::InvalidStackId(stack_id))
    }
}

pub fn trigger_register(stack_id: u8) -> Result<u16, CommandError> {
    check_stack_id(stack_id)?;
    Ok(STACK0_TRIGGER_REGISTER + u16::from(stack_id) * REGISTER_INCREMENT)
}

pub fn offset_register(stack_id: u8) -> Result<u16, CommandError> {
    check_stack_id(stack_id)?;
    Ok(STACK0_OFFSET_REGISTER + u16::from(stack_id) * REGISTER_INCREMENT)
}

/// Trigger register value for the given trigger type and bits (e.g. IRQ number - 1).
pub fn trigger_value(trigger_type: TriggerType, bits: u8) -> u32 {
    let bits = u16::from(bits) & TRIGGER_BITS_MASK;
    let kind = (trigger_type as u16 & TRIGGER_TYPE_MASK) << TRIGGER_TYPE_SHIFT;
    u32::from(kind | bits)
}

/// Trigger register value that executes the stack once, right away.
pub const IMMEDIATE_TRIGGER: u32 = 1 << IMMEDIATE_SHIFT;

/// Absolute address of the stack memory word at `offset_words`.
pub fn stack_memory_address(offset_words: u16) -> Result<u16, CommandError> {
    if offset_words >= STACK_MEMORY_WORDS {
        return Err(CommandError::BudgetExceeded {
            words: usize::from(offset_words) + 1,
            max: usize::from(STACK_MEMORY_WORDS),
        });
    }
    Ok(STACK_MEMORY_BEGIN + offset_words * 4)
}

/// Super commands writing the encoded `stack` into stack memory, one
/// `WriteLocal` per word, starting at `offset_words`.
pub fn stack_upload_commands(
    output_pipe: u8,
    offset_words: u16,
    stack: &[StackCommand],
) -> Result<Vec<SuperCommand>, CommandError> {
    let words = encode_stack(output_pipe, stack);
    let end = usize::from(offset_words) + words.len();
    if end > usize::from(STACK_MEMORY_WORDS) {
        return Err(CommandError::BudgetExceeded {
            words: end,
            max: usize::from(STACK_MEMORY_WORDS),
        });
    }

    words
        .into_iter()
        .zip(offset_words..)
        .map(|(value, offset)| {
            Ok(SuperCommand::WriteLocal {
                address: stack_memory_address(offset)?,
                value,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_stack_registers() {
        assert_eq!(trigger_register(0).unwrap(), 0x1100);
        assert_eq!(trigger_register(3).unwrap(), 0x110c);
        assert_eq!(offset_register(15).unwrap(), 0x123c);
        assert_eq!(
            offset_register(16).unwrap_err(),
            CommandError::InvalidStackId(16)
        );
    }

    #[test]
    fn trigger_values() {
        assert_eq!(IMMEDIATE_TRIGGER, 0x100);
        assert_eq!(trigger_value(TriggerType::IrqWithIack, 0), 0x20);
        assert_eq!(trigger_value(TriggerType::External, 2), 0x62);
    }

    #[test]
    fn stack_memory_bounds() {
        assert_eq!(stack_memory_address(0).unwrap(), 0x2000);
        assert_eq!(stack_memory_address(2047).unwrap(), 0x3ffc);
        assert!(stack_memory_address(2048).is_err());
        assert_eq!(STACK_MEMORY_END, 0x4000);
    }

    #[test]
    fn upload_writes_each_stack_word() {
        let stack = [StackCommand::WriteMarker { value: 0xaffe }];
        let cmds = stack_upload_commands(0, IMMEDIATE_STACK_START_OFFSET_WORDS, &stack).unwrap();
        assert_eq!(
            cmds,
            vec![
                SuperCommand::WriteLocal {
                    address: 0x2004,
                    value: 0xf300_0000
                },
                SuperCommand::WriteLocal {
                    address: 0x2008,
                    value: 0xc200_0000
                },
                SuperCommand::WriteLocal {
                    address: 0x200c,
                    value: 0xaffe
                },
                SuperCommand::WriteLocal {
                    address: 0x2010,
                    value: 0xf400_0000
                },
            ]
        );
    }

    #[test]
    fn upload_past_stack_memory_fails() {
        let stack = [StackCommand::SignalAccu];
        let err = stack_upload_commands(1, STACK_MEMORY_WORDS - 2, &stack).unwrap_err();
        assert_eq!(
            err,
            CommandError::BudgetExceeded {
                words: 2049,
                max: 2048
            }
        );
    }
}
