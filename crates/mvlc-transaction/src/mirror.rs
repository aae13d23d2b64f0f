//! Mirror verification of super command responses.
//!
//! The controller answers a super command buffer with a 0xF1 frame echoing
//! every command word. `ReadLocal` echoes are followed by the register value.
//! Buffer start and end markers are not echoed.

use mvlc_command::super_cmd::{super_opcode_of, super_types, SUPER_CMD_ARG_MASK};
use mvlc_command::SuperCommand;

use crate::error::{Result, TransactionError};

/// Number of words the controller sends back for `commands`.
pub fn mirror_len(commands: &[SuperCommand]) -> usize {
    commands.iter().map(SuperCommand::mirror_len).sum()
}

/// Compare `response` against the echo expected for `commands`.
///
/// Returns the values read by `ReadLocal` commands, in command order.
pub fn check_mirror(commands: &[SuperCommand], response: &[u32]) -> Result<Vec<u32>> {
    let expected_len = mirror_len(commands);
    let mut values = Vec::new();
    let mut pos = 0;
    let mut echo = Vec::with_capacity(2);

    for cmd in commands {
        echo.clear();
        cmd.encode_into(&mut echo);
        for &expected in &echo {
            match response.get(pos) {
                Some(&actual) if actual == expected => pos += 1,
                Some(&actual) => {
                    return Err(TransactionError::MirrorMismatch {
                        index: pos,
                        expected,
                        actual,
                    })
                }
                None => {
                    return Err(TransactionError::MirrorLength {
                        expected: expected_len,
                        actual: response.len(),
                    })
                }
            }
        }
        if let SuperCommand::ReadLocal { .. } = cmd {
            let value = response
                .get(pos)
                .copied()
                .ok_or(TransactionError::MirrorLength {
                    expected: expected_len,
                    actual: response.len(),
                })?;
            values.push(value);
            pos += 1;
        }
    }

    if pos != response.len() {
        return Err(TransactionError::MirrorLength {
            expected: expected_len,
            actual: response.len(),
        });
    }
    Ok(values)
}

/// The reference value if `word` is an echoed `ReferenceWord`.
pub fn reference_of(word: u32) -> Option<u16> {
    (super_opcode_of(word) == super_types::REFERENCE_WORD).then_some((word & SUPER_CMD_ARG_MASK) as u16)
}
