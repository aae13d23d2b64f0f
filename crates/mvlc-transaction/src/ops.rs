//! Register and single VME operations built on [`CommandPipe`].

use mvlc_command::{registers, vme, CommandError, DataWidth, StackCommand, SuperCommand};
use mvlc_frame::{FrameHeader, FrameType};
use mvlc_transport::Pipe;
use tracing::debug;

use crate::error::{Result, TransactionError};
use crate::pipe::CommandPipe;

impl<P: Pipe> CommandPipe<P> {
    pub fn read_register(&self, address: u16) -> Result<u32> {
        let values = self.read_registers(&[address])?;
        values
            .first()
            .copied()
            .ok_or(TransactionError::UnexpectedResponseSize {
                expected: 1,
                actual: 0,
            })
    }

    /// Read several registers in one transaction.
    pub fn read_registers(&self, addresses: &[u16]) -> Result<Vec<u32>> {
        let commands: Vec<SuperCommand> = addresses
            .iter()
            .map(|&address| SuperCommand::ReadLocal { address })
            .collect();
        Ok(self.transact(&commands)?.read_values)
    }

    pub fn write_register(&self, address: u16, value: u32) -> Result<()> {
        self.transact(&[SuperCommand::WriteLocal { address, value }])?;
        Ok(())
    }

    pub fn hardware_id(&self) -> Result<u32> {
        self.read_register(registers::HARDWARE_ID)
    }

    pub fn firmware_revision(&self) -> Result<u32> {
        self.read_register(registers::FIRMWARE_REVISION)
    }

    pub fn set_daq_mode(&self, enable: bool) -> Result<()> {
        self.write_register(registers::DAQ_MODE, u32::from(enable))
    }

    /// The two stack execution status registers.
    pub fn stack_exec_status(&self) -> Result<(u32, u32)> {
        match self.read_registers(&[registers::STACK_EXEC_STATUS0, registers::STACK_EXEC_STATUS1])?[..] {
            [status0, status1] => Ok((status0, status1)),
            ref other => Err(TransactionError::UnexpectedResponseSize {
                expected: 2,
                actual: other.len(),
            }),
        }
    }

    /// Single cycle VME read. D16 results are masked to 16 bits.
    pub fn vme_read(&self, address: u32, amod: u8, width: DataWidth) -> Result<u32> {
        let response = self.stack_transaction(&[StackCommand::VmeRead {
            address,
            amod,
            width,
            late: false,
        }])?;
        match response.words[..] {
            [value] => Ok(match width {
                DataWidth::D16 => value & 0xffff,
                DataWidth::D32 => value,
            }),
            ref other => Err(TransactionError::UnexpectedResponseSize {
                expected: 1,
                actual: other.len(),
            }),
        }
    }

    pub fn vme_write(&self, address: u32, value: u32, amod: u8, width: DataWidth) -> Result<()> {
        let response = self.stack_transaction(&[StackCommand::VmeWrite {
            address,
            value,
            amod,
            width,
        }])?;
        if !response.words.is_empty() {
            return Err(TransactionError::UnexpectedResponseSize {
                expected: 0,
                actual: response.words.len(),
            });
        }
        Ok(())
    }

    /// Block transfer into the command pipe. Returns the transferred words
    /// with the 0xF5 block frame headers removed.
    pub fn vme_block_read(
        &self,
        address: u32,
        amod: u8,
        max_transfers: u16,
        fifo: bool,
    ) -> Result<Vec<u32>> {
        if !vme::is_block_amod(amod) {
            return Err(CommandError::InvalidAddressModifier {
                amod,
                operation: "block read",
            }
            .into());
        }
        let response = self.stack_transaction(&[StackCommand::VmeBlockRead {
            address,
            amod,
            max_transfers,
            fifo,
        }])?;
        let data = block_payload(&response.words)?;
        debug!(address, amod, words = data.len(), "block read done");
        Ok(data)
    }
}

/// Concatenate the data of consecutive 0xF5 frames, following continue flags.
fn block_payload(words: &[u32]) -> Result<Vec<u32>> {
    let (out, end) = take_block_frames(words, 0)?;
    if end != words.len() {
        return Err(TransactionError::UnexpectedResponseSize {
            expected: end,
            actual: words.len(),
        });
    }
    Ok(out)
}

/// Read the block frames starting at `start`. Returns their data and the
/// position after the last frame.
pub(crate) fn take_block_frames(words: &[u32], start: usize) -> Result<(Vec<u32>, usize)> {
    let mut out = Vec::new();
    let mut pos = start;
    while let Some(&word) = words.get(pos) {
        let header = FrameHeader::decode(word);
        if header.frame_type() != Some(FrameType::BlockRead) {
            return Err(TransactionError::UnexpectedFrame(header));
        }
        let end = pos + 1 + header.data_word_count();
        let data = words
            .get(pos + 1..end)
            .ok_or(TransactionError::UnexpectedResponseSize {
                expected: end,
                actual: words.len(),
            })?;
        out.extend_from_slice(data);
        pos = end;
        if !header.is_continued() {
            return Ok((out, pos));
        }
    }
    Err(TransactionError::UnexpectedResponseSize {
        expected: pos + 1,
        actual: words.len(),
    })
}
