//! In-memory controller answering command pipe requests.

use std::collections::{HashMap, VecDeque};

use mvlc_command::stack_cmd::{stack_opcode_of, stack_types};
use mvlc_command::stacks::{self, IMMEDIATE_STACK_ID, IMMEDIATE_TRIGGER, STACK_MEMORY_BEGIN, STACK_MEMORY_END};
use mvlc_command::{decode_stack, decode_super, DataWidth, StackCommand, SuperCommand};
use mvlc_frame::word::{to_words, words_to_bytes};
use mvlc_frame::{FrameFlags, FrameHeader, FrameType, PacketChannel, PayloadHeaderInfo};
use mvlc_transport::{ConnectionType, Pipe, TransportError};

pub(crate) struct MockController {
    connection_type: ConnectionType,
    /// Internal registers, including stack memory.
    pub registers: HashMap<u16, u32>,
    pub vme: HashMap<u32, u32>,
    /// Words returned by block reads.
    pub block_data: Vec<u32>,
    /// Flags set on immediate stack response frames.
    pub stack_flags: FrameFlags,
    /// Immediate stack execution (counted from 0) that reports a bus error.
    pub bus_error_on_run: Option<u32>,
    /// Immediate stack executions so far.
    pub stack_runs: u32,
    /// Reads that time out before queued data is returned.
    pub timeouts_before_response: u32,
    pub corrupt_mirror: bool,
    /// Frames longer than this are split into continuation frames.
    pub max_frame_words: usize,
    /// Packet numbers skipped between consecutive datagrams.
    pub skip_packet_numbers: u16,
    pub disconnected: bool,
    /// Set when a request arrives while a response is still unread.
    pub overlapped: bool,
    pub requests: u32,
    pending: VecDeque<Vec<u8>>,
    packet_numbers: [u16; 3],
}

impl MockController {
    pub fn usb() -> Self {
        Self::new(ConnectionType::Usb)
    }

    pub fn eth() -> Self {
        Self::new(ConnectionType::Eth)
    }

    fn new(connection_type: ConnectionType) -> Self {
        Self {
            connection_type,
            registers: HashMap::new(),
            vme: HashMap::new(),
            block_data: Vec::new(),
            stack_flags: FrameFlags::NONE,
            bus_error_on_run: None,
            stack_runs: 0,
            timeouts_before_response: 0,
            corrupt_mirror: false,
            max_frame_words: 0x1fff,
            skip_packet_numbers: 0,
            disconnected: false,
            overlapped: false,
            requests: 0,
            pending: VecDeque::new(),
            packet_numbers: [0; 3],
        }
    }

    /// Queue `data` as one frame of `frame_type`, split by `max_frame_words`.
    pub fn queue_frame(&mut self, channel: PacketChannel, frame_type: FrameType, stack: u8, data: &[u32]) {
        let words = self.frames(frame_type, stack, FrameFlags::NONE, data);
        self.queue_words(channel, &words);
    }

    /// Queue raw words as one read (USB) or one datagram (ETH).
    pub fn queue_words(&mut self, channel: PacketChannel, words: &[u32]) {
        match self.connection_type {
            ConnectionType::Usb => self.pending.push_back(words_to_bytes(words)),
            ConnectionType::Eth => {
                let index = channel as usize;
                let number = self.packet_numbers[index];
                self.packet_numbers[index] = (number + 1 + self.skip_packet_numbers) & 0xfff;
                let header =
                    PayloadHeaderInfo::compose(channel as u8, number, 0, words.len() as u16, 0, Some(0));
                let mut datagram = vec![header.header0, header.header1];
                datagram.extend_from_slice(words);
                self.pending.push_back(words_to_bytes(&datagram));
            }
        }
    }

    fn frames(&self, frame_type: FrameType, stack: u8, flags: FrameFlags, data: &[u32]) -> Vec<u32> {
        let continuation = match frame_type {
            FrameType::SuperFrame => FrameType::SuperContinuation,
            FrameType::StackFrame => FrameType::StackContinuation,
            other => other,
        };
        let chunks: Vec<&[u32]> = if data.is_empty() {
            vec![data]
        } else {
            data.chunks(self.max_frame_words).collect()
        };
        let mut out = Vec::new();
        for (i, chunk) in chunks.iter().enumerate() {
            let ft = if i == 0 { frame_type } else { continuation };
            let mut frame_flags = flags;
            if i + 1 < chunks.len() {
                frame_flags = frame_flags.union(FrameFlags::CONTINUE);
            }
            out.push(
                FrameHeader::new(ft, stack, chunk.len() as u16)
                    .with_flags(frame_flags)
                    .encode(),
            );
            out.extend_from_slice(chunk);
        }
        out
    }

    fn execute_immediate_stack(&mut self) -> Vec<u32> {
        let offset_register = stacks::offset_register(IMMEDIATE_STACK_ID).unwrap();
        let offset = self.registers.get(&offset_register).copied().unwrap_or(0) as u16;
        let mut words = Vec::new();
        let mut address = STACK_MEMORY_BEGIN + offset;
        while address < STACK_MEMORY_END {
            let word = self.registers.get(&address).copied().unwrap_or(0);
            words.push(word);
            if stack_opcode_of(word) == stack_types::STACK_END {
                break;
            }
            address += 4;
        }
        let (_, commands) = decode_stack(&words).expect("valid immediate stack");

        let mut out = Vec::new();
        for cmd in commands {
            match cmd {
                StackCommand::WriteMarker { value } => out.push(value),
                StackCommand::VmeRead { address, .. } => {
                    out.push(self.vme.get(&address).copied().unwrap_or(0))
                }
                StackCommand::VmeWrite {
                    address,
                    value,
                    width,
                    ..
                } => {
                    let value = match width {
                        DataWidth::D16 => value & 0xffff,
                        DataWidth::D32 => value,
                    };
                    self.vme.insert(address, value);
                }
                StackCommand::VmeBlockRead { max_transfers, .. } => {
                    let count = self.block_data.len().min(usize::from(max_transfers));
                    let block = self.frames(FrameType::BlockRead, 0, FrameFlags::NONE, &self.block_data[..count]);
                    out.extend(block);
                }
                StackCommand::WriteSpecial { .. } => out.push(0),
                _ => {}
            }
        }
        out
    }
}

impl Pipe for MockController {
    fn read(&mut self, buf: &mut [u8]) -> mvlc_transport::Result<usize> {
        if self.disconnected {
            return Ok(0);
        }
        if self.timeouts_before_response > 0 {
            self.timeouts_before_response -= 1;
            return Err(TransportError::Timeout);
        }
        let Some(mut chunk) = self.pending.pop_front() else {
            return Err(TransportError::Timeout);
        };
        let n = chunk.len().min(buf.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        if n < chunk.len() {
            self.pending.push_front(chunk.split_off(n));
        }
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> mvlc_transport::Result<usize> {
        self.requests += 1;
        if !self.pending.is_empty() {
            self.overlapped = true;
        }

        let commands = decode_super(&to_words(buf)).expect("valid super buffer");
        let trigger_register = stacks::trigger_register(IMMEDIATE_STACK_ID).unwrap();
        let mut mirror = Vec::new();
        let mut triggered = false;
        for cmd in &commands {
            cmd.encode_into(&mut mirror);
            match *cmd {
                SuperCommand::ReadLocal { address } => {
                    mirror.push(self.registers.get(&address).copied().unwrap_or(0))
                }
                SuperCommand::WriteLocal { address, value } => {
                    self.registers.insert(address, value);
                    triggered |= address == trigger_register && value == IMMEDIATE_TRIGGER;
                }
                _ => {}
            }
        }
        if self.corrupt_mirror {
            if let Some(last) = mirror.last_mut() {
                *last ^= 1;
            }
        }
        self.queue_frame(PacketChannel::Command, FrameType::SuperFrame, 0, &mirror);

        if triggered {
            let output = self.execute_immediate_stack();
            let mut flags = self.stack_flags;
            if self.bus_error_on_run == Some(self.stack_runs) {
                flags = flags.union(FrameFlags::BUS_ERROR);
            }
            self.stack_runs += 1;
            let words = self.frames(FrameType::StackFrame, 0, flags, &output);
            self.queue_words(PacketChannel::Stack, &words);
        }
        Ok(buf.len())
    }

    fn connection_type(&self) -> ConnectionType {
        self.connection_type
    }
}
