use mvlc_transport::{ConnectionType, Pipe, TransportError, JUMBO_FRAME_MAX_SIZE};
use serde::Serialize;
use tracing::{debug, trace};

use crate::buffer::{ReadoutBuffer, DEFAULT_BUFFER_CAPACITY};
use crate::error::{FrameError, Result};
use crate::fixup::fixup;

/// Default size of a single USB bulk read.
pub const DEFAULT_USB_READ_SIZE: usize = 256 * 1024;

/// Configuration for [`ReadoutReader`].
#[derive(Debug, Clone)]
pub struct ReaderConfig {
    /// Nominal capacity of each of the two slots, in bytes.
    pub buffer_capacity: usize,
    /// Maximum bytes requested per pipe read. Ethernet reads return one
    /// datagram each, so this only needs to fit a jumbo frame there.
    pub read_size: usize,
}

impl ReaderConfig {
    pub fn for_connection(connection_type: ConnectionType) -> Self {
        let read_size = match connection_type {
            ConnectionType::Usb => DEFAULT_USB_READ_SIZE,
            ConnectionType::Eth => JUMBO_FRAME_MAX_SIZE,
        };
        Self {
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            read_size,
        }
    }

    /// Make the read size and slot capacity agree.
    ///
    /// USB streams can be read in pieces, so the read size shrinks to fit
    /// the slot. An Ethernet read must take a whole datagram, so the slot
    /// grows to hold one instead.
    pub fn normalized(mut self, connection_type: ConnectionType) -> Self {
        self.read_size = self.read_size.max(1);
        match connection_type {
            ConnectionType::Usb => {
                self.buffer_capacity = self.buffer_capacity.max(1);
                self.read_size = self.read_size.min(self.buffer_capacity);
            }
            ConnectionType::Eth => {
                self.buffer_capacity = self.buffer_capacity.max(self.read_size);
            }
        }
        self
    }
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self::for_connection(ConnectionType::Usb)
    }
}

/// Where the two-slot cycle currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// The active slot is being filled from the pipe.
    Reading,
    /// Trailing partial data is being moved into the spare slot.
    FixingUp,
    /// The active slot holds aligned data owned by the consumer.
    HandedOff,
}

/// Result of one [`ReadoutReader::read_next`] call.
#[derive(Debug)]
pub enum ReadStatus<'a> {
    /// A buffer containing only whole frames (USB) or packets (Ethernet).
    Buffer(&'a ReadoutBuffer),
    /// The read timed out without delivering new complete data.
    Idle,
    /// The pipe signalled end-of-stream with a zero-length read.
    EndOfStream,
}

/// Counters maintained by the reader.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReaderCounters {
    pub reads: u64,
    pub bytes_read: u64,
    pub timeouts: u64,
    pub buffers: u64,
    pub framing_errors: u64,
    pub residue_bytes: u64,
}

/// Double-buffered read loop over a data pipe.
///
/// Two slots swap the destination and spare roles each cycle so that a
/// trailing partial frame is never copied more than once: fixup moves it into
/// the spare slot, which then becomes the next destination.
pub struct ReadoutReader<P> {
    pipe: P,
    connection_type: ConnectionType,
    slots: [ReadoutBuffer; 2],
    active: usize,
    state: SlotState,
    next_number: u64,
    config: ReaderConfig,
    counters: ReaderCounters,
}

impl<P: Pipe> ReadoutReader<P> {
    /// Create a reader with defaults for the pipe's connection type.
    pub fn new(pipe: P) -> Self {
        let config = ReaderConfig::for_connection(pipe.connection_type());
        Self::with_config(pipe, config)
    }

    pub fn with_config(pipe: P, config: ReaderConfig) -> Self {
        let connection_type = pipe.connection_type();
        let config = config.normalized(connection_type);
        Self {
            pipe,
            connection_type,
            slots: [
                ReadoutBuffer::new(connection_type, config.buffer_capacity),
                ReadoutBuffer::new(connection_type, config.buffer_capacity),
            ],
            active: 0,
            state: SlotState::Reading,
            next_number: 1,
            config,
            counters: ReaderCounters::default(),
        }
    }

    /// Read until a buffer of whole frames is available, the pipe times out,
    /// or the stream ends.
    ///
    /// Only transport failures other than a timeout are returned as errors.
    pub fn read_next(&mut self) -> Result<ReadStatus<'_>> {
        self.release_handed_off();

        loop {
            let mut got_data = false;
            let mut end_of_stream = false;

            while let Some(read_size) = self.next_read_size() {
                let dest = &mut self.slots[self.active];
                match dest.read_from(&mut self.pipe, read_size) {
                    Ok(0) => {
                        end_of_stream = true;
                        break;
                    }
                    Ok(n) => {
                        self.counters.reads += 1;
                        self.counters.bytes_read += n as u64;
                        got_data = true;
                        trace!(bytes = n, "pipe read");
                    }
                    Err(TransportError::Timeout) => {
                        self.counters.timeouts += 1;
                        break;
                    }
                    Err(err) => return Err(FrameError::Transport(err)),
                }
            }

            if !got_data {
                if end_of_stream {
                    let residue = self.slots[self.active].used();
                    if residue > 0 {
                        self.counters.residue_bytes += residue as u64;
                        debug!(residue, "discarding incomplete data at end of stream");
                        self.slots[self.active].clear();
                    }
                    return Ok(ReadStatus::EndOfStream);
                }
                if self.next_read_size().is_none() {
                    return Err(FrameError::ResidueOverflow {
                        size: self.slots[self.active].used(),
                        capacity: self.slots[self.active].capacity(),
                    });
                }
                return Ok(ReadStatus::Idle);
            }

            self.state = SlotState::FixingUp;
            let stats = {
                let (first, second) = self.slots.split_at_mut(1);
                let (dest, spare) = if self.active == 0 {
                    (&mut first[0], &mut second[0])
                } else {
                    (&mut second[0], &mut first[0])
                };
                fixup(self.connection_type, dest, spare)
            };
            self.counters.framing_errors += stats.framing_errors as u64;

            if self.slots[self.active].is_empty() {
                // Everything read so far belongs to an unfinished frame; keep
                // filling the slot holding it.
                self.active = 1 - self.active;
                self.state = SlotState::Reading;
                continue;
            }

            let number = self.next_number;
            self.next_number += 1;
            self.counters.buffers += 1;
            self.slots[self.active].set_number(number);
            self.state = SlotState::HandedOff;
            return Ok(ReadStatus::Buffer(&self.slots[self.active]));
        }
    }

    /// Take ownership of the buffer delivered by the last `read_next`,
    /// leaving `replacement` in its slot.
    ///
    /// Returns `None` if no buffer is currently handed off.
    pub fn hand_off(&mut self, mut replacement: ReadoutBuffer) -> Option<ReadoutBuffer> {
        if self.state != SlotState::HandedOff {
            return None;
        }
        replacement.clear();
        let filled = std::mem::replace(&mut self.slots[self.active], replacement);
        self.active = 1 - self.active;
        self.state = SlotState::Reading;
        Some(filled)
    }

    /// Bytes to request from the pipe next, or `None` if the active slot is
    /// too full. USB reads take whatever space is left; Ethernet reads need
    /// room for a whole datagram.
    fn next_read_size(&self) -> Option<usize> {
        let free = self.slots[self.active].free();
        match self.connection_type {
            ConnectionType::Usb => (free > 0).then(|| free.min(self.config.read_size)),
            ConnectionType::Eth => (free >= self.config.read_size).then_some(self.config.read_size),
        }
    }

    fn release_handed_off(&mut self) {
        if self.state == SlotState::HandedOff {
            self.slots[self.active].clear();
            self.active = 1 - self.active;
            self.state = SlotState::Reading;
        }
    }

    pub fn state(&self) -> SlotState {
        self.state
    }

    pub fn counters(&self) -> &ReaderCounters {
        &self.counters
    }

    pub fn connection_type(&self) -> ConnectionType {
        self.connection_type
    }

    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }

    /// Create an empty buffer compatible with this reader's slots.
    pub fn new_buffer(&self) -> ReadoutBuffer {
        ReadoutBuffer::new(self.connection_type, self.config.buffer_capacity)
    }

    /// Mutably borrow the underlying pipe.
    pub fn pipe_mut(&mut self) -> &mut P {
        &mut self.pipe
    }

    /// Consume the reader and return the pipe.
    pub fn into_inner(self) -> P {
        self.pipe
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::io::Cursor;

    use mvlc_transport::StreamPipe;

    use super::*;
    use crate::header::{FrameHeader, FrameType};
    use crate::word::words_to_bytes;

    fn frame(stack: u8, data: &[u32]) -> Vec<u32> {
        let mut out = vec![FrameHeader::new(FrameType::StackFrame, stack, data.len() as u16).encode()];
        out.extend_from_slice(data);
        out
    }

    /// Pipe replaying scripted read results.
    struct ScriptedPipe {
        reads: VecDeque<mvlc_transport::Result<Vec<u8>>>,
    }

    impl Pipe for ScriptedPipe {
        fn read(&mut self, buf: &mut [u8]) -> mvlc_transport::Result<usize> {
            match self.reads.pop_front() {
                Some(Ok(bytes)) => {
                    buf[..bytes.len()].copy_from_slice(&bytes);
                    Ok(bytes.len())
                }
                Some(Err(err)) => Err(err),
                None => Ok(0),
            }
        }

        fn write(&mut self, buf: &[u8]) -> mvlc_transport::Result<usize> {
            Ok(buf.len())
        }

        fn connection_type(&self) -> ConnectionType {
            ConnectionType::Usb
        }
    }

    fn small_config() -> ReaderConfig {
        ReaderConfig {
            buffer_capacity: 4096,
            read_size: 64,
        }
    }

    #[test]
    fn delivers_aligned_buffers_across_torn_reads() {
        let mut words = frame(1, &[1, 2, 3]);
        words.extend(frame(1, &[4, 5]));
        let bytes = words_to_bytes(&words);

        // The first read ends right after the second frame's header.
        let pipe = ScriptedPipe {
            reads: VecDeque::from(vec![
                Ok(bytes[..20].to_vec()),
                Err(TransportError::Timeout),
                Ok(bytes[20..].to_vec()),
                Err(TransportError::Timeout),
            ]),
        };
        let mut reader = ReadoutReader::with_config(pipe, small_config());

        let first = match reader.read_next().unwrap() {
            ReadStatus::Buffer(buf) => buf.to_words(),
            other => panic!("expected buffer, got {other:?}"),
        };
        assert_eq!(first, frame(1, &[1, 2, 3]));
        assert_eq!(reader.state(), SlotState::HandedOff);

        let second = match reader.read_next().unwrap() {
            ReadStatus::Buffer(buf) => (buf.number(), buf.to_words()),
            other => panic!("expected buffer, got {other:?}"),
        };
        assert_eq!(second, (2, frame(1, &[4, 5])));

        assert!(matches!(reader.read_next().unwrap(), ReadStatus::EndOfStream));
        assert_eq!(reader.counters().buffers, 2);
        assert_eq!(reader.counters().timeouts, 2);
    }

    #[test]
    fn timeout_without_data_is_idle() {
        let pipe = ScriptedPipe {
            reads: VecDeque::from(vec![Err(TransportError::Timeout)]),
        };
        let mut reader = ReadoutReader::with_config(pipe, small_config());
        assert!(matches!(reader.read_next().unwrap(), ReadStatus::Idle));
        assert_eq!(reader.state(), SlotState::Reading);
    }

    #[test]
    fn partial_only_read_keeps_reading() {
        let words = frame(2, &[9, 8, 7, 6]);
        let bytes = words_to_bytes(&words);
        let pipe = ScriptedPipe {
            reads: VecDeque::from(vec![
                Ok(bytes[..6].to_vec()),
                Err(TransportError::Timeout),
                Err(TransportError::Timeout),
                Ok(bytes[6..].to_vec()),
            ]),
        };
        let mut reader = ReadoutReader::with_config(pipe, small_config());
        // The first read is all residue: the reader swaps slots and goes on.
        assert!(matches!(reader.read_next().unwrap(), ReadStatus::Idle));
        match reader.read_next().unwrap() {
            ReadStatus::Buffer(buf) => assert_eq!(buf.to_words(), words),
            other => panic!("expected buffer, got {other:?}"),
        }
    }

    #[test]
    fn end_of_stream_discards_residue() {
        let mut words = frame(1, &[1]);
        words.push(FrameHeader::new(FrameType::StackFrame, 1, 5).encode());
        let pipe = StreamPipe::new(Cursor::new(words_to_bytes(&words)), ConnectionType::Usb);
        let mut reader = ReadoutReader::with_config(pipe, small_config());

        match reader.read_next().unwrap() {
            ReadStatus::Buffer(buf) => assert_eq!(buf.to_words(), frame(1, &[1])),
            other => panic!("expected buffer, got {other:?}"),
        }
        assert!(matches!(reader.read_next().unwrap(), ReadStatus::EndOfStream));
        assert_eq!(reader.counters().residue_bytes, 4);
    }

    #[test]
    fn transport_errors_propagate() {
        let pipe = ScriptedPipe {
            reads: VecDeque::from(vec![Err(TransportError::Disconnected)]),
        };
        let mut reader = ReadoutReader::with_config(pipe, small_config());
        let err = reader.read_next().unwrap_err();
        assert!(matches!(err, FrameError::Transport(TransportError::Disconnected)));
    }

    #[test]
    fn slot_smaller_than_read_size_still_reads() {
        let words = frame(1, &[0x1234]);
        let pipe = StreamPipe::new(Cursor::new(words_to_bytes(&words)), ConnectionType::Usb);
        let config = ReaderConfig {
            buffer_capacity: 65536,
            ..ReaderConfig::for_connection(ConnectionType::Usb)
        };
        let mut reader = ReadoutReader::with_config(pipe, config);
        assert_eq!(reader.config().read_size, 65536);

        match reader.read_next().unwrap() {
            ReadStatus::Buffer(buf) => assert_eq!(buf.to_words(), words),
            other => panic!("expected buffer, got {other:?}"),
        }
        assert!(matches!(reader.read_next().unwrap(), ReadStatus::EndOfStream));
    }

    #[test]
    fn residue_in_a_slot_does_not_block_reading() {
        let words = frame(3, &[1, 2, 3, 4, 5, 6]);
        let bytes = words_to_bytes(&words);
        let pipe = ScriptedPipe {
            reads: VecDeque::from(vec![
                Ok(bytes[..10].to_vec()),
                Err(TransportError::Timeout),
                Err(TransportError::Timeout),
                Ok(bytes[10..].to_vec()),
            ]),
        };
        let config = ReaderConfig {
            buffer_capacity: 64,
            read_size: 256,
        };
        let mut reader = ReadoutReader::with_config(pipe, config);
        assert!(matches!(reader.read_next().unwrap(), ReadStatus::Idle));
        match reader.read_next().unwrap() {
            ReadStatus::Buffer(buf) => assert_eq!(buf.to_words(), words),
            other => panic!("expected buffer, got {other:?}"),
        }
    }

    #[test]
    fn eth_slot_grows_to_hold_a_datagram() {
        let config = ReaderConfig {
            buffer_capacity: 1024,
            ..ReaderConfig::for_connection(ConnectionType::Eth)
        }
        .normalized(ConnectionType::Eth);
        assert_eq!(config.read_size, JUMBO_FRAME_MAX_SIZE);
        assert_eq!(config.buffer_capacity, JUMBO_FRAME_MAX_SIZE);
    }

    #[test]
    fn hand_off_transfers_ownership() {
        let words = frame(1, &[0xdead]);
        let pipe = StreamPipe::new(Cursor::new(words_to_bytes(&words)), ConnectionType::Usb);
        let mut reader = ReadoutReader::with_config(pipe, small_config());

        assert!(reader.hand_off(reader.new_buffer()).is_none());
        assert!(matches!(reader.read_next().unwrap(), ReadStatus::Buffer(_)));
        let replacement = reader.new_buffer();
        let owned = reader.hand_off(replacement).unwrap();
        assert_eq!(owned.to_words(), words);
        assert_eq!(owned.number(), 1);
        assert_eq!(reader.state(), SlotState::Reading);
        assert!(matches!(reader.read_next().unwrap(), ReadStatus::EndOfStream));
    }
}
