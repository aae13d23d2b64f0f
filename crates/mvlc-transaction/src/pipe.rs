//! The serialized command pipe.
//!
//! Every exchange with the controller's command pipe is request then
//! response. [`CommandPipe`] holds the transport behind a mutex for the full
//! exchange so concurrent callers never interleave their requests.

use std::sync::{Mutex, MutexGuard};

use bytes::{Buf, BufMut, BytesMut};
use mvlc_command::stacks::{
    self, IMMEDIATE_STACK_RESERVED_WORDS, IMMEDIATE_STACK_START_OFFSET_BYTES,
    IMMEDIATE_STACK_START_OFFSET_WORDS, IMMEDIATE_STACK_ID, IMMEDIATE_TRIGGER,
};
use mvlc_command::{
    registers, stack_upload_commands, StackCommand, StackCommandBuilder, SuperCommand,
    SuperCommandBuilder,
};
use mvlc_frame::eth::HEADER_WORDS;
use mvlc_frame::word::word_at;
use mvlc_frame::{
    FrameFlags, FrameHeader, FrameType, PacketLossTracker, PayloadHeaderInfo, StackErrorCounters,
    WORD_SIZE,
};
use mvlc_transport::{ConnectionType, Pipe, PipeKind, TransportError, JUMBO_FRAME_MAX_SIZE};
use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::error::{Result, TransactionError};
use crate::mirror::{check_mirror, reference_of};

pub const DEFAULT_MAX_READ_ATTEMPTS: u32 = 3;

/// Largest response accepted, in words. Covers a full block read.
pub const DEFAULT_MAX_RESPONSE_WORDS: usize = 1 << 20;

/// Stack words uploaded per super transaction over Ethernet. Keeps each
/// request inside one non-jumbo datagram.
pub const ETH_UPLOAD_PART_WORDS: usize = 181;

pub const USB_UPLOAD_PART_WORDS: usize = 768;

const USB_READ_SIZE: usize = 64 * 1024;

/// Stack markers this far behind the current one are treated as leftovers of
/// earlier, timed out transactions.
const STALE_STACK_WINDOW: u32 = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionConfig {
    /// Reads attempted per response before giving up with a timeout. Each
    /// attempt waits for the transport's read timeout.
    pub max_read_attempts: u32,
    pub max_response_words: usize,
    /// Bytes requested per transport read.
    pub read_size: usize,
    /// Stack words per upload transaction.
    pub upload_part_words: usize,
}

impl TransactionConfig {
    pub fn for_connection(connection_type: ConnectionType) -> Self {
        let (read_size, upload_part_words) = match connection_type {
            ConnectionType::Usb => (USB_READ_SIZE, USB_UPLOAD_PART_WORDS),
            ConnectionType::Eth => (JUMBO_FRAME_MAX_SIZE, ETH_UPLOAD_PART_WORDS),
        };
        Self {
            max_read_attempts: DEFAULT_MAX_READ_ATTEMPTS,
            max_response_words: DEFAULT_MAX_RESPONSE_WORDS,
            read_size,
            upload_part_words,
        }
    }
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self::for_connection(ConnectionType::Usb)
    }
}

/// Running totals for one command pipe.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TransactionStats {
    pub transactions: u64,
    pub stack_transactions: u64,
    /// Reads repeated after a timeout.
    pub retries: u64,
    pub timeouts: u64,
    pub mirror_mismatches: u64,
    /// Responses left over from earlier transactions and discarded.
    pub stale_responses: u64,
    /// 0xF7 stack error notifications seen on the command pipe.
    pub stack_errors_skipped: u64,
    /// The same notifications by stack, failing line and error flags.
    pub stack_errors: StackErrorCounters,
    pub eth_packet_loss: u64,
}

/// A verified super transaction response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuperResponse {
    /// The full mirror, starting with the echoed reference word.
    pub words: Vec<u32>,
    /// Values returned by `ReadLocal` commands, in request order.
    pub read_values: Vec<u32>,
}

/// Output of an immediate stack execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackResponse {
    /// Error flags collected over all frames of the response.
    pub flags: FrameFlags,
    /// Words produced by the stack commands, without the reference marker.
    pub words: Vec<u32>,
}

/// Request/response access to a controller's command pipe.
///
/// Shareable between threads (`&self` methods); exchanges are serialized.
pub struct CommandPipe<P> {
    inner: Mutex<Exchange<P>>,
    config: TransactionConfig,
}

impl<P: Pipe> CommandPipe<P> {
    pub fn new(pipe: P) -> Self {
        let config = TransactionConfig::for_connection(pipe.connection_type());
        Self::with_config(pipe, config)
    }

    pub fn with_config(pipe: P, config: TransactionConfig) -> Self {
        let connection_type = pipe.connection_type();
        Self {
            inner: Mutex::new(Exchange {
                pipe,
                connection_type,
                config: config.clone(),
                rx: BytesMut::new(),
                scratch: vec![0; config.read_size.max(WORD_SIZE)],
                next_super_ref: 1,
                next_stack_ref: 1,
                stats: TransactionStats::default(),
                loss: PacketLossTracker::new(),
            }),
            config,
        }
    }

    pub fn config(&self) -> &TransactionConfig {
        &self.config
    }

    pub fn stats(&self) -> Result<TransactionStats> {
        Ok(self.lock()?.stats.clone())
    }

    pub fn connection_type(&self) -> Result<ConnectionType> {
        Ok(self.lock()?.connection_type)
    }

    /// Send `commands` tagged with a fresh reference word and verify the echo.
    pub fn transact(&self, commands: &[SuperCommand]) -> Result<SuperResponse> {
        self.lock()?.super_transaction(commands)
    }

    /// Upload `commands` as the immediate stack, execute it and return its output.
    ///
    /// Upload, trigger and response happen under one lock.
    pub fn stack_transaction(&self, commands: &[StackCommand]) -> Result<StackResponse> {
        self.lock()?.stack_transaction(commands)
    }

    /// Write an encoded stack into stack memory at `offset_words`, split into
    /// parts that fit one super transaction each.
    pub fn upload_stack(
        &self,
        output_pipe: u8,
        offset_words: u16,
        commands: &[StackCommand],
    ) -> Result<()> {
        self.lock()?.upload(output_pipe, offset_words, commands)
    }

    /// Take the transport back, dropping any unread response bytes.
    pub fn into_inner(self) -> Result<P> {
        self.inner
            .into_inner()
            .map(|ex| ex.pipe)
            .map_err(|_| TransactionError::Poisoned)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Exchange<P>>> {
        self.inner.lock().map_err(|_| TransactionError::Poisoned)
    }
}

impl<P> std::fmt::Debug for CommandPipe<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandPipe")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// State owned by whoever holds the pipe lock.
struct Exchange<P> {
    pipe: P,
    connection_type: ConnectionType,
    config: TransactionConfig,
    /// Response bytes received but not consumed yet, packet headers removed.
    rx: BytesMut,
    scratch: Vec<u8>,
    next_super_ref: u16,
    next_stack_ref: u32,
    stats: TransactionStats,
    loss: PacketLossTracker,
}

impl<P: Pipe> Exchange<P> {
    fn super_transaction(&mut self, commands: &[SuperCommand]) -> Result<SuperResponse> {
        let reference = self.next_super_ref;
        self.next_super_ref = self.next_super_ref.wrapping_add(1);

        let mut builder = SuperCommandBuilder::new();
        builder
            .add_reference_word(reference)?
            .add_all(commands.iter().copied())?;
        self.write_words(&builder.encode())?;
        self.stats.transactions += 1;
        trace!(reference, commands = commands.len(), "super request sent");

        let words = loop {
            let (_, words) = self.read_response(FrameType::SuperFrame)?;
            match words.first().copied().and_then(reference_of) {
                Some(echoed) if echoed != reference => {
                    self.stats.stale_responses += 1;
                    debug!(expected = reference, echoed, "discarding stale super response");
                }
                _ => break words,
            }
        };

        match check_mirror(builder.commands(), &words) {
            Ok(read_values) => Ok(SuperResponse { words, read_values }),
            Err(err) => {
                self.stats.mirror_mismatches += 1;
                warn!(reference, error = %err, "mirror check failed");
                Err(err)
            }
        }
    }

    fn stack_transaction(&mut self, commands: &[StackCommand]) -> Result<StackResponse> {
        let marker = self.next_stack_ref;
        self.next_stack_ref = self.next_stack_ref.wrapping_add(1);

        let mut builder = StackCommandBuilder::with_budget(
            "immediate",
            usize::from(IMMEDIATE_STACK_RESERVED_WORDS),
        );
        builder.add(StackCommand::WriteMarker { value: marker })?;
        for cmd in commands {
            builder.add(*cmd)?;
        }
        let stack = builder.commands();

        self.upload(
            PipeKind::Command.number(),
            IMMEDIATE_STACK_START_OFFSET_WORDS,
            &stack,
        )?;
        self.super_transaction(&[
            SuperCommand::WriteLocal {
                address: registers::STACK_EXEC_STATUS0,
                value: 0,
            },
            SuperCommand::WriteLocal {
                address: registers::STACK_EXEC_STATUS1,
                value: 0,
            },
            SuperCommand::WriteLocal {
                address: stacks::offset_register(IMMEDIATE_STACK_ID)?,
                value: u32::from(IMMEDIATE_STACK_START_OFFSET_BYTES),
            },
            SuperCommand::WriteLocal {
                address: stacks::trigger_register(IMMEDIATE_STACK_ID)?,
                value: IMMEDIATE_TRIGGER,
            },
        ])?;
        self.stats.stack_transactions += 1;

        loop {
            let (flags, words) = self.read_response(FrameType::StackFrame)?;
            let Some(&echoed) = words.first() else {
                return Err(TransactionError::UnexpectedResponseSize {
                    expected: 1,
                    actual: 0,
                });
            };
            if echoed != marker {
                let behind = marker.wrapping_sub(echoed);
                if behind > 0 && behind <= STALE_STACK_WINDOW {
                    self.stats.stale_responses += 1;
                    debug!(expected = marker, echoed, "discarding stale stack response");
                    continue;
                }
                return Err(TransactionError::StackReferenceMismatch {
                    expected: marker,
                    actual: echoed,
                });
            }
            if flags.has_error() {
                debug!(marker, %flags, "stack execution reported errors");
                return Err(TransactionError::StackExecution { flags });
            }
            return Ok(StackResponse {
                flags,
                words: words[1..].to_vec(),
            });
        }
    }

    fn upload(&mut self, output_pipe: u8, offset_words: u16, commands: &[StackCommand]) -> Result<()> {
        let writes = stack_upload_commands(output_pipe, offset_words, commands)?;
        let part_words = self.config.upload_part_words.max(1);
        for (part, chunk) in writes.chunks(part_words).enumerate() {
            trace!(part, words = chunk.len(), offset_words, "uploading stack part");
            self.super_transaction(chunk)?;
        }
        Ok(())
    }

    fn write_words(&mut self, words: &[u32]) -> Result<()> {
        let mut out = BytesMut::with_capacity(words.len() * WORD_SIZE);
        for &word in words {
            out.put_u32_le(word);
        }
        self.pipe.write_all(&out)?;
        Ok(())
    }

    /// Read the next complete response whose first frame has type `wanted`.
    ///
    /// Stack error notifications are skipped. A complete response of the
    /// other kind is left over from an earlier, timed out transaction and is
    /// discarded. Returns the error flags of all frames and the data words.
    fn read_response(&mut self, wanted: FrameType) -> Result<(FrameFlags, Vec<u32>)> {
        loop {
            let word = self.read_word()?;
            let header = FrameHeader::decode(word);
            let continuation = match header.frame_type() {
                Some(FrameType::StackError) => {
                    let mut frame = vec![word];
                    self.read_frame_data(&header, &mut frame)?;
                    self.stats.stack_errors_skipped += 1;
                    match self.stats.stack_errors.record(&frame) {
                        Some(info) => debug!(
                            stack = info.stack,
                            line = info.line,
                            flags = %info.flags,
                            "stack error notification"
                        ),
                        None => trace!(%header, "malformed stack error notification"),
                    }
                    continue;
                }
                // The tail of a response whose start was given up on.
                Some(FrameType::SuperContinuation | FrameType::StackContinuation) => {
                    self.discard_words(header.data_word_count())?;
                    self.stats.stale_responses += 1;
                    debug!(%header, "discarding stale continuation frame");
                    continue;
                }
                Some(FrameType::SuperFrame) => FrameType::SuperContinuation,
                Some(FrameType::StackFrame) => FrameType::StackContinuation,
                _ => return Err(TransactionError::UnexpectedFrame(header)),
            };

            let mut words = Vec::new();
            let mut flags = FrameFlags::NONE;
            let mut current = header;
            loop {
                flags = flags.union(current.flags);
                self.read_frame_data(&current, &mut words)?;
                if !current.is_continued() {
                    break;
                }
                current = FrameHeader::decode(self.read_word()?);
                if current.frame_type() != Some(continuation) {
                    return Err(TransactionError::UnexpectedFrame(current));
                }
            }
            let flags = FrameFlags::from_bits(flags.bits() & FrameFlags::ERROR_MASK.bits());

            if header.frame_type() == Some(wanted) {
                return Ok((flags, words));
            }
            self.stats.stale_responses += 1;
            debug!(%header, "discarding stale response");
        }
    }

    fn read_frame_data(&mut self, header: &FrameHeader, words: &mut Vec<u32>) -> Result<()> {
        let max = self.config.max_response_words;
        if words.len() + header.data_word_count() > max {
            return Err(TransactionError::ResponseTooLarge { max });
        }
        words.reserve(header.data_word_count());
        for _ in 0..header.data_word_count() {
            words.push(self.read_word()?);
        }
        Ok(())
    }

    fn discard_words(&mut self, count: usize) -> Result<()> {
        for _ in 0..count {
            self.read_word()?;
        }
        Ok(())
    }

    fn read_word(&mut self) -> Result<u32> {
        while self.rx.len() < WORD_SIZE {
            self.fill()?;
        }
        Ok(self.rx.get_u32_le())
    }

    /// Perform one successful transport read, retrying on timeouts.
    fn fill(&mut self) -> Result<()> {
        let mut attempts = 0;
        loop {
            match self.pipe.read(&mut self.scratch) {
                Ok(0) => return Err(TransportError::Disconnected.into()),
                Ok(n) => {
                    self.accept(n);
                    return Ok(());
                }
                Err(TransportError::Timeout) => {
                    attempts += 1;
                    self.stats.timeouts += 1;
                    if attempts >= self.config.max_read_attempts {
                        warn!(attempts, "command pipe read timed out");
                        return Err(TransactionError::Timeout { attempts });
                    }
                    self.stats.retries += 1;
                    debug!(attempt = attempts, "command pipe read timed out, retrying");
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Move `n` received bytes from scratch into the response buffer.
    fn accept(&mut self, n: usize) {
        let data = &self.scratch[..n];
        match self.connection_type {
            ConnectionType::Usb => self.rx.extend_from_slice(data),
            ConnectionType::Eth => {
                let (Some(h0), Some(h1)) = (word_at(data, 0), word_at(data, 1)) else {
                    debug!(bytes = n, "ignoring short datagram");
                    return;
                };
                let info = PayloadHeaderInfo::new(h0, h1);
                let lost = self.loss.record_header(&info);
                if lost > 0 {
                    self.stats.eth_packet_loss += u64::from(lost);
                    warn!(lost, channel = info.packet_channel(), "command pipe packet loss");
                }
                let start = HEADER_WORDS * WORD_SIZE;
                let len = (usize::from(info.data_word_count()) * WORD_SIZE).min(n - start);
                self.rx.extend_from_slice(&data[start..start + len]);
            }
        }
    }
}
