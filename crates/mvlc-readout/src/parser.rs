//! Readout stream parser.
//!
//! Turns reassembled [`ReadoutBuffer`]s into per-module event callbacks. The
//! parser is a word-level state machine that survives buffer and packet
//! boundaries, so a stack frame may be split anywhere between buffers (USB
//! continuation frames) or packets (Ethernet).
//!
//! Stream anomalies never abort parsing. They are counted in
//! [`ParserCounters`], reported through [`ReadoutSink::anomaly`] and the
//! parser resumes at the next frame it can trust.

use std::mem;

use mvlc_frame::eth::HEADER_WORDS;
use mvlc_frame::word::words;
use mvlc_frame::{
    eth, FrameHeader, FrameType, PacketChannel, PacketLossTracker, PayloadHeaderInfo,
    ReadoutBuffer, SystemEventHeader, WORD_SIZE,
};
use mvlc_transport::ConnectionType;
use tracing::{debug, trace, warn};

use crate::counters::{AnomalyKind, ParserCounters};
use crate::sink::{PartKind, ReadoutSink};
use crate::structure::{ModuleReadoutStructure, ReadoutStructure};

/// Upper bound on the words buffered for a single event.
pub const DEFAULT_MAX_EVENT_WORDS: usize = 1 << 20;

#[derive(Debug, Clone)]
pub struct ParserConfig {
    /// Events growing beyond this are dropped with [`AnomalyKind::EventTooLarge`].
    pub max_event_words: usize,
    /// Detect lost buffers from gaps in buffer numbers. Buffer number 0 is
    /// treated as unnumbered and never checked.
    pub check_buffer_numbers: bool,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            max_event_words: DEFAULT_MAX_EVENT_WORDS,
            check_buffer_numbers: true,
        }
    }
}

/// Where the next top-level word goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Top {
    Header,
    Stack { left: usize },
    System { left: usize },
    StackError { left: usize },
    Skip { left: usize },
}

impl Top {
    /// Words until the next top-level header.
    fn words_to_header(self) -> usize {
        match self {
            Top::Header => 0,
            Top::Stack { left }
            | Top::System { left }
            | Top::StackError { left }
            | Top::Skip { left } => left,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Progress {
    NeedMore,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockCursor {
    AwaitHeader,
    Data { left: usize, continues: bool },
}

#[derive(Debug, Clone, Copy)]
struct PartSpan {
    module: usize,
    kind: PartKind,
    start: usize,
}

/// Collects one event's module data until the event is complete.
#[derive(Debug)]
struct EventAssembly {
    active: bool,
    event_index: usize,
    stack: u8,
    modules: Vec<ModuleReadoutStructure>,
    /// Current (module, index into `PartKind::ALL`), `None` once complete.
    cursor: Option<(usize, usize)>,
    left: usize,
    block: BlockCursor,
    words: Vec<u32>,
    parts: Vec<PartSpan>,
}

impl Default for EventAssembly {
    fn default() -> Self {
        Self {
            active: false,
            event_index: 0,
            stack: 0,
            modules: Vec::new(),
            cursor: None,
            left: 0,
            block: BlockCursor::AwaitHeader,
            words: Vec::new(),
            parts: Vec::new(),
        }
    }
}

impl EventAssembly {
    fn begin(&mut self, event_index: usize, stack: u8, modules: &[ModuleReadoutStructure]) {
        self.active = true;
        self.event_index = event_index;
        self.stack = stack;
        self.modules.clear();
        self.modules.extend_from_slice(modules);
        self.words.clear();
        self.parts.clear();
        self.cursor = None;
        self.open_next(0, 0);
    }

    fn is_complete(&self) -> bool {
        self.cursor.is_none()
    }

    /// Open the first part at or after `(module, kind)` that produces output.
    fn open_next(&mut self, mut module: usize, mut kind: usize) {
        while module < self.modules.len() {
            let layout = self.modules[module];
            while kind < PartKind::ALL.len() {
                let part = PartKind::ALL[kind];
                if layout.has_part(part) {
                    self.cursor = Some((module, kind));
                    self.left = match part {
                        PartKind::Prefix => layout.prefix_len,
                        PartKind::Dynamic => 0,
                        PartKind::Suffix => layout.suffix_len,
                    };
                    self.block = BlockCursor::AwaitHeader;
                    self.parts.push(PartSpan {
                        module,
                        kind: part,
                        start: self.words.len(),
                    });
                    return;
                }
                kind += 1;
            }
            module += 1;
            kind = 0;
        }
        self.cursor = None;
    }

    fn close_part(&mut self) {
        if let Some((module, kind)) = self.cursor {
            self.open_next(module, kind + 1);
        }
    }

    fn push(&mut self, word: u32) -> Result<Progress, AnomalyKind> {
        let Some((_, kind)) = self.cursor else {
            return Ok(Progress::Complete);
        };

        match PartKind::ALL[kind] {
            PartKind::Prefix | PartKind::Suffix => {
                self.words.push(word);
                self.left -= 1;
                if self.left == 0 {
                    self.close_part();
                }
            }
            PartKind::Dynamic => match self.block {
                BlockCursor::AwaitHeader => {
                    let header = FrameHeader::decode(word);
                    if header.frame_type() != Some(FrameType::BlockRead) {
                        return Err(AnomalyKind::UnexpectedFrameHeader);
                    }
                    let continues = header.is_continued();
                    match header.data_word_count() {
                        0 if !continues => self.close_part(),
                        0 => {}
                        left => self.block = BlockCursor::Data { left, continues },
                    }
                }
                BlockCursor::Data { left, continues } => {
                    self.words.push(word);
                    if left > 1 {
                        self.block = BlockCursor::Data {
                            left: left - 1,
                            continues,
                        };
                    } else if continues {
                        self.block = BlockCursor::AwaitHeader;
                    } else {
                        self.close_part();
                    }
                }
            },
        }

        Ok(if self.is_complete() {
            Progress::Complete
        } else {
            Progress::NeedMore
        })
    }

    fn emit<S: ReadoutSink + ?Sized>(&self, sink: &mut S) {
        sink.begin_event(self.event_index);
        for (i, part) in self.parts.iter().enumerate() {
            let end = self.parts.get(i + 1).map_or(self.words.len(), |next| next.start);
            sink.module_part(
                self.event_index,
                part.module,
                part.kind,
                &self.words[part.start..end],
            );
        }
        sink.end_event(self.event_index);
    }
}

/// Collects a system event, which may span several continued frames.
#[derive(Debug, Default)]
struct SystemAssembly {
    active: bool,
    subtype: u8,
    continued: bool,
    words: Vec<u32>,
}

impl SystemAssembly {
    /// Start or extend an event. Returns true if a partial event of another
    /// subtype was dropped.
    fn begin_frame(&mut self, header: &SystemEventHeader) -> bool {
        let dropped = self.active && self.subtype != header.subtype;
        if !self.active || dropped {
            self.words.clear();
            self.subtype = header.subtype;
        }
        self.active = true;
        self.continued = header.continued;
        dropped
    }

    fn finish_frame<S: ReadoutSink + ?Sized>(
        &mut self,
        counters: &mut ParserCounters,
        sink: &mut S,
    ) {
        if self.continued {
            return;
        }
        self.active = false;
        counters.record_system_event(self.subtype);
        trace!(subtype = self.subtype, words = self.words.len(), "system event");
        sink.system_event(self.subtype, &self.words);
    }
}

/// Readout data parser.
///
/// Feed buffers in order with [`parse_buffer`](Self::parse_buffer). Each
/// completed event is delivered as `begin_event`, its module parts in module
/// order, then `end_event`. Prefix and suffix parts are only delivered when
/// the module has fixed words there; the dynamic part is always delivered for
/// modules with a block read, possibly empty.
#[derive(Debug)]
pub struct ReadoutParser {
    structure: ReadoutStructure,
    config: ParserConfig,
    counters: ParserCounters,
    packet_loss: PacketLossTracker,
    top: Top,
    /// Stack of the stack frame currently being read.
    frame_stack: u8,
    frame_continues: bool,
    /// A continuation frame for this stack is expected next.
    continuation: Option<u8>,
    assembly: EventAssembly,
    system: SystemAssembly,
    interleaved: SystemAssembly,
    in_garbage: bool,
    eth_resync: bool,
    last_buffer_number: Option<u64>,
    scratch: Vec<u32>,
    /// Words of the stack error notification being read, header first.
    error_frame: Vec<u32>,
}

impl ReadoutParser {
    pub fn new(structure: ReadoutStructure) -> Self {
        Self::with_config(structure, ParserConfig::default())
    }

    pub fn with_config(structure: ReadoutStructure, config: ParserConfig) -> Self {
        let counters = ParserCounters {
            event_hits: vec![0; structure.event_count()],
            ..ParserCounters::default()
        };
        Self {
            structure,
            config,
            counters,
            packet_loss: PacketLossTracker::new(),
            top: Top::Header,
            frame_stack: 0,
            frame_continues: false,
            continuation: None,
            assembly: EventAssembly::default(),
            system: SystemAssembly::default(),
            interleaved: SystemAssembly::default(),
            in_garbage: false,
            eth_resync: true,
            last_buffer_number: None,
            scratch: Vec::new(),
            error_frame: Vec::new(),
        }
    }

    pub fn structure(&self) -> &ReadoutStructure {
        &self.structure
    }

    pub fn config(&self) -> &ParserConfig {
        &self.config
    }

    pub fn counters(&self) -> &ParserCounters {
        &self.counters
    }

    pub fn packet_loss(&self) -> &PacketLossTracker {
        &self.packet_loss
    }

    /// True while an event is being collected across frames or packets.
    pub fn is_event_in_progress(&self) -> bool {
        self.assembly.active
    }

    /// Drop all stream state, e.g. after reconnecting. Counters are kept.
    pub fn reset(&mut self) {
        self.reset_stream();
        self.assembly.active = false;
        self.interleaved.active = false;
        self.packet_loss.reset();
        self.eth_resync = true;
        self.last_buffer_number = None;
    }

    /// Parse one buffer, invoking `sink` for every completed event and
    /// system event.
    pub fn parse_buffer<S: ReadoutSink + ?Sized>(&mut self, buffer: &ReadoutBuffer, sink: &mut S) {
        let connection_type = buffer.connection_type();
        self.check_buffer_number(buffer.number(), connection_type, sink);

        let mut data = mem::take(&mut self.scratch);
        data.clear();
        data.extend(words(buffer.as_bytes()));
        let trailing = buffer.used() - data.len() * WORD_SIZE;
        self.counters.unused_bytes += trailing as u64;

        match connection_type {
            ConnectionType::Usb => self.parse_usb(&data, sink),
            ConnectionType::Eth => self.parse_eth(&data, sink),
        }

        self.scratch = data;
        self.counters.buffers_processed += 1;
    }

    fn check_buffer_number<S: ReadoutSink + ?Sized>(
        &mut self,
        number: u64,
        connection_type: ConnectionType,
        sink: &mut S,
    ) {
        if !self.config.check_buffer_numbers || number == 0 {
            return;
        }
        if let Some(last) = self.last_buffer_number {
            if number > last + 1 {
                let lost = number - last - 1;
                self.counters.internal_buffer_loss += lost;
                debug!(last, number, lost, "readout buffers lost");
                self.lose_sync(AnomalyKind::BufferLoss, sink);
                if connection_type == ConnectionType::Eth {
                    self.eth_resync = true;
                }
            }
        }
        self.last_buffer_number = Some(number);
    }

    fn parse_usb<S: ReadoutSink + ?Sized>(&mut self, data: &[u32], sink: &mut S) {
        for &word in data {
            self.step(word, sink);
        }

        // Fixup leaves only whole frames in a USB buffer.
        if self.top != Top::Header {
            let left = self.top.words_to_header();
            debug!(left, "buffer ends inside a frame");
            if self.assembly.active && matches!(self.top, Top::Stack { .. }) {
                self.fail(AnomalyKind::FrameTruncated, sink);
            } else {
                self.record_anomaly(AnomalyKind::FrameTruncated, sink);
            }
            self.reset_stream();
        }
    }

    fn parse_eth<S: ReadoutSink + ?Sized>(&mut self, data: &[u32], sink: &mut S) {
        let mut pos = 0;
        while pos < data.len() {
            let word = data[pos];
            let header = FrameHeader::decode(word);

            if header.frame_type().is_some_and(FrameType::is_system_event) {
                let end = pos + 1 + header.data_word_count();
                let Some(payload) = data.get(pos + 1..end) else {
                    self.bad_packet(data.len() - pos, sink);
                    break;
                };
                self.interleaved_system_frame(word, payload, sink);
                pos = end;
                continue;
            }

            if !eth::is_packet_header0(word) {
                self.unknown_word(sink);
                pos += 1;
                continue;
            }

            let Some(&header1) = data.get(pos + 1) else {
                self.bad_packet(data.len() - pos, sink);
                break;
            };
            let info = PayloadHeaderInfo::new(word, header1);
            let end = pos + info.packet_words();
            let Some(payload) = data.get(pos + HEADER_WORDS..end) else {
                self.bad_packet(data.len() - pos, sink);
                break;
            };
            self.in_garbage = false;
            self.parse_packet(&info, payload, sink);
            pos = end;
        }
    }

    fn interleaved_system_frame<S: ReadoutSink + ?Sized>(
        &mut self,
        word: u32,
        payload: &[u32],
        sink: &mut S,
    ) {
        let header = SystemEventHeader::decode(word);
        if self.interleaved.begin_frame(&header) {
            self.record_anomaly(AnomalyKind::UnexpectedFrameHeader, sink);
        }
        self.interleaved.words.extend_from_slice(payload);
        self.interleaved.finish_frame(&mut self.counters, sink);
    }

    fn parse_packet<S: ReadoutSink + ?Sized>(
        &mut self,
        info: &PayloadHeaderInfo,
        payload: &[u32],
        sink: &mut S,
    ) {
        self.counters.eth_packets_processed += 1;
        let lost = self.packet_loss.record_header(info);
        let is_data = info.packet_channel() == PacketChannel::Data as u8;

        if !is_data {
            trace!(channel = info.packet_channel(), "skipping non-data packet");
            self.skip_words(payload.len());
            return;
        }

        if lost > 0 {
            self.counters.eth_packet_loss += u64::from(lost);
            self.lose_sync(AnomalyKind::PacketLoss, sink);
            self.eth_resync = true;
        }

        let pointer = info
            .is_next_header_pointer_present()
            .then(|| usize::from(info.next_header_pointer()));

        let start = if self.eth_resync {
            match pointer {
                Some(p) if p <= payload.len() => {
                    self.eth_resync = false;
                    self.reset_stream();
                    p
                }
                _ => {
                    self.skip_words(payload.len());
                    return;
                }
            }
        } else if !payload.is_empty() && !self.pointer_consistent(pointer, payload.len()) {
            debug!(
                packet_number = info.packet_number(),
                ?pointer,
                expected = self.top.words_to_header(),
                "next header pointer mismatch"
            );
            self.fail(AnomalyKind::HeaderPointerMismatch, sink);
            self.reset_stream();
            match pointer {
                Some(p) if p <= payload.len() => p,
                _ => {
                    self.eth_resync = true;
                    self.skip_words(payload.len());
                    return;
                }
            }
        } else {
            0
        };

        self.skip_words(start);
        for &word in &payload[start..] {
            self.step(word, sink);
        }
    }

    /// Whether the packet's header pointer agrees with the frame lengths
    /// seen so far.
    fn pointer_consistent(&self, pointer: Option<usize>, payload_len: usize) -> bool {
        let expected = self.top.words_to_header();
        if expected < payload_len {
            pointer == Some(expected)
        } else {
            pointer.is_none()
        }
    }

    fn step<S: ReadoutSink + ?Sized>(&mut self, word: u32, sink: &mut S) {
        match self.top {
            Top::Header => self.on_header(word, sink),
            Top::Stack { left } => self.on_stack_word(word, left - 1, sink),
            Top::System { left } => {
                self.system.words.push(word);
                if left > 1 {
                    self.top = Top::System { left: left - 1 };
                } else {
                    self.top = Top::Header;
                    self.system.finish_frame(&mut self.counters, sink);
                }
            }
            Top::StackError { left } => {
                self.error_frame.push(word);
                if left > 1 {
                    self.top = Top::StackError { left: left - 1 };
                } else {
                    self.top = Top::Header;
                    self.finish_stack_error(sink);
                }
            }
            Top::Skip { left } => {
                self.counters.unused_bytes += WORD_SIZE as u64;
                self.top = if left > 1 {
                    Top::Skip { left: left - 1 }
                } else {
                    Top::Header
                };
            }
        }
    }

    fn on_header<S: ReadoutSink + ?Sized>(&mut self, word: u32, sink: &mut S) {
        let header = FrameHeader::decode(word);
        let Some(frame_type) = header.frame_type() else {
            self.unknown_word(sink);
            return;
        };
        self.in_garbage = false;

        if frame_type.is_system_event() {
            let sys = SystemEventHeader::decode(word);
            if self.system.begin_frame(&sys) {
                self.record_anomaly(AnomalyKind::UnexpectedFrameHeader, sink);
            }
            match sys.len {
                0 => self.system.finish_frame(&mut self.counters, sink),
                len => self.top = Top::System { left: usize::from(len) },
            }
            return;
        }

        if self.system.active {
            // A continued system event must be followed by its next frame.
            self.system.active = false;
            self.record_anomaly(AnomalyKind::UnexpectedFrameHeader, sink);
        }

        match frame_type {
            FrameType::StackFrame => self.on_stack_frame(&header, sink),
            FrameType::StackContinuation => self.on_stack_continuation(&header, sink),
            FrameType::StackError => {
                self.error_frame.clear();
                self.error_frame.push(word);
                match header.data_word_count() {
                    0 => self.finish_stack_error(sink),
                    left => self.top = Top::StackError { left },
                }
            }
            _ => {
                trace!(%header, "unexpected frame in readout data");
                self.record_anomaly(AnomalyKind::UnexpectedFrameHeader, sink);
                self.skip_frame(header.data_word_count());
            }
        }
    }

    fn on_stack_frame<S: ReadoutSink + ?Sized>(&mut self, header: &FrameHeader, sink: &mut S) {
        if self.continuation.take().is_some() && self.assembly.active {
            self.fail(AnomalyKind::UnexpectedFrameHeader, sink);
        }

        let len = header.data_word_count();
        if len == 0 && !header.is_continued() {
            self.counters.empty_stack_frames += 1;
            return;
        }

        let Some(event_index) = self.structure.event_index_for_stack(header.stack) else {
            debug!(stack = header.stack, "stack frame from unconfigured stack");
            self.record_anomaly(AnomalyKind::UnknownStack, sink);
            self.frame_stack = header.stack;
            self.frame_continues = header.is_continued();
            self.skip_rest_of_frame(len);
            return;
        };

        let modules = self.structure.event(event_index).unwrap_or(&[]);
        self.assembly.begin(event_index, header.stack, modules);
        self.frame_stack = header.stack;
        self.frame_continues = header.is_continued();

        if self.assembly.is_complete() {
            self.emit_event(sink);
            self.record_anomaly(AnomalyKind::ExcessData, sink);
            self.skip_rest_of_frame(len);
        } else if len > 0 {
            self.top = Top::Stack { left: len };
        } else {
            self.end_of_stack_frame(sink);
        }
    }

    fn on_stack_continuation<S: ReadoutSink + ?Sized>(
        &mut self,
        header: &FrameHeader,
        sink: &mut S,
    ) {
        let len = header.data_word_count();
        match self.continuation.take() {
            Some(stack) if stack == header.stack => {
                self.frame_stack = stack;
                self.frame_continues = header.is_continued();
                if !self.assembly.active {
                    self.skip_rest_of_frame(len);
                } else if len > 0 {
                    self.top = Top::Stack { left: len };
                } else {
                    self.end_of_stack_frame(sink);
                }
            }
            _ => {
                debug!(stack = header.stack, "continuation frame without a pending stack frame");
                self.fail(AnomalyKind::UnexpectedFrameHeader, sink);
                self.skip_frame(len);
            }
        }
    }

    fn on_stack_word<S: ReadoutSink + ?Sized>(&mut self, word: u32, left: usize, sink: &mut S) {
        self.top = if left > 0 {
            Top::Stack { left }
        } else {
            Top::Header
        };

        match self.assembly.push(word) {
            Err(kind) => {
                self.fail(kind, sink);
                self.skip_words(1);
                self.skip_rest_of_frame(left);
            }
            Ok(Progress::Complete) => {
                self.emit_event(sink);
                if left > 0 || self.frame_continues {
                    self.record_anomaly(AnomalyKind::ExcessData, sink);
                }
                self.skip_rest_of_frame(left);
            }
            Ok(Progress::NeedMore) => {
                if self.assembly.words.len() > self.config.max_event_words {
                    self.fail(AnomalyKind::EventTooLarge, sink);
                    self.skip_rest_of_frame(left);
                } else if left == 0 {
                    self.end_of_stack_frame(sink);
                }
            }
        }
    }

    fn end_of_stack_frame<S: ReadoutSink + ?Sized>(&mut self, sink: &mut S) {
        self.top = Top::Header;
        if self.frame_continues {
            self.continuation = Some(self.frame_stack);
        } else {
            debug!(
                event_index = self.assembly.event_index,
                words = self.assembly.words.len(),
                "stack frame ended before the event was complete"
            );
            self.fail(AnomalyKind::FrameTruncated, sink);
        }
    }

    fn finish_stack_error<S: ReadoutSink + ?Sized>(&mut self, sink: &mut S) {
        self.counters.stack_errors += 1;
        match self.counters.stack_error_counts.record(&self.error_frame) {
            Some(info) => {
                debug!(stack = info.stack, line = info.line, flags = %info.flags, "stack error");
                sink.stack_error(&info);
            }
            None => warn!(words = self.error_frame.len(), "malformed stack error notification"),
        }
        self.error_frame.clear();
    }

    /// Skip the remainder of the current stack frame and any continuation of it.
    fn skip_rest_of_frame(&mut self, left: usize) {
        self.skip_frame(left);
        self.continuation = self.frame_continues.then_some(self.frame_stack);
    }

    fn skip_frame(&mut self, len: usize) {
        self.top = if len > 0 {
            Top::Skip { left: len }
        } else {
            Top::Header
        };
    }

    fn emit_event<S: ReadoutSink + ?Sized>(&mut self, sink: &mut S) {
        self.assembly.emit(sink);
        self.assembly.active = false;
        self.counters.record_event(self.assembly.event_index);
    }

    /// Drop the event in progress, if any, after losing data.
    fn lose_sync<S: ReadoutSink + ?Sized>(&mut self, kind: AnomalyKind, sink: &mut S) {
        if self.assembly.active {
            self.fail(kind, sink);
        }
        self.reset_stream();
    }

    /// Record an anomaly, dropping the event in progress if there is one.
    fn fail<S: ReadoutSink + ?Sized>(&mut self, kind: AnomalyKind, sink: &mut S) {
        if self.assembly.active {
            debug!(
                %kind,
                event_index = self.assembly.event_index,
                stack = self.assembly.stack,
                "discarding event"
            );
            self.assembly.active = false;
            self.skip_words(self.assembly.words.len());
        }
        self.record_anomaly(kind, sink);
    }

    fn record_anomaly<S: ReadoutSink + ?Sized>(&mut self, kind: AnomalyKind, sink: &mut S) {
        self.counters.record_anomaly(kind);
        sink.anomaly(kind);
    }

    fn unknown_word<S: ReadoutSink + ?Sized>(&mut self, sink: &mut S) {
        self.skip_words(1);
        if !self.in_garbage {
            self.in_garbage = true;
            self.record_anomaly(AnomalyKind::UnknownWord, sink);
        }
    }

    fn bad_packet<S: ReadoutSink + ?Sized>(&mut self, words: usize, sink: &mut S) {
        debug!(words, "truncated ethernet packet at end of buffer");
        self.skip_words(words);
        self.fail(AnomalyKind::BadPacket, sink);
        self.reset_stream();
        self.eth_resync = true;
    }

    fn skip_words(&mut self, count: usize) {
        self.counters.unused_bytes += (count * WORD_SIZE) as u64;
    }

    fn reset_stream(&mut self) {
        self.top = Top::Header;
        self.continuation = None;
        self.frame_continues = false;
        self.system.active = false;
        self.in_garbage = false;
    }
}

#[cfg(test)]
mod tests {
    use mvlc_frame::stack_error::encode_stack_error;
    use mvlc_frame::{system_event, FrameFlags, StackErrorInfo};

    use super::*;
    use crate::sink::{EventRecorder, ParserEvent};

    fn frame(frame_type: FrameType, stack: u8, len: usize, flags: FrameFlags) -> u32 {
        FrameHeader::new(frame_type, stack, len as u16)
            .with_flags(flags)
            .encode()
    }

    /// Stack frame contents for one module with the given prefix, block data
    /// and suffix words.
    fn module_words(prefix: &[u32], block: &[u32], suffix: &[u32]) -> Vec<u32> {
        let mut out = prefix.to_vec();
        out.push(frame(FrameType::BlockRead, 0, block.len(), FrameFlags::NONE));
        out.extend_from_slice(block);
        out.extend_from_slice(suffix);
        out
    }

    fn stack_frame(stack: u8, contents: &[u32]) -> Vec<u32> {
        let mut out = vec![frame(FrameType::StackFrame, stack, contents.len(), FrameFlags::NONE)];
        out.extend_from_slice(contents);
        out
    }

    fn two_module_structure() -> ReadoutStructure {
        ReadoutStructure::new(vec![vec![
            ModuleReadoutStructure::new(2, true, 1),
            ModuleReadoutStructure::new(2, true, 1),
        ]])
    }

    fn usb(number: u64, words: &[u32]) -> ReadoutBuffer {
        ReadoutBuffer::from_words(ConnectionType::Usb, number, words)
    }

    fn eth_packet(number: u16, pointer: Option<u16>, payload: &[u32]) -> Vec<u32> {
        let info = PayloadHeaderInfo::compose(
            PacketChannel::Data as u8,
            number,
            0,
            payload.len() as u16,
            0,
            pointer,
        );
        let mut out = vec![info.header0, info.header1];
        out.extend_from_slice(payload);
        out
    }

    fn part(module: usize, kind: PartKind, data: &[u32]) -> ParserEvent {
        ParserEvent::ModulePart {
            event_index: 0,
            module_index: module,
            kind,
            data: data.to_vec(),
        }
    }

    fn event_words(tag: u32) -> Vec<u32> {
        let mut contents = module_words(&[tag, tag + 1], &[tag + 2, tag + 3, tag + 4], &[tag + 5]);
        contents.extend(module_words(&[tag + 10, tag + 11], &[tag + 12], &[tag + 13]));
        contents
    }

    fn expected_event(tag: u32) -> Vec<ParserEvent> {
        vec![
            ParserEvent::BeginEvent { event_index: 0 },
            part(0, PartKind::Prefix, &[tag, tag + 1]),
            part(0, PartKind::Dynamic, &[tag + 2, tag + 3, tag + 4]),
            part(0, PartKind::Suffix, &[tag + 5]),
            part(1, PartKind::Prefix, &[tag + 10, tag + 11]),
            part(1, PartKind::Dynamic, &[tag + 12]),
            part(1, PartKind::Suffix, &[tag + 13]),
            ParserEvent::EndEvent { event_index: 0 },
        ]
    }

    #[test]
    fn two_events_in_order() {
        let mut data = stack_frame(1, &event_words(0x100));
        data.extend(stack_frame(1, &event_words(0x200)));

        let mut parser = ReadoutParser::new(two_module_structure());
        let mut recorder = EventRecorder::new();
        parser.parse_buffer(&usb(1, &data), &mut recorder);

        let mut expected = expected_event(0x100);
        expected.extend(expected_event(0x200));
        assert_eq!(recorder.events, expected);
        assert!(recorder.anomalies.is_empty());
        assert_eq!(parser.counters().event_hits, vec![2]);
        assert_eq!(parser.counters().buffers_processed, 1);
        assert_eq!(parser.counters().unused_bytes, 0);
    }

    #[test]
    fn truncated_frame_yields_one_anomaly() {
        let mut data = vec![frame(FrameType::StackFrame, 1, 100, FrameFlags::NONE)];
        data.extend(0..10u32);

        let structure = ReadoutStructure::new(vec![vec![ModuleReadoutStructure::new(100, false, 0)]]);
        let mut parser = ReadoutParser::new(structure);
        let mut recorder = EventRecorder::new();
        parser.parse_buffer(&usb(1, &data), &mut recorder);

        assert!(recorder.events.is_empty());
        assert_eq!(recorder.anomalies, vec![AnomalyKind::FrameTruncated]);
        assert_eq!(parser.counters().total_anomalies(), 1);
        assert_eq!(parser.counters().total_events(), 0);
        assert!(!parser.is_event_in_progress());
    }

    #[test]
    fn frame_ending_early_discards_event() {
        // Declared length covers only the prefix, no continuation follows.
        let data = stack_frame(1, &[1, 2]);
        let mut parser = ReadoutParser::new(two_module_structure());
        let mut recorder = EventRecorder::new();
        parser.parse_buffer(&usb(1, &data), &mut recorder);

        assert!(recorder.events.is_empty());
        assert_eq!(recorder.anomalies, vec![AnomalyKind::FrameTruncated]);
    }

    #[test]
    fn continuation_frames_join_across_buffers() {
        let contents = event_words(0x100);
        let (first, second) = contents.split_at(4);

        let mut buf1 = vec![frame(
            FrameType::StackFrame,
            1,
            first.len(),
            FrameFlags::CONTINUE,
        )];
        buf1.extend_from_slice(first);
        let mut buf2 = vec![frame(
            FrameType::StackContinuation,
            1,
            second.len(),
            FrameFlags::NONE,
        )];
        buf2.extend_from_slice(second);

        let mut parser = ReadoutParser::new(two_module_structure());
        let mut recorder = EventRecorder::new();
        parser.parse_buffer(&usb(1, &buf1), &mut recorder);
        assert!(recorder.events.is_empty());
        assert!(parser.is_event_in_progress());

        parser.parse_buffer(&usb(2, &buf2), &mut recorder);
        assert_eq!(recorder.events, expected_event(0x100));
        assert!(recorder.anomalies.is_empty());
    }

    #[test]
    fn block_read_continues_over_several_block_frames() {
        let structure = ReadoutStructure::new(vec![vec![ModuleReadoutStructure::new(0, true, 0)]]);
        let contents = vec![
            frame(FrameType::BlockRead, 0, 2, FrameFlags::CONTINUE),
            1,
            2,
            frame(FrameType::BlockRead, 0, 1, FrameFlags::NONE),
            3,
        ];
        let mut parser = ReadoutParser::new(structure);
        let mut recorder = EventRecorder::new();
        parser.parse_buffer(&usb(1, &stack_frame(1, &contents)), &mut recorder);

        assert_eq!(
            recorder.events,
            vec![
                ParserEvent::BeginEvent { event_index: 0 },
                part(0, PartKind::Dynamic, &[1, 2, 3]),
                ParserEvent::EndEvent { event_index: 0 },
            ]
        );
    }

    #[test]
    fn empty_block_read_still_produces_dynamic_part() {
        let contents = module_words(&[1, 2], &[], &[3]);
        let structure = ReadoutStructure::new(vec![vec![ModuleReadoutStructure::new(2, true, 1)]]);
        let mut parser = ReadoutParser::new(structure);
        let mut recorder = EventRecorder::new();
        parser.parse_buffer(&usb(1, &stack_frame(1, &contents)), &mut recorder);

        assert_eq!(
            recorder.events,
            vec![
                ParserEvent::BeginEvent { event_index: 0 },
                part(0, PartKind::Prefix, &[1, 2]),
                part(0, PartKind::Dynamic, &[]),
                part(0, PartKind::Suffix, &[3]),
                ParserEvent::EndEvent { event_index: 0 },
            ]
        );
    }

    #[test]
    fn missing_block_header_is_unexpected() {
        let structure = ReadoutStructure::new(vec![vec![ModuleReadoutStructure::new(1, true, 0)]]);
        let mut parser = ReadoutParser::new(structure);
        let mut recorder = EventRecorder::new();
        parser.parse_buffer(&usb(1, &stack_frame(1, &[1, 2, 3])), &mut recorder);

        assert!(recorder.events.is_empty());
        assert_eq!(recorder.anomalies, vec![AnomalyKind::UnexpectedFrameHeader]);
        assert_eq!(parser.counters().unused_bytes, 2 * WORD_SIZE as u64 + WORD_SIZE as u64);
    }

    #[test]
    fn excess_words_are_reported_after_emitting() {
        let structure = ReadoutStructure::new(vec![vec![ModuleReadoutStructure::new(1, false, 0)]]);
        let mut parser = ReadoutParser::new(structure);
        let mut recorder = EventRecorder::new();
        parser.parse_buffer(&usb(1, &stack_frame(1, &[7, 8, 9])), &mut recorder);

        assert_eq!(recorder.events.len(), 3);
        assert_eq!(recorder.anomalies, vec![AnomalyKind::ExcessData]);
        assert_eq!(parser.counters().unused_bytes, 2 * WORD_SIZE as u64);
    }

    #[test]
    fn unknown_stack_and_stack_errors_are_skipped() {
        let mut data = stack_frame(5, &[1, 2, 3]);
        data.push(frame(FrameType::StackError, 1, 1, FrameFlags::NONE));
        data.push(0xdead);
        data.extend(stack_frame(1, &[]));
        data.extend(stack_frame(1, &event_words(0x100)));

        let mut parser = ReadoutParser::new(two_module_structure());
        let mut recorder = EventRecorder::new();
        parser.parse_buffer(&usb(1, &data), &mut recorder);

        assert_eq!(recorder.events, expected_event(0x100));
        assert_eq!(recorder.anomalies, vec![AnomalyKind::UnknownStack]);
        assert_eq!(parser.counters().stack_errors, 1);
        assert_eq!(parser.counters().empty_stack_frames, 1);
    }

    #[test]
    fn stack_error_notifications_are_decoded_per_stack() {
        let bus_error = StackErrorInfo {
            stack: 1,
            line: 4,
            flags: FrameFlags::BUS_ERROR,
        };
        let timeout = StackErrorInfo {
            stack: 2,
            line: 0,
            flags: FrameFlags::TIMEOUT,
        };
        let mut data = Vec::new();
        data.extend(encode_stack_error(&bus_error));
        data.extend(stack_frame(1, &event_words(0x100)));
        data.extend(encode_stack_error(&bus_error));
        data.extend(encode_stack_error(&timeout));
        // Malformed: a notification without its info word.
        data.push(frame(FrameType::StackError, 3, 0, FrameFlags::NONE));

        let mut parser = ReadoutParser::new(two_module_structure());
        let mut recorder = EventRecorder::new();
        parser.parse_buffer(&usb(1, &data), &mut recorder);

        assert_eq!(recorder.events, expected_event(0x100));
        assert!(recorder.anomalies.is_empty());
        assert_eq!(recorder.stack_errors, vec![bus_error, bus_error, timeout]);

        let counters = parser.counters();
        assert_eq!(counters.stack_errors, 4);
        assert_eq!(counters.stack_error_counts.count(&bus_error), 2);
        assert_eq!(counters.stack_error_counts.count(&timeout), 1);
        assert_eq!(counters.stack_error_counts.stack_total(1), 2);
        assert_eq!(counters.stack_error_counts.non_error_frames, 1);
        assert_eq!(counters.unused_bytes, 0);
    }

    #[test]
    fn junk_words_count_once_per_run() {
        let mut data = vec![0x1111_1111, 0x2222_2222, 0x3333_3333];
        data.extend(stack_frame(1, &event_words(0x100)));

        let mut parser = ReadoutParser::new(two_module_structure());
        let mut recorder = EventRecorder::new();
        parser.parse_buffer(&usb(1, &data), &mut recorder);

        assert_eq!(recorder.events, expected_event(0x100));
        assert_eq!(recorder.anomalies, vec![AnomalyKind::UnknownWord]);
        assert_eq!(parser.counters().unused_bytes, 12);
    }

    #[test]
    fn system_events_are_delivered() {
        let continued = SystemEventHeader {
            continued: true,
            ..SystemEventHeader::new(system_event::subtype::MVME_CONFIG, 2)
        };
        let data = vec![
            SystemEventHeader::new(system_event::subtype::UNIX_TIMETICK, 1).encode(),
            1_700_000_000,
            continued.encode(),
            b'{' as u32,
            b'"' as u32,
            SystemEventHeader::new(system_event::subtype::MVME_CONFIG, 1).encode(),
            b'}' as u32,
        ];

        let mut parser = ReadoutParser::new(two_module_structure());
        let mut recorder = EventRecorder::new();
        parser.parse_buffer(&usb(1, &data), &mut recorder);

        assert_eq!(
            recorder.events,
            vec![
                ParserEvent::SystemEvent {
                    subtype: system_event::subtype::UNIX_TIMETICK,
                    data: vec![1_700_000_000],
                },
                ParserEvent::SystemEvent {
                    subtype: system_event::subtype::MVME_CONFIG,
                    data: vec![b'{' as u32, b'"' as u32, b'}' as u32],
                },
            ]
        );
        assert_eq!(parser.counters().system_events.len(), 2);
    }

    #[test]
    fn buffer_gap_discards_pending_event() {
        let contents = event_words(0x100);
        let mut buf1 = vec![frame(FrameType::StackFrame, 1, 4, FrameFlags::CONTINUE)];
        buf1.extend_from_slice(&contents[..4]);

        let mut parser = ReadoutParser::new(two_module_structure());
        let mut recorder = EventRecorder::new();
        parser.parse_buffer(&usb(1, &buf1), &mut recorder);
        parser.parse_buffer(&usb(3, &stack_frame(1, &event_words(0x200))), &mut recorder);

        assert_eq!(recorder.events, expected_event(0x200));
        assert_eq!(recorder.anomalies, vec![AnomalyKind::BufferLoss]);
        assert_eq!(parser.counters().internal_buffer_loss, 1);
    }

    #[test]
    fn eth_event_spans_packets() {
        let mut frame_words = stack_frame(1, &event_words(0x100));
        let system = SystemEventHeader::new(system_event::subtype::UNIX_TIMETICK, 1).encode();
        // Second stack frame starts within the second packet.
        let tail = stack_frame(1, &event_words(0x200));

        let split = 5;
        let rest = frame_words.split_off(split);
        let mut second_payload = rest.clone();
        let pointer = second_payload.len() as u16;
        second_payload.extend_from_slice(&tail[..3]);

        let mut data = eth_packet(10, Some(0), &frame_words);
        data.extend([system, 42]);
        data.extend(eth_packet(11, Some(pointer), &second_payload));
        data.extend(eth_packet(12, None, &tail[3..]));

        let buffer = ReadoutBuffer::from_words(ConnectionType::Eth, 1, &data);
        let mut parser = ReadoutParser::new(two_module_structure());
        let mut recorder = EventRecorder::new();
        parser.parse_buffer(&buffer, &mut recorder);

        let mut expected = expected_event(0x100);
        expected.insert(
            0,
            ParserEvent::SystemEvent {
                subtype: system_event::subtype::UNIX_TIMETICK,
                data: vec![42],
            },
        );
        expected.extend(expected_event(0x200));
        assert_eq!(recorder.events, expected);
        assert!(recorder.anomalies.is_empty(), "{:?}", recorder.anomalies);
        assert_eq!(parser.counters().eth_packets_processed, 3);
        assert_eq!(parser.counters().eth_packet_loss, 0);
    }

    #[test]
    fn eth_packet_loss_discards_and_resyncs() {
        let event = stack_frame(1, &event_words(0x100));
        let (head, tail) = event.split_at(6);
        let next = stack_frame(1, &event_words(0x200));

        let mut data = eth_packet(1, Some(0), head);
        // Packet 2 carrying `tail` was lost. Packet 3 has the tail end of some
        // other frame before the next header.
        let mut payload = vec![0xaaaa, 0xbbbb];
        payload.extend_from_slice(&next);
        data.extend(eth_packet(3, Some(2), &payload));

        let buffer = ReadoutBuffer::from_words(ConnectionType::Eth, 1, &data);
        let mut parser = ReadoutParser::new(two_module_structure());
        let mut recorder = EventRecorder::new();
        parser.parse_buffer(&buffer, &mut recorder);

        assert!(!tail.is_empty());
        assert_eq!(recorder.events, expected_event(0x200));
        assert_eq!(recorder.anomalies, vec![AnomalyKind::PacketLoss]);
        assert_eq!(parser.counters().eth_packet_loss, 1);
        assert_eq!(parser.packet_loss().total_lost(), 1);
    }

    #[test]
    fn eth_first_packet_without_pointer_is_skipped() {
        let next = stack_frame(1, &event_words(0x100));
        let mut data = eth_packet(7, None, &[1, 2, 3]);
        data.extend(eth_packet(8, Some(0), &next));

        let buffer = ReadoutBuffer::from_words(ConnectionType::Eth, 1, &data);
        let mut parser = ReadoutParser::new(two_module_structure());
        let mut recorder = EventRecorder::new();
        parser.parse_buffer(&buffer, &mut recorder);

        assert_eq!(recorder.events, expected_event(0x100));
        assert!(recorder.anomalies.is_empty());
        assert_eq!(parser.counters().unused_bytes, 12);
    }

    #[test]
    fn eth_pointer_mismatch_resyncs_at_pointer() {
        let first = stack_frame(1, &event_words(0x100));
        let next = stack_frame(1, &event_words(0x200));
        // The first packet claims a longer frame than it holds.
        let mut head = first.clone();
        head[0] = frame(FrameType::StackFrame, 1, first.len() + 5, FrameFlags::NONE);
        let mut data = eth_packet(1, Some(0), &head);
        data.extend(eth_packet(2, Some(0), &next));

        let buffer = ReadoutBuffer::from_words(ConnectionType::Eth, 1, &data);
        let mut parser = ReadoutParser::new(two_module_structure());
        let mut recorder = EventRecorder::new();
        parser.parse_buffer(&buffer, &mut recorder);

        // The first event completes early and its extra length is skipped as
        // excess; the second packet's pointer then disagrees.
        assert_eq!(recorder.events[..8], expected_event(0x100)[..]);
        assert_eq!(recorder.events[8..], expected_event(0x200)[..]);
        assert_eq!(
            recorder.anomalies,
            vec![AnomalyKind::ExcessData, AnomalyKind::HeaderPointerMismatch]
        );
    }

    #[test]
    fn non_data_channel_packets_are_ignored() {
        let info = PayloadHeaderInfo::compose(PacketChannel::Command as u8, 1, 0, 2, 0, Some(0));
        let mut data = vec![info.header0, info.header1, 0xf100_0000, 0];
        data.extend(eth_packet(1, Some(0), &stack_frame(1, &event_words(0x100))));

        let buffer = ReadoutBuffer::from_words(ConnectionType::Eth, 1, &data);
        let mut parser = ReadoutParser::new(two_module_structure());
        let mut recorder = EventRecorder::new();
        parser.parse_buffer(&buffer, &mut recorder);

        assert_eq!(recorder.events, expected_event(0x100));
        assert_eq!(parser.counters().eth_packets_processed, 2);
    }
}
