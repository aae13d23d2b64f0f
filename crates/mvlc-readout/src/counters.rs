use std::collections::BTreeMap;
use std::fmt;

use mvlc_frame::StackErrorCounters;
use serde::Serialize;

/// Stream anomalies the parser absorbs and counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    /// A frame header of the wrong type where a specific one was expected.
    UnexpectedFrameHeader,
    /// Words that do not form a frame header where one was expected.
    UnknownWord,
    /// A frame ended before all configured module data was read.
    FrameTruncated,
    /// A stack frame from a stack that has no configured event.
    UnknownStack,
    /// Words left in a stack frame after all modules were satisfied.
    ExcessData,
    /// An event in progress was dropped because packets were lost.
    PacketLoss,
    /// An event in progress was dropped because buffers were lost.
    BufferLoss,
    /// The packet's next header pointer disagrees with the frame lengths.
    HeaderPointerMismatch,
    /// A malformed Ethernet packet or a truncated packet in the buffer.
    BadPacket,
    /// An event grew past the configured word limit.
    EventTooLarge,
}

impl AnomalyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AnomalyKind::UnexpectedFrameHeader => "unexpected_frame_header",
            AnomalyKind::UnknownWord => "unknown_word",
            AnomalyKind::FrameTruncated => "frame_truncated",
            AnomalyKind::UnknownStack => "unknown_stack",
            AnomalyKind::ExcessData => "excess_data",
            AnomalyKind::PacketLoss => "packet_loss",
            AnomalyKind::BufferLoss => "buffer_loss",
            AnomalyKind::HeaderPointerMismatch => "header_pointer_mismatch",
            AnomalyKind::BadPacket => "bad_packet",
            AnomalyKind::EventTooLarge => "event_too_large",
        }
    }
}

impl fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Statistics kept by [`ReadoutParser`](crate::ReadoutParser).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ParserCounters {
    pub buffers_processed: u64,
    /// Bytes skipped without contributing to an event or system event.
    pub unused_bytes: u64,
    /// Buffers missing from the sequence numbering.
    pub internal_buffer_loss: u64,
    pub eth_packets_processed: u64,
    pub eth_packet_loss: u64,
    pub system_events: BTreeMap<u8, u64>,
    /// Stack error notification frames seen in the stream.
    pub stack_errors: u64,
    /// Decoded notifications by stack, failing line and error flags.
    pub stack_error_counts: StackErrorCounters,
    pub empty_stack_frames: u64,
    /// Completed events per event index.
    pub event_hits: Vec<u64>,
    pub anomalies: BTreeMap<AnomalyKind, u64>,
}

impl ParserCounters {
    pub fn total_anomalies(&self) -> u64 {
        self.anomalies.values().sum()
    }

    pub fn anomaly_count(&self, kind: AnomalyKind) -> u64 {
        self.anomalies.get(&kind).copied().unwrap_or(0)
    }

    pub fn total_events(&self) -> u64 {
        self.event_hits.iter().sum()
    }

    pub(crate) fn record_anomaly(&mut self, kind: AnomalyKind) {
        *self.anomalies.entry(kind).or_default() += 1;
    }

    pub(crate) fn record_event(&mut self, event_index: usize) {
        if self.event_hits.len() <= event_index {
            self.event_hits.resize(event_index + 1, 0);
        }
        self.event_hits[event_index] += 1;
    }

    pub(crate) fn record_system_event(&mut self, subtype: u8) {
        *self.system_events.entry(subtype).or_default() += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_accumulate() {
        let mut counters = ParserCounters::default();
        counters.record_anomaly(AnomalyKind::FrameTruncated);
        counters.record_anomaly(AnomalyKind::FrameTruncated);
        counters.record_anomaly(AnomalyKind::PacketLoss);
        counters.record_event(2);
        counters.record_system_event(0x11);

        assert_eq!(counters.total_anomalies(), 3);
        assert_eq!(counters.anomaly_count(AnomalyKind::FrameTruncated), 2);
        assert_eq!(counters.anomaly_count(AnomalyKind::UnknownWord), 0);
        assert_eq!(counters.event_hits, vec![0, 0, 1]);
        assert_eq!(counters.total_events(), 1);
    }

    #[test]
    fn serializes_stack_error_counts() {
        let mut counters = ParserCounters::default();
        counters.stack_error_counts.record(&[0xf723_0001, 0x0003_0007]);
        let json = serde_json::to_value(&counters).unwrap();
        let errors = &json["stack_error_counts"]["errors"];
        assert_eq!(errors[0]["stack"], 3);
        assert_eq!(errors[0]["line"], 7);
        assert_eq!(errors[0]["flags"], 2);
        assert_eq!(errors[0]["count"], 1);
        assert_eq!(json["stack_error_counts"]["non_error_frames"], 0);
    }

    #[test]
    fn serializes_anomalies_by_name() {
        let mut counters = ParserCounters::default();
        counters.record_anomaly(AnomalyKind::ExcessData);
        let json = serde_json::to_value(&counters).unwrap();
        assert_eq!(json["anomalies"]["excess_data"], 1);
    }
}
