//! Stack error notifications (0xF7 frames).
//!
//! The controller reports a failed stack command with a two-word frame: the
//! header carries the stack number and error flags, the second word the
//! stack number and the line of the failing command.

use std::collections::BTreeMap;

use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};

use crate::header::{FrameFlags, FrameHeader, FrameType};

pub const STACK_LINE_MASK: u32 = 0xffff;
pub const STACK_NUMBER_SHIFT: u32 = 16;

/// Where a stack failed and how.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct StackErrorInfo {
    pub stack: u8,
    /// Index of the failing command within the stack.
    pub line: u16,
    pub flags: FrameFlags,
}

impl StackErrorInfo {
    /// Decode a complete notification frame, header included.
    ///
    /// Returns `None` for anything that is not a two-word 0xF7 frame.
    pub fn decode(frame: &[u32]) -> Option<Self> {
        let [header, info] = *frame else {
            return None;
        };
        let header = FrameHeader::decode(header);
        if header.frame_type() != Some(FrameType::StackError) {
            return None;
        }
        Some(Self {
            stack: header.stack,
            line: (info & STACK_LINE_MASK) as u16,
            flags: header.flags,
        })
    }
}

/// One row of [`StackErrorCounters`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StackErrorCount {
    pub stack: u8,
    pub line: u16,
    pub flags: FrameFlags,
    pub count: u64,
}

/// Occurrences of each distinct `(stack, line, flags)` error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StackErrorCounters {
    counts: BTreeMap<(u8, u16, u8), u64>,
    /// Frames passed to [`record`](Self::record) that were not notifications.
    pub non_error_frames: u64,
}

impl StackErrorCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one notification frame. Returns the decoded error, or `None` if
    /// the frame was malformed and only counted in `non_error_frames`.
    pub fn record(&mut self, frame: &[u32]) -> Option<StackErrorInfo> {
        match StackErrorInfo::decode(frame) {
            Some(info) => {
                *self
                    .counts
                    .entry((info.stack, info.line, info.flags.bits()))
                    .or_default() += 1;
                Some(info)
            }
            None => {
                self.non_error_frames += 1;
                None
            }
        }
    }

    pub fn count(&self, info: &StackErrorInfo) -> u64 {
        self.counts
            .get(&(info.stack, info.line, info.flags.bits()))
            .copied()
            .unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    /// Total errors reported for one stack.
    pub fn stack_total(&self, stack: u8) -> u64 {
        self.counts
            .range((stack, 0, 0)..=(stack, u16::MAX, u8::MAX))
            .map(|(_, count)| count)
            .sum()
    }

    /// All distinct errors ordered by stack, line and flags.
    pub fn entries(&self) -> impl Iterator<Item = StackErrorCount> + '_ {
        self.counts
            .iter()
            .map(|(&(stack, line, flags), &count)| StackErrorCount {
                stack,
                line,
                flags: FrameFlags::from_bits(flags),
                count,
            })
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty() && self.non_error_frames == 0
    }

    pub fn clear(&mut self) {
        self.counts.clear();
        self.non_error_frames = 0;
    }
}

impl Serialize for StackErrorCounters {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let errors: Vec<StackErrorCount> = self.entries().collect();
        let mut state = serializer.serialize_struct("StackErrorCounters", 2)?;
        state.serialize_field("errors", &errors)?;
        state.serialize_field("non_error_frames", &self.non_error_frames)?;
        state.end()
    }
}

/// Encode a notification frame, as the controller sends it.
pub fn encode_stack_error(info: &StackErrorInfo) -> [u32; 2] {
    let header = FrameHeader::new(FrameType::StackError, info.stack, 1)
        .with_flags(info.flags)
        .encode();
    let word = (u32::from(info.stack) << STACK_NUMBER_SHIFT) | u32::from(info.line);
    [header, word]
}
