use std::fmt;

use serde::Serialize;

/// Bit layout of a frame header word.
///
/// ```text
/// 31      24 23  20 19  16 15 13 12            0
/// ┌─────────┬──────┬──────┬─────┬───────────────┐
/// │  type   │flags │stack │ctrl │    length     │
/// └─────────┴──────┴──────┴─────┴───────────────┘
/// ```
pub mod frame_layout {
    pub const TYPE_SHIFT: u32 = 24;
    pub const TYPE_MASK: u32 = 0xff;
    pub const FLAGS_SHIFT: u32 = 20;
    pub const FLAGS_MASK: u32 = 0xf;
    pub const STACK_SHIFT: u32 = 16;
    pub const STACK_MASK: u32 = 0xf;
    pub const CTRL_ID_SHIFT: u32 = 13;
    pub const CTRL_ID_MASK: u32 = 0x7;
    pub const LENGTH_SHIFT: u32 = 0;
    pub const LENGTH_MASK: u32 = 0x1fff;
}

/// Raw frame type tags.
pub mod frame_types {
    pub const SUPER_FRAME: u8 = 0xf1;
    pub const SUPER_CONTINUATION: u8 = 0xf2;
    pub const STACK_FRAME: u8 = 0xf3;
    pub const BLOCK_READ: u8 = 0xf5;
    pub const STACK_ERROR: u8 = 0xf7;
    pub const STACK_CONTINUATION: u8 = 0xf9;
    pub const SYSTEM_EVENT: u8 = 0xfa;
    pub const SYSTEM_EVENT2: u8 = 0xfb;
}

/// Top-level and nested frame types produced by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum FrameType {
    SuperFrame = frame_types::SUPER_FRAME,
    SuperContinuation = frame_types::SUPER_CONTINUATION,
    StackFrame = frame_types::STACK_FRAME,
    BlockRead = frame_types::BLOCK_READ,
    StackError = frame_types::STACK_ERROR,
    StackContinuation = frame_types::STACK_CONTINUATION,
    SystemEvent = frame_types::SYSTEM_EVENT,
    SystemEvent2 = frame_types::SYSTEM_EVENT2,
}

impl FrameType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            frame_types::SUPER_FRAME => Some(Self::SuperFrame),
            frame_types::SUPER_CONTINUATION => Some(Self::SuperContinuation),
            frame_types::STACK_FRAME => Some(Self::StackFrame),
            frame_types::BLOCK_READ => Some(Self::BlockRead),
            frame_types::STACK_ERROR => Some(Self::StackError),
            frame_types::STACK_CONTINUATION => Some(Self::StackContinuation),
            frame_types::SYSTEM_EVENT => Some(Self::SystemEvent),
            frame_types::SYSTEM_EVENT2 => Some(Self::SystemEvent2),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::SuperFrame => "SuperFrame",
            Self::SuperContinuation => "SuperContinuation",
            Self::StackFrame => "StackFrame",
            Self::BlockRead => "BlockRead",
            Self::StackError => "StackError",
            Self::StackContinuation => "StackContinuation",
            Self::SystemEvent => "SystemEvent",
            Self::SystemEvent2 => "SystemEvent2",
        }
    }

    pub fn is_system_event(self) -> bool {
        matches!(self, Self::SystemEvent | Self::SystemEvent2)
    }
}

/// The four frame flag bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct FrameFlags(u8);

impl FrameFlags {
    pub const NONE: Self = Self(0);
    pub const TIMEOUT: Self = Self(1 << 0);
    pub const BUS_ERROR: Self = Self(1 << 1);
    pub const SYNTAX_ERROR: Self = Self(1 << 2);
    pub const CONTINUE: Self = Self(1 << 3);

    /// Flags that mark a failed stack execution.
    pub const ERROR_MASK: Self = Self(Self::TIMEOUT.0 | Self::BUS_ERROR.0 | Self::SYNTAX_ERROR.0);

    pub fn from_bits(bits: u8) -> Self {
        Self(bits & frame_layout::FLAGS_MASK as u8)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub fn has_continue(self) -> bool {
        self.contains(Self::CONTINUE)
    }

    pub fn has_error(self) -> bool {
        self.intersects(Self::ERROR_MASK)
    }
}

impl fmt::Display for FrameFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        let names = [
            (Self::TIMEOUT, "timeout"),
            (Self::BUS_ERROR, "bus_error"),
            (Self::SYNTAX_ERROR, "syntax_error"),
            (Self::CONTINUE, "continue"),
        ];
        let mut first = true;
        for (flag, name) in names {
            if self.contains(flag) {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}

/// A decoded frame header word.
///
/// The type byte is kept raw so that unknown words can still be described.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FrameHeader {
    pub type_byte: u8,
    pub flags: FrameFlags,
    pub stack: u8,
    pub ctrl_id: u8,
    pub len: u16,
}

impl FrameHeader {
    /// Build a header with no flags and controller id 0.
    pub fn new(frame_type: FrameType, stack: u8, len: u16) -> Self {
        Self {
            type_byte: frame_type as u8,
            flags: FrameFlags::NONE,
            stack: stack & frame_layout::STACK_MASK as u8,
            ctrl_id: 0,
            len: len & frame_layout::LENGTH_MASK as u16,
        }
    }

    pub fn with_flags(mut self, flags: FrameFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn decode(word: u32) -> Self {
        use frame_layout::*;
        Self {
            type_byte: ((word >> TYPE_SHIFT) & TYPE_MASK) as u8,
            flags: FrameFlags::from_bits(((word >> FLAGS_SHIFT) & FLAGS_MASK) as u8),
            stack: ((word >> STACK_SHIFT) & STACK_MASK) as u8,
            ctrl_id: ((word >> CTRL_ID_SHIFT) & CTRL_ID_MASK) as u8,
            len: ((word >> LENGTH_SHIFT) & LENGTH_MASK) as u16,
        }
    }

    pub fn encode(&self) -> u32 {
        use frame_layout::*;
        ((self.type_byte as u32 & TYPE_MASK) << TYPE_SHIFT)
            | ((self.flags.bits() as u32 & FLAGS_MASK) << FLAGS_SHIFT)
            | ((self.stack as u32 & STACK_MASK) << STACK_SHIFT)
            | ((self.ctrl_id as u32 & CTRL_ID_MASK) << CTRL_ID_SHIFT)
            | ((self.len as u32 & LENGTH_MASK) << LENGTH_SHIFT)
    }

    pub fn frame_type(&self) -> Option<FrameType> {
        FrameType::from_u8(self.type_byte)
    }

    /// Number of words following the header that belong to this frame.
    pub fn data_word_count(&self) -> usize {
        self.len as usize
    }

    pub fn is_continued(&self) -> bool {
        self.flags.has_continue()
    }
}

impl fmt::Display for FrameHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.frame_type() {
            Some(ft) if ft.is_system_event() => {
                let sys = SystemEventHeader::decode(self.encode());
                write!(f, "{sys}")
            }
            Some(ft) => write!(
                f,
                "{} (0x{:02x}) stack={} len={} ctrl={} flags={}",
                ft.name(),
                self.type_byte,
                self.stack,
                self.len,
                self.ctrl_id,
                self.flags
            ),
            None => write!(f, "unknown frame type 0x{:02x}", self.type_byte),
        }
    }
}

/// Raw type byte of a header word.
pub fn frame_type_of(word: u32) -> u8 {
    ((word >> frame_layout::TYPE_SHIFT) & frame_layout::TYPE_MASK) as u8
}

/// Length field of a header word.
pub fn frame_length_of(word: u32) -> u16 {
    ((word >> frame_layout::LENGTH_SHIFT) & frame_layout::LENGTH_MASK) as u16
}

/// True if the word carries one of the known frame type tags.
pub fn is_known_frame_header(word: u32) -> bool {
    FrameType::from_u8(frame_type_of(word)).is_some()
}

/// Human readable form of a frame or system event header word.
pub fn describe(word: u32) -> String {
    FrameHeader::decode(word).to_string()
}

/// Bit layout and subtypes of system event headers (frame types 0xFA/0xFB).
pub mod system_event {
    pub const CONTINUE_SHIFT: u32 = 23;
    pub const CONTINUE_MASK: u32 = 0x1;
    pub const CTRL_ID_SHIFT: u32 = 20;
    pub const CTRL_ID_MASK: u32 = 0x7;
    pub const SUBTYPE_SHIFT: u32 = 13;
    pub const SUBTYPE_MASK: u32 = 0x7f;
    pub const LENGTH_SHIFT: u32 = 0;
    pub const LENGTH_MASK: u32 = 0x1fff;

    /// Number of distinct subtype values.
    pub const SUBTYPE_COUNT: usize = 128;

    pub mod subtype {
        pub const ENDIAN_MARKER: u8 = 0x01;
        pub const BEGIN_RUN: u8 = 0x02;
        pub const END_RUN: u8 = 0x03;
        pub const MVME_CONFIG: u8 = 0x10;
        pub const UNIX_TIMETICK: u8 = 0x11;
        pub const PAUSE: u8 = 0x12;
        pub const RESUME: u8 = 0x13;
        pub const CRATE_CONFIG: u8 = 0x14;
        pub const STACK_ERRORS: u8 = 0x15;
        pub const USER_MIN: u8 = 0x20;
        pub const USER_MAX: u8 = 0x2f;
        pub const END_OF_FILE: u8 = 0x77;
    }

    /// Value carried by an endian marker event.
    pub const ENDIAN_MARKER_VALUE: u32 = 0x1234_5678;

    pub fn subtype_name(value: u8) -> &'static str {
        match value {
            subtype::ENDIAN_MARKER => "EndianMarker",
            subtype::BEGIN_RUN => "BeginRun",
            subtype::END_RUN => "EndRun",
            subtype::MVME_CONFIG => "MVMEConfig",
            subtype::UNIX_TIMETICK => "UnixTimetick",
            subtype::PAUSE => "Pause",
            subtype::RESUME => "Resume",
            subtype::CRATE_CONFIG => "MVLCCrateConfig",
            subtype::STACK_ERRORS => "StackErrors",
            subtype::USER_MIN..=subtype::USER_MAX => "User",
            subtype::END_OF_FILE => "EndOfFile",
            _ => "unknown",
        }
    }
}

/// A decoded system event header word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SystemEventHeader {
    pub type_byte: u8,
    pub continued: bool,
    pub ctrl_id: u8,
    pub subtype: u8,
    pub len: u16,
}

impl SystemEventHeader {
    pub fn new(subtype: u8, len: u16) -> Self {
        Self {
            type_byte: frame_types::SYSTEM_EVENT,
            continued: false,
            ctrl_id: 0,
            subtype: subtype & system_event::SUBTYPE_MASK as u8,
            len: len & system_event::LENGTH_MASK as u16,
        }
    }

    pub fn decode(word: u32) -> Self {
        use system_event::*;
        Self {
            type_byte: frame_type_of(word),
            continued: (word >> CONTINUE_SHIFT) & CONTINUE_MASK != 0,
            ctrl_id: ((word >> CTRL_ID_SHIFT) & CTRL_ID_MASK) as u8,
            subtype: ((word >> SUBTYPE_SHIFT) & SUBTYPE_MASK) as u8,
            len: ((word >> LENGTH_SHIFT) & LENGTH_MASK) as u16,
        }
    }

    pub fn encode(&self) -> u32 {
        use system_event::*;
        ((self.type_byte as u32) << frame_layout::TYPE_SHIFT)
            | ((self.continued as u32) << CONTINUE_SHIFT)
            | ((self.ctrl_id as u32 & CTRL_ID_MASK) << CTRL_ID_SHIFT)
            | ((self.subtype as u32 & SUBTYPE_MASK) << SUBTYPE_SHIFT)
            | ((self.len as u32 & LENGTH_MASK) << LENGTH_SHIFT)
    }
}

impl fmt::Display for SystemEventHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SystemEvent (0x{:02x}) subtype={} (0x{:02x}) len={} ctrl={} continue={}",
            self.type_byte,
            system_event::subtype_name(self.subtype),
            self.subtype,
            self.len,
            self.ctrl_id,
            self.continued
        )
    }
}
