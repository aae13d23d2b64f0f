//! Frame primitives and readout data reassembly for MVLC controllers.
//!
//! Everything on the wire is a 32-bit little-endian word. Frames are
//! self-describing: a header word carries
//! - an 8-bit frame type
//! - continue/error flags
//! - the stack number that produced the frame
//! - the number of data words that follow
//!
//! Over Ethernet each UDP packet payload additionally starts with a two-word
//! [`PayloadHeaderInfo`] carrying a packet sequence number for loss detection.
//!
//! [`fixup`] and [`ReadoutReader`] turn arbitrarily torn pipe reads into
//! buffers holding only whole units.

pub mod buffer;
pub mod error;
pub mod eth;
pub mod fixup;
pub mod header;
pub mod reader;
pub mod stack_error;
pub mod word;

pub use buffer::{ReadoutBuffer, DEFAULT_BUFFER_CAPACITY};
pub use error::{FrameError, Result};
pub use eth::{packet_loss, PacketChannel, PacketLossTracker, PayloadHeaderInfo};
pub use fixup::{fixup, FixupStats};
pub use header::{
    frame_types, system_event, FrameFlags, FrameHeader, FrameType, SystemEventHeader,
};
pub use reader::{ReadStatus, ReaderConfig, ReaderCounters, ReadoutReader, SlotState};
pub use stack_error::{StackErrorCount, StackErrorCounters, StackErrorInfo};
pub use word::WORD_SIZE;
