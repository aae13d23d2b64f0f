//! Reassembly of raw transport reads into buffers holding only whole units.
//!
//! USB data is aligned on top-level frames. Ethernet data is aligned on whole
//! packets (two header words plus payload) and on system event frames the
//! reader software may interleave between packets. Frames spanning packets are
//! joined later by the parser, driven by the packet header pointer.

use mvlc_transport::ConnectionType;
use tracing::trace;

use crate::buffer::ReadoutBuffer;
use crate::eth::{self, PayloadHeaderInfo};
use crate::header::{frame_length_of, frame_type_of, frame_types, is_known_frame_header};
use crate::word::{word_at, WORD_SIZE};

/// Outcome of one [`fixup`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FixupStats {
    /// Trailing bytes moved from the destination to the spare buffer.
    pub moved_bytes: usize,
    /// Words that did not look like a frame or packet header. They stay in
    /// place and are reported by the parser.
    pub framing_errors: usize,
}

/// Move any trailing partial frame (USB) or packet (Ethernet) from `dest`
/// into `spare`.
///
/// After the call `dest` holds only complete units. The residue is appended
/// to `spare`, which is expected to be empty and becomes the head of the next
/// read. Calling this again on an already aligned buffer moves nothing.
pub fn fixup(
    connection_type: ConnectionType,
    dest: &mut ReadoutBuffer,
    spare: &mut ReadoutBuffer,
) -> FixupStats {
    let (aligned_len, framing_errors) = {
        let bytes = dest.as_bytes();
        match connection_type {
            ConnectionType::Usb => scan(bytes, usb_unit_words),
            ConnectionType::Eth => scan(bytes, eth_unit_words),
        }
    };

    let moved_bytes = dest.used() - aligned_len;
    if moved_bytes > 0 {
        spare.extend_from_slice(&dest.as_bytes()[aligned_len..]);
        dest.truncate(aligned_len);
        trace!(%connection_type, moved_bytes, "moved partial frame to spare buffer");
    }

    FixupStats {
        moved_bytes,
        framing_errors,
    }
}

/// Size of one unit at the given word position.
enum Unit {
    /// A unit spanning this many words, header included.
    Words(usize),
    /// An unrecognized word, skipped on its own.
    Junk,
    /// Not enough bytes to even decode the unit header.
    Incomplete,
}

/// Hop units from the buffer start; returns the aligned length in bytes and
/// the number of junk words skipped.
fn scan(bytes: &[u8], unit_at: fn(&[u8], usize) -> Unit) -> (usize, usize) {
    let total_words = bytes.len() / WORD_SIZE;
    let mut pos = 0usize;
    let mut junk = 0usize;

    while pos < total_words {
        match unit_at(bytes, pos) {
            Unit::Words(n) if pos + n <= total_words => pos += n,
            Unit::Words(_) | Unit::Incomplete => break,
            Unit::Junk => {
                junk += 1;
                pos += 1;
            }
        }
    }

    (pos * WORD_SIZE, junk)
}

fn usb_unit_words(bytes: &[u8], pos: usize) -> Unit {
    match word_at(bytes, pos) {
        Some(header) if is_known_frame_header(header) => {
            Unit::Words(1 + frame_length_of(header) as usize)
        }
        Some(_) => Unit::Junk,
        None => Unit::Incomplete,
    }
}

fn eth_unit_words(bytes: &[u8], pos: usize) -> Unit {
    let Some(header0) = word_at(bytes, pos) else {
        return Unit::Incomplete;
    };

    let frame_type = frame_type_of(header0);
    if frame_type == frame_types::SYSTEM_EVENT || frame_type == frame_types::SYSTEM_EVENT2 {
        return Unit::Words(1 + frame_length_of(header0) as usize);
    }

    if !eth::is_packet_header0(header0) {
        return Unit::Junk;
    }

    match word_at(bytes, pos + 1) {
        Some(header1) => Unit::Words(PayloadHeaderInfo::new(header0, header1).packet_words()),
        None => Unit::Incomplete,
    }
}
