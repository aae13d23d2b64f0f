use serde::Serialize;
use tracing::debug;

/// Number of header words at the start of every Ethernet packet payload.
pub const HEADER_WORDS: usize = 2;

/// Bit layout of the first packet header word.
///
/// ```text
/// 31 30 29 28 27          16 15 13 12            0
/// ┌─────┬─────┬──────────────┬─────┬───────────────┐
/// │ 0 0 │chan │ packet number│ctrl │  data words   │
/// └─────┴─────┴──────────────┴─────┴───────────────┘
/// ```
pub mod header0 {
    pub const TAG_SHIFT: u32 = 30;
    pub const TAG_MASK: u32 = 0b11;
    pub const PACKET_CHANNEL_SHIFT: u32 = 28;
    pub const PACKET_CHANNEL_MASK: u32 = 0b11;
    pub const PACKET_NUMBER_SHIFT: u32 = 16;
    pub const PACKET_NUMBER_MASK: u32 = 0xfff;
    pub const CTRL_ID_SHIFT: u32 = 13;
    pub const CTRL_ID_MASK: u32 = 0x7;
    pub const NUM_DATA_WORDS_SHIFT: u32 = 0;
    pub const NUM_DATA_WORDS_MASK: u32 = 0x1fff;
}

/// Bit layout of the second packet header word.
///
/// ```text
/// 31                     12 11           0
/// ┌─────────────────────────┬─────────────┐
/// │       timestamp         │ next header │
/// └─────────────────────────┴─────────────┘
/// ```
pub mod header1 {
    pub const TIMESTAMP_SHIFT: u32 = 12;
    pub const TIMESTAMP_MASK: u32 = 0xf_ffff;
    pub const HEADER_POINTER_SHIFT: u32 = 0;
    pub const HEADER_POINTER_MASK: u32 = 0xfff;
    /// Pointer value meaning "no frame header starts in this packet".
    pub const NO_HEADER_POINTER_PRESENT: u16 = 0xfff;
}

/// Packet numbers wrap at this value.
pub const PACKET_NUMBER_MODULUS: u32 = header0::PACKET_NUMBER_MASK + 1;

/// Number of packet channels the controller uses.
pub const NUM_PACKET_CHANNELS: usize = 3;

/// Logical stream a packet belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum PacketChannel {
    /// Super command responses.
    Command = 0,
    /// Stack output on the command pipe.
    Stack = 1,
    /// Readout data.
    Data = 2,
}

impl PacketChannel {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Command),
            1 => Some(Self::Stack),
            2 => Some(Self::Data),
            _ => None,
        }
    }
}

/// The two header words heading every Ethernet packet payload.
///
/// Decoding is total: any two words produce field values. Malformed headers
/// are detected later by the parser as stream anomalies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct PayloadHeaderInfo {
    pub header0: u32,
    pub header1: u32,
}

impl PayloadHeaderInfo {
    pub fn new(header0: u32, header1: u32) -> Self {
        Self { header0, header1 }
    }

    /// Compose header words from field values. Mostly useful for tests and tools.
    pub fn compose(
        channel: u8,
        packet_number: u16,
        controller_id: u8,
        data_word_count: u16,
        udp_timestamp: u32,
        next_header_pointer: Option<u16>,
    ) -> Self {
        let header0 = ((channel as u32 & header0::PACKET_CHANNEL_MASK)
            << header0::PACKET_CHANNEL_SHIFT)
            | ((packet_number as u32 & header0::PACKET_NUMBER_MASK)
                << header0::PACKET_NUMBER_SHIFT)
            | ((controller_id as u32 & header0::CTRL_ID_MASK) << header0::CTRL_ID_SHIFT)
            | ((data_word_count as u32 & header0::NUM_DATA_WORDS_MASK)
                << header0::NUM_DATA_WORDS_SHIFT);
        let pointer = next_header_pointer.unwrap_or(header1::NO_HEADER_POINTER_PRESENT);
        let header1 = ((udp_timestamp & header1::TIMESTAMP_MASK) << header1::TIMESTAMP_SHIFT)
            | ((pointer as u32 & header1::HEADER_POINTER_MASK) << header1::HEADER_POINTER_SHIFT);
        Self { header0, header1 }
    }

    pub fn packet_channel(&self) -> u8 {
        ((self.header0 >> header0::PACKET_CHANNEL_SHIFT) & header0::PACKET_CHANNEL_MASK) as u8
    }

    pub fn packet_number(&self) -> u16 {
        ((self.header0 >> header0::PACKET_NUMBER_SHIFT) & header0::PACKET_NUMBER_MASK) as u16
    }

    pub fn controller_id(&self) -> u8 {
        ((self.header0 >> header0::CTRL_ID_SHIFT) & header0::CTRL_ID_MASK) as u8
    }

    /// Payload words in this packet, not counting the two header words.
    pub fn data_word_count(&self) -> u16 {
        ((self.header0 >> header0::NUM_DATA_WORDS_SHIFT) & header0::NUM_DATA_WORDS_MASK) as u16
    }

    pub fn udp_timestamp(&self) -> u32 {
        (self.header1 >> header1::TIMESTAMP_SHIFT) & header1::TIMESTAMP_MASK
    }

    /// Word offset into the payload where the next frame header starts.
    pub fn next_header_pointer(&self) -> u16 {
        ((self.header1 >> header1::HEADER_POINTER_SHIFT) & header1::HEADER_POINTER_MASK) as u16
    }

    pub fn is_next_header_pointer_present(&self) -> bool {
        self.next_header_pointer() != header1::NO_HEADER_POINTER_PRESENT
    }

    /// True if header0 carries the `00` tag of an Ethernet packet header.
    pub fn has_header_tag(&self) -> bool {
        is_packet_header0(self.header0)
    }

    /// Total packet length in words, header included.
    pub fn packet_words(&self) -> usize {
        HEADER_WORDS + self.data_word_count() as usize
    }
}

impl From<(u32, u32)> for PayloadHeaderInfo {
    fn from((header0, header1): (u32, u32)) -> Self {
        Self::new(header0, header1)
    }
}

/// True if `word` can be the first word of a packet header (top two bits `00`).
pub fn is_packet_header0(word: u32) -> bool {
    (word >> header0::TAG_SHIFT) & header0::TAG_MASK == 0
}

/// Number of packets lost between two consecutively received packet numbers.
///
/// Packet numbers wrap modulo [`PACKET_NUMBER_MODULUS`]. A repeated number
/// counts as a full wrap of loss.
pub fn packet_loss(last: u16, current: u16) -> u32 {
    let modulus = PACKET_NUMBER_MODULUS as i32;
    (current as i32 - last as i32 - 1).rem_euclid(modulus) as u32
}

/// Loss bookkeeping for one packet channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChannelLoss {
    pub packets: u64,
    pub lost_packets: u64,
    pub gaps: u64,
    #[serde(skip)]
    last_packet_number: Option<u16>,
}

impl ChannelLoss {
    pub fn last_packet_number(&self) -> Option<u16> {
        self.last_packet_number
    }
}

/// Tracks packet number continuity per channel.
///
/// The first packet seen on a channel never counts as loss.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PacketLossTracker {
    channels: [ChannelLoss; 4],
}

impl PacketLossTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a received packet and return how many packets were lost before it.
    pub fn record(&mut self, channel: u8, packet_number: u16) -> u32 {
        let idx = (channel as u32 & header0::PACKET_CHANNEL_MASK) as usize;
        let state = &mut self.channels[idx];
        let lost = state
            .last_packet_number
            .map(|last| packet_loss(last, packet_number))
            .unwrap_or(0);

        state.packets += 1;
        state.last_packet_number = Some(packet_number);
        if lost > 0 {
            state.lost_packets += lost as u64;
            state.gaps += 1;
            debug!(channel, packet_number, lost, "ethernet packet loss");
        }
        lost
    }

    /// Record the packet described by a decoded header.
    pub fn record_header(&mut self, header: &PayloadHeaderInfo) -> u32 {
        self.record(header.packet_channel(), header.packet_number())
    }

    pub fn channel(&self, channel: u8) -> Option<&ChannelLoss> {
        self.channels.get(channel as usize)
    }

    pub fn total_lost(&self) -> u64 {
        self.channels.iter().map(|c| c.lost_packets).sum()
    }

    /// Forget the last seen packet numbers, e.g. after a reconnect.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
