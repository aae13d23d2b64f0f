use bytes::BytesMut;
use mvlc_transport::{ConnectionType, Pipe};

use crate::word::{self, WORD_SIZE};

/// Default nominal capacity of a readout buffer: 1 MiB.
pub const DEFAULT_BUFFER_CAPACITY: usize = 1024 * 1024;

/// An owned byte region holding raw readout data from one transport.
///
/// The buffer is tagged with its connection type because USB and Ethernet
/// framing differ. `number` is a sequence number assigned by the reader and
/// used downstream to detect dropped buffers.
#[derive(Debug, Clone)]
pub struct ReadoutBuffer {
    connection_type: ConnectionType,
    number: u64,
    capacity: usize,
    data: BytesMut,
}

impl ReadoutBuffer {
    pub fn new(connection_type: ConnectionType, capacity: usize) -> Self {
        Self {
            connection_type,
            number: 0,
            capacity,
            data: BytesMut::with_capacity(capacity),
        }
    }

    /// Build a buffer holding the given words. The capacity matches the content.
    pub fn from_words(connection_type: ConnectionType, number: u64, words: &[u32]) -> Self {
        let mut buffer = Self::new(connection_type, words.len() * WORD_SIZE);
        buffer.number = number;
        word::put_words(&mut buffer.data, words);
        buffer
    }

    pub fn connection_type(&self) -> ConnectionType {
        self.connection_type
    }

    pub fn number(&self) -> u64 {
        self.number
    }

    pub fn set_number(&mut self, number: u64) {
        self.number = number;
    }

    /// Nominal capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes written so far.
    pub fn used(&self) -> usize {
        self.data.len()
    }

    /// Bytes left before the nominal capacity is reached.
    pub fn free(&self) -> usize {
        self.capacity.saturating_sub(self.data.len())
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Complete words of the used region.
    pub fn to_words(&self) -> Vec<u32> {
        word::to_words(&self.data)
    }

    pub fn extend_from_slice(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    pub fn put_words(&mut self, words: &[u32]) {
        word::put_words(&mut self.data, words);
    }

    /// Shorten the used region to `len` bytes.
    pub fn truncate(&mut self, len: usize) {
        self.data.truncate(len);
    }

    /// Drop all data; keeps capacity and connection type.
    pub fn clear(&mut self) {
        self.data.clear();
        self.number = 0;
    }

    /// Perform one pipe read of at most `max_len` bytes, appending to the buffer.
    pub fn read_from<P: Pipe + ?Sized>(
        &mut self,
        pipe: &mut P,
        max_len: usize,
    ) -> mvlc_transport::Result<usize> {
        let start = self.data.len();
        self.data.resize(start + max_len, 0);
        match pipe.read(&mut self.data[start..]) {
            Ok(n) => {
                self.data.truncate(start + n);
                Ok(n)
            }
            Err(err) => {
                self.data.truncate(start);
                Err(err)
            }
        }
    }
}
