use bytes::{Buf, BufMut, BytesMut};

/// Size of one protocol word in bytes. Words travel little-endian.
pub const WORD_SIZE: usize = 4;

/// Word at `index` (in words) or `None` past the end.
pub fn word_at(bytes: &[u8], index: usize) -> Option<u32> {
    let start = index.checked_mul(WORD_SIZE)?;
    let mut chunk = bytes.get(start..start + WORD_SIZE)?;
    Some(chunk.get_u32_le())
}

/// Iterate the complete words of a byte slice. Trailing partial bytes are ignored.
pub fn words(bytes: &[u8]) -> impl Iterator<Item = u32> + '_ {
    bytes
        .chunks_exact(WORD_SIZE)
        .map(|mut chunk| chunk.get_u32_le())
}

/// Collect the complete words of a byte slice.
pub fn to_words(bytes: &[u8]) -> Vec<u32> {
    words(bytes).collect()
}

/// Append words to a byte buffer in wire order.
pub fn put_words(dst: &mut BytesMut, words: &[u32]) {
    dst.reserve(words.len() * WORD_SIZE);
    for &word in words {
        dst.put_u32_le(word);
    }
}

/// Encode words into a fresh byte vector.
pub fn words_to_bytes(words: &[u32]) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(words.len() * WORD_SIZE);
    put_words(&mut buf, words);
    buf.to_vec()
}
