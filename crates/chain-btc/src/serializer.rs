//! Bitcoin wire-format primitives.
//!
//! Integers are always written little-endian and counts/lengths use the
//! CompactSize encoding. Hashes are kept in display (big-endian) order in
//! memory and reversed on the way out.

/// Append-only byte stream in Bitcoin wire format.
#[derive(Debug, Default, Clone)]
pub struct SerializerStream {
    data: Vec<u8>,
}

impl SerializerStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_u8(&mut self, value: u8) {
        self.data.push(value);
    }

    pub fn push_u16(&mut self, value: u16) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    pub fn push_u32(&mut self, value: u32) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    pub fn push_u64(&mut self, value: u64) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    /// CompactSize encoding: 1, 3, 5 or 9 bytes.
    pub fn push_var_int(&mut self, value: u64) {
        if value < 0xfd {
            self.push_u8(value as u8);
        } else if value <= 0xffff {
            self.push_u8(0xfd);
            self.push_u16(value as u16);
        } else if value <= 0xffff_ffff {
            self.push_u8(0xfe);
            self.push_u32(value as u32);
        } else {
            self.push_u8(0xff);
            self.push_u64(value);
        }
    }

    /// Length-prefixed byte vector (scripts, witness items).
    pub fn push_size_and_bytes(&mut self, bytes: &[u8]) {
        self.push_var_int(bytes.len() as u64);
        self.push_bytes(bytes);
    }

    pub fn push_bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Write a big-endian hash (e.g. a txid as shown by explorers) in the
    /// little-endian order used inside transactions.
    pub fn push_vector_as_le(&mut self, bytes: &[u8]) {
        self.data.extend(bytes.iter().rev());
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

/// CompactSize encoding of `value` as a standalone vector.
pub fn var_int(value: u64) -> Vec<u8> {
    let mut stream = SerializerStream::new();
    stream.push_var_int(value);
    stream.into_bytes()
}

/// Decode a CompactSize integer from the front of `bytes`.
///
/// Returns the value and the number of bytes consumed. Truncated input and
/// non-canonical encodings (a value that fits a shorter form) yield `None`.
pub fn read_var_int(bytes: &[u8]) -> Option<(u64, usize)> {
    let (&tag, rest) = bytes.split_first()?;
    match tag {
        0xfd => {
            let value = u16::from_le_bytes(rest.get(..2)?.try_into().ok()?) as u64;
            (value >= 0xfd).then_some((value, 3))
        }
        0xfe => {
            let value = u32::from_le_bytes(rest.get(..4)?.try_into().ok()?) as u64;
            (value > 0xffff).then_some((value, 5))
        }
        0xff => {
            let value = u64::from_le_bytes(rest.get(..8)?.try_into().ok()?);
            (value > 0xffff_ffff).then_some((value, 9))
        }
        small => Some((small as u64, 1)),
    }
}
