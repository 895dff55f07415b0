use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};

pub(crate) const HEADER_SIZE: usize = 24;

/// Trailer that distinguishes a header record from an inline payload.
pub(crate) const HEADER_TRAILER: [u8; 2] = [0x01, 0x00];

/// Header points a queue item at its chunk range:
///
///+---------------+---------------+---------------+------+------+
///| beg (u64 le)  | end (u64 le)  | size (u64 le) | 0x01 | 0x00 |
///+---------------+---------------+---------------+------+------+
///
///`beg` is the first chunk id (inclusive), `end` the last plus one, `size`
///the total payload bytes. The two-byte trailer is appended only when the
///header is written under an item key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Header {
    pub(crate) beg: u64,
    pub(crate) end: u64,
    pub(crate) size: u64,
}

impl Default for Header {
    /// A single-chunk item spans exactly one (implicit) chunk.
    fn default() -> Self {
        Header {
            beg: 0,
            end: 1,
            size: 0,
        }
    }
}

impl Header {
    pub(crate) fn is_multi_chunk(&self) -> bool {
        self.end - self.beg > 1
    }

    pub(crate) fn marshal(&self) -> Bytes {
        let mut writer = BytesMut::with_capacity(HEADER_SIZE + HEADER_TRAILER.len());
        writer.put_u64_le(self.beg);
        writer.put_u64_le(self.end);
        writer.put_u64_le(self.size);
        writer.put_slice(&HEADER_TRAILER);
        writer.freeze()
    }

    pub(crate) fn unmarshal(raw: &[u8]) -> Result<Self> {
        if raw.len() < HEADER_SIZE {
            return Err(Error::ErrHeaderTooSmall);
        }

        let reader = &mut &raw[..];
        Ok(Header {
            beg: reader.get_u64_le(),
            end: reader.get_u64_le(),
            size: reader.get_u64_le(),
        })
    }
}

/// A decoded journal value found under an item key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Value {
    /// Inline single-chunk payload.
    Item(Bytes),
    /// Multi-chunk item whose payload lives under the chunk range.
    Spilled(Header),
}

/// Applies the escape rule on write: a payload ending in `0x00` gets one
/// more `0x00` so it can't collide with the header trailer.
pub(crate) fn encode_item(payload: &[u8]) -> Bytes {
    match payload.last() {
        Some(0x00) => {
            let mut writer = BytesMut::with_capacity(payload.len() + 1);
            writer.put_slice(payload);
            writer.put_u8(0x00);
            writer.freeze()
        }
        _ => Bytes::copy_from_slice(payload),
    }
}

/// Decodes an item value, undoing the escape or recognizing a header. A
/// trailing `X 0x00` where `X` is neither escape nor trailer is corruption.
pub(crate) fn decode_value(mut raw: Vec<u8>) -> Result<Value> {
    if raw.len() < 2 || raw[raw.len() - 1] != 0x00 {
        return Ok(Value::Item(Bytes::from(raw)));
    }
    match raw[raw.len() - 2] {
        0x00 => {
            raw.truncate(raw.len() - 1);
            Ok(Value::Item(Bytes::from(raw)))
        }
        0x01 => {
            if raw.len() < HEADER_SIZE + HEADER_TRAILER.len() {
                return Err(Error::ErrCorruptValue);
            }
            Ok(Value::Spilled(Header::unmarshal(&raw[..HEADER_SIZE])?))
        }
        _ => Err(Error::ErrCorruptValue),
    }
}
