use std::cmp::Ordering;

use bytes::Buf;

use crate::error::{Error, Result};

/// Comparator name registered with the store. Must never change, or existing
/// journal directories will refuse to reopen.
pub(crate) const COMPARATOR_NAME: &str = "bobbin.key";

pub(crate) const KEY_SIZE: usize = 9;

///Key addresses one record in a queue's journal, 9 bytes on the wire:
///
/// 0               1               ...             7               8
///+---------------------------------------------------------------+------+
///|                     id (u64, little-endian)                   | tag  |
///+---------------------------------------------------------------+------+
///
///The tag (1 = item, 2 = chunk) orders before the id, so a single seek lands
///at the start of the item range or the chunk range. Ids are compared as
///native u64s; the raw little-endian bytes would sort wrong lexically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Key {
    pub(crate) typ: KeyType,
    pub(crate) id: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub(crate) enum KeyType {
    Item = 1,
    Chunk = 2,
}

impl Key {
    pub(crate) fn item(id: u64) -> Self {
        Key {
            typ: KeyType::Item,
            id,
        }
    }

    pub(crate) fn chunk(id: u64) -> Self {
        Key {
            typ: KeyType::Chunk,
            id,
        }
    }

    pub(crate) fn marshal(&self) -> [u8; KEY_SIZE] {
        let mut raw = [0u8; KEY_SIZE];
        raw[..8].copy_from_slice(&self.id.to_le_bytes());
        raw[8] = self.typ as u8;
        raw
    }

    pub(crate) fn unmarshal(raw: &[u8]) -> Result<Self> {
        if raw.len() < KEY_SIZE {
            return Err(Error::ErrKeyTooSmall);
        }

        let reader = &mut &raw[..];
        let id = reader.get_u64_le();
        let typ = match reader.get_u8() {
            1 => KeyType::Item,
            2 => KeyType::Chunk,
            typ => return Err(Error::ErrKeyTypeUnknown { typ }),
        };

        Ok(Key { typ, id })
    }
}

/// Orders raw journal keys as `(tag, id)`. Registered with the store at
/// open; malformed keys sort bytewise.
pub(crate) fn compare_keys(a: &[u8], b: &[u8]) -> Ordering {
    match (Key::unmarshal(a), Key::unmarshal(b)) {
        (Ok(ka), Ok(kb)) => (ka.typ, ka.id).cmp(&(kb.typ, kb.id)),
        _ => a.cmp(b),
    }
}
