//! Sortable binary keys for list and dict entries.
//!
//! ```text
//! ListKey (8 bytes):
//!   [0..4]  collection id   (u32, big-endian)
//!   [4..8]  position        (u32, big-endian; u32::MAX = length sentinel)
//!
//! DictKey (20 bytes):
//!   [0..4]   collection id  (u32, big-endian)
//!   [4..20]  key token      ([0xFF; 16] = count sentinel)
//! ```
//!
//! Big-endian fields make byte order equal numeric order, so a range scan
//! starting at `(id, 0)` walks one collection's positions in order and runs
//! into the sentinel last.

use crate::error::OocError;
use crate::token::{TOKEN_SIZE, Token};

/// Unique identifier of one persistent list or dict within a store.
pub type CollectionId = u32;

/// Position reserved for the length record of a list.
pub const LENGTH_SENTINEL: u32 = u32::MAX;

/// Token bytes reserved for the count record of a dict. 0xFF is never a type code.
pub const COUNT_SENTINEL: [u8; TOKEN_SIZE] = [0xFF; TOKEN_SIZE];

pub const LIST_KEY_SIZE: usize = 8;
pub const DICT_KEY_SIZE: usize = 4 + TOKEN_SIZE;

/// Largest entry count a dict's count record can hold.
pub const MAX_COUNT: u32 = u32::MAX;

/// Width of a stored length/count record.
pub const LENGTH_SIZE: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListKey {
    pub id: CollectionId,
    pub position: u32,
}

impl ListKey {
    pub fn new(id: CollectionId, position: u32) -> Self {
        Self { id, position }
    }

    pub fn length(id: CollectionId) -> Self {
        Self {
            id,
            position: LENGTH_SENTINEL,
        }
    }

    pub fn is_length(&self) -> bool {
        self.position == LENGTH_SENTINEL
    }

    /// True if this key is an element of collection `id` (not its sentinel).
    pub fn is_element_of(&self, id: CollectionId) -> bool {
        self.id == id && !self.is_length()
    }

    pub fn encode(&self) -> [u8; LIST_KEY_SIZE] {
        let mut bytes = [0u8; LIST_KEY_SIZE];
        bytes[..4].copy_from_slice(&self.id.to_be_bytes());
        bytes[4..].copy_from_slice(&self.position.to_be_bytes());
        bytes
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, OocError> {
        if bytes.len() != LIST_KEY_SIZE {
            return Err(OocError::violation(format!(
                "list key has {} bytes, expected {}",
                bytes.len(),
                LIST_KEY_SIZE
            )));
        }
        let mut id = [0u8; 4];
        let mut position = [0u8; 4];
        id.copy_from_slice(&bytes[..4]);
        position.copy_from_slice(&bytes[4..]);
        Ok(Self {
            id: u32::from_be_bytes(id),
            position: u32::from_be_bytes(position),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DictKey {
    pub id: CollectionId,
    pub token: [u8; TOKEN_SIZE],
}

impl DictKey {
    pub fn new(id: CollectionId, token: &Token) -> Self {
        Self {
            id,
            token: *token.as_bytes(),
        }
    }

    pub fn count(id: CollectionId) -> Self {
        Self {
            id,
            token: COUNT_SENTINEL,
        }
    }

    /// Smallest possible key of collection `id`; scans start here.
    pub fn first(id: CollectionId) -> Self {
        Self {
            id,
            token: [0u8; TOKEN_SIZE],
        }
    }

    pub fn is_count(&self) -> bool {
        self.token == COUNT_SENTINEL
    }

    pub fn is_element_of(&self, id: CollectionId) -> bool {
        self.id == id && !self.is_count()
    }

    pub fn key_token(&self) -> Token {
        Token::from_array(self.token)
    }

    pub fn encode(&self) -> [u8; DICT_KEY_SIZE] {
        let mut bytes = [0u8; DICT_KEY_SIZE];
        bytes[..4].copy_from_slice(&self.id.to_be_bytes());
        bytes[4..].copy_from_slice(&self.token);
        bytes
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, OocError> {
        if bytes.len() != DICT_KEY_SIZE {
            return Err(OocError::violation(format!(
                "dict key has {} bytes, expected {}",
                bytes.len(),
                DICT_KEY_SIZE
            )));
        }
        let mut id = [0u8; 4];
        let mut token = [0u8; TOKEN_SIZE];
        id.copy_from_slice(&bytes[..4]);
        token.copy_from_slice(&bytes[4..]);
        Ok(Self {
            id: u32::from_be_bytes(id),
            token,
        })
    }
}

pub fn encode_length(length: u32) -> [u8; LENGTH_SIZE] {
    length.to_le_bytes()
}

pub fn decode_length(bytes: &[u8]) -> Result<u32, OocError> {
    if bytes.len() != LENGTH_SIZE {
        return Err(OocError::violation(format!(
            "length record has {} bytes, expected {}",
            bytes.len(),
            LENGTH_SIZE
        )));
    }
    let mut raw = [0u8; LENGTH_SIZE];
    raw.copy_from_slice(bytes);
    Ok(u32::from_le_bytes(raw))
}
