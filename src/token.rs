//! Fixed-size stored representation of one value.
//!
//! ```text
//! Token (16 bytes):
//!   [0]      type code
//!   [1..16]  payload, unused bytes are zero
//! ```
//!
//! | code        | payload                                           |
//! |-------------|---------------------------------------------------|
//! | 0x00        | null                                              |
//! | 0x01        | bool, byte 1 = 0 or 1                             |
//! | 0x02        | i64, big-endian with the sign bit flipped         |
//! | 0x03        | f64, order-preserving bits (-0.0 and NaN folded)  |
//! | 0x10 \| n   | inline UTF-8 string of n <= 15 bytes              |
//! | 0x20 \| n   | inline byte string of n <= 15 bytes               |
//! | 0x30..0x32  | interned string / bytes / tuple, u64 object id    |
//! | 0x40, 0x41  | list / dict reference, u32 collection id          |
//!
//! Equal immutable values always produce identical tokens: scalars are
//! canonicalised before encoding and everything larger than a token is
//! interned by content. Search can therefore compare tokens byte-for-byte.

use crate::error::OocError;
use crate::key::CollectionId;

pub const TOKEN_SIZE: usize = 16;

/// Longest string or byte string stored inside the token itself.
pub const INLINE_CAPACITY: usize = TOKEN_SIZE - 1;

pub const TYPE_NULL: u8 = 0x00;
pub const TYPE_BOOL: u8 = 0x01;
pub const TYPE_INT: u8 = 0x02;
pub const TYPE_FLOAT: u8 = 0x03;
pub const TYPE_INLINE_STR: u8 = 0x10;
pub const TYPE_INLINE_BYTES: u8 = 0x20;
pub const TYPE_STR: u8 = 0x30;
pub const TYPE_BYTES: u8 = 0x31;
pub const TYPE_TUPLE: u8 = 0x32;
pub const TYPE_LIST: u8 = 0x40;
pub const TYPE_DICT: u8 = 0x41;

const INLINE_LEN_MASK: u8 = 0x0F;
const SIGN_BIT: u64 = 1 << 63;

/// Kinds of value that live in the object tables, interned by content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Str,
    Bytes,
    Tuple,
}

impl ObjectKind {
    pub fn type_code(self) -> u8 {
        match self {
            ObjectKind::Str => TYPE_STR,
            ObjectKind::Bytes => TYPE_BYTES,
            ObjectKind::Tuple => TYPE_TUPLE,
        }
    }

    pub fn from_type_code(code: u8) -> Option<Self> {
        match code {
            TYPE_STR => Some(ObjectKind::Str),
            TYPE_BYTES => Some(ObjectKind::Bytes),
            TYPE_TUPLE => Some(ObjectKind::Tuple),
            _ => None,
        }
    }
}

/// What a token holds, after validating its type code.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TokenKind {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    InlineStr(usize),
    InlineBytes(usize),
    Object(ObjectKind, u64),
    List(CollectionId),
    Dict(CollectionId),
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Token([u8; TOKEN_SIZE]);

impl Token {
    pub fn from_array(bytes: [u8; TOKEN_SIZE]) -> Self {
        Self(bytes)
    }

    /// Read a token from a stored value; anything but 16 bytes is corrupt.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, OocError> {
        if bytes.len() != TOKEN_SIZE {
            return Err(OocError::violation(format!(
                "value token has {} bytes, expected {}",
                bytes.len(),
                TOKEN_SIZE
            )));
        }
        let mut raw = [0u8; TOKEN_SIZE];
        raw.copy_from_slice(bytes);
        Ok(Self(raw))
    }

    pub fn as_bytes(&self) -> &[u8; TOKEN_SIZE] {
        &self.0
    }

    pub fn type_code(&self) -> u8 {
        self.0[0]
    }

    fn with_code(code: u8) -> Self {
        let mut raw = [0u8; TOKEN_SIZE];
        raw[0] = code;
        Self(raw)
    }

    pub fn null() -> Self {
        Self::with_code(TYPE_NULL)
    }

    pub fn bool(value: bool) -> Self {
        let mut token = Self::with_code(TYPE_BOOL);
        token.0[1] = value as u8;
        token
    }

    pub fn int(value: i64) -> Self {
        let mut token = Self::with_code(TYPE_INT);
        let ordered = (value as u64) ^ SIGN_BIT;
        token.0[1..9].copy_from_slice(&ordered.to_be_bytes());
        token
    }

    pub fn float(value: f64) -> Self {
        let canonical = if value == 0.0 {
            0.0f64
        } else if value.is_nan() {
            f64::NAN
        } else {
            value
        };
        let bits = canonical.to_bits();
        let ordered = if bits & SIGN_BIT != 0 {
            !bits
        } else {
            bits | SIGN_BIT
        };
        let mut token = Self::with_code(TYPE_FLOAT);
        token.0[1..9].copy_from_slice(&ordered.to_be_bytes());
        token
    }

    /// Inline string or bytes; `None` if the payload does not fit.
    pub fn inline(kind: ObjectKind, payload: &[u8]) -> Option<Self> {
        if payload.len() > INLINE_CAPACITY {
            return None;
        }
        let base = match kind {
            ObjectKind::Str => TYPE_INLINE_STR,
            ObjectKind::Bytes => TYPE_INLINE_BYTES,
            ObjectKind::Tuple => return None,
        };
        let mut token = Self::with_code(base | payload.len() as u8);
        token.0[1..1 + payload.len()].copy_from_slice(payload);
        Some(token)
    }

    pub fn object(kind: ObjectKind, id: u64) -> Self {
        let mut token = Self::with_code(kind.type_code());
        token.0[1..9].copy_from_slice(&id.to_be_bytes());
        token
    }

    pub fn list(id: CollectionId) -> Self {
        let mut token = Self::with_code(TYPE_LIST);
        token.0[1..5].copy_from_slice(&id.to_be_bytes());
        token
    }

    pub fn dict(id: CollectionId) -> Self {
        let mut token = Self::with_code(TYPE_DICT);
        token.0[1..5].copy_from_slice(&id.to_be_bytes());
        token
    }

    /// Payload bytes of an inline string or byte string.
    pub fn inline_payload(&self) -> &[u8] {
        let len = (self.0[0] & INLINE_LEN_MASK) as usize;
        &self.0[1..1 + len]
    }

    fn u64_at_1(&self) -> u64 {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&self.0[1..9]);
        u64::from_be_bytes(raw)
    }

    fn u32_at_1(&self) -> u32 {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&self.0[1..5]);
        u32::from_be_bytes(raw)
    }

    pub fn kind(&self) -> Result<TokenKind, OocError> {
        let code = self.type_code();
        let kind = match code {
            TYPE_NULL => TokenKind::Null,
            TYPE_BOOL => match self.0[1] {
                0 => TokenKind::Bool(false),
                1 => TokenKind::Bool(true),
                other => {
                    return Err(OocError::violation(format!("bool token holds {}", other)));
                }
            },
            TYPE_INT => TokenKind::Int((self.u64_at_1() ^ SIGN_BIT) as i64),
            TYPE_FLOAT => {
                let ordered = self.u64_at_1();
                let bits = if ordered & SIGN_BIT != 0 {
                    ordered & !SIGN_BIT
                } else {
                    !ordered
                };
                TokenKind::Float(f64::from_bits(bits))
            }
            c if c & !INLINE_LEN_MASK == TYPE_INLINE_STR => {
                TokenKind::InlineStr((c & INLINE_LEN_MASK) as usize)
            }
            c if c & !INLINE_LEN_MASK == TYPE_INLINE_BYTES => {
                TokenKind::InlineBytes((c & INLINE_LEN_MASK) as usize)
            }
            TYPE_STR | TYPE_BYTES | TYPE_TUPLE => {
                let kind = ObjectKind::from_type_code(code)
                    .ok_or_else(|| OocError::violation("object token"))?;
                TokenKind::Object(kind, self.u64_at_1())
            }
            TYPE_LIST => TokenKind::List(self.u32_at_1()),
            TYPE_DICT => TokenKind::Dict(self.u32_at_1()),
            other => {
                return Err(OocError::violation(format!(
                    "unknown token type code {:#04x}",
                    other
                )));
            }
        };
        Ok(kind)
    }

    /// Tokens that name a mutable collection.
    pub fn is_collection(&self) -> bool {
        matches!(self.type_code(), TYPE_LIST | TYPE_DICT)
    }
}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Token(")?;
        for byte in self.0.iter() {
            write!(f, "{:02x}", byte)?;
        }
        write!(f, ")")
    }
}
