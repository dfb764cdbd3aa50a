//! Value <-> token conversion inside a transaction.
//!
//! Scalars and short strings are packed into the token. Long strings, byte
//! strings and tuples are interned: `object_index` maps content to an object
//! id and `objects` maps the id back to content, so equal content always
//! yields the same token. Host lists and dicts become new persistent
//! collections; lazy collections of the same store are referenced by id.
//!
//! ```text
//! objects:       [object id: u64 BE]         -> [type code][payload]
//! object_index:  [type code][payload]        -> [object id: u64 BE]
//! tuple payload: element tokens, 16 bytes each, in order
//! ```

use crate::collections::{LazyDict, LazyList};
use crate::error::OocError;
use crate::store::{Table, Txn};
use crate::token::{ObjectKind, TOKEN_SIZE, Token, TokenKind};
use crate::value::{SharedDict, SharedList, Value};

/// Whether encoding may write to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeMode {
    ReadWrite,
    /// Fail with `ValueNotRegistered` for immutable values never stored, and
    /// with `WriteNotPermitted` for anything that needs a new collection.
    ReadOnly,
}

pub fn encode(txn: &Txn, value: &Value, mode: EncodeMode) -> Result<Token, OocError> {
    match value {
        Value::Null => Ok(Token::null()),
        Value::Bool(b) => Ok(Token::bool(*b)),
        Value::Int(n) => Ok(Token::int(*n)),
        Value::Float(x) => Ok(Token::float(*x)),
        Value::Str(s) => encode_bytes(txn, ObjectKind::Str, s.as_bytes(), mode),
        Value::Bytes(b) => encode_bytes(txn, ObjectKind::Bytes, b, mode),
        Value::Tuple(items) => {
            let mut content = Vec::with_capacity(items.len() * TOKEN_SIZE);
            for item in items {
                content.extend_from_slice(encode(txn, item, mode)?.as_bytes());
            }
            intern(txn, ObjectKind::Tuple, &content, mode)
        }
        Value::List(list) => encode_host_list(txn, value, list, mode),
        Value::Dict(dict) => encode_host_dict(txn, value, dict, mode),
        Value::LazyList(list) if list.store().same_store(txn.store()) => {
            Ok(Token::list(list.id()))
        }
        Value::LazyDict(dict) if dict.store().same_store(txn.store()) => {
            Ok(Token::dict(dict.id()))
        }
        Value::LazyList(list) => {
            // Lives in another store: copy its contents into a new list here.
            if mode == EncodeMode::ReadOnly {
                return Err(OocError::WriteNotPermitted);
            }
            let items = list.to_vec()?;
            let copy = LazyList::create_in(txn)?;
            copy.extend_values_in(txn, items.iter())?;
            Ok(Token::list(copy.id()))
        }
        Value::LazyDict(dict) => {
            if mode == EncodeMode::ReadOnly {
                return Err(OocError::WriteNotPermitted);
            }
            let pairs = dict.to_vec()?;
            let copy = LazyDict::create_in(txn)?;
            for (key, item) in &pairs {
                copy.set_in(txn, key, item)?;
            }
            Ok(Token::dict(copy.id()))
        }
    }
}

fn encode_bytes(
    txn: &Txn,
    kind: ObjectKind,
    payload: &[u8],
    mode: EncodeMode,
) -> Result<Token, OocError> {
    match Token::inline(kind, payload) {
        Some(token) => Ok(token),
        None => intern(txn, kind, payload, mode),
    }
}

fn intern(txn: &Txn, kind: ObjectKind, payload: &[u8], mode: EncodeMode) -> Result<Token, OocError> {
    let mut content = Vec::with_capacity(1 + payload.len());
    content.push(kind.type_code());
    content.extend_from_slice(payload);

    if let Some(id) = txn.get(Table::ObjectIndex, &content)? {
        return Ok(Token::object(kind, decode_object_id(&id)?));
    }
    if mode == EncodeMode::ReadOnly {
        return Err(OocError::ValueNotRegistered);
    }
    let id = txn.next_object_id()?;
    txn.put(Table::Objects, &id.to_be_bytes(), &content)?;
    txn.put(Table::ObjectIndex, &content, &id.to_be_bytes())?;
    Ok(Token::object(kind, id))
}

fn decode_object_id(bytes: &[u8]) -> Result<u64, OocError> {
    let raw: [u8; 8] = bytes.try_into().map_err(|_| {
        OocError::violation(format!("object id record has {} bytes", bytes.len()))
    })?;
    Ok(u64::from_be_bytes(raw))
}

/// Identity of a host collection; only ever called with one.
fn host_identity(value: &Value) -> Result<usize, OocError> {
    value
        .identity()
        .ok_or_else(|| OocError::violation("host collection without identity"))
}

fn encode_host_list(
    txn: &Txn,
    value: &Value,
    list: &SharedList,
    mode: EncodeMode,
) -> Result<Token, OocError> {
    let identity = host_identity(value)?;
    if let Some(token) = txn.dedup().lookup(identity) {
        return Ok(token);
    }
    if mode == EncodeMode::ReadOnly {
        return Err(OocError::WriteNotPermitted);
    }
    let created = LazyList::create_in(txn)?;
    let token = Token::list(created.id());
    // Registered before the elements so a cycle back here finds the token.
    txn.dedup_mut().register(identity, value, token);

    let items = list.borrow().clone();
    created.extend_values_in(txn, items.iter())?;
    Ok(token)
}

fn encode_host_dict(
    txn: &Txn,
    value: &Value,
    dict: &SharedDict,
    mode: EncodeMode,
) -> Result<Token, OocError> {
    let identity = host_identity(value)?;
    if let Some(token) = txn.dedup().lookup(identity) {
        return Ok(token);
    }
    if mode == EncodeMode::ReadOnly {
        return Err(OocError::WriteNotPermitted);
    }
    let created = LazyDict::create_in(txn)?;
    let token = Token::dict(created.id());
    txn.dedup_mut().register(identity, value, token);

    let pairs = dict.borrow().clone();
    for (key, item) in &pairs {
        created.set_in(txn, key, item)?;
    }
    Ok(token)
}

pub fn decode(txn: &Txn, token: &Token) -> Result<Value, OocError> {
    match token.kind()? {
        TokenKind::Null => Ok(Value::Null),
        TokenKind::Bool(b) => Ok(Value::Bool(b)),
        TokenKind::Int(n) => Ok(Value::Int(n)),
        TokenKind::Float(x) => Ok(Value::Float(x)),
        TokenKind::InlineStr(_) => decode_str(token.inline_payload()),
        TokenKind::InlineBytes(_) => Ok(Value::Bytes(token.inline_payload().to_vec())),
        TokenKind::Object(kind, id) => {
            let content = txn
                .get(Table::Objects, &id.to_be_bytes())?
                .ok_or_else(|| OocError::violation(format!("object {} is missing", id)))?;
            if content.first() != Some(&kind.type_code()) {
                return Err(OocError::violation(format!(
                    "object {} does not hold a {:?}",
                    id, kind
                )));
            }
            let payload = &content[1..];
            match kind {
                ObjectKind::Str => decode_str(payload),
                ObjectKind::Bytes => Ok(Value::Bytes(payload.to_vec())),
                ObjectKind::Tuple => {
                    if payload.len() % TOKEN_SIZE != 0 {
                        return Err(OocError::violation(format!(
                            "tuple object {} has {} bytes",
                            id,
                            payload.len()
                        )));
                    }
                    payload
                        .chunks_exact(TOKEN_SIZE)
                        .map(|chunk| decode(txn, &Token::from_slice(chunk)?))
                        .collect::<Result<Vec<_>, _>>()
                        .map(Value::Tuple)
                }
            }
        }
        TokenKind::List(id) => Ok(Value::LazyList(LazyList::from_id(txn.store().clone(), id))),
        TokenKind::Dict(id) => Ok(Value::LazyDict(LazyDict::from_id(txn.store().clone(), id))),
    }
}

fn decode_str(payload: &[u8]) -> Result<Value, OocError> {
    String::from_utf8(payload.to_vec())
        .map(Value::Str)
        .map_err(|_| OocError::violation("stored string is not UTF-8"))
}
