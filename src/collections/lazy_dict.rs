//! Persistent dict stored as one key per entry.
//!
//! # Structure
//!
//! ```text
//! dicts table, one dict with id N:
//!   (N, key token)     -> value token
//!   ...
//!   (N, [0xFF; 16])    -> entry count (u32, little-endian)
//! ```
//!
//! Entries sort by key token, so iteration order is token order: ints
//! ascending, then floats, then strings, and so on. Keys must be immutable;
//! the token of an immutable value is the same every time it is encoded.
//!
//! # Performance
//!
//! - len / get / set / delete / contains_key: O(1) key lookups
//! - iteration: one range scan

use crate::codec::{self, EncodeMode};
use crate::error::OocError;
use crate::key::{CollectionId, DictKey, MAX_COUNT, decode_length, encode_length};
use crate::store::{CursorOp, Store, Table, Txn};
use crate::token::Token;
use crate::trace;
use crate::value::Value;

use super::iter::{DictItemsIter, DictKeysIter, DictValuesIter};

/// Handle to a dict in a store. Cheap to clone; clones name the same dict.
#[derive(Clone)]
pub struct LazyDict {
    store: Store,
    id: CollectionId,
}

impl LazyDict {
    /// Handle to the dict with this id. Does not check that it exists.
    pub fn from_id(store: Store, id: CollectionId) -> LazyDict {
        LazyDict { store, id }
    }

    pub fn create(store: &Store) -> Result<LazyDict, OocError> {
        store.write(LazyDict::create_in)
    }

    pub fn create_in(txn: &Txn) -> Result<LazyDict, OocError> {
        let id = txn.next_collection_id()?;
        let dict = LazyDict::from_id(txn.store().clone(), id);
        dict.init_in(txn)?;
        Ok(dict)
    }

    /// Write an empty count record for this id.
    pub(crate) fn init_in(&self, txn: &Txn) -> Result<(), OocError> {
        txn.put(Table::Dicts, &self.count_key(), &encode_length(0))?;
        self.traced("create", 0);
        Ok(())
    }

    pub fn id(&self) -> CollectionId {
        self.id
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn same_collection(&self, other: &LazyDict) -> bool {
        self.id == other.id && self.store.same_store(&other.store)
    }

    fn count_key(&self) -> [u8; crate::key::DICT_KEY_SIZE] {
        DictKey::count(self.id).encode()
    }

    fn traced(&self, op: &'static str, count: u32) {
        trace::record(trace::EventKind::DictOp {
            op,
            id: self.id,
            count,
        });
    }

    /// Token of `key` if it has ever been stored; `None` means no dict can
    /// contain it.
    fn lookup_token(&self, txn: &Txn, key: &Value) -> Result<Option<Token>, OocError> {
        if !key.is_hashable() {
            return Err(OocError::UnhashableKey {
                kind: key.kind_name(),
            });
        }
        match codec::encode(txn, key, EncodeMode::ReadOnly) {
            Ok(token) => Ok(Some(token)),
            Err(OocError::ValueNotRegistered) => Ok(None),
            Err(error) => Err(error),
        }
    }

    pub fn len(&self) -> Result<usize, OocError> {
        self.store.read(|txn| self.length_in(txn)).map(|n| n as usize)
    }

    pub fn is_empty(&self) -> Result<bool, OocError> {
        self.len().map(|n| n == 0)
    }

    pub fn length_in(&self, txn: &Txn) -> Result<u32, OocError> {
        let record = txn.get(Table::Dicts, &self.count_key())?.ok_or_else(|| {
            OocError::violation(format!("dict {} has no count record", self.id))
        })?;
        decode_length(&record)
    }

    fn write_count(&self, txn: &Txn, count: u32) -> Result<(), OocError> {
        txn.put(Table::Dicts, &self.count_key(), &encode_length(count))
    }

    pub fn get(&self, key: &Value) -> Result<Option<Value>, OocError> {
        self.store.read(|txn| self.get_in(txn, key))
    }

    pub fn get_in(&self, txn: &Txn, key: &Value) -> Result<Option<Value>, OocError> {
        let Some(token) = self.lookup_token(txn, key)? else {
            return Ok(None);
        };
        match txn.get(Table::Dicts, &DictKey::new(self.id, &token).encode())? {
            Some(stored) => codec::decode(txn, &Token::from_slice(&stored)?).map(Some),
            None => Ok(None),
        }
    }

    pub fn contains_key(&self, key: &Value) -> Result<bool, OocError> {
        self.store.read(|txn| self.contains_key_in(txn, key))
    }

    pub fn contains_key_in(&self, txn: &Txn, key: &Value) -> Result<bool, OocError> {
        let Some(token) = self.lookup_token(txn, key)? else {
            return Ok(false);
        };
        Ok(txn
            .get(Table::Dicts, &DictKey::new(self.id, &token).encode())?
            .is_some())
    }

    pub fn set(&self, key: &Value, value: &Value) -> Result<(), OocError> {
        self.store.write(|txn| self.set_in(txn, key, value))
    }

    pub fn set_in(&self, txn: &Txn, key: &Value, value: &Value) -> Result<(), OocError> {
        if !key.is_hashable() {
            return Err(OocError::UnhashableKey {
                kind: key.kind_name(),
            });
        }
        let count = self.length_in(txn)?;
        let key_token = codec::encode(txn, key, EncodeMode::ReadWrite)?;
        let value_token = codec::encode(txn, value, EncodeMode::ReadWrite)?;
        let entry_key = DictKey::new(self.id, &key_token).encode();
        let existed = txn.get(Table::Dicts, &entry_key)?.is_some();
        txn.put(Table::Dicts, &entry_key, value_token.as_bytes())?;
        if !existed {
            if count >= MAX_COUNT {
                return Err(OocError::OutOfMemory);
            }
            self.write_count(txn, count + 1)?;
            self.traced("set", count + 1);
        }
        Ok(())
    }

    /// Remove `key`; returns whether it was present. A missing key is not an
    /// error.
    pub fn delete(&self, key: &Value) -> Result<bool, OocError> {
        self.store.write(|txn| self.delete_in(txn, key))
    }

    pub fn delete_in(&self, txn: &Txn, key: &Value) -> Result<bool, OocError> {
        let Some(token) = self.lookup_token(txn, key)? else {
            return Ok(false);
        };
        if !txn.del(Table::Dicts, &DictKey::new(self.id, &token).encode())? {
            return Ok(false);
        }
        let count = self.length_in(txn)?;
        let remaining = count.checked_sub(1).ok_or_else(|| {
            OocError::violation(format!("dict {} held an entry with a zero count", self.id))
        })?;
        self.write_count(txn, remaining)?;
        self.traced("delete", remaining);
        Ok(true)
    }

    /// Key/value view; each call to `iter` reads in its own transaction.
    pub fn items(&self) -> DictItems {
        DictItems { dict: self.clone() }
    }

    pub fn keys(&self) -> DictKeysIter {
        DictKeysIter::new(self.store.clone(), self.id)
    }

    pub fn iter(&self) -> DictKeysIter {
        self.keys()
    }

    pub fn values(&self) -> DictValuesIter {
        DictValuesIter::new(self.store.clone(), self.id)
    }

    /// Every key, read inside the caller's transaction.
    pub fn keys_in(&self, txn: &Txn) -> Result<Vec<Value>, OocError> {
        let mut keys = Vec::new();
        self.walk(txn, |key, _| {
            keys.push(codec::decode(txn, &key)?);
            Ok(())
        })?;
        Ok(keys)
    }

    pub fn to_vec(&self) -> Result<Vec<(Value, Value)>, OocError> {
        self.store.read(|txn| self.to_vec_in(txn))
    }

    pub fn to_vec_in(&self, txn: &Txn) -> Result<Vec<(Value, Value)>, OocError> {
        let mut pairs = Vec::with_capacity(self.length_in(txn)? as usize);
        self.walk(txn, |key, value| {
            pairs.push((codec::decode(txn, &key)?, codec::decode(txn, &value)?));
            Ok(())
        })?;
        Ok(pairs)
    }

    fn walk<F>(&self, txn: &Txn, mut visit: F) -> Result<u32, OocError>
    where
        F: FnMut(Token, Token) -> Result<(), OocError>,
    {
        let mut seen = 0u32;
        let mut cursor = txn.cursor(Table::Dicts);
        let mut next = cursor.get(CursorOp::SetRange(&DictKey::first(self.id).encode()))?;
        while let Some(entry) = next {
            let key = DictKey::decode(&entry.key)?;
            if !key.is_element_of(self.id) {
                break;
            }
            visit(key.key_token(), Token::from_slice(&entry.value)?)?;
            seen += 1;
            next = cursor.get(CursorOp::Next)?;
        }
        cursor.close();
        Ok(seen)
    }

    pub fn check_integrity(&self) -> Result<(), OocError> {
        self.store.read(|txn| self.check_integrity_in(txn))
    }

    /// Verify the count record matches the entries and every token is valid.
    pub fn check_integrity_in(&self, txn: &Txn) -> Result<(), OocError> {
        let count = self.length_in(txn)?;
        let seen = self.walk(txn, |key, value| {
            key.kind()?;
            value.kind()?;
            if key.is_collection() {
                return Err(OocError::violation(format!(
                    "dict {} has a mutable key",
                    self.id
                )));
            }
            Ok(())
        })?;
        if seen != count {
            return Err(OocError::violation(format!(
                "dict {} records count {} but holds {} entries",
                self.id, count, seen
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for LazyDict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyDict").field("id", &self.id).finish()
    }
}

/// View over a dict's entries.
#[derive(Clone, Debug)]
pub struct DictItems {
    dict: LazyDict,
}

impl DictItems {
    pub fn len(&self) -> Result<usize, OocError> {
        self.dict.len()
    }

    pub fn is_empty(&self) -> Result<bool, OocError> {
        self.dict.is_empty()
    }

    pub fn iter(&self) -> DictItemsIter {
        DictItemsIter::new(self.dict.store.clone(), self.dict.id)
    }
}

impl IntoIterator for &DictItems {
    type Item = Result<(Value, Value), OocError>;
    type IntoIter = DictItemsIter;

    fn into_iter(self) -> DictItemsIter {
        self.iter()
    }
}
