//! Persistent list stored as one key per position.
//!
//! # Structure
//!
//! ```text
//! lists table, one list with id N:
//!   (N, 0)          -> token of element 0
//!   (N, 1)          -> token of element 1
//!   ...
//!   (N, len - 1)    -> token of the last element
//!   (N, u32::MAX)   -> length (u32, little-endian)
//! ```
//!
//! Positions are always exactly `[0, len)`. Deleting shifts every later
//! element down by one key; appending writes one key past the end.
//!
//! # Performance
//!
//! - len / get / set / append: O(1) key lookups
//! - delete: O(len - index)
//! - extend: O(added elements)
//! - repeat: O(final length)
//! - index / count: O(len), comparing raw tokens when the needle has one
//!
//! Every public method runs in its own transaction. The `*_in` forms take
//! the caller's transaction so several operations can commit together.

use std::cmp::Ordering;

use crate::codec::{self, EncodeMode};
use crate::compare::{self, CompareOp};
use crate::error::OocError;
use crate::key::{CollectionId, LENGTH_SENTINEL, ListKey, decode_length, encode_length};
use crate::store::{CursorOp, PutMode, Store, Table, Txn};
use crate::token::Token;
use crate::trace;
use crate::value::Value;

use super::iter::ListIter;

/// Longest list the key layout can hold; position `u32::MAX` is the sentinel.
pub const MAX_LENGTH: u32 = LENGTH_SENTINEL - 1;

/// Handle to a list in a store. Cheap to clone; clones name the same list.
#[derive(Clone)]
pub struct LazyList {
    store: Store,
    id: CollectionId,
}

/// Resolve a possibly negative index against `length`.
pub fn normalize_index(index: i64, length: usize) -> Result<usize, OocError> {
    let resolved = if index < 0 {
        index + length as i64
    } else {
        index
    };
    if resolved < 0 || resolved as usize >= length {
        return Err(OocError::IndexOutOfRange { index });
    }
    Ok(resolved as usize)
}

/// Position a `start` / `stop` pair the way slicing does: negative values
/// count from the end, then clamp to `[0, length]`.
fn resolve_bound(bound: i64, length: u32) -> u32 {
    let resolved = if bound < 0 {
        bound + length as i64
    } else {
        bound
    };
    resolved.clamp(0, length as i64) as u32
}

enum Needle<'v> {
    Token(Token),
    Value(&'v Value),
}

impl LazyList {
    /// Handle to the list with this id. Does not check that it exists.
    pub fn from_id(store: Store, id: CollectionId) -> LazyList {
        LazyList { store, id }
    }

    /// Allocate a new empty list.
    pub fn create(store: &Store) -> Result<LazyList, OocError> {
        store.write(LazyList::create_in)
    }

    pub fn create_in(txn: &Txn) -> Result<LazyList, OocError> {
        let id = txn.next_collection_id()?;
        txn.put(Table::Lists, &ListKey::length(id).encode(), &encode_length(0))?;
        trace::record(trace::EventKind::ListOp {
            op: "create",
            id,
            length: 0,
        });
        Ok(LazyList::from_id(txn.store().clone(), id))
    }

    pub fn id(&self) -> CollectionId {
        self.id
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// True if both handles name the same list of the same store.
    pub fn same_collection(&self, other: &LazyList) -> bool {
        self.id == other.id && self.store.same_store(&other.store)
    }

    fn key(&self, position: u32) -> [u8; 8] {
        ListKey::new(self.id, position).encode()
    }

    fn write_length(&self, txn: &Txn, length: u32) -> Result<(), OocError> {
        txn.put(
            Table::Lists,
            &ListKey::length(self.id).encode(),
            &encode_length(length),
        )
    }

    fn traced(&self, op: &'static str, length: u32) {
        trace::record(trace::EventKind::ListOp {
            op,
            id: self.id,
            length,
        });
    }

    pub fn len(&self) -> Result<usize, OocError> {
        self.store.read(|txn| self.length_in(txn)).map(|n| n as usize)
    }

    pub fn is_empty(&self) -> Result<bool, OocError> {
        self.len().map(|n| n == 0)
    }

    pub fn length_in(&self, txn: &Txn) -> Result<u32, OocError> {
        let record = txn
            .get(Table::Lists, &ListKey::length(self.id).encode())?
            .ok_or_else(|| {
                OocError::violation(format!("list {} has no length record", self.id))
            })?;
        decode_length(&record)
    }

    pub fn get(&self, index: usize) -> Result<Value, OocError> {
        self.store.read(|txn| self.get_in(txn, index))
    }

    pub fn get_in(&self, txn: &Txn, index: usize) -> Result<Value, OocError> {
        let out_of_range = || OocError::IndexOutOfRange {
            index: index as i64,
        };
        let position = u32::try_from(index)
            .ok()
            .filter(|p| *p != LENGTH_SENTINEL)
            .ok_or_else(out_of_range)?;
        let stored = txn
            .get(Table::Lists, &self.key(position))?
            .ok_or_else(out_of_range)?;
        codec::decode(txn, &Token::from_slice(&stored)?)
    }

    pub fn set(&self, index: usize, value: &Value) -> Result<(), OocError> {
        self.store.write(|txn| self.set_in(txn, index, value))
    }

    pub fn set_in(&self, txn: &Txn, index: usize, value: &Value) -> Result<(), OocError> {
        let length = self.length_in(txn)?;
        if index >= length as usize {
            return Err(OocError::IndexOutOfRange {
                index: index as i64,
            });
        }
        let token = codec::encode(txn, value, EncodeMode::ReadWrite)?;
        txn.put(Table::Lists, &self.key(index as u32), token.as_bytes())
    }

    pub fn delete(&self, index: usize) -> Result<(), OocError> {
        self.store.write(|txn| self.delete_in(txn, index))
    }

    /// Remove the element at `index`, shifting every later element down.
    pub fn delete_in(&self, txn: &Txn, index: usize) -> Result<(), OocError> {
        let out_of_range = || OocError::IndexOutOfRange {
            index: index as i64,
        };
        let position = u32::try_from(index)
            .ok()
            .filter(|p| *p != LENGTH_SENTINEL)
            .ok_or_else(out_of_range)?;

        let mut destination = txn.cursor(Table::Lists);
        if destination
            .get(CursorOp::SetKey(&self.key(position)))?
            .is_none()
        {
            return Err(out_of_range());
        }
        let mut source = txn.cursor(Table::Lists);
        let mut next = source.get(CursorOp::SetRange(&self.key(position + 1)))?;
        let mut at = position;

        while let Some(entry) = next {
            if !ListKey::decode(&entry.key)?.is_element_of(self.id) {
                break;
            }
            Token::from_slice(&entry.value)?;
            destination.put(&self.key(at), &entry.value, PutMode::Current)?;
            let moved = destination.get(CursorOp::Next)?.ok_or_else(|| {
                OocError::violation(format!("list {} ended while shifting", self.id))
            })?;
            let moved_to = ListKey::decode(&moved.key)?;
            if moved_to.id != self.id || moved_to.position != at + 1 {
                return Err(OocError::violation(format!(
                    "list {} has a gap after position {}",
                    self.id, at
                )));
            }
            at += 1;
            next = source.get(CursorOp::Next)?;
        }
        source.close();

        // The destination sits on the last element, now a duplicate; its
        // position is the new length.
        self.write_length(txn, at)?;
        destination.del()?;
        destination.close();
        self.traced("delete", at);
        Ok(())
    }

    pub fn append(&self, value: &Value) -> Result<(), OocError> {
        self.store.write(|txn| self.append_in(txn, value))
    }

    pub fn append_in(&self, txn: &Txn, value: &Value) -> Result<(), OocError> {
        let token = codec::encode(txn, value, EncodeMode::ReadWrite)?;
        let length = self.length_in(txn)?;
        if length >= MAX_LENGTH {
            return Err(OocError::OutOfMemory);
        }
        txn.put(Table::Lists, &self.key(length), token.as_bytes())?;
        self.write_length(txn, length + 1)?;
        self.traced("append", length + 1);
        Ok(())
    }

    /// Append every element of `source`: a host list, tuple, lazy list, or
    /// the keys of a host or lazy dict.
    pub fn extend(&self, source: &Value) -> Result<(), OocError> {
        self.store.write(|txn| self.extend_in(txn, source))
    }

    pub fn extend_in(&self, txn: &Txn, source: &Value) -> Result<(), OocError> {
        match source {
            Value::LazyList(other) if other.store.same_store(&self.store) => {
                if other.id == self.id {
                    self.repeat_in(txn, 2)
                } else {
                    self.extend_from_list_in(txn, other)
                }
            }
            Value::LazyList(other) => {
                let items = other.to_vec()?;
                self.extend_values_in(txn, items.iter())
            }
            Value::List(list) => {
                let items = list.borrow().clone();
                self.extend_values_in(txn, items.iter())
            }
            Value::Tuple(items) => self.extend_values_in(txn, items.iter()),
            Value::Dict(dict) => {
                let keys: Vec<Value> = dict.borrow().iter().map(|(k, _)| k.clone()).collect();
                self.extend_values_in(txn, keys.iter())
            }
            Value::LazyDict(dict) if dict.store().same_store(&self.store) => {
                let keys = dict.keys_in(txn)?;
                self.extend_values_in(txn, keys.iter())
            }
            Value::LazyDict(dict) => {
                let keys = dict.keys().collect::<Result<Vec<_>, _>>()?;
                self.extend_values_in(txn, keys.iter())
            }
            other => Err(OocError::NotIterable {
                kind: other.kind_name(),
            }),
        }
    }

    /// Append values produced by a Rust iterator.
    pub fn extend_from<I>(&self, items: I) -> Result<(), OocError>
    where
        I: IntoIterator<Item = Value>,
    {
        let items: Vec<Value> = items.into_iter().collect();
        self.store
            .write(|txn| self.extend_values_in(txn, items.iter()))
    }

    /// Encode and append each value, writing the length once at the end.
    pub fn extend_values_in<'v, I>(&self, txn: &Txn, items: I) -> Result<(), OocError>
    where
        I: IntoIterator<Item = &'v Value>,
    {
        let mut length = self.length_in(txn)?;
        for item in items {
            let token = codec::encode(txn, item, EncodeMode::ReadWrite)?;
            if length >= MAX_LENGTH {
                return Err(OocError::OutOfMemory);
            }
            txn.put(Table::Lists, &self.key(length), token.as_bytes())?;
            length += 1;
        }
        self.write_length(txn, length)?;
        self.traced("extend", length);
        Ok(())
    }

    /// Copy another list of the same store token by token.
    fn extend_from_list_in(&self, txn: &Txn, other: &LazyList) -> Result<(), OocError> {
        let mut length = self.length_in(txn)?;
        let mut cursor = txn.cursor(Table::Lists);
        let mut next = cursor.get(CursorOp::SetRange(&other.key(0)))?;
        while let Some(entry) = next {
            if !ListKey::decode(&entry.key)?.is_element_of(other.id) {
                break;
            }
            Token::from_slice(&entry.value)?;
            if length >= MAX_LENGTH {
                return Err(OocError::OutOfMemory);
            }
            txn.put(Table::Lists, &self.key(length), &entry.value)?;
            length += 1;
            next = cursor.get(CursorOp::Next)?;
        }
        cursor.close();
        self.write_length(txn, length)?;
        self.traced("extend", length);
        Ok(())
    }

    pub fn repeat(&self, count: i64) -> Result<(), OocError> {
        self.store.write(|txn| self.repeat_in(txn, count))
    }

    /// Repeat the contents in place `count` times; `count <= 0` clears.
    pub fn repeat_in(&self, txn: &Txn, count: i64) -> Result<(), OocError> {
        if count <= 0 {
            return self.clear_in(txn);
        }
        let length = self.length_in(txn)?;
        if length == 0 {
            return Ok(());
        }
        let target = (length as u64)
            .checked_mul(count as u64)
            .filter(|target| *target <= MAX_LENGTH as u64)
            .ok_or(OocError::OutOfMemory)? as u32;

        // One cursor reads from the front while writes land past the end. It
        // walks onto the copies once it passes the original elements.
        let mut source = txn.cursor(Table::Lists);
        let mut next = source.get(CursorOp::SetRange(&self.key(0)))?;
        let mut at = length;
        while at < target {
            let entry = next.ok_or_else(|| {
                OocError::violation(format!("list {} ended while repeating", self.id))
            })?;
            if !ListKey::decode(&entry.key)?.is_element_of(self.id) {
                return Err(OocError::violation(format!(
                    "list {} ended while repeating",
                    self.id
                )));
            }
            Token::from_slice(&entry.value)?;
            txn.put(Table::Lists, &self.key(at), &entry.value)?;
            at += 1;
            next = source.get(CursorOp::Next)?;
        }
        source.close();
        self.write_length(txn, target)?;
        self.traced("repeat", target);
        Ok(())
    }

    pub fn clear(&self) -> Result<(), OocError> {
        self.store.write(|txn| self.clear_in(txn))
    }

    pub fn clear_in(&self, txn: &Txn) -> Result<(), OocError> {
        self.length_in(txn)?;
        let mut cursor = txn.cursor(Table::Lists);
        let mut next = cursor.get(CursorOp::SetRange(&self.key(0)))?;
        while let Some(entry) = next {
            if !ListKey::decode(&entry.key)?.is_element_of(self.id) {
                break;
            }
            cursor.del()?;
            next = cursor.get(CursorOp::Next)?;
        }
        cursor.close();
        self.write_length(txn, 0)?;
        self.traced("clear", 0);
        Ok(())
    }

    /// Position of the first element equal to `value` within `[start, stop)`.
    pub fn index(
        &self,
        value: &Value,
        start: i64,
        stop: Option<i64>,
    ) -> Result<Option<usize>, OocError> {
        self.store.read(|txn| self.index_in(txn, value, start, stop))
    }

    pub fn index_in(
        &self,
        txn: &Txn,
        value: &Value,
        start: i64,
        stop: Option<i64>,
    ) -> Result<Option<usize>, OocError> {
        let length = self.length_in(txn)?;
        let start = resolve_bound(start, length);
        let stop = stop.map_or(length, |stop| resolve_bound(stop, length));
        let Some(needle) = self.needle(txn, value)? else {
            return Ok(None);
        };
        let mut found = None;
        self.scan(txn, start, stop, |position, token| {
            if self.matches(txn, &needle, token)? {
                found = Some(position as usize);
                return Ok(false);
            }
            Ok(true)
        })?;
        Ok(found)
    }

    pub fn count(&self, value: &Value) -> Result<usize, OocError> {
        self.store.read(|txn| self.count_in(txn, value))
    }

    pub fn count_in(&self, txn: &Txn, value: &Value) -> Result<usize, OocError> {
        let length = self.length_in(txn)?;
        let Some(needle) = self.needle(txn, value)? else {
            return Ok(0);
        };
        let mut count = 0;
        self.scan(txn, 0, length, |_, token| {
            if self.matches(txn, &needle, token)? {
                count += 1;
            }
            Ok(true)
        })?;
        Ok(count)
    }

    pub fn contains(&self, value: &Value) -> Result<bool, OocError> {
        self.index(value, 0, None).map(|found| found.is_some())
    }

    /// What to search for. `None` when the value was never stored, so no
    /// element can be equal to it.
    fn needle<'v>(&self, txn: &Txn, value: &'v Value) -> Result<Option<Needle<'v>>, OocError> {
        match codec::encode(txn, value, EncodeMode::ReadOnly) {
            Ok(token) => Ok(Some(Needle::Token(token))),
            Err(OocError::WriteNotPermitted) => Ok(Some(Needle::Value(value))),
            Err(OocError::ValueNotRegistered) => Ok(None),
            Err(error) => Err(error),
        }
    }

    fn matches(&self, txn: &Txn, needle: &Needle<'_>, token: &Token) -> Result<bool, OocError> {
        match needle {
            Needle::Token(expected) => Ok(expected == token),
            Needle::Value(value) => {
                compare::values_equal_in(txn, value, &codec::decode(txn, token)?)
            }
        }
    }

    /// Visit the tokens at positions `[start, stop)` until `visit` returns false.
    fn scan<F>(&self, txn: &Txn, start: u32, stop: u32, mut visit: F) -> Result<(), OocError>
    where
        F: FnMut(u32, &Token) -> Result<bool, OocError>,
    {
        if start >= stop {
            return Ok(());
        }
        let mut cursor = txn.cursor(Table::Lists);
        let mut next = cursor.get(CursorOp::SetRange(&self.key(start)))?;
        while let Some(entry) = next {
            let key = ListKey::decode(&entry.key)?;
            if !key.is_element_of(self.id) || key.position >= stop {
                break;
            }
            if !visit(key.position, &Token::from_slice(&entry.value)?)? {
                break;
            }
            next = cursor.get(CursorOp::Next)?;
        }
        cursor.close();
        Ok(())
    }

    pub fn iter(&self) -> ListIter {
        ListIter::new(self.store.clone(), self.id)
    }

    /// Every element, read in one transaction.
    pub fn to_vec(&self) -> Result<Vec<Value>, OocError> {
        self.store.read(|txn| self.to_vec_in(txn))
    }

    pub fn to_vec_in(&self, txn: &Txn) -> Result<Vec<Value>, OocError> {
        let length = self.length_in(txn)?;
        let mut values = Vec::with_capacity(length as usize);
        self.walk_dense(txn, length, |token| {
            values.push(codec::decode(txn, token)?);
            Ok(())
        })?;
        Ok(values)
    }

    /// Visit every element in order, failing unless positions are exactly
    /// `[0, length)`.
    fn walk_dense<F>(&self, txn: &Txn, length: u32, mut visit: F) -> Result<(), OocError>
    where
        F: FnMut(&Token) -> Result<(), OocError>,
    {
        let mut expected = 0u32;
        let mut cursor = txn.cursor(Table::Lists);
        let mut next = cursor.get(CursorOp::SetRange(&self.key(0)))?;
        while let Some(entry) = next {
            let key = ListKey::decode(&entry.key)?;
            if !key.is_element_of(self.id) {
                break;
            }
            if key.position != expected || expected >= length {
                return Err(OocError::violation(format!(
                    "list {} has position {} where {} was expected (length {})",
                    self.id, key.position, expected, length
                )));
            }
            visit(&Token::from_slice(&entry.value)?)?;
            expected += 1;
            next = cursor.get(CursorOp::Next)?;
        }
        cursor.close();
        if expected != length {
            return Err(OocError::violation(format!(
                "list {} records length {} but holds {} elements",
                self.id, length, expected
            )));
        }
        Ok(())
    }

    /// Contents followed by the elements of `other`, as a new host vector.
    pub fn concat(&self, other: &Value) -> Result<Vec<Value>, OocError> {
        let mut values = self.to_vec()?;
        match other {
            Value::List(list) => values.extend(list.borrow().iter().cloned()),
            Value::LazyList(list) => values.extend(list.to_vec()?),
            other => {
                return Err(OocError::UnsupportedOperation {
                    operation: "+",
                    left: "LazyList",
                    right: other.kind_name(),
                });
            }
        }
        Ok(values)
    }

    /// Contents repeated `count` times, as a new host vector.
    pub fn repeated(&self, count: i64) -> Result<Vec<Value>, OocError> {
        if count <= 0 {
            return Ok(Vec::new());
        }
        let values = self.to_vec()?;
        let total = usize::try_from(count)
            .ok()
            .and_then(|count| values.len().checked_mul(count))
            .ok_or(OocError::OutOfMemory)?;
        let mut repeated = Vec::new();
        repeated
            .try_reserve_exact(total)
            .map_err(|_| OocError::OutOfMemory)?;
        for _ in 0..count {
            repeated.extend(values.iter().cloned());
        }
        Ok(repeated)
    }

    pub fn check_integrity(&self) -> Result<(), OocError> {
        self.store.read(|txn| self.check_integrity_in(txn))
    }

    /// Verify the length record matches dense positions of valid tokens.
    pub fn check_integrity_in(&self, txn: &Txn) -> Result<(), OocError> {
        let length = self.length_in(txn)?;
        self.walk_dense(txn, length, |token| token.kind().map(|_| ()))
    }

    pub fn eq_value(&self, other: &Value) -> Result<bool, OocError> {
        compare::values_equal(&Value::LazyList(self.clone()), other)
    }

    pub fn cmp_value(&self, other: &Value) -> Result<Ordering, OocError> {
        compare::compare_values(&Value::LazyList(self.clone()), other, "<")
    }

    pub fn rich_compare(&self, other: &Value, op: CompareOp) -> Result<bool, OocError> {
        compare::rich_compare(&Value::LazyList(self.clone()), other, op)
    }
}

impl std::fmt::Debug for LazyList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyList").field("id", &self.id).finish()
    }
}

impl<'a> IntoIterator for &'a LazyList {
    type Item = Result<Value, OocError>;
    type IntoIter = ListIter;

    fn into_iter(self) -> ListIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreOptions;

    fn ints(values: &[i64]) -> Vec<Value> {
        values.iter().map(|n| Value::Int(*n)).collect()
    }

    fn list_of(store: &Store, values: &[i64]) -> LazyList {
        let list = LazyList::create(store).unwrap();
        list.extend_from(ints(values)).unwrap();
        list
    }

    #[test]
    fn test_normalize_index() {
        assert_eq!(normalize_index(-1, 3).unwrap(), 2);
        assert_eq!(normalize_index(0, 3).unwrap(), 0);
        assert!(matches!(
            normalize_index(3, 3),
            Err(OocError::IndexOutOfRange { index: 3 })
        ));
        assert!(matches!(
            normalize_index(-4, 3),
            Err(OocError::IndexOutOfRange { index: -4 })
        ));
    }

    #[test]
    fn test_append_get_set() {
        let store = Store::in_memory();
        let list = LazyList::create(&store).unwrap();
        list.append(&Value::Int(1)).unwrap();
        list.append(&Value::str("two")).unwrap();
        assert_eq!(list.len().unwrap(), 2);
        assert_eq!(list.get(1).unwrap(), Value::str("two"));
        list.set(0, &Value::Float(0.5)).unwrap();
        assert_eq!(list.get(0).unwrap(), Value::Float(0.5));
        assert!(matches!(
            list.get(2),
            Err(OocError::IndexOutOfRange { index: 2 })
        ));
        assert!(matches!(
            list.set(2, &Value::Null),
            Err(OocError::IndexOutOfRange { index: 2 })
        ));
    }

    #[test]
    fn test_delete_shifts_down() {
        let store = Store::in_memory();
        let list = list_of(&store, &[0, 1, 2, 3, 4]);
        list.delete(1).unwrap();
        assert_eq!(list.to_vec().unwrap(), ints(&[0, 2, 3, 4]));
        list.delete(3).unwrap();
        assert_eq!(list.to_vec().unwrap(), ints(&[0, 2, 3]));
        list.delete(0).unwrap();
        assert_eq!(list.to_vec().unwrap(), ints(&[2, 3]));
        assert!(matches!(
            list.delete(2),
            Err(OocError::IndexOutOfRange { index: 2 })
        ));
        list.check_integrity().unwrap();
    }

    #[test]
    fn test_delete_leaves_neighbouring_lists_alone() {
        let store = Store::in_memory();
        let first = list_of(&store, &[1, 2, 3]);
        let second = list_of(&store, &[7, 8]);
        first.delete(0).unwrap();
        assert_eq!(first.to_vec().unwrap(), ints(&[2, 3]));
        assert_eq!(second.to_vec().unwrap(), ints(&[7, 8]));
    }

    #[test]
    fn test_extend_from_other_list_copies_tokens() {
        let store = Store::in_memory();
        let target = list_of(&store, &[1]);
        let source = list_of(&store, &[2, 3]);
        target.extend(&Value::LazyList(source.clone())).unwrap();
        assert_eq!(target.to_vec().unwrap(), ints(&[1, 2, 3]));
        assert_eq!(source.to_vec().unwrap(), ints(&[2, 3]));
    }

    #[test]
    fn test_self_extend_doubles() {
        let store = Store::in_memory();
        let list = list_of(&store, &[1, 2]);
        list.extend(&Value::LazyList(list.clone())).unwrap();
        assert_eq!(list.to_vec().unwrap(), ints(&[1, 2, 1, 2]));
    }

    #[test]
    fn test_extend_with_non_sequence_fails() {
        let store = Store::in_memory();
        let list = list_of(&store, &[1]);
        assert!(matches!(
            list.extend(&Value::Int(5)),
            Err(OocError::NotIterable { kind: "int" })
        ));
        assert_eq!(list.to_vec().unwrap(), ints(&[1]));
    }

    #[test]
    fn test_extend_from_another_store_materialises() {
        let here = Store::in_memory();
        let there = Store::in_memory();
        let target = list_of(&here, &[1]);
        let source = list_of(&there, &[2, 3]);
        target.extend(&Value::LazyList(source)).unwrap();
        assert_eq!(target.to_vec().unwrap(), ints(&[1, 2, 3]));
    }

    #[test]
    fn test_repeat() {
        let store = Store::in_memory();
        let list = list_of(&store, &[1, 2, 3]);
        list.repeat(3).unwrap();
        assert_eq!(list.to_vec().unwrap(), ints(&[1, 2, 3, 1, 2, 3, 1, 2, 3]));
        list.check_integrity().unwrap();

        let single = list_of(&store, &[5]);
        single.repeat(4).unwrap();
        assert_eq!(single.to_vec().unwrap(), ints(&[5, 5, 5, 5]));

        single.repeat(0).unwrap();
        assert!(single.is_empty().unwrap());

        let empty = list_of(&store, &[]);
        empty.repeat(10).unwrap();
        assert!(empty.is_empty().unwrap());
    }

    #[test]
    fn test_repeat_past_capacity_fails_cleanly() {
        let store = Store::in_memory();
        let list = list_of(&store, &[1, 2]);
        assert!(matches!(
            list.repeat(i64::from(u32::MAX)),
            Err(OocError::OutOfMemory)
        ));
        assert_eq!(list.to_vec().unwrap(), ints(&[1, 2]));
    }

    #[test]
    fn test_clear() {
        let store = Store::in_memory();
        let list = list_of(&store, &[1, 2, 3]);
        let other = list_of(&store, &[4]);
        list.clear().unwrap();
        assert_eq!(list.len().unwrap(), 0);
        assert_eq!(other.to_vec().unwrap(), ints(&[4]));
        list.append(&Value::Int(9)).unwrap();
        assert_eq!(list.to_vec().unwrap(), ints(&[9]));
    }

    #[test]
    fn test_index_and_count_fast_path() {
        let store = Store::in_memory();
        let list = list_of(&store, &[5, 6, 5, 7, 5]);
        assert_eq!(list.index(&Value::Int(5), 0, None).unwrap(), Some(0));
        assert_eq!(list.index(&Value::Int(5), 1, None).unwrap(), Some(2));
        assert_eq!(list.index(&Value::Int(5), -2, None).unwrap(), Some(4));
        assert_eq!(list.index(&Value::Int(5), 1, Some(2)).unwrap(), None);
        assert_eq!(list.index(&Value::Int(7), 0, Some(-1)).unwrap(), Some(3));
        assert_eq!(list.index(&Value::Int(8), 0, None).unwrap(), None);
        assert_eq!(list.count(&Value::Int(5)).unwrap(), 3);
        assert!(list.contains(&Value::Int(6)).unwrap());
        assert!(!list.contains(&Value::Float(5.0)).unwrap());
    }

    #[test]
    fn test_search_for_unstored_string_short_circuits() {
        let store = Store::in_memory();
        let list = LazyList::create(&store).unwrap();
        list.append(&Value::str("a string that is longer than fifteen bytes"))
            .unwrap();
        let missing = Value::str("another string that was never stored");
        assert_eq!(list.index(&missing, 0, None).unwrap(), None);
        assert_eq!(list.count(&missing).unwrap(), 0);
        let present = Value::str("a string that is longer than fifteen bytes");
        assert_eq!(list.index(&present, 0, None).unwrap(), Some(0));
    }

    #[test]
    fn test_search_for_host_list_decodes() {
        let store = Store::in_memory();
        let list = LazyList::create(&store).unwrap();
        list.append(&Value::list(ints(&[1, 2]))).unwrap();
        list.append(&Value::list(ints(&[3]))).unwrap();
        list.append(&Value::list(ints(&[3]))).unwrap();
        assert_eq!(
            list.index(&Value::list(ints(&[3])), 0, None).unwrap(),
            Some(2)
        );
        assert_eq!(list.count(&Value::list(ints(&[3]))).unwrap(), 1);
        assert_eq!(list.count(&Value::list(ints(&[4]))).unwrap(), 0);
    }

    #[test]
    fn test_nested_values_round_trip() {
        let store = Store::in_memory();
        let list = LazyList::create(&store).unwrap();
        let nested = Value::list(vec![
            Value::Int(1),
            Value::dict(vec![(Value::str("k"), Value::list(ints(&[2])))]),
        ]);
        list.append(&nested).unwrap();
        let stored = list.get(0).unwrap();
        assert!(stored.as_lazy_list().is_some());
        assert!(compare::values_equal(&stored, &nested).unwrap());
    }

    #[test]
    fn test_concat_and_repeated_leave_storage_alone() {
        let store = Store::in_memory();
        let list = list_of(&store, &[1, 2]);
        assert_eq!(
            list.concat(&Value::list(ints(&[3]))).unwrap(),
            ints(&[1, 2, 3])
        );
        assert_eq!(list.repeated(2).unwrap(), ints(&[1, 2, 1, 2]));
        assert!(list.repeated(-1).unwrap().is_empty());
        assert!(list.concat(&Value::Int(3)).is_err());
        assert_eq!(list.to_vec().unwrap(), ints(&[1, 2]));
    }

    #[test]
    fn test_comparisons() {
        let store = Store::in_memory();
        let list = list_of(&store, &[1, 2, 3]);
        assert!(list.eq_value(&Value::list(ints(&[1, 2, 3]))).unwrap());
        assert!(list
            .rich_compare(&Value::list(ints(&[1, 2, 4])), CompareOp::Lt)
            .unwrap());
        assert!(list
            .rich_compare(&Value::list(ints(&[1, 2])), CompareOp::Gt)
            .unwrap());
        assert_eq!(
            list.cmp_value(&Value::LazyList(list.clone())).unwrap(),
            Ordering::Equal
        );
        assert!(!list.eq_value(&Value::Int(1)).unwrap());
        assert!(matches!(
            list.rich_compare(&Value::Int(1), CompareOp::Le),
            Err(OocError::UnsupportedOperation { .. })
        ));
    }

    #[test]
    fn test_integrity_detects_gap() {
        let store = Store::in_memory();
        let list = list_of(&store, &[1, 2, 3]);
        store
            .write(|txn| txn.del(Table::Lists, &list.key(1)).map(|_| ()))
            .unwrap();
        assert!(matches!(
            list.check_integrity(),
            Err(OocError::StorageConsistencyViolation { .. })
        ));
        assert!(list.to_vec().is_err());
    }

    #[test]
    fn test_missing_length_record_is_a_violation() {
        let store = Store::in_memory();
        let list = LazyList::from_id(store, 42);
        assert!(matches!(
            list.len(),
            Err(OocError::StorageConsistencyViolation { .. })
        ));
    }

    #[test]
    fn test_repeated_past_memory_is_an_error() {
        let store = Store::in_memory();
        let list = list_of(&store, &[1, 2]);
        assert!(matches!(
            list.repeated(1 << 60),
            Err(OocError::OutOfMemory)
        ));
        assert!(matches!(
            list.repeated(i64::MAX),
            Err(OocError::OutOfMemory)
        ));
    }

    #[test]
    fn test_search_for_cyclic_value() {
        let store = Store::in_memory_with(StoreOptions {
            max_readers: 2,
            ..StoreOptions::default()
        });
        let list = LazyList::create(&store).unwrap();
        let cyclic = Value::list(vec![Value::Int(1)]);
        if let Value::List(cell) = &cyclic {
            cell.borrow_mut().push(cyclic.clone());
        }
        list.append(&cyclic).unwrap();
        list.append(&cyclic).unwrap();

        assert_eq!(list.count(&cyclic).unwrap(), 2);
        assert_eq!(list.index(&cyclic, 1, None).unwrap(), Some(1));
        let stored = list.get(0).unwrap();
        let stored = stored.as_lazy_list().unwrap();
        assert!(stored.rich_compare(&cyclic, CompareOp::Eq).unwrap());
        assert!(!stored.eq_value(&Value::list(ints(&[1]))).unwrap());
        assert_eq!(store.active_readers(), 0);
    }

    #[test]
    fn test_search_sees_uncommitted_nested_changes() {
        let store = Store::in_memory();
        let outer = LazyList::create(&store).unwrap();
        outer.append(&Value::list(ints(&[1]))).unwrap();
        let inner = outer.get(0).unwrap();
        let inner = inner.as_lazy_list().unwrap().clone();

        let txn = store.begin(true).unwrap();
        inner.append_in(&txn, &Value::Int(2)).unwrap();
        let needle = Value::list(ints(&[1, 2]));
        assert_eq!(outer.count_in(&txn, &needle).unwrap(), 1);
        assert_eq!(outer.index_in(&txn, &needle, 0, None).unwrap(), Some(0));
        let stored = Value::LazyList(inner.clone());
        assert!(compare::values_equal_in(&txn, &stored, &needle).unwrap());
        txn.abort();

        assert_eq!(outer.count(&needle).unwrap(), 0);
        assert_eq!(outer.count(&Value::list(ints(&[1]))).unwrap(), 1);
    }
}
