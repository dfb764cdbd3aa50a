//! Cursor-backed iteration over one collection's key range.
//!
//! ```text
//! Unstarted --first pull--> Active --range ends--> Exhausted
//!     |                       |
//!     +------any error--------+-------> Exhausted (error surfaced once)
//! ```
//!
//! An iterator owns its read transaction from the first pull until it is
//! exhausted or dropped, so every element comes from one snapshot. The
//! cursor position is kept detached between pulls and re-attached to the
//! owned transaction on each `next`.

use std::marker::PhantomData;

use crate::codec;
use crate::error::OocError;
use crate::key::{CollectionId, DictKey, ListKey};
use crate::store::{CursorOp, Entry, RawCursor, Store, Table, Txn};
use crate::token::Token;
use crate::value::Value;

/// How one kind of collection lays out its range and turns entries into items.
pub trait EntryDecoder {
    type Item;
    const TABLE: Table;

    fn first_key(id: CollectionId) -> Vec<u8>;

    /// True while `key` is still an element of collection `id`.
    fn in_range(key: &[u8], id: CollectionId) -> Result<bool, OocError>;

    fn decode(txn: &Txn, entry: &Entry) -> Result<Self::Item, OocError>;
}

pub struct ListValueDecoder;

impl EntryDecoder for ListValueDecoder {
    type Item = Value;
    const TABLE: Table = Table::Lists;

    fn first_key(id: CollectionId) -> Vec<u8> {
        ListKey::new(id, 0).encode().to_vec()
    }

    fn in_range(key: &[u8], id: CollectionId) -> Result<bool, OocError> {
        Ok(ListKey::decode(key)?.is_element_of(id))
    }

    fn decode(txn: &Txn, entry: &Entry) -> Result<Value, OocError> {
        codec::decode(txn, &Token::from_slice(&entry.value)?)
    }
}

pub struct DictItemDecoder;

impl EntryDecoder for DictItemDecoder {
    type Item = (Value, Value);
    const TABLE: Table = Table::Dicts;

    fn first_key(id: CollectionId) -> Vec<u8> {
        DictKey::first(id).encode().to_vec()
    }

    fn in_range(key: &[u8], id: CollectionId) -> Result<bool, OocError> {
        Ok(DictKey::decode(key)?.is_element_of(id))
    }

    fn decode(txn: &Txn, entry: &Entry) -> Result<(Value, Value), OocError> {
        let key = DictKey::decode(&entry.key)?;
        Ok((
            codec::decode(txn, &key.key_token())?,
            codec::decode(txn, &Token::from_slice(&entry.value)?)?,
        ))
    }
}

pub struct DictKeyDecoder;

impl EntryDecoder for DictKeyDecoder {
    type Item = Value;
    const TABLE: Table = Table::Dicts;

    fn first_key(id: CollectionId) -> Vec<u8> {
        DictItemDecoder::first_key(id)
    }

    fn in_range(key: &[u8], id: CollectionId) -> Result<bool, OocError> {
        DictItemDecoder::in_range(key, id)
    }

    fn decode(txn: &Txn, entry: &Entry) -> Result<Value, OocError> {
        codec::decode(txn, &DictKey::decode(&entry.key)?.key_token())
    }
}

pub struct DictValueDecoder;

impl EntryDecoder for DictValueDecoder {
    type Item = Value;
    const TABLE: Table = Table::Dicts;

    fn first_key(id: CollectionId) -> Vec<u8> {
        DictItemDecoder::first_key(id)
    }

    fn in_range(key: &[u8], id: CollectionId) -> Result<bool, OocError> {
        DictItemDecoder::in_range(key, id)
    }

    fn decode(txn: &Txn, entry: &Entry) -> Result<Value, OocError> {
        codec::decode(txn, &Token::from_slice(&entry.value)?)
    }
}

enum IterState {
    Unstarted,
    Active { txn: Txn, cursor: RawCursor },
    Exhausted,
}

pub struct CollectionIter<D: EntryDecoder> {
    /// Released as soon as the iterator is exhausted.
    owner: Option<Store>,
    id: CollectionId,
    state: IterState,
    decoder: PhantomData<D>,
}

pub type ListIter = CollectionIter<ListValueDecoder>;
pub type DictItemsIter = CollectionIter<DictItemDecoder>;
pub type DictKeysIter = CollectionIter<DictKeyDecoder>;
pub type DictValuesIter = CollectionIter<DictValueDecoder>;

impl<D: EntryDecoder> CollectionIter<D> {
    pub(crate) fn new(store: Store, id: CollectionId) -> Self {
        CollectionIter {
            owner: Some(store),
            id,
            state: IterState::Unstarted,
            decoder: PhantomData,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self.state, IterState::Exhausted)
    }

    fn pull(
        &mut self,
        txn: Txn,
        raw: RawCursor,
        seek: Option<Vec<u8>>,
    ) -> Option<Result<D::Item, OocError>> {
        let (step, raw) = {
            let mut cursor = raw.attach(&txn);
            let found = match &seek {
                Some(key) => cursor.get(CursorOp::SetRange(key)),
                None => cursor.get(CursorOp::Next),
            };
            let step = match found {
                Ok(Some(entry)) => match D::in_range(&entry.key, self.id) {
                    Ok(true) => D::decode(&txn, &entry).map(Some),
                    Ok(false) => Ok(None),
                    Err(error) => Err(error),
                },
                Ok(None) => Ok(None),
                Err(error) => Err(error),
            };
            (step, cursor.into_raw())
        };

        match step {
            Ok(Some(item)) => {
                self.state = IterState::Active { txn, cursor: raw };
                Some(Ok(item))
            }
            Ok(None) => {
                self.owner = None;
                match txn.commit() {
                    Ok(()) => None,
                    Err(error) => Some(Err(error)),
                }
            }
            Err(error) => {
                self.owner = None;
                txn.abort();
                Some(Err(error))
            }
        }
    }
}

impl<D: EntryDecoder> Iterator for CollectionIter<D> {
    type Item = Result<D::Item, OocError>;

    fn next(&mut self) -> Option<Self::Item> {
        match std::mem::replace(&mut self.state, IterState::Exhausted) {
            IterState::Exhausted => None,
            IterState::Unstarted => {
                let store = self.owner.clone()?;
                let txn = match store.begin(false) {
                    Ok(txn) => txn,
                    Err(error) => {
                        self.owner = None;
                        return Some(Err(error));
                    }
                };
                let first = D::first_key(self.id);
                self.pull(txn, RawCursor::new(D::TABLE), Some(first))
            }
            IterState::Active { txn, cursor } => self.pull(txn, cursor, None),
        }
    }
}

impl<D: EntryDecoder> Drop for CollectionIter<D> {
    fn drop(&mut self) {
        let state = std::mem::replace(&mut self.state, IterState::Exhausted);
        if let IterState::Active { txn, .. } = state {
            // Frees the reader slot.
            let _ = txn.commit();
        }
    }
}
