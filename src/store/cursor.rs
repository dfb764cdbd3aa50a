//! Positioned access to one table inside a transaction.
//!
//! A cursor remembers the key it sits on rather than a slot, so it stays
//! valid while the same transaction inserts or deletes around it: `Next`
//! after `del` lands on the entry that followed the deleted one.

use std::ops::Bound;

use crate::error::OocError;

use super::{Table, Txn};

#[derive(Debug, Clone, Copy)]
pub enum CursorOp<'k> {
    /// Position on exactly this key.
    SetKey(&'k [u8]),
    /// Position on the first key >= this key.
    SetRange(&'k [u8]),
    /// Advance; an unpositioned cursor moves to the first entry.
    Next,
    /// Re-read the entry under the cursor.
    Current,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutMode {
    /// Insert or overwrite any key.
    Upsert,
    /// Overwrite the entry under the cursor; the key must match it.
    Current,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

pub struct Cursor<'t> {
    txn: &'t Txn,
    table: Table,
    position: Option<Vec<u8>>,
}

impl<'t> Cursor<'t> {
    pub(super) fn new(txn: &'t Txn, table: Table) -> Self {
        Cursor {
            txn,
            table,
            position: None,
        }
    }

    pub fn table(&self) -> Table {
        self.table
    }

    /// Move according to `op`. `Ok(None)` means nothing was found; a failed
    /// `Next` leaves the cursor where it was.
    pub fn get(&mut self, op: CursorOp<'_>) -> Result<Option<Entry>, OocError> {
        match op {
            CursorOp::SetKey(key) => match self.txn.get(self.table, key)? {
                Some(value) => {
                    self.position = Some(key.to_vec());
                    Ok(Some(Entry {
                        key: key.to_vec(),
                        value,
                    }))
                }
                None => {
                    self.position = None;
                    Ok(None)
                }
            },
            CursorOp::SetRange(key) => {
                let found = self.txn.first_from(self.table, Bound::Included(key));
                Ok(self.land(found))
            }
            CursorOp::Next => {
                let found = match &self.position {
                    Some(current) => self
                        .txn
                        .first_from(self.table, Bound::Excluded(current.as_slice())),
                    None => self.txn.first_from(self.table, Bound::Unbounded),
                };
                Ok(self.land(found))
            }
            CursorOp::Current => match &self.position {
                Some(current) => Ok(self.txn.get(self.table, current)?.map(|value| Entry {
                    key: current.clone(),
                    value,
                })),
                None => Ok(None),
            },
        }
    }

    fn land(&mut self, found: Option<(Vec<u8>, Vec<u8>)>) -> Option<Entry> {
        let (key, value) = found?;
        self.position = Some(key.clone());
        Some(Entry { key, value })
    }

    pub fn put(&mut self, key: &[u8], value: &[u8], mode: PutMode) -> Result<(), OocError> {
        if mode == PutMode::Current && self.position.as_deref() != Some(key) {
            return Err(OocError::violation(
                "cursor put in current mode with a key other than the cursor's",
            ));
        }
        self.txn.put(self.table, key, value)?;
        self.position = Some(key.to_vec());
        Ok(())
    }

    /// Delete the entry under the cursor.
    pub fn del(&mut self) -> Result<(), OocError> {
        let current = self
            .position
            .as_deref()
            .ok_or_else(|| OocError::violation("cursor delete while unpositioned"))?;
        if !self.txn.del(self.table, current)? {
            return Err(OocError::violation("cursor delete of a missing entry"));
        }
        Ok(())
    }

    pub fn close(self) {}

    /// Detach the position so it can outlive this borrow of the transaction.
    pub fn into_raw(self) -> RawCursor {
        RawCursor {
            table: self.table,
            position: self.position,
        }
    }
}

/// A cursor position with no transaction borrow, for holders that own the
/// transaction themselves.
#[derive(Debug, Clone)]
pub struct RawCursor {
    table: Table,
    position: Option<Vec<u8>>,
}

impl RawCursor {
    pub fn new(table: Table) -> Self {
        RawCursor {
            table,
            position: None,
        }
    }

    pub fn attach(self, txn: &Txn) -> Cursor<'_> {
        Cursor {
            txn,
            table: self.table,
            position: self.position,
        }
    }
}
