use std::cell::{Ref, RefCell, RefMut};
use std::collections::BTreeMap;
use std::ops::Bound;

use crate::dedup::DedupCache;
use crate::error::OocError;
use crate::key::CollectionId;
use crate::trace;

use super::cursor::Cursor;
use super::image::Change;
use super::{Snapshot, Store, TABLE_COUNT, Table};

/// Pending changes of one table. `None` marks a deleted key.
type WriteSet = BTreeMap<Vec<u8>, Option<Vec<u8>>>;

const NEXT_COLLECTION_KEY: &[u8] = b"next_collection_id";
const NEXT_OBJECT_KEY: &[u8] = b"next_object_id";

/// Collection 0 is the root dict of an `OocMap`.
const FIRST_COLLECTION_ID: u64 = 1;
const FIRST_OBJECT_ID: u64 = 1;

/// A read or read-write transaction.
///
/// Reads see the snapshot taken at `begin` plus, for a writer, its own
/// uncommitted changes. Dropping an unfinished transaction aborts it.
pub struct Txn {
    store: Store,
    serial: u64,
    write: bool,
    base: Snapshot,
    pending: RefCell<[WriteSet; TABLE_COUNT]>,
    dedup: RefCell<DedupCache>,
    finished: bool,
}

impl Txn {
    pub(super) fn new(store: Store, serial: u64, write: bool, base: Snapshot) -> Txn {
        Txn {
            store,
            serial,
            write,
            base,
            pending: RefCell::new(std::array::from_fn(|_| WriteSet::new())),
            dedup: RefCell::new(DedupCache::new()),
            finished: false,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn is_write(&self) -> bool {
        self.write
    }

    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn cursor(&self, table: Table) -> Cursor<'_> {
        Cursor::new(self, table)
    }

    pub(crate) fn dedup(&self) -> Ref<'_, DedupCache> {
        self.dedup.borrow()
    }

    pub(crate) fn dedup_mut(&self) -> RefMut<'_, DedupCache> {
        self.dedup.borrow_mut()
    }

    pub fn get(&self, table: Table, key: &[u8]) -> Result<Option<Vec<u8>>, OocError> {
        if let Some(change) = self.pending.borrow()[table.index()].get(key) {
            return Ok(change.clone());
        }
        Ok(self.base.table(table).get(key).cloned())
    }

    pub fn put(&self, table: Table, key: &[u8], value: &[u8]) -> Result<(), OocError> {
        if !self.write {
            return Err(OocError::WriteNotPermitted);
        }
        self.pending.borrow_mut()[table.index()].insert(key.to_vec(), Some(value.to_vec()));
        Ok(())
    }

    /// Delete `key`; returns whether it existed.
    pub fn del(&self, table: Table, key: &[u8]) -> Result<bool, OocError> {
        if !self.write {
            return Err(OocError::WriteNotPermitted);
        }
        let existed = self.get(table, key)?.is_some();
        if existed {
            self.pending.borrow_mut()[table.index()].insert(key.to_vec(), None);
        }
        Ok(existed)
    }

    /// First live entry whose key lies after `lower`, merging the snapshot
    /// with this transaction's write set.
    pub(super) fn first_from(
        &self,
        table: Table,
        lower: Bound<&[u8]>,
    ) -> Option<(Vec<u8>, Vec<u8>)> {
        let pending = self.pending.borrow();
        let overlay = &pending[table.index()];

        let from_base = self
            .base
            .table(table)
            .range::<[u8], _>((lower, Bound::Unbounded))
            .find(|(key, _)| !overlay.contains_key(key.as_slice()));
        let from_overlay = overlay
            .range::<[u8], _>((lower, Bound::Unbounded))
            .find_map(|(key, value)| value.as_ref().map(|value| (key, value)));

        let (key, value) = match (from_base, from_overlay) {
            (Some(base), Some(over)) => {
                if base.0 < over.0 {
                    base
                } else {
                    over
                }
            }
            (Some(base), None) => base,
            (None, Some(over)) => over,
            (None, None) => return None,
        };
        Some((key.clone(), value.clone()))
    }

    /// Allocate the next collection id.
    pub fn next_collection_id(&self) -> Result<CollectionId, OocError> {
        let id = self.next_sequence(NEXT_COLLECTION_KEY, FIRST_COLLECTION_ID)?;
        // u32::MAX stays free so a collection id never collides with a sentinel.
        if id >= u32::MAX as u64 {
            return Err(OocError::IdSpaceExhausted);
        }
        Ok(id as CollectionId)
    }

    /// Allocate the next interned object id.
    pub fn next_object_id(&self) -> Result<u64, OocError> {
        self.next_sequence(NEXT_OBJECT_KEY, FIRST_OBJECT_ID)
    }

    fn next_sequence(&self, name: &[u8], first: u64) -> Result<u64, OocError> {
        let next = match self.get(Table::Meta, name)? {
            Some(bytes) => {
                let raw: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
                    OocError::violation(format!("counter record has {} bytes", bytes.len()))
                })?;
                u64::from_be_bytes(raw)
            }
            None => first,
        };
        let after = next.checked_add(1).ok_or(OocError::IdSpaceExhausted)?;
        self.put(Table::Meta, name, &after.to_be_bytes())?;
        Ok(next)
    }

    /// Number of uncommitted changes held by this transaction.
    pub fn pending_changes(&self) -> usize {
        self.pending.borrow().iter().map(|set| set.len()).sum()
    }

    pub fn commit(mut self) -> Result<(), OocError> {
        self.finished = true;
        if !self.write {
            self.store.release_reader();
            trace::record(trace::EventKind::TxnCommit {
                txn: self.serial,
                write: false,
            });
            return Ok(());
        }

        let changes = self.take_changes();
        // Drop this writer's hold on the committed tables so publishing
        // updates them in place unless a reader still shares them.
        self.base = Snapshot::default();
        let result = self.store.publish(&changes);
        self.dedup.borrow_mut().clear();
        self.store.release_writer();
        match result {
            Ok(()) => {
                trace::record(trace::EventKind::TxnCommit {
                    txn: self.serial,
                    write: true,
                });
                Ok(())
            }
            Err(error) => {
                trace::record(trace::EventKind::TxnAbort {
                    txn: self.serial,
                    write: true,
                });
                Err(error)
            }
        }
    }

    pub fn abort(mut self) {
        self.abort_in_place();
    }

    fn abort_in_place(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        if self.write {
            for set in self.pending.borrow_mut().iter_mut() {
                set.clear();
            }
            self.dedup.borrow_mut().clear();
            self.store.release_writer();
        } else {
            self.store.release_reader();
        }
        trace::record(trace::EventKind::TxnAbort {
            txn: self.serial,
            write: self.write,
        });
    }

    fn take_changes(&self) -> Vec<Change> {
        let mut pending = self.pending.borrow_mut();
        let mut changes = Vec::new();
        for table in Table::ALL {
            let set = std::mem::take(&mut pending[table.index()]);
            changes.extend(set.into_iter().map(|(key, value)| Change {
                table: table.index() as u8,
                key,
                value,
            }));
        }
        changes
    }
}

impl Drop for Txn {
    fn drop(&mut self) {
        self.abort_in_place();
    }
}
