//! The top-level map: a store plus its root dict.
//!
//! Collection id 0 is reserved for the root dict and created when a store is
//! first opened writable. Everything reachable from the root, and every
//! collection handed out by `new_list` / `new_dict`, lives in the same store.

use std::path::Path;

use crate::collections::{DictItems, DictKeysIter, LazyDict, LazyList};
use crate::error::OocError;
use crate::key::{CollectionId, DictKey, ListKey};
use crate::store::{CursorOp, Store, StoreOptions, Table, Txn};
use crate::value::Value;

pub const ROOT_ID: CollectionId = 0;

/// Collections found by a full integrity check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrityReport {
    pub lists: usize,
    pub dicts: usize,
}

pub struct OocMap {
    store: Store,
    root: LazyDict,
}

impl OocMap {
    pub fn open(path: impl AsRef<Path>, options: StoreOptions) -> Result<OocMap, OocError> {
        OocMap::from_store(Store::open(path, options)?)
    }

    pub fn in_memory() -> Result<OocMap, OocError> {
        OocMap::from_store(Store::in_memory())
    }

    pub fn from_store(store: Store) -> Result<OocMap, OocError> {
        let root = LazyDict::from_id(store.clone(), ROOT_ID);
        let exists = store.read(root_exists)?;
        if !exists {
            if store.options().read_only {
                return Err(OocError::violation("store has no root dict"));
            }
            store.write(|txn| {
                // Another handle may have created it since the check above.
                if root_exists(txn)? {
                    return Ok(());
                }
                root.init_in(txn)
            })?;
        }
        Ok(OocMap { store, root })
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn root(&self) -> &LazyDict {
        &self.root
    }

    pub fn new_list(&self) -> Result<LazyList, OocError> {
        LazyList::create(&self.store)
    }

    pub fn new_dict(&self) -> Result<LazyDict, OocError> {
        LazyDict::create(&self.store)
    }

    /// Handle to an existing list by id.
    pub fn list(&self, id: CollectionId) -> LazyList {
        LazyList::from_id(self.store.clone(), id)
    }

    /// Handle to an existing dict by id.
    pub fn dict(&self, id: CollectionId) -> LazyDict {
        LazyDict::from_id(self.store.clone(), id)
    }

    pub fn len(&self) -> Result<usize, OocError> {
        self.root.len()
    }

    pub fn is_empty(&self) -> Result<bool, OocError> {
        self.root.is_empty()
    }

    pub fn get(&self, key: &Value) -> Result<Option<Value>, OocError> {
        self.root.get(key)
    }

    pub fn insert(&self, key: &Value, value: &Value) -> Result<(), OocError> {
        self.root.set(key, value)
    }

    pub fn remove(&self, key: &Value) -> Result<bool, OocError> {
        self.root.delete(key)
    }

    pub fn contains_key(&self, key: &Value) -> Result<bool, OocError> {
        self.root.contains_key(key)
    }

    pub fn keys(&self) -> DictKeysIter {
        self.root.keys()
    }

    pub fn items(&self) -> DictItems {
        self.root.items()
    }

    /// Ids of every list in the store, ascending.
    pub fn list_ids(&self) -> Result<Vec<CollectionId>, OocError> {
        self.store.read(list_ids_in)
    }

    /// Ids of every dict in the store, ascending.
    pub fn dict_ids(&self) -> Result<Vec<CollectionId>, OocError> {
        self.store.read(dict_ids_in)
    }

    /// Check every list and dict in one snapshot.
    pub fn check_integrity(&self) -> Result<IntegrityReport, OocError> {
        self.store.read(|txn| {
            let lists = list_ids_in(txn)?;
            for id in &lists {
                self.list(*id).check_integrity_in(txn)?;
            }
            let dicts = dict_ids_in(txn)?;
            for id in &dicts {
                self.dict(*id).check_integrity_in(txn)?;
            }
            Ok(IntegrityReport {
                lists: lists.len(),
                dicts: dicts.len(),
            })
        })
    }
}

fn root_exists(txn: &Txn) -> Result<bool, OocError> {
    Ok(txn
        .get(Table::Dicts, &DictKey::count(ROOT_ID).encode())?
        .is_some())
}

/// Every id with a sentinel record. Entries under an id without one are
/// reported as a violation.
fn sentinel_ids<K>(
    txn: &Txn,
    table: Table,
    decode: impl Fn(&[u8]) -> Result<K, OocError>,
    split: impl Fn(&K) -> (CollectionId, bool),
) -> Result<Vec<CollectionId>, OocError> {
    let mut ids = Vec::new();
    let mut orphan: Option<CollectionId> = None;
    let mut cursor = txn.cursor(table);
    while let Some(entry) = cursor.get(CursorOp::Next)? {
        let (id, is_sentinel) = split(&decode(&entry.key)?);
        // Entries sort before their sentinel, so reaching another id while
        // one is pending means the pending id has none.
        if let Some(pending) = orphan {
            if pending != id {
                break;
            }
        }
        if is_sentinel {
            ids.push(id);
            orphan = None;
        } else if orphan.is_none() {
            orphan = Some(id);
        }
    }
    cursor.close();
    match orphan {
        Some(id) => Err(OocError::violation(format!(
            "{} entries for id {} have no sentinel record",
            table.name(),
            id
        ))),
        None => Ok(ids),
    }
}

fn list_ids_in(txn: &Txn) -> Result<Vec<CollectionId>, OocError> {
    sentinel_ids(txn, Table::Lists, ListKey::decode, |key| {
        (key.id, key.is_length())
    })
}

fn dict_ids_in(txn: &Txn) -> Result<Vec<CollectionId>, OocError> {
    sentinel_ids(txn, Table::Dicts, DictKey::decode, |key| {
        (key.id, key.is_count())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_dict_is_created_once() {
        let store = Store::in_memory();
        let map = OocMap::from_store(store.clone()).unwrap();
        map.insert(&Value::str("k"), &Value::Int(1)).unwrap();
        let again = OocMap::from_store(store).unwrap();
        assert_eq!(again.get(&Value::str("k")).unwrap(), Some(Value::Int(1)));
        assert_eq!(again.root().id(), ROOT_ID);
    }

    #[test]
    fn test_new_collections_get_fresh_ids() {
        let map = OocMap::in_memory().unwrap();
        let list = map.new_list().unwrap();
        let dict = map.new_dict().unwrap();
        assert_eq!(list.id(), 1);
        assert_eq!(dict.id(), 2);
        assert_eq!(map.list_ids().unwrap(), vec![1]);
        assert_eq!(map.dict_ids().unwrap(), vec![ROOT_ID, 2]);
    }

    #[test]
    fn test_check_integrity_walks_everything() {
        let map = OocMap::in_memory().unwrap();
        map.insert(
            &Value::str("nested"),
            &Value::list(vec![Value::Int(1), Value::dict(vec![])]),
        )
        .unwrap();
        let report = map.check_integrity().unwrap();
        assert_eq!(report, IntegrityReport { lists: 1, dicts: 2 });
    }

    #[test]
    fn test_orphan_entries_are_reported() {
        let map = OocMap::in_memory().unwrap();
        map.store()
            .write(|txn| txn.put(Table::Lists, &ListKey::new(9, 0).encode(), &[0u8; 16]))
            .unwrap();
        assert!(matches!(
            map.check_integrity(),
            Err(OocError::StorageConsistencyViolation { .. })
        ));
    }

    #[test]
    fn test_read_only_store_without_root() {
        let store = Store::in_memory_with(StoreOptions {
            read_only: true,
            ..StoreOptions::default()
        });
        assert!(OocMap::from_store(store).is_err());
    }
}
