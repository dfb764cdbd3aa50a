//! Transactional key-value store backing the collections.
//!
//! The store keeps a small set of named tables, each an ordered map from
//! byte keys to byte values. Its contract is the one the collection engine
//! relies on:
//!
//! - at most one read-write transaction at a time (`begin(true)` blocks until
//!   the previous writer finishes),
//! - any number of read transactions, each seeing the snapshot committed when
//!   it began, bounded by `StoreOptions::max_readers`,
//! - a write transaction's changes become visible all at once on commit, or
//!   not at all.
//!
//! A write transaction never touches the committed tables until commit; its
//! changes sit in a per-table write set layered over its snapshot, so readers
//! and the writer share the committed maps without copying.
//!
//! Committed tables stay resident. File-backed stores append every commit to
//! an image file (see `image`) and replay it on open, so the file gives
//! durability but does not page data out: a store must fit in memory. A
//! commit updates the committed maps in place unless an open reader still
//! shares them, in which case only the touched tables are copied.

mod cursor;
mod image;
mod txn;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock};

use crate::error::OocError;
use crate::trace;

pub use cursor::{Cursor, CursorOp, Entry, PutMode, RawCursor};
pub use txn::Txn;

use image::{Change, ImageFile};

/// One ordered table: byte key -> byte value.
pub type TableMap = BTreeMap<Vec<u8>, Vec<u8>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    /// List entries and list length records.
    Lists,
    /// Dict entries and dict count records.
    Dicts,
    /// Interned object id -> type code + payload.
    Objects,
    /// Type code + payload -> interned object id.
    ObjectIndex,
    /// Id counters.
    Meta,
}

pub const TABLE_COUNT: usize = 5;

impl Table {
    pub const ALL: [Table; TABLE_COUNT] = [
        Table::Lists,
        Table::Dicts,
        Table::Objects,
        Table::ObjectIndex,
        Table::Meta,
    ];

    pub fn index(self) -> usize {
        match self {
            Table::Lists => 0,
            Table::Dicts => 1,
            Table::Objects => 2,
            Table::ObjectIndex => 3,
            Table::Meta => 4,
        }
    }

    pub fn from_index(index: usize) -> Option<Table> {
        Table::ALL.get(index).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            Table::Lists => "lists",
            Table::Dicts => "dicts",
            Table::Objects => "objects",
            Table::ObjectIndex => "object_index",
            Table::Meta => "meta",
        }
    }
}

/// Committed state: one shared map per table. Cloning only bumps reference
/// counts.
#[derive(Clone, Default)]
pub(crate) struct Snapshot {
    tables: [Arc<TableMap>; TABLE_COUNT],
}

impl Snapshot {
    pub(crate) fn table(&self, table: Table) -> &TableMap {
        &self.tables[table.index()]
    }

    /// Copy-on-write access; clones a table only while a reader still holds it.
    pub(crate) fn table_mut(&mut self, table: Table) -> &mut TableMap {
        Arc::make_mut(&mut self.tables[table.index()])
    }

    pub(crate) fn apply(&mut self, change: &Change) -> Result<(), OocError> {
        let table = Table::from_index(change.table as usize).ok_or_else(|| {
            OocError::violation(format!("change for unknown table {}", change.table))
        })?;
        let map = self.table_mut(table);
        match &change.value {
            Some(value) => {
                map.insert(change.key.clone(), value.clone());
            }
            None => {
                map.remove(&change.key);
            }
        }
        Ok(())
    }

    pub(crate) fn entry_count(&self) -> usize {
        self.tables.iter().map(|table| table.len()).sum()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StoreOptions {
    /// Upper bound on simultaneously open read transactions.
    pub max_readers: usize,
    /// fsync the image after every commit.
    pub sync_on_commit: bool,
    /// Reject every write transaction.
    pub read_only: bool,
    /// Rewrite the image as a single checkpoint on open once its commit log
    /// grows past this many bytes.
    pub compact_threshold: u64,
    /// Enable tracing regardless of OOCMAP_TRACE.
    pub trace: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        StoreOptions {
            max_readers: 126,
            sync_on_commit: true,
            read_only: false,
            compact_threshold: 8 * 1024 * 1024,
            trace: false,
        }
    }
}

/// Entry counts per table of the committed snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreStats {
    pub tables: Vec<(&'static str, usize)>,
    pub active_readers: usize,
}

pub(crate) struct StoreInner {
    path: Option<PathBuf>,
    options: StoreOptions,
    committed: RwLock<Snapshot>,
    writer_active: Mutex<bool>,
    writer_released: Condvar,
    readers: AtomicUsize,
    next_serial: AtomicU64,
    image: Mutex<Option<ImageFile>>,
}

/// Shared handle to an open store. Clones refer to the same store.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl Store {
    /// A store that lives only in memory.
    pub fn in_memory() -> Store {
        Self::in_memory_with(StoreOptions::default())
    }

    pub fn in_memory_with(options: StoreOptions) -> Store {
        Self::from_parts(None, options, Snapshot::default(), None)
    }

    /// Open or create a file-backed store.
    pub fn open(path: impl AsRef<Path>, options: StoreOptions) -> Result<Store, OocError> {
        let path = path.as_ref().to_path_buf();
        if options.trace {
            trace::enable();
        }
        trace::init();

        let loaded = image::load(&path)?;
        let (snapshot, log_bytes, valid_len) = match loaded {
            Some(loaded) => {
                trace::record(trace::EventKind::ImageLoad {
                    bytes: loaded.valid_len as usize,
                    entries: loaded.snapshot.entry_count(),
                });
                (loaded.snapshot, loaded.log_bytes, Some(loaded.valid_len))
            }
            None => {
                if options.read_only {
                    return Err(OocError::Io(std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        format!("no store at {}", path.display()),
                    )));
                }
                (Snapshot::default(), 0, None)
            }
        };

        let image = if options.read_only {
            None
        } else {
            Some(ImageFile::open(&path, &snapshot, valid_len, log_bytes, options)?)
        };

        let store = Self::from_parts(Some(path), options, snapshot, image);
        if !options.read_only && log_bytes > options.compact_threshold {
            store.compact()?;
        }
        Ok(store)
    }

    fn from_parts(
        path: Option<PathBuf>,
        options: StoreOptions,
        snapshot: Snapshot,
        image: Option<ImageFile>,
    ) -> Store {
        if options.trace {
            trace::enable();
        }
        trace::init();
        Store {
            inner: Arc::new(StoreInner {
                path,
                options,
                committed: RwLock::new(snapshot),
                writer_active: Mutex::new(false),
                writer_released: Condvar::new(),
                readers: AtomicUsize::new(0),
                next_serial: AtomicU64::new(1),
                image: Mutex::new(image),
            }),
        }
    }

    pub fn options(&self) -> StoreOptions {
        self.inner.options
    }

    pub fn path(&self) -> Option<&Path> {
        self.inner.path.as_deref()
    }

    /// True if both handles refer to the same open store.
    pub fn same_store(&self, other: &Store) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn active_readers(&self) -> usize {
        self.inner.readers.load(Ordering::SeqCst)
    }

    /// Begin a transaction. A write transaction waits for the current
    /// writer, if any, to finish.
    pub fn begin(&self, write: bool) -> Result<Txn, OocError> {
        let serial = self.inner.next_serial.fetch_add(1, Ordering::SeqCst);
        if write {
            if self.inner.options.read_only {
                return Err(OocError::WriteNotPermitted);
            }
            self.acquire_writer();
        } else {
            let max_readers = self.inner.options.max_readers;
            self.inner
                .readers
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                    if n < max_readers { Some(n + 1) } else { None }
                })
                .map_err(|_| OocError::ReadersFull { max_readers })?;
        }

        // Taken after writer admission so a writer sees its predecessor's commit.
        let snapshot = self.snapshot();
        trace::record(trace::EventKind::TxnBegin { txn: serial, write });
        Ok(Txn::new(self.clone(), serial, write, snapshot))
    }

    /// Run `f` in a read transaction; commit on success, abort on failure.
    pub fn read<T>(&self, f: impl FnOnce(&Txn) -> Result<T, OocError>) -> Result<T, OocError> {
        self.run(false, f)
    }

    /// Run `f` in a write transaction; commit on success, abort on failure.
    pub fn write<T>(&self, f: impl FnOnce(&Txn) -> Result<T, OocError>) -> Result<T, OocError> {
        self.run(true, f)
    }

    fn run<T>(
        &self,
        write: bool,
        f: impl FnOnce(&Txn) -> Result<T, OocError>,
    ) -> Result<T, OocError> {
        let txn = self.begin(write)?;
        match f(&txn) {
            Ok(result) => {
                txn.commit()?;
                Ok(result)
            }
            Err(error) => {
                txn.abort();
                Err(error)
            }
        }
    }

    pub fn stats(&self) -> StoreStats {
        let snapshot = self.snapshot();
        StoreStats {
            tables: Table::ALL
                .iter()
                .map(|table| (table.name(), snapshot.table(*table).len()))
                .collect(),
            active_readers: self.active_readers(),
        }
    }

    /// Rewrite the image file as a single checkpoint of the committed state.
    /// No-op for in-memory and read-only stores.
    pub fn compact(&self) -> Result<(), OocError> {
        if self.inner.options.read_only {
            return Ok(());
        }
        self.acquire_writer();
        let result = self.checkpoint();
        self.release_writer();
        result
    }

    /// Caller holds the writer.
    fn checkpoint(&self) -> Result<(), OocError> {
        let snapshot = self.snapshot();
        let mut image = self
            .inner
            .image
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match image.as_mut() {
            Some(image) => image.checkpoint(&snapshot),
            None => Ok(()),
        }
    }

    pub(crate) fn snapshot(&self) -> Snapshot {
        self.inner
            .committed
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn acquire_writer(&self) {
        let mut active = self
            .inner
            .writer_active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        while *active {
            active = self
                .inner
                .writer_released
                .wait(active)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        *active = true;
    }

    pub(crate) fn release_writer(&self) {
        let mut active = self
            .inner
            .writer_active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *active = false;
        self.inner.writer_released.notify_one();
    }

    pub(crate) fn release_reader(&self) {
        self.inner.readers.fetch_sub(1, Ordering::SeqCst);
    }

    /// Make a writer's changes durable (file-backed stores) and visible.
    /// Caller holds the writer.
    pub(crate) fn publish(&self, changes: &[Change]) -> Result<(), OocError> {
        if changes.is_empty() {
            return Ok(());
        }
        let log_bytes = {
            let mut image = self
                .inner
                .image
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            match image.as_mut() {
                Some(image) => {
                    image.append_commit(changes)?;
                    image.log_bytes()
                }
                None => 0,
            }
        };
        {
            let mut committed = self
                .inner
                .committed
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            for change in changes {
                committed.apply(change)?;
            }
        }
        if log_bytes > self.inner.options.compact_threshold {
            // The commit is already durable; a failed checkpoint leaves the
            // log in place for the next attempt.
            let ok = self.checkpoint().is_ok();
            trace::record(trace::EventKind::ImageCompact { log_bytes, ok });
        }
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::TempPath;
    use super::*;

    #[test]
    fn test_table_indices_round_trip() {
        for table in Table::ALL {
            assert_eq!(Table::from_index(table.index()), Some(table));
        }
        assert_eq!(Table::from_index(TABLE_COUNT), None);
    }

    #[test]
    fn test_write_is_invisible_until_commit() {
        let store = Store::in_memory();
        let writer = store.begin(true).unwrap();
        writer.put(Table::Meta, b"k", b"v").unwrap();

        let reader = store.begin(false).unwrap();
        assert_eq!(reader.get(Table::Meta, b"k").unwrap(), None);
        writer.commit().unwrap();

        // The old reader keeps its snapshot; a new one sees the commit.
        assert_eq!(reader.get(Table::Meta, b"k").unwrap(), None);
        reader.commit().unwrap();
        let reader = store.begin(false).unwrap();
        assert_eq!(reader.get(Table::Meta, b"k").unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn test_abort_discards_changes() {
        let store = Store::in_memory();
        let result: Result<(), OocError> = store.write(|txn| {
            txn.put(Table::Meta, b"k", b"v")?;
            Err(OocError::OutOfMemory)
        });
        assert!(matches!(result, Err(OocError::OutOfMemory)));
        let value = store.read(|txn| txn.get(Table::Meta, b"k")).unwrap();
        assert_eq!(value, None);
    }

    #[test]
    fn test_dropped_write_txn_releases_writer() {
        let store = Store::in_memory();
        {
            let txn = store.begin(true).unwrap();
            txn.put(Table::Meta, b"k", b"v").unwrap();
        }
        // Would block forever if the dropped writer still held admission.
        let txn = store.begin(true).unwrap();
        assert_eq!(txn.get(Table::Meta, b"k").unwrap(), None);
        txn.abort();
    }

    #[test]
    fn test_reader_slots_are_bounded() {
        let store = Store::in_memory_with(StoreOptions {
            max_readers: 2,
            ..StoreOptions::default()
        });
        let first = store.begin(false).unwrap();
        let second = store.begin(false).unwrap();
        assert!(matches!(
            store.begin(false),
            Err(OocError::ReadersFull { max_readers: 2 })
        ));
        first.commit().unwrap();
        assert_eq!(store.active_readers(), 1);
        let third = store.begin(false).unwrap();
        second.abort();
        third.commit().unwrap();
        assert_eq!(store.active_readers(), 0);
    }

    #[test]
    fn test_read_only_store_rejects_writers() {
        let store = Store::in_memory_with(StoreOptions {
            read_only: true,
            ..StoreOptions::default()
        });
        assert!(matches!(store.begin(true), Err(OocError::WriteNotPermitted)));
    }

    #[test]
    fn test_writers_are_serialized_across_threads() {
        let store = Store::in_memory();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        store
                            .write(|txn| {
                                let current = txn
                                    .get(Table::Meta, b"counter")?
                                    .map(|bytes| bytes[0] as u32 + bytes[1] as u32 * 256)
                                    .unwrap_or(0);
                                let next = current + 1;
                                txn.put(Table::Meta, b"counter", &[next as u8, (next >> 8) as u8])
                            })
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let value = store.read(|txn| txn.get(Table::Meta, b"counter")).unwrap();
        assert_eq!(value, Some(vec![100, 0]));
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let path = TempPath::new("reopen");
        {
            let store = Store::open(&path.0, StoreOptions::default()).unwrap();
            store
                .write(|txn| {
                    txn.put(Table::Lists, b"a", b"1")?;
                    txn.put(Table::Lists, b"b", b"2")
                })
                .unwrap();
            store.write(|txn| txn.del(Table::Lists, b"a").map(|_| ())).unwrap();
        }
        let store = Store::open(&path.0, StoreOptions::default()).unwrap();
        let (a, b) = store
            .read(|txn| Ok((txn.get(Table::Lists, b"a")?, txn.get(Table::Lists, b"b")?)))
            .unwrap();
        assert_eq!(a, None);
        assert_eq!(b, Some(b"2".to_vec()));
        assert_eq!(store.stats().tables[0], ("lists", 1));
    }

    #[test]
    fn test_compact_keeps_contents() {
        let path = TempPath::new("compact");
        let store = Store::open(&path.0, StoreOptions::default()).unwrap();
        for i in 0..10u8 {
            store.write(|txn| txn.put(Table::Dicts, &[i], &[i, i])).unwrap();
        }
        store.compact().unwrap();
        drop(store);

        let store = Store::open(
            &path.0,
            StoreOptions {
                read_only: true,
                ..StoreOptions::default()
            },
        )
        .unwrap();
        let value = store.read(|txn| txn.get(Table::Dicts, &[7])).unwrap();
        assert_eq!(value, Some(vec![7, 7]));
        assert_eq!(store.stats().tables[1], ("dicts", 10));
    }

    #[test]
    fn test_read_only_open_of_missing_file_fails() {
        let path = TempPath::new("missing");
        let result = Store::open(
            &path.0,
            StoreOptions {
                read_only: true,
                ..StoreOptions::default()
            },
        );
        assert!(matches!(result, Err(OocError::Io(_))));
    }

    fn table_ptr(store: &Store, table: Table) -> *const TableMap {
        Arc::as_ptr(&store.snapshot().tables[table.index()])
    }

    #[test]
    fn test_commit_updates_tables_in_place() {
        let store = Store::in_memory();
        store.write(|txn| txn.put(Table::Lists, b"a", b"1")).unwrap();
        let before = table_ptr(&store, Table::Lists);
        for i in 0..10u8 {
            store.write(|txn| txn.put(Table::Lists, &[i], b"x")).unwrap();
        }
        assert_eq!(table_ptr(&store, Table::Lists), before);
    }

    #[test]
    fn test_commit_under_open_reader_copies_table() {
        let store = Store::in_memory();
        store.write(|txn| txn.put(Table::Lists, b"a", b"1")).unwrap();
        let before = table_ptr(&store, Table::Lists);
        let reader = store.begin(false).unwrap();
        store.write(|txn| txn.put(Table::Lists, b"a", b"2")).unwrap();
        assert_ne!(table_ptr(&store, Table::Lists), before);
        assert_eq!(reader.get(Table::Lists, b"a").unwrap(), Some(b"1".to_vec()));
        reader.commit().unwrap();
    }

    #[test]
    fn test_commit_log_is_compacted_while_open() {
        let path = TempPath::new("autocompact");
        let options = StoreOptions {
            compact_threshold: 64,
            ..StoreOptions::default()
        };
        let store = Store::open(&path.0, options).unwrap();
        for i in 0..20u8 {
            store.write(|txn| txn.put(Table::Lists, &[i], &[i; 16])).unwrap();
            let image = store.inner.image.lock().unwrap();
            assert!(image.as_ref().unwrap().log_bytes() <= 64);
        }
        drop(store);

        let store = Store::open(&path.0, options).unwrap();
        assert_eq!(store.stats().tables[0], ("lists", 20));
        let value = store.read(|txn| txn.get(Table::Lists, &[19])).unwrap();
        assert_eq!(value, Some(vec![19; 16]));
    }
}
