//! Persistent collections backed by a store.
//!
//! `LazyList` and `LazyDict` are handles: an id plus the store it lives in.
//! Reading or mutating one runs a transaction against the store; nothing is
//! cached in the handle, so every handle to the same id sees the same data.
//!
//! # Usage
//!
//! ```no_run
//! use oocmap::{LazyList, Store, Value};
//!
//! let store = Store::in_memory();
//! let list = LazyList::create(&store)?;
//! list.append(&Value::Int(42))?;
//! assert_eq!(list.get(0)?, Value::Int(42));
//! # Ok::<(), oocmap::OocError>(())
//! ```

mod iter;
mod lazy_dict;
mod lazy_list;

pub use iter::{
    CollectionIter, DictItemDecoder, DictItemsIter, DictKeyDecoder, DictKeysIter,
    DictValueDecoder, DictValuesIter, EntryDecoder, ListIter, ListValueDecoder,
};
pub use lazy_dict::{DictItems, LazyDict};
pub use lazy_list::{LazyList, MAX_LENGTH, normalize_index};
