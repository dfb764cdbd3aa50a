//! Persistent, out-of-core lists and dicts over a transactional store.
//!
//! Collections live in a [`Store`] as ordered key/value records and are
//! handled through lightweight [`LazyList`] / [`LazyDict`] handles. Host
//! values ([`Value`]) are encoded into fixed 16-byte [`Token`]s on the way
//! in and decoded back on the way out; equal immutable values always get
//! the same token, and a host list or dict reached twice in one write is
//! stored once.
//!
//! The bundled [`Store`] keeps its committed tables in memory and uses the
//! image file for durability only, so a store's contents must fit in RAM.
//!
//! [`OocMap`] bundles a store with its root dict and is the usual entry
//! point:
//!
//! ```no_run
//! use oocmap::{OocMap, StoreOptions, Value};
//!
//! let map = OocMap::open("data.ooc", StoreOptions::default())?;
//! map.insert(&Value::str("numbers"), &Value::list(vec![Value::Int(1), Value::Int(2)]))?;
//! let numbers = map.get(&Value::str("numbers"))?;
//! # Ok::<(), oocmap::OocError>(())
//! ```

pub mod codec;
pub mod collections;
pub mod compare;
pub mod dedup;
pub mod error;
pub mod key;
pub mod oocmap;
pub mod store;
pub mod token;
pub mod trace;
pub mod value;

pub use crate::collections::{
    DictItems, DictItemsIter, DictKeysIter, DictValuesIter, LazyDict, LazyList, ListIter,
};
pub use crate::compare::CompareOp;
pub use crate::error::OocError;
pub use crate::key::CollectionId;
pub use crate::oocmap::{IntegrityReport, OocMap, ROOT_ID};
pub use crate::store::{Store, StoreOptions, StoreStats, Txn};
pub use crate::token::Token;
pub use crate::value::Value;
