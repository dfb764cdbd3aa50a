//! DedupCache - transaction-scoped arena of already-encoded shared values.
//!
//! Host lists and dicts are shared by reference and may contain themselves.
//! Encoding one allocates a collection, so encoding the same host value twice
//! in one transaction must hand back the first token instead of allocating
//! again. The cache is owned by the transaction and discarded with it.
//!
//! Each entry keeps a clone of the host value alive, so an identity can never
//! be recycled by a different allocation while the transaction is open.

use std::collections::HashMap;

use crate::token::Token;
use crate::value::Value;

/// Stable index of one entry in the arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DedupSlot(usize);

pub struct DedupCache {
    slots: Vec<(Value, Token)>,
    by_identity: HashMap<usize, DedupSlot>,
}

impl DedupCache {
    pub fn new() -> Self {
        DedupCache {
            slots: Vec::new(),
            by_identity: HashMap::new(),
        }
    }

    /// Token previously registered for the value with this identity.
    pub fn lookup(&self, identity: usize) -> Option<Token> {
        self.by_identity
            .get(&identity)
            .map(|slot| self.slots[slot.0].1)
    }

    /// Register `value` before its children are encoded, so a cycle back to
    /// it resolves to `token`.
    pub fn register(&mut self, identity: usize, value: &Value, token: Token) -> DedupSlot {
        if let Some(slot) = self.by_identity.get(&identity) {
            return *slot;
        }
        let slot = DedupSlot(self.slots.len());
        self.slots.push((value.clone(), token));
        self.by_identity.insert(identity, slot);
        slot
    }

    pub fn token(&self, slot: DedupSlot) -> Token {
        self.slots[slot.0].1
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn clear(&mut self) {
        self.by_identity.clear();
        self.slots.clear();
    }
}

impl Default for DedupCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_lookup() {
        let mut cache = DedupCache::new();
        let list = Value::list(vec![Value::Int(1)]);
        let identity = list.identity().unwrap();

        assert!(cache.lookup(identity).is_none());
        let slot = cache.register(identity, &list, Token::list(5));
        assert_eq!(cache.lookup(identity), Some(Token::list(5)));
        assert_eq!(cache.token(slot), Token::list(5));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_second_registration_keeps_first_token() {
        let mut cache = DedupCache::new();
        let list = Value::list(vec![]);
        let identity = list.identity().unwrap();
        let first = cache.register(identity, &list, Token::list(1));
        let second = cache.register(identity, &list, Token::list(2));
        assert_eq!(first, second);
        assert_eq!(cache.lookup(identity), Some(Token::list(1)));
    }

    #[test]
    fn test_cache_keeps_value_alive() {
        let mut cache = DedupCache::new();
        let identity = {
            let list = Value::list(vec![Value::Int(3)]);
            let identity = list.identity().unwrap();
            cache.register(identity, &list, Token::list(8));
            identity
        };
        // The original handle is gone, but the arena still owns a clone, so
        // no new list can be allocated at the same address.
        let other = Value::list(vec![]);
        assert_ne!(other.identity(), Some(identity));
        cache.clear();
        assert!(cache.is_empty());
    }
}
