//! Table: structural key -> entry map with stable slot handles.
//!
//! The table itself is not synchronized. `SimpleCache` keeps it behind the
//! table-token and only ever calls into it for short, non-blocking
//! sections; `K: Eq/Hash` is the only user code that runs in here.

use core::borrow::Borrow;
use core::hash::{BuildHasher, Hash};
use hashbrown::HashTable;
use slotmap::{DefaultKey, SlotMap};
use std::collections::hash_map::RandomState;

/// Generational slot handle. A handle to an erased entry never resolves,
/// even if the physical slot is reused by a later insert.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct Slot(DefaultKey);

impl Slot {
    fn raw(&self) -> DefaultKey {
        self.0
    }
}

#[derive(Debug)]
struct Row<K, V> {
    key: K,
    value: V,
    hash: u64,
}

pub struct Table<K, V, S = RandomState> {
    hasher: S,
    index: HashTable<DefaultKey>,
    rows: SlotMap<DefaultKey, Row<K, V>>,
}

#[derive(Debug, Eq, PartialEq)]
pub enum InsertError {
    DuplicateKey,
}

impl<K, V> Table<K, V>
where
    K: Eq + Hash,
{
    pub fn new() -> Self {
        Self::with_hasher(Default::default())
    }
}

impl<K, V> Default for Table<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, S> Table<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    pub fn with_hasher(hasher: S) -> Self {
        Self {
            hasher,
            index: HashTable::new(),
            rows: SlotMap::with_key(),
        }
    }

    fn make_hash<Q>(&self, q: &Q) -> u64
    where
        Q: ?Sized + Hash,
    {
        self.hasher.hash_one(q)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn find<Q>(&self, q: &Q) -> Option<Slot>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let hash = self.make_hash(q);
        self.index
            .find(hash, |&k| {
                self.rows
                    .get(k)
                    .map(|r| r.key.borrow() == q)
                    .unwrap_or(false)
            })
            .map(|&k| Slot(k))
    }

    pub fn contains_key<Q>(&self, q: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.find(q).is_some()
    }

    /// Insert `key`, building the value only when the key is absent.
    pub fn insert_with<F>(&mut self, key: K, make: F) -> Result<Slot, InsertError>
    where
        F: FnOnce() -> V,
    {
        let hash = self.make_hash(&key);
        match self.index.entry(
            hash,
            |&k| self.rows.get(k).map(|r| r.key == key).unwrap_or(false),
            |&k| self.rows.get(k).map(|r| r.hash).unwrap_or(0),
        ) {
            hashbrown::hash_table::Entry::Occupied(_) => Err(InsertError::DuplicateKey),
            hashbrown::hash_table::Entry::Vacant(v) => {
                let value = make();
                let k = self.rows.insert(Row { key, value, hash });
                let _ = v.insert(k);
                Ok(Slot(k))
            }
        }
    }

    pub fn remove(&mut self, slot: Slot) -> Option<(K, V)> {
        let k = slot.raw();
        let row = self.rows.remove(k)?;
        if let Ok(occupied) = self.index.find_entry(row.hash, |&kk| kk == k) {
            occupied.remove();
        }
        Some((row.key, row.value))
    }

    pub fn get(&self, slot: Slot) -> Option<(&K, &V)> {
        self.rows.get(slot.raw()).map(|r| (&r.key, &r.value))
    }

    pub fn get_mut(&mut self, slot: Slot) -> Option<(&K, &mut V)> {
        self.rows.get_mut(slot.raw()).map(|r| (&r.key, &mut r.value))
    }

    /// Remove every row, yielding them in slot order.
    pub fn drain(&mut self) -> impl Iterator<Item = (K, V)> + '_ {
        self.index.clear();
        self.rows.drain().map(|(_, r)| (r.key, r.value))
    }

    pub fn iter(&self) -> impl Iterator<Item = (Slot, &K, &V)> {
        self.rows.iter().map(|(k, r)| (Slot(k), &r.key, &r.value))
    }
}
