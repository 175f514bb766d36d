//! Keyed resource stores with reverse lookup by owner
//!
//! Every resource the coordinator tracks (transports, producers, consumers)
//! lives in a [`ResourceRegistry`]: a map from resource id to value, plus an
//! insertion-ordered index from owner to the ids it owns. The index is what
//! makes "oldest transport of this connection" and "everything on these
//! transports" cheap and deterministic.
//!
//! Registries do no locking of their own. The coordinator keeps all of them
//! behind a single mutex so that a check on one registry and an insert into
//! another happen atomically with respect to other peer operations.

mod connection;
mod consumer;
mod producer;
mod transport;

pub use connection::{Connection, ConnectionInfo, ConnectionRegistry};
pub use consumer::{ConsumerEntry, ConsumerRegistry};
pub use producer::{AvailableProducer, ProducerEntry, ProducerRegistry};
pub use transport::{TransportEntry, TransportRegistry, TransportSelection};

use indexmap::{IndexMap, IndexSet};
use std::hash::Hash;

struct Owned<O, V> {
    owner: O,
    value: V,
}

/// Generic keyed store with reverse lookup by owner
pub struct ResourceRegistry<K, O, V> {
    entries: IndexMap<K, Owned<O, V>>,
    by_owner: IndexMap<O, IndexSet<K>>,
}

impl<K, O, V> Default for ResourceRegistry<K, O, V> {
    fn default() -> Self {
        Self {
            entries: IndexMap::new(),
            by_owner: IndexMap::new(),
        }
    }
}

impl<K, O, V> ResourceRegistry<K, O, V>
where
    K: Clone + Eq + Hash,
    O: Clone + Eq + Hash,
{
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a resource under `owner`.
    ///
    /// Ids are never reused while live: inserting an id that is already
    /// present hands the value back untouched.
    pub fn insert(&mut self, id: K, owner: O, value: V) -> Result<(), V> {
        if self.entries.contains_key(&id) {
            return Err(value);
        }
        self.by_owner
            .entry(owner.clone())
            .or_default()
            .insert(id.clone());
        self.entries.insert(id, Owned { owner, value });
        Ok(())
    }

    /// Remove a resource, returning its owner and value
    pub fn remove(&mut self, id: &K) -> Option<(O, V)> {
        let Owned { owner, value } = self.entries.shift_remove(id)?;
        if let Some(ids) = self.by_owner.get_mut(&owner) {
            ids.shift_remove(id);
            if ids.is_empty() {
                self.by_owner.shift_remove(&owner);
            }
        }
        Some((owner, value))
    }

    #[must_use]
    pub fn get(&self, id: &K) -> Option<&V> {
        self.entries.get(id).map(|entry| &entry.value)
    }

    pub fn get_mut(&mut self, id: &K) -> Option<&mut V> {
        self.entries.get_mut(id).map(|entry| &mut entry.value)
    }

    #[must_use]
    pub fn owner_of(&self, id: &K) -> Option<&O> {
        self.entries.get(id).map(|entry| &entry.owner)
    }

    #[must_use]
    pub fn contains(&self, id: &K) -> bool {
        self.entries.contains_key(id)
    }

    /// Ids owned by `owner`, oldest first
    pub fn owned_by<'a>(&'a self, owner: &O) -> impl DoubleEndedIterator<Item = &'a K> + 'a {
        self.by_owner.get(owner).into_iter().flat_map(IndexSet::iter)
    }

    /// Remove every resource owned by any of `owners`, oldest first per owner
    pub fn remove_owned_by_any(&mut self, owners: &[O]) -> Vec<(K, O, V)> {
        let ids: Vec<K> = owners
            .iter()
            .flat_map(|owner| self.owned_by(owner).cloned().collect::<Vec<_>>())
            .collect();
        self.remove_all(ids)
    }

    /// Remove every resource whose value matches `predicate`
    pub fn remove_where(&mut self, mut predicate: impl FnMut(&V) -> bool) -> Vec<(K, O, V)> {
        let ids: Vec<K> = self
            .entries
            .iter()
            .filter(|(_, entry)| predicate(&entry.value))
            .map(|(id, _)| id.clone())
            .collect();
        self.remove_all(ids)
    }

    fn remove_all(&mut self, ids: Vec<K>) -> Vec<(K, O, V)> {
        ids.into_iter()
            .filter_map(|id| self.remove(&id).map(|(owner, value)| (id, owner, value)))
            .collect()
    }

    /// Iterate `(id, owner, value)` in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&K, &O, &V)> {
        self.entries
            .iter()
            .map(|(id, entry)| (id, &entry.owner, &entry.value))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
