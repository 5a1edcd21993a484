use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

/// An application data item with a stable identity.
pub trait Identifiable {
    /// The identity entries are keyed by.
    type Id: Clone + Eq + Hash + Send + Sync + 'static;

    /// Returns this item's stable identity.
    fn id(&self) -> Self::Id;
}

/// Indexes a batch of items by their identity.
///
/// Items are moved behind an [`Arc`] untouched; they are never deep-copied or wrapped for
/// change tracking. Later items win on duplicate identities.
pub fn index_by_id<T: Identifiable>(
    items: impl IntoIterator<Item = T>,
) -> HashMap<T::Id, Arc<T>> {
    items
        .into_iter()
        .map(|item| (item.id(), Arc::new(item)))
        .collect()
}

/// Holds fetched entries indexed by identity.
///
/// Merges are additive: a batch overwrites entries whose identity it carries and preserves
/// everything else, so a background refresh can update part of the collection without
/// discarding entries fetched by an earlier batch. Entries persist until the parameters
/// change or the store is explicitly cleared; there is no eviction.
pub struct EntryStore<T: Identifiable> {
    entries: HashMap<T::Id, Arc<T>>,
}

impl<T: Identifiable> Default for EntryStore<T> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<T: Identifiable> EntryStore<T> {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges a batch of items into the store.
    pub fn merge(&mut self, items: impl IntoIterator<Item = T>) {
        self.entries.extend(index_by_id(items));
    }

    /// Removes all entries.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Whether an entry with the given identity exists.
    pub fn contains(&self, id: &T::Id) -> bool {
        self.entries.contains_key(id)
    }

    /// Returns the entry with the given identity, if present.
    pub fn get(&self, id: &T::Id) -> Option<Arc<T>> {
        self.entries.get(id).map(Arc::clone)
    }

    /// All entries, in no guaranteed order.
    pub fn all(&self) -> Vec<Arc<T>> {
        self.entries.values().map(Arc::clone).collect()
    }

    /// The number of entries in the store.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T: Identifiable> fmt::Debug for EntryStore<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryStore")
            .field("entries", &self.entries.len())
            .finish()
    }
}
