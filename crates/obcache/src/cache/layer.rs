//! Committed entries plus the stack of optimistic layers over them.
//!
//! Reads resolve top-down: the most recently pushed layer holding a key wins,
//! committed ("truth") data is the base. Layers never modify truth; removing
//! a layer simply exposes whatever is beneath it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::entry::Entry;
use super::key::CacheKey;

pub type OptimisticId = u64;

struct Layer {
    id: OptimisticId,
    entries: HashMap<CacheKey, Arc<Entry>>,
}

#[derive(Default)]
pub struct Layers {
    truth: HashMap<CacheKey, Arc<Entry>>,
    /// Bottom to top.
    optimistic: Vec<Layer>,
}

impl Layers {
    pub fn new() -> Self {
        Self::default()
    }

    /// The visible entry for `key`.
    pub fn top(&self, key: &CacheKey) -> Option<&Arc<Entry>> {
        self.optimistic
            .iter()
            .rev()
            .find_map(|layer| layer.entries.get(key))
            .or_else(|| self.truth.get(key))
    }

    pub fn truth(&self, key: &CacheKey) -> Option<&Arc<Entry>> {
        self.truth.get(key)
    }

    /// Whether the visible entry comes from an optimistic layer.
    pub fn is_optimistic(&self, key: &CacheKey) -> bool {
        match (self.top(key), self.truth.get(key)) {
            (Some(top), Some(truth)) => !Arc::ptr_eq(top, truth),
            (Some(_), None) => true,
            _ => false,
        }
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.top(key).is_some()
    }

    /// Write into truth (`layer == None`) or into the given optimistic layer.
    ///
    /// Returns false if the layer no longer exists; the write is dropped.
    pub fn write(&mut self, key: &CacheKey, entry: Arc<Entry>, layer: Option<OptimisticId>) -> bool {
        match layer {
            None => {
                self.truth.insert(key.clone(), entry);
                true
            }
            Some(id) => match self.optimistic.iter_mut().find(|l| l.id == id) {
                Some(layer) => {
                    layer.entries.insert(key.clone(), entry);
                    true
                }
                None => false,
            },
        }
    }

    pub fn push_layer(&mut self, id: OptimisticId) {
        self.optimistic.push(Layer {
            id,
            entries: HashMap::new(),
        });
    }

    pub fn has_layer(&self, id: OptimisticId) -> bool {
        self.optimistic.iter().any(|l| l.id == id)
    }

    /// Keys written by a layer.
    pub fn layer_keys(&self, id: OptimisticId) -> Vec<CacheKey> {
        self.optimistic
            .iter()
            .find(|l| l.id == id)
            .map(|l| l.entries.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Drop a layer. Returns each key it touched with the entry that was
    /// visible for it before removal.
    pub fn remove_layer(&mut self, id: OptimisticId) -> Vec<(CacheKey, Option<Arc<Entry>>)> {
        let keys = self.layer_keys(id);
        let before: Vec<_> = keys
            .into_iter()
            .map(|key| {
                let top = self.top(&key).cloned();
                (key, top)
            })
            .collect();
        self.optimistic.retain(|l| l.id != id);
        before
    }

    /// Forget a key everywhere.
    pub fn remove_key(&mut self, key: &CacheKey) -> Option<Arc<Entry>> {
        for layer in &mut self.optimistic {
            layer.entries.remove(key);
        }
        self.truth.remove(key)
    }

    /// Every key with an entry in truth or any layer.
    pub fn keys(&self) -> Vec<CacheKey> {
        let mut seen: HashSet<&CacheKey> = HashSet::new();
        self.truth
            .keys()
            .chain(self.optimistic.iter().flat_map(|l| l.entries.keys()))
            .filter(|k| seen.insert(*k))
            .cloned()
            .collect()
    }

    pub fn layer_count(&self) -> usize {
        self.optimistic.len()
    }

    pub fn clear(&mut self) {
        self.truth.clear();
        self.optimistic.clear();
    }
}
