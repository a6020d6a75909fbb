//! Identity-stable cache keys.
//!
//! A [`CacheKey`] is built through the [`CacheKeys`] registry, which hands out
//! the same `Arc` for structurally equal descriptors as long as any clone is
//! alive. Everything downstream (store maps, change detection) compares keys
//! by pointer.

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::Value;

use crate::canonical::Canonical;
use crate::query::types::SortEntry;
use crate::types::PrimaryKey;

// ============================================================================
// Key descriptors
// ============================================================================

/// The structural descriptor behind a key. Canonical parts hash by identity,
/// so equal descriptors are cheap to look up.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyKind {
    Object {
        entity_type: String,
        primary_key: PrimaryKey,
        select: Canonical<Vec<String>>,
    },
    List {
        entity_type: String,
        where_clause: Canonical<Value>,
        order_by: Canonical<Vec<SortEntry>>,
        page_size: usize,
        with_properties: Canonical<Vec<String>>,
    },
}

struct KeyInner {
    kind: KeyKind,
    registry: Weak<Mutex<Registry>>,
}

impl Drop for KeyInner {
    fn drop(&mut self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let mut registry = registry.lock();
        registry.forget(&self.kind);
    }
}

// ============================================================================
// CacheKey
// ============================================================================

/// Handle to one cacheable unit: a single entity or a list result set.
#[derive(Clone)]
pub struct CacheKey(Arc<KeyInner>);

impl CacheKey {
    pub fn kind(&self) -> &KeyKind {
        &self.0.kind
    }

    pub fn entity_type(&self) -> &str {
        match &self.0.kind {
            KeyKind::Object { entity_type, .. } | KeyKind::List { entity_type, .. } => entity_type,
        }
    }

    pub fn is_object(&self) -> bool {
        matches!(self.0.kind, KeyKind::Object { .. })
    }

    pub fn is_list(&self) -> bool {
        matches!(self.0.kind, KeyKind::List { .. })
    }

    pub fn primary_key(&self) -> Option<&PrimaryKey> {
        match &self.0.kind {
            KeyKind::Object { primary_key, .. } => Some(primary_key),
            KeyKind::List { .. } => None,
        }
    }

    /// Selected fields of an object key; empty means the full entity.
    pub fn select(&self) -> &[String] {
        match &self.0.kind {
            KeyKind::Object { select, .. } => select.as_slice(),
            KeyKind::List { .. } => &[],
        }
    }

    pub fn where_clause(&self) -> Option<&Value> {
        match &self.0.kind {
            KeyKind::List { where_clause, .. } => Some(where_clause.get()),
            KeyKind::Object { .. } => None,
        }
    }

    pub fn order_by(&self) -> &[SortEntry] {
        match &self.0.kind {
            KeyKind::List { order_by, .. } => order_by.as_slice(),
            KeyKind::Object { .. } => &[],
        }
    }

    pub fn page_size(&self) -> Option<usize> {
        match &self.0.kind {
            KeyKind::List { page_size, .. } => Some(*page_size),
            KeyKind::Object { .. } => None,
        }
    }

    pub fn with_properties(&self) -> &[String] {
        match &self.0.kind {
            KeyKind::List { with_properties, .. } => with_properties.as_slice(),
            KeyKind::Object { .. } => &[],
        }
    }

    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }

    fn downgrade(&self) -> Weak<KeyInner> {
        Arc::downgrade(&self.0)
    }
}

impl PartialEq for CacheKey {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for CacheKey {}

impl Hash for CacheKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.0) as usize).hash(state);
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0.kind {
            KeyKind::Object {
                entity_type,
                primary_key,
                select,
            } => {
                write!(f, "object:{entity_type}:{primary_key}")?;
                if !select.is_empty() {
                    write!(f, "[{}]", select.join(","))?;
                }
                Ok(())
            }
            KeyKind::List {
                entity_type,
                where_clause,
                order_by,
                page_size,
                with_properties,
            } => {
                write!(f, "list:{entity_type}:{}", where_clause.get())?;
                for entry in order_by.iter() {
                    write!(f, ":{}.{}", entry.field, entry.direction.as_str())?;
                }
                write!(f, ":{page_size}")?;
                if !with_properties.is_empty() {
                    write!(f, "[{}]", with_properties.join(","))?;
                }
                Ok(())
            }
        }
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CacheKey({self})")
    }
}

// ============================================================================
// Registry
// ============================================================================

#[derive(Default)]
struct Registry {
    by_kind: HashMap<KeyKind, Weak<KeyInner>>,
    /// Every object key (any selection) per entity, for write propagation.
    by_entity: HashMap<(String, PrimaryKey), Vec<Weak<KeyInner>>>,
}

impl Registry {
    fn forget(&mut self, kind: &KeyKind) {
        if self.by_kind.get(kind).is_some_and(|w| w.strong_count() == 0) {
            self.by_kind.remove(kind);
        }
        if let KeyKind::Object {
            entity_type,
            primary_key,
            ..
        } = kind
        {
            let id = (entity_type.clone(), primary_key.clone());
            if let Some(keys) = self.by_entity.get_mut(&id) {
                keys.retain(|w| w.strong_count() > 0);
                if keys.is_empty() {
                    self.by_entity.remove(&id);
                }
            }
        }
    }
}

/// Interns [`CacheKey`]s by descriptor.
pub struct CacheKeys {
    registry: Arc<Mutex<Registry>>,
}

impl CacheKeys {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry::default())),
        }
    }

    /// The live key for `kind`, created if none exists.
    pub fn get(&self, kind: KeyKind) -> CacheKey {
        let mut registry = self.registry.lock();
        if let Some(live) = registry.by_kind.get(&kind).and_then(Weak::upgrade) {
            return CacheKey(live);
        }

        let key = CacheKey(Arc::new(KeyInner {
            kind: kind.clone(),
            registry: Arc::downgrade(&self.registry),
        }));
        if let KeyKind::Object {
            entity_type,
            primary_key,
            ..
        } = &kind
        {
            registry
                .by_entity
                .entry((entity_type.clone(), primary_key.clone()))
                .or_default()
                .push(key.downgrade());
        }
        registry.by_kind.insert(kind, key.downgrade());
        key
    }

    /// Every live object key for an entity, across all field selections.
    pub fn object_keys_for(&self, entity_type: &str, primary_key: &PrimaryKey) -> Vec<CacheKey> {
        let registry = self.registry.lock();
        registry
            .by_entity
            .get(&(entity_type.to_string(), primary_key.clone()))
            .map(|keys| keys.iter().filter_map(Weak::upgrade).map(CacheKey).collect())
            .unwrap_or_default()
    }

    /// Number of keys currently alive.
    pub fn live_count(&self) -> usize {
        self.registry
            .lock()
            .by_kind
            .values()
            .filter(|w| w.strong_count() > 0)
            .count()
    }
}

impl Default for CacheKeys {
    fn default() -> Self {
        Self::new()
    }
}
