//! Entities touched by one store batch, used to update live lists in place.

use std::collections::HashSet;
use std::sync::Arc;

use crate::types::Entity;

use super::key::CacheKey;

#[derive(Debug, Default)]
pub struct Changes {
    /// Entities written for the first time.
    pub added: Vec<Arc<Entity>>,
    /// Entities whose value changed.
    pub modified: Vec<Arc<Entity>>,
    /// Object keys that became tombstones.
    pub deleted: Vec<CacheKey>,
    /// Lists written directly; these are not re-evaluated locally.
    pub lists: HashSet<CacheKey>,
}

impl Changes {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }

    /// Entity types touched by this batch.
    pub fn entity_types(&self) -> HashSet<&str> {
        self.added
            .iter()
            .chain(&self.modified)
            .map(|e| e.entity_type.as_str())
            .chain(self.deleted.iter().map(CacheKey::entity_type))
            .collect()
    }
}
