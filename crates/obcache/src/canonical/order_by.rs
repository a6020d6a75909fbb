//! Order-by canonicalization: an ordered `(field, direction)` list.

use std::collections::HashSet;

use super::intern::{Canonical, InternTable};
use crate::query::types::{normalize_sort, SortEntry, SortInput};

pub struct OrderByCanonicalizer {
    table: InternTable<Vec<SortEntry>>,
    empty: Canonical<Vec<SortEntry>>,
}

impl OrderByCanonicalizer {
    pub fn new() -> Self {
        Self {
            table: InternTable::new(),
            empty: Canonical::detached(Vec::new()),
        }
    }

    /// Entries without a direction are dropped, as are later repeats of a
    /// field (they can never decide an ordering).
    pub fn canonicalize(&self, order_by: Option<&SortInput>) -> Canonical<Vec<SortEntry>> {
        let mut seen = HashSet::new();
        let entries: Vec<SortEntry> = normalize_sort(order_by)
            .into_iter()
            .filter(|e| seen.insert(e.field.clone()))
            .collect();
        if entries.is_empty() {
            return self.empty.clone();
        }

        let tokens = entries
            .iter()
            .flat_map(|e| [e.field.clone(), e.direction.as_str().to_string()])
            .collect();
        self.table.intern(tokens, || entries)
    }

    pub fn empty(&self) -> Canonical<Vec<SortEntry>> {
        self.empty.clone()
    }

    pub fn live_forms(&self) -> usize {
        self.table.live_forms()
    }
}

impl Default for OrderByCanonicalizer {
    fn default() -> Self {
        Self::new()
    }
}
