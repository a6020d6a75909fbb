//! Field-set canonicalization for `select` lists and derived-property names.

use super::intern::{Canonical, InternTable};

pub struct FieldSetCanonicalizer {
    table: InternTable<Vec<String>>,
    empty: Canonical<Vec<String>>,
}

impl FieldSetCanonicalizer {
    pub fn new() -> Self {
        Self {
            table: InternTable::new(),
            empty: Canonical::detached(Vec::new()),
        }
    }

    /// Sorted, de-duplicated set of field names.
    pub fn canonicalize<I, S>(&self, fields: I) -> Canonical<Vec<String>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut fields: Vec<String> = fields.into_iter().map(|f| f.as_ref().to_string()).collect();
        fields.sort();
        fields.dedup();
        if fields.is_empty() {
            return self.empty.clone();
        }
        self.table.intern(fields.clone(), || fields)
    }

    pub fn empty(&self) -> Canonical<Vec<String>> {
        self.empty.clone()
    }

    pub fn live_forms(&self) -> usize {
        self.table.live_forms()
    }
}

impl Default for FieldSetCanonicalizer {
    fn default() -> Self {
        Self::new()
    }
}
