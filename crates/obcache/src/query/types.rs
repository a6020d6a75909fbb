//! Query shape types: where clauses and order-by specifications.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A filter document: `{ field: value }`, `{ field: { $op: operand } }`,
/// combined with `$and`, `$or`, and `$not`.
pub type WhereClause = Value;

// ============================================================================
// Sort Types
// ============================================================================

/// Sort direction for a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }
}

/// A sort specification for a single field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortEntry {
    pub field: String,
    pub direction: SortDirection,
}

impl SortEntry {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Desc,
        }
    }
}

/// Order-by input: either a shorthand field name (ascending) or explicit
/// entries, where an entry without a direction is ignored.
#[derive(Debug, Clone)]
pub enum SortInput {
    /// Single field name, sorts ascending.
    Field(String),
    /// Explicit ordered sort entries.
    Entries(Vec<SortEntry>),
    /// Field/direction pairs as they arrive from loosely-typed callers.
    Partial(Vec<(String, Option<SortDirection>)>),
}

impl From<Vec<SortEntry>> for SortInput {
    fn from(entries: Vec<SortEntry>) -> Self {
        Self::Entries(entries)
    }
}

impl From<&str> for SortInput {
    fn from(field: &str) -> Self {
        Self::Field(field.to_string())
    }
}

/// Normalize sort input to a vec of SortEntry.
pub fn normalize_sort(sort: Option<&SortInput>) -> Vec<SortEntry> {
    match sort {
        None => Vec::new(),
        Some(SortInput::Field(f)) => vec![SortEntry::asc(f.clone())],
        Some(SortInput::Entries(e)) => e.clone(),
        Some(SortInput::Partial(pairs)) => pairs
            .iter()
            .filter_map(|(field, dir)| {
                dir.map(|direction| SortEntry {
                    field: field.clone(),
                    direction,
                })
            })
            .collect(),
    }
}
