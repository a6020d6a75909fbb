//! Configuration: store-wide policy and per-observation options.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::query::types::SortInput;

// ============================================================================
// CacheOptions
// ============================================================================

/// Store-wide policy constants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CacheOptions {
    /// How long an unretained key survives before eviction.
    pub cleanup_grace_ms: u64,
    /// Minimum spacing between non-forced fetches of one key.
    pub dedupe_interval_ms: u64,
    /// Page size for list observations that do not set one.
    pub default_page_size: usize,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            cleanup_grace_ms: 60_000,
            dedupe_interval_ms: 2_000,
            default_page_size: 100,
        }
    }
}

impl CacheOptions {
    /// Parse a JSON configuration document. Missing fields take defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn cleanup_grace(&self) -> Duration {
        Duration::from_millis(self.cleanup_grace_ms)
    }

    pub fn dedupe_interval(&self) -> Duration {
        Duration::from_millis(self.dedupe_interval_ms)
    }
}

// ============================================================================
// Observation options
// ============================================================================

/// Options for observing one entity.
#[derive(Debug, Clone, Default)]
pub struct ObserveOptions {
    /// Fields to load; empty loads the full entity.
    pub select: Vec<String>,
    /// Overrides [`CacheOptions::dedupe_interval_ms`] for this key.
    pub dedupe_interval_ms: Option<u64>,
}

impl ObserveOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn select<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.select = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn dedupe_interval_ms(mut self, ms: u64) -> Self {
        self.dedupe_interval_ms = Some(ms);
        self
    }
}

/// What a list shows while it is being refetched after invalidation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InvalidationMode {
    /// Keep members; status becomes `loading`.
    #[default]
    InPlace,
    /// Keep members and status until the new result lands.
    Wait,
    /// Clear members; status becomes `loading`.
    Reset,
}

/// Options for observing a list of entities.
#[derive(Debug, Clone)]
pub struct ObserveListOptions {
    pub entity_type: String,
    pub where_clause: Option<Value>,
    pub order_by: Option<SortInput>,
    pub page_size: Option<usize>,
    pub invalidation_mode: InvalidationMode,
    /// Derived properties the backend should compute for each member.
    pub with_properties: Vec<String>,
    pub dedupe_interval_ms: Option<u64>,
}

impl ObserveListOptions {
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            where_clause: None,
            order_by: None,
            page_size: None,
            invalidation_mode: InvalidationMode::default(),
            with_properties: Vec::new(),
            dedupe_interval_ms: None,
        }
    }

    pub fn where_clause(mut self, clause: Value) -> Self {
        self.where_clause = Some(clause);
        self
    }

    pub fn order_by(mut self, order_by: impl Into<SortInput>) -> Self {
        self.order_by = Some(order_by.into());
        self
    }

    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size);
        self
    }

    pub fn invalidation_mode(mut self, mode: InvalidationMode) -> Self {
        self.invalidation_mode = mode;
        self
    }

    pub fn with_properties<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.with_properties = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn dedupe_interval_ms(mut self, ms: u64) -> Self {
        self.dedupe_interval_ms = Some(ms);
        self
    }
}
