//! The collaborator the cache loads data from and sends actions to.
//!
//! Transport, retries and query execution live behind this trait; the cache
//! only reacts to the outcome of each call.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{ActionError, FetchError};
use crate::query::types::SortEntry;
use crate::types::{Entity, EntityRef, PrimaryKey};

/// Load one entity, optionally limited to some fields.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectRequest {
    pub entity_type: String,
    pub primary_key: PrimaryKey,
    /// Empty loads every field.
    pub select: Vec<String>,
}

/// Load one page of a list.
#[derive(Debug, Clone, PartialEq)]
pub struct PageRequest {
    pub entity_type: String,
    /// Canonical filter; `{}` for no filter.
    pub where_clause: Value,
    pub order_by: Vec<SortEntry>,
    pub page_size: usize,
    /// `None` for the first page.
    pub page_token: Option<String>,
    pub with_properties: Vec<String>,
}

/// One page of list results.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub data: Vec<Entity>,
    pub next_page_token: Option<String>,
    pub total_count: Option<u64>,
}

/// What the backend reports after applying an action.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionOutcome {
    /// Entities as they stand after the action.
    pub updated: Vec<Entity>,
    pub deleted: Vec<EntityRef>,
    /// Entity types whose cached data must be refetched.
    pub invalidated_types: Vec<String>,
}

#[async_trait]
pub trait Backend: Send + Sync + 'static {
    /// `Ok(None)` means the entity does not exist.
    async fn fetch_object(&self, request: &ObjectRequest) -> Result<Option<Entity>, FetchError>;

    async fn fetch_page(&self, request: &PageRequest) -> Result<Page, FetchError>;

    async fn apply_action(&self, action: &str, args: &Value) -> Result<ActionOutcome, ActionError>;
}
