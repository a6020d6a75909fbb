//! Cache entries: the value, status and timestamp stored per key.

use std::sync::Arc;

use crate::error::FetchError;
use crate::types::{now_ms, Entity, Status};

use super::key::CacheKey;

/// Members of one list result, as entity keys (never inline data).
#[derive(Debug, Clone, Default)]
pub struct ListData {
    pub members: Vec<CacheKey>,
    pub total_count: Option<u64>,
    /// Token for the next page; `None` once the backend has no more results.
    pub next_page_token: Option<String>,
}

impl ListData {
    pub fn has_more(&self) -> bool {
        self.next_page_token.is_some()
    }
}

/// What a key currently resolves to.
#[derive(Debug, Clone)]
pub enum EntryValue {
    Object(Arc<Entity>),
    List(Arc<ListData>),
    /// The entity is known not to exist (deleted or never found).
    Tombstone,
}

impl EntryValue {
    /// Identity comparison: true when both sides share the same allocation.
    pub fn same(&self, other: &EntryValue) -> bool {
        match (self, other) {
            (Self::Object(a), Self::Object(b)) => Arc::ptr_eq(a, b),
            (Self::List(a), Self::List(b)) => Arc::ptr_eq(a, b),
            (Self::Tombstone, Self::Tombstone) => true,
            _ => false,
        }
    }

    pub fn as_object(&self) -> Option<&Arc<Entity>> {
        match self {
            Self::Object(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&Arc<ListData>> {
        match self {
            Self::List(l) => Some(l),
            _ => None,
        }
    }
}

/// One immutable snapshot of a key's state. The store replaces the whole
/// `Arc<Entry>` on every write, so an entry pointer identifies a version.
#[derive(Debug, Clone)]
pub struct Entry {
    pub value: Option<EntryValue>,
    pub status: Status,
    pub last_updated: i64,
    pub error: Option<FetchError>,
}

impl Entry {
    pub fn init() -> Self {
        Self {
            value: None,
            status: Status::Init,
            last_updated: 0,
            error: None,
        }
    }

    pub fn loaded(value: EntryValue) -> Self {
        Self {
            value: Some(value),
            status: Status::Loaded,
            last_updated: now_ms(),
            error: None,
        }
    }

    /// Same value, different status. Keeps `last_updated`.
    pub fn with_status(&self, status: Status) -> Self {
        Self {
            status,
            error: if status == Status::Error { self.error.clone() } else { None },
            ..self.clone()
        }
    }

    pub fn failed(&self, error: FetchError) -> Self {
        Self {
            status: Status::Error,
            error: Some(error),
            last_updated: now_ms(),
            ..self.clone()
        }
    }

    pub fn object(&self) -> Option<&Arc<Entity>> {
        self.value.as_ref().and_then(EntryValue::as_object)
    }

    pub fn list(&self) -> Option<&Arc<ListData>> {
        self.value.as_ref().and_then(EntryValue::as_list)
    }

    pub fn is_tombstone(&self) -> bool {
        matches!(self.value, Some(EntryValue::Tombstone))
    }

    /// Value identity plus status; what observers can tell apart.
    pub fn same_view(&self, other: &Entry) -> bool {
        let same_value = match (&self.value, &other.value) {
            (Some(a), Some(b)) => a.same(b),
            (None, None) => true,
            _ => false,
        };
        same_value && self.status == other.status && self.error == other.error
    }
}

/// What a store subject broadcasts for one key.
#[derive(Debug, Clone)]
pub struct SubjectPayload {
    pub entry: Arc<Entry>,
    /// True when an optimistic layer, not committed data, supplies `entry`.
    pub is_optimistic: bool,
}
