//! Reactive object cache and subscription engine.
//!
//! Many observers of the same logical query share one cache key, one fetch
//! and one cached value. Values update in place as fetches land and as
//! optimistic edits are layered on top of committed data; keys nobody
//! observes are evicted after a grace period.

pub mod backend;
pub mod cache;
pub mod canonical;
pub mod error;
pub mod observable;
pub mod optimistic;
pub mod options;
pub mod query;
pub mod types;

pub use backend::{ActionOutcome, Backend, ObjectRequest, Page, PageRequest};
pub use cache::{CacheKey, Entry, EntryValue, ListData, Store, StoreStats};
pub use error::{ActionError, CacheError, FetchError, QueryError, RefCountError, Result};
pub use observable::{
    ListPayload, ListQuery, ObjectPayload, ObjectQuery, ObservableClient, QuerySubscription,
};
pub use optimistic::{
    apply_action, ApplyActionOptions, OptimisticBuilder, OptimisticLayer, OptimisticOutcome,
};
pub use options::{CacheOptions, InvalidationMode, ObserveListOptions, ObserveOptions};
pub use query::{SortDirection, SortEntry, SortInput};
pub use types::{Entity, EntityRef, PrimaryKey, Status};
