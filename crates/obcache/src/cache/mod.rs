//! The cache proper: keys, entries, layers and the store that owns them.

pub mod changes;
pub mod entry;
pub mod key;
pub mod layer;
pub mod ref_counts;
pub mod store;
pub mod subject;

pub use entry::{Entry, EntryValue, ListData, SubjectPayload};
pub use key::{CacheKey, KeyKind};
pub use layer::OptimisticId;
pub use store::{Batch, Store, StoreStats};
pub use subject::{ListenerId, Subject};
