//! Optimistic overlays: tentative writes shown ahead of the backend's answer.

pub mod action;
pub mod builder;

pub use action::{apply_action, ApplyActionOptions};
pub use builder::OptimisticBuilder;

use crate::cache::key::CacheKey;
use crate::cache::layer::OptimisticId;

/// A pushed optimistic layer. Hand it back to
/// [`Store::resolve_optimistic`](crate::Store::resolve_optimistic) exactly once.
#[derive(Debug)]
#[must_use = "an optimistic layer stays visible until it is resolved"]
pub struct OptimisticLayer {
    pub id: OptimisticId,
    /// Keys the layer wrote.
    pub keys: Vec<CacheKey>,
}

/// How an optimistic layer ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimisticOutcome {
    /// The authoritative result has been written underneath.
    Committed,
    /// The action failed or was abandoned.
    RolledBack,
}
