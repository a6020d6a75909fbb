//! Applying actions: optimistic layer, backend call, reconciliation.

use std::fmt;
use std::future::Future;

use serde_json::Value;
use tracing::{debug, warn};

use crate::backend::ActionOutcome;
use crate::cache::store::Store;
use crate::error::Result;
use crate::types::Status;

use super::builder::OptimisticBuilder;
use super::{OptimisticLayer, OptimisticOutcome};

type OptimisticFn = Box<dyn FnOnce(&mut OptimisticBuilder) + Send>;

#[derive(Default)]
pub struct ApplyActionOptions {
    pub optimistic_update: Option<OptimisticFn>,
}

impl ApplyActionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Describe the action's expected effect so it shows before the backend answers.
    pub fn optimistic(build: impl FnOnce(&mut OptimisticBuilder) + Send + 'static) -> Self {
        Self {
            optimistic_update: Some(Box::new(build)),
        }
    }
}

impl fmt::Debug for ApplyActionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApplyActionOptions")
            .field("optimistic_update", &self.optimistic_update.is_some())
            .finish()
    }
}

/// Removes the layer if the action future is dropped before it resolves.
struct LayerGuard {
    store: Store,
    layer: Option<OptimisticLayer>,
}

impl LayerGuard {
    fn resolve(mut self, outcome: OptimisticOutcome) {
        if let Some(layer) = self.layer.take() {
            self.store.resolve_optimistic(layer, outcome);
        }
    }
}

impl Drop for LayerGuard {
    fn drop(&mut self) {
        if let Some(layer) = self.layer.take() {
            self.store
                .resolve_optimistic(layer, OptimisticOutcome::RolledBack);
        }
    }
}

/// Run `action` against the backend.
///
/// The optimistic layer is pushed before this returns, so observers see it
/// even if the future is never polled. Dropping the future rolls it back.
///
/// On success the returned entities are committed, deletions become
/// tombstones, invalidated types are refetched, and only then is the
/// optimistic layer removed, so observers never see the pre-action state in
/// between. On failure the layer is removed and the error returned.
pub fn apply_action(
    store: &Store,
    action: &str,
    args: Value,
    options: ApplyActionOptions,
) -> impl Future<Output = Result<ActionOutcome>> + Send + 'static {
    let guard = LayerGuard {
        store: store.clone(),
        layer: options
            .optimistic_update
            .map(|build| store.begin_optimistic(build)),
    };
    debug!(action, optimistic = guard.layer.is_some(), "applying action");

    let action = action.to_string();
    let backend = store.backend();
    async move {
        match backend.apply_action(&action, &args).await {
            Ok(outcome) => {
                let store = guard.store.clone();
                store.batch(None, |b| {
                    for entity in outcome.updated.iter().cloned() {
                        b.store_entity(entity, Status::Loaded);
                    }
                    for deleted in &outcome.deleted {
                        b.delete(&deleted.entity_type, &deleted.primary_key);
                    }
                });
                for entity_type in &outcome.invalidated_types {
                    store.invalidate_object_type(entity_type);
                }
                guard.resolve(OptimisticOutcome::Committed);
                debug!(
                    action = action.as_str(),
                    updated = outcome.updated.len(),
                    deleted = outcome.deleted.len(),
                    "action applied"
                );
                Ok(outcome)
            }
            Err(e) => {
                warn!(action = action.as_str(), error = %e, "action failed; rolling back");
                guard.resolve(OptimisticOutcome::RolledBack);
                Err(e.into())
            }
        }
    }
}
