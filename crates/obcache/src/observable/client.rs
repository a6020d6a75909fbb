//! ObservableClient: the consumer-facing API.
//!
//! # Overview
//!
//! Observers attach through [`ObservableClient::observe_object`] and
//! [`ObservableClient::observe_list`]. Each call retains the query's key for
//! as long as the returned [`QuerySubscription`] is live; unsubscribing gives
//! the reference back after one scheduler turn, so an immediate resubscribe
//! reuses the cached entry and the fetch already in flight.
//!
//! Observers run synchronously on the thread that produced the change. A
//! panicking observer is isolated: the panic is caught and logged, other
//! observers still receive the payload.

use std::fmt;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::error;

use crate::backend::{ActionOutcome, Backend};
use crate::cache::key::CacheKey;
use crate::cache::store::Store;
use crate::canonical::Canonical;
use crate::error::{CacheError, Result};
use crate::optimistic::{self, ApplyActionOptions};
use crate::options::{CacheOptions, ObserveListOptions, ObserveOptions};
use crate::query::types::{SortEntry, SortInput};
use crate::types::PrimaryKey;

use super::helper::SubscriptionHelper;
use super::list_query::{ListPayload, ListQuery};
use super::object_query::{ObjectPayload, ObjectQuery};

// ============================================================================
// Subscription handle
// ============================================================================

/// An owned one-shot closure that detaches an observer when called.
pub type Unsubscribe = Box<dyn FnOnce() + Send + Sync>;

/// A live observation. Dropping it without calling
/// [`unsubscribe`](Self::unsubscribe) leaves the observer attached.
#[must_use = "the observer stays attached until `unsubscribe` is called"]
pub struct QuerySubscription<Q> {
    query: Arc<Q>,
    unsubscribe: Unsubscribe,
}

impl<Q> QuerySubscription<Q> {
    /// The shared query behind this observation.
    pub fn query(&self) -> &Arc<Q> {
        &self.query
    }

    pub fn unsubscribe(self) {
        (self.unsubscribe)();
    }
}

impl QuerySubscription<ListQuery> {
    /// Load the next page of the observed list.
    pub async fn fetch_more(&self) -> Result<()> {
        self.query.fetch_more().await
    }
}

impl<Q> fmt::Debug for QuerySubscription<Q> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuerySubscription").finish_non_exhaustive()
    }
}

fn guarded<T>(observer: impl Fn(&T) + Send + Sync + 'static) -> impl Fn(&T) + Send + Sync + 'static {
    move |payload: &T| {
        if catch_unwind(AssertUnwindSafe(|| observer(payload))).is_err() {
            error!("observer panicked; payload dropped for this observer");
        }
    }
}

// ============================================================================
// ObservableClient
// ============================================================================

#[derive(Clone)]
pub struct ObservableClient {
    store: Store,
    helper: SubscriptionHelper,
}

impl ObservableClient {
    pub fn new(backend: Arc<dyn Backend>, options: CacheOptions) -> Self {
        Self {
            store: Store::new(backend, options),
            helper: SubscriptionHelper::new(),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    fn dedupe(&self, override_ms: Option<u64>) -> Duration {
        override_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.store.options().dedupe_interval())
    }

    fn release_handle(&self, key: CacheKey) -> impl FnOnce() + Send + Sync + 'static {
        let helper = self.helper.clone();
        let store = self.store.downgrade();
        move || {
            if let Some(store) = store.upgrade() {
                helper.release_deferred(&store, &key);
            }
        }
    }

    /// Observe one entity. The observer receives the current payload
    /// immediately and every distinct payload after it.
    pub fn observe_object(
        &self,
        entity_type: &str,
        primary_key: impl Into<PrimaryKey>,
        options: ObserveOptions,
        observer: impl Fn(&ObjectPayload) + Send + Sync + 'static,
    ) -> Result<QuerySubscription<ObjectQuery>> {
        let key = self
            .store
            .object_key(entity_type, primary_key, &options.select);
        let dedupe = self.dedupe(options.dedupe_interval_ms);
        let query = self
            .store
            .object_query(&key, dedupe)
            .ok_or(CacheError::Disposed)?;

        self.helper.acquire(&self.store, &key);
        let id = query.subscribe(guarded(observer));

        let detach_query = Arc::clone(&query);
        let release = self.release_handle(key);
        Ok(QuerySubscription {
            query,
            unsubscribe: Box::new(move || {
                detach_query.unsubscribe(id);
                release();
            }),
        })
    }

    /// Observe a filtered, sorted, paged list of entities.
    pub fn observe_list(
        &self,
        options: ObserveListOptions,
        observer: impl Fn(&ListPayload) + Send + Sync + 'static,
    ) -> Result<QuerySubscription<ListQuery>> {
        let key = self.store.list_key(&options);
        let dedupe = self.dedupe(options.dedupe_interval_ms);
        let query = self
            .store
            .list_query(&key, options.invalidation_mode, dedupe)
            .ok_or(CacheError::Disposed)?;

        self.helper.acquire(&self.store, &key);
        let id = query.subscribe(guarded(observer));

        let detach_query = Arc::clone(&query);
        let release = self.release_handle(key);
        Ok(QuerySubscription {
            query,
            unsubscribe: Box::new(move || {
                detach_query.unsubscribe(id);
                release();
            }),
        })
    }

    /// See [`optimistic::apply_action`]. The optimistic update is visible as
    /// soon as this returns.
    pub fn apply_action(
        &self,
        action: &str,
        args: Value,
        options: ApplyActionOptions,
    ) -> impl Future<Output = Result<ActionOutcome>> + Send + 'static {
        optimistic::apply_action(&self.store, action, args, options)
    }

    pub fn canonicalize_where_clause(&self, clause: Option<&Value>) -> Canonical<Value> {
        self.store.canonicalizers().where_clause.canonicalize(clause)
    }

    pub fn canonicalize_order_by(&self, order_by: Option<&SortInput>) -> Canonical<Vec<SortEntry>> {
        self.store.canonicalizers().order_by.canonicalize(order_by)
    }

    pub fn invalidate_object(&self, entity_type: &str, primary_key: impl Into<PrimaryKey>) -> usize {
        self.store.invalidate_object(entity_type, primary_key)
    }

    pub fn invalidate_object_type(&self, entity_type: &str) -> usize {
        self.store.invalidate_object_type(entity_type)
    }

    pub fn invalidate_all(&self) -> usize {
        self.store.invalidate_all()
    }

    /// Observers of `key` attached through this client.
    pub fn observer_count(&self, key: &CacheKey) -> usize {
        self.helper.observer_count(key)
    }

    pub fn dispose(&self) {
        self.store.dispose();
    }
}
