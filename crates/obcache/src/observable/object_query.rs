//! ObjectQuery: the observable view of one entity key.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::backend::ObjectRequest;
use crate::cache::entry::{Entry, EntryValue, SubjectPayload};
use crate::cache::key::CacheKey;
use crate::cache::store::{spawn, Store, WeakStore};
use crate::cache::subject::{ListenerId, Subject};
use crate::error::FetchError;
use crate::types::{Entity, Status};

use super::query::FetchGate;

// ============================================================================
// Payload
// ============================================================================

/// What observers of an entity receive.
#[derive(Debug, Clone)]
pub struct ObjectPayload {
    /// `None` while nothing is loaded, or when the entity does not exist.
    pub object: Option<Arc<Entity>>,
    pub status: Status,
    pub last_updated: i64,
    pub is_optimistic: bool,
    pub error: Option<FetchError>,
}

impl ObjectPayload {
    pub(crate) fn from_store(payload: &SubjectPayload) -> Self {
        let entry = &payload.entry;
        Self {
            object: entry.object().cloned(),
            status: entry.status,
            last_updated: entry.last_updated,
            is_optimistic: payload.is_optimistic,
            error: entry.error.clone(),
        }
    }

    /// Observers cannot tell the two apart: same entity allocation, status,
    /// optimism and error.
    pub(crate) fn same_as(&self, other: &ObjectPayload) -> bool {
        let same_object = match (&self.object, &other.object) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        };
        same_object
            && self.status == other.status
            && self.is_optimistic == other.is_optimistic
            && self.error == other.error
    }
}

// ============================================================================
// ObjectQuery
// ============================================================================

pub struct ObjectQuery {
    store: WeakStore,
    key: CacheKey,
    dedupe: Duration,
    gate: Mutex<FetchGate>,
    output: Subject<ObjectPayload>,
    upstream: Mutex<Option<(Arc<Subject<SubjectPayload>>, ListenerId)>>,
}

impl ObjectQuery {
    pub(crate) fn new(store: WeakStore, key: CacheKey, dedupe: Duration) -> Self {
        Self {
            store,
            key,
            dedupe,
            gate: Mutex::new(FetchGate::new()),
            output: Subject::new(),
            upstream: Mutex::new(None),
        }
    }

    /// Start following the store subject for this key.
    pub(crate) fn connect(self: &Arc<Self>, store: &Store) {
        let Some(subject) = store.subject(&self.key) else {
            return;
        };
        let weak = Arc::downgrade(self);
        let id = subject.subscribe(move |payload: &SubjectPayload| {
            if let Some(query) = weak.upgrade() {
                query.on_entry(payload);
            }
        });
        *self.upstream.lock() = Some((subject, id));
    }

    fn on_entry(&self, payload: &SubjectPayload) {
        let next = ObjectPayload::from_store(payload);
        if self.output.value().is_some_and(|last| last.same_as(&next)) {
            return;
        }
        self.output.next(next);
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// The latest payload, if any has been produced.
    pub fn current(&self) -> Option<ObjectPayload> {
        self.output.value()
    }

    pub fn subscribe(&self, observer: impl Fn(&ObjectPayload) + Send + Sync + 'static) -> ListenerId {
        self.output.subscribe(observer)
    }

    pub fn unsubscribe(&self, id: ListenerId) {
        self.output.unsubscribe(id);
    }

    pub fn observer_count(&self) -> usize {
        self.output.observer_count()
    }

    // -----------------------------------------------------------------------
    // Fetching
    // -----------------------------------------------------------------------

    /// Fetch the entity unless a fetch is running or ran within the dedupe
    /// interval. `force` always starts a new fetch, superseding any running one.
    pub fn revalidate(self: &Arc<Self>, force: bool) {
        let Some(store) = self.store.upgrade() else {
            return;
        };
        let Some(primary_key) = self.key.primary_key().cloned() else {
            return;
        };
        let Some(generation) = self.gate.lock().try_begin(force, self.dedupe) else {
            trace!(key = %self.key, "fetch deduplicated");
            return;
        };

        store.set_status(&self.key, Status::Loading);
        store.record_fetch();
        debug!(key = %self.key, force, "fetching object");

        let request = ObjectRequest {
            entity_type: self.key.entity_type().to_string(),
            primary_key,
            select: self.key.select().to_vec(),
        };
        let backend = store.backend();
        let this = Arc::clone(self);
        let spawned = spawn(async move {
            let result = backend.fetch_object(&request).await;
            this.finish(generation, result);
        });
        if !spawned {
            self.finish(generation, Err(FetchError::NoRuntime));
        }
    }

    fn finish(&self, generation: u64, result: Result<Option<Entity>, FetchError>) {
        if !self.gate.lock().finish(generation) {
            trace!(key = %self.key, "superseded fetch result dropped");
            return;
        }
        let Some(store) = self.store.upgrade() else {
            return;
        };
        let key = &self.key;

        match result {
            Ok(Some(entity)) => {
                debug!(key = %key, "object loaded");
                store.batch(None, |b| b.store_object(key, entity, Status::Loaded));
            }
            Ok(None) => {
                debug!(key = %key, "object not found");
                store.batch(None, |b| {
                    match key.primary_key() {
                        Some(pk) if key.select().is_empty() => b.delete(key.entity_type(), pk),
                        _ => b.write(key, Entry::loaded(EntryValue::Tombstone)),
                    }
                    b.set_status(key, Status::Loaded);
                });
            }
            Err(e) => {
                warn!(key = %key, error = %e, "object fetch failed");
                store.write_error(key, e);
            }
        }
    }

    /// Stop following the store and drop all observers.
    pub(crate) fn dispose(&self) {
        self.gate.lock().cancel();
        if let Some((subject, id)) = self.upstream.lock().take() {
            subject.unsubscribe(id);
        }
        self.output.complete();
    }
}
