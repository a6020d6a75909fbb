//! Store: the single owner of entries, subjects, reference counts,
//! optimistic layers and the queries attached to each key.
//!
//! # Threading model
//!
//! `Store` is a cheap `Clone` handle (`Arc` inside) and is `Send + Sync`.
//! All mutable state sits behind one `parking_lot::Mutex`. The rule is that
//! the lock is never held while anything outside the store runs: subject
//! emissions, query callbacks and list maintenance all happen after the
//! guard is dropped, from snapshots taken under it.
//!
//! Lock order, when nested: store state, then the key registry, then the
//! canonical tables. Neither of the latter ever calls back into the store.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, error, trace, warn};

use crate::backend::Backend;
use crate::canonical::Canonicalizers;
use crate::error::{FetchError, RefCountError};
use crate::observable::list_query::ListQuery;
use crate::observable::object_query::ObjectQuery;
use crate::optimistic::{OptimisticBuilder, OptimisticLayer, OptimisticOutcome};
use crate::options::{CacheOptions, InvalidationMode, ObserveListOptions};
use crate::types::{now_ms, Entity, PrimaryKey, Status};

use super::changes::Changes;
use super::entry::{Entry, EntryValue, ListData, SubjectPayload};
use super::key::{CacheKey, CacheKeys, KeyKind};
use super::layer::{Layers, OptimisticId};
use super::ref_counts::{CleanupTicket, RefCounts, Released, Retained};
use super::subject::Subject;

// ============================================================================
// Stats
// ============================================================================

/// Lifetime counters, for diagnostics and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub retains: u64,
    pub releases: u64,
    pub fetches: u64,
    pub evictions: u64,
    pub layers_pushed: u64,
    pub layers_removed: u64,
}

#[derive(Default)]
struct Counters {
    retains: AtomicU64,
    releases: AtomicU64,
    fetches: AtomicU64,
    evictions: AtomicU64,
    layers_pushed: AtomicU64,
    layers_removed: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

// ============================================================================
// Internal state
// ============================================================================

/// The query attached to a key. At most one per key.
#[derive(Clone)]
pub(crate) enum QueryHandle {
    Object(Arc<ObjectQuery>),
    List(Arc<ListQuery>),
}

impl QueryHandle {
    fn revalidate(&self, force: bool) {
        match self {
            Self::Object(q) => q.revalidate(force),
            Self::List(q) => q.revalidate(force),
        }
    }

    fn dispose(&self) {
        match self {
            Self::Object(q) => q.dispose(),
            Self::List(q) => q.dispose(),
        }
    }
}

type Emission = (Arc<Subject<SubjectPayload>>, SubjectPayload);

struct StoreState {
    layers: Layers,
    subjects: HashMap<CacheKey, Arc<Subject<SubjectPayload>>>,
    queries: HashMap<CacheKey, QueryHandle>,
    ref_counts: RefCounts,
    next_optimistic_id: OptimisticId,
    disposed: bool,
}

impl StoreState {
    fn payload(&self, key: &CacheKey) -> Option<SubjectPayload> {
        self.layers.top(key).map(|entry| SubjectPayload {
            entry: Arc::clone(entry),
            is_optimistic: self.layers.is_optimistic(key),
        })
    }

    /// Create the entry and subject for `key` if missing. Returns true if
    /// the entry was created.
    fn ensure_entry(&mut self, key: &CacheKey) -> bool {
        let created = !self.layers.contains(key);
        if created {
            self.layers.write(key, Arc::new(Entry::init()), None);
        }
        if !self.subjects.contains_key(key) {
            let subject = match self.payload(key) {
                Some(payload) => Subject::with_value(payload),
                None => Subject::new(),
            };
            self.subjects.insert(key.clone(), Arc::new(subject));
        }
        created
    }

    /// Emissions for every key whose visible entry differs from `before`.
    fn emissions(&self, before: Vec<(CacheKey, Option<Arc<Entry>>)>) -> Vec<Emission> {
        before
            .into_iter()
            .filter_map(|(key, old)| {
                let changed = match (old.as_ref(), self.layers.top(&key)) {
                    (Some(a), Some(b)) => !Arc::ptr_eq(a, b),
                    (None, None) => false,
                    _ => true,
                };
                if !changed {
                    return None;
                }
                let subject = self.subjects.get(&key)?;
                // A key whose only entry was optimistic falls back to `init`.
                let payload = self.payload(&key).unwrap_or_else(|| SubjectPayload {
                    entry: Arc::new(Entry::init()),
                    is_optimistic: false,
                });
                Some((Arc::clone(subject), payload))
            })
            .collect()
    }
}

pub(crate) struct StoreInner {
    state: Mutex<StoreState>,
    options: CacheOptions,
    backend: Arc<dyn Backend>,
    keys: CacheKeys,
    canonical: Canonicalizers,
    counters: Counters,
}

impl StoreInner {
    fn base_key(&self, entity_type: &str, primary_key: &PrimaryKey) -> CacheKey {
        self.keys.get(KeyKind::Object {
            entity_type: entity_type.to_string(),
            primary_key: primary_key.clone(),
            select: self.canonical.field_set.empty(),
        })
    }
}

/// Spawn onto the ambient tokio runtime. Returns false when there is none.
pub(crate) fn spawn<F>(future: F) -> bool
where
    F: Future<Output = ()> + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(future);
            true
        }
        Err(_) => false,
    }
}

// ============================================================================
// Store
// ============================================================================

#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

/// Non-owning store handle held by queries and timers.
#[derive(Clone)]
pub(crate) struct WeakStore(Weak<StoreInner>);

impl WeakStore {
    pub(crate) fn upgrade(&self) -> Option<Store> {
        self.0.upgrade().map(|inner| Store { inner })
    }
}

impl Store {
    pub fn new(backend: Arc<dyn Backend>, options: CacheOptions) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                state: Mutex::new(StoreState {
                    layers: Layers::new(),
                    subjects: HashMap::new(),
                    queries: HashMap::new(),
                    ref_counts: RefCounts::new(),
                    next_optimistic_id: 0,
                    disposed: false,
                }),
                options,
                backend,
                keys: CacheKeys::new(),
                canonical: Canonicalizers::new(),
                counters: Counters::default(),
            }),
        }
    }

    pub(crate) fn downgrade(&self) -> WeakStore {
        WeakStore(Arc::downgrade(&self.inner))
    }

    pub fn options(&self) -> &CacheOptions {
        &self.inner.options
    }

    pub(crate) fn backend(&self) -> Arc<dyn Backend> {
        Arc::clone(&self.inner.backend)
    }

    pub fn canonicalizers(&self) -> &Canonicalizers {
        &self.inner.canonical
    }

    // -----------------------------------------------------------------------
    // Keys
    // -----------------------------------------------------------------------

    pub fn object_key(
        &self,
        entity_type: &str,
        primary_key: impl Into<PrimaryKey>,
        select: &[String],
    ) -> CacheKey {
        self.inner.keys.get(KeyKind::Object {
            entity_type: entity_type.to_string(),
            primary_key: primary_key.into(),
            select: self.inner.canonical.field_set.canonicalize(select),
        })
    }

    pub fn list_key(&self, options: &ObserveListOptions) -> CacheKey {
        let canonical = &self.inner.canonical;
        self.inner.keys.get(KeyKind::List {
            entity_type: options.entity_type.clone(),
            where_clause: canonical.where_clause.canonicalize(options.where_clause.as_ref()),
            order_by: canonical.order_by.canonicalize(options.order_by.as_ref()),
            page_size: options
                .page_size
                .unwrap_or(self.inner.options.default_page_size),
            with_properties: canonical.field_set.canonicalize(&options.with_properties),
        })
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// The visible entry, optimistic layers included.
    pub fn get(&self, key: &CacheKey) -> Option<Arc<Entry>> {
        self.inner.state.lock().layers.top(key).cloned()
    }

    /// The committed entry, ignoring optimistic layers.
    pub fn get_committed(&self, key: &CacheKey) -> Option<Arc<Entry>> {
        self.inner.state.lock().layers.truth(key).cloned()
    }

    pub fn is_optimistic(&self, key: &CacheKey) -> bool {
        self.inner.state.lock().layers.is_optimistic(key)
    }

    /// The subject for `key`, creating an `init` entry if needed.
    pub(crate) fn subject(&self, key: &CacheKey) -> Option<Arc<Subject<SubjectPayload>>> {
        let mut state = self.inner.state.lock();
        if state.disposed {
            return None;
        }
        state.ensure_entry(key);
        state.subjects.get(key).cloned()
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Run `f` against the store state, then broadcast every key whose
    /// visible entry changed and update live lists from the entities written.
    ///
    /// `layer` selects committed data (`None`) or an optimistic layer. `f`
    /// runs under the store lock and must not call back into the store.
    pub fn batch<R>(&self, layer: Option<OptimisticId>, f: impl FnOnce(&mut Batch<'_>) -> R) -> R {
        let (result, emissions, orphans, lists, changes) = {
            let mut state = self.inner.state.lock();
            let mut batch = Batch {
                inner: &*self.inner,
                state: &mut *state,
                layer,
                touched: Vec::new(),
                seen: HashSet::new(),
                changes: Changes::default(),
                orphans: Vec::new(),
            };
            let result = f(&mut batch);
            let Batch {
                touched,
                changes,
                orphans,
                ..
            } = batch;

            let emissions = state.emissions(touched);
            let lists: Vec<Arc<ListQuery>> = if changes.is_empty() {
                Vec::new()
            } else {
                let types = changes.entity_types();
                state
                    .queries
                    .iter()
                    .filter(|(key, _)| {
                        types.contains(key.entity_type()) && !changes.lists.contains(*key)
                    })
                    .filter_map(|(_, query)| match query {
                        QueryHandle::List(q) => Some(Arc::clone(q)),
                        QueryHandle::Object(_) => None,
                    })
                    .collect()
            };
            (result, emissions, orphans, lists, changes)
        };

        emit(emissions);
        for (key, ticket) in orphans {
            self.schedule_cleanup(key, ticket);
        }
        for list in lists {
            list.maybe_update(&changes, layer);
        }
        result
    }

    /// Replace the committed entry for `key`.
    pub fn write(&self, key: &CacheKey, value: Option<EntryValue>, status: Status) {
        self.batch(None, |b| {
            b.write(
                key,
                Entry {
                    value,
                    status,
                    last_updated: now_ms(),
                    error: None,
                },
            )
        });
    }

    pub fn set_status(&self, key: &CacheKey, status: Status) {
        self.batch(None, |b| b.set_status(key, status));
    }

    pub fn write_error(&self, key: &CacheKey, error: FetchError) {
        self.batch(None, |b| b.write_error(key, error));
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Take a reference on `key`, creating its entry if needed and asking the
    /// attached query (if any) to fetch. A pending cleanup is cancelled.
    pub fn retain(&self, key: &CacheKey) {
        self.retain_inner(key, true);
    }

    /// Like [`Store::retain`] but never triggers a fetch. Used for list
    /// members, whose data arrives with the list.
    pub fn retain_without_fetch(&self, key: &CacheKey) {
        self.retain_inner(key, false);
    }

    fn retain_inner(&self, key: &CacheKey, fetch: bool) {
        let query = {
            let mut state = self.inner.state.lock();
            if state.disposed {
                return;
            }
            let retained = state.ref_counts.retain(key);
            let created = state.ensure_entry(key);
            match retained {
                Retained::Revived => debug!(key = %key, "retain cancelled pending cleanup"),
                Retained::Fresh if created => trace!(key = %key, "entry created"),
                _ => {}
            }
            if fetch {
                state.queries.get(key).cloned()
            } else {
                None
            }
        };
        bump(&self.inner.counters.retains);
        if let Some(query) = query {
            query.revalidate(false);
        }
    }

    /// Drop a reference on `key`. The last release schedules eviction after
    /// the grace period.
    ///
    /// Releasing a key that is not retained is a reference-counting bug in the
    /// caller: it is logged, and panics in debug builds.
    pub fn release(&self, key: &CacheKey) {
        if let Err(e) = self.try_release(key) {
            error!(key = %key, "{e}");
            debug_assert!(false, "{e}");
        }
    }

    pub fn try_release(&self, key: &CacheKey) -> Result<(), RefCountError> {
        let released = {
            let mut state = self.inner.state.lock();
            if state.disposed {
                return Ok(());
            }
            state.ref_counts.release(key)?
        };
        bump(&self.inner.counters.releases);
        if let Released::ScheduleCleanup(ticket) = released {
            self.schedule_cleanup(key.clone(), ticket);
        }
        Ok(())
    }

    fn schedule_cleanup(&self, key: CacheKey, ticket: CleanupTicket) {
        let grace = self.inner.options.cleanup_grace();
        debug!(key = %key, grace_ms = grace.as_millis() as u64, "cleanup scheduled");

        let weak = self.downgrade();
        let task_key = key.clone();
        let spawned = spawn(async move {
            tokio::time::sleep(grace).await;
            if let Some(store) = weak.upgrade() {
                store.run_cleanup(&task_key, ticket);
            }
        });
        if !spawned {
            warn!(key = %key, "no runtime for cleanup timer; evicting now");
            self.run_cleanup(&key, ticket);
        }
    }

    fn run_cleanup(&self, key: &CacheKey, ticket: CleanupTicket) {
        let (entry, subject, query) = {
            let mut state = self.inner.state.lock();
            if state.disposed || !state.ref_counts.take_cleanup(key, ticket) {
                return;
            }
            (
                state.layers.remove_key(key),
                state.subjects.remove(key),
                state.queries.remove(key),
            )
        };
        bump(&self.inner.counters.evictions);
        debug!(key = %key, "evicted");

        if let Some(subject) = subject {
            subject.complete();
        }
        if let Some(query) = query {
            query.dispose();
        }
        drop(entry);
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// The object query for `key`, created and connected on first use.
    pub(crate) fn object_query(&self, key: &CacheKey, dedupe: Duration) -> Option<Arc<ObjectQuery>> {
        let (query, created) = {
            let mut state = self.inner.state.lock();
            if state.disposed {
                return None;
            }
            state.ensure_entry(key);
            match state.queries.get(key) {
                Some(QueryHandle::Object(q)) => (Arc::clone(q), false),
                _ => {
                    let q = Arc::new(ObjectQuery::new(self.downgrade(), key.clone(), dedupe));
                    state
                        .queries
                        .insert(key.clone(), QueryHandle::Object(Arc::clone(&q)));
                    (q, true)
                }
            }
        };
        if created {
            query.connect(self);
        }
        Some(query)
    }

    /// The list query for `key`, created and connected on first use. A live
    /// query keeps the options it was created with.
    pub(crate) fn list_query(
        &self,
        key: &CacheKey,
        mode: InvalidationMode,
        dedupe: Duration,
    ) -> Option<Arc<ListQuery>> {
        let (query, created) = {
            let mut state = self.inner.state.lock();
            if state.disposed {
                return None;
            }
            state.ensure_entry(key);
            match state.queries.get(key) {
                Some(QueryHandle::List(q)) => (Arc::clone(q), false),
                _ => {
                    let q = Arc::new(ListQuery::new(self.downgrade(), key.clone(), mode, dedupe));
                    state
                        .queries
                        .insert(key.clone(), QueryHandle::List(Arc::clone(&q)));
                    (q, true)
                }
            }
        };
        if created {
            query.connect(self);
        }
        Some(query)
    }

    pub(crate) fn record_fetch(&self) {
        bump(&self.inner.counters.fetches);
    }

    // -----------------------------------------------------------------------
    // Optimistic layers
    // -----------------------------------------------------------------------

    /// Push a new optimistic layer and apply the builder's writes to it.
    /// The writes are visible as soon as this returns.
    pub fn begin_optimistic(&self, build: impl FnOnce(&mut OptimisticBuilder)) -> OptimisticLayer {
        let mut builder = OptimisticBuilder::new();
        build(&mut builder);

        let id = {
            let mut state = self.inner.state.lock();
            state.next_optimistic_id += 1;
            let id = state.next_optimistic_id;
            state.layers.push_layer(id);
            id
        };
        bump(&self.inner.counters.layers_pushed);

        self.batch(Some(id), |b| builder.apply(b));
        let keys = self.inner.state.lock().layers.layer_keys(id);
        debug!(layer = id, keys = keys.len(), "optimistic layer pushed");
        OptimisticLayer { id, keys }
    }

    /// Remove an optimistic layer, re-broadcasting every key it covered.
    ///
    /// Committed data is never touched: on success the authoritative writes
    /// have already landed underneath, on failure there is nothing to undo.
    pub fn resolve_optimistic(&self, layer: OptimisticLayer, outcome: OptimisticOutcome) {
        let emissions = {
            let mut state = self.inner.state.lock();
            if !state.layers.has_layer(layer.id) {
                return;
            }
            let before = state.layers.remove_layer(layer.id);
            state.emissions(before)
        };
        bump(&self.inner.counters.layers_removed);
        debug!(layer = layer.id, ?outcome, changed = emissions.len(), "optimistic layer removed");
        emit(emissions);
    }

    // -----------------------------------------------------------------------
    // Invalidation
    // -----------------------------------------------------------------------

    /// Force a refetch of every observed key for one entity. Returns the
    /// number of queries revalidated.
    pub fn invalidate_object(&self, entity_type: &str, primary_key: impl Into<PrimaryKey>) -> usize {
        let keys = self
            .inner
            .keys
            .object_keys_for(entity_type, &primary_key.into());
        let queries: Vec<QueryHandle> = {
            let state = self.inner.state.lock();
            keys.iter()
                .filter_map(|k| state.queries.get(k).cloned())
                .collect()
        };
        debug!(entity_type, count = queries.len(), "invalidate object");
        revalidate_all(queries)
    }

    /// Force a refetch of every observed object and list of a type.
    pub fn invalidate_object_type(&self, entity_type: &str) -> usize {
        let queries = self.queries_where(|key| key.entity_type() == entity_type);
        debug!(entity_type, count = queries.len(), "invalidate type");
        revalidate_all(queries)
    }

    /// Force a refetch of every observed key.
    pub fn invalidate_all(&self) -> usize {
        let queries = self.queries_where(|_| true);
        debug!(count = queries.len(), "invalidate all");
        revalidate_all(queries)
    }

    fn queries_where(&self, pred: impl Fn(&CacheKey) -> bool) -> Vec<QueryHandle> {
        let state = self.inner.state.lock();
        state
            .queries
            .iter()
            .filter(|(key, _)| pred(key))
            .map(|(_, q)| q.clone())
            .collect()
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    pub fn stats(&self) -> StoreStats {
        let c = &self.inner.counters;
        StoreStats {
            retains: c.retains.load(Ordering::Relaxed),
            releases: c.releases.load(Ordering::Relaxed),
            fetches: c.fetches.load(Ordering::Relaxed),
            evictions: c.evictions.load(Ordering::Relaxed),
            layers_pushed: c.layers_pushed.load(Ordering::Relaxed),
            layers_removed: c.layers_removed.load(Ordering::Relaxed),
        }
    }

    pub fn ref_count(&self, key: &CacheKey) -> usize {
        self.inner.state.lock().ref_counts.count(key)
    }

    pub fn is_pending_cleanup(&self, key: &CacheKey) -> bool {
        self.inner.state.lock().ref_counts.is_pending(key)
    }

    /// Number of keys holding an entry.
    pub fn live_key_count(&self) -> usize {
        self.inner.state.lock().layers.keys().len()
    }

    pub fn optimistic_layer_count(&self) -> usize {
        self.inner.state.lock().layers.layer_count()
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.state.lock().disposed
    }

    /// Tear down every entry, subject and query. Later calls are no-ops;
    /// fetches still in flight land nowhere.
    pub fn dispose(&self) {
        let (subjects, queries) = {
            let mut state = self.inner.state.lock();
            if state.disposed {
                return;
            }
            state.disposed = true;
            state.layers.clear();
            state.ref_counts.clear();
            let subjects: Vec<_> = state.subjects.drain().map(|(_, s)| s).collect();
            let queries: Vec<_> = state.queries.drain().map(|(_, q)| q).collect();
            (subjects, queries)
        };
        for query in queries {
            query.dispose();
        }
        for subject in subjects {
            subject.complete();
        }
        debug!("store disposed");
    }
}

fn emit(emissions: Vec<Emission>) {
    for (subject, payload) in emissions {
        subject.next(payload);
    }
}

fn revalidate_all(queries: Vec<QueryHandle>) -> usize {
    let count = queries.len();
    for query in queries {
        query.revalidate(true);
    }
    count
}

// ============================================================================
// Batch
// ============================================================================

/// Write access to the store state for the duration of [`Store::batch`].
pub struct Batch<'a> {
    inner: &'a StoreInner,
    state: &'a mut StoreState,
    layer: Option<OptimisticId>,
    /// Keys in first-touch order, with the entry visible before the batch.
    touched: Vec<(CacheKey, Option<Arc<Entry>>)>,
    seen: HashSet<CacheKey>,
    changes: Changes,
    orphans: Vec<(CacheKey, CleanupTicket)>,
}

impl Batch<'_> {
    pub fn layer(&self) -> Option<OptimisticId> {
        self.layer
    }

    /// The visible entry for `key`.
    pub fn read(&self, key: &CacheKey) -> Option<Arc<Entry>> {
        self.state.layers.top(key).cloned()
    }

    pub fn read_committed(&self, key: &CacheKey) -> Option<Arc<Entry>> {
        self.state.layers.truth(key).cloned()
    }

    /// The entry this batch's writes replace: committed data for committed
    /// batches, the visible entry for optimistic ones.
    fn current(&self, key: &CacheKey) -> Option<Arc<Entry>> {
        match self.layer {
            None => self.state.layers.truth(key).cloned(),
            Some(_) => self.state.layers.top(key).cloned(),
        }
    }

    pub fn base_key(&self, entity_type: &str, primary_key: &PrimaryKey) -> CacheKey {
        self.inner.base_key(entity_type, primary_key)
    }

    /// Replace the entry for `key` in this batch's layer.
    pub fn write(&mut self, key: &CacheKey, entry: Entry) {
        if self.state.disposed {
            return;
        }
        if self.seen.insert(key.clone()) {
            let before = self.state.layers.top(key).cloned();
            self.touched.push((key.clone(), before));
        }
        if !self.state.layers.write(key, Arc::new(entry), self.layer) {
            warn!(key = %key, layer = ?self.layer, "write to removed optimistic layer dropped");
            return;
        }
        if !self.state.subjects.contains_key(key) {
            self.state
                .subjects
                .insert(key.clone(), Arc::new(Subject::new()));
        }
        if let Some(ticket) = self.state.ref_counts.track_orphan(key) {
            self.orphans.push((key.clone(), ticket));
        }
    }

    pub fn set_status(&mut self, key: &CacheKey, status: Status) {
        let current = self.current(key);
        if current.as_ref().is_some_and(|e| e.status == status) {
            return;
        }
        let next = match current {
            Some(entry) => entry.with_status(status),
            None => Entry {
                status,
                ..Entry::init()
            },
        };
        self.write(key, next);
    }

    /// Mark `key` failed, keeping whatever value it had.
    pub fn write_error(&mut self, key: &CacheKey, error: FetchError) {
        let next = match self.current(key) {
            Some(entry) => entry.failed(error),
            None => Entry::init().failed(error),
        };
        self.write(key, next);
    }

    /// Write a full entity under its unselected key.
    pub fn store_entity(&mut self, entity: Entity, status: Status) -> CacheKey {
        let key = self.base_key(&entity.entity_type, &entity.primary_key);
        self.store_object(&key, entity, status);
        key
    }

    /// Write an entity under `key`.
    ///
    /// Deep-equal data with the same status is skipped, and deep-equal data is
    /// always stored by the existing `Arc` so observers see a stable reference.
    /// Writing the unselected key also refreshes every live selected key of
    /// the same entity.
    pub fn store_object(&mut self, key: &CacheKey, entity: Entity, status: Status) {
        let current = self.current(key);
        let current_object = current.as_ref().and_then(|e| e.object().cloned());
        let same_data = current_object.as_deref() == Some(&entity);
        if same_data && current.as_ref().is_some_and(|e| e.status == status) {
            return;
        }

        let reusable = if same_data {
            current_object.clone()
        } else {
            let visible = self.read(key).and_then(|e| e.object().cloned());
            visible.filter(|o| **o == entity)
        };
        let entity = reusable.unwrap_or_else(|| Arc::new(entity));

        self.write(
            key,
            Entry {
                value: Some(EntryValue::Object(Arc::clone(&entity))),
                status,
                last_updated: now_ms(),
                error: None,
            },
        );

        if !key.select().is_empty() {
            return;
        }
        if !same_data {
            if current_object.is_some() {
                self.changes.modified.push(Arc::clone(&entity));
            } else {
                self.changes.added.push(Arc::clone(&entity));
            }
        }
        self.propagate(&entity, status);
    }

    fn propagate(&mut self, entity: &Arc<Entity>, status: Status) {
        let selected = self
            .inner
            .keys
            .object_keys_for(&entity.entity_type, &entity.primary_key);
        for key in selected {
            if key.select().is_empty() || !self.state.layers.contains(&key) {
                continue;
            }
            let projected = entity.project(key.select());
            self.store_object(&key, projected, status);
        }
    }

    /// Replace an entity with a tombstone under every live key for it.
    pub fn delete(&mut self, entity_type: &str, primary_key: &PrimaryKey) {
        let base = self.base_key(entity_type, primary_key);
        if self.current(&base).is_some_and(|e| e.is_tombstone()) {
            return;
        }
        for key in self.inner.keys.object_keys_for(entity_type, primary_key) {
            if key != base && !self.state.layers.contains(&key) {
                continue;
            }
            self.write(&key, Entry::loaded(EntryValue::Tombstone));
        }
        self.changes.deleted.push(base);
    }

    /// Write a list entry. Lists written this way are not re-evaluated by
    /// local list maintenance in the same batch.
    pub fn write_list(&mut self, key: &CacheKey, data: ListData, status: Status) {
        self.write(
            key,
            Entry {
                value: Some(EntryValue::List(Arc::new(data))),
                status,
                last_updated: now_ms(),
                error: None,
            },
        );
        self.changes.lists.insert(key.clone());
    }
}
