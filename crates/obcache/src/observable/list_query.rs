//! ListQuery: the observable view of one filtered, sorted, paged list.
//!
//! Owns the fetch lifecycle of the list key (first page, further pages,
//! invalidation) and keeps the cached member list current when entities of
//! its type are written locally. What observers see is produced by the
//! [`Collection`] it wraps.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use crate::backend::{Page, PageRequest};
use crate::cache::changes::Changes;
use crate::cache::entry::ListData;
use crate::cache::key::CacheKey;
use crate::cache::layer::OptimisticId;
use crate::cache::store::{spawn, Store, WeakStore};
use crate::cache::subject::ListenerId;
use crate::error::{CacheError, FetchError, Result};
use crate::options::InvalidationMode;
use crate::query::operators::matches_filter;
use crate::query::sort::insertion_index;
use crate::types::{Entity, Status};

use super::collection::Collection;
pub use super::collection::ListPayload;
use super::query::FetchGate;

type MoreWaiter = oneshot::Sender<Result<(), FetchError>>;

/// One `fetch_more` runs at a time; later callers wait for its result.
#[derive(Default)]
struct MoreState {
    running: bool,
    waiters: Vec<MoreWaiter>,
}

pub struct ListQuery {
    store: WeakStore,
    key: CacheKey,
    mode: InvalidationMode,
    dedupe: Duration,
    gate: Mutex<FetchGate>,
    more: Mutex<MoreState>,
    collection: Arc<Collection>,
}

impl ListQuery {
    pub(crate) fn new(
        store: WeakStore,
        key: CacheKey,
        mode: InvalidationMode,
        dedupe: Duration,
    ) -> Self {
        let collection = Arc::new(Collection::new(store.clone(), key.clone()));
        Self {
            store,
            key,
            mode,
            dedupe,
            gate: Mutex::new(FetchGate::new()),
            more: Mutex::new(MoreState::default()),
            collection,
        }
    }

    pub(crate) fn connect(self: &Arc<Self>, store: &Store) {
        self.collection.connect(store);
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn invalidation_mode(&self) -> InvalidationMode {
        self.mode
    }

    pub fn current(&self) -> Option<ListPayload> {
        self.collection.output().value()
    }

    pub fn subscribe(&self, observer: impl Fn(&ListPayload) + Send + Sync + 'static) -> ListenerId {
        self.collection.output().subscribe(observer)
    }

    pub fn unsubscribe(&self, id: ListenerId) {
        self.collection.output().unsubscribe(id);
    }

    pub fn observer_count(&self) -> usize {
        self.collection.output().observer_count()
    }

    fn request(&self, store: &Store, page_token: Option<String>) -> PageRequest {
        PageRequest {
            entity_type: self.key.entity_type().to_string(),
            where_clause: self
                .key
                .where_clause()
                .cloned()
                .unwrap_or_else(|| serde_json::json!({})),
            order_by: self.key.order_by().to_vec(),
            page_size: self
                .key
                .page_size()
                .unwrap_or(store.options().default_page_size),
            page_token,
            with_properties: self.key.with_properties().to_vec(),
        }
    }

    // -----------------------------------------------------------------------
    // First page
    // -----------------------------------------------------------------------

    /// Fetch the first page unless a fetch is running or ran within the
    /// dedupe interval. `force` always refetches, superseding a running fetch
    /// and any `fetch_more` still waiting on the old result.
    pub fn revalidate(self: &Arc<Self>, force: bool) {
        let Some(store) = self.store.upgrade() else {
            return;
        };
        let Some(generation) = self.gate.lock().try_begin(force, self.dedupe) else {
            trace!(key = %self.key, "fetch deduplicated");
            return;
        };

        let has_data = store
            .get(&self.key)
            .is_some_and(|entry| entry.list().is_some());
        match (self.mode, has_data) {
            (InvalidationMode::Wait, true) => {}
            (InvalidationMode::Reset, true) => store.batch(None, |b| {
                b.write_list(&self.key, ListData::default(), Status::Loading)
            }),
            _ => store.set_status(&self.key, Status::Loading),
        }
        store.record_fetch();
        debug!(key = %self.key, force, mode = ?self.mode, "fetching list");

        let request = self.request(&store, None);
        let backend = store.backend();
        let this = Arc::clone(self);
        let spawned = spawn(async move {
            let result = backend.fetch_page(&request).await;
            this.finish(generation, result);
        });
        if !spawned {
            self.finish(generation, Err(FetchError::NoRuntime));
        }
    }

    fn finish(&self, generation: u64, result: Result<Page, FetchError>) {
        if !self.gate.lock().finish(generation) {
            trace!(key = %self.key, "superseded list result dropped");
            return;
        }
        let Some(store) = self.store.upgrade() else {
            return;
        };

        match result {
            Ok(page) => {
                debug!(key = %self.key, count = page.data.len(), "list loaded");
                let Page {
                    data,
                    next_page_token,
                    total_count,
                } = page;
                store.batch(None, |b| {
                    let mut seen = HashSet::new();
                    let members = data
                        .into_iter()
                        .map(|entity| b.store_entity(entity, Status::Loaded))
                        .filter(|key| seen.insert(key.clone()))
                        .collect();
                    b.write_list(
                        &self.key,
                        ListData {
                            members,
                            total_count,
                            next_page_token,
                        },
                        Status::Loaded,
                    );
                });
            }
            Err(e) => {
                warn!(key = %self.key, error = %e, "list fetch failed");
                store.write_error(&self.key, e);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Further pages
    // -----------------------------------------------------------------------

    /// Load the next page and append its members.
    ///
    /// Does nothing while the first page is loading or when there is no next
    /// page. Concurrent calls share one request. A result that lands after a
    /// refetch of the first page is dropped.
    pub async fn fetch_more(self: &Arc<Self>) -> Result<()> {
        let store = self.store.upgrade().ok_or(CacheError::Disposed)?;

        let waiter = {
            let mut more = self.more.lock();
            if more.running {
                let (tx, rx) = oneshot::channel();
                more.waiters.push(tx);
                Some(rx)
            } else {
                more.running = true;
                None
            }
        };
        if let Some(rx) = waiter {
            return match rx.await {
                Ok(result) => result.map_err(Into::into),
                Err(_) => Err(CacheError::Disposed),
            };
        }

        let result = self.load_next_page(&store).await;
        let waiters = {
            let mut more = self.more.lock();
            more.running = false;
            std::mem::take(&mut more.waiters)
        };
        for tx in waiters {
            let _ = tx.send(result.clone());
        }
        result.map_err(Into::into)
    }

    async fn load_next_page(&self, store: &Store) -> Result<(), FetchError> {
        let generation = {
            let gate = self.gate.lock();
            if gate.is_in_flight() {
                trace!(key = %self.key, "fetch_more skipped; first page loading");
                return Ok(());
            }
            gate.generation()
        };
        let token = store
            .get_committed(&self.key)
            .and_then(|entry| entry.list().and_then(|l| l.next_page_token.clone()));
        let Some(token) = token else {
            return Ok(());
        };

        store.record_fetch();
        debug!(key = %self.key, "fetching next page");
        let request = self.request(store, Some(token));
        let page = match store.backend().fetch_page(&request).await {
            Ok(page) => page,
            Err(e) => {
                warn!(key = %self.key, error = %e, "next page fetch failed");
                if self.gate.lock().generation() == generation {
                    store.write_error(&self.key, e.clone());
                }
                return Err(e);
            }
        };
        if self.gate.lock().generation() != generation {
            trace!(key = %self.key, "next page superseded by refetch");
            return Ok(());
        }

        let Page {
            data,
            next_page_token,
            total_count,
        } = page;
        store.batch(None, |b| {
            let existing = b.read_committed(&self.key);
            let previous = existing.as_ref().and_then(|e| e.list());
            let mut members = previous.map(|l| l.members.clone()).unwrap_or_default();
            for entity in data {
                let key = b.store_entity(entity, Status::Loaded);
                if !members.contains(&key) {
                    members.push(key);
                }
            }
            let total_count = total_count.or_else(|| previous.and_then(|l| l.total_count));
            b.write_list(
                &self.key,
                ListData {
                    members,
                    total_count,
                    next_page_token,
                },
                Status::Loaded,
            );
        });
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Local maintenance
    // -----------------------------------------------------------------------

    /// Fold entities written elsewhere into the cached member list.
    ///
    /// Deleted members are dropped, newly matching entities are inserted at
    /// their sort position. Members that stop matching are removed only by
    /// committed writes; optimistic writes never shrink a list. Members that
    /// were modified keep their position.
    pub(crate) fn maybe_update(&self, changes: &Changes, layer: Option<OptimisticId>) {
        let Some(store) = self.store.upgrade() else {
            return;
        };
        let entry = match layer {
            None => store.get_committed(&self.key),
            Some(_) => store.get(&self.key),
        };
        let Some(entry) = entry else {
            return;
        };
        let Some(list) = entry.list().cloned() else {
            return;
        };
        let Some(clause) = self.key.where_clause() else {
            return;
        };
        let entity_type = self.key.entity_type();

        let mut members = list.members.clone();
        let before = members.len();
        members.retain(|m| !changes.deleted.contains(m));
        let mut changed = members.len() != before;

        let candidates = changes
            .added
            .iter()
            .chain(&changes.modified)
            .filter(|e| e.entity_type == entity_type);
        for entity in candidates {
            let matches = match matches_filter(entity, clause) {
                Ok(m) => m,
                Err(e) => {
                    warn!(key = %self.key, error = %e, "filter failed; entity skipped");
                    continue;
                }
            };
            let member_key = store.object_key(entity_type, entity.primary_key.clone(), &[]);
            let position = members.iter().position(|m| *m == member_key);
            match (matches, position) {
                (true, None) => {
                    let resolved: Vec<Option<Arc<Entity>>> = members
                        .iter()
                        .map(|m| store.get(m).and_then(|e| e.object().cloned()))
                        .collect();
                    let index = insertion_index(
                        resolved.iter().map(|o| o.as_deref()),
                        entity,
                        self.key.order_by(),
                    );
                    members.insert(index, member_key);
                    changed = true;
                }
                (false, Some(index)) if layer.is_none() => {
                    members.remove(index);
                    changed = true;
                }
                _ => {}
            }
        }

        if !changed {
            return;
        }
        debug!(key = %self.key, layer = ?layer, members = members.len(), "list updated locally");
        store.batch(layer, |b| {
            b.write_list(
                &self.key,
                ListData {
                    members,
                    total_count: list.total_count,
                    next_page_token: list.next_page_token.clone(),
                },
                entry.status,
            )
        });
    }

    /// Stop fetching, release every member and drop all observers.
    pub(crate) fn dispose(&self) {
        self.gate.lock().cancel();
        self.more.lock().waiters.clear();
        self.collection.dispose();
    }
}
