//! Collection: combines a list entry with the current entry of each member.
//!
//! Emits whenever the member list changes or any member's data changes.
//! Membership changes resubscribe exactly the new member set: removed members
//! are unsubscribed and released, new members are retained (without a fetch)
//! and subscribed. Emissions are suppressed while a membership change is
//! being applied, so observers never see a half-rebuilt list.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::cache::entry::SubjectPayload;
use crate::cache::key::CacheKey;
use crate::cache::store::{Store, WeakStore};
use crate::cache::subject::{ListenerId, Subject};
use crate::error::FetchError;
use crate::types::{Entity, Status};

use super::object_query::ObjectPayload;

// ============================================================================
// Payload
// ============================================================================

/// What observers of a list receive.
#[derive(Debug, Clone)]
pub struct ListPayload {
    /// Loaded members in list order. Members not yet loaded or deleted are skipped.
    pub resolved_data: Vec<Arc<Entity>>,
    /// True if the list or any member comes from an optimistic layer.
    pub is_optimistic: bool,
    pub status: Status,
    pub last_updated: i64,
    pub total_count: Option<u64>,
    pub has_more: bool,
    pub error: Option<FetchError>,
}

impl ListPayload {
    fn same_as(&self, other: &ListPayload) -> bool {
        self.resolved_data.len() == other.resolved_data.len()
            && self
                .resolved_data
                .iter()
                .zip(&other.resolved_data)
                .all(|(a, b)| Arc::ptr_eq(a, b))
            && self.is_optimistic == other.is_optimistic
            && self.status == other.status
            && self.total_count == other.total_count
            && self.has_more == other.has_more
            && self.error == other.error
    }
}

// ============================================================================
// Collection
// ============================================================================

/// A retained member and its subscription. The subscription is filled in
/// once the member subject has been subscribed outside the state lock.
#[derive(Default)]
struct Member {
    subject: Option<Arc<Subject<SubjectPayload>>>,
    listener: Option<ListenerId>,
    latest: Option<ObjectPayload>,
}

#[derive(Default)]
struct ComposeState {
    list: Option<SubjectPayload>,
    order: Vec<CacheKey>,
    members: HashMap<CacheKey, Member>,
    rebuilding: bool,
    disposed: bool,
}

impl ComposeState {
    fn compose(&self) -> Option<ListPayload> {
        let list = self.list.as_ref()?;
        let latest: Vec<&ObjectPayload> = self
            .order
            .iter()
            .filter_map(|key| self.members.get(key)?.latest.as_ref())
            .collect();
        let data = list.entry.list();
        Some(ListPayload {
            resolved_data: latest.iter().filter_map(|p| p.object.clone()).collect(),
            is_optimistic: list.is_optimistic || latest.iter().any(|p| p.is_optimistic),
            status: list.entry.status,
            last_updated: list.entry.last_updated,
            total_count: data.and_then(|d| d.total_count),
            has_more: data.is_some_and(|d| d.has_more()),
            error: list.entry.error.clone(),
        })
    }
}

pub(crate) struct Collection {
    store: WeakStore,
    key: CacheKey,
    state: Mutex<ComposeState>,
    output: Subject<ListPayload>,
    upstream: Mutex<Option<(Arc<Subject<SubjectPayload>>, ListenerId)>>,
}

impl Collection {
    pub(crate) fn new(store: WeakStore, key: CacheKey) -> Self {
        Self {
            store,
            key,
            state: Mutex::new(ComposeState::default()),
            output: Subject::new(),
            upstream: Mutex::new(None),
        }
    }

    pub(crate) fn connect(self: &Arc<Self>, store: &Store) {
        let Some(subject) = store.subject(&self.key) else {
            return;
        };
        let weak = Arc::downgrade(self);
        let id = subject.subscribe(move |payload: &SubjectPayload| {
            if let Some(collection) = weak.upgrade() {
                collection.on_list(payload);
            }
        });
        *self.upstream.lock() = Some((subject, id));
    }

    pub(crate) fn output(&self) -> &Subject<ListPayload> {
        &self.output
    }

    fn on_list(self: &Arc<Self>, payload: &SubjectPayload) {
        let Some(store) = self.store.upgrade() else {
            return;
        };
        let next_order: Vec<CacheKey> = payload
            .entry
            .list()
            .map(|l| l.members.clone())
            .unwrap_or_default();

        let (added, removed) = {
            let mut state = self.state.lock();
            if state.disposed {
                return;
            }
            state.list = Some(payload.clone());
            state.rebuilding = true;

            let wanted: HashSet<&CacheKey> = next_order.iter().collect();
            let stale: Vec<CacheKey> = state
                .members
                .keys()
                .filter(|k| !wanted.contains(k))
                .cloned()
                .collect();
            let removed: Vec<(CacheKey, Member)> = stale
                .into_iter()
                .filter_map(|k| state.members.remove(&k).map(|m| (k, m)))
                .collect();

            let mut added = Vec::new();
            for key in &next_order {
                if !state.members.contains_key(key) {
                    store.retain_without_fetch(key);
                    state.members.insert(key.clone(), Member::default());
                    added.push(key.clone());
                }
            }
            state.order = next_order;
            (added, removed)
        };

        for (key, member) in removed {
            if let (Some(subject), Some(id)) = (member.subject, member.listener) {
                subject.unsubscribe(id);
            }
            store.release(&key);
        }

        for key in added {
            let Some(subject) = store.subject(&key) else {
                continue;
            };
            let weak = Arc::downgrade(self);
            let member_key = key.clone();
            let id = subject.subscribe(move |payload: &SubjectPayload| {
                if let Some(collection) = weak.upgrade() {
                    collection.on_member(&member_key, payload);
                }
            });

            let mut state = self.state.lock();
            match state.members.get_mut(&key) {
                Some(member) => {
                    member.subject = Some(subject);
                    member.listener = Some(id);
                }
                None => {
                    drop(state);
                    subject.unsubscribe(id);
                }
            }
        }

        self.state.lock().rebuilding = false;
        self.emit();
    }

    fn on_member(&self, key: &CacheKey, payload: &SubjectPayload) {
        let rebuilding = {
            let mut state = self.state.lock();
            let Some(member) = state.members.get_mut(key) else {
                return;
            };
            member.latest = Some(ObjectPayload::from_store(payload));
            state.rebuilding
        };
        if !rebuilding {
            self.emit();
        }
    }

    fn emit(&self) {
        let next = {
            let state = self.state.lock();
            if state.disposed {
                return;
            }
            match state.compose() {
                Some(next) => next,
                None => return,
            }
        };
        if self.output.value().is_some_and(|last| last.same_as(&next)) {
            return;
        }
        self.output.next(next);
    }

    /// Unsubscribe from everything, release every member, drop observers.
    pub(crate) fn dispose(&self) {
        let members = {
            let mut state = self.state.lock();
            state.disposed = true;
            state.order.clear();
            std::mem::take(&mut state.members)
        };
        let store = self.store.upgrade();
        for (key, member) in members {
            if let (Some(subject), Some(id)) = (member.subject, member.listener) {
                subject.unsubscribe(id);
            }
            if let Some(store) = &store {
                store.release(&key);
            }
        }
        if let Some((subject, id)) = self.upstream.lock().take() {
            subject.unsubscribe(id);
        }
        self.output.complete();
    }
}
