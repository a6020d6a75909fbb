//! Retain/release bookkeeping for observers, with resubscribe coalescing.
//!
//! Every observer holds one store reference on its key. When an observer
//! leaves, the release is deferred by one scheduler turn; an `observe` of the
//! same key arriving before then adopts the pending release instead of taking
//! a new reference, so the store's count never touches zero.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::cache::key::CacheKey;
use crate::cache::store::{spawn, Store, WeakStore};

#[derive(Debug, Default)]
struct Holder {
    observers: usize,
    pending_releases: usize,
}

#[derive(Clone, Default)]
pub(crate) struct SubscriptionHelper {
    holders: Arc<Mutex<HashMap<CacheKey, Holder>>>,
}

impl SubscriptionHelper {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Take a reference for a new observer of `key`.
    pub(crate) fn acquire(&self, store: &Store, key: &CacheKey) {
        let adopted = {
            let mut holders = self.holders.lock();
            let holder = holders.entry(key.clone()).or_default();
            holder.observers += 1;
            if holder.pending_releases > 0 {
                holder.pending_releases -= 1;
                true
            } else {
                false
            }
        };
        if adopted {
            trace!(key = %key, "resubscribe adopted pending release");
        } else {
            store.retain(key);
        }
    }

    /// Give up an observer's reference after one scheduler turn, unless a
    /// new observer adopts it first.
    pub(crate) fn release_deferred(&self, store: &Store, key: &CacheKey) {
        {
            let mut holders = self.holders.lock();
            let holder = holders.entry(key.clone()).or_default();
            holder.observers = holder.observers.saturating_sub(1);
            holder.pending_releases += 1;
        }

        let helper = self.clone();
        let weak = store.downgrade();
        let task_key = key.clone();
        let spawned = spawn(async move {
            tokio::task::yield_now().await;
            helper.settle(&weak, &task_key);
        });
        if !spawned {
            self.settle(&store.downgrade(), key);
        }
    }

    fn settle(&self, store: &WeakStore, key: &CacheKey) {
        {
            let mut holders = self.holders.lock();
            let Some(holder) = holders.get_mut(key) else {
                return;
            };
            if holder.pending_releases == 0 {
                return;
            }
            holder.pending_releases -= 1;
            if holder.observers == 0 && holder.pending_releases == 0 {
                holders.remove(key);
            }
        }
        if let Some(store) = store.upgrade() {
            store.release(key);
        }
    }

    /// Observers currently attached to `key` through this helper.
    pub(crate) fn observer_count(&self, key: &CacheKey) -> usize {
        self.holders.lock().get(key).map_or(0, |h| h.observers)
    }
}
