//! Subject<T>: a multicast channel that remembers its latest value.
//!
//! Listeners are stored as `Arc<dyn Fn(&T)>` so snapshots are cheap.
//! Snapshot-on-emit semantics mean:
//!   - A listener removed *during* emission is still called in that round.
//!   - A listener added *during* emission is NOT called by that round; it
//!     receives the current value when it subscribes instead.
//!
//! A nested `next()` issued from inside a listener supersedes the outer
//! round: once the newer value has been delivered to everyone, the outer
//! round stops, so no listener sees a stale value after a newer one.
//!
//! The current value handed to a new subscriber is tagged with the version it
//! was read at. If a `next` lands between registration and that delivery, the
//! stale value is dropped: the listener was already registered, so the newer
//! round reaches it. Across threads the check and the callback are not atomic,
//! so strict ordering is only guaranteed for emissions from a single thread.
//!
//! All methods take `&self`; the internal `parking_lot::Mutex` is never held
//! while listeners run. Panics inside a listener propagate to the caller.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// Identifies a listener for [`Subject::unsubscribe`].
pub type ListenerId = u64;

/// Closure type for subject listeners.
pub type ListenerFn<T> = dyn Fn(&T) + Send + Sync;

struct SubjectState<T> {
    value: Option<T>,
    listeners: Vec<(ListenerId, Arc<ListenerFn<T>>)>,
    version: u64,
    closed: bool,
}

pub struct Subject<T> {
    state: Mutex<SubjectState<T>>,
    next_id: AtomicU64,
}

impl<T: Clone> Subject<T> {
    /// A subject with no value yet; subscribers wait for the first `next`.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SubjectState {
                value: None,
                listeners: Vec::new(),
                version: 0,
                closed: false,
            }),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn with_value(value: T) -> Self {
        let subject = Self::new();
        subject.state.lock().value = Some(value);
        subject
    }

    /// Register `callback` and immediately deliver the current value, if any.
    ///
    /// Subscribing to a completed subject registers nothing.
    pub fn subscribe(&self, callback: impl Fn(&T) + Send + Sync + 'static) -> ListenerId {
        let callback: Arc<ListenerFn<T>> = Arc::new(callback);
        let (id, current) = self.register(Arc::clone(&callback));
        if let Some((version, value)) = current {
            self.deliver_current(&callback, version, &value);
        }
        id
    }

    fn register(&self, callback: Arc<ListenerFn<T>>) -> (ListenerId, Option<(u64, T)>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.lock();
        if state.closed {
            return (id, None);
        }
        state.listeners.push((id, callback));
        let current = state.value.clone().map(|value| (state.version, value));
        (id, current)
    }

    /// Skipped when a newer `next` has run since `version` was read.
    fn deliver_current(&self, callback: &Arc<ListenerFn<T>>, version: u64, value: &T) {
        if self.state.lock().version != version {
            return;
        }
        callback(value);
    }

    /// Remove a listener. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: ListenerId) {
        self.state.lock().listeners.retain(|(lid, _)| *lid != id);
    }

    /// Store `value` as current and deliver it to every listener.
    pub fn next(&self, value: T) {
        let (version, snapshot) = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.version += 1;
            state.value = Some(value.clone());
            let snapshot: Vec<Arc<ListenerFn<T>>> =
                state.listeners.iter().map(|(_, cb)| Arc::clone(cb)).collect();
            (state.version, snapshot)
        };
        for cb in snapshot {
            if self.state.lock().version != version {
                break;
            }
            cb(&value);
        }
    }

    pub fn value(&self) -> Option<T> {
        self.state.lock().value.clone()
    }

    pub fn observer_count(&self) -> usize {
        self.state.lock().listeners.len()
    }

    /// Drop all listeners; later `next` calls are ignored.
    pub fn complete(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.listeners.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

impl<T: Clone> Default for Subject<T> {
    fn default() -> Self {
        Self::new()
    }
}
