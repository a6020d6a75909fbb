//! Weak interning table: a prefix trie over token sequences whose nodes hold
//! weak handles to the materialized canonical value.
//!
//! A [`Canonical<T>`] is the only strong owner of its value. When the last
//! clone drops, the inner value removes its own trie slot (and prunes any
//! nodes left empty), so unused forms are reclaimed without a sweep.
//!
//! Reclamation and lookup can interleave across threads: a lookup may find a
//! slot whose target is already gone but whose drop has not yet taken the
//! table lock. That stale slot is replaced in place, and the late drop leaves
//! the replacement alone because it only clears slots that are dead.

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::trace;

// ============================================================================
// Canonical
// ============================================================================

struct CanonicalInner<T> {
    value: T,
    /// Token path in the owning table. `None` for detached singletons.
    path: Option<Vec<String>>,
    table: Weak<Mutex<TrieNode<T>>>,
}

/// A shared, identity-comparable canonical form.
///
/// Equality and hashing are by pointer: two `Canonical`s are equal exactly
/// when they came from the same interning.
pub struct Canonical<T>(Arc<CanonicalInner<T>>);

impl<T> Canonical<T> {
    /// A canonical value owned outside any table (used for the "empty" forms).
    pub fn detached(value: T) -> Self {
        Self(Arc::new(CanonicalInner {
            value,
            path: None,
            table: Weak::new(),
        }))
    }

    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }

    pub fn get(&self) -> &T {
        &self.0.value
    }
}

impl<T> Clone for Canonical<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T> Deref for Canonical<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0.value
    }
}

impl<T> PartialEq for Canonical<T> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl<T> Eq for Canonical<T> {}

impl<T> Hash for Canonical<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.0) as usize).hash(state);
    }
}

impl<T: fmt::Debug> fmt::Debug for Canonical<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Canonical").field(&self.0.value).finish()
    }
}

impl<T> Drop for CanonicalInner<T> {
    fn drop(&mut self) {
        let (Some(path), Some(root)) = (self.path.as_ref(), self.table.upgrade()) else {
            return;
        };
        let mut root = root.lock();
        root.remove_dead(path);
    }
}

// ============================================================================
// Trie
// ============================================================================

struct TrieNode<T> {
    children: HashMap<String, TrieNode<T>>,
    slot: Option<Weak<CanonicalInner<T>>>,
}

impl<T> TrieNode<T> {
    fn new() -> Self {
        Self {
            children: HashMap::new(),
            slot: None,
        }
    }

    fn is_empty(&self) -> bool {
        self.slot.is_none() && self.children.is_empty()
    }

    /// Clear the slot at `path` if its target is gone. Returns true when this
    /// node is left empty and can be pruned by the parent.
    fn remove_dead(&mut self, path: &[String]) -> bool {
        match path.split_first() {
            None => {
                if self.slot.as_ref().is_some_and(|w| w.strong_count() == 0) {
                    self.slot = None;
                }
            }
            Some((head, rest)) => {
                let prune = self
                    .children
                    .get_mut(head)
                    .is_some_and(|child| child.remove_dead(rest));
                if prune {
                    self.children.remove(head);
                }
            }
        }
        self.is_empty()
    }

    fn count_live(&self) -> usize {
        let own = usize::from(self.slot.as_ref().is_some_and(|w| w.strong_count() > 0));
        own + self.children.values().map(TrieNode::count_live).sum::<usize>()
    }
}

// ============================================================================
// InternTable
// ============================================================================

/// Interns values by token sequence. Deep-equal inputs must flatten to equal
/// token sequences; that is the caller's contract.
pub struct InternTable<T> {
    root: Arc<Mutex<TrieNode<T>>>,
}

impl<T> InternTable<T> {
    pub fn new() -> Self {
        Self {
            root: Arc::new(Mutex::new(TrieNode::new())),
        }
    }

    /// Return the live canonical for `tokens`, materializing it with `make`
    /// if the slot is missing or stale.
    pub fn intern(&self, tokens: Vec<String>, make: impl FnOnce() -> T) -> Canonical<T> {
        let mut root = self.root.lock();
        let mut node = &mut *root;
        for token in &tokens {
            node = node
                .children
                .entry(token.clone())
                .or_insert_with(TrieNode::new);
        }

        if let Some(live) = node.slot.as_ref().and_then(Weak::upgrade) {
            return Canonical(live);
        }
        if node.slot.is_some() {
            trace!(tokens = tokens.len(), "re-interning reclaimed canonical form");
        }

        let inner = Arc::new(CanonicalInner {
            value: make(),
            path: Some(tokens),
            table: Arc::downgrade(&self.root),
        });
        node.slot = Some(Arc::downgrade(&inner));
        Canonical(inner)
    }

    /// Number of forms currently reachable from outside the table.
    pub fn live_forms(&self) -> usize {
        self.root.lock().count_live()
    }

    /// Number of trie nodes, root excluded. Reclaimed forms leave none behind.
    pub fn node_count(&self) -> usize {
        fn count<T>(node: &TrieNode<T>) -> usize {
            node.children.values().map(|c| 1 + count(c)).sum()
        }
        count(&self.root.lock())
    }
}

impl<T> Default for InternTable<T> {
    fn default() -> Self {
        Self::new()
    }
}
