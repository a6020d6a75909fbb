//! Reference counts and the pending-cleanup table.
//!
//! Pure bookkeeping: the store decides what a transition means (create an
//! entry, schedule a timer, evict). Cleanup timers are identified by a ticket;
//! a timer only evicts if its ticket is still the pending one for the key, so
//! a retain that arrives first cancels it simply by removing the ticket.

use std::collections::HashMap;

use crate::error::RefCountError;

use super::key::CacheKey;

pub type CleanupTicket = u64;

/// What a retain found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retained {
    /// First retainer of a key that was not pending cleanup.
    Fresh,
    /// First retainer of a key whose cleanup was pending; the cleanup is cancelled.
    Revived,
    /// The key already had retainers.
    Existing,
}

/// What a release did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Released {
    StillRetained,
    /// Count reached zero; the caller should arm a timer for this ticket.
    ScheduleCleanup(CleanupTicket),
}

#[derive(Default)]
pub struct RefCounts {
    counts: HashMap<CacheKey, usize>,
    pending: HashMap<CacheKey, CleanupTicket>,
    next_ticket: CleanupTicket,
}

impl RefCounts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn retain(&mut self, key: &CacheKey) -> Retained {
        let count = self.counts.entry(key.clone()).or_insert(0);
        *count += 1;
        if *count > 1 {
            return Retained::Existing;
        }
        if self.pending.remove(key).is_some() {
            Retained::Revived
        } else {
            Retained::Fresh
        }
    }

    pub fn release(&mut self, key: &CacheKey) -> Result<Released, RefCountError> {
        let Some(count) = self.counts.get_mut(key) else {
            return Err(RefCountError {
                key: key.to_string(),
            });
        };
        *count -= 1;
        if *count > 0 {
            return Ok(Released::StillRetained);
        }
        self.counts.remove(key);
        Ok(Released::ScheduleCleanup(self.schedule(key)))
    }

    /// Mark a key that was written without ever being retained, so it is
    /// evicted like any released key. No-op for retained or pending keys.
    pub fn track_orphan(&mut self, key: &CacheKey) -> Option<CleanupTicket> {
        if self.counts.contains_key(key) || self.pending.contains_key(key) {
            return None;
        }
        Some(self.schedule(key))
    }

    /// Claim the cleanup for `key` if `ticket` is still current.
    pub fn take_cleanup(&mut self, key: &CacheKey, ticket: CleanupTicket) -> bool {
        if self.pending.get(key) == Some(&ticket) {
            self.pending.remove(key);
            true
        } else {
            false
        }
    }

    pub fn count(&self, key: &CacheKey) -> usize {
        self.counts.get(key).copied().unwrap_or(0)
    }

    pub fn is_pending(&self, key: &CacheKey) -> bool {
        self.pending.contains_key(key)
    }

    pub fn clear(&mut self) {
        self.counts.clear();
        self.pending.clear();
    }

    fn schedule(&mut self, key: &CacheKey) -> CleanupTicket {
        self.next_ticket += 1;
        self.pending.insert(key.clone(), self.next_ticket);
        self.next_ticket
    }
}
