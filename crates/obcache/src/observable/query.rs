//! Fetch bookkeeping shared by object and list queries.

use std::time::Duration;

use tokio::time::Instant;

/// Decides whether a fetch may start and whether a finished one is current.
///
/// Every started fetch gets a generation number. Only the fetch holding the
/// latest generation may write its result; a forced refetch or a cancel
/// simply moves the generation on, and the superseded fetch's result is
/// dropped when it lands.
#[derive(Debug, Default)]
pub(crate) struct FetchGate {
    generation: u64,
    in_flight: Option<u64>,
    last_started: Option<Instant>,
}

impl FetchGate {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Start a fetch unless one is running or one started within `dedupe`.
    /// `force` skips both checks.
    pub(crate) fn try_begin(&mut self, force: bool, dedupe: Duration) -> Option<u64> {
        if !force {
            if self.in_flight.is_some() {
                return None;
            }
            if self.last_started.is_some_and(|at| at.elapsed() < dedupe) {
                return None;
            }
        }
        self.generation += 1;
        self.in_flight = Some(self.generation);
        self.last_started = Some(Instant::now());
        Some(self.generation)
    }

    /// Record that fetch `generation` finished. False if it was superseded.
    pub(crate) fn finish(&mut self, generation: u64) -> bool {
        if self.in_flight == Some(generation) {
            self.in_flight = None;
            true
        } else {
            false
        }
    }

    pub(crate) fn is_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    /// Supersede any fetch in flight.
    pub(crate) fn cancel(&mut self) {
        self.generation += 1;
        self.in_flight = None;
    }
}
