//! Per-node circuit breaker
//!
//! A sliding-window breaker: `capacity` failures inside one `window` trip the
//! node for `window`, counted from the failure that tripped it. While tripped,
//! further failures are ignored (debounce) and successes cannot close the
//! circuit early. Outside a trip, successes age the recorded failures so that
//! isolated errors separated by good traffic never add up to a trip.
//!
//! The tracker is pure bookkeeping: no I/O, constant time, one lock per node.

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

/// Failure history and trip state for one node
///
/// Timestamps are stored as offsets from `epoch` shifted forward by one
/// window, so the "already expired" initial stamp (`epoch - window`) is zero.
#[derive(Debug)]
pub struct FailureTracker {
    window: Duration,
    capacity: usize,
    epoch: Instant,
    state: RwLock<TrackerState>,
}

#[derive(Debug)]
struct TrackerState {
    /// Failure stamps; `cursor` is the next slot to write
    ring: Box<[Duration]>,
    cursor: usize,
    last_trip: Duration,
    trips: u64,
}

impl FailureTracker {
    /// Create a tracker in the available state. A zero capacity is raised to one.
    pub fn new(window: Duration, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            window,
            capacity,
            epoch: Instant::now(),
            state: RwLock::new(TrackerState {
                ring: vec![Duration::ZERO; capacity].into_boxed_slice(),
                cursor: 0,
                last_trip: Duration::ZERO,
                trips: 0,
            }),
        }
    }

    /// Whether the node may be tried: the last trip is older than one window
    pub fn is_available(&self) -> bool {
        let now = self.now();
        let state = self.read();
        state.trips == 0 || now.saturating_sub(state.last_trip) > self.window
    }

    /// Record a failure. Returns `true` if this failure tripped the circuit.
    pub fn mark_fail(&self) -> bool {
        let now = self.now();
        let mut state = self.write();

        if now.saturating_sub(state.last_trip) < self.window {
            return false;
        }

        // Oldest stamp still in the ring once `now` is written
        let next = (state.cursor + 1) % self.capacity;
        let tripped = now < state.ring[next] + self.window;
        if tripped {
            state.last_trip = now;
            state.trips += 1;
        }

        let cursor = state.cursor;
        state.ring[cursor] = now;
        state.cursor = next;

        tripped
    }

    /// Record a success by aging recent failure stamps to the window edge.
    /// No effect while tripped.
    pub fn mark_success(&self) {
        let aged = self.now().saturating_sub(self.window);
        let mut state = self.write();

        if aged < state.last_trip {
            return;
        }

        let mut idx = state.cursor;
        for _ in 0..self.capacity {
            idx = (idx + self.capacity - 1) % self.capacity;
            if state.ring[idx] <= aged {
                break;
            }
            state.ring[idx] = aged;
        }
    }

    /// Number of times the circuit has tripped
    pub fn trip_count(&self) -> u64 {
        self.read().trips
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn now(&self) -> Duration {
        self.epoch.elapsed() + self.window
    }

    fn read(&self) -> RwLockReadGuard<'_, TrackerState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, TrackerState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}
