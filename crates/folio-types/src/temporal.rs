use std::fmt;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Hybrid logical timestamp stamped on every document write.
///
/// Combines a wall-clock millisecond component with a logical counter so two
/// writes issued within the same millisecond still order strictly.
///
/// Ordering: `physical_ms` → `logical` (total order).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    /// Wall-clock milliseconds since UNIX epoch.
    pub physical_ms: u64,
    /// Logical counter for writes at the same physical time.
    pub logical: u32,
}

impl Timestamp {
    /// Create a timestamp with explicit values.
    pub const fn new(physical_ms: u64, logical: u32) -> Self {
        Self {
            physical_ms,
            logical,
        }
    }

    /// The zero timestamp, earlier than any stamped write.
    pub const fn zero() -> Self {
        Self::new(0, 0)
    }

    /// Returns `true` if this timestamp is strictly after `other`.
    pub fn is_after(&self, other: &Self) -> bool {
        self > other
    }
}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.physical_ms
            .cmp(&other.physical_ms)
            .then(self.logical.cmp(&other.logical))
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({}ms.{})", self.physical_ms, self.logical)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.physical_ms, self.logical)
    }
}

/// Internal mutable state of the clock.
struct ClockState {
    physical_ms: u64,
    logical: u32,
}

/// Hybrid logical clock issuing write timestamps for one collection.
///
/// Every call to [`HybridLogicalClock::now`] returns a value strictly greater
/// than any value previously returned or observed, so `updatedAt` never moves
/// backwards even when the wall clock does.
pub struct HybridLogicalClock {
    state: Mutex<ClockState>,
}

impl HybridLogicalClock {
    /// Create a clock that starts from the wall clock.
    pub fn new() -> Self {
        Self::starting_at(Timestamp::zero())
    }

    /// Create a clock whose first issued value is strictly after `floor`.
    ///
    /// A floor in the future freezes the physical component, leaving only the
    /// logical counter to advance; tests use this for deterministic stamps.
    pub fn starting_at(floor: Timestamp) -> Self {
        Self {
            state: Mutex::new(ClockState {
                physical_ms: floor.physical_ms,
                logical: floor.logical,
            }),
        }
    }

    /// Issue a new timestamp for a local write.
    pub fn now(&self) -> Timestamp {
        let wall = Self::wall_clock_ms();
        let mut state = self.state.lock().expect("clock mutex poisoned");

        let physical = wall.max(state.physical_ms);
        let (physical, logical) = if physical > state.physical_ms {
            (physical, 0)
        } else {
            match state.logical.checked_add(1) {
                Some(logical) => (physical, logical),
                // Logical counter exhausted: borrow the next millisecond.
                None => (physical.saturating_add(1), 0),
            }
        };

        state.physical_ms = physical;
        state.logical = logical;
        Timestamp::new(physical, logical)
    }

    /// Absorb a timestamp read from the store so later stamps order after it.
    pub fn observe(&self, seen: &Timestamp) {
        let mut state = self.state.lock().expect("clock mutex poisoned");
        let current = Timestamp::new(state.physical_ms, state.logical);
        if seen.is_after(&current) {
            state.physical_ms = seen.physical_ms;
            state.logical = seen.logical;
        }
    }

    fn wall_clock_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

impl Default for HybridLogicalClock {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HybridLogicalClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock().expect("clock mutex poisoned");
        f.debug_struct("HybridLogicalClock")
            .field("physical_ms", &state.physical_ms)
            .field("logical", &state.logical)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_physical_first() {
        let a = Timestamp::new(100, 5);
        let b = Timestamp::new(200, 0);
        assert!(a < b);
    }

    #[test]
    fn ordering_logical_second() {
        let a = Timestamp::new(100, 1);
        let b = Timestamp::new(100, 2);
        assert!(a < b);
        assert!(b.is_after(&a));
    }

    #[test]
    fn zero_is_smallest() {
        assert!(Timestamp::zero() < Timestamp::new(0, 1));
    }

    #[test]
    fn display_format() {
        assert_eq!(Timestamp::new(1000, 5).to_string(), "1000.5");
    }

    #[test]
    fn serde_roundtrip() {
        let ts = Timestamp::new(1_700_000_000_000, 3);
        let json = serde_json::to_value(ts).unwrap();
        assert_eq!(json["physical_ms"], 1_700_000_000_000u64);
        let back: Timestamp = serde_json::from_value(json).unwrap();
        assert_eq!(back, ts);
    }

    #[test]
    fn exhausted_logical_counter_moves_physical_forward() {
        let far = Timestamp::new(u64::MAX / 2, 0);
        let clock = HybridLogicalClock::starting_at(far);
        let seen = Timestamp::new(far.physical_ms, u32::MAX);
        clock.observe(&seen);

        let next = clock.now();
        assert!(next.is_after(&seen));
        assert_eq!(next, Timestamp::new(far.physical_ms + 1, 0));
        assert!(clock.now().is_after(&next));
    }

    #[test]
    fn now_is_strictly_monotonic() {
        let clock = HybridLogicalClock::new();
        let mut prev = clock.now();
        for _ in 0..1000 {
            let next = clock.now();
            assert!(next > prev, "{prev:?} >= {next:?}");
            prev = next;
        }
    }

    #[test]
    fn future_floor_freezes_physical() {
        let clock = HybridLogicalClock::starting_at(Timestamp::new(u64::MAX, 0));
        assert_eq!(clock.now(), Timestamp::new(u64::MAX, 1));
        assert_eq!(clock.now(), Timestamp::new(u64::MAX, 2));
    }

    #[test]
    fn observe_pushes_clock_forward() {
        let clock = HybridLogicalClock::new();
        let remote = Timestamp::new(u64::MAX - 1, 10);
        clock.observe(&remote);
        assert!(clock.now() > remote);
    }

    #[test]
    fn observe_ignores_older_values() {
        let clock = HybridLogicalClock::starting_at(Timestamp::new(u64::MAX, 5));
        clock.observe(&Timestamp::new(1, 1));
        assert_eq!(clock.now(), Timestamp::new(u64::MAX, 6));
    }

    #[test]
    fn concurrent_now_calls_are_unique() {
        use std::sync::Arc;
        use std::thread;

        let clock = Arc::new(HybridLogicalClock::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let clock = Arc::clone(&clock);
                thread::spawn(move || (0..100).map(|_| clock.now()).collect::<Vec<_>>())
            })
            .collect();

        let mut all: Vec<Timestamp> = Vec::new();
        for handle in handles {
            all.extend(handle.join().unwrap());
        }
        let len = all.len();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), len);
    }
}
