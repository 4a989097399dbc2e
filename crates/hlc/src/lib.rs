//! A hybrid-logical clock (HLC) producing [`Timestamp`]s with a stable total
//! order across nodes: physical time, broken by a logical counter, broken by
//! node id.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// A hybrid-logical timestamp.
///
/// Ordering is lexicographic over `(physical, logical, node_id)`. The
/// `node_id` tie-breaker guarantees that two timestamps minted by distinct
/// nodes never compare equal, which is what lets the partition replica
/// listener use timestamps as a total order for commit ordering.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    /// Milliseconds since the Unix epoch.
    pub physical: u64,
    /// Logical tick, reset whenever `physical` advances on its own.
    pub logical: u32,
    /// Tie-breaker; the minting node's id.
    pub node_id: u16,
}

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp {
        physical: 0,
        logical: 0,
        node_id: 0,
    };

    pub const fn new(physical: u64, logical: u32, node_id: u16) -> Self {
        Timestamp {
            physical,
            logical,
            node_id,
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}@{}", self.physical, self.logical, self.node_id)
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before Unix epoch")
        .as_millis() as u64
}

/// Packs `(physical, logical)` into a single `u64` for lock-free CAS updates:
/// the high 44 bits are physical millis, the low 20 bits are the logical tick.
/// 2^20 logical ticks per millisecond is far beyond any plausible local
/// request rate; wraparound is treated as "advance physical by one" below.
const LOGICAL_BITS: u32 = 20;
const LOGICAL_MASK: u64 = (1 << LOGICAL_BITS) - 1;

fn pack(physical: u64, logical: u32) -> u64 {
    (physical << LOGICAL_BITS) | (logical as u64 & LOGICAL_MASK)
}

fn unpack(packed: u64) -> (u64, u32) {
    (packed >> LOGICAL_BITS, (packed & LOGICAL_MASK) as u32)
}

/// A monotonic HLC local to one node.
///
/// `now()` always returns a timestamp strictly greater than any previously
/// returned or observed (via `update`) timestamp from this clock.
pub struct HybridClock {
    node_id: u16,
    state: AtomicU64,
}

impl HybridClock {
    pub fn new(node_id: u16) -> Self {
        HybridClock {
            node_id,
            state: AtomicU64::new(pack(0, 0)),
        }
    }

    /// Returns a timestamp greater than every timestamp previously returned
    /// by or observed by this clock.
    pub fn now(&self) -> Timestamp {
        let wall = now_millis();
        let mut prev = self.state.load(Ordering::Relaxed);
        loop {
            let (prev_physical, prev_logical) = unpack(prev);
            let (next_physical, next_logical) = if wall > prev_physical {
                (wall, 0)
            } else {
                (prev_physical, prev_logical + 1)
            };
            let next = pack(next_physical, next_logical);
            match self
                .state
                .compare_exchange_weak(prev, next, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => return Timestamp::new(next_physical, next_logical, self.node_id),
                Err(actual) => prev = actual,
            }
        }
    }

    /// Folds in a timestamp observed from a remote node (e.g. on a message
    /// receive), advancing the local clock if the remote is ahead, then
    /// returns a fresh local timestamp strictly greater than both.
    pub fn update(&self, observed: Timestamp) -> Timestamp {
        let wall = now_millis();
        let mut prev = self.state.load(Ordering::Relaxed);
        loop {
            let (prev_physical, prev_logical) = unpack(prev);
            let max_physical = wall.max(prev_physical).max(observed.physical);
            let next = if max_physical == prev_physical && max_physical == observed.physical {
                pack(max_physical, prev_logical.max(observed.logical) + 1)
            } else if max_physical == prev_physical {
                pack(max_physical, prev_logical + 1)
            } else if max_physical == observed.physical {
                pack(max_physical, observed.logical + 1)
            } else {
                pack(max_physical, 0)
            };
            match self
                .state
                .compare_exchange_weak(prev, next, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => {
                    let (p, l) = unpack(next);
                    return Timestamp::new(p, l, self.node_id);
                }
                Err(actual) => prev = actual,
            }
        }
    }
}
