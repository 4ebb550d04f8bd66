// Sync counters: per-player frame tags that wrap every 256 frames.
//
// Every transmitted input is tagged with its frame's counter modulo 256 so
// the tag fits in a byte. Counters live on a ring, so they have no total
// order; the only meaningful questions are "how many steps forward from a to
// b" and "is that distance small enough to mean ahead rather than behind".
// The usual sequence-number assumption applies: two counters from one
// player's stream are compared correctly while their true gap is below half
// the cycle.

use serde::{Deserialize, Serialize};

/// Number of distinct counter values.
pub const CYCLE_LEN: u16 = 256;

/// Largest number of inputs one wire message may carry, and the largest
/// forward distance treated as "ahead". Kept below half the cycle so a
/// forward distance can always be told apart from a backward one.
pub const MAX_RUN_LEN: usize = 127;

/// A frame tag modulo `CYCLE_LEN`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SyncCounter(u8);

impl SyncCounter {
    pub const ZERO: Self = Self(0);

    pub fn new(value: u8) -> Self {
        Self(value)
    }

    /// Reduce an arbitrary wire value (2 bytes on the wire) onto the ring.
    pub fn from_wire(raw: u16) -> Self {
        Self((raw % CYCLE_LEN) as u8)
    }

    pub fn value(self) -> u8 {
        self.0
    }

    /// The counter of the following frame.
    pub fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }

    /// The counter `steps` frames later.
    pub fn advance(self, steps: usize) -> Self {
        Self(self.0.wrapping_add((steps % usize::from(CYCLE_LEN)) as u8))
    }

    /// Steps forward from `self` to reach `to`, in `0..CYCLE_LEN`.
    pub fn forward_distance(self, to: Self) -> u8 {
        to.0.wrapping_sub(self.0)
    }
}

impl From<SyncCounter> for u16 {
    fn from(counter: SyncCounter) -> Self {
        u16::from(counter.0)
    }
}
