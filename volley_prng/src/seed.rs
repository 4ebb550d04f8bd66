// Session seed: the room identifier as a value object.
//
// Both peers learn the room id during signaling and spectators learn it from
// the relay URL, so the room id is the one piece of shared state every
// observer already has. `SessionSeed` hashes it with FNV-1a (stable across
// platforms and releases, unlike std's `DefaultHasher`) and hands out
// independent `GameRng` streams for each consumer.

use serde::{Deserialize, Serialize};

use crate::rng::{GameRng, splitmix64};

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Named sub-streams derived from one session seed. Each stream is
/// independent: drawing chat positions never perturbs the physics stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RngStream {
    /// Game simulation (ball physics, serve direction, clouds and waves).
    Simulation,
    /// Chat bubble placement for player side 1 or 2.
    Chat { side: u8 },
}

impl RngStream {
    fn tag(self) -> u64 {
        match self {
            Self::Simulation => 0x5349_4d55,
            Self::Chat { side } => 0x4348_4154_0000 | u64::from(side),
        }
    }
}

/// Deterministic seed shared by every observer of a room.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionSeed {
    room_id: String,
    value: u64,
}

impl SessionSeed {
    pub fn from_room_id(room_id: impl Into<String>) -> Self {
        let room_id = room_id.into();
        let value = fnv1a64(room_id.as_bytes());
        Self { room_id, value }
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn value(&self) -> u64 {
        self.value
    }

    /// A fresh generator for `stream`, positioned at the start of the stream.
    pub fn rng(&self, stream: RngStream) -> GameRng {
        let mut mix = self.value ^ stream.tag();
        GameRng::new(splitmix64(&mut mix))
    }
}

fn fnv1a64(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET_BASIS, |hash, &b| {
        (hash ^ u64::from(b)).wrapping_mul(FNV_PRIME)
    })
}
