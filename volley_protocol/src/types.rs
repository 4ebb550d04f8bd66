// Small shared value types: player identity and the options/chat payloads
// that travel alongside inputs.
//
// `PlayerId` is the 1-byte id at the head of every wire message. Only two
// players exist in a volley match; the id doubles as the index of the
// player's reconstruction queue. Chat and options payloads mirror the JSON
// the game client exchanges with the relay, so their serde names follow the
// client's field names.

use serde::{Deserialize, Serialize};

/// Player identity as carried on the wire: 0 for the left player (room
/// creator by default), 1 for the right player.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlayerId(u8);

impl PlayerId {
    pub const ONE: Self = Self(0);
    pub const TWO: Self = Self(1);
    pub const ALL: [Self; 2] = [Self::ONE, Self::TWO];

    /// Validate a wire byte. Anything other than 0 or 1 is not a player.
    pub fn from_wire(raw: u8) -> Option<Self> {
        (raw <= 1).then_some(Self(raw))
    }

    pub fn to_wire(self) -> u8 {
        self.0
    }

    /// Queue index (0 or 1).
    pub fn index(self) -> usize {
        usize::from(self.0)
    }

    /// 1-based side number used by chat messages.
    pub fn side(self) -> u8 {
        self.0 + 1
    }

    pub fn from_side(side: u8) -> Option<Self> {
        side.checked_sub(1).and_then(Self::from_wire)
    }
}

/// Game speed option. Determines how many frames the simulation runs per
/// second of wall-clock time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameSpeed {
    Slow,
    #[default]
    Medium,
    Fast,
}

impl GameSpeed {
    pub fn normal_fps(self) -> u32 {
        match self {
            Self::Slow => 20,
            Self::Medium => 25,
            Self::Fast => 30,
        }
    }
}

/// Options agreed by the two players (speed and winning score).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameOptions {
    pub speed: GameSpeed,
    pub winning_score: u32,
}

impl Default for GameOptions {
    fn default() -> Self {
        Self {
            speed: GameSpeed::Medium,
            winning_score: 15,
        }
    }
}

/// A chat line from one of the players.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// 1 or 2.
    pub which_player_side: u8,
    pub chat_message: String,
}

impl ChatMessage {
    pub fn player(&self) -> Option<PlayerId> {
        PlayerId::from_side(self.which_player_side)
    }
}

/// A value recorded by the relay together with the number of input buffers
/// that were already in the room's history when it arrived. Lets a late
/// spectator interleave options and chat with the history replay exactly as
/// a live spectator would have seen them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Stamped<T> {
    pub after: usize,
    pub value: T,
}
