// Chat bubble placement.
//
// The game client shows each chat line as a bubble at a random height on the
// speaker's side of the screen. The position is drawn from a per-side RNG
// stream derived from the session seed, so a spectator replaying history
// places every bubble where the players saw it. The draw happens when the
// line is recorded, not when it is displayed; seeking never re-draws.

use volley_prng::{GameRng, RngStream, SessionSeed};
use volley_protocol::{ChatMessage, PlayerId};

/// A recorded chat line with its screen position, in percent of the
/// viewport.
#[derive(Clone, Debug, PartialEq)]
pub struct PlacedChat {
    /// First frame not yet available when the line arrived.
    pub frame: usize,
    pub player: PlayerId,
    pub text: String,
    /// Distance from the top edge, 20..50.
    pub top_percent: f64,
    /// Distance from the speaker's outer edge, 55..80.
    pub side_offset_percent: f64,
}

pub struct ChatPlacement {
    rngs: [GameRng; 2],
}

impl ChatPlacement {
    pub fn new(seed: &SessionSeed) -> Self {
        Self {
            rngs: PlayerId::ALL.map(|p| seed.rng(RngStream::Chat { side: p.side() })),
        }
    }

    /// Next `(top%, side_offset%)` for a bubble on `side` (1 or 2).
    pub fn next(&mut self, side: u8) -> Option<(f64, f64)> {
        let player = PlayerId::from_side(side)?;
        let rng = &mut self.rngs[player.index()];
        let top = 20.0 + 30.0 * rng.next_f64();
        let offset = 55.0 + 25.0 * rng.next_f64();
        Some((top, offset))
    }

    /// Place `message`, recorded at `frame`. `None` if the side is invalid.
    pub fn place(&mut self, frame: usize, message: ChatMessage) -> Option<PlacedChat> {
        let player = message.player()?;
        let (top_percent, side_offset_percent) = self.next(message.which_player_side)?;
        Some(PlacedChat {
            frame,
            player,
            text: message.chat_message,
            top_percent,
            side_offset_percent,
        })
    }
}
