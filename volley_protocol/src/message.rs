// Relay control messages.
//
// Text frames on the relay stream are JSON objects tagged by `type`, the
// same shape the browser client exchanges with the relay over WebSocket:
// `{"type":"watch"}`, `{"type":"history","history":[...]}`,
// `{"type":"live_input","value":[...]}` and so on. Wire messages embedded in
// JSON (`history`, `live_input`) are plain byte arrays.
//
// Binary frames are not messages: they carry one raw `WireRun` each and are
// handled by the caller directly (see `framing.rs`).

use serde::{Deserialize, Serialize};

use crate::types::{ChatMessage, GameOptions, Stamped};

/// Messages sent by a player or spectator to the relay.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Enter a room. Must be the first frame on a connection.
    Join { room: String },
    /// Subscribe as a spectator: the relay answers with `History` and then
    /// forwards live traffic.
    Watch,
    /// Game options chosen by the players.
    Options { options: GameOptions },
    /// A chat line from one of the players.
    Chat {
        #[serde(rename = "whichPlayerSide")]
        which_player_side: u8,
        #[serde(rename = "chatMessage")]
        chat_message: String,
    },
    /// Leaving the room.
    Goodbye,
}

impl From<ChatMessage> for ClientMessage {
    fn from(chat: ChatMessage) -> Self {
        Self::Chat {
            which_player_side: chat.which_player_side,
            chat_message: chat.chat_message,
        }
    }
}

/// Messages sent by the relay.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// A leading slice of a history batch too large for one frame. Zero or
    /// more of these precede the `History` that completes the batch; the
    /// receiver concatenates the slices in order.
    HistoryPart { history: Vec<Vec<u8>> },
    /// Every wire message recorded for the room so far, in arrival order,
    /// plus the options and chat lines stamped with their history position.
    /// When preceded by `HistoryPart`s, `history` holds only the last slice
    /// and the stamps index into the whole batch.
    History {
        history: Vec<Vec<u8>>,
        #[serde(default)]
        options: Vec<Stamped<GameOptions>>,
        #[serde(default)]
        chats: Vec<Stamped<ChatMessage>>,
    },
    /// One wire message, as JSON. Equivalent to a binary frame.
    LiveInput { value: Vec<u8> },
    LiveOptions { value: GameOptions },
    LiveChat { value: ChatMessage },
    /// Join or watch refused.
    Rejected { reason: String },
}
