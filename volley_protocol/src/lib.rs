// volley_protocol: everything two volley observers must agree on byte for
// byte: how an input is packed, how frames are tagged, how runs of inputs
// are laid out on the wire, and how the relay stream is framed.
//
// The crate is shared by the players' clients, the spectator client and the
// relay. It has no I/O beyond `Read`/`Write` framing and no knowledge of the
// simulation.
//
// Module overview:
// - `input.rs`:   `DiscreteInput` and the 5-bit `PackedInput` codec.
// - `counter.rs`: `SyncCounter`, the wrapping per-frame tag, and
//                 `MAX_RUN_LEN`.
// - `wire.rs`:    `WireRun`, builder and all-or-nothing parser for
//                 `[player][counter LE16][packed]*` messages.
// - `types.rs`:   `PlayerId`, `GameOptions`, `ChatMessage`, `Stamped<T>`.
// - `message.rs`: JSON control messages exchanged with the relay.
// - `framing.rs`: text/binary frames over any `Read`/`Write` stream.
//
// Design decisions:
// - **Inputs only.** State is never transmitted; lockstep determinism plus a
//   shared seed (`volley_prng`) is what keeps observers identical.
// - **Tolerant of the transport.** Nothing here assumes ordered or
//   exactly-once delivery; counters let the receiver detect duplicates,
//   overlap and gaps itself.

pub mod counter;
pub mod framing;
pub mod input;
pub mod message;
pub mod types;
pub mod wire;

pub use counter::{CYCLE_LEN, MAX_RUN_LEN, SyncCounter};
pub use framing::{Frame, MAX_FRAME_SIZE, read_frame, write_frame};
pub use input::{DiscreteInput, InputDecodeError, PackedInput, decode, encode};
pub use message::{ClientMessage, ServerMessage};
pub use types::{ChatMessage, GameOptions, GameSpeed, PlayerId, Stamped};
pub use wire::{HEADER_LEN, WireError, WireRun};

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    /// A history batch travels as JSON inside a text frame; every buffer in
    /// it must come back out as the same wire run.
    #[test]
    fn history_batch_through_the_frame_codec() {
        let runs: Vec<WireRun> = (0..3u8)
            .map(|i| {
                WireRun::new(
                    PlayerId::ALL[usize::from(i % 2)],
                    SyncCounter::new(i * 4),
                    vec![DiscreteInput::new(1, 0, i == 1).unwrap(); 4],
                )
                .unwrap()
            })
            .collect();
        let msg = ServerMessage::History {
            history: runs.iter().map(WireRun::to_bytes).collect(),
            options: vec![],
            chats: vec![],
        };

        let mut wire = Vec::new();
        write_frame(&mut wire, &Frame::json(&msg).unwrap()).unwrap();
        let frame = read_frame(&mut Cursor::new(&wire)).unwrap();
        let back: ServerMessage = frame.parse_json().unwrap().unwrap();

        let ServerMessage::History { history, .. } = back else {
            panic!("expected History");
        };
        let parsed: Vec<WireRun> = history
            .iter()
            .map(|b| WireRun::parse(b).unwrap())
            .collect();
        assert_eq!(parsed, runs);
    }

    /// A live run travels as a raw binary frame.
    #[test]
    fn live_run_as_binary_frame() {
        let run = WireRun::new(PlayerId::TWO, SyncCounter::new(255), vec![
            DiscreteInput::NEUTRAL,
            DiscreteInput::new(-1, 0, true).unwrap(),
        ])
        .unwrap();
        let mut wire = Vec::new();
        write_frame(&mut wire, &Frame::Binary(run.to_bytes())).unwrap();
        match read_frame(&mut Cursor::new(&wire)).unwrap() {
            Frame::Binary(bytes) => assert_eq!(WireRun::parse(&bytes).unwrap(), run),
            other => panic!("expected binary frame, got {other:?}"),
        }
    }
}
