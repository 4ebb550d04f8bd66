// Wire messages: a contiguous run of one player's packed inputs.
//
// Layout:
//
//   [player_id: u8][start_counter: u16 LE][packed_input: u8] * n
//
// The i-th trailing byte is the input for counter `start_counter + i`
// (mod 256). The same bytes travel over the peer channel (unframed), inside
// the relay's history batch, and as the relay's live binary frames.
//
// Parsing is all-or-nothing: a buffer with a bad header, an impossible run
// length or a single undecodable input byte is rejected whole, so callers
// never apply half a message.

use thiserror::Error;

use crate::counter::{MAX_RUN_LEN, SyncCounter};
use crate::input::{self, DiscreteInput, InputDecodeError, PackedInput};
use crate::types::PlayerId;

/// Player id byte plus the 2-byte start counter.
pub const HEADER_LEN: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    #[error("wire message too short: {actual} bytes, need at least {HEADER_LEN}")]
    TooShort { actual: usize },
    #[error("wire message names unknown player id {raw}")]
    UnknownPlayer { raw: u8 },
    #[error("wire message carries no inputs")]
    EmptyRun,
    #[error("wire message carries {len} inputs (max {MAX_RUN_LEN})")]
    RunTooLong { len: usize },
    #[error("input byte {index} of wire message is invalid: {source}")]
    BadInput {
        index: usize,
        #[source]
        source: InputDecodeError,
    },
}

/// A parsed (or to-be-sent) wire message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WireRun {
    player: PlayerId,
    start: SyncCounter,
    inputs: Vec<DiscreteInput>,
}

impl WireRun {
    /// Build a run. The run must hold between 1 and `MAX_RUN_LEN` inputs.
    pub fn new(
        player: PlayerId,
        start: SyncCounter,
        inputs: Vec<DiscreteInput>,
    ) -> Result<Self, WireError> {
        check_run_len(inputs.len())?;
        Ok(Self {
            player,
            start,
            inputs,
        })
    }

    pub fn parse(buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < HEADER_LEN {
            return Err(WireError::TooShort { actual: buf.len() });
        }
        let player = PlayerId::from_wire(buf[0]).ok_or(WireError::UnknownPlayer { raw: buf[0] })?;
        let start = SyncCounter::from_wire(u16::from_le_bytes([buf[1], buf[2]]));

        let body = &buf[HEADER_LEN..];
        check_run_len(body.len())?;
        let inputs = body
            .iter()
            .enumerate()
            .map(|(index, &raw)| {
                input::decode(PackedInput::from_raw(raw))
                    .map_err(|source| WireError::BadInput { index, source })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            player,
            start,
            inputs,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + self.inputs.len());
        buf.push(self.player.to_wire());
        buf.extend_from_slice(&u16::from(self.start).to_le_bytes());
        buf.extend(self.inputs.iter().map(|&i| input::encode(i).raw()));
        buf
    }

    pub fn player(&self) -> PlayerId {
        self.player
    }

    pub fn start(&self) -> SyncCounter {
        self.start
    }

    /// Counter of the last input in the run.
    pub fn last_counter(&self) -> SyncCounter {
        self.start.advance(self.inputs.len() - 1)
    }

    pub fn inputs(&self) -> &[DiscreteInput] {
        &self.inputs
    }

    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    /// Always false for a constructed run; kept for the usual `len` pairing.
    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    /// Inputs paired with their effective counters, in run order.
    pub fn tagged(&self) -> impl Iterator<Item = (SyncCounter, DiscreteInput)> + '_ {
        self.inputs
            .iter()
            .enumerate()
            .map(|(i, &input)| (self.start.advance(i), input))
    }
}

fn check_run_len(len: usize) -> Result<(), WireError> {
    match len {
        0 => Err(WireError::EmptyRun),
        n if n > MAX_RUN_LEN => Err(WireError::RunTooLong { len: n }),
        _ => Ok(()),
    }
}
