// volley_sync: turning received inputs back into a deterministic match.
//
// Players exchange only per-frame inputs; every observer rebuilds the game by
// running the same simulation over the same inputs from the same seed. This
// crate holds the machinery between the wire and the simulation: the
// per-player reconstruction queues, the driver that steps (and replays) the
// simulation, the transports that carry runs, and the sessions that wire
// them together for players and spectators.
//
// Module overview:
// - `queue.rs`:     `ReconstructionQueue`: dedup, overlap and gap policy.
// - `driver.rs`:    `Simulation` trait, `SimulationDriver` state machine,
//                   seeking, options/chat timeline.
// - `transport.rs`: `InputTransport` trait, `RelayClient`, `PeerChannel`.
// - `session.rs`:   `SpectatorSession` (history + live) and `PeerSession`.
// - `input_log.rs`: `LocalInputLog`, the sending side's windowed runs.
// - `playback.rs`:  `PlaybackSpeed` and the tick clock.
// - `chat.rs`:      deterministic chat bubble placement.
// - `config.rs`:    `SpectatorConfig`.
//
// Invariant carried by every module: input for a frame is either the one the
// player sent or absent. Nothing ever fills a missing frame with a guess.

pub mod chat;
pub mod config;
pub mod driver;
pub mod input_log;
pub mod playback;
pub mod queue;
pub mod session;
pub mod transport;

pub use chat::{ChatPlacement, PlacedChat};
pub use config::SpectatorConfig;
pub use driver::{
    DriverError, DriverState, EndReason, Simulation, SimulationDriver, SyncAnomaly, Tick,
};
pub use input_log::LocalInputLog;
pub use playback::{PlaybackSpeed, Ticker};
pub use queue::{ApplyOutcome, ReconstructionQueue};
pub use session::{DEFAULT_RESEND_WINDOW, PeerSession, SessionStatus, SpectatorSession};
pub use transport::{InputTransport, PeerChannel, RelayClient, TransportError, TransportEvent};
