// volley_relay: room relay for volley matches.
//
// The relay is a thin message broker between the two players of a match and
// any number of spectators. Players join a room and stream their wire runs
// to it; the relay validates and stores every run in arrival order and
// forwards it to the room's spectators. A spectator that joins late gets the
// stored history in one batch, then the live stream. The relay never runs
// the simulation and never alters the runs it stores.
//
// Module overview:
// - `rooms.rs`:  Room state: history, stamped options and chat, players and
//                watchers. The data structure that `server.rs` drives.
// - `server.rs`: TCP listener, reader threads (one per client) and the main
//                event loop. Uses `std::net` with a thread-per-reader
//                architecture and an `mpsc` channel funnelling events into
//                the single-threaded `RoomRegistry`.
//
// The relay can run as a standalone binary (`main.rs`) or be embedded in a
// process via the library API (`start_relay`), which is how the end-to-end
// tests run it.

pub mod rooms;
pub mod server;

pub use server::{RelayConfig, RelayHandle, start_relay};
