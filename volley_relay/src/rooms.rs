// Room state for the relay.
//
// `RoomRegistry` is the central data structure that `server.rs` drives. It
// tracks every connection, which room it joined, and whether it plays or
// watches. All mutation happens through methods called from the server's
// single-threaded main loop; there is no internal locking.
//
// Each room keeps:
// - `history`: every wire message received from its players, in arrival
//   order, exactly as received. The relay validates a message before storing
//   it but never rewrites, merges or reorders anything; duplicates and
//   overlaps are the spectator's queue's business.
// - `options` / `chats`: stamped with the history length at arrival, so a
//   late spectator can interleave them at the right point.
// - `members` (players) and `watchers` (spectators).
//
// A `watch` is answered with the room's history: a `history` message,
// preceded by `history_part` slices when the batch would not fit in one
// frame. From then on every new run is forwarded to the room's watchers as a
// binary frame, options and chat as `live_options` / `live_chat`. A watch
// that is refused (watcher limit) or whose history cannot be delivered gets
// `rejected` and the connection is closed and forgotten.
//
// Writing to client streams: each connection's write half is a cloned
// `TcpStream` in a `BufWriter`. Write errors are logged and otherwise
// ignored; the connection's reader thread sees the broken pipe and reports
// the disconnect.

use std::collections::{BTreeMap, BTreeSet};
use std::io::{self, BufWriter};
use std::net::{Shutdown, TcpStream};

use tracing::{debug, info, warn};
use volley_protocol::{
    ChatMessage, Frame, GameOptions, MAX_FRAME_SIZE, ServerMessage, Stamped, WireRun, write_frame,
};

/// Estimated JSON size at which a history batch is split into another part.
/// Well below `MAX_FRAME_SIZE`, which leaves room for the stamped options
/// and chats in the final part.
const HISTORY_PART_BUDGET: usize = MAX_FRAME_SIZE as usize / 4;

/// Relay-assigned connection identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Role {
    Player,
    Watcher,
}

struct Connection {
    room: String,
    role: Role,
    writer: BufWriter<TcpStream>,
}

/// One match as the relay sees it.
#[derive(Debug, Default)]
pub struct Room {
    history: Vec<Vec<u8>>,
    options: Vec<Stamped<GameOptions>>,
    chats: Vec<Stamped<ChatMessage>>,
    players: BTreeSet<ConnectionId>,
    watchers: BTreeSet<ConnectionId>,
}

impl Room {
    pub fn history(&self) -> &[Vec<u8>] {
        &self.history
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn watcher_count(&self) -> usize {
        self.watchers.len()
    }

    fn is_empty(&self) -> bool {
        self.players.is_empty() && self.watchers.is_empty()
    }

    /// The history batch as messages whose estimated JSON size stays within
    /// `budget`: leading `HistoryPart`s, then one `History`.
    fn history_messages(&self, budget: usize) -> Vec<ServerMessage> {
        let mut parts: Vec<Vec<Vec<u8>>> = vec![Vec::new()];
        let mut size = 0;
        for run in &self.history {
            // Up to three digits and a comma per byte, plus brackets.
            let cost = run.len() * 4 + 2;
            if size + cost > budget && !parts.last().is_some_and(Vec::is_empty) {
                parts.push(Vec::new());
                size = 0;
            }
            size += cost;
            if let Some(part) = parts.last_mut() {
                part.push(run.clone());
            }
        }
        let last = parts.pop().unwrap_or_default();
        let mut messages: Vec<ServerMessage> = parts
            .into_iter()
            .map(|history| ServerMessage::HistoryPart { history })
            .collect();
        messages.push(ServerMessage::History {
            history: last,
            options: self.options.clone(),
            chats: self.chats.clone(),
        });
        messages
    }
}

pub struct RoomRegistry {
    rooms: BTreeMap<String, Room>,
    connections: BTreeMap<ConnectionId, Connection>,
    max_watchers_per_room: usize,
}

impl RoomRegistry {
    pub fn new(max_watchers_per_room: usize) -> Self {
        Self {
            rooms: BTreeMap::new(),
            connections: BTreeMap::new(),
            max_watchers_per_room,
        }
    }

    /// Register a connection in `room`, creating the room if needed. Every
    /// connection starts as a player; `watch` turns it into a spectator.
    pub fn join(
        &mut self,
        id: ConnectionId,
        room: String,
        stream: TcpStream,
    ) -> Result<(), String> {
        if room.is_empty() {
            return Err("room id must not be empty".into());
        }
        if self.connections.contains_key(&id) {
            return Err("already joined".into());
        }
        let entry = self.rooms.entry(room.clone()).or_default();
        entry.players.insert(id);
        debug!(?id, %room, players = entry.players.len(), "connection joined room");
        self.connections.insert(
            id,
            Connection {
                room,
                role: Role::Player,
                writer: BufWriter::new(stream),
            },
        );
        Ok(())
    }

    /// Turn `id` into a spectator and send it the room's history.
    pub fn watch(&mut self, id: ConnectionId) {
        let Some(conn) = self.connections.get(&id) else {
            return;
        };
        if conn.role == Role::Watcher {
            return;
        }
        let room_name = conn.room.clone();
        let Some(room) = self.rooms.get_mut(&room_name) else {
            return;
        };
        if room.watchers.len() >= self.max_watchers_per_room {
            warn!(?id, room = %room_name, "watcher limit reached");
            self.evict(id, "too many spectators in this room");
            return;
        }
        room.players.remove(&id);
        room.watchers.insert(id);
        let batch = room.history_messages(HISTORY_PART_BUDGET);
        info!(
            ?id,
            room = %room_name,
            buffers = room.history.len(),
            parts = batch.len(),
            "spectator watching"
        );
        if let Some(conn) = self.connections.get_mut(&id) {
            conn.role = Role::Watcher;
        }
        for msg in &batch {
            if let Err(e) = self.try_send_to(id, msg) {
                warn!(?id, room = %room_name, error = %e, "history could not be delivered");
                self.evict(id, "history could not be delivered");
                return;
            }
        }
    }

    /// Store a run from a player and forward it to the room's watchers.
    /// Malformed runs and runs from spectators are dropped.
    pub fn record_run(&mut self, id: ConnectionId, bytes: Vec<u8>) {
        let Some(room_name) = self.player_room(id) else {
            warn!(?id, "input from a connection that is not a player");
            return;
        };
        if let Err(e) = WireRun::parse(&bytes) {
            warn!(?id, error = %e, "dropping malformed wire message");
            return;
        }
        let Some(room) = self.rooms.get_mut(&room_name) else {
            return;
        };
        room.history.push(bytes.clone());
        let watchers: Vec<ConnectionId> = room.watchers.iter().copied().collect();
        let frame = Frame::Binary(bytes);
        for watcher in watchers {
            self.write_to(watcher, &frame);
        }
    }

    pub fn record_options(&mut self, id: ConnectionId, options: GameOptions) {
        let Some(room_name) = self.player_room(id) else {
            return;
        };
        let Some(room) = self.rooms.get_mut(&room_name) else {
            return;
        };
        room.options.push(Stamped {
            after: room.history.len(),
            value: options,
        });
        debug!(room = %room_name, ?options, "options recorded");
        self.broadcast_watchers(&room_name, &ServerMessage::LiveOptions { value: options });
    }

    pub fn record_chat(&mut self, id: ConnectionId, chat: ChatMessage) {
        if chat.player().is_none() {
            warn!(?id, side = chat.which_player_side, "chat with invalid player side");
            return;
        }
        let Some(room_name) = self.player_room(id) else {
            return;
        };
        let Some(room) = self.rooms.get_mut(&room_name) else {
            return;
        };
        room.chats.push(Stamped {
            after: room.history.len(),
            value: chat.clone(),
        });
        self.broadcast_watchers(&room_name, &ServerMessage::LiveChat { value: chat });
    }

    /// Forget a connection. A room is discarded with its history once nobody
    /// is left in it.
    pub fn leave(&mut self, id: ConnectionId) {
        let Some(conn) = self.connections.remove(&id) else {
            return;
        };
        if let Some(room) = self.rooms.get_mut(&conn.room) {
            room.players.remove(&id);
            room.watchers.remove(&id);
            if room.is_empty() {
                info!(room = %conn.room, buffers = room.history.len(), "room closed");
                self.rooms.remove(&conn.room);
            }
        }
        debug!(?id, "connection left");
    }

    /// Shut every socket down so reader threads and clients see EOF.
    pub fn disconnect_all(&mut self) {
        for conn in self.connections.values() {
            let _ = conn.writer.get_ref().shutdown(Shutdown::Both);
        }
        self.connections.clear();
        self.rooms.clear();
    }

    pub fn room(&self, name: &str) -> Option<&Room> {
        self.rooms.get(name)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    fn player_room(&self, id: ConnectionId) -> Option<String> {
        self.connections
            .get(&id)
            .filter(|c| c.role == Role::Player)
            .map(|c| c.room.clone())
    }

    fn broadcast_watchers(&mut self, room_name: &str, msg: &ServerMessage) {
        let Some(room) = self.rooms.get(room_name) else {
            return;
        };
        let watchers: Vec<ConnectionId> = room.watchers.iter().copied().collect();
        for watcher in watchers {
            self.send_to(watcher, msg);
        }
    }

    fn send_to(&mut self, id: ConnectionId, msg: &ServerMessage) {
        if let Err(e) = self.try_send_to(id, msg) {
            debug!(?id, error = %e, "write failed");
        }
    }

    fn try_send_to(&mut self, id: ConnectionId, msg: &ServerMessage) -> io::Result<()> {
        let frame = Frame::json(msg).map_err(io::Error::other)?;
        match self.connections.get_mut(&id) {
            Some(conn) => write_frame(&mut conn.writer, &frame),
            None => Ok(()),
        }
    }

    /// Send `Rejected`, close the socket and forget the connection. Its
    /// reader thread sees EOF; the later `leave` is a no-op.
    fn evict(&mut self, id: ConnectionId, reason: &str) {
        self.send_to(
            id,
            &ServerMessage::Rejected {
                reason: reason.into(),
            },
        );
        if let Some(conn) = self.connections.get(&id) {
            let _ = conn.writer.get_ref().shutdown(Shutdown::Both);
        }
        self.leave(id);
    }

    fn write_to(&mut self, id: ConnectionId, frame: &Frame) {
        if let Some(conn) = self.connections.get_mut(&id)
            && let Err(e) = write_frame(&mut conn.writer, frame)
        {
            debug!(?id, error = %e, "write failed");
        }
    }
}

/// Send `Rejected` on a stream that never made it into the registry, then
/// close it.
pub fn reject(stream: TcpStream, reason: String) -> io::Result<()> {
    let frame = Frame::json(&ServerMessage::Rejected { reason }).map_err(io::Error::other)?;
    let mut writer = BufWriter::new(stream);
    let sent = write_frame(&mut writer, &frame);
    let _ = writer.get_ref().shutdown(Shutdown::Both);
    sent
}

#[cfg(test)]
mod tests {
    use std::io::BufReader;
    use std::net::TcpListener;

    use volley_protocol::{DiscreteInput, GameSpeed, PlayerId, SyncCounter, read_frame};

    use super::*;

    /// Create a TCP pair: (client_stream, server_stream) on localhost.
    fn tcp_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    fn recv_frame(stream: &mut BufReader<TcpStream>) -> Frame {
        read_frame(stream).unwrap()
    }

    fn recv_msg(stream: &mut BufReader<TcpStream>) -> ServerMessage {
        recv_frame(stream).parse_json().unwrap().unwrap()
    }

    fn run_bytes(player: PlayerId, start: u8, len: usize) -> Vec<u8> {
        let inputs = vec![DiscreteInput::NEUTRAL; len];
        WireRun::new(player, SyncCounter::new(start), inputs)
            .unwrap()
            .to_bytes()
    }

    /// Join `id` to `room`, returning the client's read half.
    fn join(reg: &mut RoomRegistry, id: u64, room: &str) -> BufReader<TcpStream> {
        let (client, server) = tcp_pair();
        reg.join(ConnectionId(id), room.into(), server).unwrap();
        BufReader::new(client)
    }

    #[test]
    fn history_is_stored_in_arrival_order() {
        let mut reg = RoomRegistry::new(8);
        let _p1 = join(&mut reg, 1, "r");
        let _p2 = join(&mut reg, 2, "r");
        reg.record_run(ConnectionId(1), run_bytes(PlayerId::ONE, 0, 3));
        reg.record_run(ConnectionId(2), run_bytes(PlayerId::TWO, 0, 3));
        // Duplicates are stored as received.
        reg.record_run(ConnectionId(1), run_bytes(PlayerId::ONE, 0, 3));
        let room = reg.room("r").unwrap();
        assert_eq!(room.history().len(), 3);
        assert_eq!(room.history()[1], run_bytes(PlayerId::TWO, 0, 3));
        assert_eq!(room.player_count(), 2);
    }

    #[test]
    fn malformed_runs_are_not_stored() {
        let mut reg = RoomRegistry::new(8);
        let _p1 = join(&mut reg, 1, "r");
        reg.record_run(ConnectionId(1), vec![0, 0]);
        reg.record_run(ConnectionId(1), vec![5, 0, 0, 0]);
        reg.record_run(ConnectionId(1), vec![0, 0, 0, 0b11]);
        assert!(reg.room("r").unwrap().history().is_empty());
    }

    #[test]
    fn watch_sends_history_then_live() {
        let mut reg = RoomRegistry::new(8);
        let _p1 = join(&mut reg, 1, "r");
        reg.record_options(
            ConnectionId(1),
            GameOptions {
                speed: GameSpeed::Fast,
                winning_score: 5,
            },
        );
        reg.record_run(ConnectionId(1), run_bytes(PlayerId::ONE, 0, 2));
        reg.record_chat(
            ConnectionId(1),
            ChatMessage {
                which_player_side: 1,
                chat_message: "hi".into(),
            },
        );

        let mut spectator = join(&mut reg, 9, "r");
        reg.watch(ConnectionId(9));
        match recv_msg(&mut spectator) {
            ServerMessage::History {
                history,
                options,
                chats,
            } => {
                assert_eq!(history, vec![run_bytes(PlayerId::ONE, 0, 2)]);
                assert_eq!(options[0].after, 0);
                assert_eq!(chats[0].after, 1);
            }
            other => panic!("expected History, got {other:?}"),
        }

        reg.record_run(ConnectionId(1), run_bytes(PlayerId::ONE, 2, 2));
        assert_eq!(
            recv_frame(&mut spectator),
            Frame::Binary(run_bytes(PlayerId::ONE, 2, 2))
        );
        let room = reg.room("r").unwrap();
        assert_eq!(room.watcher_count(), 1);
        assert_eq!(room.player_count(), 1);
    }

    #[test]
    fn spectators_cannot_inject_input() {
        let mut reg = RoomRegistry::new(8);
        let _s = join(&mut reg, 1, "r");
        reg.watch(ConnectionId(1));
        reg.record_run(ConnectionId(1), run_bytes(PlayerId::ONE, 0, 1));
        assert!(reg.room("r").unwrap().history().is_empty());
    }

    #[test]
    fn watcher_limit() {
        let mut reg = RoomRegistry::new(1);
        let _a = join(&mut reg, 1, "r");
        reg.watch(ConnectionId(1));
        let mut b = join(&mut reg, 2, "r");
        reg.watch(ConnectionId(2));
        assert!(matches!(recv_msg(&mut b), ServerMessage::Rejected { .. }));
        assert_eq!(reg.room("r").unwrap().watcher_count(), 1);

        // The refused connection is gone: it can no longer feed the history.
        assert_eq!(reg.room("r").unwrap().player_count(), 0);
        assert_eq!(reg.connection_count(), 1);
        reg.record_run(ConnectionId(2), run_bytes(PlayerId::ONE, 0, 1));
        assert!(reg.room("r").unwrap().history().is_empty());
        let err = read_frame(&mut b).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn large_history_is_split_into_parts() {
        let mut room = Room::default();
        for i in 0..10u8 {
            room.history.push(run_bytes(PlayerId::ONE, i, 10));
        }
        room.chats.push(Stamped {
            after: 7,
            value: ChatMessage {
                which_player_side: 1,
                chat_message: "gl".into(),
            },
        });
        // Each 13-byte run is estimated at 54 bytes: three runs per part.
        let messages = room.history_messages(170);
        assert_eq!(messages.len(), 4);
        let mut joined = Vec::new();
        for msg in &messages[..3] {
            match msg {
                ServerMessage::HistoryPart { history } => {
                    assert_eq!(history.len(), 3);
                    joined.extend(history.iter().cloned());
                }
                other => panic!("expected HistoryPart, got {other:?}"),
            }
        }
        match &messages[3] {
            ServerMessage::History { history, chats, .. } => {
                joined.extend(history.iter().cloned());
                assert_eq!(chats[0].after, 7);
            }
            other => panic!("expected History, got {other:?}"),
        }
        assert_eq!(joined, room.history);

        // A budget below one run still makes progress.
        assert_eq!(room.history_messages(1).len(), 10);
        // Small batches stay a single message.
        assert!(matches!(
            Room::default().history_messages(HISTORY_PART_BUDGET)[..],
            [ServerMessage::History { .. }]
        ));
    }

    #[test]
    fn undeliverable_history_is_rejected() {
        let mut reg = RoomRegistry::new(8);
        let _p = join(&mut reg, 1, "r");
        // One chat line larger than any frame.
        reg.record_chat(
            ConnectionId(1),
            ChatMessage {
                which_player_side: 1,
                chat_message: "x".repeat(MAX_FRAME_SIZE as usize),
            },
        );
        let mut s = join(&mut reg, 2, "r");
        reg.watch(ConnectionId(2));
        match recv_msg(&mut s) {
            ServerMessage::Rejected { reason } => assert!(reason.contains("history")),
            other => panic!("expected Rejected, got {other:?}"),
        }
        assert_eq!(reg.room("r").unwrap().watcher_count(), 0);
        assert_eq!(reg.connection_count(), 1);
    }

    #[test]
    fn rooms_are_isolated() {
        let mut reg = RoomRegistry::new(8);
        let _a = join(&mut reg, 1, "a");
        let _b = join(&mut reg, 2, "b");
        reg.record_run(ConnectionId(1), run_bytes(PlayerId::ONE, 0, 1));
        assert_eq!(reg.room("a").unwrap().history().len(), 1);
        assert!(reg.room("b").unwrap().history().is_empty());
        assert_eq!(reg.room_count(), 2);
    }

    #[test]
    fn empty_room_is_discarded() {
        let mut reg = RoomRegistry::new(8);
        let _a = join(&mut reg, 1, "r");
        let _b = join(&mut reg, 2, "r");
        reg.leave(ConnectionId(1));
        assert_eq!(reg.room_count(), 1);
        reg.leave(ConnectionId(2));
        assert_eq!(reg.room_count(), 0);
        assert_eq!(reg.connection_count(), 0);
    }

    #[test]
    fn join_validation() {
        let mut reg = RoomRegistry::new(8);
        let (_c, s) = tcp_pair();
        assert!(reg.join(ConnectionId(1), String::new(), s).is_err());
        let _a = join(&mut reg, 1, "r");
        let (_c, s) = tcp_pair();
        assert!(reg.join(ConnectionId(1), "r".into(), s).is_err());
    }

    #[test]
    fn invalid_chat_side_is_dropped() {
        let mut reg = RoomRegistry::new(8);
        let _a = join(&mut reg, 1, "r");
        let mut s = join(&mut reg, 2, "r");
        reg.watch(ConnectionId(2));
        let _history = recv_msg(&mut s);
        reg.record_chat(
            ConnectionId(1),
            ChatMessage {
                which_player_side: 7,
                chat_message: "?".into(),
            },
        );
        reg.record_chat(
            ConnectionId(1),
            ChatMessage {
                which_player_side: 2,
                chat_message: "ok".into(),
            },
        );
        match recv_msg(&mut s) {
            ServerMessage::LiveChat { value } => assert_eq!(value.chat_message, "ok"),
            other => panic!("expected LiveChat, got {other:?}"),
        }
    }
}
