// Sessions: a driver wired to its transports.
//
// `SpectatorSession` follows a room through the relay. The relay answers
// `watch` with one `history` batch (split into leading `history_part`
// slices when it is large) and then forwards live traffic. History
// must be drained completely, in list order, before any live buffer is
// applied; live traffic that overtakes the history (it can, the relay
// forwards as soon as it receives) is held back and flushed right after.
// Options and chat lines recorded in the history carry the number of input
// buffers that preceded them and are interleaved at exactly that position,
// which reproduces what a spectator present from the start would have seen.
//
// `PeerSession` is a player's side: it records local inputs, applies them to
// its own driver and sends them to the opponent over a direct channel, and
// optionally mirrors them to a relay so spectators can follow. Option changes
// and chat lines travel the same channel as text frames, between the runs,
// so both players record them against the same frame and draw bubble
// positions from the same per-side streams.
//
// Both sessions are single-owner and event driven. `pump()` drains
// transport events without blocking and must be called between ticks; it
// never advances the simulation by itself.
//
// See also: `driver.rs` (the one apply path both sessions feed),
// `transport.rs` (the adapters), `playback.rs` (spectator tick pacing).

use std::time::Instant;

use tracing::{debug, warn};
use volley_prng::SessionSeed;
use volley_protocol::{
    ChatMessage, ClientMessage, DiscreteInput, Frame, GameOptions, PlayerId, ServerMessage,
    Stamped, SyncCounter,
};

use crate::config::SpectatorConfig;
use crate::driver::{DriverState, EndReason, Simulation, SimulationDriver, SyncAnomaly, Tick};
use crate::input_log::LocalInputLog;
use crate::playback::{PlaybackSpeed, Ticker};
use crate::transport::{InputTransport, RelayClient, TransportError, TransportEvent};

/// What a session looks like after a `pump()`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionStatus {
    /// Connected, no history (spectator) yet.
    Waiting,
    Playing,
    Paused,
    /// Gaps were detected during this pump. The simulation may no longer
    /// match the players'; reconnecting replays the history.
    Desynced { anomalies: Vec<SyncAnomaly> },
    Ended(EndReason),
}

fn status_of<S: Simulation>(
    driver: &SimulationDriver<S>,
    anomalies_before: usize,
) -> SessionStatus {
    if let Some(reason) = driver.end_reason() {
        return SessionStatus::Ended(reason.clone());
    }
    let new = &driver.anomalies()[anomalies_before..];
    if !new.is_empty() {
        return SessionStatus::Desynced {
            anomalies: new.to_vec(),
        };
    }
    match driver.phase() {
        DriverState::WaitingForSession => SessionStatus::Waiting,
        DriverState::Paused => SessionStatus::Paused,
        DriverState::LivePlaying | DriverState::Seeking | DriverState::Ended => {
            SessionStatus::Playing
        }
    }
}

fn apply_bytes<S: Simulation>(driver: &mut SimulationDriver<S>, bytes: &[u8]) {
    if let Err(e) = driver.apply_wire(bytes) {
        warn!(error = %e, len = bytes.len(), "dropping malformed wire message");
    }
}

// ---------------------------------------------------------------------------
// Spectator
// ---------------------------------------------------------------------------

/// Live traffic received before the history batch.
#[derive(Debug)]
enum Pending {
    Input(Vec<u8>),
    Options(GameOptions),
    Chat(ChatMessage),
}

pub struct SpectatorSession<S: Simulation, T: InputTransport = RelayClient> {
    driver: SimulationDriver<S>,
    transport: T,
    playback: PlaybackSpeed,
    join_at_live_edge: bool,
    history_received: bool,
    /// Slices of a split history batch received so far.
    partial_history: Vec<Vec<u8>>,
    held: Vec<Pending>,
    ticker: Ticker,
}

impl<S: Simulation> SpectatorSession<S, RelayClient> {
    /// Connect to the relay named in `config` and start watching its room.
    pub fn connect(config: &SpectatorConfig, sim: S) -> Result<Self, TransportError> {
        let mut client = RelayClient::open(&config.relay_addr, &config.room)?;
        client.watch()?;
        let seed = SessionSeed::from_room_id(config.room.as_str());
        Ok(Self::new(SimulationDriver::new(sim, seed), client, config))
    }
}

impl<S: Simulation, T: InputTransport> SpectatorSession<S, T> {
    /// Wrap an already-watching transport.
    pub fn new(driver: SimulationDriver<S>, transport: T, config: &SpectatorConfig) -> Self {
        Self {
            driver,
            transport,
            playback: config.playback,
            join_at_live_edge: config.join_at_live_edge,
            history_received: false,
            partial_history: Vec::new(),
            held: Vec::new(),
            ticker: Ticker::default(),
        }
    }

    pub fn driver(&self) -> &SimulationDriver<S> {
        &self.driver
    }

    /// For seeking and pausing. Pausing through the driver also freezes
    /// the tick clock at the next `tick_due`.
    pub fn driver_mut(&mut self) -> &mut SimulationDriver<S> {
        &mut self.driver
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn playback(&self) -> PlaybackSpeed {
        self.playback
    }

    pub fn set_playback(&mut self, playback: PlaybackSpeed) {
        self.playback = playback;
    }

    /// Drain the transport and apply everything received.
    pub fn pump(&mut self) -> SessionStatus {
        let before = self.driver.anomalies().len();
        for event in self.transport.poll() {
            match event {
                TransportEvent::Frame(Frame::Binary(bytes)) => {
                    self.on_live(Pending::Input(bytes))
                }
                TransportEvent::Frame(frame @ Frame::Text(_)) => match frame.parse_json() {
                    Some(Ok(msg)) => self.on_message(msg),
                    Some(Err(e)) => warn!(error = %e, "unparseable relay message"),
                    None => {}
                },
                TransportEvent::Closed { reason } => {
                    debug!(?reason, "relay connection closed");
                    self.driver.end(EndReason::Disconnected);
                }
            }
            if self.driver.phase() == DriverState::Ended {
                self.ticker.stop();
                break;
            }
        }
        status_of(&self.driver, before)
    }

    fn on_message(&mut self, msg: ServerMessage) {
        match msg {
            ServerMessage::HistoryPart { history } => {
                if self.history_received {
                    warn!("ignoring a history part after the history");
                } else {
                    self.partial_history.extend(history);
                }
            }
            ServerMessage::History {
                history,
                options,
                chats,
            } => self.on_history(history, options, chats),
            ServerMessage::LiveInput { value } => self.on_live(Pending::Input(value)),
            ServerMessage::LiveOptions { value } => self.on_live(Pending::Options(value)),
            ServerMessage::LiveChat { value } => self.on_live(Pending::Chat(value)),
            ServerMessage::Rejected { reason } => {
                warn!(%reason, "relay rejected the watch request");
                self.driver.end(EndReason::Rejected(reason));
            }
        }
    }

    fn on_history(
        &mut self,
        history: Vec<Vec<u8>>,
        options: Vec<Stamped<GameOptions>>,
        chats: Vec<Stamped<ChatMessage>>,
    ) {
        if self.history_received {
            warn!("ignoring a second history batch");
            return;
        }
        let history = if self.partial_history.is_empty() {
            history
        } else {
            let mut whole = std::mem::take(&mut self.partial_history);
            whole.extend(history);
            whole
        };
        debug!(
            buffers = history.len(),
            options = options.len(),
            chats = chats.len(),
            "history received"
        );
        let mut options = options.into_iter().peekable();
        let mut chats = chats.into_iter().peekable();
        for (index, bytes) in history.iter().enumerate() {
            while let Some(stamped) = options.next_if(|s| s.after <= index) {
                self.driver.push_options(stamped.value);
            }
            while let Some(stamped) = chats.next_if(|s| s.after <= index) {
                self.driver.push_chat(stamped.value);
            }
            apply_bytes(&mut self.driver, bytes);
        }
        options.for_each(|s| self.driver.push_options(s.value));
        for stamped in chats {
            self.driver.push_chat(stamped.value);
        }

        self.history_received = true;
        self.driver.start();
        for pending in std::mem::take(&mut self.held) {
            self.apply_pending(pending);
        }
        if self.join_at_live_edge {
            let edge = self.driver.available_frames();
            if let Err(e) = self.driver.seek_to_frame(edge) {
                warn!(error = %e, "could not seek to the live edge");
            }
        }
    }

    fn on_live(&mut self, pending: Pending) {
        if self.history_received {
            self.apply_pending(pending);
        } else {
            self.held.push(pending);
        }
    }

    fn apply_pending(&mut self, pending: Pending) {
        match pending {
            Pending::Input(bytes) => apply_bytes(&mut self.driver, &bytes),
            Pending::Options(options) => self.driver.push_options(options),
            Pending::Chat(chat) => {
                self.driver.push_chat(chat);
            }
        }
    }

    /// Advance the simulation by however many ticks are due at `now` at the
    /// current playback speed. Returns the number of frames simulated.
    pub fn tick_due(&mut self, now: Instant) -> usize {
        if self.driver.phase() != DriverState::LivePlaying {
            self.ticker.stop();
            return 0;
        }
        if !self.ticker.is_running() {
            self.ticker.start(now);
            return 0;
        }
        let fps = self.playback.effective_fps(self.driver.normal_fps());
        let due = self.ticker.due_ticks(now, fps);
        let mut advanced = 0;
        for _ in 0..due {
            match self.driver.advance_one_frame() {
                Tick::Advanced { .. } => advanced += 1,
                _ => break,
            }
        }
        advanced
    }

    pub fn close(&mut self) {
        self.transport.close();
        self.ticker.stop();
        self.driver.end(EndReason::Closed);
    }
}

// ---------------------------------------------------------------------------
// Player
// ---------------------------------------------------------------------------

/// Default number of recent inputs resent with every local frame.
pub const DEFAULT_RESEND_WINDOW: usize = 8;

pub struct PeerSession<S: Simulation, T: InputTransport> {
    driver: SimulationDriver<S>,
    peer: T,
    log: LocalInputLog,
    relay: Option<RelayClient>,
}

impl<S: Simulation, T: InputTransport> PeerSession<S, T> {
    /// A player session over a connected peer channel. The driver starts
    /// immediately.
    pub fn new(sim: S, seed: SessionSeed, local: PlayerId, peer: T, window: usize) -> Self {
        let mut driver = SimulationDriver::new(sim, seed);
        driver.start();
        Self {
            driver,
            peer,
            log: LocalInputLog::new(local, SyncCounter::ZERO, window),
            relay: None,
        }
    }

    /// Also send every local run, option change and chat line to a relay.
    pub fn with_relay(mut self, relay: RelayClient) -> Self {
        self.relay = Some(relay);
        self
    }

    pub fn local_player(&self) -> PlayerId {
        self.log.player()
    }

    pub fn driver(&self) -> &SimulationDriver<S> {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut SimulationDriver<S> {
        &mut self.driver
    }

    /// Record this frame's local input, apply it and send it.
    pub fn submit_local(&mut self, input: DiscreteInput) -> Result<(), TransportError> {
        let run = self.log.record(input)?;
        self.driver.apply_run(&run);
        self.mirror(|relay| relay.send_run(&run));
        self.peer.send_run(&run)
    }

    /// Agree on new options: recorded locally, sent to the opponent and
    /// mirrored.
    pub fn set_options(&mut self, options: GameOptions) -> Result<(), TransportError> {
        self.driver.push_options(options);
        self.mirror(|relay| relay.send_options(options));
        self.peer.send_message(&ClientMessage::Options { options })
    }

    pub fn send_chat(&mut self, text: &str) -> Result<(), TransportError> {
        let chat = ChatMessage {
            which_player_side: self.local_player().side(),
            chat_message: text.into(),
        };
        self.mirror(|relay| relay.send_chat(&chat));
        let msg = ClientMessage::from(chat.clone());
        self.driver.push_chat(chat);
        self.peer.send_message(&msg)
    }

    /// A relay failure must not stop the match; the mirror is dropped.
    fn mirror(&mut self, send: impl FnOnce(&mut RelayClient) -> Result<(), TransportError>) {
        if let Some(relay) = self.relay.as_mut()
            && let Err(e) = send(relay)
        {
            warn!(error = %e, "relay mirror failed, spectators will stop receiving");
            self.relay = None;
        }
    }

    /// Drain the peer channel (and the relay's replies).
    pub fn pump(&mut self) -> SessionStatus {
        let before = self.driver.anomalies().len();
        for event in self.peer.poll() {
            match event {
                TransportEvent::Frame(Frame::Binary(bytes)) => {
                    apply_bytes(&mut self.driver, &bytes)
                }
                TransportEvent::Frame(frame @ Frame::Text(_)) => match frame.parse_json() {
                    Some(Ok(msg)) => self.on_peer_message(msg),
                    Some(Err(e)) => warn!(error = %e, "unparseable peer message"),
                    None => {}
                },
                TransportEvent::Closed { reason } => {
                    debug!(?reason, "peer channel closed");
                    self.driver.end(EndReason::Disconnected);
                }
            }
        }
        if let Some(relay) = self.relay.as_mut() {
            for event in relay.poll() {
                match event {
                    TransportEvent::Frame(frame) => {
                        if let Some(Ok(ServerMessage::Rejected { reason })) = frame.parse_json() {
                            warn!(%reason, "relay rejected the room join");
                            self.relay = None;
                            break;
                        }
                    }
                    TransportEvent::Closed { reason } => {
                        warn!(?reason, "relay connection lost");
                        self.relay = None;
                        break;
                    }
                }
            }
        }
        status_of(&self.driver, before)
    }

    fn on_peer_message(&mut self, msg: ClientMessage) {
        match msg {
            ClientMessage::Options { options } => {
                self.driver.push_options(options);
            }
            ClientMessage::Chat {
                which_player_side,
                chat_message,
            } => {
                if which_player_side == self.local_player().side() {
                    warn!(which_player_side, "peer chat claims our side, dropped");
                    return;
                }
                self.driver.push_chat(ChatMessage {
                    which_player_side,
                    chat_message,
                });
            }
            other => warn!(?other, "unexpected control message on the peer channel"),
        }
    }

    /// Advance one lockstep frame if both inputs are in.
    pub fn tick(&mut self) -> Tick {
        self.driver.advance_one_frame()
    }

    pub fn close(&mut self) {
        self.peer.close();
        if let Some(mut relay) = self.relay.take() {
            relay.close();
        }
        self.driver.end(EndReason::Closed);
    }
}
