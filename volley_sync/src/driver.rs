// Deterministic simulation driver.
//
// `SimulationDriver` is the sole owner of a session's reconstruction queues,
// its simulation RNG and the current simulation state. Transports never
// touch the queues directly: every run, whether it came from a peer, a relay
// history batch or a relay live frame, goes through `apply_run`. That single
// path is what keeps duplicate, overlap and gap handling identical for all
// traffic.
//
// State machine:
//
//   WaitingForSession ──start──▶ LivePlaying ◀──resume/pause──▶ Paused
//                                    │  ▲                          │
//                                    ▼  │ (seek, transient)        │
//                                  Seeking ◀───────────────────────┘
//   any ──end──▶ Ended
//
// Seeking has no shortcut: state is never checkpointed, so reaching frame n
// means rebuilding from the seed and replaying frames 0..n through the silent
// path (no `present` calls). Callers only see `seek_to_frame`, so a
// checkpointing strategy could later slot in behind it.
//
// Backpressure: `advance_one_frame` needs both players' input for the
// current frame. If either is missing it reports `Tick::Starved` and leaves
// the frame where it is; a spectator can never run ahead of received data.
//
// See also: `queue.rs` (run application policy), `session.rs` (the owners
// of drivers that pump transports into them).

use std::fmt::Debug;

use thiserror::Error;
use tracing::{debug, trace, warn};
use volley_prng::{GameRng, RngStream, SessionSeed};
use volley_protocol::{
    ChatMessage, DiscreteInput, GameOptions, PlayerId, SyncCounter, WireError, WireRun,
};

use crate::chat::{ChatPlacement, PlacedChat};
use crate::queue::{ApplyOutcome, ReconstructionQueue};

/// The external game simulation.
///
/// `step` must be a pure function of the prior state, both inputs and the
/// RNG stream; the driver relies on that to make replay reproduce live play.
pub trait Simulation {
    type State: Clone + PartialEq + Debug;

    fn initial_state(&self, rng: &mut GameRng) -> Self::State;

    fn step(
        &self,
        state: &Self::State,
        player1: DiscreteInput,
        player2: DiscreteInput,
        rng: &mut GameRng,
    ) -> Self::State;

    /// Render hook, called once per live frame. Never called while seeking.
    fn present(&mut self, _state: &Self::State, _frame: usize) {}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DriverState {
    WaitingForSession,
    LivePlaying,
    Paused,
    Seeking,
    Ended,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EndReason {
    /// The transport closed or failed. Recoverable only by reconnecting and
    /// replaying history.
    Disconnected,
    /// The relay refused the join or watch request.
    Rejected(String),
    /// Closed locally.
    Closed,
}

/// Result of one `advance_one_frame` call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tick {
    /// Frame `frame` was simulated; the driver now sits at `frame + 1`.
    Advanced { frame: usize },
    /// Input for `frame` has not arrived for every player yet.
    Starved { frame: usize },
    Waiting,
    Paused,
    Ended,
}

/// A desynchronization risk observed while applying a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncAnomaly {
    Gap {
        player: PlayerId,
        expected: SyncCounter,
        received: SyncCounter,
        missing: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriverError {
    #[error("session has not started yet")]
    NotStarted,
    #[error("malformed wire message: {0}")]
    Wire(#[from] WireError),
}

#[derive(Clone, Debug, PartialEq)]
struct OptionsEntry {
    frame: usize,
    options: GameOptions,
}

/// Owns queues, RNG and state for one session.
pub struct SimulationDriver<S: Simulation> {
    sim: S,
    seed: SessionSeed,
    rng: GameRng,
    state: S::State,
    frame: usize,
    phase: DriverState,
    end_reason: Option<EndReason>,
    queues: [ReconstructionQueue; 2],
    options: Vec<OptionsEntry>,
    chats: Vec<PlacedChat>,
    chat_placement: ChatPlacement,
    anomalies: Vec<SyncAnomaly>,
}

impl<S: Simulation> SimulationDriver<S> {
    pub fn new(sim: S, seed: SessionSeed) -> Self {
        let mut rng = seed.rng(RngStream::Simulation);
        let state = sim.initial_state(&mut rng);
        let chat_placement = ChatPlacement::new(&seed);
        Self {
            sim,
            seed,
            rng,
            state,
            frame: 0,
            phase: DriverState::WaitingForSession,
            end_reason: None,
            queues: PlayerId::ALL.map(ReconstructionQueue::new),
            options: Vec::new(),
            chats: Vec::new(),
            chat_placement,
            anomalies: Vec::new(),
        }
    }

    /// Session joined (peer connected or history received).
    pub fn start(&mut self) {
        if self.phase == DriverState::WaitingForSession {
            debug!(room = self.seed.room_id(), "driver started");
            self.phase = DriverState::LivePlaying;
        }
    }

    pub fn pause(&mut self) {
        if self.phase == DriverState::LivePlaying {
            self.phase = DriverState::Paused;
        }
    }

    pub fn resume(&mut self) {
        if self.phase == DriverState::Paused {
            self.phase = DriverState::LivePlaying;
        }
    }

    /// Stop for good. The first reason wins.
    pub fn end(&mut self, reason: EndReason) {
        if self.phase != DriverState::Ended {
            debug!(?reason, frame = self.frame, "driver ended");
            self.phase = DriverState::Ended;
            self.end_reason = Some(reason);
        }
    }

    /// The one path by which inputs enter the queues.
    pub fn apply_run(&mut self, run: &WireRun) -> ApplyOutcome {
        let player = run.player();
        let outcome = self.queues[player.index()].apply(run);
        match outcome {
            ApplyOutcome::Appended { appended, skipped } => {
                trace!(?player, appended, skipped, start = run.start().value(), "run applied");
            }
            ApplyOutcome::Stale => {
                trace!(?player, start = run.start().value(), "stale run dropped");
            }
            ApplyOutcome::Gap {
                expected,
                received,
                missing,
            } => {
                warn!(
                    ?player,
                    expected = expected.value(),
                    received = received.value(),
                    missing,
                    "input gap, run rejected; state may diverge from the players"
                );
                self.anomalies.push(SyncAnomaly::Gap {
                    player,
                    expected,
                    received,
                    missing,
                });
            }
        }
        outcome
    }

    /// Parse a raw wire message and apply it. Malformed buffers change
    /// nothing.
    pub fn apply_wire(&mut self, bytes: &[u8]) -> Result<ApplyOutcome, DriverError> {
        let run = WireRun::parse(bytes)?;
        Ok(self.apply_run(&run))
    }

    /// Simulate the current frame if both inputs are available.
    pub fn advance_one_frame(&mut self) -> Tick {
        match self.phase {
            DriverState::WaitingForSession => return Tick::Waiting,
            DriverState::Paused => return Tick::Paused,
            DriverState::Ended => return Tick::Ended,
            DriverState::LivePlaying | DriverState::Seeking => {}
        }
        let frame = self.frame;
        if !self.step_silent() {
            return Tick::Starved { frame };
        }
        self.sim.present(&self.state, frame);
        Tick::Advanced { frame }
    }

    /// Rebuild the state at frame `target` by replaying from frame 0.
    ///
    /// Stops early at the last frame for which both inputs exist and returns
    /// the frame actually reached. The phase is restored afterwards; an ended
    /// session can still be scrubbed.
    pub fn seek_to_frame(&mut self, target: usize) -> Result<usize, DriverError> {
        if self.phase == DriverState::WaitingForSession {
            return Err(DriverError::NotStarted);
        }
        let resume_phase = self.phase;
        self.phase = DriverState::Seeking;

        self.rng = self.seed.rng(RngStream::Simulation);
        self.state = self.sim.initial_state(&mut self.rng);
        self.frame = 0;
        while self.frame < target && self.step_silent() {}

        self.phase = resume_phase;
        debug!(target, reached = self.frame, "seek complete");
        Ok(self.frame)
    }

    /// Seek by a wall-clock offset at the current normal frame rate,
    /// clamped at frame 0.
    pub fn seek_relative_seconds(&mut self, seconds: f64) -> Result<usize, DriverError> {
        let offset = seconds * f64::from(self.normal_fps());
        let target = (self.frame as f64 + offset).max(0.0).round() as usize;
        self.seek_to_frame(target)
    }

    /// Simulate one frame without presenting it.
    fn step_silent(&mut self) -> bool {
        let [q1, q2] = &self.queues;
        let (Some(p1), Some(p2)) = (q1.get(self.frame), q2.get(self.frame)) else {
            return false;
        };
        self.state = self.sim.step(&self.state, p1, p2, &mut self.rng);
        self.frame += 1;
        true
    }

    /// Index of the next frame to simulate (= frames simulated so far).
    pub fn current_frame_index(&self) -> usize {
        self.frame
    }

    /// Frames for which both players' inputs are available.
    pub fn available_frames(&self) -> usize {
        self.queues.iter().map(ReconstructionQueue::len).min().unwrap_or(0)
    }

    pub fn state(&self) -> &S::State {
        &self.state
    }

    pub fn phase(&self) -> DriverState {
        self.phase
    }

    pub fn end_reason(&self) -> Option<&EndReason> {
        self.end_reason.as_ref()
    }

    pub fn queue(&self, player: PlayerId) -> &ReconstructionQueue {
        &self.queues[player.index()]
    }

    pub fn anomalies(&self) -> &[SyncAnomaly] {
        &self.anomalies
    }

    pub fn seed(&self) -> &SessionSeed {
        &self.seed
    }

    pub fn simulation(&self) -> &S {
        &self.sim
    }

    /// Record new options, effective from the first frame not yet available
    /// for both players.
    pub fn push_options(&mut self, options: GameOptions) {
        let frame = self.available_frames();
        debug!(frame, ?options, "options recorded");
        self.options.push(OptionsEntry { frame, options });
    }

    /// Options in effect at `frame` (defaults before any were recorded).
    pub fn options_at(&self, frame: usize) -> GameOptions {
        self.options
            .iter()
            .take_while(|entry| entry.frame <= frame)
            .last()
            .map(|entry| entry.options)
            .unwrap_or_default()
    }

    /// Normal frame rate at the current frame.
    pub fn normal_fps(&self) -> u32 {
        self.options_at(self.frame).speed.normal_fps()
    }

    /// Game time at the current frame, in seconds, honoring speed changes.
    pub fn time_current(&self) -> f64 {
        self.elapsed_seconds(self.frame)
    }

    /// Game time at `frame`, in seconds.
    pub fn elapsed_seconds(&self, frame: usize) -> f64 {
        let mut seconds = 0.0;
        let mut segment_start = 0;
        let mut fps = GameOptions::default().speed.normal_fps();
        for entry in self.options.iter().take_while(|e| e.frame <= frame) {
            seconds += (entry.frame - segment_start) as f64 / f64::from(fps);
            segment_start = entry.frame;
            fps = entry.options.speed.normal_fps();
        }
        seconds + (frame - segment_start) as f64 / f64::from(fps)
    }

    /// Record a chat line, placed with the session's chat RNG so every
    /// observer puts it in the same spot.
    pub fn push_chat(&mut self, message: ChatMessage) -> Option<&PlacedChat> {
        let frame = self.available_frames();
        let Some(placed) = self.chat_placement.place(frame, message) else {
            warn!("chat message with invalid player side dropped");
            return None;
        };
        self.chats.push(placed);
        self.chats.last()
    }

    /// Chat lines recorded at or before `frame`.
    pub fn chats_until(&self, frame: usize) -> impl Iterator<Item = &PlacedChat> {
        self.chats.iter().take_while(move |c| c.frame <= frame)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use volley_protocol::GameSpeed;

    use super::*;

    /// Integer toy simulation: each frame folds both inputs and one RNG draw
    /// into an accumulator, and counts presented frames.
    #[derive(Default)]
    pub(crate) struct Accumulator {
        pub presented: usize,
    }

    impl Simulation for Accumulator {
        type State = (u64, u64);

        fn initial_state(&self, rng: &mut GameRng) -> Self::State {
            (rng.next_u64(), 0)
        }

        fn step(
            &self,
            state: &Self::State,
            p1: DiscreteInput,
            p2: DiscreteInput,
            rng: &mut GameRng,
        ) -> Self::State {
            let packed = (u64::from(volley_protocol::encode(p1).raw()) << 5)
                | u64::from(volley_protocol::encode(p2).raw());
            let acc = state
                .0
                .rotate_left(7)
                .wrapping_add(packed)
                .wrapping_add(rng.next_u64() % 1000);
            (acc, state.1 + 1)
        }

        fn present(&mut self, _state: &Self::State, _frame: usize) {
            self.presented += 1;
        }
    }

    pub(crate) fn run_for(player: PlayerId, start: u8, raws: &[u8]) -> WireRun {
        let mut buf = vec![player.to_wire(), start, 0];
        buf.extend_from_slice(raws);
        WireRun::parse(&buf).unwrap()
    }

    fn driver() -> SimulationDriver<Accumulator> {
        SimulationDriver::new(Accumulator::default(), SessionSeed::from_room_id("test-room"))
    }

    fn fill(driver: &mut SimulationDriver<Accumulator>, frames: u8) {
        let p1: Vec<u8> = (0..frames).map(|i| [0, 1, 2, 16][usize::from(i % 4)]).collect();
        let p2: Vec<u8> = (0..frames).map(|i| [4, 8, 0, 17][usize::from(i % 4)]).collect();
        driver.apply_run(&run_for(PlayerId::ONE, 0, &p1));
        driver.apply_run(&run_for(PlayerId::TWO, 0, &p2));
    }

    #[test]
    fn waits_until_started() {
        let mut d = driver();
        fill(&mut d, 4);
        assert_eq!(d.advance_one_frame(), Tick::Waiting);
        assert_eq!(d.seek_to_frame(2), Err(DriverError::NotStarted));
        d.start();
        assert_eq!(d.advance_one_frame(), Tick::Advanced { frame: 0 });
        assert_eq!(d.current_frame_index(), 1);
    }

    #[test]
    fn starves_instead_of_inventing_input() {
        let mut d = driver();
        d.start();
        d.apply_run(&run_for(PlayerId::ONE, 0, &[1, 1, 1]));
        d.apply_run(&run_for(PlayerId::TWO, 0, &[2]));
        assert_eq!(d.advance_one_frame(), Tick::Advanced { frame: 0 });
        let before = d.state().clone();
        assert_eq!(d.advance_one_frame(), Tick::Starved { frame: 1 });
        assert_eq!(d.state(), &before);
        assert_eq!(d.current_frame_index(), 1);

        d.apply_run(&run_for(PlayerId::TWO, 1, &[2]));
        assert_eq!(d.advance_one_frame(), Tick::Advanced { frame: 1 });
    }

    #[test]
    fn seek_to_zero_reproduces_initial_state() {
        let mut d = driver();
        d.start();
        let initial = d.state().clone();
        fill(&mut d, 20);
        for _ in 0..15 {
            d.advance_one_frame();
        }
        assert_ne!(d.state(), &initial);
        assert_eq!(d.seek_to_frame(0), Ok(0));
        assert_eq!(d.state(), &initial);
    }

    #[test]
    fn seek_matches_live_play() {
        let mut live = driver();
        live.start();
        fill(&mut live, 30);
        let mut states = vec![live.state().clone()];
        while let Tick::Advanced { .. } = live.advance_one_frame() {
            states.push(live.state().clone());
        }
        assert_eq!(live.current_frame_index(), 30);

        for target in [29, 3, 17, 0, 30] {
            assert_eq!(live.seek_to_frame(target), Ok(target));
            assert_eq!(live.state(), &states[target], "mismatch at frame {target}");
        }
    }

    #[test]
    fn seek_is_silent_and_capped_at_available_frames() {
        let mut d = driver();
        d.start();
        fill(&mut d, 10);
        assert_eq!(d.seek_to_frame(50), Ok(10));
        assert_eq!(d.simulation().presented, 0);
        assert_eq!(d.phase(), DriverState::LivePlaying);
        d.advance_one_frame();
        assert_eq!(d.simulation().presented, 0, "no input left for frame 10");
    }

    #[test]
    fn seek_keeps_paused_phase() {
        let mut d = driver();
        d.start();
        fill(&mut d, 5);
        d.pause();
        assert_eq!(d.advance_one_frame(), Tick::Paused);
        d.seek_to_frame(3).unwrap();
        assert_eq!(d.phase(), DriverState::Paused);
        d.resume();
        assert_eq!(d.advance_one_frame(), Tick::Advanced { frame: 3 });
    }

    #[test]
    fn same_seed_same_states() {
        let mut a = driver();
        let mut b = driver();
        for d in [&mut a, &mut b] {
            d.start();
            fill(d, 25);
            while let Tick::Advanced { .. } = d.advance_one_frame() {}
        }
        assert_eq!(a.state(), b.state());

        let elsewhere = SessionSeed::from_room_id("elsewhere");
        let mut other = SimulationDriver::new(Accumulator::default(), elsewhere);
        other.start();
        fill(&mut other, 25);
        while let Tick::Advanced { .. } = other.advance_one_frame() {}
        assert_ne!(a.state(), other.state());
    }

    #[test]
    fn gap_is_recorded_as_anomaly() {
        let mut d = driver();
        d.apply_run(&run_for(PlayerId::TWO, 0, &[0, 0]));
        let outcome = d.apply_run(&run_for(PlayerId::TWO, 9, &[0]));
        assert!(matches!(outcome, ApplyOutcome::Gap { missing: 7, .. }));
        assert_eq!(
            d.anomalies(),
            &[SyncAnomaly::Gap {
                player: PlayerId::TWO,
                expected: SyncCounter::new(2),
                received: SyncCounter::new(9),
                missing: 7
            }]
        );
        assert_eq!(d.queue(PlayerId::TWO).len(), 2);
    }

    #[test]
    fn malformed_wire_changes_nothing() {
        let mut d = driver();
        assert!(matches!(d.apply_wire(&[0, 1]), Err(DriverError::Wire(_))));
        assert!(d.apply_wire(&[0, 0, 0, 0, 0xff]).is_err());
        assert!(d.queue(PlayerId::ONE).is_empty());
    }

    #[test]
    fn ended_is_absorbing() {
        let mut d = driver();
        d.start();
        fill(&mut d, 5);
        d.end(EndReason::Disconnected);
        d.end(EndReason::Closed);
        d.resume();
        assert_eq!(d.phase(), DriverState::Ended);
        assert_eq!(d.end_reason(), Some(&EndReason::Disconnected));
        assert_eq!(d.advance_one_frame(), Tick::Ended);
        // Scrubbing an ended session still works.
        assert_eq!(d.seek_to_frame(5), Ok(5));
        assert_eq!(d.phase(), DriverState::Ended);
    }

    #[test]
    fn options_timeline_and_elapsed_time() {
        let mut d = driver();
        d.start();
        d.push_options(GameOptions {
            speed: GameSpeed::Slow,
            winning_score: 5,
        });
        fill(&mut d, 40);
        d.push_options(GameOptions {
            speed: GameSpeed::Fast,
            winning_score: 5,
        });
        assert_eq!(d.options_at(0).speed, GameSpeed::Slow);
        assert_eq!(d.options_at(39).speed, GameSpeed::Slow);
        assert_eq!(d.options_at(40).speed, GameSpeed::Fast);
        // 40 frames at 20 fps.
        assert!((d.elapsed_seconds(40) - 2.0).abs() < 1e-9);
        d.seek_to_frame(40).unwrap();
        assert_eq!(d.normal_fps(), 30);
    }

    #[test]
    fn relative_seek_uses_normal_fps_and_clamps() {
        let mut d = driver();
        d.start();
        fill(&mut d, 100);
        d.seek_to_frame(60).unwrap();
        assert_eq!(d.seek_relative_seconds(-1.0), Ok(35));
        assert_eq!(d.seek_relative_seconds(-3.0), Ok(0));
        assert_eq!(d.seek_relative_seconds(1.0), Ok(25));
    }

    #[test]
    fn chats_are_placed_deterministically() {
        let mut a = driver();
        let mut b = driver();
        let msg = ChatMessage {
            which_player_side: 1,
            chat_message: "hi".into(),
        };
        let pa = a.push_chat(msg.clone()).cloned().unwrap();
        let pb = b.push_chat(msg).cloned().unwrap();
        assert_eq!(pa, pb);
        assert!(
            a.push_chat(ChatMessage {
                which_player_side: 3,
                chat_message: "?".into()
            })
            .is_none()
        );
        assert_eq!(a.chats_until(0).count(), 1);
    }
}
