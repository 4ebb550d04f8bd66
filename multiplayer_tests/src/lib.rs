// Test-only players, spectators and a toy simulation for end-to-end tests.
//
// `Rally` is a tiny integer volleyball simulation: two paddles, a ball with
// gravity, serves whose direction comes from the session RNG. It stands in
// for the real game simulation, which this workspace only talks to through
// the `Simulation` trait. Everything else here uses the real code paths:
// `PeerSession` over a `PeerChannel`, `RelayClient` mirrors to a real relay,
// `SpectatorSession` over a real `RelayClient`.
//
// The only test-specific code is the synchronous polling wrappers (blocking
// loops around `pump()`).
//
// See also: `tests/full_pipeline.rs` for the scenarios.

use std::net::SocketAddr;
use std::thread;
use std::time::{Duration, Instant};

use volley_prng::{GameRng, SessionSeed};
use volley_protocol::{DiscreteInput, PlayerId};
use volley_sync::{
    DriverState, PeerChannel, PeerSession, PlaybackSpeed, RelayClient, SessionStatus, Simulation,
    SpectatorConfig, SpectatorSession, Tick,
};

/// Default timeout for blocking poll operations.
const POLL_TIMEOUT: Duration = Duration::from_secs(5);

/// Sleep duration between poll attempts.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

const COURT_WIDTH: i32 = 432;
const NET_X: i32 = COURT_WIDTH / 2;
const GRAVITY: i32 = 1;
const PADDLE_SPEED: i32 = 6;
const REACH: i32 = 32;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RallyState {
    pub ball: (i32, i32),
    pub velocity: (i32, i32),
    pub paddles: [i32; 2],
    pub score: [u32; 2],
    pub serves: u32,
}

/// Toy deterministic volleyball.
#[derive(Debug, Default)]
pub struct Rally {
    /// Frames handed to `present` (never incremented while seeking).
    pub presented: usize,
}

impl Rally {
    fn serve(state: &mut RallyState, server: usize, rng: &mut GameRng) {
        let dir = if server == 0 { 1 } else { -1 };
        state.ball = (if server == 0 { 60 } else { COURT_WIDTH - 60 }, 200);
        state.velocity = (dir * rng.range_i32_inclusive(2, 6), rng.range_i32_inclusive(8, 14));
        state.serves += 1;
    }
}

impl Simulation for Rally {
    type State = RallyState;

    fn initial_state(&self, rng: &mut GameRng) -> RallyState {
        let mut state = RallyState {
            ball: (0, 0),
            velocity: (0, 0),
            paddles: [NET_X / 2, NET_X + NET_X / 2],
            score: [0, 0],
            serves: 0,
        };
        let server = rng.range_i32_inclusive(0, 1) as usize;
        Self::serve(&mut state, server, rng);
        state
    }

    fn step(
        &self,
        prev: &RallyState,
        p1: DiscreteInput,
        p2: DiscreteInput,
        rng: &mut GameRng,
    ) -> RallyState {
        let mut state = prev.clone();
        let bounds = [(0, NET_X - 1), (NET_X, COURT_WIDTH)];
        for (side, input) in [p1, p2].into_iter().enumerate() {
            let (lo, hi) = bounds[side];
            let moved = state.paddles[side] + i32::from(input.x_axis()) * PADDLE_SPEED;
            state.paddles[side] = moved.clamp(lo, hi);
            let near = (state.ball.0 - state.paddles[side]).abs() <= REACH && state.ball.1 <= REACH;
            if near && state.velocity.1 < 0 {
                let toward_net = if side == 0 { 1 } else { -1 };
                let power = if input.action() { 9 } else { 5 };
                state.velocity = (
                    toward_net * (power + rng.range_i32_inclusive(0, 3)),
                    12 - 2 * i32::from(input.y_axis()),
                );
            }
        }

        state.velocity.1 -= GRAVITY;
        state.ball.0 += state.velocity.0;
        state.ball.1 += state.velocity.1;
        if state.ball.0 <= 0 || state.ball.0 >= COURT_WIDTH {
            state.velocity.0 = -state.velocity.0;
            state.ball.0 = state.ball.0.clamp(0, COURT_WIDTH);
        }
        if state.ball.1 <= 0 {
            let scorer = if state.ball.0 < NET_X { 1 } else { 0 };
            state.score[scorer] += 1;
            Self::serve(&mut state, scorer, rng);
        }
        state
    }

    fn present(&mut self, _state: &RallyState, _frame: usize) {
        self.presented += 1;
    }
}

/// Scripted input for `player` at `frame`: cycles through all valid inputs
/// at a per-player stride and offset so the two players differ.
pub fn scripted_input(player: PlayerId, frame: usize) -> DiscreteInput {
    let all: Vec<DiscreteInput> = DiscreteInput::all().collect();
    let (stride, offset) = if player == PlayerId::ONE { (1, 0) } else { (5, 3) };
    all[(frame * stride + offset) % all.len()]
}

/// One of the two players of a match.
pub struct TestPlayer {
    pub session: PeerSession<Rally, PeerChannel>,
}

impl TestPlayer {
    /// Both players of `room`, connected to each other and, if `relay` is
    /// given, mirroring to it.
    pub fn pair(room: &str, relay: Option<SocketAddr>, window: usize) -> (Self, Self) {
        let (a, b) = PeerChannel::pair();
        let seed = SessionSeed::from_room_id(room);
        let mut one = PeerSession::new(Rally::default(), seed.clone(), PlayerId::ONE, a, window);
        let mut two = PeerSession::new(Rally::default(), seed, PlayerId::TWO, b, window);
        if let Some(addr) = relay {
            let addr = addr.to_string();
            let connect = || RelayClient::open(&addr, room).expect("player relay connect failed");
            one = one.with_relay(connect());
            two = two.with_relay(connect());
        }
        (Self { session: one }, Self { session: two })
    }

    pub fn state(&self) -> &RallyState {
        self.session.driver().state()
    }

    pub fn frame(&self) -> usize {
        self.session.driver().current_frame_index()
    }
}

/// Play `frames` lockstep frames: both players submit, exchange and tick.
pub fn play_frames(one: &mut TestPlayer, two: &mut TestPlayer, frames: usize) {
    for _ in 0..frames {
        let frame = one.frame();
        one.session
            .submit_local(scripted_input(PlayerId::ONE, frame))
            .expect("player one send failed");
        two.session
            .submit_local(scripted_input(PlayerId::TWO, frame))
            .expect("player two send failed");
        for player in [&mut *one, &mut *two] {
            assert_eq!(player.session.pump(), SessionStatus::Playing);
            assert_eq!(player.session.tick(), Tick::Advanced { frame });
        }
    }
}

/// A spectator connected to a real relay.
pub struct TestSpectator {
    pub session: SpectatorSession<Rally, RelayClient>,
}

impl TestSpectator {
    pub fn watch(addr: SocketAddr, room: &str, join_at_live_edge: bool) -> Self {
        let config = SpectatorConfig {
            relay_addr: addr.to_string(),
            room: room.into(),
            playback: PlaybackSpeed::Times(1.0),
            join_at_live_edge,
        };
        let session = SpectatorSession::connect(&config, Rally::default())
            .expect("spectator connect failed");
        Self { session }
    }

    /// Blocking poll until the history batch has been applied.
    pub fn poll_until_started(&mut self) {
        self.poll_until(
            |s| s.session.driver().phase() != DriverState::WaitingForSession,
            "history",
        );
    }

    /// Blocking poll until inputs for `frames` frames are available.
    pub fn poll_until_available(&mut self, frames: usize) {
        self.poll_until(|s| s.session.driver().available_frames() >= frames, "inputs");
    }

    /// Blocking poll until the session ends; returns the final status.
    pub fn poll_until_ended(&mut self) -> SessionStatus {
        let start = Instant::now();
        loop {
            assert!(start.elapsed() < POLL_TIMEOUT, "timed out waiting for the session to end");
            let status = self.session.pump();
            if let SessionStatus::Ended(_) = status {
                return status;
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Simulate every available frame.
    pub fn catch_up(&mut self) {
        while let Tick::Advanced { .. } = self.session.driver_mut().advance_one_frame() {}
    }

    pub fn state(&self) -> &RallyState {
        self.session.driver().state()
    }

    fn poll_until(&mut self, done: impl Fn(&Self) -> bool, what: &str) {
        let start = Instant::now();
        loop {
            let status = self.session.pump();
            assert!(
                !matches!(status, SessionStatus::Ended(_) | SessionStatus::Desynced { .. }),
                "unexpected status while waiting for {what}: {status:?}"
            );
            if done(self) {
                return;
            }
            assert!(start.elapsed() < POLL_TIMEOUT, "timed out waiting for {what}");
            thread::sleep(POLL_INTERVAL);
        }
    }
}
