// Playback clock for spectating.
//
// A spectator can watch at a multiple of the game's normal frame rate
// ("times") or at a fixed frame rate ("fps"). The normal rate itself comes
// from the options in effect (slow/medium/fast), so the effective tick rate
// is recomputed whenever the options change.
//
// `Ticker` turns wall-clock time into a number of due simulation ticks. It
// is driven by the caller's `Instant`s so tests can step it precisely.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Slowest and fastest effective rates a spectator may pick.
pub const MIN_FPS: u32 = 1;
pub const MAX_FPS: u32 = 120;

/// Upper bound on ticks reported by one `due_ticks` call. A stalled caller
/// catches up over several pumps instead of in one burst.
pub const MAX_CATCH_UP_TICKS: usize = 60;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "value", rename_all = "lowercase")]
pub enum PlaybackSpeed {
    /// Multiple of the normal frame rate (0.5 = half speed).
    Times(f32),
    /// Fixed frame rate regardless of the game speed option.
    Fps(u32),
}

impl Default for PlaybackSpeed {
    fn default() -> Self {
        Self::Times(1.0)
    }
}

impl PlaybackSpeed {
    /// Frames per second at which to tick, clamped to `MIN_FPS..=MAX_FPS`.
    pub fn effective_fps(self, normal_fps: u32) -> u32 {
        let fps = match self {
            Self::Times(times) => (normal_fps as f32 * times.max(0.0)).round() as u32,
            Self::Fps(fps) => fps,
        };
        fps.clamp(MIN_FPS, MAX_FPS)
    }

    pub fn tick_interval(self, normal_fps: u32) -> Duration {
        Duration::from_secs(1) / self.effective_fps(normal_fps)
    }
}

/// Converts elapsed wall-clock time into due ticks.
#[derive(Debug, Default)]
pub struct Ticker {
    last: Option<Instant>,
    carry: Duration,
}

impl Ticker {
    pub fn start(&mut self, now: Instant) {
        if self.last.is_none() {
            self.last = Some(now);
            self.carry = Duration::ZERO;
        }
    }

    pub fn stop(&mut self) {
        self.last = None;
        self.carry = Duration::ZERO;
    }

    pub fn is_running(&self) -> bool {
        self.last.is_some()
    }

    /// Ticks that have come due since the previous call at `fps`. Leftover
    /// time below one interval is carried into the next call.
    pub fn due_ticks(&mut self, now: Instant, fps: u32) -> usize {
        let Some(last) = self.last else {
            return 0;
        };
        let interval = Duration::from_secs(1) / fps.max(1);
        let elapsed = self.carry + now.saturating_duration_since(last);
        let due = (elapsed.as_nanos() / interval.as_nanos()) as usize;
        self.last = Some(now);
        if due > MAX_CATCH_UP_TICKS {
            self.carry = Duration::ZERO;
            return MAX_CATCH_UP_TICKS;
        }
        self.carry = elapsed - interval * due as u32;
        due
    }
}
