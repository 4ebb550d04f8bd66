// Per-player reconstruction queue.
//
// Turns counter-tagged runs, arriving in any order and any number of times,
// back into a frame-indexed input sequence. The queue is append-only: frame
// `i` is the i-th input ever appended and never changes afterwards.
//
// Every run is judged by where its *last* counter lands relative to the
// queue's tail counter `t`. With `d = forward_distance(t, last)` and run
// length `n`:
//
//   d == 0 or d > MAX_RUN_LEN   stale or duplicate: nothing new, dropped
//   1 <= d <= n                 the first n - d inputs overlap, the last d
//                               are appended
//   d > n                       d - n frames are missing: rejected whole
//
// Missing frames are never filled in. A fabricated input would put this
// observer's simulation on a different path from the players'.

use volley_protocol::{DiscreteInput, MAX_RUN_LEN, PlayerId, SyncCounter, WireRun};

/// What applying one run did to a queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// `appended` new frames were added; the first `skipped` inputs of the
    /// run were already present.
    Appended { appended: usize, skipped: usize },
    /// Nothing in the run is newer than the tail.
    Stale,
    /// The run starts after a hole of `missing` frames. Nothing appended.
    Gap {
        expected: SyncCounter,
        received: SyncCounter,
        missing: usize,
    },
}

impl ApplyOutcome {
    pub fn appended(self) -> usize {
        match self {
            Self::Appended { appended, .. } => appended,
            Self::Stale | Self::Gap { .. } => 0,
        }
    }
}

/// Ordered, append-only input history for one player.
#[derive(Clone, Debug)]
pub struct ReconstructionQueue {
    player: PlayerId,
    inputs: Vec<DiscreteInput>,
    tail: Option<SyncCounter>,
}

impl ReconstructionQueue {
    pub fn new(player: PlayerId) -> Self {
        Self {
            player,
            inputs: Vec::new(),
            tail: None,
        }
    }

    pub fn player(&self) -> PlayerId {
        self.player
    }

    /// Number of frames reconstructed so far.
    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    /// Input for frame `frame`, if it has arrived.
    pub fn get(&self, frame: usize) -> Option<DiscreteInput> {
        self.inputs.get(frame).copied()
    }

    /// Counter of the most recently appended frame.
    pub fn tail_counter(&self) -> Option<SyncCounter> {
        self.tail
    }

    pub fn inputs(&self) -> &[DiscreteInput] {
        &self.inputs
    }

    /// Apply one run. The caller routes runs by player; a run for another
    /// player is a programming error.
    pub fn apply(&mut self, run: &WireRun) -> ApplyOutcome {
        debug_assert_eq!(run.player(), self.player, "run routed to the wrong queue");

        let Some(tail) = self.tail else {
            // The first run anchors frame 0.
            self.append(run, 0);
            return ApplyOutcome::Appended {
                appended: run.len(),
                skipped: 0,
            };
        };

        let ahead = usize::from(tail.forward_distance(run.last_counter()));
        if ahead == 0 || ahead > MAX_RUN_LEN {
            return ApplyOutcome::Stale;
        }
        if ahead > run.len() {
            return ApplyOutcome::Gap {
                expected: tail.next(),
                received: run.start(),
                missing: ahead - run.len(),
            };
        }

        let skipped = run.len() - ahead;
        self.append(run, skipped);
        ApplyOutcome::Appended {
            appended: ahead,
            skipped,
        }
    }

    fn append(&mut self, run: &WireRun, skip: usize) {
        self.inputs.extend_from_slice(&run.inputs()[skip..]);
        self.tail = Some(run.last_counter());
    }
}
