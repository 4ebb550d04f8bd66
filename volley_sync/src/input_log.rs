// Sending side of the protocol: a player's own inputs, tagged and batched.
//
// Each local frame's input gets the next sync counter. What goes on the wire
// is not just that one input but the most recent `window` inputs, so a
// message lost on an unreliable channel is covered by the next one. The
// receiving queue drops the overlap.

use std::collections::VecDeque;

use volley_protocol::{DiscreteInput, MAX_RUN_LEN, PlayerId, SyncCounter, WireError, WireRun};

#[derive(Clone, Debug)]
pub struct LocalInputLog {
    player: PlayerId,
    /// Counter of the oldest input in `recent`.
    first: SyncCounter,
    recent: VecDeque<DiscreteInput>,
    window: usize,
    recorded: usize,
}

impl LocalInputLog {
    /// `start` is the counter of the first recorded input. `window` is
    /// clamped to `1..=MAX_RUN_LEN`.
    pub fn new(player: PlayerId, start: SyncCounter, window: usize) -> Self {
        let window = window.clamp(1, MAX_RUN_LEN);
        Self {
            player,
            first: start,
            recent: VecDeque::with_capacity(window),
            window,
            recorded: 0,
        }
    }

    pub fn player(&self) -> PlayerId {
        self.player
    }

    /// Inputs recorded so far (= the next local frame index).
    pub fn recorded(&self) -> usize {
        self.recorded
    }

    /// Record this frame's input and build the run to send. The window
    /// bounds the run, so building it only fails if that bound is broken.
    pub fn record(&mut self, input: DiscreteInput) -> Result<WireRun, WireError> {
        if self.recent.len() == self.window {
            self.recent.pop_front();
            self.first = self.first.next();
        }
        self.recent.push_back(input);
        self.recorded += 1;
        let inputs = self.recent.iter().copied().collect();
        WireRun::new(self.player, self.first, inputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::ReconstructionQueue;

    fn input(x: i8) -> DiscreteInput {
        DiscreteInput::new(x, 0, false).unwrap()
    }

    #[test]
    fn window_slides() {
        let mut log = LocalInputLog::new(PlayerId::ONE, SyncCounter::ZERO, 3);
        assert_eq!(log.record(input(1)).unwrap().len(), 1);
        log.record(input(0)).unwrap();
        let run = log.record(input(-1)).unwrap();
        assert_eq!(run.start(), SyncCounter::ZERO);
        let run = log.record(input(1)).unwrap();
        assert_eq!(run.start(), SyncCounter::new(1));
        assert_eq!(run.last_counter(), SyncCounter::new(3));
        assert_eq!(run.inputs(), &[input(0), input(-1), input(1)]);
        assert_eq!(log.recorded(), 4);
    }

    #[test]
    fn window_is_clamped() {
        let mut log = LocalInputLog::new(PlayerId::TWO, SyncCounter::ZERO, 1000);
        let mut last = None;
        for _ in 0..200 {
            last = Some(log.record(DiscreteInput::NEUTRAL).unwrap());
        }
        assert_eq!(last.unwrap().len(), MAX_RUN_LEN);

        let mut tiny = LocalInputLog::new(PlayerId::TWO, SyncCounter::ZERO, 0);
        tiny.record(DiscreteInput::NEUTRAL).unwrap();
        assert_eq!(tiny.record(DiscreteInput::NEUTRAL).unwrap().len(), 1);
    }

    #[test]
    fn lossy_delivery_is_covered_by_the_window() {
        let mut log = LocalInputLog::new(PlayerId::ONE, SyncCounter::new(250), 4);
        let mut queue = ReconstructionQueue::new(PlayerId::ONE);
        let sent: Vec<DiscreteInput> = (0..20).map(|i| input([-1, 0, 1][i % 3])).collect();
        for (i, &inp) in sent.iter().enumerate() {
            let run = log.record(inp).unwrap();
            // Lose two out of every three messages.
            if i % 3 == 0 || i == sent.len() - 1 {
                queue.apply(&run);
            }
        }
        assert_eq!(queue.inputs(), sent.as_slice());
    }
}
