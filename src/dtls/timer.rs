use std::time::Duration;

use crate::rng::SeededRng;

// Fraction of the rto, both directions.
const JITTER_RANGE: f32 = 0.25;

const MIN_RTO: Duration = Duration::from_millis(50);

/// Flight retransmission timer.
///
/// Doubles the timeout on every resend and scales it by a random jitter so
/// two peers that lost packets at the same moment do not resend in lockstep.
#[derive(Debug)]
pub struct ExponentialBackoff {
    initial: Duration,
    max_resends: usize,
    current: Duration,
    scale: f32,
    resends_left: usize,
}

impl ExponentialBackoff {
    pub fn new(initial: Duration, max_resends: usize, rng: &mut SeededRng) -> Self {
        ExponentialBackoff {
            initial,
            max_resends,
            current: initial,
            scale: jitter_scale(rng),
            resends_left: max_resends,
        }
    }

    /// Back to the first timeout, for a new flight.
    pub fn reset(&mut self, rng: &mut SeededRng) {
        *self = ExponentialBackoff::new(self.initial, self.max_resends, rng);
    }

    /// Time from sending the flight until it is due again.
    pub fn rto(&self) -> Duration {
        self.current.mul_f32(self.scale).max(MIN_RTO)
    }

    /// Count one resend and double the timeout. No-op once exhausted.
    pub fn attempt(&mut self, rng: &mut SeededRng) {
        if self.resends_left == 0 {
            return;
        }

        self.resends_left -= 1;
        self.current = self.current.saturating_mul(2);
        self.scale = jitter_scale(rng);
    }

    pub fn can_retry(&self) -> bool {
        self.resends_left != 0
    }
}

// Between 0.75 and 1.25.
fn jitter_scale(rng: &mut SeededRng) -> f32 {
    1.0 + (rng.random::<f32>() * 2.0 - 1.0) * JITTER_RANGE
}
