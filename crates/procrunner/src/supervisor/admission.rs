//! Launch pacing between two admissions.

use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Enforces the minimum gap between consecutive launches.
///
/// With a delay range, a fresh gap is drawn uniformly from `[min, max)`
/// after every launch; without one, launches are never held back.
#[derive(Debug)]
pub struct LaunchPacer {
    range: Option<(Duration, Duration)>,
    rng: StdRng,
    last_launch: Option<Instant>,
    next_delay: Duration,
}

impl LaunchPacer {
    pub fn new(range: Option<(Duration, Duration)>) -> Self {
        Self::with_rng(range, StdRng::from_entropy())
    }

    pub const fn with_rng(range: Option<(Duration, Duration)>, rng: StdRng) -> Self {
        Self {
            range,
            rng,
            last_launch: None,
            next_delay: Duration::ZERO,
        }
    }

    /// Whether a launch is allowed at `now`.
    pub fn ready(&self, now: Instant) -> bool {
        self.last_launch
            .is_none_or(|last| now.saturating_duration_since(last) >= self.next_delay)
    }

    /// Record a launch at `now` and draw the next gap.
    pub fn record_launch(&mut self, now: Instant) {
        self.last_launch = Some(now);
        self.next_delay = self.draw();
    }

    pub const fn next_delay(&self) -> Duration {
        self.next_delay
    }

    /// Whether launches are paced at all.
    pub const fn is_paced(&self) -> bool {
        self.range.is_some()
    }

    fn draw(&mut self) -> Duration {
        match self.range {
            Some((min, max)) if min < max => self.rng.gen_range(min..max),
            Some((min, _)) => min,
            None => Duration::ZERO,
        }
    }
}
