use std::time::Duration;

/// Converts elapsed time into a whole number of fixed rate ticks.
///
/// The ticker never blocks, it only accumulates the time passed to [`FrameTicker::advance`].
#[derive(Clone, Debug)]
pub struct FrameTicker {
    period: Duration,
    elapsed: Duration,
    max_ticks: u32,
}

impl FrameTicker {
    /// Long stalls are not caught up beyond this many ticks.
    pub const MAX_CATCH_UP: u32 = 5;

    pub fn new(rate: u32) -> Self {
        Self {
            period: Duration::from_secs(1) / rate.max(1),
            elapsed: Duration::ZERO,
            max_ticks: Self::MAX_CATCH_UP,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Returns the number of ticks that became due.
    pub fn advance(&mut self, delta: Duration) -> u32 {
        self.elapsed += delta;

        let due = (self.elapsed.as_nanos() / self.period.as_nanos().max(1)) as u32;
        let ticks = due.min(self.max_ticks);

        self.elapsed = if due > self.max_ticks {
            Duration::ZERO
        } else {
            self.elapsed - self.period * ticks
        };
        ticks
    }

    pub fn reset(&mut self) {
        self.elapsed = Duration::ZERO;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticks_accumulate_across_frames() {
        let mut ticker = FrameTicker::new(30);
        let frame = Duration::from_millis(20);

        let ticks: u32 = (0..30).map(|_| ticker.advance(frame)).sum();
        assert_eq!(ticks, 18);
    }

    #[test]
    fn stalls_do_not_cause_bursts() {
        let mut ticker = FrameTicker::new(30);

        assert_eq!(ticker.advance(Duration::from_secs(3)), FrameTicker::MAX_CATCH_UP);
        assert_eq!(ticker.advance(Duration::from_millis(10)), 0);
    }
}
