use std::thread;
use std::time::{Duration, Instant};

use tracing::trace;

/// Fixed-rate deadline scheduler for control loops.
///
/// Each deadline is the previous one plus the period, so sleep jitter does
/// not accumulate. A loop that falls more than a period behind skips the
/// missed ticks instead of running them back to back.
#[derive(Debug, Clone)]
pub struct Ticker {
    period: Duration,
    next: Instant,
    ticks: u64,
    missed: u64,
}

impl Ticker {
    /// First deadline is one period from now.
    pub fn new(period: Duration) -> Self {
        let period = period.max(Duration::from_micros(1));
        Self {
            period,
            next: Instant::now() + period,
            ticks: 0,
            missed: 0,
        }
    }

    /// Ticker firing `hz` times per second.
    pub fn from_rate(hz: f64) -> Self {
        let hz = if hz.is_finite() && hz > 0.0 { hz } else { 1.0 };
        Self::new(Duration::from_secs_f64(1.0 / hz))
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Ticks completed.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Ticks skipped because the loop fell behind.
    pub fn missed(&self) -> u64 {
        self.missed
    }

    /// Sleep until the next deadline. Returns the ticks skipped on this call.
    pub fn wait(&mut self) -> u64 {
        self.wait_at(Instant::now())
    }

    fn wait_at(&mut self, now: Instant) -> u64 {
        let skipped = if now < self.next {
            thread::sleep(self.next - now);
            0
        } else {
            let behind = now - self.next;
            (behind.as_nanos() / self.period.as_nanos()) as u64
        };

        if skipped > 0 {
            trace!(skipped, "control loop fell behind");
            self.missed += skipped;
        }
        let steps = u32::try_from(skipped).unwrap_or(u32::MAX).saturating_add(1);
        self.next += self.period * steps;
        self.ticks += 1;
        skipped
    }

    /// Restart the schedule from now.
    pub fn reset(&mut self) {
        self.next = Instant::now() + self.period;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_the_average_rate() {
        let mut ticker = Ticker::new(Duration::from_millis(10));
        let start = Instant::now();
        for _ in 0..10 {
            ticker.wait();
        }
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(95), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(500), "{elapsed:?}");
        assert_eq!(ticker.ticks(), 10);
    }

    #[test]
    fn skips_missed_ticks_instead_of_bursting() {
        let mut ticker = Ticker::new(Duration::from_millis(10));
        let late = ticker.next + Duration::from_millis(35);
        assert_eq!(ticker.wait_at(late), 3);
        assert_eq!(ticker.missed(), 3);
        // Next deadline is in the future relative to `late`.
        assert!(ticker.next > late);
    }

    #[test]
    fn on_time_wait_skips_nothing() {
        let mut ticker = Ticker::new(Duration::from_millis(5));
        assert_eq!(ticker.wait(), 0);
        assert_eq!(ticker.missed(), 0);
    }

    #[test]
    fn rate_conversion() {
        let period = Ticker::from_rate(50.0).period().as_secs_f64();
        assert!((period - 0.02).abs() < 1e-9);
        assert_eq!(Ticker::from_rate(0.0).period(), Duration::from_secs(1));
    }
}
