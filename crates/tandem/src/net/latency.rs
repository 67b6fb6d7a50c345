use std::time::{Duration, Instant};

pub const PING_INTERVAL: Duration = Duration::from_secs(1);

const HISTORY_WEIGHT: f32 = 0.8;
const SAMPLE_WEIGHT: f32 = 0.2;

/// Round-trip estimate for one peer, fed by ping/pong pairs.
#[derive(Debug, Clone, Default)]
pub struct PingTracker {
    latency_ms: Option<f32>,
    outstanding: Option<Instant>,
    samples: u64,
}

impl PingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ping_sent(&mut self, now: Instant) {
        self.outstanding = Some(now);
    }

    /// Completes the outstanding ping and returns the smoothed latency. A pong
    /// with no ping in flight is ignored.
    pub fn pong_received(&mut self, now: Instant) -> Option<f32> {
        let sent_at = self.outstanding.take()?;
        let sample = now.saturating_duration_since(sent_at).as_secs_f32() * 1000.0;
        self.add_sample(sample);
        self.latency_ms
    }

    pub fn add_sample(&mut self, sample_ms: f32) {
        self.latency_ms = Some(match self.latency_ms {
            Some(current) => current * HISTORY_WEIGHT + sample_ms * SAMPLE_WEIGHT,
            None => sample_ms,
        });
        self.samples += 1;
    }

    /// Smoothed latency in milliseconds, zero until the first pong.
    pub fn latency_ms(&self) -> f32 {
        self.latency_ms.unwrap_or(0.0)
    }

    pub fn sample_count(&self) -> u64 {
        self.samples
    }
}

/// Fixed-interval trigger polled from the owner's loop.
#[derive(Debug, Clone)]
pub struct PingSchedule {
    interval: Duration,
    next_at: Option<Instant>,
}

impl PingSchedule {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_at: None,
        }
    }

    pub fn start(&mut self, now: Instant) {
        self.next_at = Some(now + self.interval);
    }

    pub fn stop(&mut self) {
        self.next_at = None;
    }

    pub fn is_running(&self) -> bool {
        self.next_at.is_some()
    }

    /// Returns true at most once per interval while running.
    pub fn due(&mut self, now: Instant) -> bool {
        match self.next_at {
            Some(at) if now >= at => {
                self.next_at = Some(now + self.interval);
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_sample_seeds_estimate() {
        let mut tracker = PingTracker::new();
        assert_eq!(tracker.latency_ms(), 0.0);

        tracker.add_sample(100.0);
        assert_eq!(tracker.latency_ms(), 100.0);

        tracker.add_sample(50.0);
        assert!((tracker.latency_ms() - 90.0).abs() < 1e-4);
    }

    #[test]
    fn test_pong_without_ping_is_ignored() {
        let mut tracker = PingTracker::new();
        assert!(tracker.pong_received(Instant::now()).is_none());
        assert_eq!(tracker.sample_count(), 0);
    }

    #[test]
    fn test_ping_pong_measures_elapsed() {
        let start = Instant::now();
        let mut tracker = PingTracker::new();

        tracker.ping_sent(start);
        let latency = tracker.pong_received(start + Duration::from_millis(40)).unwrap();

        assert!((latency - 40.0).abs() < 0.5);
        assert!(tracker.pong_received(start + Duration::from_millis(80)).is_none());
    }

    #[test]
    fn test_schedule_fires_once_per_interval() {
        let start = Instant::now();
        let mut schedule = PingSchedule::new(Duration::from_secs(1));
        assert!(!schedule.due(start + Duration::from_secs(5)));

        schedule.start(start);
        assert!(!schedule.due(start + Duration::from_millis(999)));
        assert!(schedule.due(start + Duration::from_millis(1000)));
        assert!(!schedule.due(start + Duration::from_millis(1500)));
        assert!(schedule.due(start + Duration::from_millis(2000)));

        schedule.stop();
        assert!(!schedule.due(start + Duration::from_secs(10)));
    }
}
