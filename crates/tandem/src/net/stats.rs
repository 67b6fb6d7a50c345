#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetworkStats {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub chunks_sent: u64,
    pub chunks_received: u64,
    pub messages_dropped: u64,
}

impl NetworkStats {
    pub fn record_sent(&mut self, bytes: usize) {
        self.messages_sent += 1;
        self.bytes_sent += bytes as u64;
    }

    pub fn record_received(&mut self, bytes: usize) {
        self.messages_received += 1;
        self.bytes_received += bytes as u64;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Artificial loss applied to an in-memory link.
#[derive(Debug, Clone, Default)]
pub struct PacketLossSimulation {
    pub enabled: bool,
    pub loss_percent: f32,
}

impl PacketLossSimulation {
    pub fn with_loss(loss_percent: f32) -> Self {
        Self {
            enabled: true,
            loss_percent,
        }
    }

    pub fn should_drop(&self) -> bool {
        if !self.enabled || self.loss_percent <= 0.0 {
            return false;
        }
        if self.loss_percent >= 100.0 {
            return true;
        }
        rand_percent() * 100.0 < self.loss_percent
    }
}

pub fn rand_percent() -> f32 {
    rand_u64() as f32 / u64::MAX as f32
}

pub fn rand_u64() -> u64 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};
    use std::sync::atomic::{AtomicU64, Ordering};

    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let mut hasher = RandomState::new().build_hasher();
    hasher.write_u64(COUNTER.fetch_add(1, Ordering::Relaxed));
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_simulation_never_drops() {
        let sim = PacketLossSimulation {
            enabled: false,
            loss_percent: 100.0,
        };
        assert!((0..100).all(|_| !sim.should_drop()));
    }

    #[test]
    fn test_full_loss_always_drops() {
        let sim = PacketLossSimulation::with_loss(100.0);
        assert!((0..100).all(|_| sim.should_drop()));
    }

    #[test]
    fn test_counters() {
        let mut stats = NetworkStats::default();
        stats.record_sent(10);
        stats.record_sent(5);
        stats.record_received(7);

        assert_eq!(stats.messages_sent, 2);
        assert_eq!(stats.bytes_sent, 15);
        assert_eq!(stats.bytes_received, 7);

        stats.reset();
        assert_eq!(stats, NetworkStats::default());
    }
}
