use super::diff::DiffEpsilon;
use crate::net::DEFAULT_TICK_RATE;

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Ticks between full snapshots.
    pub snapshot_interval: u32,
    /// Ticks between delta checks.
    pub delta_interval: u32,
    /// Seconds advanced by each host step. Non-positive values fall back to
    /// the default tick rate.
    pub fixed_timestep: f32,
    /// Ticks the client renders behind the newest state it holds.
    pub interpolation_delay: u32,
    /// Inputs kept per peer on the host.
    pub input_buffer_size: usize,
    pub state_buffer_capacity: usize,
    pub state_buffer_trim: usize,
    pub position_epsilon: f32,
    pub angle_epsilon: f32,
    pub velocity_epsilon: f32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            snapshot_interval: 60,
            delta_interval: 3,
            fixed_timestep: 1.0 / 60.0,
            interpolation_delay: 3,
            input_buffer_size: 10,
            state_buffer_capacity: 30,
            state_buffer_trim: 20,
            position_epsilon: 0.001,
            angle_epsilon: 0.001,
            velocity_epsilon: 0.01,
        }
    }
}

impl SyncConfig {
    /// Step length actually used, see [`valid_timestep`].
    pub fn timestep(&self) -> f32 {
        valid_timestep(self.fixed_timestep)
    }

    pub fn tick_rate(&self) -> f32 {
        1.0 / self.timestep()
    }

    pub fn epsilon(&self) -> DiffEpsilon {
        DiffEpsilon {
            position: self.position_epsilon,
            angle: self.angle_epsilon,
            velocity: self.velocity_epsilon,
        }
    }
}

/// `dt` if it is a usable step length, else one default tick.
pub fn valid_timestep(dt: f32) -> f32 {
    if dt.is_finite() && dt > 0.0 {
        dt
    } else {
        log::warn!("Invalid fixed timestep {}, using {} Hz", dt, DEFAULT_TICK_RATE);
        1.0 / DEFAULT_TICK_RATE as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_timestep_falls_back_to_default_rate() {
        for dt in [0.0, -0.5, f32::NAN, f32::INFINITY] {
            let config = SyncConfig {
                fixed_timestep: dt,
                ..Default::default()
            };
            assert_eq!(config.timestep(), 1.0 / 60.0);
            assert_eq!(config.tick_rate(), 60.0);
        }
        assert_eq!(valid_timestep(0.02), 0.02);
    }
}
