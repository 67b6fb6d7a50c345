use std::time::Instant;

use crate::net::PlayerInput;
use crate::sync::{SimulationAdapter, valid_timestep};

use super::{GameSession, SessionError};

/// Longest frame delta accepted, in seconds. Longer stalls are clamped.
const MAX_FRAME_DELTA: f32 = 0.25;

/// Fixed-timestep driver: accumulates variable frame deltas and updates the
/// session once per whole tick.
#[derive(Debug)]
pub struct NetworkGameLoop {
    dt: f32,
    accumulator: f32,
    ticks: u64,
}

impl NetworkGameLoop {
    /// Non-positive or non-finite steps fall back to the default tick rate.
    pub fn new(fixed_timestep: f32) -> Self {
        Self {
            dt: valid_timestep(fixed_timestep),
            accumulator: 0.0,
            ticks: 0,
        }
    }

    pub fn for_session<A: SimulationAdapter>(session: &GameSession<A>) -> Self {
        Self::new(session.config().sync.fixed_timestep)
    }

    pub fn dt(&self) -> f32 {
        self.dt
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Fraction of a tick left in the accumulator, for render blending.
    pub fn alpha(&self) -> f32 {
        self.accumulator / self.dt
    }

    pub fn reset(&mut self) {
        self.accumulator = 0.0;
    }

    pub fn frame<A: SimulationAdapter>(
        &mut self,
        session: &mut GameSession<A>,
        frame_delta: f32,
        input: Option<&PlayerInput>,
    ) -> Result<u32, SessionError> {
        self.frame_at(session, frame_delta, input, Instant::now())
    }

    /// Runs every whole tick owed after adding `frame_delta` seconds.
    /// Returns the number of ticks run.
    pub fn frame_at<A: SimulationAdapter>(
        &mut self,
        session: &mut GameSession<A>,
        frame_delta: f32,
        input: Option<&PlayerInput>,
        now: Instant,
    ) -> Result<u32, SessionError> {
        if !session.is_active() {
            return Err(SessionError::NotActive);
        }

        self.accumulator += frame_delta.clamp(0.0, MAX_FRAME_DELTA);
        let mut ran = 0;
        while self.accumulator >= self.dt {
            self.accumulator -= self.dt;
            session.update_at(now, input);
            self.ticks += 1;
            ran += 1;
        }
        Ok(ran)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::entity::BodyHandle;
    use crate::net::BodyState;
    use crate::session::SessionConfig;
    use crate::sync::DynamicBody;
    use crate::transport::LoopbackAir;

    #[derive(Default)]
    struct Ticker {
        tick: u32,
        steps: u32,
    }

    impl SimulationAdapter for Ticker {
        fn dynamic_bodies(&self) -> Vec<DynamicBody> {
            Vec::new()
        }
        fn body_state(&self, _: BodyHandle) -> Option<BodyState> {
            None
        }
        fn set_body_state(&mut self, _: BodyHandle, _: &BodyState) {}
        fn apply_input(&mut self, _: &str, _: &PlayerInput) {}
        fn step(&mut self, _: f32) {
            self.steps += 1;
        }
        fn tick_id(&self) -> u32 {
            self.tick
        }
        fn increment_tick_id(&mut self) {
            self.tick += 1;
        }
    }

    fn hosting(air: &LoopbackAir) -> GameSession<Ticker> {
        let config = SessionConfig::radio("Host", "pong").with_session("loop");
        let transport = config.radio_transport(air.radio());
        GameSession::host(config, transport, Ticker::default()).unwrap()
    }

    #[test]
    fn test_accumulates_partial_frames() {
        let air = LoopbackAir::new();
        let mut session = hosting(&air);
        let mut game_loop = NetworkGameLoop::new(0.01);
        let now = Instant::now();

        assert_eq!(game_loop.frame_at(&mut session, 0.004, None, now).unwrap(), 0);
        assert_eq!(game_loop.frame_at(&mut session, 0.004, None, now).unwrap(), 0);
        assert_eq!(
            game_loop
                .frame_at(&mut session, 0.004, None, now + Duration::from_millis(12))
                .unwrap(),
            1
        );
        assert_eq!(game_loop.ticks(), 1);
        assert_eq!(session.adapter().steps, 1);
        assert!(game_loop.alpha() > 0.1 && game_loop.alpha() < 0.3);
    }

    #[test]
    fn test_long_stall_is_clamped() {
        let air = LoopbackAir::new();
        let mut session = hosting(&air);
        let mut game_loop = NetworkGameLoop::new(0.05);

        let ran = game_loop
            .frame_at(&mut session, 10.0, None, Instant::now())
            .unwrap();
        assert!((4..=5).contains(&ran), "ran {ran} ticks");
        assert_eq!(session.adapter().tick, ran);
    }

    #[test]
    fn test_inactive_session_is_rejected() {
        let air = LoopbackAir::new();
        let mut session = hosting(&air);
        let mut game_loop = NetworkGameLoop::for_session(&session);
        assert_eq!(game_loop.dt(), session.config().sync.timestep());

        session.disconnect();
        assert!(matches!(
            game_loop.frame(&mut session, 0.1, None),
            Err(SessionError::NotActive)
        ));
        assert_eq!(game_loop.ticks(), 0);
    }

    #[test]
    fn test_zero_timestep_still_terminates() {
        let air = LoopbackAir::new();
        let mut session = hosting(&air);
        let mut game_loop = NetworkGameLoop::new(0.0);
        assert_eq!(game_loop.dt(), 1.0 / 60.0);

        let ran = game_loop
            .frame_at(&mut session, 0.1, None, Instant::now())
            .unwrap();
        assert!((5..=6).contains(&ran), "ran {ran} ticks");
        assert!(game_loop.alpha().is_finite());
    }
}
