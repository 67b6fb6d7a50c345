#![allow(dead_code)]

use std::time::{Duration, Instant};

use glam::Vec2;
use tandem::{BodyHandle, BodyState, DynamicBody, NetEntityId, PlayerInput, SimulationAdapter};

pub const FRAME: Duration = Duration::from_millis(16);

#[derive(Debug, Clone)]
pub struct Body {
    pub state: BodyState,
    pub net_entity_id: Option<NetEntityId>,
    /// Peer whose movement input drives this body.
    pub controller: Option<String>,
}

/// Frictionless 2D world: bodies move by their velocity, input sets it.
#[derive(Debug, Default)]
pub struct Arena {
    pub bodies: Vec<Body>,
    pub tick: u32,
    pub steps: u32,
}

impl Arena {
    pub fn add_body(&mut self, position: Vec2, velocity: Vec2) -> BodyHandle {
        let handle = BodyHandle(self.bodies.len() as u32);
        let mut state = BodyState::at_rest(handle, "", position);
        state.linear_velocity = velocity;
        self.bodies.push(Body {
            state,
            net_entity_id: None,
            controller: None,
        });
        handle
    }

    pub fn bind(&mut self, handle: BodyHandle, net_entity_id: NetEntityId) {
        if let Some(body) = self.bodies.get_mut(handle.index() as usize) {
            body.state.net_entity_id = net_entity_id.clone();
            body.net_entity_id = Some(net_entity_id);
        }
    }

    pub fn control(&mut self, handle: BodyHandle, peer_id: &str) {
        if let Some(body) = self.bodies.get_mut(handle.index() as usize) {
            body.controller = Some(peer_id.to_string());
        }
    }

    pub fn body(&self, handle: BodyHandle) -> &BodyState {
        &self.bodies[handle.index() as usize].state
    }

    pub fn find(&self, net_entity_id: &str) -> Option<&BodyState> {
        self.bodies
            .iter()
            .find(|b| b.net_entity_id.as_deref() == Some(net_entity_id))
            .map(|b| &b.state)
    }
}

impl SimulationAdapter for Arena {
    fn dynamic_bodies(&self) -> Vec<DynamicBody> {
        self.bodies
            .iter()
            .filter_map(|body| {
                Some(DynamicBody {
                    handle: body.state.id,
                    net_entity_id: body.net_entity_id.clone()?,
                })
            })
            .collect()
    }

    fn body_state(&self, handle: BodyHandle) -> Option<BodyState> {
        self.bodies
            .get(handle.index() as usize)
            .map(|b| b.state.clone())
    }

    fn set_body_state(&mut self, handle: BodyHandle, state: &BodyState) {
        if let Some(body) = self.bodies.get_mut(handle.index() as usize) {
            body.state = state.clone();
        }
    }

    fn apply_input(&mut self, peer_id: &str, input: &PlayerInput) {
        let Some(movement) = input.movement else {
            return;
        };
        for body in &mut self.bodies {
            if body.controller.as_deref() == Some(peer_id) {
                body.state.linear_velocity = movement;
            }
        }
    }

    fn step(&mut self, dt: f32) {
        self.steps += 1;
        for body in &mut self.bodies {
            body.state.position += body.state.linear_velocity * dt;
        }
    }

    fn tick_id(&self) -> u32 {
        self.tick
    }

    fn increment_tick_id(&mut self) {
        self.tick += 1;
    }
}

/// Monotonic test clock.
pub struct Clock {
    now: Instant,
}

impl Clock {
    pub fn new() -> Self {
        Self { now: Instant::now() }
    }

    pub fn now(&self) -> Instant {
        self.now
    }

    pub fn advance(&mut self, by: Duration) -> Instant {
        self.now += by;
        self.now
    }
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
