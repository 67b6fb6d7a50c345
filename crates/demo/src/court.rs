use glam::Vec2;
use tandem::{BodyHandle, BodyState, DynamicBody, NetEntityId, PlayerInput, SimulationAdapter};

pub const HALF_WIDTH: f32 = 8.0;
pub const HALF_HEIGHT: f32 = 4.5;
const PADDLE_SPEED: f32 = 6.0;

struct Body {
    state: BodyState,
    net_entity_id: Option<NetEntityId>,
    controller: Option<String>,
    bounces: bool,
}

/// Pong court: a ball bouncing off the walls and paddles steered by input.
#[derive(Default)]
pub struct Court {
    bodies: Vec<Body>,
    tick: u32,
}

impl Court {
    pub fn add_ball(&mut self, velocity: Vec2) -> BodyHandle {
        let handle = self.add(Vec2::ZERO, true);
        self.bodies[handle.index() as usize].state.linear_velocity = velocity;
        handle
    }

    pub fn add_paddle(&mut self, x: f32, controller: Option<&str>) -> BodyHandle {
        let handle = self.add(Vec2::new(x, 0.0), false);
        self.bodies[handle.index() as usize].controller = controller.map(str::to_string);
        handle
    }

    /// Body mirroring an entity the host spawned.
    pub fn add_remote(&mut self, position: Vec2) -> BodyHandle {
        self.add(position, false)
    }

    fn add(&mut self, position: Vec2, bounces: bool) -> BodyHandle {
        let handle = BodyHandle(self.bodies.len() as u32);
        self.bodies.push(Body {
            state: BodyState::at_rest(handle, "", position),
            net_entity_id: None,
            controller: None,
            bounces,
        });
        handle
    }

    pub fn bind(&mut self, handle: BodyHandle, net_entity_id: NetEntityId) {
        if let Some(body) = self.bodies.get_mut(handle.index() as usize) {
            body.state.net_entity_id = net_entity_id.clone();
            body.net_entity_id = Some(net_entity_id);
        }
    }

    pub fn position(&self, handle: BodyHandle) -> Option<Vec2> {
        self.bodies
            .get(handle.index() as usize)
            .map(|body| body.state.position)
    }

    pub fn find(&self, net_entity_id: &str) -> Option<Vec2> {
        self.bodies
            .iter()
            .find(|body| body.net_entity_id.as_deref() == Some(net_entity_id))
            .map(|body| body.state.position)
    }
}

impl SimulationAdapter for Court {
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
            .map(|body| body.state.clone())
    }

    fn set_body_state(&mut self, handle: BodyHandle, state: &BodyState) {
        if let Some(body) = self.bodies.get_mut(handle.index() as usize) {
            body.state = state.clone();
        }
    }

    fn apply_input(&mut self, peer_id: &str, input: &PlayerInput) {
        let direction = input.movement.map_or(0.0, |m| m.y.clamp(-1.0, 1.0));
        for body in &mut self.bodies {
            if body.controller.as_deref() == Some(peer_id) {
                body.state.linear_velocity = Vec2::new(0.0, direction * PADDLE_SPEED);
            }
        }
    }

    fn step(&mut self, dt: f32) {
        for body in &mut self.bodies {
            let state = &mut body.state;
            state.position += state.linear_velocity * dt;
            state.angle += state.angular_velocity * dt;

            if state.position.y.abs() > HALF_HEIGHT {
                state.position.y = state.position.y.clamp(-HALF_HEIGHT, HALF_HEIGHT);
                if body.bounces {
                    state.linear_velocity.y = -state.linear_velocity.y;
                } else {
                    state.linear_velocity.y = 0.0;
                }
            }
            if body.bounces && state.position.x.abs() > HALF_WIDTH {
                state.position.x = state.position.x.clamp(-HALF_WIDTH, HALF_WIDTH);
                state.linear_velocity.x = -state.linear_velocity.x;
            }
            state.is_awake = state.linear_velocity != Vec2::ZERO;
        }
    }

    fn tick_id(&self) -> u32 {
        self.tick
    }

    fn increment_tick_id(&mut self) {
        self.tick += 1;
    }
}
