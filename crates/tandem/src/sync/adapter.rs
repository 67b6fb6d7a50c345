use crate::entity::BodyHandle;
use crate::net::{BodyState, NetEntityId, PlayerInput};

/// A body the simulation wants replicated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DynamicBody {
    pub handle: BodyHandle,
    pub net_entity_id: NetEntityId,
}

/// The synchronizer's view of a physics world.
///
/// Implemented by the game on top of whatever engine it runs. The host calls
/// every method; clients only read bodies and write interpolated state.
pub trait SimulationAdapter {
    fn dynamic_bodies(&self) -> Vec<DynamicBody>;

    fn body_state(&self, handle: BodyHandle) -> Option<BodyState>;

    fn set_body_state(&mut self, handle: BodyHandle, state: &BodyState);

    fn apply_input(&mut self, peer_id: &str, input: &PlayerInput);

    fn step(&mut self, dt: f32);

    fn tick_id(&self) -> u32;

    fn increment_tick_id(&mut self);
}
