mod adapter;
mod buffer;
mod config;
mod diff;
mod interpolation;
mod synchronizer;

pub use adapter::{DynamicBody, SimulationAdapter};
pub use buffer::{BufferedState, StateBuffer};
pub use config::{SyncConfig, valid_timestep};
pub use diff::{BodyDiff, DiffEpsilon, body_changed, diff_bodies, diff_game_state};
pub use interpolation::{interpolate_bodies, lerp_angle, sample};
pub use synchronizer::{Broadcast, Synchronizer};
