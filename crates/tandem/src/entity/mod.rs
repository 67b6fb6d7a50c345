mod registry;

use serde::{Deserialize, Serialize};

pub use registry::{NetEntityRecord, NetEntityRegistry};

/// Index of a body inside the local simulation's arena.
///
/// Only meaningful on the device that created it. Peers identify bodies by
/// their [`NetEntityId`](crate::net::NetEntityId).
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Default,
    rkyv::Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
    Serialize,
    Deserialize,
)]
#[serde(transparent)]
pub struct BodyHandle(pub u32);

impl BodyHandle {
    pub fn index(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for BodyHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "body#{}", self.0)
    }
}
