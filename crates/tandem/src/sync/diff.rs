use std::collections::BTreeMap;

use crate::net::{BodyState, GameStateDelta, GameSyncState, NetEntityId};

/// Per-component thresholds below which a body counts as unchanged.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiffEpsilon {
    pub position: f32,
    pub angle: f32,
    pub velocity: f32,
}

impl Default for DiffEpsilon {
    fn default() -> Self {
        Self {
            position: 0.001,
            angle: 0.001,
            velocity: 0.01,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BodyDiff {
    pub changed: Vec<BodyState>,
    pub added: Vec<BodyState>,
    pub removed: Vec<NetEntityId>,
}

impl BodyDiff {
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.added.is_empty() && self.removed.is_empty()
    }
}

pub fn body_changed(previous: &BodyState, current: &BodyState, epsilon: DiffEpsilon) -> bool {
    (current.position.x - previous.position.x).abs() > epsilon.position
        || (current.position.y - previous.position.y).abs() > epsilon.position
        || (current.angle - previous.angle).abs() > epsilon.angle
        || (current.linear_velocity.x - previous.linear_velocity.x).abs() > epsilon.velocity
        || (current.linear_velocity.y - previous.linear_velocity.y).abs() > epsilon.velocity
        || current.is_awake != previous.is_awake
}

/// Compares the current sample against the last broadcast baseline.
pub fn diff_bodies(
    baseline: &BTreeMap<NetEntityId, BodyState>,
    current: &[BodyState],
    epsilon: DiffEpsilon,
) -> BodyDiff {
    let mut diff = BodyDiff::default();

    for body in current {
        match baseline.get(&body.net_entity_id) {
            Some(previous) if body_changed(previous, body, epsilon) => {
                diff.changed.push(body.clone())
            }
            Some(_) => {}
            None => diff.added.push(body.clone()),
        }
    }

    diff.removed = baseline
        .keys()
        .filter(|id| !current.iter().any(|body| &body.net_entity_id == *id))
        .cloned()
        .collect();

    diff
}

/// Fields of `current` that differ from `previous`, or `None` when equal.
/// Variables are reported per key; removed keys are not expressible.
pub fn diff_game_state(
    previous: &GameSyncState,
    current: &GameSyncState,
) -> Option<GameStateDelta> {
    let variables: BTreeMap<String, f64> = current
        .variables
        .iter()
        .filter(|(key, value)| previous.variables.get(*key) != Some(*value))
        .map(|(key, value)| (key.clone(), *value))
        .collect();

    let delta = GameStateDelta {
        score: (current.score != previous.score).then_some(current.score),
        lives: (current.lives != previous.lives).then_some(current.lives),
        time: (current.time != previous.time).then_some(current.time),
        phase: (current.phase != previous.phase).then_some(current.phase),
        variables: (!variables.is_empty()).then_some(variables),
    };

    (!delta.is_empty()).then_some(delta)
}
