use std::collections::BTreeMap;

use crate::net::{BodyState, GameSyncState, NetEntityId, StateDelta, StateSnapshot};

/// Full world state at one tick, keyed by net entity id.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferedState {
    pub tick_id: u32,
    pub bodies: BTreeMap<NetEntityId, BodyState>,
    pub game_state: GameSyncState,
}

impl BufferedState {
    pub fn from_snapshot(snapshot: &StateSnapshot) -> Self {
        Self {
            tick_id: snapshot.tick_id,
            bodies: snapshot
                .bodies
                .iter()
                .map(|body| (body.net_entity_id.clone(), body.clone()))
                .collect(),
            game_state: snapshot.game_state.clone(),
        }
    }

    /// Builds the state a delta describes on top of `self`.
    pub fn with_delta(&self, delta: &StateDelta) -> Self {
        let mut bodies = self.bodies.clone();
        for body in delta.changed_bodies.iter().chain(&delta.added_bodies) {
            bodies.insert(body.net_entity_id.clone(), body.clone());
        }
        for removed in &delta.removed_body_ids {
            bodies.remove(removed);
        }

        let mut game_state = self.game_state.clone();
        if let Some(game_delta) = &delta.game_state_delta {
            game_state.apply(game_delta);
        }

        Self {
            tick_id: delta.tick_id,
            bodies,
            game_state,
        }
    }
}

/// Tick-ordered client history of received states.
#[derive(Debug)]
pub struct StateBuffer {
    states: BTreeMap<u32, BufferedState>,
    capacity: usize,
    trim_to: usize,
}

impl StateBuffer {
    pub fn new(capacity: usize, trim_to: usize) -> Self {
        Self {
            states: BTreeMap::new(),
            capacity: capacity.max(1),
            trim_to: trim_to.clamp(1, capacity.max(1)),
        }
    }

    pub fn insert(&mut self, state: BufferedState) {
        self.states.insert(state.tick_id, state);
        if self.states.len() > self.capacity {
            let excess = self.states.len() - self.trim_to;
            let stale: Vec<u32> = self.states.keys().take(excess).copied().collect();
            for tick in stale {
                self.states.remove(&tick);
            }
        }
    }

    /// Rebuilds and stores the state a delta describes. Returns `false` and
    /// stores nothing when the base tick is not buffered.
    pub fn apply_delta(&mut self, delta: &StateDelta) -> bool {
        let Some(base) = self.states.get(&delta.base_tick_id) else {
            return false;
        };
        let state = base.with_delta(delta);
        self.insert(state);
        true
    }

    pub fn get(&self, tick_id: u32) -> Option<&BufferedState> {
        self.states.get(&tick_id)
    }

    pub fn latest(&self) -> Option<&BufferedState> {
        self.states.values().next_back()
    }

    /// States bracketing `target`: the newest at or before it and the oldest
    /// at or after it. Either side may be missing; both may be the same entry.
    pub fn bracket(&self, target: u32) -> (Option<&BufferedState>, Option<&BufferedState>) {
        let before = self.states.range(..=target).next_back().map(|(_, s)| s);
        let after = self.states.range(target..).next().map(|(_, s)| s);
        (before, after)
    }

    pub fn ticks(&self) -> impl Iterator<Item = u32> + '_ {
        self.states.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn clear(&mut self) {
        self.states.clear();
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec2;

    use super::*;
    use crate::entity::BodyHandle;
    use crate::net::GameStateDelta;

    fn snapshot(tick_id: u32, x: f32) -> StateSnapshot {
        StateSnapshot {
            tick_id,
            bodies: vec![
                BodyState::at_rest(BodyHandle(1), "a", Vec2::new(x, 0.0)),
                BodyState::at_rest(BodyHandle(2), "b", Vec2::new(0.0, x)),
            ],
            game_state: GameSyncState::default(),
        }
    }

    #[test]
    fn test_trims_to_newest_when_over_capacity() {
        let mut buffer = StateBuffer::new(30, 20);
        for tick in 0..30 {
            buffer.insert(BufferedState::from_snapshot(&snapshot(tick, 0.0)));
        }
        assert_eq!(buffer.len(), 30);

        buffer.insert(BufferedState::from_snapshot(&snapshot(30, 0.0)));
        assert_eq!(buffer.len(), 20);
        assert_eq!(buffer.ticks().next(), Some(11));
        assert_eq!(buffer.latest().map(|s| s.tick_id), Some(30));
    }

    #[test]
    fn test_delta_against_missing_base_is_dropped() {
        let mut buffer = StateBuffer::new(30, 20);
        buffer.insert(BufferedState::from_snapshot(&snapshot(10, 1.0)));

        let delta = StateDelta {
            tick_id: 13,
            base_tick_id: 7,
            changed_bodies: vec![],
            added_bodies: vec![],
            removed_body_ids: vec!["a".into()],
            game_state_delta: None,
        };
        assert!(!buffer.apply_delta(&delta));
        assert!(buffer.get(13).is_none());
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_delta_rebuilds_from_base() {
        let mut buffer = StateBuffer::new(30, 20);
        buffer.insert(BufferedState::from_snapshot(&snapshot(10, 1.0)));

        let mut moved = BodyState::at_rest(BodyHandle(1), "a", Vec2::new(4.0, 0.0));
        moved.linear_velocity = Vec2::new(1.0, 0.0);
        let delta = StateDelta {
            tick_id: 13,
            base_tick_id: 10,
            changed_bodies: vec![moved.clone()],
            added_bodies: vec![BodyState::at_rest(BodyHandle(3), "c", Vec2::ONE)],
            removed_body_ids: vec!["b".into()],
            game_state_delta: Some(GameStateDelta {
                score: Some(5),
                ..Default::default()
            }),
        };
        assert!(buffer.apply_delta(&delta));

        let rebuilt = buffer.get(13).unwrap();
        assert_eq!(rebuilt.bodies.get("a"), Some(&moved));
        assert!(rebuilt.bodies.contains_key("c"));
        assert!(!rebuilt.bodies.contains_key("b"));
        assert_eq!(rebuilt.game_state.score, 5);
        assert_eq!(rebuilt.game_state.lives, 3);
        // Base entry is untouched.
        assert_eq!(buffer.get(10).unwrap().bodies.len(), 2);
    }

    #[test]
    fn test_bracket() {
        let mut buffer = StateBuffer::new(30, 20);
        for tick in [10, 13, 16] {
            buffer.insert(BufferedState::from_snapshot(&snapshot(tick, 0.0)));
        }

        let ticks = |(b, a): (Option<&BufferedState>, Option<&BufferedState>)| {
            (b.map(|s| s.tick_id), a.map(|s| s.tick_id))
        };
        assert_eq!(ticks(buffer.bracket(11)), (Some(10), Some(13)));
        assert_eq!(ticks(buffer.bracket(13)), (Some(13), Some(13)));
        assert_eq!(ticks(buffer.bracket(4)), (None, Some(10)));
        assert_eq!(ticks(buffer.bracket(20)), (Some(16), None));
    }
}
