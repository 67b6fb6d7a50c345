use std::f32::consts::{PI, TAU};

use crate::net::BodyState;

use super::buffer::{BufferedState, StateBuffer};

/// Interpolates along the shortest arc between two angles in radians.
pub fn lerp_angle(from: f32, to: f32, t: f32) -> f32 {
    let diff = (to - from + PI).rem_euclid(TAU) - PI;
    from + diff * t
}

fn interpolate_body(from: &BodyState, to: &BodyState, t: f32) -> BodyState {
    BodyState {
        id: to.id,
        net_entity_id: to.net_entity_id.clone(),
        position: from.position.lerp(to.position, t),
        angle: lerp_angle(from.angle, to.angle, t),
        linear_velocity: from.linear_velocity.lerp(to.linear_velocity, t),
        angular_velocity: from.angular_velocity + (to.angular_velocity - from.angular_velocity) * t,
        is_awake: to.is_awake,
    }
}

/// Blends every body of `to` with its counterpart in `from`. Bodies that only
/// exist in `to` are taken as-is; bodies gone from `to` are dropped.
pub fn interpolate_bodies(from: &BufferedState, to: &BufferedState, t: f32) -> Vec<BodyState> {
    let t = t.clamp(0.0, 1.0);
    to.bodies
        .iter()
        .map(|(id, target)| match from.bodies.get(id) {
            Some(source) => interpolate_body(source, target, t),
            None => target.clone(),
        })
        .collect()
}

/// Body states to display for render tick `target`.
///
/// Returns `None` on an empty buffer. When only one side of `target` is
/// buffered, that side is returned unblended.
pub fn sample(buffer: &StateBuffer, target: u32) -> Option<Vec<BodyState>> {
    match buffer.bracket(target) {
        (Some(before), Some(after)) if before.tick_id != after.tick_id => {
            let span = (after.tick_id - before.tick_id) as f32;
            let t = (target - before.tick_id) as f32 / span;
            Some(interpolate_bodies(before, after, t))
        }
        (Some(state), _) | (None, Some(state)) => Some(state.bodies.values().cloned().collect()),
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use glam::Vec2;

    use super::*;
    use crate::entity::BodyHandle;
    use crate::net::GameSyncState;

    fn state(tick_id: u32, bodies: &[BodyState]) -> BufferedState {
        BufferedState {
            tick_id,
            bodies: bodies
                .iter()
                .map(|b| (b.net_entity_id.clone(), b.clone()))
                .collect::<BTreeMap<_, _>>(),
            game_state: GameSyncState::default(),
        }
    }

    fn body(x: f32, angle: f32) -> BodyState {
        let mut body = BodyState::at_rest(BodyHandle(1), "a", Vec2::new(x, 0.0));
        body.angle = angle;
        body.linear_velocity = Vec2::new(x, x);
        body
    }

    #[test]
    fn test_lerp_angle_takes_shortest_arc() {
        let from = PI - 0.1;
        let to = -PI + 0.1;
        let mid = lerp_angle(from, to, 0.5);
        assert!((mid.abs() - PI).abs() < 1e-5, "mid = {mid}");

        assert!((lerp_angle(0.0, 1.0, 0.25) - 0.25).abs() < 1e-6);
        assert!((lerp_angle(0.3, -0.3, 1.0) + 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_endpoints() {
        let from = state(10, &[body(0.0, 0.0)]);
        let to = state(13, &[body(3.0, 0.6)]);

        let start = interpolate_bodies(&from, &to, 0.0);
        assert_eq!(start[0].position, Vec2::ZERO);
        assert_eq!(start[0].angle, 0.0);

        let end = interpolate_bodies(&from, &to, 1.0);
        assert_eq!(end[0].position, Vec2::new(3.0, 0.0));
        assert!((end[0].angle - 0.6).abs() < 1e-6);
        assert_eq!(end[0].linear_velocity, Vec2::new(3.0, 3.0));
    }

    #[test]
    fn test_sample_between_and_outside_buffer() {
        let mut buffer = StateBuffer::new(30, 20);
        assert!(sample(&buffer, 5).is_none());

        buffer.insert(state(10, &[body(0.0, 0.0)]));
        buffer.insert(state(14, &[body(4.0, 0.0)]));

        let mid = sample(&buffer, 11).unwrap();
        assert!((mid[0].position.x - 1.0).abs() < 1e-6);

        // Before the earliest entry: earliest raw state.
        let early = sample(&buffer, 2).unwrap();
        assert_eq!(early[0].position.x, 0.0);

        // Past the newest entry: newest raw state.
        let late = sample(&buffer, 40).unwrap();
        assert_eq!(late[0].position.x, 4.0);

        let exact = sample(&buffer, 14).unwrap();
        assert_eq!(exact[0].position.x, 4.0);
    }

    #[test]
    fn test_body_only_in_target_is_not_blended() {
        let mut spawned = body(9.0, 1.0);
        spawned.net_entity_id = "b".into();

        let from = state(10, &[body(0.0, 0.0)]);
        let to = state(12, &[body(2.0, 0.0), spawned.clone()]);

        let out = interpolate_bodies(&from, &to, 0.5);
        assert_eq!(out.len(), 2);
        assert_eq!(out.iter().find(|b| b.net_entity_id == "b"), Some(&spawned));
    }

    #[test]
    fn test_awake_flag_follows_target() {
        let from = state(10, &[body(0.0, 0.0)]);
        let mut sleeping = body(1.0, 0.0);
        sleeping.is_awake = false;
        let to = state(11, &[sleeping]);

        assert!(!interpolate_bodies(&from, &to, 0.1)[0].is_awake);
    }
}
