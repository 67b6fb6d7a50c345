use std::collections::{BTreeMap, HashMap, VecDeque};

use crate::net::{
    BodyState, GameSyncState, NetEntityId, NetworkMessage, Payload, PeerId, PlayerInput,
    SessionRole, StateDelta, StateSnapshot,
};
use crate::transport::{Transport, TransportError};

use super::adapter::SimulationAdapter;
use super::buffer::{BufferedState, StateBuffer};
use super::config::SyncConfig;
use super::diff::{diff_bodies, diff_game_state};
use super::interpolation;

/// What the host broadcast on a tick, if anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Broadcast {
    Snapshot { tick_id: u32 },
    Delta { tick_id: u32, base_tick_id: u32 },
}

#[derive(Debug, Clone)]
struct BufferedInput {
    tick_id: u32,
    input: PlayerInput,
}

/// Host-authoritative replication over any [`Transport`].
///
/// On the host it steps the simulation, applies peer input and broadcasts
/// snapshots and deltas. On a client it buffers received states and writes
/// interpolated bodies back into the local simulation, which it never steps.
#[derive(Debug)]
pub struct Synchronizer {
    config: SyncConfig,
    role: SessionRole,
    game_state: GameSyncState,

    // Host
    baseline: BTreeMap<NetEntityId, BodyState>,
    baseline_game_state: GameSyncState,
    last_snapshot_tick: Option<u32>,
    last_broadcast_tick: u32,
    last_delta_check_tick: u32,
    resync_pending: bool,
    inputs: HashMap<PeerId, VecDeque<BufferedInput>>,

    // Client
    buffer: StateBuffer,
    last_received_tick: Option<u32>,
    deltas_dropped: u64,
}

impl Synchronizer {
    pub fn new(config: SyncConfig, role: SessionRole) -> Self {
        let buffer = StateBuffer::new(config.state_buffer_capacity, config.state_buffer_trim);
        Self {
            config,
            role,
            game_state: GameSyncState::default(),
            baseline: BTreeMap::new(),
            baseline_game_state: GameSyncState::default(),
            last_snapshot_tick: None,
            last_broadcast_tick: 0,
            last_delta_check_tick: 0,
            resync_pending: false,
            inputs: HashMap::new(),
            buffer,
            last_received_tick: None,
            deltas_dropped: 0,
        }
    }

    pub fn role(&self) -> SessionRole {
        self.role
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn game_state(&self) -> &GameSyncState {
        &self.game_state
    }

    /// Host only; replicated with the next snapshot or delta.
    pub fn set_game_state(&mut self, state: GameSyncState) {
        self.game_state = state;
    }

    pub fn game_state_mut(&mut self) -> &mut GameSyncState {
        &mut self.game_state
    }

    /// Forces a full snapshot on the next host tick.
    pub fn request_resync(&mut self) {
        self.resync_pending = true;
    }

    pub fn last_received_tick(&self) -> Option<u32> {
        self.last_received_tick
    }

    pub fn buffered_states(&self) -> usize {
        self.buffer.len()
    }

    pub fn deltas_dropped(&self) -> u64 {
        self.deltas_dropped
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.config.clone(), self.role);
    }

    pub fn tick(
        &mut self,
        transport: &mut dyn Transport,
        adapter: &mut dyn SimulationAdapter,
        local_input: Option<&PlayerInput>,
    ) -> Result<Option<Broadcast>, TransportError> {
        match self.role {
            SessionRole::Host => self.host_tick(transport, adapter, local_input),
            SessionRole::Client => {
                self.client_tick(transport, adapter, local_input)?;
                Ok(None)
            }
        }
    }

    fn host_tick(
        &mut self,
        transport: &mut dyn Transport,
        adapter: &mut dyn SimulationAdapter,
        local_input: Option<&PlayerInput>,
    ) -> Result<Option<Broadcast>, TransportError> {
        if let Some(input) = local_input {
            adapter.apply_input(transport.local_peer_id(), input);
        }

        let mut peers: Vec<&PeerId> = self.inputs.keys().collect();
        peers.sort();
        for peer_id in peers {
            let Some(queue) = self.inputs.get(peer_id) else {
                continue;
            };
            // Newest wins and stays applied until replaced.
            if let Some(latest) = queue.back() {
                adapter.apply_input(peer_id, &latest.input);
            }
        }
        for queue in self.inputs.values_mut() {
            while queue.len() > 1 {
                queue.pop_front();
            }
        }

        adapter.step(self.config.timestep());
        adapter.increment_tick_id();
        let tick_id = adapter.tick_id();

        let snapshot_due = self.resync_pending
            || self.last_snapshot_tick.is_none_or(|last| {
                tick_id.wrapping_sub(last) >= self.config.snapshot_interval
            });

        if snapshot_due {
            return self.broadcast_snapshot(transport, adapter, tick_id);
        }

        if tick_id.wrapping_sub(self.last_delta_check_tick) < self.config.delta_interval {
            return Ok(None);
        }
        self.last_delta_check_tick = tick_id;
        self.broadcast_delta(transport, adapter, tick_id)
    }

    fn broadcast_snapshot(
        &mut self,
        transport: &mut dyn Transport,
        adapter: &dyn SimulationAdapter,
        tick_id: u32,
    ) -> Result<Option<Broadcast>, TransportError> {
        let bodies = sample_bodies(adapter);
        let snapshot = StateSnapshot {
            tick_id,
            bodies: bodies.clone(),
            game_state: self.game_state.clone(),
        };

        self.last_delta_check_tick = tick_id;
        if let Err(err) = transport.broadcast(NetworkMessage::new(Payload::StateSnapshot(snapshot)))
        {
            self.resync_pending = true;
            return Err(err);
        }

        self.baseline = bodies
            .into_iter()
            .map(|body| (body.net_entity_id.clone(), body))
            .collect();
        self.baseline_game_state = self.game_state.clone();
        self.last_snapshot_tick = Some(tick_id);
        self.last_broadcast_tick = tick_id;
        self.resync_pending = false;
        log::trace!("Snapshot at tick {}", tick_id);
        Ok(Some(Broadcast::Snapshot { tick_id }))
    }

    fn broadcast_delta(
        &mut self,
        transport: &mut dyn Transport,
        adapter: &dyn SimulationAdapter,
        tick_id: u32,
    ) -> Result<Option<Broadcast>, TransportError> {
        let current = sample_bodies(adapter);
        let diff = diff_bodies(&self.baseline, &current, self.config.epsilon());
        let game_state_delta = diff_game_state(&self.baseline_game_state, &self.game_state);

        let delta = StateDelta {
            tick_id,
            base_tick_id: self.last_broadcast_tick,
            changed_bodies: diff.changed,
            added_bodies: diff.added,
            removed_body_ids: diff.removed,
            game_state_delta,
        };
        if delta.is_empty() {
            return Ok(None);
        }

        // Baseline becomes what clients reconstruct, so unsent sub-epsilon
        // motion keeps accumulating against the old value.
        let base = BufferedState {
            tick_id: self.last_broadcast_tick,
            bodies: std::mem::take(&mut self.baseline),
            game_state: self.baseline_game_state.clone(),
        };
        let next = base.with_delta(&delta);
        let base_tick_id = delta.base_tick_id;

        if let Err(err) = transport.broadcast(NetworkMessage::new(Payload::StateDelta(delta))) {
            self.baseline = base.bodies;
            self.resync_pending = true;
            return Err(err);
        }

        self.baseline = next.bodies;
        self.baseline_game_state = next.game_state;
        self.last_broadcast_tick = tick_id;
        Ok(Some(Broadcast::Delta {
            tick_id,
            base_tick_id,
        }))
    }

    fn client_tick(
        &mut self,
        transport: &mut dyn Transport,
        adapter: &mut dyn SimulationAdapter,
        local_input: Option<&PlayerInput>,
    ) -> Result<(), TransportError> {
        if let Some(input) = local_input {
            let tick_id = self
                .last_received_tick
                .unwrap_or(0)
                .wrapping_add(self.config.interpolation_delay);
            let message = NetworkMessage::new(Payload::InputEvent {
                tick_id,
                player_id: transport.local_peer_id().clone(),
                inputs: input.clone(),
            });
            transport.broadcast(message)?;
        }

        self.render(adapter);
        Ok(())
    }

    fn render(&self, adapter: &mut dyn SimulationAdapter) {
        let Some(latest) = self.last_received_tick else {
            return;
        };
        let target = latest.saturating_sub(self.config.interpolation_delay);
        let Some(states) = interpolation::sample(&self.buffer, target) else {
            return;
        };

        let handles: HashMap<NetEntityId, _> = adapter
            .dynamic_bodies()
            .into_iter()
            .map(|body| (body.net_entity_id, body.handle))
            .collect();

        for mut state in states {
            match handles.get(&state.net_entity_id) {
                Some(&handle) => {
                    state.id = handle;
                    adapter.set_body_state(handle, &state);
                }
                None => log::trace!("No local body for {}", state.net_entity_id),
            }
        }
    }

    /// Host side: queues input from `peer_id`, dropping the oldest when full.
    pub fn receive_input(&mut self, peer_id: &str, tick_id: u32, input: PlayerInput) {
        if self.role != SessionRole::Host {
            log::debug!("Ignoring input from {} on a client", peer_id);
            return;
        }
        let queue = self.inputs.entry(peer_id.to_string()).or_default();
        queue.push_back(BufferedInput { tick_id, input });
        while queue.len() > self.config.input_buffer_size {
            queue.pop_front();
        }
    }

    /// Newest queued input tick for `peer_id`.
    pub fn latest_input_tick(&self, peer_id: &str) -> Option<u32> {
        self.inputs.get(peer_id)?.back().map(|buffered| buffered.tick_id)
    }

    pub fn pending_inputs(&self, peer_id: &str) -> usize {
        self.inputs.get(peer_id).map_or(0, VecDeque::len)
    }

    pub fn remove_peer(&mut self, peer_id: &str) {
        self.inputs.remove(peer_id);
    }

    pub fn receive_snapshot(&mut self, snapshot: &StateSnapshot) {
        if self.role != SessionRole::Client {
            return;
        }
        self.buffer.insert(BufferedState::from_snapshot(snapshot));
        self.game_state = snapshot.game_state.clone();
        self.note_received(snapshot.tick_id);
    }

    pub fn receive_delta(&mut self, delta: &StateDelta) {
        if self.role != SessionRole::Client {
            return;
        }
        if !self.buffer.apply_delta(delta) {
            self.deltas_dropped += 1;
            log::debug!(
                "Dropping delta {} with unknown base {}",
                delta.tick_id,
                delta.base_tick_id
            );
            return;
        }
        if let Some(game_delta) = &delta.game_state_delta {
            self.game_state.apply(game_delta);
        }
        self.note_received(delta.tick_id);
    }

    fn note_received(&mut self, tick_id: u32) {
        self.last_received_tick = Some(self.last_received_tick.map_or(tick_id, |t| t.max(tick_id)));
    }
}

fn sample_bodies(adapter: &dyn SimulationAdapter) -> Vec<BodyState> {
    adapter
        .dynamic_bodies()
        .into_iter()
        .filter_map(|body| {
            let mut state = adapter.body_state(body.handle)?;
            state.net_entity_id = body.net_entity_id;
            Some(state)
        })
        .collect()
}
