//! Binds one transport, one synchronizer and the entity registry into a
//! game session driven by [`GameSession::update`].

mod events;
mod game_loop;

use std::collections::{BTreeMap, VecDeque};
use std::collections::vec_deque::Drain;
use std::mem::Discriminant;
use std::time::Instant;

use glam::Vec2;

pub use events::{SessionError, SessionEvent};
pub use game_loop::NetworkGameLoop;

use crate::entity::{BodyHandle, NetEntityRegistry};
use crate::net::{
    ConnectionState, DespawnReason, EntitySpawn, GamePhase, GameSyncState, NetEntityId,
    NetworkMessage, NetworkStats, PROTOCOL_VERSION, Payload, PeerId, PlayerInput, SessionRole,
    SpawnTransform,
};
use crate::sync::{Broadcast, SimulationAdapter, SyncConfig, Synchronizer};
use crate::transport::{
    RadioConfig, RadioLink, RadioTransport, RelayConfig, RelaySocket, RelayTransport, Transport,
    TransportConfig, TransportError, TransportEvent, TransportKind,
};

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub transport: TransportKind,
    pub device_name: String,
    pub game_id: String,
    pub game_version: String,
    /// Session to host under or join. Required to join over the relay.
    pub session_id: Option<String>,
    pub relay_url: Option<String>,
    pub sync: SyncConfig,
}

impl SessionConfig {
    pub fn radio(device_name: impl Into<String>, game_id: impl Into<String>) -> Self {
        Self {
            transport: TransportKind::Radio,
            device_name: device_name.into(),
            game_id: game_id.into(),
            game_version: PROTOCOL_VERSION.to_string(),
            session_id: None,
            relay_url: None,
            sync: SyncConfig::default(),
        }
    }

    pub fn relay(
        device_name: impl Into<String>,
        game_id: impl Into<String>,
        relay_url: impl Into<String>,
    ) -> Self {
        Self {
            transport: TransportKind::Relay,
            relay_url: Some(relay_url.into()),
            ..Self::radio(device_name, game_id)
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            device_name: self.device_name.clone(),
            game_id: self.game_id.clone(),
            game_version: self.game_version.clone(),
            session_id: self.session_id.clone(),
        }
    }

    pub fn relay_config(&self) -> Result<RelayConfig, SessionError> {
        self.relay_url
            .as_ref()
            .map(RelayConfig::new)
            .ok_or(SessionError::MissingRelayUrl)
    }

    pub fn radio_transport<L: RadioLink + 'static>(&self, link: L) -> Box<dyn Transport> {
        Box::new(RadioTransport::with_config(link, RadioConfig::default()))
    }

    pub fn relay_transport<S: RelaySocket + 'static>(
        &self,
        socket: S,
    ) -> Result<Box<dyn Transport>, SessionError> {
        Ok(Box::new(RelayTransport::new(socket, self.relay_config()?)))
    }
}

/// One multiplayer session, host or client.
///
/// The session owns the transport and the game's simulation adapter. Every
/// frame the game calls [`GameSession::update`] with its local input, then
/// drains [`SessionEvent`]s.
pub struct GameSession<A: SimulationAdapter> {
    config: SessionConfig,
    transport: Box<dyn Transport>,
    adapter: A,
    sync: Synchronizer,
    registry: NetEntityRegistry,
    role: SessionRole,
    host_name: Option<String>,
    events: VecDeque<SessionEvent>,
    /// Kind of the last failed sync broadcast, until one succeeds again.
    sync_fault: Option<Discriminant<TransportError>>,
}

impl<A: SimulationAdapter> GameSession<A> {
    /// Starts hosting. The host runs the authoritative simulation.
    pub fn host(
        config: SessionConfig,
        transport: Box<dyn Transport>,
        adapter: A,
    ) -> Result<Self, SessionError> {
        let mut session = Self::prepare(config, transport, adapter, SessionRole::Host)?;
        session
            .transport
            .start_hosting(&session.config.transport_config())?;
        session.host_name = Some(session.config.device_name.clone());
        log::info!(
            "Hosting {} over {}",
            session.config.game_id,
            session.config.transport
        );
        Ok(session)
    }

    /// Starts joining. The connection completes over later updates.
    pub fn join(
        config: SessionConfig,
        transport: Box<dyn Transport>,
        adapter: A,
    ) -> Result<Self, SessionError> {
        let mut session = Self::prepare(config, transport, adapter, SessionRole::Client)?;
        session
            .transport
            .join_session(&session.config.transport_config())?;
        log::info!(
            "Joining {} over {}",
            session.config.game_id,
            session.config.transport
        );
        Ok(session)
    }

    fn prepare(
        config: SessionConfig,
        mut transport: Box<dyn Transport>,
        adapter: A,
        role: SessionRole,
    ) -> Result<Self, SessionError> {
        if transport.kind() != config.transport {
            return Err(SessionError::TransportMismatch {
                expected: config.transport,
                actual: transport.kind(),
            });
        }
        if config.transport == TransportKind::Relay && config.relay_url.is_none() {
            return Err(SessionError::MissingRelayUrl);
        }
        if transport.state() == ConnectionState::Disconnected {
            transport.initialize()?;
        }

        let registry = NetEntityRegistry::new(transport.local_peer_id().clone());
        let sync = Synchronizer::new(config.sync.clone(), role);
        Ok(Self {
            config,
            transport,
            adapter,
            sync,
            registry,
            role,
            host_name: None,
            events: VecDeque::new(),
            sync_fault: None,
        })
    }

    pub fn update(&mut self, input: Option<&PlayerInput>) -> Option<Broadcast> {
        self.update_at(Instant::now(), input)
    }

    /// Pumps the transport, handles everything it delivered and runs one
    /// synchronizer tick if the session is live.
    pub fn update_at(&mut self, now: Instant, input: Option<&PlayerInput>) -> Option<Broadcast> {
        self.transport.poll(now);
        let events: Vec<TransportEvent> = self.transport.drain_events().collect();
        for event in events {
            self.handle_transport_event(event);
        }

        if !self.should_tick() {
            return None;
        }
        match self
            .sync
            .tick(self.transport.as_mut(), &mut self.adapter, input)
        {
            Ok(Some(broadcast)) => {
                self.sync_fault = None;
                Some(broadcast)
            }
            Ok(None) => None,
            Err(err) => {
                self.report_sync_fault(err);
                None
            }
        }
    }

    /// Surfaces a failed sync send once per kind of failure. Retries that
    /// fail the same way are only logged.
    fn report_sync_fault(&mut self, err: TransportError) {
        let kind = std::mem::discriminant(&err);
        if self.sync_fault == Some(kind) {
            log::debug!("Sync tick could not send: {}", err);
            return;
        }
        log::warn!("Sync tick could not send: {}", err);
        self.sync_fault = Some(kind);
        self.events.push_back(SessionEvent::Error(err));
    }

    fn should_tick(&self) -> bool {
        match (self.role, self.transport.state()) {
            (SessionRole::Host, ConnectionState::Advertising | ConnectionState::Connected) => true,
            (SessionRole::Client, ConnectionState::Connected) => true,
            _ => false,
        }
    }

    fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::StateChanged(state) => {
                self.events.push_back(SessionEvent::StateChanged(state));
            }
            TransportEvent::PeerConnected { peer_id, name } => {
                if self.role == SessionRole::Host {
                    self.welcome(&peer_id);
                }
                self.events
                    .push_back(SessionEvent::PeerJoined { peer_id, name });
            }
            TransportEvent::PeerDisconnected { peer_id, reason } => {
                self.sync.remove_peer(&peer_id);
                self.events
                    .push_back(SessionEvent::PeerLeft { peer_id, reason });
            }
            TransportEvent::MessageReceived { from, message } => {
                self.handle_message(from, message);
            }
            TransportEvent::Error(error) => {
                self.events.push_back(SessionEvent::Error(error));
            }
        }
    }

    /// Greets a new peer: handshake response, live entities, then a fresh
    /// snapshot on the next tick.
    fn welcome(&mut self, peer_id: &str) {
        let response = NetworkMessage::new(Payload::HandshakeResponse {
            accepted: true,
            assigned_peer_id: peer_id.to_string(),
            host_name: self.config.device_name.clone(),
            game_state: self.sync.game_state().clone(),
            reject_reason: None,
        });
        if let Err(err) = self.transport.send(response, peer_id) {
            log::warn!("Could not send handshake response to {}: {}", peer_id, err);
        }

        let mut records: Vec<_> = self.registry.iter().collect();
        records.sort_by(|a, b| a.net_entity_id.cmp(&b.net_entity_id));
        for record in records {
            let state = self.adapter.body_state(record.body_handle);
            let spawn = EntitySpawn {
                net_entity_id: record.net_entity_id.clone(),
                template_id: record.template_id.clone(),
                transform: SpawnTransform {
                    position: state.as_ref().map_or(Vec2::ZERO, |s| s.position),
                    angle: state.as_ref().map_or(0.0, |s| s.angle),
                    scale: Vec2::ONE,
                },
                initial_velocity: state.as_ref().map(|s| s.linear_velocity),
                owner_peer_id: record.owner_peer_id.clone(),
            };
            if let Err(err) = self
                .transport
                .send(NetworkMessage::new(Payload::EntitySpawn(spawn)), peer_id)
            {
                log::debug!("Could not replay entity to {}: {}", peer_id, err);
            }
        }

        self.sync.request_resync();
    }

    fn handle_message(&mut self, from: PeerId, message: NetworkMessage) {
        let kind = message.message_type();
        match message.payload {
            Payload::HandshakeResponse {
                accepted: true,
                assigned_peer_id,
                host_name,
                game_state,
                ..
            } if self.role == SessionRole::Client => {
                log::info!("Joined {} as {}", host_name, assigned_peer_id);
                self.sync.set_game_state(game_state);
                self.host_name = Some(host_name.clone());
                self.events.push_back(SessionEvent::Joined {
                    host_name,
                    peer_id: assigned_peer_id,
                });
            }
            Payload::StateSnapshot(snapshot) if self.role == SessionRole::Client => {
                self.sync.receive_snapshot(&snapshot);
            }
            Payload::StateDelta(delta) if self.role == SessionRole::Client => {
                self.sync.receive_delta(&delta);
            }
            Payload::InputEvent {
                tick_id, inputs, ..
            } if self.role == SessionRole::Host => {
                self.sync.receive_input(&from, tick_id, inputs);
            }
            Payload::EntitySpawn(spawn) if self.role == SessionRole::Client => {
                self.events.push_back(SessionEvent::EntitySpawned(spawn));
            }
            Payload::EntityDespawn {
                net_entity_id,
                reason,
            } if self.role == SessionRole::Client => {
                let record = self.registry.unregister(&net_entity_id);
                self.events.push_back(SessionEvent::EntityDespawned {
                    net_entity_id,
                    record,
                    reason,
                });
            }
            Payload::GameEvent { event_name, data } => {
                self.events.push_back(SessionEvent::GameEvent {
                    from,
                    name: event_name,
                    data,
                });
            }
            Payload::GameStart if self.role == SessionRole::Client => {
                self.sync.game_state_mut().phase = GamePhase::Playing;
                self.events.push_back(SessionEvent::GameStarted);
            }
            Payload::GamePause if self.role == SessionRole::Client => {
                self.sync.game_state_mut().phase = GamePhase::Paused;
                self.events.push_back(SessionEvent::GamePaused);
            }
            Payload::GameResume if self.role == SessionRole::Client => {
                self.sync.game_state_mut().phase = GamePhase::Playing;
                self.events.push_back(SessionEvent::GameResumed);
            }
            Payload::GameEnd { outcome } if self.role == SessionRole::Client => {
                if let Some(phase) = outcome {
                    self.sync.game_state_mut().phase = phase;
                }
                self.events.push_back(SessionEvent::GameEnded { outcome });
            }
            _ => log::debug!("Ignoring {} from {} as {:?}", kind.as_str(), from, self.role),
        }
    }

    fn require_host(&self) -> Result<(), SessionError> {
        if self.role != SessionRole::Host {
            return Err(SessionError::RoleMismatch {
                expected: SessionRole::Host,
            });
        }
        if !self.is_active() {
            return Err(SessionError::NotActive);
        }
        Ok(())
    }

    fn broadcast(&mut self, payload: Payload) -> Result<(), SessionError> {
        self.transport.broadcast(NetworkMessage::new(payload))?;
        Ok(())
    }

    /// Registers a host-side entity and announces it to every peer.
    pub fn spawn_entity(
        &mut self,
        local_entity_id: impl Into<String>,
        body_handle: BodyHandle,
        template_id: impl Into<String>,
        transform: SpawnTransform,
        initial_velocity: Option<Vec2>,
        owner_peer_id: Option<PeerId>,
    ) -> Result<NetEntityId, SessionError> {
        self.require_host()?;
        let template_id = template_id.into();
        let net_entity_id = self.registry.register(
            local_entity_id,
            body_handle,
            template_id.clone(),
            owner_peer_id.clone(),
            None,
        );

        let announced = self.broadcast(Payload::EntitySpawn(EntitySpawn {
            net_entity_id: net_entity_id.clone(),
            template_id: template_id.clone(),
            transform,
            initial_velocity,
            owner_peer_id,
        }));
        if let Err(err) = announced {
            // Never announced, so later peers must not see it either.
            self.registry.unregister(&net_entity_id);
            return Err(err);
        }
        log::debug!("Spawned {} ({})", net_entity_id, template_id);
        Ok(net_entity_id)
    }

    /// Unregisters a host-side entity and tells peers to remove it. Returns
    /// `false` if the id was not registered.
    pub fn despawn_entity(
        &mut self,
        net_entity_id: &str,
        reason: Option<DespawnReason>,
    ) -> Result<bool, SessionError> {
        self.require_host()?;
        if self.registry.unregister(net_entity_id).is_none() {
            return Ok(false);
        }
        self.broadcast(Payload::EntityDespawn {
            net_entity_id: net_entity_id.to_string(),
            reason,
        })?;
        Ok(true)
    }

    /// Client side: binds a body created for a host spawn under the host's id.
    pub fn bind_remote_entity(
        &mut self,
        local_entity_id: impl Into<String>,
        body_handle: BodyHandle,
        spawn: &EntitySpawn,
    ) -> NetEntityId {
        self.registry.register(
            local_entity_id,
            body_handle,
            spawn.template_id.clone(),
            spawn.owner_peer_id.clone(),
            Some(spawn.net_entity_id.clone()),
        )
    }

    pub fn set_game_state(&mut self, state: GameSyncState) -> Result<(), SessionError> {
        if self.role != SessionRole::Host {
            return Err(SessionError::RoleMismatch {
                expected: SessionRole::Host,
            });
        }
        self.sync.set_game_state(state);
        Ok(())
    }

    pub fn game_state(&self) -> &GameSyncState {
        self.sync.game_state()
    }

    pub fn start_game(&mut self) -> Result<(), SessionError> {
        self.require_host()?;
        self.sync.game_state_mut().phase = GamePhase::Playing;
        self.broadcast(Payload::GameStart)
    }

    pub fn pause_game(&mut self) -> Result<(), SessionError> {
        self.require_host()?;
        self.sync.game_state_mut().phase = GamePhase::Paused;
        self.broadcast(Payload::GamePause)
    }

    pub fn resume_game(&mut self) -> Result<(), SessionError> {
        self.require_host()?;
        self.sync.game_state_mut().phase = GamePhase::Playing;
        self.broadcast(Payload::GameResume)
    }

    pub fn end_game(&mut self, outcome: Option<GamePhase>) -> Result<(), SessionError> {
        self.require_host()?;
        if let Some(phase) = outcome {
            self.sync.game_state_mut().phase = phase;
        }
        self.broadcast(Payload::GameEnd { outcome })
    }

    /// Named event for every other member. From a client it reaches the host.
    pub fn send_game_event(
        &mut self,
        name: impl Into<String>,
        data: BTreeMap<String, String>,
    ) -> Result<(), SessionError> {
        if !self.is_active() {
            return Err(SessionError::NotActive);
        }
        self.broadcast(Payload::GameEvent {
            event_name: name.into(),
            data,
        })
    }

    pub fn disconnect(&mut self) {
        log::info!("Leaving session {}", self.config.game_id);
        self.transport.disconnect();
        self.sync.reset();
        self.registry.clear();
        let events: Vec<TransportEvent> = self.transport.drain_events().collect();
        for event in events {
            self.handle_transport_event(event);
        }
    }

    pub fn drain_events(&mut self) -> Drain<'_, SessionEvent> {
        self.events.drain(..)
    }

    pub fn is_active(&self) -> bool {
        self.transport.state().is_active()
    }

    pub fn state(&self) -> ConnectionState {
        self.transport.state()
    }

    pub fn role(&self) -> SessionRole {
        self.role
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn local_peer_id(&self) -> &PeerId {
        self.transport.local_peer_id()
    }

    pub fn host_name(&self) -> Option<&str> {
        self.host_name.as_deref()
    }

    pub fn peers(&self) -> Vec<PeerId> {
        self.transport.connected_peers()
    }

    pub fn latency(&self, peer_id: &str) -> f32 {
        self.transport.latency(peer_id)
    }

    /// Room code on the relay, session id on the radio.
    pub fn room_code(&self) -> Option<&str> {
        self.transport.session_code()
    }

    pub fn stats(&self) -> NetworkStats {
        self.transport.stats()
    }

    pub fn registry(&self) -> &NetEntityRegistry {
        &self.registry
    }

    pub fn synchronizer(&self) -> &Synchronizer {
        &self.sync
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    pub fn adapter_mut(&mut self) -> &mut A {
        &mut self.adapter
    }

    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }
}

impl<A: SimulationAdapter> Drop for GameSession<A> {
    fn drop(&mut self) {
        self.transport.destroy();
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;
    use crate::net::BodyState;
    use crate::sync::DynamicBody;
    use crate::transport::{LoopbackAir, MemorySocket};

    /// Hosting transport whose sends fail while jammed.
    struct Jammed {
        jammed: Rc<Cell<bool>>,
        peer_id: PeerId,
        events: VecDeque<TransportEvent>,
    }

    impl Jammed {
        fn new(jammed: &Rc<Cell<bool>>) -> Box<dyn Transport> {
            Box::new(Self {
                jammed: Rc::clone(jammed),
                peer_id: "host".into(),
                events: VecDeque::new(),
            })
        }
    }

    impl Transport for Jammed {
        fn kind(&self) -> TransportKind {
            TransportKind::Relay
        }
        fn initialize(&mut self) -> Result<(), TransportError> {
            Ok(())
        }
        fn start_hosting(&mut self, _: &TransportConfig) -> Result<(), TransportError> {
            Ok(())
        }
        fn join_session(&mut self, _: &TransportConfig) -> Result<(), TransportError> {
            Ok(())
        }
        fn send(&mut self, message: NetworkMessage, _: &str) -> Result<(), TransportError> {
            self.broadcast(message)
        }
        fn broadcast(&mut self, _: NetworkMessage) -> Result<(), TransportError> {
            if self.jammed.get() {
                return Err(TransportError::Socket("jammed".into()));
            }
            Ok(())
        }
        fn poll(&mut self, _: Instant) {}
        fn drain_events(&mut self) -> Drain<'_, TransportEvent> {
            self.events.drain(..)
        }
        fn disconnect(&mut self) {}
        fn destroy(&mut self) {}
        fn state(&self) -> ConnectionState {
            ConnectionState::Advertising
        }
        fn role(&self) -> Option<SessionRole> {
            Some(SessionRole::Host)
        }
        fn local_peer_id(&self) -> &PeerId {
            &self.peer_id
        }
        fn connected_peers(&self) -> Vec<PeerId> {
            Vec::new()
        }
        fn latency(&self, _: &str) -> f32 {
            0.0
        }
        fn stats(&self) -> NetworkStats {
            NetworkStats::default()
        }
    }

    fn jammed_host(jammed: &Rc<Cell<bool>>) -> GameSession<Still> {
        let config = SessionConfig::relay("Host", "pong", "ws://relay.test");
        GameSession::host(config, Jammed::new(jammed), Still::default()).unwrap()
    }

    fn errors(session: &mut GameSession<Still>) -> usize {
        session
            .drain_events()
            .filter(|e| matches!(e, SessionEvent::Error(_)))
            .count()
    }

    #[derive(Default)]
    struct Still {
        tick: u32,
    }

    impl SimulationAdapter for Still {
        fn dynamic_bodies(&self) -> Vec<DynamicBody> {
            Vec::new()
        }
        fn body_state(&self, _: BodyHandle) -> Option<BodyState> {
            None
        }
        fn set_body_state(&mut self, _: BodyHandle, _: &BodyState) {}
        fn apply_input(&mut self, _: &str, _: &PlayerInput) {}
        fn step(&mut self, _: f32) {}
        fn tick_id(&self) -> u32 {
            self.tick
        }
        fn increment_tick_id(&mut self) {
            self.tick += 1;
        }
    }

    #[test]
    fn test_relay_session_requires_url() {
        let mut config = SessionConfig::relay("Host", "pong", "ws://localhost:1");
        config.relay_url = None;
        assert!(matches!(
            config.relay_transport(MemorySocket::new()),
            Err(SessionError::MissingRelayUrl)
        ));

        let transport: Box<dyn Transport> = Box::new(RelayTransport::new(
            MemorySocket::new(),
            RelayConfig::default(),
        ));
        assert!(matches!(
            GameSession::host(config, transport, Still::default()),
            Err(SessionError::MissingRelayUrl)
        ));
    }

    #[test]
    fn test_transport_kind_must_match() {
        let air = LoopbackAir::new();
        let config = SessionConfig::relay("Host", "pong", "ws://localhost:1");
        let transport = config.radio_transport(air.radio());

        let err = GameSession::host(config, transport, Still::default())
            .err()
            .unwrap();
        assert!(matches!(
            err,
            SessionError::TransportMismatch {
                expected: TransportKind::Relay,
                actual: TransportKind::Radio,
            }
        ));
    }

    #[test]
    fn test_host_is_live_while_advertising() {
        let air = LoopbackAir::new();
        let config = SessionConfig::radio("Host", "pong").with_session("s1");
        let transport = config.radio_transport(air.radio());
        let mut host = GameSession::host(config, transport, Still::default()).unwrap();

        assert_eq!(host.state(), ConnectionState::Advertising);
        assert_eq!(host.room_code(), Some("s1"));
        assert_eq!(host.host_name(), Some("Host"));

        let sent = host.update(None);
        assert!(matches!(sent, Some(Broadcast::Snapshot { tick_id: 1 })));
        assert_eq!(host.adapter().tick, 1);
        host.start_game().unwrap();
        assert_eq!(host.game_state().phase, GamePhase::Playing);
    }

    #[test]
    fn test_client_cannot_use_host_operations() {
        let air = LoopbackAir::new();
        let config = SessionConfig::radio("Guest", "pong");
        let transport = config.radio_transport(air.radio());
        let mut client = GameSession::join(config, transport, Still::default()).unwrap();

        assert_eq!(client.state(), ConnectionState::Scanning);
        assert!(matches!(
            client.start_game(),
            Err(SessionError::RoleMismatch {
                expected: SessionRole::Host
            })
        ));
        assert!(matches!(
            client.spawn_entity(
                "ball",
                BodyHandle(0),
                "ball",
                SpawnTransform::default(),
                None,
                None
            ),
            Err(SessionError::RoleMismatch { .. })
        ));
        // Scanning clients never tick.
        assert_eq!(client.update(None), None);
        assert_eq!(client.adapter().tick, 0);
    }

    #[test]
    fn test_disconnect_clears_session_state() {
        let air = LoopbackAir::new();
        let config = SessionConfig::radio("Host", "pong");
        let transport = config.radio_transport(air.radio());
        let mut host = GameSession::host(config, transport, Still::default()).unwrap();

        host.spawn_entity(
            "ball",
            BodyHandle(1),
            "ball",
            SpawnTransform::default(),
            None,
            None,
        )
        .unwrap();
        assert_eq!(host.registry().len(), 1);

        host.disconnect();
        assert_eq!(host.state(), ConnectionState::Disconnected);
        assert!(host.registry().is_empty());
        assert!(matches!(host.start_game(), Err(SessionError::NotActive)));
        assert!(
            host.drain_events()
                .any(|e| e == SessionEvent::StateChanged(ConnectionState::Disconnected))
        );
    }

    #[test]
    fn test_failed_sync_send_is_reported_once() {
        let jammed = Rc::new(Cell::new(true));
        let mut host = jammed_host(&jammed);

        for _ in 0..10 {
            assert_eq!(host.update(None), None);
        }
        assert_eq!(errors(&mut host), 1);

        jammed.set(false);
        assert!(matches!(host.update(None), Some(Broadcast::Snapshot { .. })));
        assert_eq!(errors(&mut host), 0);

        // A fresh failure after a success is reported again.
        jammed.set(true);
        host.sync.request_resync();
        host.update(None);
        host.update(None);
        assert_eq!(errors(&mut host), 1);
    }

    #[test]
    fn test_unannounced_spawn_is_not_registered() {
        let jammed = Rc::new(Cell::new(true));
        let mut host = jammed_host(&jammed);

        let spawned = host.spawn_entity(
            "ball",
            BodyHandle(0),
            "ball",
            SpawnTransform::default(),
            None,
            None,
        );
        assert!(matches!(
            spawned,
            Err(SessionError::Transport(TransportError::Socket(_)))
        ));
        assert!(host.registry().is_empty());
        assert!(host.registry().get_by_body(BodyHandle(0)).is_none());

        jammed.set(false);
        let net_id = host
            .spawn_entity(
                "ball",
                BodyHandle(0),
                "ball",
                SpawnTransform::default(),
                None,
                None,
            )
            .unwrap();
        assert_eq!(host.registry().len(), 1);
        assert_eq!(
            host.registry().get_by_local_entity_id("ball").unwrap().net_entity_id,
            net_id
        );
    }
}
