mod room;
mod socket;

use std::collections::VecDeque;
use std::collections::vec_deque::Drain;
use std::time::{Duration, Instant};

pub use room::{RoomEvent, RoomPeer, RoomRequest};
pub use socket::{MemorySocket, RelaySocket, SocketEvent, WsSocket};

use super::{Transport, TransportConfig, TransportError, TransportEvent, TransportKind};
use crate::net::{
    ConnectionState, NetworkMessage, NetworkStats, Payload, PeerId, PeerInfo, PeerTable,
    PingSchedule, SessionRole, generate_peer_id,
};

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub url: String,
    pub ping_interval: Duration,
    pub connect_timeout: Duration,
    /// Attempt `n` waits `n * reconnect_delay`.
    pub reconnect_delay: Duration,
    pub max_reconnect_attempts: u32,
}

impl RelayConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8787".to_string(),
            ping_interval: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(10),
            reconnect_delay: Duration::from_secs(1),
            max_reconnect_attempts: 5,
        }
    }
}

/// Transport through a rendezvous server that relays JSON frames between the
/// members of a room.
pub struct RelayTransport<S: RelaySocket> {
    socket: S,
    config: RelayConfig,
    session: Option<TransportConfig>,
    state: ConnectionState,
    role: Option<SessionRole>,
    local_peer_id: PeerId,
    initialized: bool,
    peers: PeerTable,
    room_id: Option<String>,
    /// Sent as soon as the socket opens.
    opening_request: Option<RoomRequest>,
    open_deadline: Option<Instant>,
    reconnect_attempts: u32,
    reconnect_at: Option<Instant>,
    ping: PingSchedule,
    sequence: u32,
    stats: NetworkStats,
    events: VecDeque<TransportEvent>,
}

impl<S: RelaySocket> RelayTransport<S> {
    pub fn new(socket: S, config: RelayConfig) -> Self {
        let ping = PingSchedule::new(config.ping_interval);
        Self {
            socket,
            config,
            session: None,
            state: ConnectionState::Disconnected,
            role: None,
            local_peer_id: generate_peer_id("ws"),
            initialized: false,
            peers: PeerTable::new(),
            room_id: None,
            opening_request: None,
            open_deadline: None,
            reconnect_attempts: 0,
            reconnect_at: None,
            ping,
            sequence: 0,
            stats: NetworkStats::default(),
            events: VecDeque::new(),
        }
    }

    pub fn room_code(&self) -> Option<&str> {
        self.room_id.as_deref()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            log::info!("Relay state {} -> {}", self.state, state);
            self.state = state;
            self.events.push_back(TransportEvent::StateChanged(state));
        }
    }

    fn fail(&mut self, error: TransportError) {
        log::warn!("Relay session failed: {}", error);
        self.teardown();
        self.events.push_back(TransportEvent::Error(error));
        self.set_state(ConnectionState::Disconnected);
    }

    fn ensure_idle(&self) -> Result<(), TransportError> {
        if !self.initialized {
            return Err(TransportError::NotInitialized);
        }
        if self.state.is_active() {
            return Err(TransportError::AlreadyActive(self.state));
        }
        Ok(())
    }

    fn open_socket(&mut self, request: RoomRequest, now: Instant) -> Result<(), TransportError> {
        self.opening_request = Some(request);
        self.open_deadline = Some(now + self.config.connect_timeout);
        self.socket.open(&self.config.url)
    }

    fn send_request(&mut self, request: &RoomRequest) -> Result<usize, TransportError> {
        let text = request
            .to_json()
            .map_err(|err| TransportError::Codec(err.to_string()))?;
        let len = text.len();
        self.socket.send_text(text)?;
        Ok(len)
    }

    fn stamp(&mut self, message: &mut NetworkMessage) {
        message.header.sender_id = self.local_peer_id.clone();
        message.header.sequence = self.sequence;
        self.sequence = self.sequence.wrapping_add(1);
    }

    fn handle_socket_event(&mut self, event: SocketEvent, now: Instant) {
        match event {
            SocketEvent::Opened => {
                self.open_deadline = None;
                self.ping.start(now);
                if let Some(request) = self.opening_request.take() {
                    if let Err(err) = self.send_request(&request) {
                        log::warn!("Could not send room request: {}", err);
                    }
                }
            }
            SocketEvent::Text(text) => match RoomEvent::from_json(&text) {
                Ok(event) => self.handle_room_event(event, text.len(), now),
                Err(err) => log::debug!("Ignoring malformed relay frame: {}", err),
            },
            SocketEvent::Closed { reason } => self.on_socket_lost(reason, now),
            SocketEvent::Failed { reason } => self.on_open_failed(reason, now),
        }
    }

    fn on_socket_lost(&mut self, reason: String, now: Instant) {
        match self.state {
            ConnectionState::Connected | ConnectionState::Reconnecting => {
                self.schedule_reconnect(reason, now)
            }
            ConnectionState::Disconnected | ConnectionState::Error => {}
            _ => self.fail(TransportError::ConnectionLost(reason)),
        }
    }

    fn on_open_failed(&mut self, reason: String, now: Instant) {
        self.open_deadline = None;
        if self.state == ConnectionState::Reconnecting {
            self.schedule_reconnect(reason, now);
        } else if self.state.is_active() {
            self.fail(TransportError::Socket(reason));
        }
    }

    fn schedule_reconnect(&mut self, reason: String, now: Instant) {
        self.ping.stop();
        self.socket.close();

        if self.reconnect_attempts >= self.config.max_reconnect_attempts {
            log::error!(
                "Giving up on relay after {} reconnect attempts",
                self.reconnect_attempts
            );
            self.fail(TransportError::ConnectionLost(reason));
            return;
        }

        self.reconnect_attempts += 1;
        let delay = self.config.reconnect_delay * self.reconnect_attempts;
        log::warn!(
            "Relay connection lost ({}), attempt {}/{} in {:?}",
            reason,
            self.reconnect_attempts,
            self.config.max_reconnect_attempts,
            delay
        );
        self.reconnect_at = Some(now + delay);
        self.set_state(ConnectionState::Reconnecting);
    }

    fn attempt_reconnect(&mut self, now: Instant) {
        let Some(session) = self.session.clone() else {
            return;
        };
        let Some(room_id) = self.room_id.clone() else {
            self.fail(TransportError::ConnectionLost("no room to rejoin".into()));
            return;
        };

        let request = RoomRequest::RejoinRoom {
            room_id,
            device_name: session.device_name,
            peer_id: self.local_peer_id.clone(),
        };
        if let Err(err) = self.open_socket(request, now) {
            self.on_open_failed(err.to_string(), now);
        }
    }

    fn handle_room_event(&mut self, event: RoomEvent, frame_len: usize, now: Instant) {
        match event {
            RoomEvent::RoomCreated { room_id } => {
                log::info!("Room {} created", room_id);
                self.room_id = Some(room_id);
                self.reconnect_attempts = 0;
                self.set_state(ConnectionState::Advertising);
            }
            RoomEvent::RoomJoined { room_id, peers } => {
                log::info!("Joined room {} with {} peer(s)", room_id, peers.len());
                self.room_id = Some(room_id);
                self.reconnect_attempts = 0;
                self.sync_room_peers(peers, now);

                let state = if self.role == Some(SessionRole::Host) && self.peers.is_empty() {
                    ConnectionState::Advertising
                } else {
                    ConnectionState::Connected
                };
                self.set_state(state);
            }
            RoomEvent::PeerJoined { peer_id, peer_name } => {
                self.add_peer(peer_id, peer_name, now);
                if self.state == ConnectionState::Advertising {
                    self.set_state(ConnectionState::Connected);
                }
            }
            RoomEvent::PeerLeft { peer_id } => {
                if self.peers.remove(&peer_id).is_some() {
                    log::info!("Peer {} left the room", peer_id);
                    self.events.push_back(TransportEvent::PeerDisconnected {
                        peer_id,
                        reason: "left".into(),
                    });
                }
                if self.role == Some(SessionRole::Host)
                    && self.peers.is_empty()
                    && self.state == ConnectionState::Connected
                {
                    self.set_state(ConnectionState::Advertising);
                }
            }
            RoomEvent::Relay { peer_id, message } | RoomEvent::Broadcast { peer_id, message } => {
                self.stats.record_received(frame_len);
                self.on_game_message(peer_id, message, now);
            }
            RoomEvent::Error { error } => {
                if self.state == ConnectionState::Connecting {
                    self.fail(TransportError::Server(error));
                } else {
                    log::warn!("Relay server error: {}", error);
                    self.events
                        .push_back(TransportEvent::Error(TransportError::Server(error)));
                }
            }
        }
    }

    fn add_peer(&mut self, peer_id: PeerId, name: String, now: Instant) {
        if peer_id == self.local_peer_id {
            return;
        }
        if self
            .peers
            .insert(PeerInfo::new(peer_id.clone(), name.clone(), None, now))
        {
            log::info!("Peer {} ({}) joined", name, peer_id);
            self.events
                .push_back(TransportEvent::PeerConnected { peer_id, name });
        }
    }

    /// Reconciles the peer table with a room listing, e.g. after a rejoin.
    fn sync_room_peers(&mut self, peers: Vec<RoomPeer>, now: Instant) {
        let listed: Vec<&PeerId> = peers.iter().map(|p| &p.peer_id).collect();
        for known in self.peers.ids() {
            if !listed.contains(&&known) {
                self.peers.remove(&known);
                self.events.push_back(TransportEvent::PeerDisconnected {
                    peer_id: known,
                    reason: "left".into(),
                });
            }
        }
        for peer in peers {
            self.add_peer(peer.peer_id, peer.name, now);
        }
    }

    fn on_game_message(&mut self, from: PeerId, message: NetworkMessage, now: Instant) {
        self.peers.touch(&from, now);

        match message.payload {
            Payload::Ping => {
                let mut pong = NetworkMessage::new(Payload::Pong);
                pong.header.timestamp = message.header.timestamp;
                if let Err(err) = self.send(pong, &from) {
                    log::debug!("Could not answer ping from {}: {}", from, err);
                }
            }
            Payload::Pong => {
                if let Some(peer) = self.peers.get_mut(&from) {
                    peer.ping.pong_received(now);
                }
            }
            _ => self
                .events
                .push_back(TransportEvent::MessageReceived { from, message }),
        }
    }

    fn check_timers(&mut self, now: Instant) {
        if self.open_deadline.is_some_and(|deadline| now >= deadline) {
            self.open_deadline = None;
            self.socket.close();
            if self.state == ConnectionState::Reconnecting {
                self.schedule_reconnect("connection timeout".into(), now);
            } else {
                self.fail(TransportError::ConnectTimeout);
            }
            return;
        }

        if self.reconnect_at.is_some_and(|at| now >= at) {
            self.reconnect_at = None;
            self.attempt_reconnect(now);
            return;
        }

        if self.ping.due(now) {
            for peer_id in self.peers.ids() {
                if let Some(peer) = self.peers.get_mut(&peer_id) {
                    peer.ping.ping_sent(now);
                }
                if let Err(err) = self.send(NetworkMessage::new(Payload::Ping), &peer_id) {
                    log::debug!("Ping to {} failed: {}", peer_id, err);
                }
            }
        }
    }

    fn teardown(&mut self) {
        self.ping.stop();
        self.socket.close();
        self.peers.drain();
        self.opening_request = None;
        self.open_deadline = None;
        self.reconnect_at = None;
        self.reconnect_attempts = 0;
        self.room_id = None;
        self.role = None;
    }
}

impl<S: RelaySocket> Transport for RelayTransport<S> {
    fn kind(&self) -> TransportKind {
        TransportKind::Relay
    }

    fn initialize(&mut self) -> Result<(), TransportError> {
        self.initialized = true;
        self.set_state(ConnectionState::Disconnected);
        Ok(())
    }

    fn start_hosting(&mut self, config: &TransportConfig) -> Result<(), TransportError> {
        self.ensure_idle()?;

        self.session = Some(config.clone());
        self.role = Some(SessionRole::Host);
        self.set_state(ConnectionState::Connecting);

        let request = RoomRequest::CreateRoom {
            game_id: config.game_id.clone(),
            device_name: config.device_name.clone(),
            peer_id: self.local_peer_id.clone(),
        };
        if let Err(err) = self.open_socket(request, Instant::now()) {
            self.fail(err.clone());
            return Err(err);
        }
        Ok(())
    }

    fn join_session(&mut self, config: &TransportConfig) -> Result<(), TransportError> {
        self.ensure_idle()?;
        let room_id = config
            .session_id
            .clone()
            .ok_or(TransportError::MissingSessionId)?;

        self.session = Some(config.clone());
        self.role = Some(SessionRole::Client);
        self.set_state(ConnectionState::Connecting);

        let request = RoomRequest::JoinRoom {
            room_id,
            device_name: config.device_name.clone(),
            peer_id: self.local_peer_id.clone(),
        };
        if let Err(err) = self.open_socket(request, Instant::now()) {
            self.fail(err.clone());
            return Err(err);
        }
        Ok(())
    }

    fn send(&mut self, mut message: NetworkMessage, peer_id: &str) -> Result<(), TransportError> {
        if !self.socket.is_open() {
            return Err(TransportError::NotConnected);
        }
        if !self.peers.contains(peer_id) {
            log::warn!("Cannot send to unknown peer {}", peer_id);
            return Ok(());
        }

        self.stamp(&mut message);
        let len = self.send_request(&RoomRequest::Relay {
            to_peer_id: peer_id.to_string(),
            message,
        })?;
        self.stats.record_sent(len);
        Ok(())
    }

    fn broadcast(&mut self, mut message: NetworkMessage) -> Result<(), TransportError> {
        if !self.socket.is_open() {
            return Err(TransportError::NotConnected);
        }

        self.stamp(&mut message);
        let len = self.send_request(&RoomRequest::Broadcast { message })?;
        self.stats.record_sent(len);
        Ok(())
    }

    fn poll(&mut self, now: Instant) {
        while let Some(event) = self.socket.poll_event() {
            self.handle_socket_event(event, now);
        }
        self.check_timers(now);
    }

    fn drain_events(&mut self) -> Drain<'_, TransportEvent> {
        self.events.drain(..)
    }

    fn disconnect(&mut self) {
        if self.socket.is_open() {
            if let Err(err) = self.send_request(&RoomRequest::LeaveRoom) {
                log::debug!("Could not send leave_room: {}", err);
            }
        }
        self.teardown();
        self.session = None;
        self.set_state(ConnectionState::Disconnected);
    }

    fn destroy(&mut self) {
        self.disconnect();
        self.initialized = false;
    }

    fn state(&self) -> ConnectionState {
        self.state
    }

    fn role(&self) -> Option<SessionRole> {
        self.role
    }

    fn local_peer_id(&self) -> &PeerId {
        &self.local_peer_id
    }

    fn connected_peers(&self) -> Vec<PeerId> {
        self.peers.ids()
    }

    fn latency(&self, peer_id: &str) -> f32 {
        self.peers.latency_ms(peer_id)
    }

    fn stats(&self) -> NetworkStats {
        self.stats
    }

    fn session_code(&self) -> Option<&str> {
        self.room_code()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport() -> (RelayTransport<MemorySocket>, MemorySocket) {
        let socket = MemorySocket::new();
        let mut transport = RelayTransport::new(socket.clone(), RelayConfig::new("ws://relay.test"));
        transport.initialize().unwrap();
        (transport, socket)
    }

    fn sent_requests(socket: &MemorySocket) -> Vec<RoomRequest> {
        socket
            .take_sent()
            .iter()
            .map(|text| RoomRequest::from_json(text).unwrap())
            .collect()
    }

    fn push(socket: &MemorySocket, event: RoomEvent) {
        socket.push_text(event.to_json().unwrap());
    }

    #[test]
    fn test_join_requires_room_code() {
        let (mut transport, _) = transport();
        assert_eq!(
            transport.join_session(&TransportConfig::new("Guest", "pong")),
            Err(TransportError::MissingSessionId)
        );
        assert_eq!(transport.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_host_creates_room_and_advertises() {
        let (mut transport, socket) = transport();
        transport
            .start_hosting(&TransportConfig::new("Host", "pong"))
            .unwrap();
        assert_eq!(transport.state(), ConnectionState::Connecting);

        let now = Instant::now();
        transport.poll(now);
        assert!(matches!(
            sent_requests(&socket).as_slice(),
            [RoomRequest::CreateRoom { game_id, .. }] if game_id == "pong"
        ));

        push(&socket, RoomEvent::RoomCreated { room_id: "K7P2QX".into() });
        transport.poll(now);
        assert_eq!(transport.state(), ConnectionState::Advertising);
        assert_eq!(transport.session_code(), Some("K7P2QX"));

        push(
            &socket,
            RoomEvent::PeerJoined {
                peer_id: "ws-guest".into(),
                peer_name: "Guest".into(),
            },
        );
        transport.poll(now);
        assert_eq!(transport.state(), ConnectionState::Connected);
        assert_eq!(transport.connected_peers(), vec!["ws-guest".to_string()]);

        push(&socket, RoomEvent::PeerLeft { peer_id: "ws-guest".into() });
        transport.poll(now);
        assert_eq!(transport.state(), ConnectionState::Advertising);
    }

    #[test]
    fn test_relayed_messages_surface_with_sender() {
        let (mut transport, socket) = transport();
        transport
            .join_session(&TransportConfig::new("Guest", "pong").with_session("ROOM01"))
            .unwrap();
        let now = Instant::now();
        transport.poll(now);
        push(
            &socket,
            RoomEvent::RoomJoined {
                room_id: "ROOM01".into(),
                peers: vec![RoomPeer {
                    peer_id: "ws-host".into(),
                    name: "Host".into(),
                }],
            },
        );
        transport.poll(now);
        transport.drain_events().for_each(drop);

        let mut message = NetworkMessage::new(Payload::GameStart);
        message.header.sender_id = "ws-host".into();
        push(
            &socket,
            RoomEvent::Broadcast {
                peer_id: "ws-host".into(),
                message: message.clone(),
            },
        );
        transport.poll(now);

        let events: Vec<_> = transport.drain_events().collect();
        assert_eq!(
            events,
            vec![TransportEvent::MessageReceived {
                from: "ws-host".into(),
                message,
            }]
        );
    }

    #[test]
    fn test_ping_is_answered_with_pong() {
        let (mut transport, socket) = transport();
        transport
            .join_session(&TransportConfig::new("Guest", "pong").with_session("ROOM01"))
            .unwrap();
        let now = Instant::now();
        transport.poll(now);
        push(
            &socket,
            RoomEvent::RoomJoined {
                room_id: "ROOM01".into(),
                peers: vec![RoomPeer {
                    peer_id: "ws-host".into(),
                    name: "Host".into(),
                }],
            },
        );
        transport.poll(now);
        socket.take_sent();

        push(
            &socket,
            RoomEvent::Relay {
                peer_id: "ws-host".into(),
                message: NetworkMessage::new(Payload::Ping),
            },
        );
        transport.poll(now);

        match sent_requests(&socket).as_slice() {
            [RoomRequest::Relay { to_peer_id, message }] => {
                assert_eq!(to_peer_id, "ws-host");
                assert_eq!(message.payload, Payload::Pong);
            }
            other => panic!("unexpected requests {other:?}"),
        }
    }

    #[test]
    fn test_server_error_while_joining_is_terminal() {
        let (mut transport, socket) = transport();
        transport
            .join_session(&TransportConfig::new("Guest", "pong").with_session("NOPE"))
            .unwrap();
        transport.poll(Instant::now());
        push(&socket, RoomEvent::Error { error: "Room not found".into() });
        transport.poll(Instant::now());

        assert_eq!(transport.state(), ConnectionState::Disconnected);
        assert!(transport
            .drain_events()
            .any(|e| e == TransportEvent::Error(TransportError::Server("Room not found".into()))));
    }

    #[test]
    fn test_initial_connect_timeout() {
        let (mut transport, socket) = transport();
        socket.stall_opens(true);
        transport
            .start_hosting(&TransportConfig::new("Host", "pong"))
            .unwrap();
        transport.poll(Instant::now() + Duration::from_secs(11));

        assert_eq!(transport.state(), ConnectionState::Disconnected);
        assert!(transport
            .drain_events()
            .any(|e| e == TransportEvent::Error(TransportError::ConnectTimeout)));
    }
}
