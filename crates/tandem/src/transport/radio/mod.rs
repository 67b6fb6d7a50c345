mod link;
mod loopback;

use std::collections::HashMap;
use std::collections::VecDeque;
use std::collections::vec_deque::Drain;
use std::time::{Duration, Instant};

pub use link::{LinkError, LinkEvent, RadioLink, SessionInfo};
pub use loopback::{LOOPBACK_MAX_MTU, LoopbackAir, LoopbackRadio};

use super::{Transport, TransportConfig, TransportError, TransportEvent, TransportKind};
use crate::net::{
    ChunkReassembler, ConnectionState, GameSyncState, NetworkMessage, NetworkStats, Payload,
    PeerId, PeerInfo, PeerTable, PingSchedule, SessionRole, chunk_message, generate_peer_id,
};

#[derive(Debug, Clone)]
pub struct RadioConfig {
    pub scan_duration: Duration,
    pub connect_timeout: Duration,
    pub ping_interval: Duration,
    /// MTU assumed until negotiation completes.
    pub default_mtu: usize,
    /// MTU requested from the remote after connecting.
    pub requested_mtu: usize,
    /// Bytes of each link write reserved by the radio stack.
    pub header_overhead: usize,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            scan_duration: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(10),
            ping_interval: Duration::from_secs(1),
            default_mtu: 23,
            requested_mtu: 512,
            header_overhead: 3,
        }
    }
}

#[derive(Debug)]
struct LinkSlot {
    reassembler: ChunkReassembler,
    mtu: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JoinPhase {
    Connecting,
    NegotiatingMtu,
}

#[derive(Debug)]
struct PendingHost {
    device_id: String,
    info: SessionInfo,
    phase: JoinPhase,
    deadline: Instant,
}

/// Transport over a short-range radio. Messages are encoded with rkyv and
/// split into MTU-sized chunks.
pub struct RadioTransport<L: RadioLink> {
    link: L,
    config: RadioConfig,
    session: Option<TransportConfig>,
    session_info: Option<SessionInfo>,
    state: ConnectionState,
    role: Option<SessionRole>,
    local_peer_id: PeerId,
    initialized: bool,
    peers: PeerTable,
    links: HashMap<String, LinkSlot>,
    pending_host: Option<PendingHost>,
    scan_deadline: Option<Instant>,
    ping: PingSchedule,
    message_id: u8,
    sequence: u32,
    stats: NetworkStats,
    events: VecDeque<TransportEvent>,
}

impl<L: RadioLink> RadioTransport<L> {
    pub fn new(link: L) -> Self {
        Self::with_config(link, RadioConfig::default())
    }

    pub fn with_config(link: L, config: RadioConfig) -> Self {
        let ping = PingSchedule::new(config.ping_interval);
        Self {
            link,
            config,
            session: None,
            session_info: None,
            state: ConnectionState::Disconnected,
            role: None,
            local_peer_id: generate_peer_id("ble"),
            initialized: false,
            peers: PeerTable::new(),
            links: HashMap::new(),
            pending_host: None,
            scan_deadline: None,
            ping,
            message_id: 0,
            sequence: 0,
            stats: NetworkStats::default(),
            events: VecDeque::new(),
        }
    }

    pub fn session_info(&self) -> Option<&SessionInfo> {
        self.session_info.as_ref()
    }

    /// Negotiated MTU for a connected peer.
    pub fn peer_mtu(&self, peer_id: &str) -> Option<usize> {
        let link_id = self.peers.get(peer_id)?.link_id.as_ref()?;
        self.links.get(link_id).map(|slot| slot.mtu)
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            log::info!("Radio state {} -> {}", self.state, state);
            self.state = state;
            self.events.push_back(TransportEvent::StateChanged(state));
        }
    }

    fn fail(&mut self, error: TransportError) {
        log::warn!("Radio session failed: {}", error);
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

    fn slot(&mut self, device_id: &str) -> &mut LinkSlot {
        let default_mtu = self.config.default_mtu;
        self.links
            .entry(device_id.to_string())
            .or_insert_with(|| LinkSlot {
                reassembler: ChunkReassembler::new(),
                mtu: default_mtu,
            })
    }

    fn next_message_id(&mut self) -> u8 {
        let id = self.message_id;
        self.message_id = self.message_id.wrapping_add(1);
        id
    }

    fn write_message(&mut self, device_id: &str, message: &NetworkMessage) -> Result<(), TransportError> {
        let data = message.encode()?;
        let mtu = self.slot(device_id).mtu;
        let chunk_size = mtu.saturating_sub(self.config.header_overhead);
        let message_id = self.next_message_id();
        let chunks = chunk_message(&data, message_id, chunk_size)?;

        for chunk in &chunks {
            self.link.write(device_id, chunk)?;
        }

        self.stats.record_sent(data.len());
        self.stats.chunks_sent += chunks.len() as u64;
        Ok(())
    }

    fn stamp(&mut self, message: &mut NetworkMessage) {
        message.header.sender_id = self.local_peer_id.clone();
        message.header.sequence = self.sequence;
        self.sequence = self.sequence.wrapping_add(1);
    }

    fn handle_link_event(&mut self, event: LinkEvent, now: Instant) {
        match event {
            LinkEvent::DeviceDiscovered { device_id, info } => self.on_discovered(device_id, info, now),
            LinkEvent::Connected { device_id } => {
                let requested = self.config.requested_mtu;
                if let Some(pending) = self.pending_host.as_mut().filter(|p| p.device_id == device_id) {
                    pending.phase = JoinPhase::NegotiatingMtu;
                    self.slot(&device_id);
                    self.link.request_mtu(&device_id, requested);
                }
            }
            LinkEvent::ConnectFailed { device_id, reason } => {
                if self.pending_host.as_ref().is_some_and(|p| p.device_id == device_id) {
                    self.fail(TransportError::Link(LinkError(reason)));
                }
            }
            LinkEvent::CentralConnected { device_id } => {
                if self.role == Some(SessionRole::Host) {
                    log::debug!("Central {} connected, awaiting handshake", device_id);
                    self.slot(&device_id);
                }
            }
            LinkEvent::MtuChanged { device_id, mtu } => {
                self.slot(&device_id).mtu = mtu;
                let ready = self
                    .pending_host
                    .as_ref()
                    .is_some_and(|p| p.device_id == device_id && p.phase == JoinPhase::NegotiatingMtu);
                if ready {
                    self.finish_join(now);
                }
            }
            LinkEvent::Disconnected { device_id } => self.on_link_lost(&device_id),
            LinkEvent::Data { device_id, bytes } => self.on_data(&device_id, &bytes, now),
        }
    }

    fn on_discovered(&mut self, device_id: String, info: SessionInfo, now: Instant) {
        if self.state != ConnectionState::Scanning {
            return;
        }
        let Some(session) = &self.session else {
            return;
        };
        if !info.matches(&session.game_id, session.session_id.as_deref()) {
            log::debug!("Ignoring host {} for game {}", device_id, info.game_id);
            return;
        }

        log::info!("Found host {} ({}), connecting", info.host_name, device_id);
        self.link.stop_scan();
        self.scan_deadline = None;

        if let Err(err) = self.link.connect(&device_id) {
            self.fail(err.into());
            return;
        }

        self.pending_host = Some(PendingHost {
            device_id,
            info,
            phase: JoinPhase::Connecting,
            deadline: now + self.config.connect_timeout,
        });
        self.set_state(ConnectionState::Connecting);
    }

    fn finish_join(&mut self, now: Instant) {
        let Some(pending) = self.pending_host.take() else {
            return;
        };
        let Some(session) = self.session.clone() else {
            return;
        };

        let host = pending.info;
        self.peers.insert(PeerInfo::new(
            host.host_peer_id.clone(),
            host.host_name.clone(),
            Some(pending.device_id.clone()),
            now,
        ));

        let mut handshake = NetworkMessage::new(Payload::HandshakeRequest {
            device_name: session.device_name,
            game_version: session.game_version,
        });
        self.stamp(&mut handshake);
        if let Err(err) = self.write_message(&pending.device_id, &handshake) {
            self.fail(err);
            return;
        }

        self.session_info = Some(host.clone());
        self.ping.start(now);
        self.set_state(ConnectionState::Connected);
        self.events.push_back(TransportEvent::PeerConnected {
            peer_id: host.host_peer_id,
            name: host.host_name,
        });
    }

    fn on_link_lost(&mut self, device_id: &str) {
        self.links.remove(device_id);

        if self.pending_host.as_ref().is_some_and(|p| p.device_id == device_id) {
            self.fail(TransportError::ConnectionLost("host dropped during connect".into()));
            return;
        }

        let Some(peer) = self.peers.remove_by_link(device_id) else {
            return;
        };
        log::info!("Peer {} ({}) disconnected", peer.name, peer.peer_id);
        self.events.push_back(TransportEvent::PeerDisconnected {
            peer_id: peer.peer_id,
            reason: "connection lost".into(),
        });

        match self.role {
            Some(SessionRole::Client) => {
                self.teardown();
                self.set_state(ConnectionState::Disconnected);
            }
            Some(SessionRole::Host) if self.peers.is_empty() => {
                self.set_state(ConnectionState::Advertising);
            }
            _ => {}
        }
    }

    fn on_data(&mut self, device_id: &str, bytes: &[u8], now: Instant) {
        self.stats.chunks_received += 1;
        let Some(data) = self.slot(device_id).reassembler.add_chunk_at(bytes, now) else {
            return;
        };
        self.stats.record_received(data.len());

        match NetworkMessage::decode(&data) {
            Ok(message) => self.on_message(device_id, message, now),
            Err(err) => {
                self.stats.messages_dropped += 1;
                log::debug!("Dropping undecodable message from {}: {}", device_id, err);
            }
        }
    }

    fn on_message(&mut self, device_id: &str, message: NetworkMessage, now: Instant) {
        let Some(peer_id) = self.peers.peer_for_link(device_id).cloned() else {
            self.on_unknown_sender(device_id, message, now);
            return;
        };
        self.peers.touch(&peer_id, now);

        match &message.payload {
            Payload::Ping => {
                let mut pong = NetworkMessage::new(Payload::Pong);
                pong.header.timestamp = message.header.timestamp;
                let _ = self.send(pong, &peer_id);
            }
            Payload::Pong => {
                if let Some(peer) = self.peers.get_mut(&peer_id) {
                    peer.ping.pong_received(now);
                }
            }
            Payload::HandshakeResponse {
                accepted: false,
                reject_reason,
                ..
            } => {
                let reason = reject_reason.clone().unwrap_or_else(|| "rejected".into());
                self.fail(TransportError::HandshakeRejected(reason));
            }
            _ => self.events.push_back(TransportEvent::MessageReceived {
                from: peer_id,
                message,
            }),
        }
    }

    fn on_unknown_sender(&mut self, device_id: &str, message: NetworkMessage, now: Instant) {
        let kind = message.message_type();
        let Payload::HandshakeRequest {
            device_name,
            game_version,
        } = message.payload
        else {
            log::debug!("Dropping {} from unidentified device {}", kind.as_str(), device_id);
            return;
        };
        if self.role != Some(SessionRole::Host) {
            return;
        }

        let expected = self
            .session
            .as_ref()
            .map(|s| s.game_version.clone())
            .unwrap_or_default();
        if game_version != expected {
            log::warn!(
                "Rejecting {} ({}): version {} != {}",
                device_name,
                device_id,
                game_version,
                expected
            );
            let mut response = NetworkMessage::new(Payload::HandshakeResponse {
                accepted: false,
                assigned_peer_id: message.header.sender_id,
                host_name: self.host_name(),
                game_state: GameSyncState::default(),
                reject_reason: Some(format!("version mismatch: host runs {expected}")),
            });
            self.stamp(&mut response);
            if let Err(err) = self.write_message(device_id, &response) {
                log::debug!("Could not deliver rejection to {}: {}", device_id, err);
            }
            self.link.disconnect(device_id);
            self.links.remove(device_id);
            return;
        }

        let peer_id = message.header.sender_id;
        log::info!("Peer {} ({}) joined from {}", device_name, peer_id, device_id);
        self.peers.insert(PeerInfo::new(
            peer_id.clone(),
            device_name.clone(),
            Some(device_id.to_string()),
            now,
        ));
        self.set_state(ConnectionState::Connected);
        self.events.push_back(TransportEvent::PeerConnected {
            peer_id,
            name: device_name,
        });
    }

    fn host_name(&self) -> String {
        self.session
            .as_ref()
            .map(|s| s.device_name.clone())
            .unwrap_or_default()
    }

    fn check_timers(&mut self, now: Instant) {
        if self.scan_deadline.is_some_and(|deadline| now >= deadline) {
            self.scan_deadline = None;
            let game_id = self
                .session
                .as_ref()
                .map(|s| s.game_id.clone())
                .unwrap_or_default();
            self.fail(TransportError::NoHostFound(game_id));
            return;
        }

        if self.pending_host.as_ref().is_some_and(|p| now >= p.deadline) {
            self.fail(TransportError::ConnectTimeout);
            return;
        }

        if self.ping.due(now) {
            for peer_id in self.peers.ids() {
                if let Some(peer) = self.peers.get_mut(&peer_id) {
                    peer.ping.ping_sent(now);
                }
                let _ = self.send(NetworkMessage::new(Payload::Ping), &peer_id);
            }
        }
    }

    /// Releases every link resource and timer. Leaves `state` to the caller.
    fn teardown(&mut self) {
        self.ping.stop();
        self.scan_deadline = None;

        match self.role {
            Some(SessionRole::Host) => self.link.stop_advertising(),
            Some(SessionRole::Client) => self.link.stop_scan(),
            None => {}
        }

        if let Some(pending) = self.pending_host.take() {
            self.link.disconnect(&pending.device_id);
        }
        for peer in self.peers.drain() {
            if let Some(link_id) = peer.link_id {
                self.link.disconnect(&link_id);
            }
        }
        for (device_id, _) in self.links.drain() {
            self.link.disconnect(&device_id);
        }

        self.role = None;
        self.session_info = None;
    }
}

impl<L: RadioLink> Transport for RadioTransport<L> {
    fn kind(&self) -> TransportKind {
        TransportKind::Radio
    }

    fn initialize(&mut self) -> Result<(), TransportError> {
        if !self.link.is_powered_on() {
            return Err(TransportError::RadioUnavailable("radio is powered off".into()));
        }
        self.initialized = true;
        self.set_state(ConnectionState::Disconnected);
        Ok(())
    }

    fn start_hosting(&mut self, config: &TransportConfig) -> Result<(), TransportError> {
        self.ensure_idle()?;

        let info = SessionInfo {
            game_id: config.game_id.clone(),
            session_id: config
                .session_id
                .clone()
                .unwrap_or_else(|| generate_peer_id("session")),
            host_name: config.device_name.clone(),
            host_peer_id: self.local_peer_id.clone(),
        };
        self.link.start_advertising(&info)?;

        log::info!("Advertising session {} for {}", info.session_id, info.game_id);
        self.session = Some(config.clone());
        self.session_info = Some(info);
        self.role = Some(SessionRole::Host);
        self.ping.start(Instant::now());
        self.set_state(ConnectionState::Advertising);
        Ok(())
    }

    fn join_session(&mut self, config: &TransportConfig) -> Result<(), TransportError> {
        self.ensure_idle()?;

        self.session = Some(config.clone());
        self.role = Some(SessionRole::Client);
        self.set_state(ConnectionState::Scanning);
        self.scan_deadline = Some(Instant::now() + self.config.scan_duration);

        if let Err(err) = self.link.start_scan() {
            self.teardown();
            self.set_state(ConnectionState::Disconnected);
            return Err(err.into());
        }
        Ok(())
    }

    fn send(&mut self, mut message: NetworkMessage, peer_id: &str) -> Result<(), TransportError> {
        let Some(link_id) = self.peers.get(peer_id).and_then(|p| p.link_id.clone()) else {
            log::warn!("Cannot send to unknown peer {}", peer_id);
            return Ok(());
        };
        self.stamp(&mut message);
        self.write_message(&link_id, &message)
    }

    fn broadcast(&mut self, message: NetworkMessage) -> Result<(), TransportError> {
        let mut first_error = None;
        for peer_id in self.peers.ids() {
            if let Err(err) = self.send(message.clone(), &peer_id) {
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn poll(&mut self, now: Instant) {
        while let Some(event) = self.link.poll_event() {
            self.handle_link_event(event, now);
        }
        self.check_timers(now);
    }

    fn drain_events(&mut self) -> Drain<'_, TransportEvent> {
        self.events.drain(..)
    }

    fn disconnect(&mut self) {
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
        self.session_info.as_ref().map(|info| info.session_id.as_str())
    }
}
