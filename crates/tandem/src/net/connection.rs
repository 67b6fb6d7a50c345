use std::collections::HashMap;
use std::fmt;
use std::time::Instant;

use super::latency::PingTracker;
use super::protocol::PeerId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Advertising,
    Scanning,
    Connecting,
    Connected,
    Reconnecting,
    Error,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Advertising => "advertising",
            ConnectionState::Scanning => "scanning",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Error => "error",
        }
    }

    /// True while a session is being set up or is live.
    pub fn is_active(&self) -> bool {
        !matches!(
            self,
            ConnectionState::Disconnected | ConnectionState::Error
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionRole {
    Host,
    Client,
}

#[derive(Debug, Clone)]
pub struct PeerInfo {
    pub peer_id: PeerId,
    pub name: String,
    /// Link-level address (radio device id). Absent for relayed peers.
    pub link_id: Option<String>,
    pub ping: PingTracker,
    pub last_seen: Instant,
    pub connected_at: Instant,
}

impl PeerInfo {
    pub fn new(peer_id: PeerId, name: String, link_id: Option<String>, now: Instant) -> Self {
        Self {
            peer_id,
            name,
            link_id,
            ping: PingTracker::new(),
            last_seen: now,
            connected_at: now,
        }
    }

    pub fn latency_ms(&self) -> f32 {
        self.ping.latency_ms()
    }

    pub fn touch(&mut self, now: Instant) {
        self.last_seen = now;
    }
}

/// Connected peers indexed by peer id and by link address.
#[derive(Debug, Default)]
pub struct PeerTable {
    peers: HashMap<PeerId, PeerInfo>,
    by_link: HashMap<String, PeerId>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or refreshes a peer. Returns true when the peer is new.
    pub fn insert(&mut self, info: PeerInfo) -> bool {
        let is_new = match self.peers.remove(&info.peer_id) {
            Some(previous) => {
                if let Some(link) = previous.link_id {
                    self.by_link.remove(&link);
                }
                false
            }
            None => true,
        };

        if let Some(link) = &info.link_id {
            // A link can only carry one peer.
            if let Some(stale) = self.by_link.insert(link.clone(), info.peer_id.clone()) {
                self.peers.remove(&stale);
            }
        }
        self.peers.insert(info.peer_id.clone(), info);

        is_new
    }

    pub fn remove(&mut self, peer_id: &str) -> Option<PeerInfo> {
        let info = self.peers.remove(peer_id)?;
        if let Some(link) = &info.link_id {
            self.by_link.remove(link);
        }
        Some(info)
    }

    pub fn remove_by_link(&mut self, link_id: &str) -> Option<PeerInfo> {
        let peer_id = self.by_link.remove(link_id)?;
        self.peers.remove(&peer_id)
    }

    pub fn get(&self, peer_id: &str) -> Option<&PeerInfo> {
        self.peers.get(peer_id)
    }

    pub fn get_mut(&mut self, peer_id: &str) -> Option<&mut PeerInfo> {
        self.peers.get_mut(peer_id)
    }

    pub fn get_by_link(&self, link_id: &str) -> Option<&PeerInfo> {
        self.by_link
            .get(link_id)
            .and_then(|id| self.peers.get(id))
    }

    pub fn peer_for_link(&self, link_id: &str) -> Option<&PeerId> {
        self.by_link.get(link_id)
    }

    pub fn contains(&self, peer_id: &str) -> bool {
        self.peers.contains_key(peer_id)
    }

    pub fn touch(&mut self, peer_id: &str, now: Instant) {
        if let Some(peer) = self.peers.get_mut(peer_id) {
            peer.touch(now);
        }
    }

    pub fn latency_ms(&self, peer_id: &str) -> f32 {
        self.peers.get(peer_id).map_or(0.0, PeerInfo::latency_ms)
    }

    /// Peer ids in a stable order.
    pub fn ids(&self) -> Vec<PeerId> {
        let mut ids: Vec<_> = self.peers.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn iter(&self) -> impl Iterator<Item = &PeerInfo> {
        self.peers.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut PeerInfo> {
        self.peers.values_mut()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn drain(&mut self) -> Vec<PeerInfo> {
        self.by_link.clear();
        let mut drained: Vec<_> = self.peers.drain().map(|(_, info)| info).collect();
        drained.sort_by(|a, b| a.peer_id.cmp(&b.peer_id));
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(id: &str, link: Option<&str>) -> PeerInfo {
        PeerInfo::new(
            id.to_string(),
            format!("{id}-device"),
            link.map(str::to_string),
            Instant::now(),
        )
    }

    #[test]
    fn test_insert_and_lookup_by_link() {
        let mut table = PeerTable::new();

        assert!(table.insert(peer("ble-a", Some("AA:01"))));
        assert!(!table.insert(peer("ble-a", Some("AA:01"))));

        assert_eq!(table.len(), 1);
        assert_eq!(table.peer_for_link("AA:01").map(String::as_str), Some("ble-a"));
        assert_eq!(table.get_by_link("AA:01").unwrap().name, "ble-a-device");
    }

    #[test]
    fn test_link_reuse_evicts_previous_peer() {
        let mut table = PeerTable::new();
        table.insert(peer("ble-a", Some("AA:01")));
        table.insert(peer("ble-b", Some("AA:01")));

        assert!(!table.contains("ble-a"));
        assert_eq!(table.ids(), vec!["ble-b".to_string()]);
    }

    #[test]
    fn test_remove_by_either_key() {
        let mut table = PeerTable::new();
        table.insert(peer("ble-a", Some("AA:01")));
        table.insert(peer("ws-b", None));

        assert_eq!(table.remove_by_link("AA:01").unwrap().peer_id, "ble-a");
        assert!(table.peer_for_link("AA:01").is_none());
        assert!(table.remove("ws-b").is_some());
        assert!(table.is_empty());
        assert!(table.remove("ws-b").is_none());
    }

    #[test]
    fn test_unknown_peer_latency_is_zero() {
        let table = PeerTable::new();
        assert_eq!(table.latency_ms("nobody"), 0.0);
    }

    #[test]
    fn test_state_activity() {
        assert!(ConnectionState::Scanning.is_active());
        assert!(ConnectionState::Reconnecting.is_active());
        assert!(!ConnectionState::Disconnected.is_active());
        assert_eq!(ConnectionState::Advertising.to_string(), "advertising");
    }
}
