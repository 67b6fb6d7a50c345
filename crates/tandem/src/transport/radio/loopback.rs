use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;

use super::link::{LinkError, LinkEvent, RadioLink, SessionInfo};
use crate::net::PacketLossSimulation;

pub const LOOPBACK_MAX_MTU: usize = 185;

#[derive(Debug)]
struct Node {
    powered: bool,
    max_mtu: usize,
    advertising: Option<SessionInfo>,
    scanning: bool,
    connections: HashSet<String>,
    inbox: VecDeque<LinkEvent>,
    loss: PacketLossSimulation,
}

impl Node {
    fn new(max_mtu: usize) -> Self {
        Self {
            powered: true,
            max_mtu,
            advertising: None,
            scanning: false,
            connections: HashSet::new(),
            inbox: VecDeque::new(),
            loss: PacketLossSimulation::default(),
        }
    }
}

#[derive(Debug, Default)]
struct Medium {
    nodes: HashMap<String, Node>,
    next_device: u32,
}

impl Medium {
    fn push(&mut self, device_id: &str, event: LinkEvent) {
        if let Some(node) = self.nodes.get_mut(device_id) {
            node.inbox.push_back(event);
        }
    }
}

/// Shared in-memory medium. Radios created from the same `LoopbackAir` can
/// discover and talk to each other.
#[derive(Debug, Clone, Default)]
pub struct LoopbackAir {
    medium: Rc<RefCell<Medium>>,
}

impl LoopbackAir {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn radio(&self) -> LoopbackRadio {
        self.radio_with_mtu(LOOPBACK_MAX_MTU)
    }

    pub fn radio_with_mtu(&self, max_mtu: usize) -> LoopbackRadio {
        let mut medium = self.medium.borrow_mut();
        medium.next_device += 1;
        let device_id = format!("loop-{:02X}", medium.next_device);
        medium.nodes.insert(device_id.clone(), Node::new(max_mtu));

        LoopbackRadio {
            medium: Rc::clone(&self.medium),
            device_id,
        }
    }

    /// Drops the connection between two devices as if the radio link failed.
    pub fn sever(&self, a: &str, b: &str) {
        let mut medium = self.medium.borrow_mut();
        let connected = medium
            .nodes
            .get_mut(a)
            .is_some_and(|node| node.connections.remove(b));
        if !connected {
            return;
        }
        if let Some(node) = medium.nodes.get_mut(b) {
            node.connections.remove(a);
        }
        medium.push(a, LinkEvent::Disconnected { device_id: b.to_string() });
        medium.push(b, LinkEvent::Disconnected { device_id: a.to_string() });
    }
}

/// One device on a [`LoopbackAir`].
#[derive(Debug)]
pub struct LoopbackRadio {
    medium: Rc<RefCell<Medium>>,
    device_id: String,
}

impl LoopbackRadio {
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn set_powered(&self, powered: bool) {
        if let Some(node) = self.medium.borrow_mut().nodes.get_mut(&self.device_id) {
            node.powered = powered;
        }
    }

    /// Applies loss to chunks written by this device.
    pub fn set_loss(&self, loss: PacketLossSimulation) {
        if let Some(node) = self.medium.borrow_mut().nodes.get_mut(&self.device_id) {
            node.loss = loss;
        }
    }

    fn is_connected_to(&self, device_id: &str) -> bool {
        self.medium
            .borrow()
            .nodes
            .get(&self.device_id)
            .is_some_and(|node| node.connections.contains(device_id))
    }
}

impl RadioLink for LoopbackRadio {
    fn is_powered_on(&self) -> bool {
        self.medium
            .borrow()
            .nodes
            .get(&self.device_id)
            .is_some_and(|node| node.powered)
    }

    fn start_advertising(&mut self, info: &SessionInfo) -> Result<(), LinkError> {
        let mut medium = self.medium.borrow_mut();
        let node = medium
            .nodes
            .get_mut(&self.device_id)
            .ok_or_else(|| LinkError::new("device detached"))?;
        node.advertising = Some(info.clone());

        let scanners: Vec<String> = medium
            .nodes
            .iter()
            .filter(|(id, node)| node.scanning && **id != self.device_id)
            .map(|(id, _)| id.clone())
            .collect();
        for scanner in scanners {
            medium.push(
                &scanner,
                LinkEvent::DeviceDiscovered {
                    device_id: self.device_id.clone(),
                    info: info.clone(),
                },
            );
        }
        Ok(())
    }

    fn stop_advertising(&mut self) {
        if let Some(node) = self.medium.borrow_mut().nodes.get_mut(&self.device_id) {
            node.advertising = None;
        }
    }

    fn start_scan(&mut self) -> Result<(), LinkError> {
        let mut medium = self.medium.borrow_mut();
        let hosts: Vec<(String, SessionInfo)> = medium
            .nodes
            .iter()
            .filter(|(id, _)| **id != self.device_id)
            .filter_map(|(id, node)| node.advertising.clone().map(|info| (id.clone(), info)))
            .collect();

        let node = medium
            .nodes
            .get_mut(&self.device_id)
            .ok_or_else(|| LinkError::new("device detached"))?;
        node.scanning = true;
        for (device_id, info) in hosts {
            node.inbox
                .push_back(LinkEvent::DeviceDiscovered { device_id, info });
        }
        Ok(())
    }

    fn stop_scan(&mut self) {
        if let Some(node) = self.medium.borrow_mut().nodes.get_mut(&self.device_id) {
            node.scanning = false;
        }
    }

    fn connect(&mut self, device_id: &str) -> Result<(), LinkError> {
        let mut medium = self.medium.borrow_mut();
        let reachable = medium
            .nodes
            .get(device_id)
            .is_some_and(|node| node.powered && node.advertising.is_some());

        if !reachable {
            medium.push(
                &self.device_id,
                LinkEvent::ConnectFailed {
                    device_id: device_id.to_string(),
                    reason: "device not reachable".to_string(),
                },
            );
            return Ok(());
        }

        if let Some(node) = medium.nodes.get_mut(device_id) {
            node.connections.insert(self.device_id.clone());
            node.inbox.push_back(LinkEvent::CentralConnected {
                device_id: self.device_id.clone(),
            });
        }
        if let Some(node) = medium.nodes.get_mut(&self.device_id) {
            node.connections.insert(device_id.to_string());
            node.inbox.push_back(LinkEvent::Connected {
                device_id: device_id.to_string(),
            });
        }
        Ok(())
    }

    fn request_mtu(&mut self, device_id: &str, mtu: usize) {
        if !self.is_connected_to(device_id) {
            return;
        }

        let mut medium = self.medium.borrow_mut();
        let local = medium.nodes.get(&self.device_id).map_or(0, |n| n.max_mtu);
        let remote = medium.nodes.get(device_id).map_or(0, |n| n.max_mtu);
        let negotiated = mtu.min(local).min(remote);

        medium.push(
            &self.device_id,
            LinkEvent::MtuChanged {
                device_id: device_id.to_string(),
                mtu: negotiated,
            },
        );
        medium.push(
            device_id,
            LinkEvent::MtuChanged {
                device_id: self.device_id.clone(),
                mtu: negotiated,
            },
        );
    }

    fn write(&mut self, device_id: &str, chunk: &[u8]) -> Result<(), LinkError> {
        if !self.is_connected_to(device_id) {
            return Err(LinkError::new(format!("not connected to {device_id}")));
        }

        let mut medium = self.medium.borrow_mut();
        let dropped = medium
            .nodes
            .get(&self.device_id)
            .is_some_and(|node| node.loss.should_drop());
        if dropped {
            log::trace!("Loopback dropped chunk {} -> {}", self.device_id, device_id);
            return Ok(());
        }

        medium.push(
            device_id,
            LinkEvent::Data {
                device_id: self.device_id.clone(),
                bytes: chunk.to_vec(),
            },
        );
        Ok(())
    }

    fn disconnect(&mut self, device_id: &str) {
        let mut medium = self.medium.borrow_mut();
        let was_connected = medium
            .nodes
            .get_mut(&self.device_id)
            .is_some_and(|node| node.connections.remove(device_id));
        if !was_connected {
            return;
        }
        if let Some(node) = medium.nodes.get_mut(device_id) {
            node.connections.remove(&self.device_id);
        }
        medium.push(
            device_id,
            LinkEvent::Disconnected {
                device_id: self.device_id.clone(),
            },
        );
    }

    fn poll_event(&mut self) -> Option<LinkEvent> {
        self.medium
            .borrow_mut()
            .nodes
            .get_mut(&self.device_id)
            .and_then(|node| node.inbox.pop_front())
    }
}

impl Drop for LoopbackRadio {
    fn drop(&mut self) {
        let mut medium = self.medium.borrow_mut();
        let Some(node) = medium.nodes.remove(&self.device_id) else {
            return;
        };
        for peer in node.connections {
            if let Some(other) = medium.nodes.get_mut(&peer) {
                other.connections.remove(&self.device_id);
            }
            medium.push(
                &peer,
                LinkEvent::Disconnected {
                    device_id: self.device_id.clone(),
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info() -> SessionInfo {
        SessionInfo {
            game_id: "pong".into(),
            session_id: "s1".into(),
            host_name: "Host".into(),
            host_peer_id: "ble-host".into(),
        }
    }

    fn drain(radio: &mut LoopbackRadio) -> Vec<LinkEvent> {
        std::iter::from_fn(|| radio.poll_event()).collect()
    }

    #[test]
    fn test_scan_finds_existing_and_later_advertisers() {
        let air = LoopbackAir::new();
        let mut early = air.radio();
        let mut scanner = air.radio();
        let mut late = air.radio();

        early.start_advertising(&info()).unwrap();
        scanner.start_scan().unwrap();
        late.start_advertising(&info()).unwrap();

        let found: Vec<_> = drain(&mut scanner)
            .into_iter()
            .filter_map(|e| match e {
                LinkEvent::DeviceDiscovered { device_id, .. } => Some(device_id),
                _ => None,
            })
            .collect();
        assert_eq!(found, vec![early.device_id().to_string(), late.device_id().to_string()]);
    }

    #[test]
    fn test_connect_negotiates_smallest_mtu() {
        let air = LoopbackAir::new();
        let mut host = air.radio_with_mtu(100);
        let mut client = air.radio();
        host.start_advertising(&info()).unwrap();

        client.connect(host.device_id()).unwrap();
        client.request_mtu(host.device_id(), 512);

        assert!(drain(&mut client).contains(&LinkEvent::MtuChanged {
            device_id: host.device_id().to_string(),
            mtu: 100,
        }));
        assert!(drain(&mut host).contains(&LinkEvent::CentralConnected {
            device_id: client.device_id().to_string(),
        }));
    }

    #[test]
    fn test_write_requires_connection() {
        let air = LoopbackAir::new();
        let mut a = air.radio();
        let b = air.radio();
        assert!(a.write(b.device_id(), &[1, 2, 3]).is_err());
    }

    #[test]
    fn test_dropping_a_radio_disconnects_peers() {
        let air = LoopbackAir::new();
        let mut host = air.radio();
        let mut client = air.radio();
        host.start_advertising(&info()).unwrap();
        client.connect(host.device_id()).unwrap();
        drain(&mut host);

        let client_id = client.device_id().to_string();
        drop(client);

        assert_eq!(
            drain(&mut host),
            vec![LinkEvent::Disconnected { device_id: client_id }]
        );
    }
}
