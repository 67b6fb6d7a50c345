use std::collections::{BTreeMap, HashMap, VecDeque};

use tandem::net::rand_u64;
use tandem::transport::{RoomEvent, RoomPeer, RoomRequest};
use tandem::{NetworkMessage, PeerId};
use tokio::sync::mpsc::UnboundedSender;

use crate::config::RelayServerConfig;
use crate::events::RelayEvent;

const ROOM_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Outbound text frames for one connection.
pub type Outbox = UnboundedSender<String>;

/// Room a connection belongs to, as seen by its reader task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Membership {
    pub room_id: String,
    pub peer_id: PeerId,
}

#[derive(Debug)]
struct Member {
    name: String,
    outbox: Outbox,
}

#[derive(Debug, Default)]
struct Room {
    members: BTreeMap<PeerId, Member>,
}

impl Room {
    fn listing(&self, except: &str) -> Vec<RoomPeer> {
        self.members
            .iter()
            .filter(|(id, _)| id.as_str() != except)
            .map(|(id, member)| RoomPeer {
                peer_id: id.clone(),
                name: member.name.clone(),
            })
            .collect()
    }

    fn send_to(&self, peer_id: &str, event: &RoomEvent) {
        if let Some(member) = self.members.get(peer_id) {
            send(&member.outbox, event);
        }
    }

    fn send_to_others(&self, except: &str, event: &RoomEvent) {
        for (id, member) in &self.members {
            if id != except {
                send(&member.outbox, event);
            }
        }
    }
}

fn send(outbox: &Outbox, event: &RoomEvent) {
    match event.to_json() {
        Ok(text) => {
            // A closed outbox means the connection is already going away.
            let _ = outbox.send(text);
        }
        Err(err) => log::error!("Could not encode room event: {}", err),
    }
}

/// Room bookkeeping shared by every connection.
#[derive(Debug)]
pub struct Rooms {
    config: RelayServerConfig,
    rooms: HashMap<String, Room>,
    events: VecDeque<RelayEvent>,
}

impl Rooms {
    pub fn new(config: RelayServerConfig) -> Self {
        Self {
            config,
            rooms: HashMap::new(),
            events: VecDeque::new(),
        }
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = RelayEvent> + '_ {
        self.events.drain(..)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn members(&self, room_id: &str) -> Vec<PeerId> {
        self.rooms
            .get(room_id)
            .map(|room| room.members.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn generate_code(&self) -> String {
        loop {
            let mut seed = rand_u64();
            let code: String = (0..self.config.room_code_length)
                .map(|_| {
                    let index = (seed % ROOM_CODE_ALPHABET.len() as u64) as usize;
                    seed /= ROOM_CODE_ALPHABET.len() as u64;
                    ROOM_CODE_ALPHABET[index] as char
                })
                .collect();
            if !self.rooms.contains_key(&code) {
                return code;
            }
        }
    }

    /// Applies one request from a connection. Returns the connection's room
    /// membership afterwards.
    pub fn handle(
        &mut self,
        current: Option<Membership>,
        request: RoomRequest,
        outbox: &Outbox,
    ) -> Option<Membership> {
        match request {
            RoomRequest::CreateRoom {
                game_id,
                device_name,
                peer_id,
            } => {
                if let Some(previous) = &current {
                    self.leave(previous);
                }
                Some(self.create(game_id, device_name, peer_id, outbox))
            }
            RoomRequest::JoinRoom {
                room_id,
                device_name,
                peer_id,
            } => {
                if let Some(previous) = &current {
                    self.leave(previous);
                }
                self.join(room_id, device_name, peer_id, outbox, false)
            }
            RoomRequest::RejoinRoom {
                room_id,
                device_name,
                peer_id,
            } => {
                if let Some(previous) = current.as_ref().filter(|m| m.room_id != room_id) {
                    self.leave(previous);
                }
                self.join(room_id, device_name, peer_id, outbox, true)
            }
            RoomRequest::LeaveRoom => {
                if let Some(previous) = &current {
                    self.leave(previous);
                }
                None
            }
            RoomRequest::Relay {
                to_peer_id,
                message,
            } => {
                match &current {
                    Some(membership) => self.relay(membership, &to_peer_id, message),
                    None => not_in_room(outbox),
                }
                current
            }
            RoomRequest::Broadcast { message } => {
                match &current {
                    Some(membership) => self.broadcast(membership, message),
                    None => not_in_room(outbox),
                }
                current
            }
        }
    }

    fn create(
        &mut self,
        game_id: String,
        device_name: String,
        peer_id: PeerId,
        outbox: &Outbox,
    ) -> Membership {
        let room_id = self.generate_code();
        let mut room = Room::default();
        room.members.insert(
            peer_id.clone(),
            Member {
                name: device_name,
                outbox: outbox.clone(),
            },
        );
        self.rooms.insert(room_id.clone(), room);

        send(
            outbox,
            &RoomEvent::RoomCreated {
                room_id: room_id.clone(),
            },
        );
        self.events.push_back(RelayEvent::RoomCreated {
            room_id: room_id.clone(),
            host: peer_id.clone(),
            game_id,
        });
        Membership { room_id, peer_id }
    }

    /// Joins an existing room. A rejoin recreates a room that vanished, e.g.
    /// after every member dropped at once.
    fn join(
        &mut self,
        room_id: String,
        device_name: String,
        peer_id: PeerId,
        outbox: &Outbox,
        rejoin: bool,
    ) -> Option<Membership> {
        if rejoin {
            self.rooms.entry(room_id.clone()).or_default();
        }
        let max_peers = self.config.max_peers_per_room;
        let Some(room) = self.rooms.get_mut(&room_id) else {
            self.reject(outbox, peer_id, "Room not found");
            return None;
        };
        let returning = room.members.contains_key(&peer_id);
        if !returning && room.members.len() >= max_peers {
            self.reject(outbox, peer_id, "Room is full");
            return None;
        }

        room.members.insert(
            peer_id.clone(),
            Member {
                name: device_name.clone(),
                outbox: outbox.clone(),
            },
        );
        send(
            outbox,
            &RoomEvent::RoomJoined {
                room_id: room_id.clone(),
                peers: room.listing(&peer_id),
            },
        );

        if returning {
            self.events.push_back(RelayEvent::PeerRejoined {
                room_id: room_id.clone(),
                peer_id: peer_id.clone(),
            });
        } else {
            room.send_to_others(
                &peer_id,
                &RoomEvent::PeerJoined {
                    peer_id: peer_id.clone(),
                    peer_name: device_name.clone(),
                },
            );
            self.events.push_back(if rejoin {
                RelayEvent::PeerRejoined {
                    room_id: room_id.clone(),
                    peer_id: peer_id.clone(),
                }
            } else {
                RelayEvent::PeerJoined {
                    room_id: room_id.clone(),
                    peer_id: peer_id.clone(),
                    name: device_name,
                }
            });
        }

        Some(Membership { room_id, peer_id })
    }

    fn reject(&mut self, outbox: &Outbox, peer_id: PeerId, reason: &str) {
        send(
            outbox,
            &RoomEvent::Error {
                error: reason.to_string(),
            },
        );
        self.events.push_back(RelayEvent::Rejected {
            peer_id,
            reason: reason.to_string(),
        });
    }

    /// Removes a member, telling the rest of the room. Empty rooms close.
    pub fn leave(&mut self, membership: &Membership) {
        let Some(room) = self.rooms.get_mut(&membership.room_id) else {
            return;
        };
        if room.members.remove(&membership.peer_id).is_none() {
            return;
        }

        room.send_to_others(
            &membership.peer_id,
            &RoomEvent::PeerLeft {
                peer_id: membership.peer_id.clone(),
            },
        );
        self.events.push_back(RelayEvent::PeerLeft {
            room_id: membership.room_id.clone(),
            peer_id: membership.peer_id.clone(),
        });

        if room.members.is_empty() {
            self.rooms.remove(&membership.room_id);
            self.events.push_back(RelayEvent::RoomClosed {
                room_id: membership.room_id.clone(),
            });
        }
    }

    fn relay(&self, from: &Membership, to_peer_id: &str, message: NetworkMessage) {
        let Some(room) = self.rooms.get(&from.room_id) else {
            return;
        };
        if !room.members.contains_key(to_peer_id) {
            log::debug!("Relay from {} to unknown peer {}", from.peer_id, to_peer_id);
            return;
        }
        room.send_to(
            to_peer_id,
            &RoomEvent::Relay {
                peer_id: from.peer_id.clone(),
                message,
            },
        );
    }

    fn broadcast(&self, from: &Membership, message: NetworkMessage) {
        if let Some(room) = self.rooms.get(&from.room_id) {
            room.send_to_others(
                &from.peer_id,
                &RoomEvent::Broadcast {
                    peer_id: from.peer_id.clone(),
                    message,
                },
            );
        }
    }
}

fn not_in_room(outbox: &Outbox) {
    send(
        outbox,
        &RoomEvent::Error {
            error: "Not in a room".to_string(),
        },
    );
}
