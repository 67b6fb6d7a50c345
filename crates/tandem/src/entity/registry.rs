use std::collections::HashMap;

use super::BodyHandle;
use crate::net::{NetEntityId, PeerId, current_time_ms};

#[derive(Debug, Clone, PartialEq)]
pub struct NetEntityRecord {
    pub net_entity_id: NetEntityId,
    pub local_entity_id: String,
    pub body_handle: BodyHandle,
    pub template_id: String,
    pub owner_peer_id: Option<PeerId>,
    pub created_at: u64,
}

/// Maps networked entity ids to local entities and bodies.
///
/// The spawner owns the registry and is the only writer. Lookups by net id,
/// local entity id and body handle always resolve to the same record.
#[derive(Debug)]
pub struct NetEntityRegistry {
    local_peer_id: PeerId,
    records: HashMap<NetEntityId, NetEntityRecord>,
    by_local_id: HashMap<String, NetEntityId>,
    by_body: HashMap<BodyHandle, NetEntityId>,
    next_serial: u64,
}

impl NetEntityRegistry {
    pub fn new(local_peer_id: impl Into<PeerId>) -> Self {
        Self {
            local_peer_id: local_peer_id.into(),
            records: HashMap::new(),
            by_local_id: HashMap::new(),
            by_body: HashMap::new(),
            next_serial: 1,
        }
    }

    pub fn local_peer_id(&self) -> &PeerId {
        &self.local_peer_id
    }

    /// Registers a local entity. Pass `existing_net_id` when mirroring an
    /// entity spawned by another peer; otherwise a fresh id is minted.
    ///
    /// Any record already holding the net id, local id or body handle is
    /// replaced.
    pub fn register(
        &mut self,
        local_entity_id: impl Into<String>,
        body_handle: BodyHandle,
        template_id: impl Into<String>,
        owner_peer_id: Option<PeerId>,
        existing_net_id: Option<NetEntityId>,
    ) -> NetEntityId {
        let local_entity_id = local_entity_id.into();
        let net_entity_id = existing_net_id.unwrap_or_else(|| self.mint_id());

        self.unregister(&net_entity_id);
        if let Some(stale) = self.by_local_id.get(&local_entity_id).cloned() {
            self.unregister(&stale);
        }
        if let Some(stale) = self.by_body.get(&body_handle).cloned() {
            self.unregister(&stale);
        }

        self.by_local_id
            .insert(local_entity_id.clone(), net_entity_id.clone());
        self.by_body.insert(body_handle, net_entity_id.clone());
        self.records.insert(
            net_entity_id.clone(),
            NetEntityRecord {
                net_entity_id: net_entity_id.clone(),
                local_entity_id,
                body_handle,
                template_id: template_id.into(),
                owner_peer_id,
                created_at: current_time_ms(),
            },
        );

        net_entity_id
    }

    pub fn unregister(&mut self, net_entity_id: &str) -> Option<NetEntityRecord> {
        let record = self.records.remove(net_entity_id)?;
        self.by_local_id.remove(&record.local_entity_id);
        self.by_body.remove(&record.body_handle);
        Some(record)
    }

    pub fn unregister_by_local_id(&mut self, local_entity_id: &str) -> Option<NetEntityRecord> {
        let net_entity_id = self.by_local_id.get(local_entity_id)?.clone();
        self.unregister(&net_entity_id)
    }

    pub fn get_by_net_entity_id(&self, net_entity_id: &str) -> Option<&NetEntityRecord> {
        self.records.get(net_entity_id)
    }

    pub fn get_by_local_entity_id(&self, local_entity_id: &str) -> Option<&NetEntityRecord> {
        self.by_local_id
            .get(local_entity_id)
            .and_then(|id| self.records.get(id))
    }

    pub fn get_by_body(&self, body_handle: BodyHandle) -> Option<&NetEntityRecord> {
        self.by_body
            .get(&body_handle)
            .and_then(|id| self.records.get(id))
    }

    /// Records owned by `peer_id`, sorted by net id.
    pub fn owned_entities(&self, peer_id: &str) -> Vec<&NetEntityRecord> {
        let mut owned: Vec<_> = self
            .records
            .values()
            .filter(|r| r.owner_peer_id.as_deref() == Some(peer_id))
            .collect();
        owned.sort_by(|a, b| a.net_entity_id.cmp(&b.net_entity_id));
        owned
    }

    pub fn iter(&self) -> impl Iterator<Item = &NetEntityRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.by_local_id.clear();
        self.by_body.clear();
    }

    fn mint_id(&mut self) -> NetEntityId {
        loop {
            let candidate = format!("{}:{}", self.local_peer_id, self.next_serial);
            self.next_serial += 1;
            if !self.records.contains_key(&candidate) {
                return candidate;
            }
        }
    }
}
