//! Rooms known to the server and their reuse lookup.

use roomtrust_core::capabilities::validate;
use roomtrust_core::{
    capabilities_of, find_reusable, Address, Capabilities, ConferenceDescription, MatchCandidate,
    ParticipantInfoRegistry, RoomId, RoomParameters, RoomTrustError, RoomTrustResult,
};

/// A room instantiated by the server.
#[derive(Debug)]
pub struct Room {
    id: RoomId,
    local: Address,
    remote: Option<Address>,
    params: RoomParameters,
    capabilities: Capabilities,
    registry: ParticipantInfoRegistry,
    // Mirror of `registry` for matching.
    participants: Vec<Address>,
}

impl Room {
    fn new(wanted: &ConferenceDescription, local: &Address) -> Self {
        let params = wanted.params.clone().unwrap_or_default();
        let mut room = Self {
            id: RoomId::new(),
            local: local.clone(),
            remote: wanted.remote_address.clone(),
            capabilities: capabilities_of(&params),
            params,
            registry: ParticipantInfoRegistry::new(),
            participants: Vec::new(),
        };
        for participant in &wanted.participants {
            room.registry.join(participant);
        }
        room.sync_participants();
        room
    }

    pub fn id(&self) -> RoomId {
        self.id
    }

    pub fn local(&self) -> &Address {
        &self.local
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    pub fn registry(&self) -> &ParticipantInfoRegistry {
        &self.registry
    }

    fn sync_participants(&mut self) {
        self.participants = self.registry.addresses();
    }
}

impl MatchCandidate for Room {
    fn params(&self) -> Option<&RoomParameters> {
        Some(&self.params)
    }

    fn local_address(&self) -> Option<&Address> {
        Some(&self.local)
    }

    fn remote_address(&self) -> Option<&Address> {
        self.remote.as_ref()
    }

    fn participants(&self) -> &[Address] {
        &self.participants
    }
}

/// Open rooms in creation order; the oldest matching room is reused.
#[derive(Debug, Default)]
pub struct RoomCatalog {
    rooms: Vec<Room>,
}

impl RoomCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Find a room serving `wanted` for `local`, creating one if none matches.
    /// Returns the room and whether it already existed.
    pub fn open(
        &mut self,
        wanted: &ConferenceDescription,
        local: &Address,
    ) -> RoomTrustResult<(&Room, bool)> {
        if let Some(params) = &wanted.params {
            validate(params).map_err(RoomTrustError::InconsistentParameters)?;
        }

        // Rooms are views of one local identity.
        let mut probe = wanted.clone();
        probe.local_address.get_or_insert_with(|| local.clone());

        if let Some(index) = find_reusable(&probe, self.rooms.iter())
            .map(|room| room.id)
            .and_then(|id| self.position(id))
        {
            tracing::debug!(room = %self.rooms[index].id, "reusing room");
            return Ok((&self.rooms[index], true));
        }

        let local = probe.local_address.as_ref().unwrap_or(local);
        let room = Room::new(wanted, local);
        tracing::info!(room = %room.id, capabilities = %room.capabilities, "room created");
        self.rooms.push(room);
        let index = self.rooms.len() - 1;
        Ok((&self.rooms[index], false))
    }

    pub fn get(&self, id: RoomId) -> Option<&Room> {
        self.rooms.iter().find(|r| r.id == id)
    }

    pub fn close(&mut self, id: RoomId) -> Option<Room> {
        let index = self.position(id)?;
        Some(self.rooms.remove(index))
    }

    /// Record that `peer` takes part in `id`.
    pub fn note_participant(&mut self, id: RoomId, peer: &Address) {
        if let Some(room) = self.get_mut(id) {
            if room.registry.find(peer).is_none() {
                room.registry.join(peer);
                room.sync_participants();
            }
        }
    }

    pub fn remove_participant(&mut self, id: RoomId, peer: &Address) {
        if let Some(room) = self.get_mut(id) {
            if room.registry.remove(peer).is_some() {
                room.sync_participants();
            }
        }
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    fn get_mut(&mut self, id: RoomId) -> Option<&mut Room> {
        self.rooms.iter_mut().find(|r| r.id == id)
    }

    fn position(&self, id: RoomId) -> Option<usize> {
        self.rooms.iter().position(|r| r.id == id)
    }
}
