//! Device trust aggregation.
//!
//! The aggregator keeps, per room, the set of known devices of every
//! participant and whether key material exists for each, and, shared across
//! rooms, every local identity's verification status of every peer device.
//! The room security level is recomputed from those facts after each event;
//! the last computed level is only kept to detect transitions.
//!
//! Calls must be serialized by the caller (one event loop), there is no
//! internal locking.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::device::DeviceId;
use crate::error::{RoomTrustError, RoomTrustResult};
use crate::events::{RoomSecurityEvent, SecurityEvent, SecurityListener, TrustEvent};
use crate::ports::{AuthenticationCeremony, KeyExchange, TrustStore};
use crate::trust::{
    PeerTrustRecord, RoomId, RoomSecurityLevel, TrustKey, TrustPolicy, VerificationStatus,
};

/// How message traffic of a room should be handled at its current level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageHandling {
    pub level: RoomSecurityLevel,
    /// Whether incoming/outgoing traffic goes through the encryption engine.
    pub decrypt: bool,
    /// Whether messages are handed to the application.
    pub deliver: bool,
    /// Whether messages must be shown as coming from an unsafe room.
    pub flagged_unsafe: bool,
}

#[derive(Debug, Clone, Default)]
struct DeviceState {
    has_key_material: bool,
}

#[derive(Debug, Clone)]
struct ParticipantState {
    address: Address,
    devices: BTreeMap<DeviceId, DeviceState>,
    count_exceeded: bool,
}

impl ParticipantState {
    fn new(address: &Address) -> Self {
        Self {
            address: address.without_gruu(),
            devices: BTreeMap::new(),
            count_exceeded: false,
        }
    }
}

struct RoomState {
    local: Address,
    encryption_active: bool,
    participants: BTreeMap<String, ParticipantState>,
    last_level: RoomSecurityLevel,
    /// Rejected devices already reported, keyed by canonical peer.
    alerted: BTreeSet<(String, DeviceId)>,
    listeners: Vec<Box<dyn SecurityListener>>,
}

impl RoomState {
    fn has_device(&self, peer: &Address, device: &DeviceId) -> bool {
        self.participants
            .get(&peer.canonical())
            .is_some_and(|p| p.devices.contains_key(device))
    }
}

/// Level of `room` and its rejected devices, when rejections count.
fn compute_level(
    room: &RoomState,
    records: &HashMap<TrustKey, VerificationStatus>,
    policy: &TrustPolicy,
) -> (RoomSecurityLevel, Vec<(Address, DeviceId)>) {
    if !room.encryption_active {
        return (RoomSecurityLevel::ClearText, Vec::new());
    }

    let mut rejected = Vec::new();
    let mut any_device = false;
    let mut all_keyed = true;
    let mut all_valid = true;
    let mut count_exceeded = false;

    for participant in room.participants.values() {
        count_exceeded |= participant.count_exceeded;
        for (device, state) in &participant.devices {
            any_device = true;
            all_keyed &= state.has_key_material;
            let key = TrustKey::new(&room.local, &participant.address, device);
            match records.get(&key).copied().unwrap_or_default() {
                VerificationStatus::Valid => {}
                VerificationStatus::Unknown => all_valid = false,
                VerificationStatus::Invalid => {
                    all_valid = false;
                    rejected.push((participant.address.clone(), device.clone()));
                }
            }
        }
    }

    if !policy.unsafe_if_verification_rejected {
        rejected.clear();
    }
    if count_exceeded || !rejected.is_empty() {
        return (RoomSecurityLevel::Unsafe, rejected);
    }
    if !any_device || !all_keyed {
        return (RoomSecurityLevel::ClearText, rejected);
    }
    if all_valid {
        (RoomSecurityLevel::Safe, rejected)
    } else {
        (RoomSecurityLevel::Encrypted, rejected)
    }
}

/// Folds device-level trust facts into room security levels.
pub struct DeviceTrustAggregator {
    policy: TrustPolicy,
    store: Box<dyn TrustStore>,
    key_exchange: Option<Box<dyn KeyExchange>>,
    ceremony: Option<Box<dyn AuthenticationCeremony>>,
    records: HashMap<TrustKey, VerificationStatus>,
    rooms: HashMap<RoomId, RoomState>,
}

impl DeviceTrustAggregator {
    pub fn new(policy: TrustPolicy, store: Box<dyn TrustStore>) -> Self {
        Self {
            policy,
            store,
            key_exchange: None,
            ceremony: None,
            records: HashMap::new(),
            rooms: HashMap::new(),
        }
    }

    pub fn with_key_exchange(mut self, key_exchange: Box<dyn KeyExchange>) -> Self {
        self.key_exchange = Some(key_exchange);
        self
    }

    pub fn with_ceremony(mut self, ceremony: Box<dyn AuthenticationCeremony>) -> Self {
        self.ceremony = Some(ceremony);
        self
    }

    pub fn policy(&self) -> &TrustPolicy {
        &self.policy
    }

    /// Start tracking a room seen by `local`. Returns `false` if it was
    /// already tracked, in which case its state is kept.
    pub fn open_room(&mut self, room: RoomId, local: &Address, encryption_active: bool) -> bool {
        if self.rooms.contains_key(&room) {
            return false;
        }
        self.rooms.insert(
            room,
            RoomState {
                local: local.without_gruu(),
                encryption_active,
                participants: BTreeMap::new(),
                // No device known yet.
                last_level: RoomSecurityLevel::ClearText,
                alerted: BTreeSet::new(),
                listeners: Vec::new(),
            },
        );
        tracing::debug!(%room, local = %local, encryption_active, "room opened");
        true
    }

    /// Like [`Self::open_room`], asking the key-exchange collaborator whether
    /// encryption is active for `local`.
    pub fn open_room_detect(&mut self, room: RoomId, local: &Address) -> bool {
        let active = self
            .key_exchange
            .as_ref()
            .is_some_and(|k| k.is_encryption_active(local));
        self.open_room(room, local, active)
    }

    /// Stop tracking a room. Persisted trust records are kept; cached ones no
    /// other open room refers to are dropped.
    pub fn close_room(&mut self, room: RoomId) -> bool {
        if self.rooms.remove(&room).is_none() {
            return false;
        }
        self.prune_records();
        true
    }

    pub fn is_open(&self, room: RoomId) -> bool {
        self.rooms.contains_key(&room)
    }

    /// Register a listener for the security events of `room`.
    pub fn subscribe(
        &mut self,
        room: RoomId,
        listener: impl SecurityListener + 'static,
    ) -> RoomTrustResult<()> {
        self.room_mut(room)?.listeners.push(Box::new(listener));
        Ok(())
    }

    /// Current security level of `room`, recomputed from trust facts.
    pub fn current_security_level(&self, room: RoomId) -> RoomTrustResult<RoomSecurityLevel> {
        let state = self.room(room)?;
        Ok(compute_level(state, &self.records, &self.policy).0)
    }

    /// How message traffic of `room` must be handled. Nothing is dropped here;
    /// `deliver == false` is a policy decision left to the caller.
    pub fn classify_message(&self, room: RoomId) -> RoomTrustResult<MessageHandling> {
        let level = self.current_security_level(room)?;
        let flagged_unsafe = level == RoomSecurityLevel::Unsafe;
        Ok(MessageHandling {
            level,
            decrypt: level != RoomSecurityLevel::ClearText,
            deliver: !flagged_unsafe || self.policy.allow_message_in_unsafe_room,
            flagged_unsafe,
        })
    }

    /// Known devices of `peer` in `room`.
    pub fn devices(&self, room: RoomId, peer: &Address) -> RoomTrustResult<Vec<DeviceId>> {
        Ok(self
            .room(room)?
            .participants
            .get(&peer.canonical())
            .map(|p| p.devices.keys().cloned().collect())
            .unwrap_or_default())
    }

    /// `local`'s opinion of one peer device.
    pub fn verification_status(
        &self,
        local: &Address,
        peer: &Address,
        device: &DeviceId,
    ) -> VerificationStatus {
        let key = TrustKey::new(local, peer, device);
        if let Some(status) = self.records.get(&key) {
            return *status;
        }
        match self.store.load(&key) {
            Ok(record) => record.map(|r| r.status).unwrap_or_default(),
            Err(e) => {
                tracing::warn!(error = %e, "trust store unavailable");
                VerificationStatus::Unknown
            }
        }
    }

    /// Apply one collaborator event to `room`.
    ///
    /// Returns every security event raised, including those raised in other
    /// rooms of the same local identity that share the affected device. The
    /// same events are delivered to subscribed listeners. The only error is an
    /// unknown room.
    pub fn handle_event(
        &mut self,
        room: RoomId,
        event: TrustEvent,
    ) -> RoomTrustResult<Vec<RoomSecurityEvent>> {
        self.room(room)?;
        tracing::debug!(%room, ?event, "trust event");

        let mut raised = Vec::new();
        let mut affected = vec![room];
        let mut quiet = false;

        match event {
            TrustEvent::EncryptionEngineEnabled => {
                self.room_mut(room)?.encryption_active = true;
            }
            TrustEvent::EncryptionEngineDisabled => {
                self.room_mut(room)?.encryption_active = false;
                quiet = true;
            }
            TrustEvent::DeviceAdded { peer, device } => {
                self.add_device(room, &peer, &device, false, &mut raised)?;
            }
            TrustEvent::KeyMaterialEstablished { peer, device } => {
                self.add_device(room, &peer, &device, true, &mut raised)?;
            }
            TrustEvent::KeyMaterialRevoked { peer, device } => {
                let state = self
                    .room_mut(room)?
                    .participants
                    .get_mut(&peer.canonical())
                    .and_then(|p| p.devices.get_mut(&device));
                match state {
                    Some(state) => state.has_key_material = false,
                    None => tracing::warn!(%room, %peer, %device, "key revocation for unknown device ignored"),
                }
            }
            TrustEvent::DeviceRemoved { peer, device } => {
                self.remove_device(room, &peer, &device)?;
            }
            TrustEvent::VerificationResult {
                peer,
                device,
                valid,
            } => {
                if let Some(rooms) = self.record_verification(room, &peer, &device, valid)? {
                    affected = rooms;
                }
            }
            TrustEvent::DeviceCountExceeded { peer } => {
                self.flag_device_count(room, &peer, &mut raised)?;
            }
            TrustEvent::ParticipantRemoved { peer } => {
                if self
                    .room_mut(room)?
                    .participants
                    .remove(&peer.canonical())
                    .is_none()
                {
                    tracing::debug!(%room, %peer, "removed participant was not tracked");
                }
                self.prune_records();
            }
        }

        for id in affected {
            self.refresh(id, quiet, &mut raised);
        }
        self.notify(&raised);
        Ok(raised)
    }

    fn room(&self, room: RoomId) -> RoomTrustResult<&RoomState> {
        self.rooms.get(&room).ok_or(RoomTrustError::UnknownRoom(room.0))
    }

    fn room_mut(&mut self, room: RoomId) -> RoomTrustResult<&mut RoomState> {
        self.rooms
            .get_mut(&room)
            .ok_or(RoomTrustError::UnknownRoom(room.0))
    }

    fn add_device(
        &mut self,
        room: RoomId,
        peer: &Address,
        device: &DeviceId,
        has_key_material: bool,
        raised: &mut Vec<RoomSecurityEvent>,
    ) -> RoomTrustResult<()> {
        let max = self.policy.max_devices_per_participant;
        let state = self.room_mut(room)?;
        let local = state.local.clone();
        let participant = state
            .participants
            .entry(peer.canonical())
            .or_insert_with(|| ParticipantState::new(peer));

        let entry = participant.devices.entry(device.clone()).or_default();
        entry.has_key_material |= has_key_material;

        let device_count = participant.devices.len();
        if device_count > max as usize && !participant.count_exceeded {
            participant.count_exceeded = true;
            tracing::warn!(%room, %peer, device_count, max, "participant exceeds device ceiling");
            raised.push(RoomSecurityEvent {
                room,
                event: SecurityEvent::ParticipantMaxDeviceCountExceeded {
                    peer: participant.address.clone(),
                    device_count,
                    max,
                },
            });
        }

        self.ensure_record(&local, peer, device);
        Ok(())
    }

    fn remove_device(
        &mut self,
        room: RoomId,
        peer: &Address,
        device: &DeviceId,
    ) -> RoomTrustResult<()> {
        let max = self.policy.max_devices_per_participant as usize;
        let Some(participant) = self.room_mut(room)?.participants.get_mut(&peer.canonical()) else {
            tracing::debug!(%room, %peer, %device, "removed device of unknown participant");
            return Ok(());
        };
        if participant.devices.remove(device).is_none() {
            tracing::debug!(%room, %peer, %device, "removed device was not tracked");
        }
        if participant.devices.len() <= max {
            participant.count_exceeded = false;
        }
        Ok(())
    }

    fn flag_device_count(
        &mut self,
        room: RoomId,
        peer: &Address,
        raised: &mut Vec<RoomSecurityEvent>,
    ) -> RoomTrustResult<()> {
        let max = self.policy.max_devices_per_participant;
        let participant = self
            .room_mut(room)?
            .participants
            .entry(peer.canonical())
            .or_insert_with(|| ParticipantState::new(peer));
        if !participant.count_exceeded {
            participant.count_exceeded = true;
            raised.push(RoomSecurityEvent {
                room,
                event: SecurityEvent::ParticipantMaxDeviceCountExceeded {
                    peer: participant.address.clone(),
                    device_count: participant.devices.len(),
                    max,
                },
            });
        }
        Ok(())
    }

    /// Record a verification result. Returns the rooms whose level may have
    /// changed, or `None` if the device is unknown to `room`.
    fn record_verification(
        &mut self,
        room: RoomId,
        peer: &Address,
        device: &DeviceId,
        valid: bool,
    ) -> RoomTrustResult<Option<Vec<RoomId>>> {
        let state = self.room(room)?;
        if !state.has_device(peer, device) {
            tracing::warn!(%room, %peer, %device, "verification result for unknown device ignored");
            return Ok(None);
        }

        let key = TrustKey::new(&state.local, peer, device);
        let status = VerificationStatus::from_result(valid);
        self.records.insert(key.clone(), status);
        if let Err(e) = self.store.store(PeerTrustRecord::new(key.clone(), status)) {
            tracing::warn!(error = %e, %peer, %device, "verification result not persisted");
        }

        let mut rooms = vec![room];
        rooms.extend(
            self.rooms
                .iter()
                .filter(|(id, other)| {
                    **id != room
                        && other.local.canonical() == key.local
                        && other.has_device(peer, device)
                })
                .map(|(id, _)| *id),
        );
        Ok(Some(rooms))
    }

    /// Load the initial status of a device the first time it is seen: the
    /// store, then the ceremony collaborator, else unknown.
    fn ensure_record(&mut self, local: &Address, peer: &Address, device: &DeviceId) {
        let key = TrustKey::new(local, peer, device);
        if self.records.contains_key(&key) {
            return;
        }
        let status = match self.store.load(&key) {
            Ok(Some(record)) => record.status,
            Ok(None) => self
                .ceremony
                .as_ref()
                .map(|c| c.current_status(local, peer, device))
                .unwrap_or_default(),
            Err(e) => {
                tracing::warn!(error = %e, %peer, %device, "trust store unavailable, device starts unknown");
                VerificationStatus::Unknown
            }
        };
        self.records.insert(key, status);
    }

    /// Drop cached statuses that no open room refers to. The store still has
    /// them.
    fn prune_records(&mut self) {
        let rooms = &self.rooms;
        let before = self.records.len();
        self.records.retain(|key, _| {
            rooms.values().any(|room| {
                room.local.canonical() == key.local
                    && room
                        .participants
                        .get(&key.peer)
                        .is_some_and(|p| p.devices.contains_key(&key.device))
            })
        });
        tracing::trace!(evicted = before - self.records.len(), "trust cache pruned");
    }

    fn refresh(&mut self, room: RoomId, quiet: bool, raised: &mut Vec<RoomSecurityEvent>) {
        let Some(state) = self.rooms.get_mut(&room) else {
            return;
        };
        let (level, rejected) = compute_level(state, &self.records, &self.policy);
        let previous = state.last_level;
        state.last_level = level;

        // One alert per rejected device for as long as it stays rejected,
        // whatever made the room unsafe first.
        let current: BTreeSet<(String, DeviceId)> = rejected
            .iter()
            .map(|(peer, device)| (peer.canonical(), device.clone()))
            .collect();
        state.alerted.retain(|seen| current.contains(seen));
        for (peer, device) in rejected {
            if state.alerted.insert((peer.canonical(), device.clone())) {
                tracing::warn!(%room, %peer, %device, "device verification rejected");
                raised.push(RoomSecurityEvent {
                    room,
                    event: SecurityEvent::ManInTheMiddleDetected { peer, device },
                });
            }
        }

        if level == previous {
            return;
        }
        tracing::info!(%room, from = %previous, to = %level, "room security level changed");

        if !quiet && previous.is_downgrade_to(level) {
            raised.push(RoomSecurityEvent {
                room,
                event: SecurityEvent::SecurityLevelDowngraded {
                    from: previous,
                    to: level,
                },
            });
        }
    }

    fn notify(&self, raised: &[RoomSecurityEvent]) {
        for alert in raised {
            if let Some(state) = self.rooms.get(&alert.room) {
                for listener in &state.listeners {
                    listener.on_security_event(alert.room, &alert.event);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryTrustStore;
    use std::sync::{Arc, Mutex};

    fn addr(s: &str) -> Address {
        Address::parse(s).unwrap()
    }

    fn dev(s: &str) -> DeviceId {
        DeviceId::new(s)
    }

    fn aggregator(max_devices: u32) -> DeviceTrustAggregator {
        DeviceTrustAggregator::new(
            TrustPolicy {
                max_devices_per_participant: max_devices,
                ..Default::default()
            },
            Box::new(InMemoryTrustStore::new()),
        )
    }

    fn keyed(agg: &mut DeviceTrustAggregator, room: RoomId, peer: &str, device: &str) -> Vec<SecurityEvent> {
        events(agg.handle_event(
            room,
            TrustEvent::KeyMaterialEstablished {
                peer: addr(peer),
                device: dev(device),
            },
        ))
    }

    fn verify(
        agg: &mut DeviceTrustAggregator,
        room: RoomId,
        peer: &str,
        device: &str,
        valid: bool,
    ) -> Vec<SecurityEvent> {
        events(agg.handle_event(
            room,
            TrustEvent::VerificationResult {
                peer: addr(peer),
                device: dev(device),
                valid,
            },
        ))
    }

    fn events(result: RoomTrustResult<Vec<RoomSecurityEvent>>) -> Vec<SecurityEvent> {
        result.unwrap().into_iter().map(|e| e.event).collect()
    }

    fn level(agg: &DeviceTrustAggregator, room: RoomId) -> RoomSecurityLevel {
        agg.current_security_level(room).unwrap()
    }

    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<SecurityEvent>>>);

    impl Recorder {
        fn listener(&self) -> impl SecurityListener + 'static {
            let sink = Arc::clone(&self.0);
            move |_room: RoomId, event: &SecurityEvent| sink.lock().unwrap().push(event.clone())
        }

        fn take(&self) -> Vec<SecurityEvent> {
            std::mem::take(&mut *self.0.lock().unwrap())
        }
    }

    const ALICE: &str = "sip:alice@example.org";
    const BOB: &str = "sip:bob@example.org";
    const CAROL: &str = "sip:carol@example.org";
    const DAVE: &str = "sip:dave@example.org";

    #[test]
    fn first_key_material_is_not_a_downgrade() {
        let mut agg = aggregator(10);
        let room = RoomId::new();
        agg.open_room(room, &addr(ALICE), true);
        assert_eq!(level(&agg, room), RoomSecurityLevel::ClearText);

        assert!(keyed(&mut agg, room, BOB, "bob-1").is_empty());
        assert_eq!(level(&agg, room), RoomSecurityLevel::Encrypted);
    }

    #[test]
    fn device_without_key_keeps_room_clear() {
        let mut agg = aggregator(10);
        let room = RoomId::new();
        agg.open_room(room, &addr(ALICE), true);
        agg.handle_event(
            room,
            TrustEvent::DeviceAdded {
                peer: addr(BOB),
                device: dev("bob-1"),
            },
        )
        .unwrap();
        assert_eq!(level(&agg, room), RoomSecurityLevel::ClearText);

        keyed(&mut agg, room, BOB, "bob-1");
        assert_eq!(level(&agg, room), RoomSecurityLevel::Encrypted);
    }

    #[test]
    fn scenario_mutual_verification_then_rejection() {
        let mut agg = aggregator(10);
        let alice_view = RoomId::new();
        let bob_view = RoomId::new();
        agg.open_room(alice_view, &addr(ALICE), true);
        agg.open_room(bob_view, &addr(BOB), true);

        let alice_alerts = Recorder::default();
        agg.subscribe(alice_view, alice_alerts.listener()).unwrap();

        keyed(&mut agg, alice_view, BOB, "bob-1");
        keyed(&mut agg, bob_view, ALICE, "alice-1");
        verify(&mut agg, alice_view, BOB, "bob-1", true);
        verify(&mut agg, bob_view, ALICE, "alice-1", true);
        assert_eq!(level(&agg, alice_view), RoomSecurityLevel::Safe);
        assert_eq!(level(&agg, bob_view), RoomSecurityLevel::Safe);
        alice_alerts.take();

        let raised = verify(&mut agg, alice_view, BOB, "bob-1", false);
        assert_eq!(
            raised,
            vec![SecurityEvent::ManInTheMiddleDetected {
                peer: addr(BOB),
                device: dev("bob-1"),
            }]
        );
        assert_eq!(level(&agg, alice_view), RoomSecurityLevel::Unsafe);

        // Staying unsafe does not repeat the alert.
        assert!(verify(&mut agg, alice_view, BOB, "bob-1", false).is_empty());
        assert_eq!(alice_alerts.take().len(), 1);

        // Bob's opinion of Alice is a separate record.
        assert_eq!(
            agg.verification_status(&addr(BOB), &addr(ALICE), &dev("alice-1")),
            VerificationStatus::Valid
        );
        assert_eq!(level(&agg, bob_view), RoomSecurityLevel::Safe);

        verify(&mut agg, bob_view, ALICE, "alice-1", false);
        assert_eq!(level(&agg, bob_view), RoomSecurityLevel::Unsafe);
    }

    #[test]
    fn scenario_device_ceiling() {
        let mut agg = aggregator(1);
        let room = RoomId::new();
        agg.open_room(room, &addr(ALICE), true);

        keyed(&mut agg, room, BOB, "bob-1");
        verify(&mut agg, room, BOB, "bob-1", true);
        assert_eq!(level(&agg, room), RoomSecurityLevel::Safe);

        let raised = keyed(&mut agg, room, BOB, "bob-2");
        assert_eq!(
            raised,
            vec![SecurityEvent::ParticipantMaxDeviceCountExceeded {
                peer: addr(BOB),
                device_count: 2,
                max: 1,
            }]
        );
        assert_eq!(level(&agg, room), RoomSecurityLevel::Unsafe);

        // Dropping back under the ceiling lifts the flag.
        agg.handle_event(
            room,
            TrustEvent::DeviceRemoved {
                peer: addr(BOB),
                device: dev("bob-2"),
            },
        )
        .unwrap();
        assert_eq!(level(&agg, room), RoomSecurityLevel::Safe);
    }

    #[test]
    fn rejection_while_over_ceiling_still_alerts() {
        let mut agg = aggregator(1);
        let room = RoomId::new();
        agg.open_room(room, &addr(ALICE), true);
        let alerts = Recorder::default();
        agg.subscribe(room, alerts.listener()).unwrap();

        keyed(&mut agg, room, BOB, "bob-1");
        let raised = keyed(&mut agg, room, BOB, "bob-2");
        assert!(matches!(
            raised.as_slice(),
            [SecurityEvent::ParticipantMaxDeviceCountExceeded { .. }]
        ));
        assert_eq!(level(&agg, room), RoomSecurityLevel::Unsafe);

        let raised = verify(&mut agg, room, BOB, "bob-1", false);
        assert_eq!(
            raised,
            vec![SecurityEvent::ManInTheMiddleDetected {
                peer: addr(BOB),
                device: dev("bob-1"),
            }]
        );

        // The extra device leaves; the rejection keeps the room unsafe without
        // a second alert.
        let raised = events(agg.handle_event(
            room,
            TrustEvent::DeviceRemoved {
                peer: addr(BOB),
                device: dev("bob-2"),
            },
        ));
        assert!(raised.is_empty());
        assert_eq!(level(&agg, room), RoomSecurityLevel::Unsafe);
        assert!(verify(&mut agg, room, BOB, "bob-1", false).is_empty());
        assert_eq!(alerts.take().len(), 2);
    }

    #[test]
    fn each_rejected_device_alerts_once() {
        let mut agg = aggregator(10);
        let room = RoomId::new();
        agg.open_room(room, &addr(ALICE), true);
        keyed(&mut agg, room, BOB, "bob-1");
        keyed(&mut agg, room, CAROL, "carol-1");

        assert_eq!(verify(&mut agg, room, BOB, "bob-1", false).len(), 1);
        assert_eq!(
            verify(&mut agg, room, CAROL, "carol-1", false),
            vec![SecurityEvent::ManInTheMiddleDetected {
                peer: addr(CAROL),
                device: dev("carol-1"),
            }]
        );

        // Cleared, then rejected again: a new alert.
        verify(&mut agg, room, BOB, "bob-1", true);
        assert_eq!(verify(&mut agg, room, BOB, "bob-1", false).len(), 1);
    }

    #[test]
    fn scenario_new_participant_downgrades_every_view() {
        let mut agg = aggregator(10);
        let members = [(ALICE, "alice-1"), (BOB, "bob-1"), (CAROL, "carol-1")];
        let mut views = Vec::new();

        for (local, _) in members {
            let room = RoomId::new();
            agg.open_room(room, &addr(local), true);
            for (peer, device) in members.iter().filter(|(p, _)| *p != local) {
                keyed(&mut agg, room, peer, device);
                verify(&mut agg, room, peer, device, true);
            }
            assert_eq!(level(&agg, room), RoomSecurityLevel::Safe);
            let recorder = Recorder::default();
            agg.subscribe(room, recorder.listener()).unwrap();
            views.push((room, recorder));
        }

        for (room, recorder) in &views {
            keyed(&mut agg, *room, DAVE, "dave-1");
            assert_eq!(level(&agg, *room), RoomSecurityLevel::Encrypted);
            assert_eq!(
                recorder.take(),
                vec![SecurityEvent::SecurityLevelDowngraded {
                    from: RoomSecurityLevel::Safe,
                    to: RoomSecurityLevel::Encrypted,
                }]
            );
        }
    }

    #[test]
    fn engine_disabled_is_silent() {
        let mut agg = aggregator(10);
        let room = RoomId::new();
        agg.open_room(room, &addr(ALICE), true);
        keyed(&mut agg, room, BOB, "bob-1");
        verify(&mut agg, room, BOB, "bob-1", true);

        let raised = agg
            .handle_event(room, TrustEvent::EncryptionEngineDisabled)
            .unwrap();
        assert!(raised.is_empty());
        assert_eq!(level(&agg, room), RoomSecurityLevel::ClearText);
        let handling = agg.classify_message(room).unwrap();
        assert!(!handling.decrypt);
        assert!(handling.deliver);

        // Key material alone does not restart the engine.
        assert!(keyed(&mut agg, room, CAROL, "carol-1").is_empty());
        assert_eq!(level(&agg, room), RoomSecurityLevel::ClearText);
        assert!(!agg.classify_message(room).unwrap().decrypt);

        agg.handle_event(room, TrustEvent::EncryptionEngineEnabled)
            .unwrap();
        assert_eq!(level(&agg, room), RoomSecurityLevel::Encrypted);
        verify(&mut agg, room, CAROL, "carol-1", true);
        assert_eq!(level(&agg, room), RoomSecurityLevel::Safe);
    }

    #[test]
    fn key_material_before_engine_start_stays_clear() {
        let mut agg = aggregator(10);
        let room = RoomId::new();
        agg.open_room(room, &addr(ALICE), false);
        keyed(&mut agg, room, BOB, "bob-1");
        assert_eq!(level(&agg, room), RoomSecurityLevel::ClearText);

        agg.handle_event(room, TrustEvent::EncryptionEngineEnabled)
            .unwrap();
        assert_eq!(level(&agg, room), RoomSecurityLevel::Encrypted);
    }

    #[test]
    fn key_revocation_downgrades() {
        let mut agg = aggregator(10);
        let room = RoomId::new();
        agg.open_room(room, &addr(ALICE), true);
        keyed(&mut agg, room, BOB, "bob-1");
        verify(&mut agg, room, BOB, "bob-1", true);

        let raised = events(agg.handle_event(
            room,
            TrustEvent::KeyMaterialRevoked {
                peer: addr(BOB),
                device: dev("bob-1"),
            },
        ));
        assert_eq!(
            raised,
            vec![SecurityEvent::SecurityLevelDowngraded {
                from: RoomSecurityLevel::Safe,
                to: RoomSecurityLevel::ClearText,
            }]
        );
    }

    #[test]
    fn unknown_device_verification_is_ignored() {
        let mut agg = aggregator(10);
        let room = RoomId::new();
        agg.open_room(room, &addr(ALICE), true);
        keyed(&mut agg, room, BOB, "bob-1");

        assert!(verify(&mut agg, room, BOB, "bob-9", false).is_empty());
        assert!(verify(&mut agg, room, CAROL, "carol-1", false).is_empty());
        assert_eq!(level(&agg, room), RoomSecurityLevel::Encrypted);
    }

    #[test]
    fn abandoned_ceremony_stays_below_safe() {
        let mut agg = aggregator(10);
        let room = RoomId::new();
        agg.open_room(room, &addr(ALICE), true);
        keyed(&mut agg, room, BOB, "bob-1");
        keyed(&mut agg, room, CAROL, "carol-1");
        verify(&mut agg, room, BOB, "bob-1", true);
        assert_eq!(level(&agg, room), RoomSecurityLevel::Encrypted);
    }

    #[test]
    fn removing_participant_recomputes() {
        let mut agg = aggregator(10);
        let room = RoomId::new();
        agg.open_room(room, &addr(ALICE), true);
        keyed(&mut agg, room, BOB, "bob-1");
        keyed(&mut agg, room, CAROL, "carol-1");
        verify(&mut agg, room, BOB, "bob-1", true);
        verify(&mut agg, room, CAROL, "carol-1", false);
        assert_eq!(level(&agg, room), RoomSecurityLevel::Unsafe);

        agg.handle_event(room, TrustEvent::ParticipantRemoved { peer: addr(CAROL) })
            .unwrap();
        assert_eq!(level(&agg, room), RoomSecurityLevel::Safe);
        assert!(agg.devices(room, &addr(CAROL)).unwrap().is_empty());

        // The persisted opinion survives for other rooms.
        assert_eq!(
            agg.verification_status(&addr(ALICE), &addr(CAROL), &dev("carol-1")),
            VerificationStatus::Invalid
        );
    }

    #[test]
    fn verification_is_shared_by_rooms_of_same_identity() {
        let mut agg = aggregator(10);
        let first = RoomId::new();
        let second = RoomId::new();
        agg.open_room(first, &addr(ALICE), true);
        agg.open_room(second, &addr(ALICE), true);
        keyed(&mut agg, first, BOB, "bob-1");
        keyed(&mut agg, second, BOB, "bob-1");
        verify(&mut agg, first, BOB, "bob-1", true);
        assert_eq!(level(&agg, second), RoomSecurityLevel::Safe);

        let raised = agg
            .handle_event(
                first,
                TrustEvent::VerificationResult {
                    peer: addr(BOB),
                    device: dev("bob-1"),
                    valid: false,
                },
            )
            .unwrap();
        let rooms: Vec<RoomId> = raised.iter().map(|e| e.room).collect();
        assert_eq!(rooms, vec![first, second]);

        // A room opened later starts from the recorded opinion.
        let third = RoomId::new();
        agg.open_room(third, &addr(ALICE), true);
        keyed(&mut agg, third, BOB, "bob-1");
        assert_eq!(level(&agg, third), RoomSecurityLevel::Unsafe);
    }

    #[test]
    fn closing_rooms_prunes_cached_statuses() {
        let mut agg = aggregator(10);
        let first = RoomId::new();
        let second = RoomId::new();
        agg.open_room(first, &addr(ALICE), true);
        agg.open_room(second, &addr(ALICE), true);
        keyed(&mut agg, first, BOB, "bob-1");
        keyed(&mut agg, first, CAROL, "carol-1");
        keyed(&mut agg, second, BOB, "bob-1");
        verify(&mut agg, first, BOB, "bob-1", true);
        assert_eq!(agg.records.len(), 2);

        // Bob's device is still in the second room.
        agg.close_room(first);
        assert_eq!(agg.records.len(), 1);
        assert_eq!(level(&agg, second), RoomSecurityLevel::Safe);

        agg.handle_event(second, TrustEvent::ParticipantRemoved { peer: addr(BOB) })
            .unwrap();
        assert!(agg.records.is_empty());

        // The store still answers for evicted entries.
        assert_eq!(
            agg.verification_status(&addr(ALICE), &addr(BOB), &dev("bob-1")),
            VerificationStatus::Valid
        );
        keyed(&mut agg, second, BOB, "bob-1");
        assert_eq!(level(&agg, second), RoomSecurityLevel::Safe);
    }

    #[test]
    fn external_device_count_flag() {
        let mut agg = aggregator(10);
        let room = RoomId::new();
        agg.open_room(room, &addr(ALICE), true);
        keyed(&mut agg, room, BOB, "bob-1");

        let raised = events(agg.handle_event(room, TrustEvent::DeviceCountExceeded { peer: addr(BOB) }));
        assert_eq!(raised.len(), 1);
        assert_eq!(level(&agg, room), RoomSecurityLevel::Unsafe);
        assert!(events(agg.handle_event(room, TrustEvent::DeviceCountExceeded { peer: addr(BOB) }))
            .is_empty());
    }

    #[test]
    fn unsafe_message_policy() {
        let mut agg = aggregator(10);
        let room = RoomId::new();
        agg.open_room(room, &addr(ALICE), true);
        keyed(&mut agg, room, BOB, "bob-1");
        verify(&mut agg, room, BOB, "bob-1", false);

        let handling = agg.classify_message(room).unwrap();
        assert!(handling.flagged_unsafe);
        assert!(handling.decrypt);
        assert!(!handling.deliver);

        let mut lenient = DeviceTrustAggregator::new(
            TrustPolicy {
                allow_message_in_unsafe_room: true,
                ..Default::default()
            },
            Box::new(InMemoryTrustStore::new()),
        );
        lenient.open_room(room, &addr(ALICE), true);
        keyed(&mut lenient, room, BOB, "bob-1");
        verify(&mut lenient, room, BOB, "bob-1", false);
        assert!(lenient.classify_message(room).unwrap().deliver);
    }

    #[test]
    fn rejection_tolerated_by_policy() {
        let mut agg = DeviceTrustAggregator::new(
            TrustPolicy {
                unsafe_if_verification_rejected: false,
                ..Default::default()
            },
            Box::new(InMemoryTrustStore::new()),
        );
        let room = RoomId::new();
        agg.open_room(room, &addr(ALICE), true);
        keyed(&mut agg, room, BOB, "bob-1");
        assert!(verify(&mut agg, room, BOB, "bob-1", false).is_empty());
        assert_eq!(level(&agg, room), RoomSecurityLevel::Encrypted);
    }

    struct BrokenStore;

    impl TrustStore for BrokenStore {
        fn load(&self, _key: &TrustKey) -> RoomTrustResult<Option<PeerTrustRecord>> {
            Err(RoomTrustError::StoreUnavailable("corrupt".to_string()))
        }

        fn store(&mut self, _record: PeerTrustRecord) -> RoomTrustResult<()> {
            Err(RoomTrustError::StoreUnavailable("corrupt".to_string()))
        }
    }

    struct TrustingCeremony;

    impl AuthenticationCeremony for TrustingCeremony {
        fn current_status(&self, _: &Address, _: &Address, _: &DeviceId) -> VerificationStatus {
            VerificationStatus::Valid
        }
    }

    #[test]
    fn broken_store_starts_unknown() {
        let mut agg = DeviceTrustAggregator::new(TrustPolicy::default(), Box::new(BrokenStore))
            .with_ceremony(Box::new(TrustingCeremony));
        let room = RoomId::new();
        agg.open_room(room, &addr(ALICE), true);
        keyed(&mut agg, room, BOB, "bob-1");
        assert_eq!(level(&agg, room), RoomSecurityLevel::Encrypted);

        // A store failure does not stop the classification.
        verify(&mut agg, room, BOB, "bob-1", true);
        assert_eq!(level(&agg, room), RoomSecurityLevel::Safe);
    }

    #[test]
    fn ceremony_fills_missing_records() {
        let mut agg = aggregator(10).with_ceremony(Box::new(TrustingCeremony));
        let room = RoomId::new();
        agg.open_room(room, &addr(ALICE), true);
        keyed(&mut agg, room, BOB, "bob-1");
        assert_eq!(level(&agg, room), RoomSecurityLevel::Safe);
    }

    struct ActiveEngine;

    impl KeyExchange for ActiveEngine {
        fn is_encryption_active(&self, _local: &Address) -> bool {
            true
        }
    }

    #[test]
    fn room_registration() {
        let mut agg = aggregator(10).with_key_exchange(Box::new(ActiveEngine));
        let room = RoomId::new();
        assert!(agg.open_room_detect(room, &addr(ALICE)));
        assert!(!agg.open_room(room, &addr(ALICE), false));
        assert!(agg.is_open(room));

        keyed(&mut agg, room, BOB, "bob-1");
        assert_eq!(agg.devices(room, &addr(BOB)).unwrap(), vec![dev("bob-1")]);

        verify(&mut agg, room, BOB, "bob-1", true);
        assert!(agg.close_room(room));
        assert!(!agg.close_room(room));
        assert!(matches!(
            agg.current_security_level(room),
            Err(RoomTrustError::UnknownRoom(_))
        ));
        assert!(agg
            .handle_event(room, TrustEvent::EncryptionEngineEnabled)
            .is_err());
    }
}
