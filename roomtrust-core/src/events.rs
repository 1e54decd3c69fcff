//! Events flowing into and out of the trust aggregator.

use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::device::DeviceId;
use crate::trust::{RoomId, RoomSecurityLevel};

/// Facts delivered by collaborators (key exchange, ceremony, call/session
/// state) about one room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TrustEvent {
    /// The encryption engine was (re)started for the local identity.
    EncryptionEngineEnabled,
    /// The encryption engine was turned off; traffic is no longer decrypted.
    EncryptionEngineDisabled,
    /// A device joined; its key material is not established yet.
    DeviceAdded { peer: Address, device: DeviceId },
    /// A device left the room.
    DeviceRemoved { peer: Address, device: DeviceId },
    /// End-to-end key material exists for this device.
    KeyMaterialEstablished { peer: Address, device: DeviceId },
    /// Key material for this device is gone.
    KeyMaterialRevoked { peer: Address, device: DeviceId },
    /// The user confirmed (`valid`) or rejected the SAS of this device.
    VerificationResult {
        peer: Address,
        device: DeviceId,
        valid: bool,
    },
    /// The peer announced more devices than the policy allows.
    DeviceCountExceeded { peer: Address },
    /// The participant left the room.
    ParticipantRemoved { peer: Address },
}

/// Alerts for notification and UI layers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SecurityEvent {
    /// The room lost security without becoming unsafe.
    SecurityLevelDowngraded {
        from: RoomSecurityLevel,
        to: RoomSecurityLevel,
    },
    /// A device failed verification; the room became unsafe.
    ManInTheMiddleDetected { peer: Address, device: DeviceId },
    /// A participant has more devices than allowed; the room became unsafe.
    ParticipantMaxDeviceCountExceeded {
        peer: Address,
        device_count: usize,
        max: u32,
    },
}

/// A security event raised in a given room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSecurityEvent {
    pub room: RoomId,
    pub event: SecurityEvent,
}

/// Receiver of security events for a room.
pub trait SecurityListener: Send {
    fn on_security_event(&self, room: RoomId, event: &SecurityEvent);
}

impl<F> SecurityListener for F
where
    F: Fn(RoomId, &SecurityEvent) + Send,
{
    fn on_security_event(&self, room: RoomId, event: &SecurityEvent) {
        self(room, event)
    }
}
