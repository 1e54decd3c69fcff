//! Trust data model: verification statuses, room security levels, policy and
//! persisted peer trust records.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::address::Address;
use crate::device::DeviceId;

/// Identifier of a room tracked by the aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(pub Uuid);

impl RoomId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RoomId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Outcome of the out-of-band authentication ceremony for one peer device,
/// as seen by one local identity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    #[default]
    Unknown,
    Valid,
    Invalid,
}

impl VerificationStatus {
    pub fn from_result(valid: bool) -> Self {
        if valid {
            Self::Valid
        } else {
            Self::Invalid
        }
    }
}

/// Security level of a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomSecurityLevel {
    /// No encryption engine active.
    ClearText,
    /// Key material for every device, not all verified.
    Encrypted,
    /// A device was rejected or a participant has too many devices.
    Unsafe,
    /// Every device of every participant verified.
    Safe,
}

impl RoomSecurityLevel {
    /// Position on the ClearText < Encrypted < Safe scale. `Unsafe` is off
    /// the scale.
    pub fn rank(&self) -> Option<u8> {
        match self {
            Self::ClearText => Some(0),
            Self::Encrypted => Some(1),
            Self::Safe => Some(2),
            Self::Unsafe => None,
        }
    }

    /// Whether moving from `self` to `next` loses security on the scale.
    pub fn is_downgrade_to(&self, next: RoomSecurityLevel) -> bool {
        matches!((self.rank(), next.rank()), (Some(from), Some(to)) if to < from)
    }
}

impl fmt::Display for RoomSecurityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClearText => write!(f, "clear_text"),
            Self::Encrypted => write!(f, "encrypted"),
            Self::Unsafe => write!(f, "unsafe"),
            Self::Safe => write!(f, "safe"),
        }
    }
}

/// Trust policy supplied by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustPolicy {
    /// Device ceiling per participant; exceeding it makes the room unsafe.
    pub max_devices_per_participant: u32,
    /// Whether messages are still delivered in an unsafe room.
    pub allow_message_in_unsafe_room: bool,
    /// Whether a rejected verification makes the room unsafe.
    pub unsafe_if_verification_rejected: bool,
}

impl Default for TrustPolicy {
    fn default() -> Self {
        Self {
            max_devices_per_participant: 10,
            allow_message_in_unsafe_room: false,
            unsafe_if_verification_rejected: true,
        }
    }
}

/// Key of a trust record: one local identity's opinion of one peer device.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TrustKey {
    pub local: String,
    pub peer: String,
    pub device: DeviceId,
}

impl TrustKey {
    /// Build a key from addresses; GRUUs are stripped.
    pub fn new(local: &Address, peer: &Address, device: &DeviceId) -> Self {
        Self {
            local: local.canonical(),
            peer: peer.canonical(),
            device: device.clone(),
        }
    }
}

/// Persisted verification status of a peer device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerTrustRecord {
    pub key: TrustKey,
    pub status: VerificationStatus,
    pub updated_at: DateTime<Utc>,
}

impl PeerTrustRecord {
    pub fn new(key: TrustKey, status: VerificationStatus) -> Self {
        Self {
            key,
            status,
            updated_at: Utc::now(),
        }
    }
}
