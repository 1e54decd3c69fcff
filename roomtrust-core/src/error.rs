//! Error types for RoomTrust.
//!
//! Trust anomalies (rejected verification, too many devices) are not errors:
//! they surface as [`crate::events::SecurityEvent`]s. What lives here are input
//! errors, inconsistency errors, store failures and plumbing failures.

use thiserror::Error;

/// Why a set of room parameters was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Inconsistency {
    /// A group room was requested on the basic backend.
    GroupRequiresRoomBackend,
    /// A server-hosted room was requested without a subject.
    RoomBackendRequiresSubject,
    /// End-to-end encryption was requested on the basic backend.
    EncryptionRequiresRoomBackend,
    /// Admin-managed ephemeral mode was requested on the basic backend.
    AdminEphemeralRequiresRoomBackend,
    /// Ephemeral lifetime is negative.
    NegativeEphemeralLifetime,
}

impl std::fmt::Display for Inconsistency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::GroupRequiresRoomBackend => write!(f, "group_requires_room_backend"),
            Self::RoomBackendRequiresSubject => write!(f, "room_backend_requires_subject"),
            Self::EncryptionRequiresRoomBackend => write!(f, "encryption_requires_room_backend"),
            Self::AdminEphemeralRequiresRoomBackend => {
                write!(f, "admin_ephemeral_requires_room_backend")
            }
            Self::NegativeEphemeralLifetime => write!(f, "negative_ephemeral_lifetime"),
        }
    }
}

/// RoomTrust errors.
#[derive(Debug, Error)]
pub enum RoomTrustError {
    /// Malformed input at a boundary (e.g. a non-integer sequence number).
    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter { name: String, reason: String },

    /// Room parameters are inconsistent; room creation must be refused.
    #[error("inconsistent room parameters: {0}")]
    InconsistentParameters(Inconsistency),

    /// Malformed address.
    #[error("invalid address {input:?}: {reason}")]
    InvalidAddress { input: String, reason: String },

    /// The room is not registered.
    #[error("unknown room {0}")]
    UnknownRoom(uuid::Uuid),

    /// The trust store cannot be read or written.
    #[error("trust store unavailable: {0}")]
    StoreUnavailable(String),

    /// Protocol-level error (unexpected reply, invalid request).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Transport error (connection, I/O).
    #[error("transport error: {0}")]
    Transport(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for RoomTrust operations.
pub type RoomTrustResult<T> = Result<T, RoomTrustError>;
