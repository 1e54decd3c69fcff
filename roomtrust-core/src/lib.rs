//! # roomtrust-core
//!
//! Conference trust core for a SIP communication stack.
//!
//! This crate maps room parameters to capability sets, keeps per-participant
//! conference metadata, decides whether an existing room can be reused for a
//! new request, and aggregates device verification facts into a room-level
//! security classification with downgrade and man-in-the-middle alerts.

pub mod account;
pub mod address;
pub mod aggregator;
pub mod capabilities;
pub mod device;
pub mod error;
pub mod events;
pub mod matcher;
pub mod message;
pub mod params;
pub mod participant;
pub mod ports;
pub mod store;
pub mod trust;

pub use account::{Account, AccountId, AccountRegistry};
pub use address::Address;
pub use aggregator::{DeviceTrustAggregator, MessageHandling};
pub use capabilities::{capabilities_of, is_valid, params_of, Capabilities, Capability};
pub use device::{DeviceId, ParticipantDeviceIdentity};
pub use error::{Inconsistency, RoomTrustError, RoomTrustResult};
pub use events::{RoomSecurityEvent, SecurityEvent, SecurityListener, TrustEvent};
pub use matcher::{find_reusable, matches, ConferenceDescription, MatchCandidate, Mismatch};
pub use message::{Request, RequestBody, Response, ResponseBody};
pub use params::{
    Backend, ChatParams, EncryptionBackend, EphemeralMode, JoinMode, ParticipantListType,
    RoomParameters, RoomText, SecurityLevelTarget,
};
pub use participant::{ParticipantInfo, ParticipantInfoRegistry, Role};
pub use ports::{AuthenticationCeremony, KeyExchange, TrustStore};
pub use store::{FileTrustStore, InMemoryTrustStore};
pub use trust::{
    PeerTrustRecord, RoomId, RoomSecurityLevel, TrustKey, TrustPolicy, VerificationStatus,
};

/// Wire protocol version
pub const PROTOCOL_VERSION: &str = "0.1";
