//! Contracts of the collaborators the trust engine consumes.
//!
//! The key-exchange and authentication-ceremony protocols, and persistence,
//! live outside this crate; the aggregator only sees these traits.

use crate::address::Address;
use crate::device::DeviceId;
use crate::error::RoomTrustResult;
use crate::trust::{PeerTrustRecord, TrustKey, VerificationStatus};

/// Key-exchange engine of a local identity.
pub trait KeyExchange: Send {
    /// Whether end-to-end encryption is running for `local`.
    fn is_encryption_active(&self, local: &Address) -> bool;
}

/// Out-of-band device verification (SAS comparison).
pub trait AuthenticationCeremony: Send {
    /// Status known to the ceremony engine, used to rebuild state after a
    /// restart when the trust store has no record.
    fn current_status(&self, local: &Address, peer: &Address, device: &DeviceId)
        -> VerificationStatus;
}

/// Persistent store of peer trust records.
///
/// Records are only ever inserted or overwritten per key. Any failure is
/// reported as [`crate::RoomTrustError::StoreUnavailable`].
pub trait TrustStore: Send {
    fn load(&self, key: &TrustKey) -> RoomTrustResult<Option<PeerTrustRecord>>;
    fn store(&mut self, record: PeerTrustRecord) -> RoomTrustResult<()>;
}
