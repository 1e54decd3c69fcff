//! Capability mapping between room parameters and capability sets.
//!
//! - `capabilities_of`: RoomParameters → Capabilities
//! - `params_of`: Capabilities → RoomParameters (used when a room has to be
//!   created from a capability set alone, e.g. migrating a basic room)
//! - `is_valid`: rejects inconsistent parameter combinations

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Inconsistency, RoomTrustError};
use crate::params::{
    Backend, EncryptionBackend, EphemeralMode, RoomParameters, SecurityLevelTarget,
};

/// A single room capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Basic,
    OneToOne,
    Conference,
    Encrypted,
    Ephemeral,
    RealTimeText,
}

impl Capability {
    pub const ALL: [Capability; 6] = [
        Self::Basic,
        Self::OneToOne,
        Self::Conference,
        Self::Encrypted,
        Self::Ephemeral,
        Self::RealTimeText,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::OneToOne => "one_to_one",
            Self::Conference => "conference",
            Self::Encrypted => "encrypted",
            Self::Ephemeral => "ephemeral",
            Self::RealTimeText => "real_time_text",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = RoomTrustError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| RoomTrustError::InvalidParameter {
                name: "capability".to_string(),
                reason: format!("unknown capability {s:?}"),
            })
    }
}

/// A set of capabilities.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Capabilities(BTreeSet<Capability>);

impl Capabilities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has(&self, capability: Capability) -> bool {
        self.0.contains(&capability)
    }

    pub fn insert(&mut self, capability: Capability) {
        self.0.insert(capability);
    }

    pub fn with(mut self, capability: Capability) -> Self {
        self.insert(capability);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        self.0.iter().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Capability> for Capabilities {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().map(|c| c.as_str()).collect();
        f.write_str(&names.join("|"))
    }
}

impl FromStr for Capabilities {
    type Err = RoomTrustError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.split('|')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(Capability::from_str)
            .collect()
    }
}

/// Derive the capability set described by `params`.
pub fn capabilities_of(params: &RoomParameters) -> Capabilities {
    let mut caps = Capabilities::new();

    match params.backend() {
        Backend::Basic => {
            caps.insert(Capability::Basic);
            caps.insert(Capability::OneToOne);
        }
        Backend::RoomBackend => {
            caps.insert(Capability::Conference);
            if !params.group {
                caps.insert(Capability::OneToOne);
            }
            if params.backend().allows_ephemeral()
                && params.chat.ephemeral_mode == EphemeralMode::AdminManaged
            {
                caps.insert(Capability::Ephemeral);
            }
        }
    }

    if params.is_encrypted() {
        caps.insert(Capability::Encrypted);
    }
    if params.chat.real_time_text {
        caps.insert(Capability::RealTimeText);
    }

    caps
}

/// Build room parameters from a requested capability set.
///
/// Subject and description are left empty; callers fill them in before
/// validating.
pub fn params_of(caps: &Capabilities) -> RoomParameters {
    let mut params = RoomParameters {
        audio_enabled: false,
        video_enabled: false,
        chat_enabled: true,
        group: !caps.has(Capability::OneToOne) && caps.has(Capability::Conference),
        ..Default::default()
    };

    params.chat.backend = if caps.has(Capability::Conference) {
        Backend::RoomBackend
    } else {
        Backend::Basic
    };
    if caps.has(Capability::Encrypted) {
        params.enable_encryption(EncryptionBackend::Lime);
    } else {
        params.security_level = SecurityLevelTarget::None;
    }
    if caps.has(Capability::Ephemeral) {
        params.chat.ephemeral_mode = EphemeralMode::AdminManaged;
    }
    params.chat.real_time_text = caps.has(Capability::RealTimeText);

    params
}

/// Check `params` for consistency, returning the first problem found.
pub fn validate(params: &RoomParameters) -> Result<(), Inconsistency> {
    if params.group && params.backend() != Backend::RoomBackend {
        return Err(Inconsistency::GroupRequiresRoomBackend);
    }
    if params.backend() == Backend::RoomBackend && params.subject.is_empty() {
        return Err(Inconsistency::RoomBackendRequiresSubject);
    }
    params.chat.validate()
}

/// Whether a room may be created from `params`. Failures are logged.
pub fn is_valid(params: &RoomParameters) -> bool {
    match validate(params) {
        Ok(()) => true,
        Err(reason) => {
            tracing::error!(%reason, "room parameters are not valid");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(list: &[Capability]) -> Capabilities {
        list.iter().copied().collect()
    }

    #[test]
    fn basic_backend() {
        let params = RoomParameters::chat_room(Backend::Basic, "");
        assert_eq!(
            capabilities_of(&params),
            caps(&[Capability::Basic, Capability::OneToOne])
        );
    }

    #[test]
    fn room_backend_group_and_one_to_one() {
        let mut params = RoomParameters::chat_room(Backend::RoomBackend, "Team");
        assert_eq!(
            capabilities_of(&params),
            caps(&[Capability::Conference, Capability::OneToOne])
        );

        params.group = true;
        params.chat.ephemeral_mode = EphemeralMode::AdminManaged;
        params.enable_encryption(EncryptionBackend::Lime);
        assert_eq!(
            capabilities_of(&params),
            caps(&[Capability::Conference, Capability::Ephemeral, Capability::Encrypted])
        );
    }

    #[test]
    fn device_managed_ephemeral_is_not_a_capability() {
        let mut params = RoomParameters::chat_room(Backend::RoomBackend, "Team");
        params.chat.ephemeral_mode = EphemeralMode::DeviceManaged;
        assert!(!capabilities_of(&params).has(Capability::Ephemeral));
    }

    #[test]
    fn encryption_needs_backend() {
        let mut params = RoomParameters::chat_room(Backend::RoomBackend, "Team");
        params.encryption_requested = true;
        assert!(!capabilities_of(&params).has(Capability::Encrypted));

        params.chat.encryption_backend = EncryptionBackend::Lime;
        assert!(capabilities_of(&params).has(Capability::Encrypted));
    }

    #[test]
    fn params_of_group() {
        let params = params_of(&caps(&[Capability::Conference, Capability::Encrypted]));
        assert!(params.group);
        assert!(params.chat_enabled);
        assert!(!params.audio_enabled);
        assert_eq!(params.backend(), Backend::RoomBackend);
        assert_eq!(params.security_level, SecurityLevelTarget::EndToEnd);
        assert_eq!(params.chat.ephemeral_mode, EphemeralMode::Disabled);
    }

    #[test]
    fn params_of_basic() {
        let params = params_of(&caps(&[Capability::Basic, Capability::OneToOne]));
        assert!(!params.group);
        assert_eq!(params.backend(), Backend::Basic);
        assert_eq!(params.security_level, SecurityLevelTarget::None);
    }

    #[test]
    fn round_trip_on_capability_projection() {
        let mut samples = vec![
            RoomParameters::chat_room(Backend::Basic, ""),
            RoomParameters::chat_room(Backend::RoomBackend, "one"),
        ];
        let mut group = RoomParameters::chat_room(Backend::RoomBackend, "group");
        group.group = true;
        samples.push(group.clone());
        group.enable_encryption(EncryptionBackend::Lime);
        group.chat.ephemeral_mode = EphemeralMode::AdminManaged;
        group.chat.ephemeral_lifetime = 86_400;
        samples.push(group.clone());
        group.chat.real_time_text = true;
        samples.push(group);

        for params in samples {
            assert!(is_valid(&params), "{params:?}");
            let caps = capabilities_of(&params);
            assert_eq!(capabilities_of(&params_of(&caps)), caps);
        }
    }

    #[test]
    fn group_on_basic_is_invalid() {
        let mut params = RoomParameters::chat_room(Backend::Basic, "x");
        params.group = true;
        assert!(!is_valid(&params));
        assert_eq!(validate(&params), Err(Inconsistency::GroupRequiresRoomBackend));
    }

    #[test]
    fn room_backend_without_subject_is_invalid() {
        let params = RoomParameters::chat_room(Backend::RoomBackend, "");
        assert!(!is_valid(&params));
        assert_eq!(validate(&params), Err(Inconsistency::RoomBackendRequiresSubject));
    }

    #[test]
    fn whitespace_subject_is_not_empty() {
        let params = RoomParameters::chat_room(Backend::RoomBackend, "  ");
        assert!(is_valid(&params));
    }

    #[test]
    fn chat_internal_check_is_consulted() {
        let mut params = RoomParameters::chat_room(Backend::Basic, "");
        params.enable_encryption(EncryptionBackend::Lime);
        assert_eq!(
            validate(&params),
            Err(Inconsistency::EncryptionRequiresRoomBackend)
        );
    }

    #[test]
    fn display_and_parse() {
        let set = caps(&[Capability::OneToOne, Capability::Basic]);
        assert_eq!(set.to_string(), "basic|one_to_one");
        assert_eq!("basic|one_to_one".parse::<Capabilities>().unwrap(), set);
        assert!("basic|teleport".parse::<Capabilities>().is_err());
        assert!("".parse::<Capabilities>().unwrap().is_empty());
    }
}
