//! Participant devices.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::address::Address;

/// Identifier of one device of a peer, usually its GRUU.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Device id of a device address: its GRUU, or the full address when the
    /// device does not advertise one.
    pub fn from_address(address: &Address) -> Self {
        match address.gruu() {
            Some(gruu) => Self(gruu.to_string()),
            None => Self(address.to_string()),
        }
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A device as announced by a participant: address, name and advertised
/// feature versions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantDeviceIdentity {
    address: Address,
    name: String,
    capabilities: BTreeMap<String, String>,
}

impl ParticipantDeviceIdentity {
    pub fn new(address: Address, name: impl Into<String>) -> Self {
        Self {
            address,
            name: name.into(),
            capabilities: BTreeMap::new(),
        }
    }

    /// Build from a comma-separated spec list such as `groupchat/1.2,lime`.
    pub fn from_spec_list(address: Address, name: impl Into<String>, specs: &str) -> Self {
        let mut identity = Self::new(address, name);
        identity.set_spec_list(specs);
        identity
    }

    /// Replace the advertised features. Repeated names keep the last version.
    pub fn set_spec_list(&mut self, specs: &str) {
        self.capabilities = specs
            .split(',')
            .map(str::trim)
            .filter(|spec| !spec.is_empty())
            .map(|spec| match spec.split_once('/') {
                Some((name, version)) => (name.trim().to_string(), version.trim().to_string()),
                None => (spec.to_string(), String::new()),
            })
            .collect();
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn device_id(&self) -> DeviceId {
        DeviceId::from_address(&self.address)
    }

    pub fn has_capability(&self, feature: &str) -> bool {
        self.capabilities.contains_key(feature)
    }

    /// Advertised version; empty when the feature carries no version.
    pub fn capability_version(&self, feature: &str) -> Option<&str> {
        self.capabilities.get(feature).map(String::as_str)
    }

    pub fn capabilities(&self) -> &BTreeMap<String, String> {
        &self.capabilities
    }
}
