//! Participant information: role, join sequence and custom parameters.
//!
//! Member parameters travel as `name=value` pairs joined with `;`. Two
//! reserved names ([`keys::SEQUENCE`] and [`keys::ROLE`]) are lifted into typed
//! fields on write and re-injected by [`ParticipantInfo::all_parameters`].
//!
//! Escaping: `%` and `;` are percent-encoded in names and values, `=` only in
//! names. Values may keep a raw `=` since a pair splits on its first `=`.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::error::{RoomTrustError, RoomTrustResult};

/// Reserved member-parameter names.
pub mod keys {
    /// Join sequence number of the participant.
    pub const SEQUENCE: &str = "sequence";
    /// Role of the participant.
    pub const ROLE: &str = "role";
}

/// Role of a participant in a conference.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    Unknown,
    Speaker,
    Listener,
}

const ROLE_NAMES: [(&str, Role); 2] = [("speaker", Role::Speaker), ("listener", Role::Listener)];

impl Role {
    /// Map wire text to a role. Unrecognized text is `Unknown`.
    pub fn from_wire(text: &str) -> Self {
        ROLE_NAMES
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(text.trim()))
            .map(|(_, role)| *role)
            .unwrap_or(Role::Unknown)
    }

    pub fn as_wire(&self) -> &'static str {
        ROLE_NAMES
            .iter()
            .find(|(_, role)| role == self)
            .map(|(name, _)| *name)
            .unwrap_or("unknown")
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

/// Information about one participant of a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantInfo {
    address: Address,
    role: Role,
    sequence: Option<u32>,
    external_id: Option<String>,
    parameters: BTreeMap<String, String>,
}

impl ParticipantInfo {
    /// Create participant info; the GRUU is stripped from `address`.
    pub fn new(address: &Address) -> Self {
        Self {
            address: address.without_gruu(),
            role: Role::Unknown,
            sequence: None,
            external_id: None,
            parameters: BTreeMap::new(),
        }
    }

    /// Rebuild participant info from its wire parameters.
    pub fn from_wire(address: &Address, parameters: &str) -> RoomTrustResult<Self> {
        let mut info = Self::new(address);
        for (name, value) in string_to_member_parameters(parameters) {
            info.add_parameter(&name, &value)?;
        }
        Ok(info)
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn set_role(&mut self, role: Role) {
        self.role = role;
    }

    pub fn sequence(&self) -> Option<u32> {
        self.sequence
    }

    pub fn set_sequence(&mut self, sequence: Option<u32>) {
        self.sequence = sequence;
    }

    /// Opaque identifier assigned by an external conference directory.
    pub fn external_id(&self) -> Option<&str> {
        self.external_id.as_deref()
    }

    pub fn set_external_id(&mut self, id: Option<String>) {
        self.external_id = id;
    }

    /// Add a member parameter.
    ///
    /// The sequence key must carry an integer (negative means unset); the role
    /// key never fails. Other names overwrite any previous value.
    pub fn add_parameter(&mut self, name: &str, value: &str) -> RoomTrustResult<()> {
        match name {
            keys::SEQUENCE => {
                let parsed: i64 =
                    value
                        .trim()
                        .parse()
                        .map_err(|_| RoomTrustError::InvalidParameter {
                            name: name.to_string(),
                            reason: format!("{value:?} is not an integer"),
                        })?;
                self.sequence = if parsed < 0 {
                    None
                } else {
                    Some(u32::try_from(parsed).map_err(|_| RoomTrustError::InvalidParameter {
                        name: name.to_string(),
                        reason: format!("{parsed} is out of range"),
                    })?)
                };
            }
            keys::ROLE => self.role = Role::from_wire(value),
            _ => {
                self.parameters.insert(name.to_string(), value.to_string());
            }
        }
        Ok(())
    }

    /// Value of a member parameter, reserved names included.
    pub fn parameter_value(&self, name: &str) -> Option<String> {
        let value = match name {
            keys::SEQUENCE => self.sequence.map(|s| s.to_string()),
            keys::ROLE => (self.role != Role::Unknown).then(|| self.role.as_wire().to_string()),
            _ => self.parameters.get(name).cloned(),
        };
        if value.is_none() {
            tracing::debug!(participant = %self.address, name, "member parameter not found");
        }
        value
    }

    /// Whether a custom parameter named `name` is present.
    pub fn has_parameter(&self, name: &str) -> bool {
        self.parameters.contains_key(name)
    }

    pub fn remove_parameter(&mut self, name: &str) -> Option<String> {
        self.parameters.remove(name)
    }

    /// Custom parameters plus the reserved ones when set.
    pub fn all_parameters(&self) -> BTreeMap<String, String> {
        let mut all = self.parameters.clone();
        if let Some(sequence) = self.sequence {
            all.insert(keys::SEQUENCE.to_string(), sequence.to_string());
        }
        if self.role != Role::Unknown {
            all.insert(keys::ROLE.to_string(), self.role.as_wire().to_string());
        }
        all
    }

    /// Serialized member parameters.
    pub fn to_wire(&self) -> String {
        member_parameters_to_string(&self.all_parameters())
    }
}

fn escape(raw: &str, escape_equals: bool) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '%' => out.push_str("%25"),
            ';' => out.push_str("%3B"),
            '=' if escape_equals => out.push_str("%3D"),
            _ => out.push(c),
        }
    }
    out
}

fn unescape(encoded: &str) -> String {
    let mut out = String::with_capacity(encoded.len());
    let mut rest = encoded;
    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        let decoded = match tail.get(1..3).map(str::to_ascii_uppercase).as_deref() {
            Some("25") => Some('%'),
            Some("3B") => Some(';'),
            Some("3D") => Some('='),
            _ => None,
        };
        match decoded {
            Some(c) => {
                out.push(c);
                rest = &tail[3..];
            }
            None => {
                out.push('%');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Encode member parameters as `name=value;name=value`.
pub fn member_parameters_to_string(parameters: &BTreeMap<String, String>) -> String {
    parameters
        .iter()
        .map(|(name, value)| format!("{}={}", escape(name, true), escape(value, false)))
        .collect::<Vec<_>>()
        .join(";")
}

/// Decode member parameters. A pair without `=` gets an empty value.
pub fn string_to_member_parameters(encoded: &str) -> BTreeMap<String, String> {
    encoded
        .split(';')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((name, value)) => (unescape(name), unescape(value)),
            None => (unescape(pair), String::new()),
        })
        .collect()
}

/// Participants of one room, keyed by canonical address.
#[derive(Debug, Clone, Default)]
pub struct ParticipantInfoRegistry {
    participants: HashMap<String, ParticipantInfo>,
    next_sequence: u32,
}

impl ParticipantInfoRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a participant, replacing the entry for the same address.
    pub fn add(&mut self, info: ParticipantInfo) -> Option<ParticipantInfo> {
        if let Some(sequence) = info.sequence {
            self.next_sequence = self.next_sequence.max(sequence.saturating_add(1));
        }
        self.participants.insert(info.address.canonical(), info)
    }

    /// Register a joining participant, assigning the next join sequence number
    /// unless it already has one.
    pub fn join(&mut self, address: &Address) -> &mut ParticipantInfo {
        let key = address.without_gruu().canonical();
        let next = &mut self.next_sequence;
        let info = self
            .participants
            .entry(key)
            .or_insert_with(|| ParticipantInfo::new(address));
        if info.sequence.is_none() {
            info.sequence = Some(*next);
            *next = next.saturating_add(1);
        }
        info
    }

    pub fn find(&self, address: &Address) -> Option<&ParticipantInfo> {
        self.participants.get(&address.without_gruu().canonical())
    }

    pub fn find_mut(&mut self, address: &Address) -> Option<&mut ParticipantInfo> {
        self.participants.get_mut(&address.without_gruu().canonical())
    }

    pub fn remove(&mut self, address: &Address) -> Option<ParticipantInfo> {
        self.participants.remove(&address.without_gruu().canonical())
    }

    /// Update a participant's role. Returns `false` if unknown.
    pub fn set_role(&mut self, address: &Address, role: Role) -> bool {
        match self.find_mut(address) {
            Some(info) => {
                info.set_role(role);
                true
            }
            None => false,
        }
    }

    pub fn addresses(&self) -> Vec<Address> {
        self.participants.values().map(|p| p.address.clone()).collect()
    }

    /// Participants ordered by join sequence (unset last).
    pub fn by_sequence(&self) -> Vec<&ParticipantInfo> {
        let mut all: Vec<&ParticipantInfo> = self.participants.values().collect();
        all.sort_by_key(|p| (p.sequence.is_none(), p.sequence));
        all
    }

    /// Wire parameters of every participant, keyed by canonical address.
    pub fn to_wire(&self) -> BTreeMap<String, String> {
        self.participants
            .iter()
            .map(|(key, info)| (key.clone(), info.to_wire()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }
}
