//! SIP address handling.
//!
//! Peers are identified by their *logical* address: the GRUU (`gr` URI
//! parameter) names one device instance and is stripped when comparing
//! identities. [`Address::canonical`] gives the string used as a map key and
//! for strict comparison; [`Address::weak_equal`] ignores every URI parameter.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{RoomTrustError, RoomTrustResult};

/// URI parameter carrying the GRUU.
pub const GRUU_PARAMETER: &str = "gr";

/// A parsed SIP address (`"Alice" <sip:alice@example.org;gr=...>`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    display_name: Option<String>,
    scheme: String,
    user: Option<String>,
    host: String,
    port: Option<u16>,
    params: BTreeMap<String, Option<String>>,
}

impl Address {
    /// Parse an address in name-addr or bare URI form.
    pub fn parse(input: &str) -> RoomTrustResult<Self> {
        let invalid = |reason: &str| RoomTrustError::InvalidAddress {
            input: input.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = input.trim();
        let (display_name, uri) = match trimmed.find('<') {
            Some(open) => {
                let close = trimmed[open..]
                    .find('>')
                    .map(|i| open + i)
                    .ok_or_else(|| invalid("unterminated '<'"))?;
                let name = trimmed[..open].trim().trim_matches('"').trim();
                let name = (!name.is_empty()).then(|| name.to_string());
                (name, &trimmed[open + 1..close])
            }
            None => (None, trimmed),
        };

        let (scheme, rest) = uri.split_once(':').ok_or_else(|| invalid("missing scheme"))?;
        if scheme.is_empty() || !scheme.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(invalid("bad scheme"));
        }

        let mut parts = rest.split(';');
        let authority = parts.next().unwrap_or_default();
        let (user, hostport) = match authority.rsplit_once('@') {
            Some((user, hostport)) if !user.is_empty() => (Some(user.to_string()), hostport),
            Some(_) => return Err(invalid("empty user part")),
            None => (None, authority),
        };
        let (host, port) = split_host_port(hostport).ok_or_else(|| invalid("bad port"))?;
        if host.is_empty() {
            return Err(invalid("missing host"));
        }

        let mut params = BTreeMap::new();
        for param in parts.filter(|p| !p.is_empty()) {
            match param.split_once('=') {
                Some((key, value)) => {
                    params.insert(key.to_ascii_lowercase(), Some(value.to_string()))
                }
                None => params.insert(param.to_ascii_lowercase(), None),
            };
        }

        Ok(Self {
            display_name,
            scheme: scheme.to_ascii_lowercase(),
            user,
            host: host.to_ascii_lowercase(),
            port,
            params,
        })
    }

    /// Display name, if any.
    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Value of a URI parameter. Flag parameters yield `Some("")`.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .get(&name.to_ascii_lowercase())
            .map(|v| v.as_deref().unwrap_or(""))
    }

    /// The GRUU identifying one device instance, if present.
    pub fn gruu(&self) -> Option<&str> {
        self.params
            .get(GRUU_PARAMETER)
            .and_then(|v| v.as_deref())
            .filter(|v| !v.is_empty())
    }

    /// Copy of this address without its GRUU.
    pub fn without_gruu(&self) -> Self {
        let mut stripped = self.clone();
        stripped.params.remove(GRUU_PARAMETER);
        stripped
    }

    /// Canonical form: no display name, no GRUU, parameters in sorted order.
    pub fn canonical(&self) -> String {
        let mut out = self.uri_core();
        for (key, value) in self.params.iter().filter(|(k, _)| *k != GRUU_PARAMETER) {
            push_param(&mut out, key, value.as_deref());
        }
        out
    }

    /// Equality ignoring display name and every URI parameter.
    pub fn weak_equal(&self, other: &Address) -> bool {
        self.scheme == other.scheme
            && self.user == other.user
            && self.host == other.host
            && self.port == other.port
    }

    fn uri_core(&self) -> String {
        let mut out = format!("{}:", self.scheme);
        if let Some(user) = &self.user {
            out.push_str(user);
            out.push('@');
        }
        out.push_str(&self.host);
        if let Some(port) = self.port {
            out.push(':');
            out.push_str(&port.to_string());
        }
        out
    }
}

fn split_host_port(hostport: &str) -> Option<(&str, Option<u16>)> {
    // IPv6 reference: [::1]:5060
    if let Some(end) = hostport.strip_prefix('[').and_then(|_| hostport.find(']')) {
        let host = &hostport[..=end];
        return match &hostport[end + 1..] {
            "" => Some((host, None)),
            rest => rest.strip_prefix(':')?.parse().ok().map(|p| (host, Some(p))),
        };
    }
    match hostport.rsplit_once(':') {
        Some((host, port)) => port.parse().ok().map(|p| (host, Some(p))),
        None => Some((hostport, None)),
    }
}

fn push_param(out: &mut String, key: &str, value: Option<&str>) {
    out.push(';');
    out.push_str(key);
    if let Some(value) = value {
        out.push('=');
        out.push_str(value);
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut uri = self.uri_core();
        for (key, value) in &self.params {
            push_param(&mut uri, key, value.as_deref());
        }
        match &self.display_name {
            Some(name) => write!(f, "\"{name}\" <{uri}>"),
            None => f.write_str(&uri),
        }
    }
}

impl FromStr for Address {
    type Err = RoomTrustError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}
