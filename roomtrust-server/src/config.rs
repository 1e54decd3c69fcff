//! Server configuration for the trust engine.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use roomtrust_core::{RoomTrustError, RoomTrustResult, TrustPolicy};

pub const ENV_BIND: &str = "ROOMTRUST_BIND";
pub const ENV_STORE: &str = "ROOMTRUST_STORE";
pub const ENV_MAX_DEVICES: &str = "ROOMTRUST_MAX_DEVICES";
pub const ENV_ALLOW_UNSAFE_MESSAGES: &str = "ROOMTRUST_ALLOW_UNSAFE_MESSAGES";
pub const ENV_UNSAFE_ON_REJECT: &str = "ROOMTRUST_UNSAFE_ON_REJECT";

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Trust policy handed to the aggregator.
    pub policy: TrustPolicy,
    /// Trust store file; records are kept in memory when unset.
    pub store_path: Option<PathBuf>,
    /// TLS configuration (plain TCP when unset).
    pub tls: Option<TlsConfig>,
    /// Read timeout for connections.
    pub read_timeout: Duration,
    /// Write timeout for connections.
    pub write_timeout: Duration,
    /// Max message size in bytes.
    pub max_message_size: usize,
    /// Engine mailbox size.
    pub engine_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 9000)),
            policy: TrustPolicy::default(),
            store_path: None,
            tls: None,
            read_timeout: Duration::from_secs(30),
            write_timeout: Duration::from_secs(30),
            max_message_size: 1024 * 1024, // 1MB
            engine_buffer: 256,
        }
    }
}

impl ServerConfig {
    /// Create a new config with custom bind address.
    pub fn with_addr(addr: impl Into<SocketAddr>) -> Self {
        Self {
            bind_addr: addr.into(),
            ..Default::default()
        }
    }

    /// Enable TLS with certificate and key files.
    pub fn with_tls(mut self, cert_path: PathBuf, key_path: PathBuf) -> Self {
        self.tls = Some(TlsConfig {
            cert_path,
            key_path,
        });
        self
    }

    pub fn with_policy(mut self, policy: TrustPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Persist trust records to `path`.
    pub fn with_store(mut self, path: impl Into<PathBuf>) -> Self {
        self.store_path = Some(path.into());
        self
    }

    /// Build a config from `ROOMTRUST_*` environment variables on top of the
    /// defaults.
    pub fn from_env() -> RoomTrustResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> RoomTrustResult<Self> {
        let mut config = Self::default();

        if let Some(addr) = lookup(ENV_BIND) {
            config.bind_addr = parse_var(ENV_BIND, &addr)?;
        }
        if let Some(path) = lookup(ENV_STORE).filter(|p| !p.is_empty()) {
            config.store_path = Some(PathBuf::from(path));
        }
        if let Some(max) = lookup(ENV_MAX_DEVICES) {
            config.policy.max_devices_per_participant = parse_var(ENV_MAX_DEVICES, &max)?;
        }
        if let Some(flag) = lookup(ENV_ALLOW_UNSAFE_MESSAGES) {
            config.policy.allow_message_in_unsafe_room = parse_flag(ENV_ALLOW_UNSAFE_MESSAGES, &flag)?;
        }
        if let Some(flag) = lookup(ENV_UNSAFE_ON_REJECT) {
            config.policy.unsafe_if_verification_rejected = parse_flag(ENV_UNSAFE_ON_REJECT, &flag)?;
        }

        Ok(config)
    }
}

fn parse_var<T>(name: &str, value: &str) -> RoomTrustResult<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| RoomTrustError::InvalidParameter {
            name: name.to_string(),
            reason: e.to_string(),
        })
}

fn parse_flag(name: &str, value: &str) -> RoomTrustResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(RoomTrustError::InvalidParameter {
            name: name.to_string(),
            reason: format!("expected a boolean, got {other:?}"),
        }),
    }
}

/// TLS configuration.
#[derive(Debug, Clone)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: PathBuf,
    /// Path to private key file (PEM).
    pub key_path: PathBuf,
}
