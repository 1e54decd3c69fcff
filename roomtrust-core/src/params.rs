//! Room parameters.
//!
//! A [`RoomParameters`] value is what a requester fills in before a room is
//! looked up or created. Capabilities are always derived from it (see
//! [`crate::capabilities`]) and never stored next to it.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use crate::account::{AccountId, AccountRegistry};
use crate::address::Address;
use crate::error::Inconsistency;

/// Whether a chat room is a two-party exchange or a server-hosted room.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    #[default]
    Basic,
    RoomBackend,
}

impl Backend {
    /// Admin-managed ephemeral messages need a server to enforce them.
    pub fn allows_ephemeral(&self) -> bool {
        matches!(self, Self::RoomBackend)
    }
}

/// End-to-end encryption scheme providing per-device key material.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncryptionBackend {
    #[default]
    None,
    /// X3DH/double-ratchet based per-device sessions.
    Lime,
}

/// Policy for automatic deletion of messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EphemeralMode {
    #[default]
    Disabled,
    AdminManaged,
    DeviceManaged,
}

/// Requested security of the media/chat session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityLevelTarget {
    #[default]
    None,
    PointToPoint,
    EndToEnd,
}

/// Visibility of the participant list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantListType {
    #[default]
    Open,
    Closed,
}

/// How participants reach the focus.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinMode {
    DialIn,
    #[default]
    DialOut,
}

/// Text kept in a canonical form and a display form.
///
/// Setting one form replaces the other; the missing form is derived on read.
/// The display form is the canonical text collapsed onto one line.
#[derive(Debug, Clone, Default)]
pub struct RoomText {
    canonical: Option<String>,
    display: Option<String>,
}

impl RoomText {
    pub fn new(canonical: impl Into<String>) -> Self {
        Self {
            canonical: Some(canonical.into()),
            display: None,
        }
    }

    pub fn set_canonical(&mut self, text: impl Into<String>) {
        self.canonical = Some(text.into());
        self.display = None;
    }

    pub fn set_display(&mut self, text: impl Into<String>) {
        self.display = Some(text.into());
        self.canonical = None;
    }

    pub fn canonical(&self) -> Cow<'_, str> {
        match (&self.canonical, &self.display) {
            (Some(text), _) => Cow::Borrowed(text),
            (None, Some(text)) => Cow::Borrowed(text),
            (None, None) => Cow::Borrowed(""),
        }
    }

    pub fn display(&self) -> Cow<'_, str> {
        match (&self.display, &self.canonical) {
            (Some(text), _) => Cow::Borrowed(text),
            (None, Some(text)) => Cow::Owned(collapse_whitespace(text)),
            (None, None) => Cow::Borrowed(""),
        }
    }

    /// Whether the canonical text has no characters. Whitespace counts.
    pub fn is_empty(&self) -> bool {
        self.canonical().is_empty()
    }
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

impl PartialEq for RoomText {
    fn eq(&self, other: &Self) -> bool {
        self.canonical() == other.canonical()
    }
}

impl Eq for RoomText {}

impl From<String> for RoomText {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for RoomText {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<RoomText> for String {
    fn from(value: RoomText) -> Self {
        value.canonical().into_owned()
    }
}

impl Serialize for RoomText {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.canonical())
    }
}

impl<'de> Deserialize<'de> for RoomText {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self::new)
    }
}

/// Chat-specific parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatParams {
    pub backend: Backend,
    pub encryption_backend: EncryptionBackend,
    pub ephemeral_mode: EphemeralMode,
    /// Message lifetime in seconds; 0 disables expiry.
    pub ephemeral_lifetime: i64,
    pub real_time_text: bool,
}

impl ChatParams {
    /// Internal consistency of the chat parameters alone.
    pub fn validate(&self) -> Result<(), Inconsistency> {
        if self.backend == Backend::Basic {
            if self.encryption_backend != EncryptionBackend::None {
                return Err(Inconsistency::EncryptionRequiresRoomBackend);
            }
            if self.ephemeral_mode == EphemeralMode::AdminManaged {
                return Err(Inconsistency::AdminEphemeralRequiresRoomBackend);
            }
        }
        if self.ephemeral_lifetime < 0 {
            return Err(Inconsistency::NegativeEphemeralLifetime);
        }
        Ok(())
    }
}

/// Parameters describing a conference or chat room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomParameters {
    pub audio_enabled: bool,
    pub video_enabled: bool,
    pub chat_enabled: bool,
    /// Whether the local user takes part in the conference it hosts.
    pub local_participant_enabled: bool,
    pub participant_list: ParticipantListType,
    pub join_mode: JoinMode,
    pub group: bool,
    pub encryption_requested: bool,
    pub security_level: SecurityLevelTarget,
    pub subject: RoomText,
    pub description: RoomText,
    pub chat: ChatParams,
    /// Owning account, resolved through an [`AccountRegistry`].
    pub account: Option<AccountId>,
    /// Local identity, synced from the owning account.
    pub identity: Option<Address>,
    pub conference_address: Option<Address>,
    pub factory_address: Option<Address>,
}

impl Default for RoomParameters {
    fn default() -> Self {
        Self {
            audio_enabled: false,
            video_enabled: false,
            chat_enabled: false,
            local_participant_enabled: true,
            participant_list: ParticipantListType::default(),
            join_mode: JoinMode::default(),
            group: false,
            encryption_requested: false,
            security_level: SecurityLevelTarget::default(),
            subject: RoomText::default(),
            description: RoomText::default(),
            chat: ChatParams::default(),
            account: None,
            identity: None,
            conference_address: None,
            factory_address: None,
        }
    }
}

impl RoomParameters {
    /// A chat room on the given backend.
    pub fn chat_room(backend: Backend, subject: impl Into<String>) -> Self {
        Self {
            chat_enabled: true,
            subject: RoomText::new(subject),
            chat: ChatParams {
                backend,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// An audio(/video) conference.
    pub fn audio_conference(subject: impl Into<String>, video: bool) -> Self {
        Self {
            audio_enabled: true,
            video_enabled: video,
            subject: RoomText::new(subject),
            ..Default::default()
        }
    }

    pub fn backend(&self) -> Backend {
        self.chat.backend
    }

    /// End-to-end encryption requested with a usable scheme.
    pub fn is_encrypted(&self) -> bool {
        self.encryption_requested && self.chat.encryption_backend != EncryptionBackend::None
    }

    /// Enable end-to-end encryption with the given scheme.
    pub fn enable_encryption(&mut self, backend: EncryptionBackend) {
        self.encryption_requested = backend != EncryptionBackend::None;
        self.chat.encryption_backend = backend;
        self.security_level = if self.encryption_requested {
            SecurityLevelTarget::EndToEnd
        } else {
            SecurityLevelTarget::None
        };
    }

    /// Re-sync the identity and default factory address from the owning account.
    ///
    /// Returns `false` when no account is set or it is no longer registered;
    /// the parameters are left untouched in that case.
    pub fn sync_from_account(&mut self, accounts: &AccountRegistry) -> bool {
        let Some(account) = self.account.and_then(|id| accounts.get(id)) else {
            tracing::debug!(account = ?self.account, "no account to sync room parameters from");
            return false;
        };
        self.identity = Some(account.identity.clone());
        if let Some(factory) = &account.conference_factory {
            self.factory_address = Some(factory.clone());
        }
        true
    }
}
