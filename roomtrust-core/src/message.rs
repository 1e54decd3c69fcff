//! Wire messages exchanged between the trust server and its clients.
//!
//! Every message is a JSON object carrying a `type` tag next to the envelope
//! fields. Framing (4-byte big-endian length prefix) is done by the transport.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::address::Address;
use crate::aggregator::MessageHandling;
use crate::capabilities::Capabilities;
use crate::events::{RoomSecurityEvent, TrustEvent};
use crate::matcher::ConferenceDescription;
use crate::trust::{RoomId, RoomSecurityLevel};

/// Operation requested by a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RequestBody {
    /// Reuse a matching room or create a new one.
    OpenRoom {
        wanted: ConferenceDescription,
        local_identity: Address,
        /// `None` lets the server ask its key-exchange engine.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        encryption_active: Option<bool>,
    },
    CloseRoom {
        room: RoomId,
    },
    Event {
        room: RoomId,
        event: TrustEvent,
    },
    SecurityLevel {
        room: RoomId,
    },
    ClassifyMessage {
        room: RoomId,
    },
}

/// Server reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseBody {
    RoomOpened {
        room: RoomId,
        /// An existing room matched the request.
        reused: bool,
        capabilities: Capabilities,
        level: RoomSecurityLevel,
    },
    RoomClosed {
        room: RoomId,
        existed: bool,
    },
    /// Level after an event and every alert it raised.
    Events {
        level: RoomSecurityLevel,
        events: Vec<RoomSecurityEvent>,
    },
    Level {
        level: RoomSecurityLevel,
    },
    MessageHandling {
        handling: MessageHandling,
    },
    Error {
        message: String,
    },
}

/// Client request envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub protocol_version: String,
    pub message_id: Uuid,
    #[serde(flatten)]
    pub body: RequestBody,
}

impl Request {
    pub fn new(body: RequestBody) -> Self {
        Self {
            protocol_version: crate::PROTOCOL_VERSION.to_string(),
            message_id: Uuid::new_v4(),
            body,
        }
    }
}

/// Server response envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub message_id: Uuid,
    /// `None` when the request could not be parsed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_response_to: Option<Uuid>,
    #[serde(flatten)]
    pub body: ResponseBody,
}

impl Response {
    /// Create a response to a request.
    pub fn to_request(request: &Request, body: ResponseBody) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            in_response_to: Some(request.message_id),
            body,
        }
    }

    pub fn error(in_response_to: Option<Uuid>, message: impl Into<String>) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            in_response_to,
            body: ResponseBody::Error {
                message: message.into(),
            },
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.body, ResponseBody::Error { .. })
    }
}
