//! RoomTrust Client SDK - lets key-exchange, ceremony and UI collaborators
//! talk to a trust server.
//!
//! # Example
//!
//! ```no_run
//! use roomtrust_client::TrustClient;
//! use roomtrust_core::{Address, ConferenceDescription, DeviceId, TrustEvent};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = TrustClient::connect("127.0.0.1:9000").await?;
//!
//!     let alice = Address::parse("sip:alice@example.org")?;
//!     let opened = client
//!         .open_room(ConferenceDescription::default(), &alice, Some(true))
//!         .await?;
//!
//!     let outcome = client
//!         .submit_event(
//!             opened.room,
//!             TrustEvent::KeyMaterialEstablished {
//!                 peer: Address::parse("sip:bob@example.org")?,
//!                 device: DeviceId::new("urn:uuid:b1"),
//!             },
//!         )
//!         .await?;
//!     println!("room is now {}", outcome.level);
//!
//!     Ok(())
//! }
//! ```

mod connection;

pub use connection::{Connection, ConnectionConfig};

use std::net::SocketAddr;
use std::path::PathBuf;

use roomtrust_core::{
    Address, Capabilities, ConferenceDescription, MessageHandling, Request, RequestBody, Response,
    ResponseBody, RoomId, RoomSecurityEvent, RoomSecurityLevel, RoomTrustError, RoomTrustResult,
    TrustEvent,
};

/// Result of an `open_room` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenedRoom {
    pub room: RoomId,
    pub reused: bool,
    pub capabilities: Capabilities,
    pub level: RoomSecurityLevel,
}

/// Result of submitting a trust event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventOutcome {
    pub level: RoomSecurityLevel,
    pub events: Vec<RoomSecurityEvent>,
}

/// High-level trust client.
pub struct TrustClient {
    connection: Connection,
    max_message_size: usize,
}

impl TrustClient {
    /// Connect to a trust server (plaintext).
    pub async fn connect(addr: impl AsRef<str>) -> RoomTrustResult<Self> {
        Self::connect_with(&ConnectionConfig::plaintext(parse_addr(addr.as_ref())?)).await
    }

    /// Connect to a trust server with TLS, trusting `ca_cert_path`.
    pub async fn connect_tls(
        addr: impl AsRef<str>,
        server_name: impl Into<String>,
        ca_cert_path: impl Into<PathBuf>,
    ) -> RoomTrustResult<Self> {
        let config =
            ConnectionConfig::tls(parse_addr(addr.as_ref())?, server_name, ca_cert_path.into());
        Self::connect_with(&config).await
    }

    pub async fn connect_with(config: &ConnectionConfig) -> RoomTrustResult<Self> {
        let connection = Connection::connect(config).await?;
        tracing::debug!(addr = %config.server_addr, tls = config.use_tls, "connected to trust server");
        Ok(Self {
            connection,
            max_message_size: config.max_message_size,
        })
    }

    /// Find a reusable room for `wanted` or have the server create one.
    /// `encryption_active: None` lets the server detect it.
    pub async fn open_room(
        &mut self,
        wanted: ConferenceDescription,
        local_identity: &Address,
        encryption_active: Option<bool>,
    ) -> RoomTrustResult<OpenedRoom> {
        let body = self
            .call(RequestBody::OpenRoom {
                wanted,
                local_identity: local_identity.clone(),
                encryption_active,
            })
            .await?;
        match body {
            ResponseBody::RoomOpened {
                room,
                reused,
                capabilities,
                level,
            } => Ok(OpenedRoom {
                room,
                reused,
                capabilities,
                level,
            }),
            other => Err(unexpected(&other)),
        }
    }

    /// Stop tracking a room. Returns whether it was known.
    pub async fn close_room(&mut self, room: RoomId) -> RoomTrustResult<bool> {
        match self.call(RequestBody::CloseRoom { room }).await? {
            ResponseBody::RoomClosed { existed, .. } => Ok(existed),
            other => Err(unexpected(&other)),
        }
    }

    /// Feed one trust event for `room`.
    pub async fn submit_event(
        &mut self,
        room: RoomId,
        event: TrustEvent,
    ) -> RoomTrustResult<EventOutcome> {
        match self.call(RequestBody::Event { room, event }).await? {
            ResponseBody::Events { level, events } => Ok(EventOutcome { level, events }),
            other => Err(unexpected(&other)),
        }
    }

    pub async fn security_level(&mut self, room: RoomId) -> RoomTrustResult<RoomSecurityLevel> {
        match self.call(RequestBody::SecurityLevel { room }).await? {
            ResponseBody::Level { level } => Ok(level),
            other => Err(unexpected(&other)),
        }
    }

    pub async fn classify_message(&mut self, room: RoomId) -> RoomTrustResult<MessageHandling> {
        match self.call(RequestBody::ClassifyMessage { room }).await? {
            ResponseBody::MessageHandling { handling } => Ok(handling),
            other => Err(unexpected(&other)),
        }
    }

    async fn call(&mut self, body: RequestBody) -> RoomTrustResult<ResponseBody> {
        let request = Request::new(body);
        let response = self
            .connection
            .send_request(&request, self.max_message_size)
            .await?;
        check_response(&request, response)
    }
}

fn parse_addr(addr: &str) -> RoomTrustResult<SocketAddr> {
    addr.parse()
        .map_err(|e| RoomTrustError::Transport(format!("invalid address: {e}")))
}

/// Unwrap the body of a response to `request`.
fn check_response(request: &Request, response: Response) -> RoomTrustResult<ResponseBody> {
    if response.in_response_to != Some(request.message_id) {
        return Err(RoomTrustError::Protocol(format!(
            "response does not answer request {}",
            request.message_id
        )));
    }
    match response.body {
        ResponseBody::Error { message } => Err(RoomTrustError::Protocol(message)),
        body => Ok(body),
    }
}

fn unexpected(body: &ResponseBody) -> RoomTrustError {
    RoomTrustError::Protocol(format!("unexpected response {body:?}"))
}
