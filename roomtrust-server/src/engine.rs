//! Trust engine actor.
//!
//! The room catalog and the aggregator are owned by one task; connections talk
//! to it through an [`EngineHandle`]. Every request is processed to completion
//! before the next one is taken from the mailbox, which is the serialization
//! the aggregator relies on.

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use roomtrust_core::{
    DeviceTrustAggregator, FileTrustStore, InMemoryTrustStore, Request, RequestBody, Response,
    ResponseBody, RoomId, RoomSecurityLevel, RoomTrustError, RoomTrustResult, SecurityEvent,
    TrustEvent, TrustStore, PROTOCOL_VERSION,
};

use crate::catalog::RoomCatalog;
use crate::config::ServerConfig;

/// Messages accepted by the engine task.
#[derive(Debug)]
pub enum EngineMessage {
    Request {
        request: Request,
        respond_to: oneshot::Sender<Response>,
    },
    Shutdown,
}

/// Handle to the engine task.
#[derive(Clone)]
pub struct EngineHandle {
    sender: mpsc::Sender<EngineMessage>,
}

impl EngineHandle {
    /// Submit a request and wait for its response.
    pub async fn request(&self, request: Request) -> RoomTrustResult<Response> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(EngineMessage::Request {
                request,
                respond_to: tx,
            })
            .await
            .map_err(|e| RoomTrustError::Transport(format!("engine send failed: {e}")))?;

        rx.await
            .map_err(|e| RoomTrustError::Transport(format!("engine response failed: {e}")))
    }

    /// Ask the engine to stop after the requests already queued.
    pub async fn shutdown(&self) -> RoomTrustResult<()> {
        self.sender
            .send(EngineMessage::Shutdown)
            .await
            .map_err(|e| RoomTrustError::Transport(format!("engine send failed: {e}")))
    }
}

/// Room catalog plus trust aggregator.
pub struct Engine {
    catalog: RoomCatalog,
    aggregator: DeviceTrustAggregator,
}

impl Engine {
    pub fn new(config: &ServerConfig) -> Self {
        let store: Box<dyn TrustStore> = match &config.store_path {
            Some(path) => Box::new(FileTrustStore::open(path)),
            None => Box::new(InMemoryTrustStore::new()),
        };
        Self::with_aggregator(DeviceTrustAggregator::new(config.policy, store))
    }

    /// Use a preconfigured aggregator (key exchange, ceremony collaborators).
    pub fn with_aggregator(aggregator: DeviceTrustAggregator) -> Self {
        Self {
            catalog: RoomCatalog::new(),
            aggregator,
        }
    }

    /// Run the engine on its own task.
    pub fn spawn(self, buffer: usize) -> (EngineHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(buffer);
        let task = tokio::spawn(self.run(receiver));
        (EngineHandle { sender }, task)
    }

    async fn run(mut self, mut receiver: mpsc::Receiver<EngineMessage>) {
        tracing::info!("trust engine started");
        while let Some(message) = receiver.recv().await {
            match message {
                EngineMessage::Request {
                    request,
                    respond_to,
                } => {
                    let response = self.process(&request);
                    if respond_to.send(response).is_err() {
                        tracing::debug!(message_id = %request.message_id, "requester went away");
                    }
                }
                EngineMessage::Shutdown => break,
            }
        }
        tracing::info!(rooms = self.catalog.len(), "trust engine stopped");
    }

    /// Process one request. Failures become error responses.
    pub fn process(&mut self, request: &Request) -> Response {
        if request.protocol_version != PROTOCOL_VERSION {
            return Response::error(
                Some(request.message_id),
                format!("unsupported protocol version {}", request.protocol_version),
            );
        }
        match self.dispatch(&request.body) {
            Ok(body) => Response::to_request(request, body),
            Err(e) => {
                tracing::warn!(message_id = %request.message_id, error = %e, "request failed");
                Response::error(Some(request.message_id), e.to_string())
            }
        }
    }

    fn dispatch(&mut self, body: &RequestBody) -> RoomTrustResult<ResponseBody> {
        match body {
            RequestBody::OpenRoom {
                wanted,
                local_identity,
                encryption_active,
            } => {
                let (room, reused) = self.catalog.open(wanted, local_identity)?;
                let id = room.id();
                let local = room.local().clone();
                let capabilities = room.capabilities().clone();

                if !reused {
                    match encryption_active {
                        Some(active) => self.aggregator.open_room(id, &local, *active),
                        None => self.aggregator.open_room_detect(id, &local),
                    };
                    self.aggregator.subscribe(id, log_alert)?;
                }

                Ok(ResponseBody::RoomOpened {
                    room: id,
                    reused,
                    capabilities,
                    level: self.aggregator.current_security_level(id)?,
                })
            }
            RequestBody::CloseRoom { room } => {
                let existed = self.catalog.close(*room).is_some();
                self.aggregator.close_room(*room);
                Ok(ResponseBody::RoomClosed {
                    room: *room,
                    existed,
                })
            }
            RequestBody::Event { room, event } => {
                if self.catalog.get(*room).is_none() {
                    return Err(RoomTrustError::UnknownRoom(room.0));
                }
                match event {
                    TrustEvent::DeviceAdded { peer, .. }
                    | TrustEvent::KeyMaterialEstablished { peer, .. } => {
                        self.catalog.note_participant(*room, peer)
                    }
                    TrustEvent::ParticipantRemoved { peer } => {
                        self.catalog.remove_participant(*room, peer)
                    }
                    _ => {}
                }
                let events = self.aggregator.handle_event(*room, event.clone())?;
                Ok(ResponseBody::Events {
                    level: self.aggregator.current_security_level(*room)?,
                    events,
                })
            }
            RequestBody::SecurityLevel { room } => Ok(ResponseBody::Level {
                level: self.level(*room)?,
            }),
            RequestBody::ClassifyMessage { room } => Ok(ResponseBody::MessageHandling {
                handling: self.aggregator.classify_message(*room)?,
            }),
        }
    }

    fn level(&self, room: RoomId) -> RoomTrustResult<RoomSecurityLevel> {
        self.aggregator.current_security_level(room)
    }
}

fn log_alert(room: RoomId, event: &SecurityEvent) {
    tracing::warn!(%room, ?event, "security alert");
}

#[cfg(test)]
mod tests {
    use super::*;
    use roomtrust_core::{
        Address, Backend, ConferenceDescription, DeviceId, RoomParameters, RoomSecurityEvent,
    };

    fn addr(s: &str) -> Address {
        Address::parse(s).unwrap()
    }

    fn engine() -> Engine {
        Engine::new(&ServerConfig::default())
    }

    fn open(engine: &mut Engine, local: &str, subject: &str) -> (RoomId, bool) {
        let mut params = RoomParameters::chat_room(Backend::RoomBackend, subject);
        params.group = true;
        let request = Request::new(RequestBody::OpenRoom {
            wanted: ConferenceDescription {
                params: Some(params),
                ..Default::default()
            },
            local_identity: addr(local),
            encryption_active: Some(true),
        });
        match engine.process(&request).body {
            ResponseBody::RoomOpened { room, reused, .. } => (room, reused),
            other => panic!("unexpected response {other:?}"),
        }
    }

    fn event(engine: &mut Engine, room: RoomId, event: TrustEvent) -> (RoomSecurityLevel, Vec<RoomSecurityEvent>) {
        match engine.process(&Request::new(RequestBody::Event { room, event })).body {
            ResponseBody::Events { level, events } => (level, events),
            other => panic!("unexpected response {other:?}"),
        }
    }

    #[test]
    fn open_reuses_room() {
        let mut engine = engine();
        let (room, reused) = open(&mut engine, "sip:alice@example.org", "Team");
        assert!(!reused);
        let (again, reused) = open(&mut engine, "sip:alice@example.org", "Team");
        assert!(reused);
        assert_eq!(again, room);
    }

    #[test]
    fn events_flow_into_aggregator() {
        let mut engine = engine();
        let (room, _) = open(&mut engine, "sip:alice@example.org", "Team");
        let bob = addr("sip:bob@example.org");
        let device = DeviceId::new("urn:uuid:b1");

        let (level, _) = event(
            &mut engine,
            room,
            TrustEvent::KeyMaterialEstablished {
                peer: bob.clone(),
                device: device.clone(),
            },
        );
        assert_eq!(level, RoomSecurityLevel::Encrypted);
        assert_eq!(engine.catalog.get(room).unwrap().registry().len(), 1);

        let (level, events) = event(
            &mut engine,
            room,
            TrustEvent::VerificationResult {
                peer: bob.clone(),
                device,
                valid: false,
            },
        );
        assert_eq!(level, RoomSecurityLevel::Unsafe);
        assert!(matches!(
            events[0].event,
            SecurityEvent::ManInTheMiddleDetected { .. }
        ));

        let handling = match engine
            .process(&Request::new(RequestBody::ClassifyMessage { room }))
            .body
        {
            ResponseBody::MessageHandling { handling } => handling,
            other => panic!("unexpected response {other:?}"),
        };
        assert!(handling.flagged_unsafe);
        assert!(!handling.deliver);

        let (level, _) = event(&mut engine, room, TrustEvent::ParticipantRemoved { peer: bob });
        assert_eq!(level, RoomSecurityLevel::ClearText);
        assert!(engine.catalog.get(room).unwrap().registry().is_empty());
    }

    #[test]
    fn errors_become_responses() {
        let mut engine = engine();
        let unknown = RoomId::new();
        let request = Request::new(RequestBody::SecurityLevel { room: unknown });
        let response = engine.process(&request);
        assert!(response.is_error());
        assert_eq!(response.in_response_to, Some(request.message_id));

        let mut old = Request::new(RequestBody::SecurityLevel { room: unknown });
        old.protocol_version = "0.0".to_string();
        match engine.process(&old).body {
            ResponseBody::Error { message } => assert!(message.contains("0.0")),
            other => panic!("unexpected response {other:?}"),
        }

        let invalid = Request::new(RequestBody::OpenRoom {
            wanted: ConferenceDescription {
                params: Some(RoomParameters::chat_room(Backend::RoomBackend, "")),
                ..Default::default()
            },
            local_identity: addr("sip:alice@example.org"),
            encryption_active: None,
        });
        assert!(engine.process(&invalid).is_error());
    }

    #[test]
    fn close_room() {
        let mut engine = engine();
        let (room, _) = open(&mut engine, "sip:alice@example.org", "Team");
        let close = Request::new(RequestBody::CloseRoom { room });
        assert_eq!(
            engine.process(&close).body,
            ResponseBody::RoomClosed {
                room,
                existed: true
            }
        );
        assert!(engine
            .process(&Request::new(RequestBody::SecurityLevel { room }))
            .is_error());
    }

    #[tokio::test]
    async fn handle_round_trip() {
        let (handle, task) = engine().spawn(8);
        let response = handle
            .request(Request::new(RequestBody::OpenRoom {
                wanted: ConferenceDescription::default(),
                local_identity: addr("sip:alice@example.org"),
                encryption_active: None,
            }))
            .await
            .unwrap();
        match response.body {
            ResponseBody::RoomOpened { reused, level, .. } => {
                assert!(!reused);
                assert_eq!(level, RoomSecurityLevel::ClearText);
            }
            other => panic!("unexpected response {other:?}"),
        }

        handle.shutdown().await.unwrap();
        task.await.unwrap();
        assert!(handle
            .request(Request::new(RequestBody::SecurityLevel { room: RoomId::new() }))
            .await
            .is_err());
    }
}
