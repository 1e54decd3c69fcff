//! TCP/TLS connection handler for the trust server.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;

use roomtrust_core::{Request, Response, RoomTrustError, RoomTrustResult};

use crate::config::{ServerConfig, TlsConfig};
use crate::engine::EngineHandle;

/// Trust server: accepts connections and forwards requests to the engine.
pub struct Server {
    config: ServerConfig,
    engine: EngineHandle,
    tls_acceptor: Option<TlsAcceptor>,
}

impl Server {
    /// Create a new server.
    pub fn new(config: ServerConfig, engine: EngineHandle) -> RoomTrustResult<Self> {
        let tls_acceptor = match &config.tls {
            Some(tls_config) => Some(Self::create_tls_acceptor(tls_config)?),
            None => None,
        };

        Ok(Self {
            config,
            engine,
            tls_acceptor,
        })
    }

    /// Create TLS acceptor from config.
    fn create_tls_acceptor(tls_config: &TlsConfig) -> RoomTrustResult<TlsAcceptor> {
        use rustls_pemfile::{certs, private_key};
        use std::fs::File;
        use std::io::BufReader;

        let cert_file = File::open(&tls_config.cert_path)
            .map_err(|e| RoomTrustError::Transport(format!("failed to open cert: {e}")))?;
        let key_file = File::open(&tls_config.key_path)
            .map_err(|e| RoomTrustError::Transport(format!("failed to open key: {e}")))?;

        let certs = certs(&mut BufReader::new(cert_file))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| RoomTrustError::Transport(format!("failed to read cert: {e}")))?;

        let key = private_key(&mut BufReader::new(key_file))
            .map_err(|e| RoomTrustError::Transport(format!("failed to read key: {e}")))?
            .ok_or_else(|| RoomTrustError::Transport("no private key found".to_string()))?;

        let config = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| RoomTrustError::Transport(format!("TLS config error: {e}")))?;

        Ok(TlsAcceptor::from(Arc::new(config)))
    }

    /// Run the server.
    pub async fn run(self) -> RoomTrustResult<()> {
        let listener = TcpListener::bind(&self.config.bind_addr)
            .await
            .map_err(|e| RoomTrustError::Transport(format!("failed to bind: {e}")))?;

        tracing::info!(addr = %self.config.bind_addr, tls = self.tls_acceptor.is_some(), "trust server listening");

        loop {
            let (stream, addr) = listener
                .accept()
                .await
                .map_err(|e| RoomTrustError::Transport(format!("accept failed: {e}")))?;

            tracing::debug!(%addr, "connection accepted");

            let config = self.config.clone();
            let engine = self.engine.clone();
            let tls_acceptor = self.tls_acceptor.clone();

            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, config, engine, tls_acceptor).await {
                    tracing::error!(%addr, error = %e, "connection error");
                }
            });
        }
    }

    /// Handle a single connection.
    async fn handle_connection(
        stream: TcpStream,
        config: ServerConfig,
        engine: EngineHandle,
        tls_acceptor: Option<TlsAcceptor>,
    ) -> RoomTrustResult<()> {
        if let Some(acceptor) = tls_acceptor {
            let tls_stream = acceptor
                .accept(stream)
                .await
                .map_err(|e| RoomTrustError::Transport(format!("TLS handshake failed: {e}")))?;
            handle_stream(tls_stream, &config, &engine).await
        } else {
            handle_stream(stream, &config, &engine).await
        }
    }
}

/// Serve framed requests on `stream` until the peer disconnects.
pub async fn handle_stream<S>(
    mut stream: S,
    config: &ServerConfig,
    engine: &EngineHandle,
) -> RoomTrustResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let Some(frame) = read_frame(&mut stream, config).await? else {
            tracing::debug!("client disconnected");
            return Ok(());
        };

        let response = match serde_json::from_slice::<Request>(&frame) {
            Ok(request) => {
                tracing::debug!(message_id = %request.message_id, "request received");
                engine.request(request).await?
            }
            Err(e) => {
                tracing::warn!(error = %e, "malformed request");
                Response::error(None, format!("malformed request: {e}"))
            }
        };

        send_response(&mut stream, &response, config.write_timeout).await?;
    }
}

/// Read one length-prefixed frame. `None` on a clean disconnect.
async fn read_frame<S>(stream: &mut S, config: &ServerConfig) -> RoomTrustResult<Option<Vec<u8>>>
where
    S: AsyncRead + Unpin,
{
    let mut prefix = [0u8; 4];
    match tokio::time::timeout(config.read_timeout, stream.read_exact(&mut prefix)).await {
        Err(_) => return Err(RoomTrustError::Transport("read timed out".to_string())),
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Ok(Err(e)) => return Err(RoomTrustError::Transport(format!("read error: {e}"))),
        Ok(Ok(_)) => {}
    }

    let len = u32::from_be_bytes(prefix) as usize;
    if len > config.max_message_size {
        return Err(RoomTrustError::Protocol(format!(
            "message too large: {} > {}",
            len, config.max_message_size
        )));
    }

    let mut body = vec![0u8; len];
    tokio::time::timeout(config.read_timeout, stream.read_exact(&mut body))
        .await
        .map_err(|_| RoomTrustError::Transport("read timed out".to_string()))?
        .map_err(|e| RoomTrustError::Transport(format!("read error: {e}")))?;
    Ok(Some(body))
}

/// Send a response message.
async fn send_response<S>(stream: &mut S, response: &Response, timeout: Duration) -> RoomTrustResult<()>
where
    S: AsyncWrite + Unpin,
{
    let json = serde_json::to_vec(response)?;
    let len = u32::try_from(json.len())
        .map_err(|_| RoomTrustError::Protocol("response too large".to_string()))?;

    let write = async {
        stream.write_all(&len.to_be_bytes()).await?;
        stream.write_all(&json).await?;
        stream.flush().await
    };
    tokio::time::timeout(timeout, write)
        .await
        .map_err(|_| RoomTrustError::Transport("write timed out".to_string()))?
        .map_err(|e| RoomTrustError::Transport(format!("write error: {e}")))
}
