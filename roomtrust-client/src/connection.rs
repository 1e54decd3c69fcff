//! TCP/TLS connection to the trust server.

use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use roomtrust_core::{Request, Response, RoomTrustError, RoomTrustResult};

/// Client connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Server address.
    pub server_addr: SocketAddr,
    /// Server hostname for TLS (if different from IP).
    pub server_name: Option<String>,
    /// Whether to use TLS.
    pub use_tls: bool,
    /// CA certificate (PEM) trusted for the server certificate.
    pub ca_cert_path: Option<PathBuf>,
    /// Max message size.
    pub max_message_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::from(([127, 0, 0, 1], 9000)),
            server_name: None,
            use_tls: false,
            ca_cert_path: None,
            max_message_size: 1024 * 1024,
        }
    }
}

impl ConnectionConfig {
    /// Create config for plaintext connection.
    pub fn plaintext(addr: SocketAddr) -> Self {
        Self {
            server_addr: addr,
            use_tls: false,
            ..Default::default()
        }
    }

    /// Create config for TLS connection.
    pub fn tls(addr: SocketAddr, server_name: impl Into<String>, ca_cert_path: PathBuf) -> Self {
        Self {
            server_addr: addr,
            server_name: Some(server_name.into()),
            use_tls: true,
            ca_cert_path: Some(ca_cert_path),
            ..Default::default()
        }
    }
}

/// Connection to the trust server.
pub enum Connection {
    Tcp(TcpStream),
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl Connection {
    /// Connect to server.
    pub async fn connect(config: &ConnectionConfig) -> RoomTrustResult<Self> {
        let stream = TcpStream::connect(&config.server_addr)
            .await
            .map_err(|e| RoomTrustError::Transport(format!("connection failed: {e}")))?;

        if !config.use_tls {
            return Ok(Self::Tcp(stream));
        }

        let connector = Self::create_tls_connector(config)?;
        let server_name: ServerName<'static> = config
            .server_name
            .clone()
            .unwrap_or_else(|| "localhost".to_string())
            .try_into()
            .map_err(|_| RoomTrustError::Transport("invalid server name".to_string()))?;

        let tls_stream = connector
            .connect(server_name, stream)
            .await
            .map_err(|e| RoomTrustError::Transport(format!("TLS handshake failed: {e}")))?;

        Ok(Self::Tls(Box::new(tls_stream)))
    }

    /// Create TLS connector trusting the configured CA.
    fn create_tls_connector(config: &ConnectionConfig) -> RoomTrustResult<TlsConnector> {
        let mut root_store = rustls::RootCertStore::empty();
        if let Some(path) = &config.ca_cert_path {
            let file = File::open(path)
                .map_err(|e| RoomTrustError::Transport(format!("failed to open CA cert: {e}")))?;
            for cert in rustls_pemfile::certs(&mut BufReader::new(file)) {
                let cert = cert
                    .map_err(|e| RoomTrustError::Transport(format!("failed to read CA cert: {e}")))?;
                root_store
                    .add(cert)
                    .map_err(|e| RoomTrustError::Transport(format!("bad CA cert: {e}")))?;
            }
        }
        if root_store.is_empty() {
            tracing::warn!("no trusted CA configured, TLS handshake will fail");
        }

        let tls = rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();

        Ok(TlsConnector::from(Arc::new(tls)))
    }

    /// Send a request and receive response.
    pub async fn send_request(
        &mut self,
        request: &Request,
        max_message_size: usize,
    ) -> RoomTrustResult<Response> {
        match self {
            Self::Tcp(stream) => send_recv(stream, request, max_message_size).await,
            Self::Tls(stream) => send_recv(stream.as_mut(), request, max_message_size).await,
        }
    }
}

/// Send a request and read its response on `stream`.
pub(crate) async fn send_recv<S>(
    stream: &mut S,
    request: &Request,
    max_message_size: usize,
) -> RoomTrustResult<Response>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let json = serde_json::to_vec(request)?;
    let len = u32::try_from(json.len())
        .map_err(|_| RoomTrustError::Protocol("request too large".to_string()))?;

    stream
        .write_all(&len.to_be_bytes())
        .await
        .map_err(|e| RoomTrustError::Transport(format!("write error: {e}")))?;
    stream
        .write_all(&json)
        .await
        .map_err(|e| RoomTrustError::Transport(format!("write error: {e}")))?;
    stream
        .flush()
        .await
        .map_err(|e| RoomTrustError::Transport(format!("flush error: {e}")))?;

    let mut len_buf = [0u8; 4];
    stream
        .read_exact(&mut len_buf)
        .await
        .map_err(|e| RoomTrustError::Transport(format!("read error: {e}")))?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > max_message_size {
        return Err(RoomTrustError::Protocol(format!(
            "response too large: {len} > {max_message_size}"
        )));
    }

    let mut body = vec![0u8; len];
    stream
        .read_exact(&mut body)
        .await
        .map_err(|e| RoomTrustError::Transport(format!("read error: {e}")))?;

    Ok(serde_json::from_slice(&body)?)
}
