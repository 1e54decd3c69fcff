//! RoomTrust server - serves room lookup and device trust classification over
//! framed JSON.

mod catalog;
mod config;
mod engine;
mod handler;

pub use catalog::{Room, RoomCatalog};
pub use config::{ServerConfig, TlsConfig};
pub use engine::{Engine, EngineHandle};
pub use handler::Server;

use std::net::SocketAddr;
use std::path::PathBuf;

use roomtrust_core::{RoomTrustError, RoomTrustResult};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> RoomTrustResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut config = ServerConfig::from_env()?;

    // Usage: roomtrust-server [bind_addr] [cert.pem key.pem]
    let args: Vec<String> = std::env::args().skip(1).collect();
    if let Some(addr) = args.first() {
        config.bind_addr = addr
            .parse::<SocketAddr>()
            .map_err(|e| RoomTrustError::InvalidParameter {
                name: "bind_addr".to_string(),
                reason: e.to_string(),
            })?;
    }
    if let [_, cert, key] = args.as_slice() {
        config = config.with_tls(PathBuf::from(cert), PathBuf::from(key));
    }

    tracing::info!(
        addr = %config.bind_addr,
        store = ?config.store_path,
        policy = ?config.policy,
        "starting trust server"
    );

    let (engine, _engine_task) = Engine::new(&config).spawn(config.engine_buffer);
    let server = Server::new(config, engine)?;
    server.run().await
}
