//! Quick probe for a trust server: opens a room and prints its classification.
//!
//! Usage: trust_probe [server_addr] [local_identity]

use roomtrust_client::TrustClient;
use roomtrust_core::{Address, ConferenceDescription};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let server = args.next().unwrap_or_else(|| "127.0.0.1:9000".to_string());
    let identity = Address::parse(&args.next().unwrap_or_else(|| "sip:probe@localhost".to_string()))?;

    println!("Connecting to trust server at {server}...");
    let mut client = TrustClient::connect(&server).await?;

    let opened = client
        .open_room(ConferenceDescription::default(), &identity, None)
        .await?;
    println!(
        "Room {} ({}) capabilities: {}",
        opened.room,
        if opened.reused { "reused" } else { "created" },
        opened.capabilities
    );

    let handling = client.classify_message(opened.room).await?;
    println!("Security level: {}", handling.level);
    println!("Messages: {}", serde_json::to_string_pretty(&handling)?);

    client.close_room(opened.room).await?;
    Ok(())
}
