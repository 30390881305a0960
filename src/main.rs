//! Sample client: connects, runs a few commands, and exits. Not the crate's
//! product — `lib.rs` is — but a runnable demonstration of `connect` +
//! `execute` against a real server.
use tracing_subscriber::EnvFilter;
use valkey_client::{ConnectionConfig, ManagedConnection};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let endpoint = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:6379".to_string());

    let config = ConnectionConfig {
        endpoints: vec![endpoint.clone()],
        auto_reconnect: true,
        ..ConnectionConfig::default()
    };

    let conn = ManagedConnection::connect(&endpoint, config).await?;
    conn.ping().await?;
    tracing::info!(%endpoint, "connected");

    conn.set(b"greeting", b"hello from valkey-client").await?;
    let value = conn.get(b"greeting").await?;
    tracing::info!(
        value = ?value.map(|b| String::from_utf8_lossy(&b).into_owned()),
        "round trip complete"
    );

    Ok(())
}
