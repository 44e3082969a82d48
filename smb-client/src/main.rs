use std::env;

use smb_client::config::SMBConfig;
use smb_client::connection::SMBConnection;
use smb_client::event::SMBEventBus;
use smb_client::transport::DIRECT_TCP_PORT;
use smb_client::util::auth::AuthContext;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    #[cfg(feature = "tracing")]
    tracing_subscriber::fmt::init();

    let host = env::var("SMB_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port = env::var("SMB_PORT")
        .ok()
        .and_then(|port| port.parse().ok())
        .unwrap_or(DIRECT_TCP_PORT);
    let username = env::var("SMB_USER").unwrap_or_default();
    let password = env::var("SMB_PASSWORD").unwrap_or_default();
    let domain = env::var("SMB_DOMAIN").unwrap_or_default();

    let config = SMBConfig::builder()
        .build()
        .map_err(|e| anyhow::anyhow!("invalid config: {e}"))?;
    let bus = SMBEventBus::new();

    let connection = SMBConnection::connect(&host, port, config, bus).await?;
    let protocol = connection
        .negotiated_protocol()
        .ok_or_else(|| anyhow::anyhow!("connection lost its negotiated state"))?;
    println!(
        "connected to {host}:{port}, dialect {:?}, server {}",
        protocol.dialect(),
        protocol.server_guid()
    );

    let session = connection
        .authenticate(&AuthContext::new(username, password, domain))
        .await?;
    println!("authenticated, session id {:#x}", session.id());

    connection.logoff(&session).await?;
    connection.close(false).await?;
    Ok(())
}
