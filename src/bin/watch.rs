//! Follows a chat server's session list from the terminal using the
//! configured live transport.

use anyhow::Context;
use tracing::{info, warn};

use chatline::{
    bus::{Event, EventKind},
    chat::SessionStats,
    client::build_transport,
    config::ClientConfig,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        info!("No .env file found or failed to load: {}", e);
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = ClientConfig::from_env().context("invalid client configuration")?;
    let transport = build_transport(&config).context("failed to build transport")?;
    let events = transport.events();

    events.on(EventKind::Connected, |event| {
        if let Event::Connected { message, .. } = event {
            info!("{}", message);
        }
    });
    events.on(EventKind::SessionsUpdated, |event| {
        if let Event::SessionsUpdated { sessions } = event {
            let stats = SessionStats::count(sessions.iter());
            info!(
                total = stats.total,
                waiting = stats.waiting,
                active = stats.active,
                closed = stats.closed,
                "sessions updated"
            );
        }
    });
    events.on(EventKind::Heartbeat, |_| info!("heartbeat"));
    events.on(EventKind::Error, |event| {
        if let Event::Error { message } = event {
            warn!("{}", message);
        }
    });

    transport.connect();
    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C, disconnecting...");
    transport.disconnect();

    Ok(())
}
