//! Client side of live updates: the transports a UI uses to follow the
//! session list without caring which one is delivering.

pub mod api;
pub mod manager;
pub mod polling;
pub mod socket;
pub mod sse;

use std::sync::Arc;

use tracing::info;

use crate::{
    bus::{Event, EventBus},
    config::{ClientConfig, TransportStrategy},
    error::TransportError,
};

use api::HttpChatApi;
use manager::TransportManager;
use polling::PollingService;
use socket::SocketTransport;

/// What every live-update strategy offers a consumer.
pub trait LiveTransport: Send + Sync {
    fn connect(&self);
    fn disconnect(&self);
    fn is_connected(&self) -> bool;
    fn events(&self) -> &EventBus;
}

impl LiveTransport for TransportManager {
    fn connect(&self) {
        TransportManager::connect(self)
    }

    fn disconnect(&self) {
        TransportManager::disconnect(self)
    }

    fn is_connected(&self) -> bool {
        TransportManager::is_connected(self)
    }

    fn events(&self) -> &EventBus {
        TransportManager::events(self)
    }
}

impl LiveTransport for SocketTransport {
    fn connect(&self) {
        SocketTransport::connect(self)
    }

    fn disconnect(&self) {
        SocketTransport::disconnect(self)
    }

    fn is_connected(&self) -> bool {
        SocketTransport::is_connected(self)
    }

    fn events(&self) -> &EventBus {
        SocketTransport::events(self)
    }
}

impl LiveTransport for PollingService {
    fn connect(&self) {
        self.start()
    }

    fn disconnect(&self) {
        self.stop_polling();
        self.events().emit(&Event::Disconnected);
    }

    fn is_connected(&self) -> bool {
        self.is_polling()
    }

    fn events(&self) -> &EventBus {
        PollingService::events(self)
    }
}

/// Builds the transport `config` asks for. Nothing connects until
/// [`LiveTransport::connect`] is called.
pub fn build_transport(config: &ClientConfig) -> Result<Arc<dyn LiveTransport>, TransportError> {
    info!(strategy = ?config.strategy, server = %config.server_url, "building live transport");

    let transport: Arc<dyn LiveTransport> = match config.strategy {
        TransportStrategy::Stream => {
            let api = Arc::new(
                HttpChatApi::new(config.server_url.as_str())?
                    .with_session(config.session_id.clone()),
            );
            Arc::new(TransportManager::new(
                api.clone(),
                api,
                config.stream,
                config.poll,
            ))
        }
        TransportStrategy::Socket => Arc::new(SocketTransport::new(
            &config.server_url,
            config.session_id.as_deref(),
            config.socket,
        )?),
        TransportStrategy::Polling => {
            let api = Arc::new(HttpChatApi::new(config.server_url.as_str())?);
            Arc::new(PollingService::new(api, EventBus::new(), config.poll))
        }
    };
    Ok(transport)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventKind;
    use crate::test_helpers::collect_events;

    fn config(strategy: TransportStrategy) -> ClientConfig {
        ClientConfig {
            strategy,
            ..ClientConfig::default()
        }
    }

    #[tokio::test]
    async fn every_strategy_starts_disconnected() {
        for strategy in [
            TransportStrategy::Stream,
            TransportStrategy::Socket,
            TransportStrategy::Polling,
        ] {
            let transport = build_transport(&config(strategy)).unwrap();
            assert!(!transport.is_connected(), "{strategy:?}");
        }
    }

    #[tokio::test]
    async fn polling_transport_reports_disconnect() {
        let transport = build_transport(&config(TransportStrategy::Polling)).unwrap();
        let mut disconnected = collect_events(transport.events(), EventKind::Disconnected);

        transport.connect();
        assert!(transport.is_connected());
        transport.disconnect();
        assert!(!transport.is_connected());
        assert_eq!(disconnected.try_recv(), Ok(Event::Disconnected));
    }

    #[test]
    fn socket_strategy_rejects_bad_server_url() {
        let config = ClientConfig {
            server_url: "mailto:ops@example.com".into(),
            ..config(TransportStrategy::Socket)
        };
        assert!(matches!(
            build_transport(&config),
            Err(TransportError::InvalidUrl(_))
        ));
    }
}
