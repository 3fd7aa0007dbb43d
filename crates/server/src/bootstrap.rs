use std::sync::Arc;

use steamguard_core::config::{AppConfig, ConfigError};
use steamguard_core::BotIdentity;
use steamguard_dashboard::{LinkHandle, LinkManager, LinkSettings, LinkTransport, WebSocketTransport};
use steamguard_discord::{
    CommandRouter, EventDispatcher, GatewayRunner, GatewayTransport, OfflineGatewayTransport,
    Presence, ReconnectPolicy,
};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub identity: BotIdentity,
    pub link: LinkHandle,
    pub gateway: Arc<GatewayRunner>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    config.validate()?;
    let gateway_transport = Arc::new(OfflineGatewayTransport::new(config.dashboard.bot_name.clone()));
    Ok(bootstrap_with_transports(config, Arc::new(WebSocketTransport::new()), gateway_transport))
}

/// Wire the link and the command surface together. The link is not started
/// here: it connects when the gateway reports ready.
pub fn bootstrap_with_transports(
    config: AppConfig,
    link_transport: Arc<dyn LinkTransport>,
    gateway_transport: Arc<dyn GatewayTransport>,
) -> Application {
    let identity = BotIdentity::generate();
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        bot_id = %identity,
        dashboard_url = %config.dashboard.url,
        "starting application bootstrap"
    );

    let manager =
        LinkManager::new(LinkSettings::from_config(&config.dashboard), identity.clone(), link_transport);
    let link = manager.handle();

    let presence = Arc::new(Presence::new());
    let router = CommandRouter::new(Arc::new(link.clone()), presence.clone());
    let mut dispatcher = EventDispatcher::new(router, presence);

    let ready_link = link.clone();
    dispatcher.on_ready(move |ready| {
        ready_link.set_bot_name(ready.bot_tag.clone());
        ready_link.connect();
    });

    let gateway = GatewayRunner::new(gateway_transport, dispatcher, ReconnectPolicy::default());

    Application { config, identity, link, gateway: Arc::new(gateway) }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use futures::channel::mpsc as fmpsc;
    use futures::{stream, SinkExt, StreamExt};
    use serde_json::Value;
    use steamguard_core::config::AppConfig;
    use steamguard_dashboard::{LinkChannel, LinkState, LinkTransport, TransportError};
    use steamguard_discord::{GatewayExit, OfflineGatewayTransport};
    use tokio::sync::mpsc;

    use crate::bootstrap::{bootstrap_with_config, bootstrap_with_transports};

    struct CollectorTransport {
        urls: Mutex<Vec<String>>,
        frames: mpsc::UnboundedSender<fmpsc::UnboundedReceiver<String>>,
    }

    #[async_trait]
    impl LinkTransport for CollectorTransport {
        async fn connect(&self, url: &str) -> Result<LinkChannel, TransportError> {
            self.urls.lock().expect("urls lock").push(url.to_owned());
            let (out_tx, out_rx) = fmpsc::unbounded::<String>();
            let _ = self.frames.send(out_rx);
            Ok(LinkChannel {
                outbound: Box::pin(out_tx.sink_map_err(|error| TransportError::Send(error.to_string()))),
                inbound: Box::pin(stream::pending::<Result<String, TransportError>>()),
            })
        }
    }

    fn config() -> AppConfig {
        let mut config = AppConfig::default();
        config.discord.token = "test-token".to_owned().into();
        config.dashboard.url = "ws://collector.test/ws".to_owned();
        config
    }

    #[test]
    fn bootstrap_fails_fast_without_discord_token() {
        let result = bootstrap_with_config(AppConfig::default());

        let message = result.err().expect("missing token should fail").to_string();
        assert!(message.contains("DISCORD_TOKEN"));
    }

    #[test]
    fn bootstrap_rejects_non_websocket_dashboard_url() {
        let mut config = config();
        config.dashboard.url = "http://localhost:5000/ws".to_owned();

        let message = bootstrap_with_config(config).err().expect("http url should fail").to_string();
        assert!(message.contains("dashboard.url"));
    }

    #[tokio::test(start_paused = true)]
    async fn ready_connects_link_and_registers_under_bot_tag() {
        let (frames_tx, mut frames_rx) = mpsc::unbounded_channel();
        let transport = Arc::new(CollectorTransport { urls: Mutex::new(Vec::new()), frames: frames_tx });
        let app = bootstrap_with_transports(
            config(),
            transport.clone(),
            Arc::new(OfflineGatewayTransport::new("SteamGuard#4242")),
        );
        assert_eq!(app.link.state(), LinkState::Disconnected, "link waits for ready");

        assert_eq!(app.gateway.start().await, GatewayExit::StreamClosed);

        let mut frames = frames_rx.recv().await.expect("link should connect");
        let registration: Value =
            serde_json::from_str(&frames.next().await.expect("registration")).expect("json");
        assert_eq!(registration["type"], "bot_registration");
        assert_eq!(registration["botName"], "SteamGuard#4242");
        assert_eq!(registration["botId"], app.identity.as_str());
        assert_eq!(transport.urls.lock().expect("urls lock").as_slice(), ["ws://collector.test/ws"]);

        app.link.shutdown();
        tokio::time::timeout(Duration::from_secs(1), app.link.closed()).await.expect("closed");
    }
}
