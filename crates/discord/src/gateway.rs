use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

use crate::commands::{command_catalogue, CommandDefinition};
use crate::embeds::MessageTemplate;
use crate::events::{DispatchOutcome, EventDispatcher, GatewayEvent, ReadyEvent};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("gateway failed to connect: {0}")]
    Connect(String),
    #[error("gateway read failed: {0}")]
    Receive(String),
    #[error("command registration failed: {0}")]
    Register(String),
    #[error("interaction reply failed: {0}")]
    Respond(String),
    #[error("gateway disconnect failed: {0}")]
    Disconnect(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { max_retries: 5, base_delay_ms: 1_000, max_delay_ms: 30_000 }
    }
}

impl ReconnectPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let multiplier = 1_u64 << attempt.min(16);
        Duration::from_millis(self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms))
    }
}

/// The chat platform connection. The real client lives outside this crate;
/// anything that can deliver events and post replies fits here.
#[async_trait]
pub trait GatewayTransport: Send + Sync {
    async fn connect(&self) -> Result<(), GatewayError>;
    async fn register_commands(&self, commands: &[CommandDefinition]) -> Result<(), GatewayError>;
    async fn next_event(&self) -> Result<Option<GatewayEvent>, GatewayError>;
    async fn respond(&self, interaction_id: &str, message: &MessageTemplate) -> Result<(), GatewayError>;
    async fn disconnect(&self) -> Result<(), GatewayError>;
}

/// Stands in for a chat connection when none is configured: announces ready
/// once under the given tag, then ends the event stream.
pub struct OfflineGatewayTransport {
    ready: Mutex<Option<ReadyEvent>>,
}

impl OfflineGatewayTransport {
    pub fn new(bot_tag: impl Into<String>) -> Self {
        Self { ready: Mutex::new(Some(ReadyEvent { bot_tag: bot_tag.into(), guild_count: 0 })) }
    }
}

#[async_trait]
impl GatewayTransport for OfflineGatewayTransport {
    async fn connect(&self) -> Result<(), GatewayError> {
        Ok(())
    }

    async fn register_commands(&self, _commands: &[CommandDefinition]) -> Result<(), GatewayError> {
        Ok(())
    }

    async fn next_event(&self) -> Result<Option<GatewayEvent>, GatewayError> {
        let ready = self.ready.lock().unwrap_or_else(PoisonError::into_inner).take();
        Ok(ready.map(GatewayEvent::Ready))
    }

    async fn respond(&self, _interaction_id: &str, _message: &MessageTemplate) -> Result<(), GatewayError> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), GatewayError> {
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GatewayExit {
    StreamClosed,
    RetriesExhausted,
}

pub struct GatewayRunner {
    transport: Arc<dyn GatewayTransport>,
    dispatcher: EventDispatcher,
    reconnect_policy: ReconnectPolicy,
}

impl GatewayRunner {
    pub fn new(
        transport: Arc<dyn GatewayTransport>,
        dispatcher: EventDispatcher,
        reconnect_policy: ReconnectPolicy,
    ) -> Self {
        Self { transport, dispatcher, reconnect_policy }
    }

    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    /// Pump gateway events until the stream closes. Connection failures are
    /// retried with capped exponential backoff; exhausting the retries ends
    /// the runner without failing the process.
    pub async fn start(&self) -> GatewayExit {
        for attempt in 0..=self.reconnect_policy.max_retries {
            match self.connect_and_pump(attempt).await {
                Ok(()) => return GatewayExit::StreamClosed,
                Err(error) => {
                    warn!(
                        event_name = "discord.gateway.failed",
                        attempt,
                        max_retries = self.reconnect_policy.max_retries,
                        error = %error,
                        "gateway connection failed"
                    );
                    if attempt >= self.reconnect_policy.max_retries {
                        break;
                    }

                    let delay = self.reconnect_policy.backoff(attempt);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        warn!(
            event_name = "discord.gateway.retries_exhausted",
            max_retries = self.reconnect_policy.max_retries,
            "gateway retries exhausted; continuing without chat connection"
        );
        GatewayExit::RetriesExhausted
    }

    async fn connect_and_pump(&self, attempt: u32) -> Result<(), GatewayError> {
        info!(event_name = "discord.gateway.connecting", attempt, "opening gateway connection");
        self.transport.connect().await?;

        let catalogue = command_catalogue();
        match self.transport.register_commands(&catalogue).await {
            Ok(()) => info!(
                event_name = "discord.commands.registered",
                count = catalogue.len(),
                "registered slash commands"
            ),
            Err(error) => warn!(
                event_name = "discord.commands.register_failed",
                error = %error,
                "slash command registration failed; continuing"
            ),
        }

        loop {
            let Some(event) = self.transport.next_event().await? else {
                info!(event_name = "discord.gateway.closed", attempt, "gateway event stream closed");
                self.transport.disconnect().await?;
                return Ok(());
            };

            let DispatchOutcome::Responded { interaction_id, message } =
                self.dispatcher.dispatch(&event)
            else {
                continue;
            };

            if let Err(error) = self.transport.respond(&interaction_id, &message).await {
                warn!(
                    event_name = "discord.interaction.reply_failed",
                    correlation_id = %interaction_id,
                    error = %error,
                    "failed to deliver interaction reply; continuing"
                );
            }
        }
    }
}
