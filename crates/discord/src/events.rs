use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

use crate::commands::{CommandRouter, InteractionPayload};
use crate::embeds::MessageTemplate;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReadyEvent {
    pub bot_tag: String,
    pub guild_count: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GatewayEvent {
    Ready(ReadyEvent),
    GuildCountChanged { guild_count: usize },
    InteractionCreate(InteractionPayload),
    Unsupported { event_type: String },
}

impl GatewayEvent {
    pub fn event_type(&self) -> &str {
        match self {
            Self::Ready(_) => "ready",
            Self::GuildCountChanged { .. } => "guild_count_changed",
            Self::InteractionCreate(_) => "interaction_create",
            Self::Unsupported { event_type } => event_type,
        }
    }
}

/// What the bot currently knows about itself on the chat platform.
#[derive(Debug)]
pub struct Presence {
    guild_count: AtomicUsize,
    bot_tag: Mutex<Option<String>>,
    ready_at: Mutex<Option<Instant>>,
}

impl Presence {
    pub fn new() -> Self {
        Self { guild_count: AtomicUsize::new(0), bot_tag: Mutex::new(None), ready_at: Mutex::new(None) }
    }

    pub fn record_ready(&self, ready: &ReadyEvent) {
        self.guild_count.store(ready.guild_count, Ordering::Relaxed);
        *self.bot_tag.lock().unwrap_or_else(PoisonError::into_inner) = Some(ready.bot_tag.clone());
        self.ready_at.lock().unwrap_or_else(PoisonError::into_inner).get_or_insert_with(Instant::now);
    }

    pub fn set_guild_count(&self, guild_count: usize) {
        self.guild_count.store(guild_count, Ordering::Relaxed);
    }

    pub fn guild_count(&self) -> usize {
        self.guild_count.load(Ordering::Relaxed)
    }

    pub fn bot_tag(&self) -> Option<String> {
        self.bot_tag.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Time since the first ready event; zero before it.
    pub fn uptime(&self) -> Duration {
        self.ready_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .map(|ready_at| ready_at.elapsed())
            .unwrap_or_default()
    }
}

impl Default for Presence {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    Responded { interaction_id: String, message: MessageTemplate },
    Processed,
    Ignored,
}

pub type ReadyHook = Box<dyn Fn(&ReadyEvent) + Send + Sync>;

pub struct EventDispatcher {
    router: CommandRouter,
    presence: Arc<Presence>,
    ready_hooks: Vec<ReadyHook>,
}

impl EventDispatcher {
    pub fn new(router: CommandRouter, presence: Arc<Presence>) -> Self {
        Self { router, presence, ready_hooks: Vec::new() }
    }

    /// Run `hook` on every ready event. The gateway may deliver ready again
    /// after a resume, so hooks must tolerate repeats.
    pub fn on_ready<F>(&mut self, hook: F)
    where
        F: Fn(&ReadyEvent) + Send + Sync + 'static,
    {
        self.ready_hooks.push(Box::new(hook));
    }

    pub fn presence(&self) -> &Arc<Presence> {
        &self.presence
    }

    pub fn router(&self) -> &CommandRouter {
        &self.router
    }

    pub fn dispatch(&self, event: &GatewayEvent) -> DispatchOutcome {
        match event {
            GatewayEvent::Ready(ready) => {
                info!(
                    event_name = "discord.gateway.ready",
                    bot_tag = %ready.bot_tag,
                    guild_count = ready.guild_count,
                    "bot is online"
                );
                self.presence.record_ready(ready);
                for hook in &self.ready_hooks {
                    hook(ready);
                }
                DispatchOutcome::Processed
            }
            GatewayEvent::GuildCountChanged { guild_count } => {
                self.presence.set_guild_count(*guild_count);
                DispatchOutcome::Processed
            }
            GatewayEvent::InteractionCreate(payload) => {
                info!(
                    event_name = "discord.interaction.received",
                    correlation_id = %payload.id,
                    command = %payload.command_name,
                    user_id = %payload.user.id,
                    guild_id = payload.guild.as_ref().map(|guild| guild.id.as_str()).unwrap_or("dm"),
                    "interaction received"
                );
                DispatchOutcome::Responded {
                    interaction_id: payload.id.clone(),
                    message: self.router.route(payload),
                }
            }
            GatewayEvent::Unsupported { event_type } => {
                debug!(event_name = "discord.gateway.ignored", event_type = %event_type, "ignoring event");
                DispatchOutcome::Ignored
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use steamguard_core::EnvelopeKind;

    use super::{DispatchOutcome, EventDispatcher, GatewayEvent, Presence, ReadyEvent};
    use crate::commands::tests::{interaction, RecordingSink};
    use crate::commands::CommandRouter;

    fn dispatcher() -> (EventDispatcher, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let presence = Arc::new(Presence::new());
        (EventDispatcher::new(CommandRouter::new(sink.clone(), presence.clone()), presence), sink)
    }

    fn ready(guild_count: usize) -> GatewayEvent {
        GatewayEvent::Ready(ReadyEvent { bot_tag: "SteamGuard#4242".to_owned(), guild_count })
    }

    #[test]
    fn ready_records_presence_and_runs_hooks() {
        let (mut dispatcher, _sink) = dispatcher();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        dispatcher.on_ready(move |ready| {
            assert_eq!(ready.bot_tag, "SteamGuard#4242");
            seen.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(dispatcher.dispatch(&ready(3)), DispatchOutcome::Processed);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.presence().guild_count(), 3);
        assert_eq!(dispatcher.presence().bot_tag().as_deref(), Some("SteamGuard#4242"));

        dispatcher.dispatch(&GatewayEvent::GuildCountChanged { guild_count: 4 });
        assert_eq!(dispatcher.presence().guild_count(), 4);
    }

    #[test]
    fn interactions_are_routed_and_answered() {
        let (dispatcher, sink) = dispatcher();

        let outcome = dispatcher.dispatch(&GatewayEvent::InteractionCreate(interaction("stats", vec![])));

        let DispatchOutcome::Responded { interaction_id, message } = outcome else {
            panic!("interaction should be answered");
        };
        assert_eq!(interaction_id, "interaction-stats");
        assert_eq!(message.embeds[0].title, "🛡️ SteamGuard Statistics");
        assert_eq!(sink.kinds(), vec![EnvelopeKind::DiscordActivity]);
    }

    #[test]
    fn unsupported_events_are_ignored() {
        let (dispatcher, sink) = dispatcher();
        let outcome = dispatcher
            .dispatch(&GatewayEvent::Unsupported { event_type: "message_create".to_owned() });

        assert_eq!(outcome, DispatchOutcome::Ignored);
        assert!(sink.kinds().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn uptime_counts_from_first_ready() {
        let presence = Presence::new();
        assert_eq!(presence.uptime(), Duration::ZERO);

        presence.record_ready(&ReadyEvent { bot_tag: "SteamGuard#4242".to_owned(), guild_count: 1 });
        tokio::time::sleep(Duration::from_secs(90)).await;
        presence.record_ready(&ReadyEvent { bot_tag: "SteamGuard#4242".to_owned(), guild_count: 1 });

        assert_eq!(presence.uptime(), Duration::from_secs(90));
    }
}
