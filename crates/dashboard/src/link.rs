use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use steamguard_core::config::DashboardConfig;
use steamguard_core::{BotIdentity, BotRegistration, Envelope, EnvelopeSink, InboundMessage};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::transport::{LinkChannel, LinkTransport, TransportError};

const INBOUND_BROADCAST_CAPACITY: usize = 64;
const LOGGED_PAYLOAD_LIMIT: usize = 256;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    Disconnected,
    Connecting,
    Open,
    Closing,
}

impl LinkState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
        }
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkSettings {
    pub url: String,
    pub bot_name: String,
    pub server_label: String,
    /// Wait after a connection attempt fails outright.
    pub connect_retry: Duration,
    /// Wait after an established session drops.
    pub reconnect_delay: Duration,
    pub outbound_buffer: usize,
}

impl LinkSettings {
    pub fn from_config(config: &DashboardConfig) -> Self {
        Self {
            url: config.url.clone(),
            bot_name: config.bot_name.clone(),
            server_label: config.server_label.clone(),
            connect_retry: Duration::from_secs(config.connect_retry_secs),
            reconnect_delay: Duration::from_secs(config.reconnect_delay_secs),
            outbound_buffer: config.outbound_buffer.max(1),
        }
    }
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self::from_config(&DashboardConfig::default())
    }
}

/// What happened to a message handed to [`LinkHandle::send`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendOutcome {
    Enqueued,
    Dropped,
    Unserializable,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct LinkStats {
    pub attempts: u64,
    pub sessions_opened: u64,
    pub enqueued: u64,
    pub dropped: u64,
}

#[derive(Default)]
struct LinkCounters {
    attempts: AtomicU64,
    sessions_opened: AtomicU64,
    enqueued: AtomicU64,
    dropped: AtomicU64,
}

struct PendingRetry {
    generation: u64,
    task: JoinHandle<()>,
}

struct LinkInner {
    state: LinkState,
    bot_name: String,
    outbound: Option<mpsc::Sender<String>>,
    session: u64,
    retry: Option<PendingRetry>,
    retry_generation: u64,
    shut_down: bool,
}

struct LinkShared {
    settings: LinkSettings,
    identity: BotIdentity,
    transport: Arc<dyn LinkTransport>,
    inner: Mutex<LinkInner>,
    counters: LinkCounters,
    state_tx: watch::Sender<LinkState>,
    shutdown_tx: watch::Sender<bool>,
    inbound_tx: broadcast::Sender<InboundMessage>,
}

enum SessionEnd {
    RemoteClosed,
    Failed(TransportError),
    Shutdown,
}

/// Owns the single dashboard connection for this process.
///
/// Everything else talks to the link through a [`LinkHandle`]; the socket and
/// the state machine are never exposed.
pub struct LinkManager {
    handle: LinkHandle,
}

impl LinkManager {
    pub fn new(
        settings: LinkSettings,
        identity: BotIdentity,
        transport: Arc<dyn LinkTransport>,
    ) -> Self {
        let (state_tx, _) = watch::channel(LinkState::Disconnected);
        let (shutdown_tx, _) = watch::channel(false);
        let (inbound_tx, _) = broadcast::channel(INBOUND_BROADCAST_CAPACITY);
        let inner = LinkInner {
            state: LinkState::Disconnected,
            bot_name: settings.bot_name.clone(),
            outbound: None,
            session: 0,
            retry: None,
            retry_generation: 0,
            shut_down: false,
        };

        let shared = LinkShared {
            settings,
            identity,
            transport,
            inner: Mutex::new(inner),
            counters: LinkCounters::default(),
            state_tx,
            shutdown_tx,
            inbound_tx,
        };

        Self { handle: LinkHandle { shared: Arc::new(shared) } }
    }

    pub fn handle(&self) -> LinkHandle {
        self.handle.clone()
    }
}

/// Cheap, cloneable access to the dashboard link.
#[derive(Clone)]
pub struct LinkHandle {
    shared: Arc<LinkShared>,
}

impl fmt::Debug for LinkHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkHandle")
            .field("bot_id", &self.shared.identity.as_str())
            .field("url", &self.shared.settings.url)
            .field("state", &self.state())
            .finish()
    }
}

impl LinkHandle {
    /// Start a connection attempt unless one is already in flight or open.
    ///
    /// Returns `true` when an attempt was started. Any pending retry timer is
    /// cancelled, so at most one attempt exists at a time. Must be called from
    /// within a Tokio runtime.
    pub fn connect(&self) -> bool {
        let mut inner = self.shared.lock_inner();
        if inner.shut_down {
            debug!(
                event_name = "dashboard.link.connect_ignored",
                bot_id = %self.shared.identity,
                reason = "shut_down",
                "dashboard link is shut down; ignoring connect"
            );
            return false;
        }
        if inner.state != LinkState::Disconnected {
            debug!(
                event_name = "dashboard.link.connect_ignored",
                bot_id = %self.shared.identity,
                state = %inner.state,
                "dashboard link already active; ignoring connect"
            );
            return false;
        }

        if let Some(pending) = inner.retry.take() {
            pending.task.abort();
            debug!(
                event_name = "dashboard.link.retry_superseded",
                bot_id = %self.shared.identity,
                "pending retry superseded by explicit connect"
            );
        }
        self.shared.set_state(&mut inner, LinkState::Connecting);
        drop(inner);

        self.shared.counters.attempts.fetch_add(1, Ordering::Relaxed);
        tokio::spawn(LinkShared::run_session(Arc::clone(&self.shared)));
        true
    }

    /// Hand a message to the link without waiting on the network.
    ///
    /// Anything sent while the link is not open is dropped; nothing is queued
    /// across sessions.
    pub fn send<T>(&self, message: &T) -> SendOutcome
    where
        T: Serialize + ?Sized,
    {
        let inner = self.shared.lock_inner();
        let (LinkState::Open, Some(outbound)) = (inner.state, inner.outbound.as_ref()) else {
            self.shared.counters.dropped.fetch_add(1, Ordering::Relaxed);
            debug!(
                event_name = "dashboard.link.send_dropped",
                bot_id = %self.shared.identity,
                state = %inner.state,
                "dashboard link not open; dropping message"
            );
            return SendOutcome::Dropped;
        };

        let text = match serde_json::to_string(message) {
            Ok(text) => text,
            Err(error) => {
                warn!(
                    event_name = "dashboard.link.serialize_failed",
                    bot_id = %self.shared.identity,
                    session = inner.session,
                    error = %error,
                    "message could not be serialized; discarding"
                );
                return SendOutcome::Unserializable;
            }
        };

        match outbound.try_send(text) {
            Ok(()) => {
                self.shared.counters.enqueued.fetch_add(1, Ordering::Relaxed);
                SendOutcome::Enqueued
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.shared.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    event_name = "dashboard.link.send_dropped",
                    bot_id = %self.shared.identity,
                    session = inner.session,
                    capacity = self.shared.settings.outbound_buffer,
                    "dashboard outbound buffer full; dropping message"
                );
                SendOutcome::Dropped
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.shared.counters.dropped.fetch_add(1, Ordering::Relaxed);
                SendOutcome::Dropped
            }
        }
    }

    /// Display name used by registrations sent from now on.
    pub fn set_bot_name(&self, name: impl Into<String>) {
        let name = name.into();
        if name.trim().is_empty() {
            return;
        }
        self.shared.lock_inner().bot_name = name;
    }

    /// Tear the link down for good: cancel timers, close the socket, and
    /// ignore later `connect` calls.
    pub fn shutdown(&self) {
        let mut inner = self.shared.lock_inner();
        if inner.shut_down {
            return;
        }
        inner.shut_down = true;

        if let Some(pending) = inner.retry.take() {
            pending.task.abort();
        }
        if inner.state != LinkState::Disconnected {
            self.shared.set_state(&mut inner, LinkState::Closing);
        }
        drop(inner);

        info!(
            event_name = "dashboard.link.shutdown",
            bot_id = %self.shared.identity,
            "dashboard link shutting down"
        );
        self.shared.shutdown_tx.send_replace(true);
    }

    /// Resolve once the link has settled after [`shutdown`](Self::shutdown).
    pub async fn closed(&self) {
        let mut state_rx = self.subscribe_state();
        let _ = state_rx.wait_for(|state| *state == LinkState::Disconnected).await;
    }

    pub fn state(&self) -> LinkState {
        self.shared.lock_inner().state
    }

    pub fn subscribe_state(&self) -> watch::Receiver<LinkState> {
        self.shared.state_tx.subscribe()
    }

    /// Messages pushed by the collector. Nothing acts on them yet; slow
    /// receivers lag and miss messages rather than holding the link up.
    pub fn subscribe_inbound(&self) -> broadcast::Receiver<InboundMessage> {
        self.shared.inbound_tx.subscribe()
    }

    pub fn stats(&self) -> LinkStats {
        let counters = &self.shared.counters;
        LinkStats {
            attempts: counters.attempts.load(Ordering::Relaxed),
            sessions_opened: counters.sessions_opened.load(Ordering::Relaxed),
            enqueued: counters.enqueued.load(Ordering::Relaxed),
            dropped: counters.dropped.load(Ordering::Relaxed),
        }
    }

    pub fn identity(&self) -> &BotIdentity {
        &self.shared.identity
    }

    pub fn url(&self) -> &str {
        &self.shared.settings.url
    }
}

impl EnvelopeSink for LinkHandle {
    fn publish(&self, envelope: &Envelope) {
        let outcome = self.send(envelope);
        debug!(
            event_name = "dashboard.link.publish",
            envelope_type = envelope.kind().as_str(),
            outcome = ?outcome,
            "envelope handed to dashboard link"
        );
    }

    fn status(&self) -> &'static str {
        self.state().as_str()
    }
}

impl LinkShared {
    fn lock_inner(&self) -> MutexGuard<'_, LinkInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, inner: &mut LinkInner, state: LinkState) {
        inner.state = state;
        self.state_tx.send_replace(state);
    }

    fn registration(&self, bot_name: String) -> Envelope {
        Envelope::BotRegistration(BotRegistration {
            bot_id: self.identity.as_str().to_owned(),
            bot_name,
            server_id: self.settings.server_label.clone(),
            timestamp: Utc::now(),
        })
    }

    async fn run_session(shared: Arc<Self>) {
        info!(
            event_name = "dashboard.link.connecting",
            bot_id = %shared.identity,
            url = %shared.settings.url,
            "connecting to dashboard"
        );

        let channel = match shared.transport.connect(&shared.settings.url).await {
            Ok(channel) => channel,
            Err(error) => {
                warn!(
                    event_name = "dashboard.link.connect_failed",
                    bot_id = %shared.identity,
                    url = %shared.settings.url,
                    retry_in_secs = shared.settings.connect_retry.as_secs(),
                    error = %error,
                    "dashboard connection failed"
                );
                shared.settle_disconnected();
                Self::schedule_retry(&shared, shared.settings.connect_retry);
                return;
            }
        };

        let (outbound_tx, outbound_rx) = mpsc::channel(shared.settings.outbound_buffer);
        let opened = {
            let mut inner = shared.lock_inner();
            if inner.shut_down {
                None
            } else {
                Some(shared.open_session(&mut inner, outbound_tx))
            }
        };
        let Some(session) = opened else {
            let LinkChannel { mut outbound, .. } = channel;
            let _ = outbound.close().await;
            shared.settle_disconnected();
            return;
        };
        info!(
            event_name = "dashboard.link.open",
            bot_id = %shared.identity,
            session,
            "connected to dashboard"
        );

        let end = shared.pump(channel, outbound_rx).await;
        {
            let mut inner = shared.lock_inner();
            inner.outbound = None;
            shared.set_state(&mut inner, LinkState::Disconnected);
        }

        match end {
            SessionEnd::Shutdown => {
                info!(
                    event_name = "dashboard.link.closed",
                    bot_id = %shared.identity,
                    session,
                    "dashboard connection closed"
                );
            }
            SessionEnd::RemoteClosed => {
                warn!(
                    event_name = "dashboard.link.dropped",
                    bot_id = %shared.identity,
                    session,
                    retry_in_secs = shared.settings.reconnect_delay.as_secs(),
                    "dashboard connection closed by remote"
                );
                Self::schedule_retry(&shared, shared.settings.reconnect_delay);
            }
            SessionEnd::Failed(error) => {
                warn!(
                    event_name = "dashboard.link.dropped",
                    bot_id = %shared.identity,
                    session,
                    retry_in_secs = shared.settings.reconnect_delay.as_secs(),
                    error = %error,
                    "dashboard connection failed mid-session"
                );
                Self::schedule_retry(&shared, shared.settings.reconnect_delay);
            }
        }
    }

    /// Queue the registration and publish the session's sender. The
    /// registration goes in before the sender is visible to `send`, so it is
    /// always the first frame of a session.
    fn open_session(&self, inner: &mut LinkInner, outbound_tx: mpsc::Sender<String>) -> u64 {
        let registration = self.registration(inner.bot_name.clone());
        match serde_json::to_string(&registration) {
            Ok(text) => {
                let _ = outbound_tx.try_send(text);
            }
            Err(error) => warn!(
                event_name = "dashboard.link.serialize_failed",
                bot_id = %self.identity,
                error = %error,
                "registration could not be serialized"
            ),
        }

        inner.session += 1;
        inner.outbound = Some(outbound_tx);
        self.counters.sessions_opened.fetch_add(1, Ordering::Relaxed);
        self.set_state(inner, LinkState::Open);
        inner.session
    }

    async fn pump(&self, channel: LinkChannel, mut outbound_rx: mpsc::Receiver<String>) -> SessionEnd {
        let LinkChannel { mut outbound, mut inbound } = channel;
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        if *shutdown_rx.borrow_and_update() {
            let _ = outbound.close().await;
            return SessionEnd::Shutdown;
        }

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    let _ = outbound.close().await;
                    return SessionEnd::Shutdown;
                }
                next = outbound_rx.recv() => {
                    let Some(text) = next else {
                        let _ = outbound.close().await;
                        return SessionEnd::Shutdown;
                    };
                    if let Err(error) = outbound.send(text).await {
                        return SessionEnd::Failed(error);
                    }
                }
                frame = inbound.next() => match frame {
                    Some(Ok(text)) => self.handle_inbound(&text),
                    Some(Err(error)) => return SessionEnd::Failed(error),
                    None => return SessionEnd::RemoteClosed,
                },
            }
        }
    }

    fn handle_inbound(&self, raw: &str) {
        match InboundMessage::parse(raw) {
            Ok(message) => {
                info!(
                    event_name = "dashboard.link.inbound",
                    bot_id = %self.identity,
                    message_type = %message.kind,
                    "dashboard message received"
                );
                let _ = self.inbound_tx.send(message);
            }
            Err(error) => {
                warn!(
                    event_name = "dashboard.link.inbound_malformed",
                    bot_id = %self.identity,
                    error = %error,
                    payload = %truncate(raw, LOGGED_PAYLOAD_LIMIT),
                    "discarding malformed dashboard message"
                );
            }
        }
    }

    fn settle_disconnected(&self) {
        let mut inner = self.lock_inner();
        inner.outbound = None;
        self.set_state(&mut inner, LinkState::Disconnected);
    }

    /// Arm the retry timer unless one is already pending or the link is shut
    /// down. A timer that has been superseded by an explicit connect never
    /// fires a connect of its own.
    fn schedule_retry(shared: &Arc<Self>, delay: Duration) {
        let mut inner = shared.lock_inner();
        if inner.shut_down || inner.retry.is_some() {
            return;
        }

        inner.retry_generation += 1;
        let generation = inner.retry_generation;
        let timer = Arc::clone(shared);
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut inner = timer.lock_inner();
                if inner.retry.as_ref().map(|pending| pending.generation) != Some(generation) {
                    return;
                }
                inner.retry = None;
            }
            LinkHandle { shared: timer }.connect();
        });
        inner.retry = Some(PendingRetry { generation, task });

        debug!(
            event_name = "dashboard.link.retry_scheduled",
            bot_id = %shared.identity,
            delay_ms = delay.as_millis() as u64,
            "dashboard reconnect scheduled"
        );
    }
}

fn truncate(raw: &str, limit: usize) -> &str {
    if raw.len() <= limit {
        return raw;
    }
    let mut end = limit;
    while !raw.is_char_boundary(end) {
        end -= 1;
    }
    &raw[..end]
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, VecDeque};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Utc;
    use futures::channel::mpsc as fmpsc;
    use futures::{SinkExt, StreamExt};
    use serde_json::{json, Value};
    use steamguard_core::{ActivityRecord, BotIdentity, Envelope};
    use tokio::sync::mpsc;
    use tokio::time::Instant;

    use super::{LinkHandle, LinkManager, LinkSettings, LinkState, SendOutcome};
    use crate::transport::{LinkChannel, LinkTransport, TransportError};

    enum Step {
        Accept,
        Refuse(&'static str),
    }

    /// The collector's end of an accepted connection.
    struct Collector {
        received: fmpsc::UnboundedReceiver<String>,
        push: fmpsc::UnboundedSender<Result<String, TransportError>>,
    }

    impl Collector {
        async fn next_json(&mut self) -> Value {
            let text = self.received.next().await.expect("collector should receive a frame");
            serde_json::from_str(&text).expect("frames should be JSON")
        }
    }

    struct ScriptedTransport {
        steps: Mutex<VecDeque<Step>>,
        attempts: Mutex<Vec<Instant>>,
        sessions: mpsc::UnboundedSender<Collector>,
    }

    impl ScriptedTransport {
        fn new(steps: Vec<Step>) -> (Arc<Self>, mpsc::UnboundedReceiver<Collector>) {
            let (sessions, collectors) = mpsc::unbounded_channel();
            let transport = Self {
                steps: Mutex::new(steps.into()),
                attempts: Mutex::new(Vec::new()),
                sessions,
            };
            (Arc::new(transport), collectors)
        }

        fn attempts(&self) -> Vec<Instant> {
            self.attempts.lock().expect("attempts lock").clone()
        }
    }

    #[async_trait]
    impl LinkTransport for ScriptedTransport {
        async fn connect(&self, _url: &str) -> Result<LinkChannel, TransportError> {
            self.attempts.lock().expect("attempts lock").push(Instant::now());
            let step = self.steps.lock().expect("steps lock").pop_front();
            match step.unwrap_or(Step::Refuse("script exhausted")) {
                Step::Refuse(reason) => Err(TransportError::Connect(reason.to_owned())),
                Step::Accept => {
                    let (out_tx, out_rx) = fmpsc::unbounded::<String>();
                    let (in_tx, in_rx) = fmpsc::unbounded::<Result<String, TransportError>>();
                    let _ = self.sessions.send(Collector { received: out_rx, push: in_tx });
                    Ok(LinkChannel {
                        outbound: Box::pin(
                            out_tx.sink_map_err(|error| TransportError::Send(error.to_string())),
                        ),
                        inbound: Box::pin(in_rx),
                    })
                }
            }
        }
    }

    fn settings() -> LinkSettings {
        LinkSettings {
            url: "ws://collector.test/ws".to_owned(),
            bot_name: "SteamGuard".to_owned(),
            server_label: "SteamGuard Multi-Server".to_owned(),
            connect_retry: Duration::from_secs(10),
            reconnect_delay: Duration::from_secs(5),
            outbound_buffer: 16,
        }
    }

    fn link_with(steps: Vec<Step>) -> (LinkHandle, Arc<ScriptedTransport>, mpsc::UnboundedReceiver<Collector>) {
        let (transport, collectors) = ScriptedTransport::new(steps);
        let manager =
            LinkManager::new(settings(), BotIdentity::from_raw("steamguard-42"), transport.clone());
        (manager.handle(), transport, collectors)
    }

    fn activity(command: &str) -> Envelope {
        Envelope::activity(ActivityRecord {
            command: command.to_owned(),
            user_id: "1001".to_owned(),
            username: "trader#1001".to_owned(),
            server_id: Some("G1".to_owned()),
            server_name: Some("Marketplace".to_owned()),
            timestamp: Utc::now(),
        })
    }

    async fn wait_for(link: &LinkHandle, target: LinkState) {
        let mut state_rx = link.subscribe_state();
        state_rx.wait_for(|state| *state == target).await.expect("state channel open");
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_connect_calls_make_a_single_attempt() {
        let (link, transport, mut collectors) = link_with(vec![Step::Accept]);

        assert!(link.connect());
        assert!(!link.connect(), "connect while connecting should be ignored");
        assert!(!link.connect(), "connect while connecting should be ignored");
        assert_eq!(link.state(), LinkState::Connecting);
        assert_eq!(link.send(&activity("check")), SendOutcome::Dropped);
        assert_eq!(link.stats().dropped, 1);

        let _collector = collectors.recv().await.expect("session");
        wait_for(&link, LinkState::Open).await;
        assert!(!link.connect(), "connect while open should be ignored");

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(transport.attempts().len(), 1);
        assert_eq!(link.stats().attempts, 1);
    }

    #[test]
    fn send_while_disconnected_is_a_silent_drop() {
        let (link, _transport, _collectors) = link_with(vec![]);

        assert_eq!(link.send(&json!({})), SendOutcome::Dropped);
        assert_eq!(link.send(&json!({ "type": "discord_activity" })), SendOutcome::Dropped);
        assert_eq!(link.send(&activity("stats")), SendOutcome::Dropped);
        assert_eq!(link.state(), LinkState::Disconnected);
        assert_eq!(link.stats().dropped, 3);
        assert_eq!(link.stats().enqueued, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn registration_is_the_first_frame_of_a_session() {
        let (link, _transport, mut collectors) = link_with(vec![Step::Accept]);
        link.set_bot_name("SteamGuard#4242");

        link.connect();
        let mut collector = collectors.recv().await.expect("session");
        wait_for(&link, LinkState::Open).await;
        assert_eq!(link.send(&activity("check")), SendOutcome::Enqueued);

        let first = collector.next_json().await;
        assert_eq!(first["type"], "bot_registration");
        assert_eq!(first["botId"], "steamguard-42");
        assert_eq!(first["botName"], "SteamGuard#4242");
        assert_eq!(first["serverId"], "SteamGuard Multi-Server");
        assert!(first["timestamp"].is_string());

        let second = collector.next_json().await;
        assert_eq!(second["type"], "discord_activity");
        assert_eq!(second["activity"]["command"], "check");
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_session_reconnects_after_short_backoff() {
        let (link, transport, mut collectors) = link_with(vec![Step::Accept, Step::Accept]);

        link.connect();
        let collector = collectors.recv().await.expect("first session");
        wait_for(&link, LinkState::Open).await;

        drop(collector);
        wait_for(&link, LinkState::Disconnected).await;
        let dropped_at = Instant::now();

        tokio::time::sleep(Duration::from_millis(4_900)).await;
        assert_eq!(transport.attempts().len(), 1, "no reconnect before the 5s backoff");

        tokio::time::sleep(Duration::from_millis(200)).await;
        let attempts = transport.attempts();
        assert_eq!(attempts.len(), 2, "reconnect once the 5s backoff elapses");
        let waited = attempts[1] - dropped_at;
        assert!(waited >= Duration::from_secs(5) && waited < Duration::from_millis(5_100));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_connect_retries_after_long_backoff() {
        let (link, transport, _collectors) = link_with(vec![Step::Refuse("connection refused")]);

        link.connect();
        tokio::time::sleep(Duration::from_millis(9_900)).await;
        assert_eq!(transport.attempts().len(), 1, "no retry before the 10s backoff");
        assert_eq!(link.state(), LinkState::Disconnected);

        tokio::time::sleep(Duration::from_millis(200)).await;
        let attempts = transport.attempts();
        assert_eq!(attempts.len(), 2, "retry once the 10s backoff elapses");
        assert_eq!(attempts[1] - attempts[0], Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn link_keeps_retrying_indefinitely() {
        let (link, transport, _collectors) = link_with(vec![]);

        link.connect();
        tokio::time::sleep(Duration::from_secs(61)).await;

        assert_eq!(transport.attempts().len(), 7);
        assert_eq!(link.state(), LinkState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_connect_supersedes_pending_retry() {
        let (link, transport, mut collectors) =
            link_with(vec![Step::Refuse("connection refused"), Step::Accept]);

        link.connect();
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(link.state(), LinkState::Disconnected);

        assert!(link.connect(), "explicit connect should start a new attempt");
        let _collector = collectors.recv().await.expect("session");
        wait_for(&link, LinkState::Open).await;

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(transport.attempts().len(), 2, "superseded timer must not connect");
        assert_eq!(link.state(), LinkState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_inbound_is_discarded_without_touching_state() {
        let (link, transport, mut collectors) = link_with(vec![Step::Accept]);
        let mut inbound = link.subscribe_inbound();

        link.connect();
        let mut collector = collectors.recv().await.expect("session");
        wait_for(&link, LinkState::Open).await;

        collector.push.unbounded_send(Ok("{not json".to_owned())).expect("push");
        collector.push.unbounded_send(Ok(r#"{"missing":"type"}"#.to_owned())).expect("push");
        collector
            .push
            .unbounded_send(Ok(r#"{"type":"refresh_bans","count":3}"#.to_owned()))
            .expect("push");

        let message = inbound.recv().await.expect("valid message is broadcast");
        assert_eq!(message.kind, "refresh_bans");
        assert_eq!(message.fields.get("count"), Some(&json!(3)));
        assert_eq!(link.state(), LinkState::Open);
        assert_eq!(transport.attempts().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unserializable_message_is_contained() {
        let (link, _transport, mut collectors) = link_with(vec![Step::Accept]);

        link.connect();
        let _collector = collectors.recv().await.expect("session");
        wait_for(&link, LinkState::Open).await;

        let mut bad_keys = BTreeMap::new();
        bad_keys.insert((1_u8, 2_u8), "tuple keys are not JSON object keys");

        assert_eq!(link.send(&bad_keys), SendOutcome::Unserializable);
        assert_eq!(link.state(), LinkState::Open);
        assert_eq!(link.send(&activity("stats")), SendOutcome::Enqueued);
    }

    #[tokio::test(start_paused = true)]
    async fn messages_sent_while_down_are_not_carried_into_next_session() {
        let (link, _transport, mut collectors) = link_with(vec![Step::Accept, Step::Accept]);

        link.connect();
        let mut first = collectors.recv().await.expect("first session");
        wait_for(&link, LinkState::Open).await;

        for command in ["report", "check", "appeal"] {
            assert_eq!(link.send(&activity(command)), SendOutcome::Enqueued);
        }
        assert_eq!(first.next_json().await["type"], "bot_registration");
        for command in ["report", "check", "appeal"] {
            assert_eq!(first.next_json().await["activity"]["command"], command);
        }

        drop(first);
        wait_for(&link, LinkState::Disconnected).await;
        assert_eq!(link.send(&activity("ban")), SendOutcome::Dropped);

        let mut second = collectors.recv().await.expect("second session");
        wait_for(&link, LinkState::Open).await;
        assert_eq!(second.next_json().await["type"], "bot_registration");

        assert_eq!(link.send(&activity("stats")), SendOutcome::Enqueued);
        assert_eq!(second.next_json().await["activity"]["command"], "stats");

        let stats = link.stats();
        assert_eq!(stats.sessions_opened, 2);
        assert_eq!(stats.dropped, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_closes_session_and_stops_reconnecting() {
        let (link, transport, mut collectors) = link_with(vec![Step::Accept, Step::Accept]);

        link.connect();
        let mut collector = collectors.recv().await.expect("session");
        wait_for(&link, LinkState::Open).await;
        assert_eq!(collector.next_json().await["type"], "bot_registration");

        link.shutdown();
        link.closed().await;
        assert_eq!(link.state(), LinkState::Disconnected);

        assert!(collector.received.next().await.is_none(), "socket should be closed");

        assert!(!link.connect(), "connect after shutdown is ignored");
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(transport.attempts().len(), 1);
        assert_eq!(link.send(&activity("stats")), SendOutcome::Dropped);
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(super::truncate("short", 10), "short");
        assert_eq!(super::truncate("ééé", 3), "é");
    }
}
