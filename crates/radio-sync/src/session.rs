//! LiveSession — the tokio event loop that owns the [`ConnectionManager`].
//!
//! Socket tasks, reconnect timers and [`SessionControl`] commands all funnel
//! into one `mpsc` channel.  The loop handles each event to completion
//! before the next, then publishes the connection projections (`connected`,
//! `connection_lost`) on watch channels and forwards the manager's events on
//! a broadcast channel.
//!
//! The presentation side only ever holds a [`LiveHandle`].

use std::sync::Arc;

use radio_proto::config::Config;
use radio_proto::protocol::{SharedSnapshot, StationId};
use reqwest::Url;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::auth::TokenSource;
use crate::commentary::{CommentaryBuffer, CommentaryState, CommentaryStreamAccumulator};
use crate::connection::{ConnectionEvent, ConnectionId, ConnectionManager, TimerId};
use crate::endpoint;
use crate::error::TransportError;
use crate::policy::ReconnectPolicy;
use crate::router::{LiveEventRouter, QueryInvalidator};
use crate::station_cache::StationCache;
use crate::timer::TokioScheduler;
use crate::ws::WsTransport;

const LOOP_CHANNEL_CAPACITY: usize = 256;
const EVENT_BROADCAST_CAPACITY: usize = 64;

/// Socket-level outcomes reported by a [`WsTransport`] task.
#[derive(Debug)]
pub enum TransportEvent {
    Opened,
    Frame(String),
    Closed { code: u16, reason: String },
    Error(String),
}

#[derive(Debug)]
pub enum SessionCommand {
    Connect,
    Disconnect(String),
    /// A session key for the credential endpoint became available.
    ProvideCredential(String),
    RevokeCredential,
    Shutdown(Option<oneshot::Sender<()>>),
}

/// All inputs into the session loop.
#[derive(Debug)]
pub enum LoopEvent {
    Transport(ConnectionId, TransportEvent),
    Timer(TimerId),
    Command(SessionCommand),
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub push_url: Url,
    pub policy: ReconnectPolicy,
    /// Station for push frames that carry no `station_id`.
    pub default_station: StationId,
    /// Set when push connections need a short-lived credential.
    pub token_url: Option<Url>,
}

impl SessionOptions {
    pub fn from_config(config: &Config) -> Result<Self, TransportError> {
        let push_url = endpoint::push_url(&config.server)?;
        let token_url = if config.auth.enabled {
            Some(endpoint::token_url(&config.server, &config.auth)?)
        } else {
            None
        };
        Ok(Self {
            push_url,
            policy: ReconnectPolicy::from(&config.reconnect),
            default_station: StationId::from(config.stations.default_station.as_str()),
            token_url,
        })
    }
}

pub struct LiveSession {
    manager: ConnectionManager<WsTransport, TokioScheduler>,
    tokens: Option<Arc<TokenSource>>,
    connected_tx: watch::Sender<bool>,
    lost_tx: watch::Sender<bool>,
    events_tx: broadcast::Sender<ConnectionEvent>,
}

impl LiveSession {
    /// Wire the router into a fresh connection manager, spawn the loop and
    /// connect.  `cache` and `commentary` are shared and outlive the session.
    pub fn start(
        options: SessionOptions,
        cache: Arc<StationCache>,
        commentary: Arc<CommentaryStreamAccumulator>,
        invalidator: Arc<dyn QueryInvalidator>,
        api_key: Option<String>,
    ) -> LiveHandle {
        let (loop_tx, loop_rx) = mpsc::channel::<LoopEvent>(LOOP_CHANNEL_CAPACITY);

        let tokens = options
            .token_url
            .map(|url| Arc::new(TokenSource::new(url, api_key)));
        let transport = WsTransport::new(options.push_url, tokens.clone(), loop_tx.clone());
        let scheduler = TokioScheduler::new(loop_tx.clone());

        let mut manager = ConnectionManager::new(transport, scheduler, options.policy);
        if let Some(source) = &tokens {
            manager = manager.with_auth(source.has_key());
        }

        let router = LiveEventRouter::new(
            cache.clone(),
            commentary.clone(),
            invalidator,
            options.default_station,
        );
        manager.on_message(router.into_handler());

        let (connected_tx, connected_rx) = watch::channel(false);
        let (lost_tx, lost_rx) = watch::channel(false);
        let (events_tx, _) = broadcast::channel(EVENT_BROADCAST_CAPACITY);

        let session = LiveSession {
            manager,
            tokens,
            connected_tx,
            lost_tx,
            events_tx: events_tx.clone(),
        };
        let task = tokio::spawn(session.run(loop_rx));

        LiveHandle {
            control: SessionControl { tx: loop_tx },
            cache,
            commentary,
            connected: connected_rx,
            lost: lost_rx,
            events: events_tx,
            task: Some(task),
        }
    }

    async fn run(mut self, mut loop_rx: mpsc::Receiver<LoopEvent>) {
        info!("live session: starting on {}", self.manager.transport().url());
        self.manager.connect();
        self.publish();

        while let Some(event) = loop_rx.recv().await {
            match event {
                LoopEvent::Transport(id, event) => self.handle_transport(id, event),
                LoopEvent::Timer(timer) => self.manager.handle_timer(timer),
                LoopEvent::Command(SessionCommand::Shutdown(ack)) => {
                    info!("live session: shutdown requested");
                    self.manager.shutdown();
                    self.publish();
                    if let Some(ack) = ack {
                        let _ = ack.send(());
                    }
                    return;
                }
                LoopEvent::Command(command) => self.handle_command(command),
            }
            self.publish();
        }

        // every sender is gone, including our own transport's
        self.manager.shutdown();
        self.publish();
    }

    fn handle_transport(&mut self, id: ConnectionId, event: TransportEvent) {
        match event {
            TransportEvent::Opened => self.manager.handle_open(id),
            TransportEvent::Frame(text) => self.manager.handle_frame(id, &text),
            TransportEvent::Closed { code, reason } => self.manager.handle_close(id, code, &reason),
            TransportEvent::Error(error) => self.manager.handle_error(id, &error),
        }
    }

    fn handle_command(&mut self, command: SessionCommand) {
        debug!("live session: command {:?}", command);
        match command {
            SessionCommand::Connect => self.manager.connect(),
            SessionCommand::Disconnect(reason) => self.manager.disconnect(&reason),
            SessionCommand::ProvideCredential(key) => {
                let Some(source) = &self.tokens else {
                    debug!("live session: credential ignored, auth is disabled");
                    return;
                };
                source.set_api_key(key);
                if source.has_key() {
                    self.manager.credential_available();
                }
            }
            SessionCommand::RevokeCredential => {
                if let Some(source) = &self.tokens {
                    source.clear_api_key();
                    self.manager.credential_revoked();
                }
            }
            SessionCommand::Shutdown(_) => {}
        }
    }

    fn publish(&mut self) {
        for event in self.manager.take_events() {
            match &event {
                ConnectionEvent::Connected { reconnected: true } => {
                    info!("live session: push channel restored")
                }
                ConnectionEvent::ConnectionLost => {
                    warn!("live session: connection lost, reconnect manually to retry")
                }
                _ => {}
            }
            // no subscribers is fine
            let _ = self.events_tx.send(event);
        }
        set_flag(&self.connected_tx, self.manager.is_open());
        set_flag(&self.lost_tx, self.manager.connection_lost());
    }
}

fn set_flag(tx: &watch::Sender<bool>, value: bool) {
    tx.send_if_modified(|current| {
        if *current == value {
            return false;
        }
        *current = value;
        true
    });
}

/// Cloneable command side of a running session.
#[derive(Clone)]
pub struct SessionControl {
    tx: mpsc::Sender<LoopEvent>,
}

impl SessionControl {
    /// Reconnect now.  After the reconnect budget is exhausted this is the
    /// only way back; the budget refills once the dial opens.
    pub async fn connect(&self) {
        self.send(SessionCommand::Connect).await;
    }

    pub async fn disconnect(&self, reason: impl Into<String>) {
        self.send(SessionCommand::Disconnect(reason.into())).await;
    }

    pub async fn provide_credential(&self, api_key: impl Into<String>) {
        self.send(SessionCommand::ProvideCredential(api_key.into()))
            .await;
    }

    pub async fn revoke_credential(&self) {
        self.send(SessionCommand::RevokeCredential).await;
    }

    async fn send(&self, command: SessionCommand) {
        if self.tx.send(LoopEvent::Command(command)).await.is_err() {
            debug!("live session: command dropped, session has ended");
        }
    }
}

/// Everything the presentation layer reads and the few things it may do.
pub struct LiveHandle {
    control: SessionControl,
    cache: Arc<StationCache>,
    commentary: Arc<CommentaryStreamAccumulator>,
    connected: watch::Receiver<bool>,
    lost: watch::Receiver<bool>,
    events: broadcast::Sender<ConnectionEvent>,
    task: Option<JoinHandle<()>>,
}

impl LiveHandle {
    pub fn current(&self) -> Option<SharedSnapshot> {
        self.cache.current()
    }

    pub fn watch_current(&self) -> watch::Receiver<Option<SharedSnapshot>> {
        self.cache.subscribe()
    }

    pub fn commentary(&self) -> CommentaryBuffer {
        self.commentary.buffer()
    }

    pub fn watch_commentary(&self) -> watch::Receiver<CommentaryState> {
        self.commentary.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    pub fn watch_connected(&self) -> watch::Receiver<bool> {
        self.connected.clone()
    }

    /// Set once automatic recovery has given up; cleared by a manual connect.
    pub fn connection_lost(&self) -> bool {
        *self.lost.borrow()
    }

    pub fn watch_connection_lost(&self) -> watch::Receiver<bool> {
        self.lost.clone()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    pub fn active_station(&self) -> StationId {
        self.cache.active_station()
    }

    pub fn watch_active_station(&self) -> watch::Receiver<StationId> {
        self.cache.watch_active()
    }

    pub fn set_active_station(&self, station_id: StationId) {
        self.cache.set_active_station(station_id);
    }

    /// The roster as last reported by the pull layer.
    pub fn known_stations(&self) -> Vec<StationId> {
        self.cache.known_stations()
    }

    pub fn control(&self) -> SessionControl {
        self.control.clone()
    }

    /// Cancel the pending reconnect, close the live connection with a normal
    /// close, detach the message handlers, and wait for the loop to exit.
    pub async fn shutdown(mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        let (ack_tx, ack_rx) = oneshot::channel();
        self.control
            .send(SessionCommand::Shutdown(Some(ack_tx)))
            .await;
        let _ = ack_rx.await;
        if let Err(e) = task.await {
            warn!("live session: loop task failed: {}", e);
        }
    }
}

impl Drop for LiveHandle {
    fn drop(&mut self) {
        if self.task.is_some() {
            let _ = self
                .control
                .tx
                .try_send(LoopEvent::Command(SessionCommand::Shutdown(None)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use radio_proto::config::{AuthConfig, ServerConfig};

    #[test]
    fn test_options_from_config() {
        let config = Config {
            server: ServerConfig {
                base_url: "https://radio.example.com".into(),
                ws_path: "/live".into(),
            },
            auth: AuthConfig {
                enabled: true,
                ..AuthConfig::default()
            },
            ..Config::default()
        };
        let options = SessionOptions::from_config(&config).unwrap();
        assert_eq!(options.push_url.as_str(), "wss://radio.example.com/live");
        assert_eq!(
            options.token_url.unwrap().as_str(),
            "https://radio.example.com/api/auth/ws-token"
        );
        assert_eq!(options.default_station, StationId::from("main"));
        assert_eq!(options.policy.max_attempts, 5);
    }

    #[test]
    fn test_no_token_url_without_auth() {
        let options = SessionOptions::from_config(&Config::default()).unwrap();
        assert!(options.token_url.is_none());
        assert_eq!(options.push_url.as_str(), "ws://127.0.0.1:8000/ws");
    }
}
