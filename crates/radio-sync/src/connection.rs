//! ConnectionManager — owns the lifecycle of the single push connection.
//!
//! The manager performs no I/O of its own.  It drives a [`Transport`] (dial /
//! close a socket) and a [`Scheduler`] (reconnect timers), and is driven back
//! through the `handle_*` callbacks.  The tokio runtime in
//! [`session`](crate::session) feeds it real websocket and timer events; tests
//! feed it by hand.
//!
//! # States
//! ```text
//!  Disconnected ──connect──▶ Connecting ──open──▶ Open
//!       ▲                       │   │              │
//!       │◀──── dial failed ─────┘   │              │
//!       │◀──── abnormal close ──────┼──────────────┘
//!       │                           ▼              ▼
//!       └────────────────────── Closing ◀── disconnect
//! ```
//!
//! Every transport callback carries the [`ConnectionId`] it belongs to.  Once
//! a connection is torn down its id is forgotten, so late events from a stale
//! socket never move the state machine.

use std::collections::BTreeMap;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::policy::ReconnectPolicy;

/// Close code used for every caller-initiated close.
pub const NORMAL_CLOSURE: u16 = 1000;
/// Reported when the socket dropped without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Closing,
}

impl ConnectionState {
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Open)
                | (Connecting, Disconnected)
                | (Connecting, Closing)
                | (Open, Closing)
                | (Open, Disconnected)
                | (Closing, Disconnected)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub u64);

/// Returned by [`ConnectionManager::on_message`]; pass it back to
/// [`ConnectionManager::unsubscribe`] to detach the handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Subscription(u64);

pub type MessageHandler = Box<dyn FnMut(&str) + Send>;

/// Dials and closes sockets.  Outcomes are reported asynchronously through
/// [`ConnectionManager::handle_open`] / [`ConnectionManager::handle_close`].
pub trait Transport {
    fn open(&mut self, id: ConnectionId);
    fn close(&mut self, id: ConnectionId, code: u16, reason: &str);
}

/// One-shot timers.  A fired timer is reported through
/// [`ConnectionManager::handle_timer`].
pub trait Scheduler {
    fn schedule(&mut self, delay: Duration) -> TimerId;
    fn cancel(&mut self, timer: TimerId);
}

/// Side effects for the embedding application, drained with
/// [`ConnectionManager::take_events`].
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    StateChanged {
        from: ConnectionState,
        to: ConnectionState,
    },
    /// The channel is open.  `reconnected` is false for the first connection
    /// of a session, so callers only announce genuine recoveries.
    Connected { reconnected: bool },
    ReconnectScheduled { attempt: u32, delay: Duration },
    /// Automatic recovery gave up.  Emitted once per exhaustion.
    ConnectionLost,
}

pub struct ConnectionManager<T, S> {
    transport: T,
    scheduler: S,
    policy: ReconnectPolicy,
    state: ConnectionState,
    /// Reconnects scheduled since the last successful open.
    attempt: u32,
    current: Option<ConnectionId>,
    next_connection: u64,
    pending_timer: Option<TimerId>,
    auth_required: bool,
    credential_available: bool,
    /// A connect was requested but parked until credentials show up.
    awaiting_credential: bool,
    lost_signalled: bool,
    handlers: BTreeMap<u64, MessageHandler>,
    next_subscription: u64,
    events: Vec<ConnectionEvent>,
}

impl<T: Transport, S: Scheduler> ConnectionManager<T, S> {
    pub fn new(transport: T, scheduler: S, policy: ReconnectPolicy) -> Self {
        Self {
            transport,
            scheduler,
            policy,
            state: ConnectionState::Disconnected,
            attempt: 0,
            current: None,
            next_connection: 1,
            pending_timer: None,
            auth_required: false,
            credential_available: false,
            awaiting_credential: false,
            lost_signalled: false,
            handlers: BTreeMap::new(),
            next_subscription: 1,
            events: Vec::new(),
        }
    }

    /// Require a credential before dialing.  `available` says whether one is
    /// on hand right now.
    pub fn with_auth(mut self, available: bool) -> Self {
        self.auth_required = true;
        self.credential_available = available;
        self
    }

    // ── accessors ────────────────────────────────────────────────────────────

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn reset_attempts(&mut self) {
        self.attempt = 0;
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    pub fn connection_lost(&self) -> bool {
        self.lost_signalled
    }

    pub fn is_awaiting_credential(&self) -> bool {
        self.awaiting_credential
    }

    pub fn has_pending_reconnect(&self) -> bool {
        self.pending_timer.is_some()
    }

    pub fn current_connection(&self) -> Option<ConnectionId> {
        self.current
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }

    pub fn take_events(&mut self) -> Vec<ConnectionEvent> {
        std::mem::take(&mut self.events)
    }

    // ── handlers ─────────────────────────────────────────────────────────────

    /// Register a handler for inbound text frames.  Handlers run in
    /// registration order.
    pub fn on_message(&mut self, handler: impl FnMut(&str) + Send + 'static) -> Subscription {
        let id = self.next_subscription;
        self.next_subscription += 1;
        self.handlers.insert(id, Box::new(handler));
        Subscription(id)
    }

    /// Returns false if the subscription was already detached.
    pub fn unsubscribe(&mut self, subscription: Subscription) -> bool {
        self.handlers.remove(&subscription.0).is_some()
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    // ── caller operations ────────────────────────────────────────────────────

    /// Open the push channel.  An existing connection is closed first with
    /// [`NORMAL_CLOSURE`] so stale sockets never linger.
    pub fn connect(&mut self) {
        self.cancel_reconnect();
        if matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Open
        ) {
            self.teardown("reconnect requested");
        }

        // re-arm the terminal signal; the counter itself resets on open
        self.lost_signalled = false;

        if self.auth_required && !self.credential_available {
            info!("push channel: waiting for credentials before connecting");
            self.awaiting_credential = true;
            return;
        }

        self.dial();
    }

    /// Close the channel and stop any pending reconnect.  Safe in every state.
    pub fn disconnect(&mut self, reason: &str) {
        self.cancel_reconnect();
        self.awaiting_credential = false;
        if matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Open
        ) {
            info!("push channel: disconnecting ({})", reason);
            self.teardown(reason);
        }
    }

    /// Teardown order: cancel the reconnect timer, close with
    /// [`NORMAL_CLOSURE`], then detach every message handler.
    pub fn shutdown(&mut self) {
        self.disconnect("shutdown");
        self.handlers.clear();
    }

    /// A credential became available; resume a parked connect.
    pub fn credential_available(&mut self) {
        self.credential_available = true;
        if self.awaiting_credential && self.state == ConnectionState::Disconnected {
            info!("push channel: credentials available, connecting");
            self.dial();
        }
    }

    /// The credential expired or was withdrawn.  The live connection is left
    /// alone; the next dial parks instead.
    pub fn credential_revoked(&mut self) {
        self.credential_available = false;
    }

    // ── transport callbacks ──────────────────────────────────────────────────

    pub fn handle_open(&mut self, id: ConnectionId) {
        if !self.is_current(id) || self.state != ConnectionState::Connecting {
            debug!("push channel: ignoring open for stale connection {:?}", id);
            return;
        }

        let reconnected = self.attempt > 0;
        self.set_state(ConnectionState::Open);
        self.attempt = 0;
        info!("push channel: open (reconnected={})", reconnected);
        self.events.push(ConnectionEvent::Connected { reconnected });
    }

    pub fn handle_frame(&mut self, id: ConnectionId, text: &str) {
        if !self.is_current(id) || self.state != ConnectionState::Open {
            debug!("push channel: dropping frame from stale connection {:?}", id);
            return;
        }
        for handler in self.handlers.values_mut() {
            handler(text);
        }
    }

    /// Transport errors are logged only; a close callback always follows.
    pub fn handle_error(&mut self, id: ConnectionId, error: &str) {
        if self.is_current(id) {
            warn!("push channel: transport error: {}", error);
        } else {
            debug!("push channel: stale connection {:?} error: {}", id, error);
        }
    }

    pub fn handle_close(&mut self, id: ConnectionId, code: u16, reason: &str) {
        if !self.is_current(id) {
            debug!("push channel: ignoring close for stale connection {:?}", id);
            return;
        }

        self.current = None;
        self.set_state(ConnectionState::Disconnected);

        if code == NORMAL_CLOSURE {
            info!("push channel: closed normally ({})", reason);
            return;
        }

        warn!("push channel: closed abnormally code={} reason={:?}", code, reason);
        self.schedule_reconnect();
    }

    pub fn handle_timer(&mut self, timer: TimerId) {
        if self.pending_timer != Some(timer) {
            debug!("push channel: ignoring stale timer {:?}", timer);
            return;
        }
        self.pending_timer = None;

        if self.state != ConnectionState::Disconnected {
            return;
        }

        if self.auth_required && !self.credential_available {
            info!("push channel: reconnect parked until credentials are available");
            self.awaiting_credential = true;
            return;
        }

        debug!("push channel: reconnect attempt {}", self.attempt);
        self.dial();
    }

    // ── internals ────────────────────────────────────────────────────────────

    fn is_current(&self, id: ConnectionId) -> bool {
        self.current == Some(id)
    }

    fn dial(&mut self) {
        self.awaiting_credential = false;
        let id = ConnectionId(self.next_connection);
        self.next_connection += 1;
        self.current = Some(id);
        self.set_state(ConnectionState::Connecting);
        self.transport.open(id);
    }

    /// Connecting/Open → Closing → Disconnected.  The old id is forgotten, so
    /// the transport's own close report for it is ignored.
    fn teardown(&mut self, reason: &str) {
        self.set_state(ConnectionState::Closing);
        if let Some(id) = self.current.take() {
            self.transport.close(id, NORMAL_CLOSURE, reason);
        }
        self.set_state(ConnectionState::Disconnected);
    }

    fn schedule_reconnect(&mut self) {
        if self.policy.is_exhausted(self.attempt) {
            if !self.lost_signalled {
                warn!(
                    "push channel: giving up after {} reconnect attempts",
                    self.attempt
                );
                self.lost_signalled = true;
                self.events.push(ConnectionEvent::ConnectionLost);
            }
            return;
        }

        let delay = self.policy.next_delay(self.attempt);
        self.attempt += 1;
        self.pending_timer = Some(self.scheduler.schedule(delay));
        info!(
            "push channel: reconnect {}/{} in {:?}",
            self.attempt, self.policy.max_attempts, delay
        );
        self.events.push(ConnectionEvent::ReconnectScheduled {
            attempt: self.attempt,
            delay,
        });
    }

    fn cancel_reconnect(&mut self) {
        if let Some(timer) = self.pending_timer.take() {
            self.scheduler.cancel(timer);
        }
    }

    fn set_state(&mut self, next: ConnectionState) {
        let from = self.state;
        if from == next {
            return;
        }
        if !from.can_transition_to(next) {
            warn!("push channel: unexpected transition {:?} → {:?}", from, next);
        }
        debug!("push channel: {:?} → {:?}", from, next);
        self.state = next;
        self.events
            .push(ConnectionEvent::StateChanged { from, to: next });
    }
}
