//! Hand-driven transport and scheduler for exercising `ConnectionManager`
//! without sockets or real timers.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use radio_proto::protocol::StationId;
use radio_sync::{
    CommentaryStreamAccumulator, ConnectionEvent, ConnectionId, ConnectionManager,
    LiveEventRouter, ReconnectPolicy, Scheduler, StationCache, TimerId, Transport,
};

pub const ABNORMAL: u16 = 1006;

#[derive(Default)]
pub struct FakeTransport {
    pub opened: Vec<ConnectionId>,
    pub closed: Vec<(ConnectionId, u16, String)>,
}

impl Transport for FakeTransport {
    fn open(&mut self, id: ConnectionId) {
        self.opened.push(id);
    }

    fn close(&mut self, id: ConnectionId, code: u16, reason: &str) {
        self.closed.push((id, code, reason.to_string()));
    }
}

#[derive(Default)]
pub struct FakeScheduler {
    next: u64,
    pub scheduled: Vec<(TimerId, Duration)>,
    pub cancelled: Vec<TimerId>,
}

impl FakeScheduler {
    pub fn last(&self) -> Option<TimerId> {
        self.scheduled.last().map(|(id, _)| *id)
    }

    pub fn delays_ms(&self) -> Vec<u64> {
        self.scheduled
            .iter()
            .map(|(_, d)| d.as_millis() as u64)
            .collect()
    }
}

impl Scheduler for FakeScheduler {
    fn schedule(&mut self, delay: Duration) -> TimerId {
        self.next += 1;
        let id = TimerId(self.next);
        self.scheduled.push((id, delay));
        id
    }

    fn cancel(&mut self, timer: TimerId) {
        self.cancelled.push(timer);
    }
}

pub type TestManager = ConnectionManager<FakeTransport, FakeScheduler>;

pub fn policy(max_attempts: u32) -> ReconnectPolicy {
    ReconnectPolicy {
        max_attempts,
        base_delay: Duration::from_millis(1000),
        max_delay: Duration::from_millis(30_000),
        jitter: false,
    }
}

pub fn manager(max_attempts: u32) -> TestManager {
    ConnectionManager::new(
        FakeTransport::default(),
        FakeScheduler::default(),
        policy(max_attempts),
    )
}

/// The connection the manager is currently dialing or holding.
pub fn live(m: &TestManager) -> ConnectionId {
    m.current_connection().expect("no live connection")
}

/// Connect and report the dial as successful.
pub fn connect_and_open(m: &mut TestManager) -> ConnectionId {
    m.connect();
    let id = live(m);
    m.handle_open(id);
    id
}

/// Fire the most recently scheduled reconnect timer.
pub fn fire_timer(m: &mut TestManager) {
    let timer = m.scheduler().last().expect("no timer scheduled");
    m.handle_timer(timer);
}

pub fn count_lost(events: &[ConnectionEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, ConnectionEvent::ConnectionLost))
        .count()
}

pub struct Pipeline {
    pub manager: TestManager,
    pub cache: Arc<StationCache>,
    pub commentary: Arc<CommentaryStreamAccumulator>,
}

/// Manager with a router attached, the way a live session wires them.
pub fn pipeline(active: &str) -> Pipeline {
    let cache = Arc::new(StationCache::new(StationId::from(active)));
    let commentary = Arc::new(CommentaryStreamAccumulator::new());
    let router = LiveEventRouter::new(
        cache.clone(),
        commentary.clone(),
        Arc::new(radio_sync::NoopInvalidator),
        StationId::from("main"),
    );
    let mut manager = manager(5);
    manager.on_message(router.into_handler());
    Pipeline {
        manager,
        cache,
        commentary,
    }
}

pub fn now_playing(station: &str, title: &str) -> String {
    format!(
        r#"{{"type":"now_playing","station_id":"{}","data":{{"is_playing":true,"track":{{"title":"{}","artist":"Test Artist"}}}}}}"#,
        station, title
    )
}
