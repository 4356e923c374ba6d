//! Reconnect timers on the tokio clock.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use crate::connection::{Scheduler, TimerId};
use crate::session::LoopEvent;

/// Reconnect timers as sleeping tokio tasks that post [`LoopEvent::Timer`]
/// when they fire.  Cancelling aborts the task; a timer that already fired
/// is filtered out by the manager's id check.
pub struct TokioScheduler {
    events: mpsc::Sender<LoopEvent>,
    next: u64,
    pending: HashMap<TimerId, AbortHandle>,
}

impl TokioScheduler {
    pub fn new(events: mpsc::Sender<LoopEvent>) -> Self {
        Self {
            events,
            next: 0,
            pending: HashMap::new(),
        }
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&mut self, delay: Duration) -> TimerId {
        self.pending.retain(|_, handle| !handle.is_finished());

        self.next += 1;
        let id = TimerId(self.next);
        let events = self.events.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(LoopEvent::Timer(id)).await;
        });
        self.pending.insert(id, task.abort_handle());
        id
    }

    fn cancel(&mut self, timer: TimerId) {
        if let Some(handle) = self.pending.remove(&timer) {
            handle.abort();
        }
    }
}

impl Drop for TokioScheduler {
    fn drop(&mut self) {
        for (_, handle) in self.pending.drain() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_fired_timer_posts_its_id() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut scheduler = TokioScheduler::new(tx);
        let first = scheduler.schedule(Duration::from_secs(2));
        let second = scheduler.schedule(Duration::from_secs(1));

        match rx.recv().await {
            Some(LoopEvent::Timer(id)) => assert_eq!(id, second),
            other => panic!("unexpected event: {:?}", other),
        }
        match rx.recv().await {
            Some(LoopEvent::Timer(id)) => assert_eq!(id, first),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_timer_never_fires() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut scheduler = TokioScheduler::new(tx);
        let cancelled = scheduler.schedule(Duration::from_secs(1));
        let kept = scheduler.schedule(Duration::from_secs(5));
        scheduler.cancel(cancelled);

        match rx.recv().await {
            Some(LoopEvent::Timer(id)) => assert_eq!(id, kept),
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
