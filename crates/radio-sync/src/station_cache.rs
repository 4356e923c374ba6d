//! StationCache — one now-playing snapshot per station plus the active
//! station selector.
//!
//! `current` is a projection: `snapshots[active]`.  It is recomputed inside the
//! same critical section as every mutation and published on a watch channel,
//! so presentation code never sees a snapshot attributed to the wrong station.
//! Created once at startup and shared as `Arc<StationCache>`; it outlives
//! individual push sessions.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use radio_proto::protocol::{SharedSnapshot, StationId};
use tokio::sync::watch;
use tracing::{debug, info};

struct CacheInner {
    snapshots: HashMap<StationId, SharedSnapshot>,
    active: StationId,
    known: Vec<StationId>,
}

impl CacheInner {
    fn project(&self) -> Option<SharedSnapshot> {
        self.snapshots.get(&self.active).cloned()
    }
}

pub struct StationCache {
    inner: Mutex<CacheInner>,
    current_tx: watch::Sender<Option<SharedSnapshot>>,
    active_tx: watch::Sender<StationId>,
}

impl StationCache {
    pub fn new(default_active: StationId) -> Self {
        let (current_tx, _) = watch::channel(None);
        let (active_tx, _) = watch::channel(default_active.clone());
        Self {
            inner: Mutex::new(CacheInner {
                snapshots: HashMap::new(),
                active: default_active,
                known: Vec::new(),
            }),
            current_tx,
            active_tx,
        }
    }

    /// Replace the cached snapshot for `station_id`.  Push updates and pull
    /// refreshes both land here; the last writer wins.
    pub fn update(&self, station_id: StationId, snapshot: SharedSnapshot) {
        let mut inner = self.inner.lock();
        let is_active = station_id == inner.active;
        debug!(
            "station cache: update {} (active={}, playing={})",
            station_id, is_active, snapshot.is_playing
        );
        inner.snapshots.insert(station_id, snapshot);
        if is_active {
            self.publish(&inner);
        }
    }

    /// Switch the projection.  With nothing cached for the new station,
    /// `current` becomes `None` until its first update arrives.
    pub fn set_active_station(&self, station_id: StationId) {
        let mut inner = self.inner.lock();
        if inner.active == station_id {
            return;
        }
        info!("station cache: active {} → {}", inner.active, station_id);
        inner.active = station_id;
        self.publish(&inner);
    }

    /// Reconcile against the roster from the pull layer.  Snapshots of
    /// stations that left the roster are dropped; if the active station left,
    /// the first roster entry becomes active.  An empty roster changes nothing
    /// but the known list.
    pub fn list_known_stations(&self, stations: &[StationId]) {
        let mut inner = self.inner.lock();

        let mut known: Vec<StationId> = Vec::with_capacity(stations.len());
        for id in stations {
            if !known.contains(id) {
                known.push(id.clone());
            }
        }
        inner.known = known;

        let Some(first) = inner.known.first().cloned() else {
            return;
        };

        let roster = inner.known.clone();
        inner.snapshots.retain(|id, _| roster.contains(id));

        if !roster.contains(&inner.active) {
            info!(
                "station cache: active {} left the roster, falling back to {}",
                inner.active, first
            );
            inner.active = first;
        }
        self.publish(&inner);
    }

    pub fn current(&self) -> Option<SharedSnapshot> {
        self.current_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<SharedSnapshot>> {
        self.current_tx.subscribe()
    }

    pub fn active_station(&self) -> StationId {
        self.inner.lock().active.clone()
    }

    pub fn watch_active(&self) -> watch::Receiver<StationId> {
        self.active_tx.subscribe()
    }

    pub fn known_stations(&self) -> Vec<StationId> {
        self.inner.lock().known.clone()
    }

    pub fn snapshot_for(&self, station_id: &StationId) -> Option<SharedSnapshot> {
        self.inner.lock().snapshots.get(station_id).cloned()
    }

    /// Push the projection and selector out.  Called with the lock held.
    fn publish(&self, inner: &CacheInner) {
        let next = inner.project();
        self.current_tx.send_if_modified(|current| {
            let same = match (&*current, &next) {
                (Some(a), Some(b)) => Arc::ptr_eq(a, b),
                (None, None) => true,
                _ => false,
            };
            if !same {
                *current = next.clone();
            }
            !same
        });
        self.active_tx.send_if_modified(|active| {
            if *active == inner.active {
                return false;
            }
            *active = inner.active.clone();
            true
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use radio_proto::protocol::{NowPlayingSnapshot, TrackRef};

    fn snapshot(title: &str) -> SharedSnapshot {
        Arc::new(NowPlayingSnapshot {
            is_playing: true,
            track: Some(TrackRef {
                id: None,
                title: title.to_string(),
                artist: String::new(),
                album: None,
                duration_seconds: None,
            }),
            ..Default::default()
        })
    }

    fn id(s: &str) -> StationId {
        StationId::from(s)
    }

    #[test]
    fn test_update_to_active_is_visible_immediately() {
        let cache = StationCache::new(id("main"));
        for title in ["a", "b", "c"] {
            let snap = snapshot(title);
            cache.update(id("main"), snap.clone());
            assert!(Arc::ptr_eq(&cache.current().unwrap(), &snap));
        }
    }

    #[test]
    fn test_update_to_other_station_leaves_current_alone() {
        let cache = StationCache::new(id("main"));
        let main = snapshot("main track");
        cache.update(id("main"), main.clone());
        cache.update(id("jazz"), snapshot("jazz track"));
        assert!(Arc::ptr_eq(&cache.current().unwrap(), &main));
    }

    #[test]
    fn test_switch_to_uncached_station_clears_current() {
        let cache = StationCache::new(id("main"));
        cache.update(id("main"), snapshot("main track"));
        cache.set_active_station(id("rock"));
        assert!(cache.current().is_none());
        assert_eq!(cache.active_station(), id("rock"));
    }

    #[test]
    fn test_switch_back_reprojects_cached_snapshot() {
        let cache = StationCache::new(id("main"));
        let main = snapshot("main track");
        cache.update(id("main"), main.clone());
        cache.set_active_station(id("jazz"));
        cache.set_active_station(id("main"));
        assert!(Arc::ptr_eq(&cache.current().unwrap(), &main));
    }

    #[test]
    fn test_roster_fallback_when_active_disappears() {
        let cache = StationCache::new(id("main"));
        let jazz = snapshot("jazz track");
        cache.update(id("jazz"), jazz.clone());
        cache.update(id("main"), snapshot("main track"));

        cache.list_known_stations(&[id("jazz"), id("rock"), id("jazz")]);

        assert_eq!(cache.active_station(), id("jazz"));
        assert_eq!(cache.known_stations(), vec![id("jazz"), id("rock")]);
        assert!(Arc::ptr_eq(&cache.current().unwrap(), &jazz));
        assert!(cache.snapshot_for(&id("main")).is_none());
    }

    #[test]
    fn test_roster_keeps_active_when_present() {
        let cache = StationCache::new(id("jazz"));
        cache.list_known_stations(&[id("main"), id("jazz")]);
        assert_eq!(cache.active_station(), id("jazz"));
    }

    #[test]
    fn test_empty_roster_keeps_active() {
        let cache = StationCache::new(id("main"));
        let main = snapshot("main track");
        cache.update(id("main"), main.clone());
        cache.list_known_stations(&[]);
        assert_eq!(cache.active_station(), id("main"));
        assert!(Arc::ptr_eq(&cache.current().unwrap(), &main));
    }

    #[tokio::test]
    async fn test_watchers_follow_active_switch() {
        let cache = StationCache::new(id("main"));
        let mut current = cache.subscribe();
        let mut active = cache.watch_active();

        let jazz = snapshot("jazz track");
        cache.update(id("jazz"), jazz.clone());
        assert!(!current.has_changed().unwrap());

        cache.set_active_station(id("jazz"));
        active.changed().await.unwrap();
        assert_eq!(*active.borrow_and_update(), id("jazz"));
        current.changed().await.unwrap();
        let seen = current.borrow_and_update().clone().unwrap();
        assert!(Arc::ptr_eq(&seen, &jazz));
    }
}
