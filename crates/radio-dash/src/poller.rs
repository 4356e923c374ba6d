//! Poller — the request/response side of the dashboard.
//!
//! Refreshes the station roster and the active station's now-playing,
//! next-up and history queries on a fixed interval.  The push router marks
//! queries stale through [`QueryInvalidator`]; stale queries are refetched
//! right away instead of waiting for the next tick.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use radio_proto::config::Config;
use radio_proto::protocol::{HistoryEntry, NextUpEntry, NowPlayingSnapshot, StationId, StationInfo};
use radio_proto::query::QueryKey;
use radio_sync::{QueryInvalidator, StationCache};
use reqwest::Url;
use serde::de::DeserializeOwned;
use tokio::sync::{watch, Notify};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Pull-only data: the push channel carries none of it.
#[derive(Debug, Clone, Default)]
pub struct PullViews {
    pub stations: Vec<StationInfo>,
    pub next_up: HashMap<StationId, Vec<NextUpEntry>>,
    pub history: HashMap<StationId, Vec<HistoryEntry>>,
}

pub struct Poller {
    client: reqwest::Client,
    base: Url,
    cache: Arc<StationCache>,
    history_limit: u32,
    next_up_limit: u32,
    stale: Mutex<HashSet<QueryKey>>,
    wake: Notify,
    views: watch::Sender<PullViews>,
}

impl Poller {
    pub fn new(config: &Config, cache: Arc<StationCache>) -> Result<Self> {
        let base = Url::parse(&config.server.base_url)
            .with_context(|| format!("invalid server.base_url {:?}", config.server.base_url))?;
        let (views, _) = watch::channel(PullViews::default());
        Ok(Self {
            client: reqwest::Client::new(),
            base,
            cache,
            history_limit: config.polling.history_limit,
            next_up_limit: config.polling.next_up_limit,
            stale: Mutex::new(HashSet::new()),
            wake: Notify::new(),
            views,
        })
    }

    pub fn stations(&self) -> Vec<StationInfo> {
        self.views.borrow().stations.clone()
    }

    pub fn next_up(&self, station: &StationId) -> Vec<NextUpEntry> {
        self.views.borrow().next_up.get(station).cloned().unwrap_or_default()
    }

    pub fn history(&self, station: &StationId) -> Vec<HistoryEntry> {
        self.views.borrow().history.get(station).cloned().unwrap_or_default()
    }

    /// Queue the roster and the active station's queries.
    pub fn invalidate_active(&self) {
        let active = self.cache.active_station();
        self.queue(std::iter::once(QueryKey::Stations).chain(QueryKey::on_air(&active)));
    }

    fn queue(&self, keys: impl IntoIterator<Item = QueryKey>) {
        self.stale.lock().extend(keys);
        self.wake.notify_one();
    }

    /// Tick until cancelled.  The first tick fires immediately.
    pub async fn run(self: Arc<Self>, interval: Duration, cancel: CancellationToken) {
        info!("poller: every {:?} against {}", interval, self.base);
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("poller: stopped");
                    break;
                }
                _ = ticker.tick() => self.invalidate_active(),
                _ = self.wake.notified() => {}
            }
            self.refresh_stale().await;
        }
    }

    /// Refetch every queued query once.  Failures are logged; the next tick
    /// queues the query again.
    pub async fn refresh_stale(&self) {
        let keys: Vec<QueryKey> = self.stale.lock().drain().collect();
        for key in keys {
            if let Err(e) = self.refresh(&key).await {
                warn!("poller: {} failed: {:#}", key, e);
            }
        }
    }

    pub async fn refresh(&self, key: &QueryKey) -> Result<()> {
        if let Some(station) = key.station() {
            let known = self.cache.known_stations();
            if !known.is_empty() && !known.contains(station) {
                debug!("poller: skipping {}, station left the roster", key);
                return Ok(());
            }
        }

        debug!("poller: refreshing {}", key);
        match key {
            QueryKey::Stations => {
                let roster: Vec<StationInfo> = self.get_json("/api/stations", &[]).await?;
                let ids: Vec<StationId> = roster.iter().map(|s| s.id.clone()).collect();
                let before = self.cache.active_station();
                self.cache.list_known_stations(&ids);
                self.views.send_modify(|v| v.stations = roster);

                let active = self.cache.active_station();
                if active != before {
                    info!("poller: active station fell back to {}", active);
                    self.queue(QueryKey::on_air(&active));
                }
            }
            QueryKey::NowPlaying(station) => {
                let snapshot: NowPlayingSnapshot = self
                    .get_json("/api/now", &[("station", station.to_string())])
                    .await?;
                self.cache.update(station.clone(), Arc::new(snapshot));
            }
            QueryKey::NextUp(station) => {
                let entries: Vec<NextUpEntry> = self
                    .get_json(
                        "/api/next",
                        &[
                            ("station", station.to_string()),
                            ("limit", self.next_up_limit.to_string()),
                        ],
                    )
                    .await?;
                self.views.send_modify(|v| {
                    v.next_up.insert(station.clone(), entries);
                });
            }
            QueryKey::History(station) => {
                let entries: Vec<HistoryEntry> = self
                    .get_json(
                        "/api/history",
                        &[
                            ("station", station.to_string()),
                            ("limit", self.history_limit.to_string()),
                            ("offset", "0".to_string()),
                        ],
                    )
                    .await?;
                self.views.send_modify(|v| {
                    v.history.insert(station.clone(), entries);
                });
            }
        }
        Ok(())
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let url = self.base.join(path)?;
        let response = self
            .client
            .get(url)
            .query(query)
            .header("Accept", "application/json")
            .send()
            .await
            .with_context(|| format!("Failed to fetch {}", path))?;

        if !response.status().is_success() {
            anyhow::bail!("{} returned status: {}", path, response.status());
        }

        response
            .json()
            .await
            .with_context(|| format!("Failed to parse {} response", path))
    }
}

impl QueryInvalidator for Poller {
    fn invalidate(&self, key: &QueryKey) {
        self.queue([key.clone()]);
    }
}
