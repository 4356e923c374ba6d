//! LiveEventRouter — decodes push frames and dispatches them.
//!
//! | message                          | effect                                              |
//! |----------------------------------|-----------------------------------------------------|
//! | `now_playing`, `track_change`    | cache update; now-playing, next-up, history stale   |
//! | `commentary_token`               | append to the commentary buffer                     |
//! | `commentary_ready`               | replace the buffer with the transcript; history stale |
//! | `commentary`                     | finish the buffer; history stale                    |
//! | anything else                    | ignored                                             |
//!
//! The router keeps no state of its own.  A malformed frame is logged and
//! dropped; it never reaches the cache or the connection.

use std::sync::Arc;

use radio_proto::protocol::{DecodeError, LiveMessage, StationId};
use radio_proto::query::QueryKey;
use tracing::{debug, warn};

use crate::commentary::CommentaryStreamAccumulator;
use crate::station_cache::StationCache;

/// Invalidate-by-key hook of the polling layer.  Marking a query stale asks
/// the poller to refetch it soon; the push payload is only a lightweight
/// projection of what the pull API returns.
pub trait QueryInvalidator: Send + Sync {
    fn invalidate(&self, key: &QueryKey);
}

impl<F> QueryInvalidator for F
where
    F: Fn(&QueryKey) + Send + Sync,
{
    fn invalidate(&self, key: &QueryKey) {
        self(key)
    }
}

/// For deployments without a polling layer.
pub struct NoopInvalidator;

impl QueryInvalidator for NoopInvalidator {
    fn invalidate(&self, _key: &QueryKey) {}
}

#[derive(Clone)]
pub struct LiveEventRouter {
    cache: Arc<StationCache>,
    commentary: Arc<CommentaryStreamAccumulator>,
    invalidator: Arc<dyn QueryInvalidator>,
    default_station: StationId,
}

impl LiveEventRouter {
    pub fn new(
        cache: Arc<StationCache>,
        commentary: Arc<CommentaryStreamAccumulator>,
        invalidator: Arc<dyn QueryInvalidator>,
        default_station: StationId,
    ) -> Self {
        Self {
            cache,
            commentary,
            invalidator,
            default_station,
        }
    }

    /// Decode and dispatch one frame, swallowing decode errors.
    pub fn handle_frame(&self, frame: &str) {
        if let Err(e) = self.try_handle_frame(frame) {
            warn!("push frame dropped: {} ({} bytes)", e, frame.len());
        }
    }

    pub fn try_handle_frame(&self, frame: &str) -> Result<(), DecodeError> {
        let msg = LiveMessage::decode(frame, &self.default_station)?;
        self.dispatch(msg);
        Ok(())
    }

    pub fn dispatch(&self, msg: LiveMessage) {
        debug!("push message: {}", msg.kind());
        match msg {
            LiveMessage::NowPlaying {
                station_id,
                payload,
            }
            | LiveMessage::TrackChange {
                station_id,
                payload,
            } => {
                self.cache.update(station_id.clone(), payload);
                for key in QueryKey::on_air(&station_id) {
                    self.invalidator.invalidate(&key);
                }
            }
            LiveMessage::CommentaryToken { token } => {
                self.commentary.append_token(&token);
            }
            LiveMessage::CommentaryReady { transcript } => {
                self.commentary.set_ready(&transcript);
                self.invalidate_history();
            }
            LiveMessage::Commentary { transcript } => {
                match transcript {
                    Some(text) => self.commentary.set_ready(&text),
                    None => self.commentary.finish(),
                }
                self.invalidate_history();
            }
            LiveMessage::Unknown => {}
        }
    }

    /// Adapter for [`ConnectionManager::on_message`](crate::ConnectionManager::on_message).
    pub fn into_handler(self) -> impl FnMut(&str) + Send + 'static {
        move |frame| self.handle_frame(frame)
    }

    /// Commentary is persisted with the play of the active station.
    fn invalidate_history(&self) {
        let station = self.cache.active_station();
        self.invalidator.invalidate(&QueryKey::History(station));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn router() -> (
        LiveEventRouter,
        Arc<StationCache>,
        Arc<CommentaryStreamAccumulator>,
        Arc<Mutex<Vec<QueryKey>>>,
    ) {
        let cache = Arc::new(StationCache::new(StationId::from("main")));
        let commentary = Arc::new(CommentaryStreamAccumulator::new());
        let stale = Arc::new(Mutex::new(Vec::new()));
        let sink = stale.clone();
        let invalidator = move |key: &QueryKey| sink.lock().push(key.clone());
        let router = LiveEventRouter::new(
            cache.clone(),
            commentary.clone(),
            Arc::new(invalidator),
            StationId::from("main"),
        );
        (router, cache, commentary, stale)
    }

    #[test]
    fn test_now_playing_updates_cache_and_invalidates_group() {
        let (router, cache, _, stale) = router();
        router.handle_frame(
            r#"{"type":"now_playing","station_id":"jazz","data":{"is_playing":true}}"#,
        );

        assert!(cache.current().is_none());
        assert!(cache.snapshot_for(&StationId::from("jazz")).is_some());
        let jazz = StationId::from("jazz");
        assert_eq!(*stale.lock(), QueryKey::on_air(&jazz).to_vec());
    }

    #[test]
    fn test_commentary_ready_invalidates_history_only() {
        let (router, _, commentary, stale) = router();
        router.handle_frame(r#"{"type":"commentary_token","token":"Hi "}"#);
        assert!(stale.lock().is_empty());
        router.handle_frame(r#"{"type":"commentary_ready","transcript":"Hi there."}"#);

        assert_eq!(commentary.buffer().text, "Hi there.");
        assert_eq!(
            *stale.lock(),
            vec![QueryKey::History(StationId::from("main"))]
        );
    }

    #[test]
    fn test_bare_commentary_signal_finishes_stream() {
        let (router, _, commentary, stale) = router();
        router.handle_frame(r#"{"type":"commentary_token","token":"Streamed"}"#);
        router.handle_frame(r#"{"type":"commentary"}"#);

        let buf = commentary.buffer();
        assert_eq!(buf.text, "Streamed");
        assert!(!buf.is_streaming);
        assert_eq!(stale.lock().len(), 1);
    }

    #[test]
    fn test_malformed_and_unknown_frames_change_nothing() {
        let (router, cache, commentary, stale) = router();
        router.handle_frame("{{{");
        router.handle_frame(r#"{"type":"now_playing","data":"oops"}"#);
        router.handle_frame(r#"{"type":"heartbeat"}"#);

        assert!(router.try_handle_frame("{{{").is_err());
        assert!(router.try_handle_frame(r#"{"type":"heartbeat"}"#).is_ok());
        assert!(cache.current().is_none());
        assert_eq!(commentary.buffer(), crate::commentary::CommentaryBuffer::default());
        assert!(stale.lock().is_empty());
    }
}
