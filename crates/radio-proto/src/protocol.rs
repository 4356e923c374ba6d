use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Identifier of an independently operated station (e.g. `"main"`, `"jazz"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StationId(String);

impl StationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for StationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for StationId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for StationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Snapshot ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackRef {
    #[serde(default)]
    pub id: Option<i64>,
    pub title: String,
    #[serde(default)]
    pub artist: String,
    #[serde(default)]
    pub album: Option<String>,
    #[serde(default)]
    pub duration_seconds: Option<f64>,
}

impl TrackRef {
    /// "Artist - Title", or just the title when the artist is unknown.
    pub fn display(&self) -> String {
        if self.artist.is_empty() {
            self.title.clone()
        } else {
            format!("{} - {}", self.artist, self.title)
        }
    }
}

/// One row of the play log: a track aired at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayRef {
    pub id: i64,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    /// Whether a DJ commentary was generated for this play.
    #[serde(default)]
    pub has_commentary: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub elapsed_seconds: f64,
    pub total_seconds: f64,
}

impl Progress {
    /// Elapsed share of the track, clamped to `0.0..=1.0`.
    pub fn fraction(&self) -> f64 {
        if self.total_seconds <= 0.0 {
            return 0.0;
        }
        (self.elapsed_seconds / self.total_seconds).clamp(0.0, 1.0)
    }
}

/// What is on air for one station right now.  Always replaced wholesale;
/// share it as [`SharedSnapshot`] and never mutate a published value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NowPlayingSnapshot {
    #[serde(default)]
    pub is_playing: bool,
    #[serde(default)]
    pub track: Option<TrackRef>,
    #[serde(default)]
    pub play: Option<PlayRef>,
    #[serde(default)]
    pub progress: Option<Progress>,
}

pub type SharedSnapshot = Arc<NowPlayingSnapshot>;

// ── Push channel ──────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// A decoded push message.  Station ids are already resolved: frames that
/// omit one are attributed to the default station passed to [`decode`].
///
/// [`decode`]: LiveMessage::decode
#[derive(Debug, Clone, PartialEq)]
pub enum LiveMessage {
    NowPlaying {
        station_id: StationId,
        payload: SharedSnapshot,
    },
    TrackChange {
        station_id: StationId,
        payload: SharedSnapshot,
    },
    CommentaryToken {
        token: String,
    },
    CommentaryReady {
        transcript: String,
    },
    /// Bare `{"type":"commentary"}` ready signal.  Some backends attach the
    /// transcript, most don't.
    Commentary {
        transcript: Option<String>,
    },
    Unknown,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireFrame {
    NowPlaying {
        #[serde(default)]
        station_id: Option<StationId>,
        data: NowPlayingWire,
    },
    TrackChange {
        #[serde(default)]
        station_id: Option<StationId>,
        data: NowPlayingWire,
    },
    CommentaryToken {
        token: String,
    },
    CommentaryReady {
        transcript: String,
    },
    Commentary {
        #[serde(default)]
        transcript: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct NowPlayingWire {
    #[serde(default)]
    station_id: Option<StationId>,
    #[serde(flatten)]
    snapshot: NowPlayingSnapshot,
}

impl NowPlayingWire {
    fn resolve(
        self,
        outer: Option<StationId>,
        default_station: &StationId,
    ) -> (StationId, SharedSnapshot) {
        let station_id = outer
            .or(self.station_id)
            .unwrap_or_else(|| default_station.clone());
        (station_id, Arc::new(self.snapshot))
    }
}

impl LiveMessage {
    pub fn decode(text: &str, default_station: &StationId) -> Result<Self, DecodeError> {
        let frame: WireFrame = serde_json::from_str(text)?;
        let msg = match frame {
            WireFrame::NowPlaying { station_id, data } => {
                let (station_id, payload) = data.resolve(station_id, default_station);
                LiveMessage::NowPlaying {
                    station_id,
                    payload,
                }
            }
            WireFrame::TrackChange { station_id, data } => {
                let (station_id, payload) = data.resolve(station_id, default_station);
                LiveMessage::TrackChange {
                    station_id,
                    payload,
                }
            }
            WireFrame::CommentaryToken { token } => LiveMessage::CommentaryToken { token },
            WireFrame::CommentaryReady { transcript } => {
                LiveMessage::CommentaryReady { transcript }
            }
            WireFrame::Commentary { transcript } => LiveMessage::Commentary { transcript },
            WireFrame::Unknown => LiveMessage::Unknown,
        };
        Ok(msg)
    }

    /// Wire tag, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            LiveMessage::NowPlaying { .. } => "now_playing",
            LiveMessage::TrackChange { .. } => "track_change",
            LiveMessage::CommentaryToken { .. } => "commentary_token",
            LiveMessage::CommentaryReady { .. } => "commentary_ready",
            LiveMessage::Commentary { .. } => "commentary",
            LiveMessage::Unknown => "unknown",
        }
    }
}

// ── Pull layer ────────────────────────────────────────────────────────────────

/// Entry of the `/api/stations` roster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationInfo {
    pub id: StationId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub play: PlayRef,
    pub track: TrackRef,
    #[serde(default)]
    pub commentary: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NextUpEntry {
    #[serde(default)]
    pub position: u32,
    pub track: TrackRef,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn main() -> StationId {
        StationId::from("main")
    }

    #[test]
    fn test_now_playing_with_outer_station_id() {
        let text = r#"{
            "type": "now_playing",
            "station_id": "jazz",
            "data": {
                "is_playing": true,
                "track": {"id": 7, "title": "So What", "artist": "Miles Davis"},
                "play": {"id": 99, "started_at": "2024-05-01T12:00:00Z"},
                "progress": {"elapsed_seconds": 30.0, "total_seconds": 120.0}
            }
        }"#;
        match LiveMessage::decode(text, &main()).unwrap() {
            LiveMessage::NowPlaying {
                station_id,
                payload,
            } => {
                assert_eq!(station_id.as_str(), "jazz");
                assert!(payload.is_playing);
                let track = payload.track.as_ref().unwrap();
                assert_eq!(track.display(), "Miles Davis - So What");
                assert_eq!(payload.play.as_ref().unwrap().id, 99);
                assert_eq!(payload.progress.unwrap().fraction(), 0.25);
            }
            other => panic!("Wrong message type: {:?}", other),
        }
    }

    #[test]
    fn test_station_id_inside_data_and_default() {
        let inner = r#"{"type":"track_change","data":{"station_id":"jazz","is_playing":false}}"#;
        match LiveMessage::decode(inner, &main()).unwrap() {
            LiveMessage::TrackChange { station_id, .. } => assert_eq!(station_id.as_str(), "jazz"),
            other => panic!("Wrong message type: {:?}", other),
        }

        let bare = r#"{"type":"now_playing","data":{"is_playing":true}}"#;
        match LiveMessage::decode(bare, &main()).unwrap() {
            LiveMessage::NowPlaying {
                station_id,
                payload,
            } => {
                assert_eq!(station_id, main());
                assert!(payload.track.is_none());
            }
            other => panic!("Wrong message type: {:?}", other),
        }
    }

    #[test]
    fn test_commentary_variants() {
        let token = LiveMessage::decode(r#"{"type":"commentary_token","token":"Hel"}"#, &main());
        assert_eq!(
            token.unwrap(),
            LiveMessage::CommentaryToken {
                token: "Hel".into()
            }
        );

        let signal = LiveMessage::decode(r#"{"type":"commentary"}"#, &main()).unwrap();
        assert_eq!(signal, LiveMessage::Commentary { transcript: None });

        let ready =
            LiveMessage::decode(r#"{"type":"commentary_ready","transcript":"Hi"}"#, &main());
        assert_eq!(ready.unwrap().kind(), "commentary_ready");
    }

    #[test]
    fn test_unknown_type_is_not_an_error() {
        let msg = LiveMessage::decode(r#"{"type":"listener_count","count":12}"#, &main());
        assert_eq!(msg.unwrap(), LiveMessage::Unknown);
    }

    #[test]
    fn test_malformed_frames_are_errors() {
        assert!(LiveMessage::decode("{not json", &main()).is_err());
        assert!(LiveMessage::decode(r#"{"data":{}}"#, &main()).is_err());
        // known type, payload missing
        assert!(LiveMessage::decode(r#"{"type":"now_playing"}"#, &main()).is_err());
    }

    #[test]
    fn test_progress_fraction_clamps() {
        let p = Progress {
            elapsed_seconds: 500.0,
            total_seconds: 100.0,
        };
        assert_eq!(p.fraction(), 1.0);
        let zero = Progress {
            elapsed_seconds: 5.0,
            total_seconds: 0.0,
        };
        assert_eq!(zero.fraction(), 0.0);
    }
}
