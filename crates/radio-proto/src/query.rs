//! Keys of the pull-layer queries the push channel can invalidate.

use std::fmt;

use crate::protocol::StationId;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueryKey {
    /// Station roster (`/api/stations`).
    Stations,
    NowPlaying(StationId),
    NextUp(StationId),
    History(StationId),
}

impl QueryKey {
    /// The three queries that describe a station's on-air state.  A track
    /// change makes all of them stale at once.
    pub fn on_air(station: &StationId) -> [QueryKey; 3] {
        [
            QueryKey::NowPlaying(station.clone()),
            QueryKey::NextUp(station.clone()),
            QueryKey::History(station.clone()),
        ]
    }

    pub fn station(&self) -> Option<&StationId> {
        match self {
            QueryKey::Stations => None,
            QueryKey::NowPlaying(s) | QueryKey::NextUp(s) | QueryKey::History(s) => Some(s),
        }
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryKey::Stations => write!(f, "stations"),
            QueryKey::NowPlaying(s) => write!(f, "now-playing/{}", s),
            QueryKey::NextUp(s) => write!(f, "next-up/{}", s),
            QueryKey::History(s) => write!(f, "history/{}", s),
        }
    }
}
