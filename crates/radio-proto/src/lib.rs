//! Shared types for the radio dashboard: push-channel wire format, pull-layer
//! response shapes, query keys, configuration and persisted preferences.

pub mod config;
pub mod platform;
pub mod prefs;
pub mod protocol;
pub mod query;

pub use protocol::{LiveMessage, NowPlayingSnapshot, StationId};
pub use query::QueryKey;
