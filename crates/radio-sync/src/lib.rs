//! Real-time synchronization core of the radio dashboard.
//!
//! The pure parts ([`ConnectionManager`], [`LiveEventRouter`],
//! [`StationCache`], [`CommentaryStreamAccumulator`], [`ReconnectPolicy`])
//! do no I/O and are driven by hand in tests.  [`LiveSession`] wires them to
//! a websocket and tokio timers.

pub mod auth;
pub mod commentary;
pub mod connection;
pub mod endpoint;
pub mod error;
pub mod policy;
pub mod router;
pub mod session;
pub mod station_cache;
pub mod timer;
pub mod ws;

pub use commentary::{
    CommentaryBuffer, CommentaryPhase, CommentaryState, CommentaryStreamAccumulator,
};
pub use connection::{
    ConnectionEvent, ConnectionId, ConnectionManager, ConnectionState, Scheduler, Subscription,
    TimerId, Transport,
};
pub use error::TransportError;
pub use policy::ReconnectPolicy;
pub use router::{LiveEventRouter, NoopInvalidator, QueryInvalidator};
pub use session::{LiveHandle, LiveSession, SessionControl, SessionOptions};
pub use station_cache::StationCache;
