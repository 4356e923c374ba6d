use thiserror::Error;

/// Failures inside the websocket runtime.  None of these escape to callers of
/// [`LiveHandle`](crate::LiveHandle): a failed dial is reported to the
/// connection manager as an abnormal close and retried under the backoff
/// policy.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid server address {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("unsupported scheme {0:?} (expected http, https, ws or wss)")]
    UnsupportedScheme(String),

    #[error("no session key available for the credential request")]
    MissingCredential,

    #[error("credential request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("credential endpoint returned {0}")]
    Status(reqwest::StatusCode),

    #[error("websocket: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}
