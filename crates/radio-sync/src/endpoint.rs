//! Push-channel and credential addresses derived from the server origin.

use radio_proto::config::{AuthConfig, ServerConfig};
use reqwest::Url;

use crate::error::TransportError;

fn parse_origin(base_url: &str) -> Result<Url, TransportError> {
    Url::parse(base_url).map_err(|e| TransportError::InvalidUrl {
        url: base_url.to_string(),
        reason: e.to_string(),
    })
}

/// `http://host` → `ws://host{ws_path}`, `https://host` → `wss://host{ws_path}`.
/// Any path, query or fragment on the origin is replaced.
pub fn push_url(server: &ServerConfig) -> Result<Url, TransportError> {
    let mut url = parse_origin(&server.base_url)?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(TransportError::UnsupportedScheme(other.to_string())),
    };
    url.set_scheme(scheme)
        .map_err(|_| TransportError::UnsupportedScheme(scheme.to_string()))?;
    url.set_path(&server.ws_path);
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

/// Where short-lived push credentials are issued.
pub fn token_url(server: &ServerConfig, auth: &AuthConfig) -> Result<Url, TransportError> {
    let origin = parse_origin(&server.base_url)?;
    origin
        .join(&auth.token_path)
        .map_err(|e| TransportError::InvalidUrl {
            url: format!("{}{}", server.base_url, auth.token_path),
            reason: e.to_string(),
        })
}

/// The push address with `?token=` appended.
pub fn with_credential(url: &Url, token: &str) -> Url {
    let mut url = url.clone();
    url.query_pairs_mut().append_pair("token", token);
    url
}
