//! Short-lived push credentials.
//!
//! The backend hands out a token per connection in exchange for the
//! long-lived session key.  A fresh token is requested before every dial, so
//! an expired one is never reused across reconnects.

use parking_lot::RwLock;
use reqwest::Url;
use serde::Deserialize;
use tracing::debug;

use crate::error::TransportError;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
}

pub struct TokenSource {
    client: reqwest::Client,
    url: Url,
    api_key: RwLock<Option<String>>,
}

impl TokenSource {
    pub fn new(url: Url, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
            api_key: RwLock::new(api_key.filter(|k| !k.is_empty())),
        }
    }

    pub fn set_api_key(&self, key: String) {
        *self.api_key.write() = Some(key).filter(|k| !k.is_empty());
    }

    pub fn clear_api_key(&self) {
        *self.api_key.write() = None;
    }

    pub fn has_key(&self) -> bool {
        self.api_key.read().is_some()
    }

    pub async fn fetch(&self) -> Result<String, TransportError> {
        let key = self
            .api_key
            .read()
            .clone()
            .ok_or(TransportError::MissingCredential)?;

        debug!("requesting push credential from {}", self.url);
        let response = self
            .client
            .get(self.url.clone())
            .bearer_auth(key)
            .header("Accept", "application/json")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(TransportError::Status(response.status()));
        }

        let body: TokenResponse = response.json().await?;
        Ok(body.token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(key: Option<&str>) -> TokenSource {
        let url = Url::parse("http://127.0.0.1:9/api/auth/ws-token").unwrap();
        TokenSource::new(url, key.map(str::to_string))
    }

    #[test]
    fn test_empty_key_counts_as_missing() {
        assert!(!source(Some("")).has_key());
        let src = source(None);
        src.set_api_key(String::new());
        assert!(!src.has_key());
        src.set_api_key("secret".into());
        assert!(src.has_key());
        src.clear_api_key();
        assert!(!src.has_key());
    }

    #[tokio::test]
    async fn test_fetch_without_key_fails_fast() {
        let err = source(None).fetch().await.unwrap_err();
        assert!(matches!(err, TransportError::MissingCredential));
    }
}
