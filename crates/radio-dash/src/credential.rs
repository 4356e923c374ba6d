//! Session key for the push-credential endpoint.
//!
//! Looked up in the configured environment variable first, then in
//! `<config_dir>/api_key`.  When neither has one at startup the session
//! parks its connect, and [`watch_for_key`] hands the key over as soon as it
//! shows up.

use std::path::{Path, PathBuf};
use std::time::Duration;

use radio_sync::SessionControl;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const KEY_FILE: &str = "api_key";
const RECHECK_INTERVAL: Duration = Duration::from_secs(5);

pub fn key_file() -> PathBuf {
    radio_proto::platform::config_dir().join(KEY_FILE)
}

pub fn read_api_key(env_var: &str, key_file: &Path) -> Option<String> {
    if let Ok(key) = std::env::var(env_var) {
        let key = key.trim();
        if !key.is_empty() {
            return Some(key.to_string());
        }
    }

    let content = std::fs::read_to_string(key_file).ok()?;
    let key = content.trim();
    if key.is_empty() {
        None
    } else {
        Some(key.to_string())
    }
}

pub async fn watch_for_key(
    env_var: String,
    key_file: PathBuf,
    control: SessionControl,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(RECHECK_INTERVAL);
    info!(
        "credential: waiting for ${} or {}",
        env_var,
        key_file.display()
    );

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }

        if let Some(key) = read_api_key(&env_var, &key_file) {
            info!("credential: session key found");
            control.provide_credential(key).await;
            return;
        }
        debug!("credential: still no session key");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UNSET_VAR: &str = "RADIO_DASH_TEST_KEY_THAT_IS_NEVER_SET";

    #[test]
    fn test_key_file_is_trimmed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(KEY_FILE);
        std::fs::write(&path, "  sk-123\n").unwrap();
        assert_eq!(read_api_key(UNSET_VAR, &path).as_deref(), Some("sk-123"));
    }

    #[test]
    fn test_missing_or_blank_key_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(KEY_FILE);
        assert_eq!(read_api_key(UNSET_VAR, &path), None);
        std::fs::write(&path, "\n").unwrap();
        assert_eq!(read_api_key(UNSET_VAR, &path), None);
    }
}
