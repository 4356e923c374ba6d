use crate::protocol::StationId;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// User preferences that survive a restart.  Nothing else does: snapshots and
/// commentary are always re-fetched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Preferences {
    #[serde(default)]
    pub last_active_station: Option<StationId>,
}

pub struct PreferenceStore {
    path: PathBuf,
}

impl PreferenceStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing or unreadable files yield the defaults.
    pub fn load(&self) -> Preferences {
        let Ok(content) = std::fs::read_to_string(&self.path) else {
            return Preferences::default();
        };
        match serde_json::from_str::<Preferences>(&content) {
            Ok(prefs) => prefs,
            Err(e) => {
                tracing::warn!("ignoring corrupt preferences {:?}: {}", self.path, e);
                Preferences::default()
            }
        }
    }

    pub async fn save(&self, prefs: &Preferences) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let json = serde_json::to_string_pretty(prefs)?;
        tokio::fs::write(&self.path, json).await?;
        Ok(())
    }
}
