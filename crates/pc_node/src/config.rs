//! Node configuration and on-disk locations.
//!
//! Data directory: `--data-dir`, else `$PEERCHAT_DATA_DIR`, else the
//! platform data dir. Inside it, `peerchat.json` holds `NodeConfig`; a
//! missing file means defaults.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::NodeError;

pub const APP_QUALIFIER: &str = "net";
pub const APP_ORG: &str = "peerchat";
pub const APP_NAME: &str = "peerchat";

pub const DATA_DIR_ENV: &str = "PEERCHAT_DATA_DIR";
pub const CONFIG_FILE: &str = "peerchat.json";

pub fn default_data_dir() -> Result<PathBuf, NodeError> {
    if let Ok(override_path) = std::env::var(DATA_DIR_ENV) {
        return Ok(PathBuf::from(override_path));
    }
    let dirs = ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME)
        .ok_or_else(|| NodeError::Config("cannot determine data directory".into()))?;
    Ok(dirs.data_dir().to_path_buf())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeConfig {
    /// Name this node is known by on the transport.
    pub peer_id: String,
    /// `tracing` filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    /// Session records, relative to the data directory.
    #[serde(default = "default_sessions_dir")]
    pub sessions_dir: String,
    /// Identity key file, relative to the data directory.
    #[serde(default = "default_identity_file")]
    pub identity_file: String,
}

fn default_log_filter() -> String {
    "peerchat=info,pc_node=info,pc_net=info,pc_store=info".into()
}

fn default_sessions_dir() -> String {
    "sessions".into()
}

fn default_identity_file() -> String {
    "identity.json".into()
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            peer_id: "local".into(),
            log_filter: default_log_filter(),
            sessions_dir: default_sessions_dir(),
            identity_file: default_identity_file(),
        }
    }
}

impl NodeConfig {
    pub fn load(data_dir: &Path) -> Result<Self, NodeError> {
        let path = data_dir.join(CONFIG_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        let bytes = std::fs::read(&path).map_err(NodeError::io(&path))?;
        let config: Self = serde_json::from_slice(&bytes)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, data_dir: &Path) -> Result<(), NodeError> {
        std::fs::create_dir_all(data_dir).map_err(NodeError::io(data_dir))?;
        let path = data_dir.join(CONFIG_FILE);
        let data = serde_json::to_vec_pretty(self)?;
        std::fs::write(&path, data).map_err(NodeError::io(&path))
    }

    fn validate(&self) -> Result<(), NodeError> {
        if self.peer_id.trim().is_empty() {
            return Err(NodeError::Config("peerId must not be empty".into()));
        }
        for (field, value) in [("sessionsDir", &self.sessions_dir), ("identityFile", &self.identity_file)] {
            if Path::new(value).is_absolute() || value.split(['/', '\\']).any(|c| c == "..") {
                return Err(NodeError::Config(format!(
                    "{field} must be relative to the data directory"
                )));
            }
        }
        Ok(())
    }

    pub fn sessions_path(&self, data_dir: &Path) -> PathBuf {
        data_dir.join(&self.sessions_dir)
    }

    pub fn identity_path(&self, data_dir: &Path) -> PathBuf {
        data_dir.join(&self.identity_file)
    }
}
