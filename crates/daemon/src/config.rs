//! Daemon configuration, loaded from a TOML file with command-line
//! overrides applied in `main`.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{DaemonError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Validator host; JSON-RPC on `rpc_port`, websocket on `ws_port`.
    pub rpc_host: String,
    #[serde(default = "default_rpc_port")]
    pub rpc_port: u16,
    #[serde(default = "default_ws_port")]
    pub ws_port: u16,

    /// Listening port for local publisher clients.
    pub listen_port: u16,

    /// Directory holding the publish key pair and the mapping/program keys.
    pub key_dir: PathBuf,

    /// Optional static-content directory when fronting a dashboard.
    #[serde(default)]
    pub content_dir: Option<PathBuf>,

    /// Account version to publish and subscribe with.
    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(default)]
    pub capture: CaptureConfig,

    /// Floor for the slot-interval estimate, microseconds.
    #[serde(default = "default_slot_min")]
    pub slot_min_us: i64,

    /// Minimum spacing between reconnect attempts, microseconds.
    #[serde(default = "default_conn_timeout")]
    pub conn_timeout_us: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CaptureConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub file: Option<PathBuf>,
}

fn default_rpc_port() -> u16 {
    8899
}

fn default_ws_port() -> u16 {
    8900
}

fn default_version() -> u32 {
    polaris_oracle::state::VERSION
}

fn default_slot_min() -> i64 {
    200_000
}

fn default_conn_timeout() -> i64 {
    2_000_000
}

impl DaemonConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| DaemonError::Config(format!("read {}: {e}", path.display())))?;
        toml::from_str(&text).map_err(|e| DaemonError::Config(format!("{}: {e}", path.display())))
    }

    pub fn http_url(&self) -> String {
        format!("http://{}:{}", self.rpc_host, self.rpc_port)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}:{}", self.rpc_host, self.ws_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_file() {
        let cfg: DaemonConfig = toml::from_str(
            r#"
            rpc_host = "127.0.0.1"
            listen_port = 8910
            key_dir = "/var/lib/polaris/keys"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.rpc_port, 8899);
        assert_eq!(cfg.ws_port, 8900);
        assert_eq!(cfg.version, polaris_oracle::state::VERSION);
        assert!(!cfg.capture.enabled);
        assert_eq!(cfg.http_url(), "http://127.0.0.1:8899");
        assert_eq!(cfg.ws_url(), "ws://127.0.0.1:8900");
    }

    #[test]
    fn parses_capture_section() {
        let cfg: DaemonConfig = toml::from_str(
            r#"
            rpc_host = "validator"
            listen_port = 8910
            key_dir = "keys"

            [capture]
            enabled = true
            file = "updates.gz"
            "#,
        )
        .unwrap();
        assert!(cfg.capture.enabled);
        assert_eq!(cfg.capture.file.as_deref(), Some(Path::new("updates.gz")));
    }
}
