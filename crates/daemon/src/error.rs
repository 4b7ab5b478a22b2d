//! Daemon error types.

use thiserror::Error;

/// Every failure the daemon reports carries one of these kinds. Transport
/// errors trigger reconnection; the rest are surfaced to the originating
/// request and logged.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Socket-level failure against the validator or a local client.
    #[error("transport: {0}")]
    Transport(String),

    /// Malformed or unexpected JSON-RPC traffic.
    #[error("protocol: {0}")]
    Protocol(String),

    /// Missing account, version mismatch, or other ledger-state fault.
    #[error("account: {0}")]
    Account(String),

    /// A bad request from a local publisher client.
    #[error("client request: {0}")]
    Client(String),

    /// Unrecoverable configuration fault; only `init` may abort on this.
    #[error("config: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for DaemonError {
    fn from(err: reqwest::Error) -> Self {
        DaemonError::Transport(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for DaemonError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        DaemonError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for DaemonError {
    fn from(err: serde_json::Error) -> Self {
        DaemonError::Protocol(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DaemonError>;
