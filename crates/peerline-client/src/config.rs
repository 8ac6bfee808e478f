//! Client configuration loaded from environment variables.
//!
//! Every setting has a default so a local development client starts with no
//! configuration at all.

use std::path::PathBuf;

use peerline_net::BackoffPolicy;
use peerline_shared::constants::{
    DEFAULT_GATEWAY_URL, DEFAULT_WS_BASE_URL, MAX_FILE_SIZE, RECONNECT_MAX_ATTEMPTS,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Base URL of the backend push endpoint. The subscriber connects to
    /// `{ws_base_url}/ws/{address}`.
    /// Env: `PEERLINE_WS_BASE_URL`
    /// Default: `ws://localhost:8001`
    pub ws_base_url: String,

    /// Root directory of the filesystem blob store.
    /// Env: `PEERLINE_BLOB_DIR`
    /// Default: `./blobs`
    pub blob_dir: PathBuf,

    /// Public gateway prefix for shareable content links.
    /// Env: `PEERLINE_GATEWAY_URL`
    /// Default: `https://ipfs.io/ipfs/`
    pub gateway_url: String,

    /// Largest file accepted by `send_file`, in bytes.
    /// Env: `PEERLINE_MAX_FILE_SIZE`
    /// Default: 50 MiB
    pub max_file_size: usize,

    /// Consecutive reconnects the notification subscriber attempts.
    /// Env: `PEERLINE_RECONNECT_MAX_ATTEMPTS`
    /// Default: `5`
    pub reconnect_max_attempts: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            ws_base_url: DEFAULT_WS_BASE_URL.to_string(),
            blob_dir: PathBuf::from("./blobs"),
            gateway_url: DEFAULT_GATEWAY_URL.to_string(),
            max_file_size: MAX_FILE_SIZE,
            reconnect_max_attempts: RECONNECT_MAX_ATTEMPTS,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ClientConfig::from_env`] with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup("PEERLINE_WS_BASE_URL") {
            if url.starts_with("ws://") || url.starts_with("wss://") {
                config.ws_base_url = url.trim_end_matches('/').to_string();
            } else {
                tracing::warn!(value = %url, "Invalid PEERLINE_WS_BASE_URL, using default");
            }
        }

        if let Some(dir) = lookup("PEERLINE_BLOB_DIR") {
            config.blob_dir = PathBuf::from(dir);
        }

        if let Some(url) = lookup("PEERLINE_GATEWAY_URL") {
            config.gateway_url = if url.ends_with('/') {
                url
            } else {
                format!("{url}/")
            };
        }

        if let Some(val) = lookup("PEERLINE_MAX_FILE_SIZE") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.max_file_size = n,
                _ => tracing::warn!(value = %val, "Invalid PEERLINE_MAX_FILE_SIZE, using default"),
            }
        }

        if let Some(val) = lookup("PEERLINE_RECONNECT_MAX_ATTEMPTS") {
            match val.parse::<u32>() {
                Ok(n) => config.reconnect_max_attempts = n,
                Err(_) => tracing::warn!(
                    value = %val,
                    "Invalid PEERLINE_RECONNECT_MAX_ATTEMPTS, using default"
                ),
            }
        }

        // RUST_LOG is read by tracing-subscriber's EnvFilter directly.

        config
    }

    /// Reconnect policy for the notification subscriber.
    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy::default().with_max_attempts(self.reconnect_max_attempts)
    }
}
