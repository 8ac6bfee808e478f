//! Frames pushed by the backend over the notification socket.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;

use peerline_shared::{Address, MessageKind};

/// A notification frame, tagged by its `type` field.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    NewMessage { message: BackendMessage },
    DeviceCount { count: u32, user_id: String },
}

/// Message metadata as the backend relays it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendMessage {
    #[serde(default)]
    pub id: String,
    #[serde(default = "empty_address")]
    pub sender: Address,
    #[serde(default = "empty_address")]
    pub receiver: Address,
    #[serde(default, alias = "cid", skip_serializing_if = "Option::is_none")]
    pub content_cid: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: BackendMessageKind,
    #[serde(default = "Utc::now", deserialize_with = "lenient_timestamp")]
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendMessageKind {
    #[default]
    Text,
    File,
}

impl From<BackendMessageKind> for MessageKind {
    fn from(kind: BackendMessageKind) -> Self {
        match kind {
            BackendMessageKind::Text => MessageKind::Text,
            BackendMessageKind::File => MessageKind::FileReference,
        }
    }
}

/// Parse a text frame. Unknown or malformed frames yield `None`.
pub fn parse_frame(frame: &str) -> Option<Notification> {
    match serde_json::from_str::<Notification>(frame) {
        Ok(notification) => Some(notification),
        Err(e) => {
            debug!(error = %e, len = frame.len(), "Ignoring notification frame");
            None
        }
    }
}

fn empty_address() -> Address {
    Address::new("")
}

/// RFC 3339 timestamps, or naive ISO timestamps read as UTC.
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    if let Ok(ts) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(serde::de::Error::custom)
}
