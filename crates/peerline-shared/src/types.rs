use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::address::Address;

/// Metadata referencing a blob in the content-addressed store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "FileDescriptorWire")]
pub struct FileDescriptor {
    /// Content id in the blob store.
    pub id: String,
    pub file_name: String,
    pub file_size: u64,
    /// MIME type
    pub file_type: String,
}

/// Incoming form. Older peers wrote the id as `cid`; some write both.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileDescriptorWire {
    id: Option<String>,
    cid: Option<String>,
    file_name: String,
    file_size: u64,
    file_type: String,
}

impl TryFrom<FileDescriptorWire> for FileDescriptor {
    type Error = &'static str;

    fn try_from(wire: FileDescriptorWire) -> Result<Self, Self::Error> {
        let id = wire
            .id
            .filter(|id| !id.is_empty())
            .or(wire.cid)
            .ok_or("missing file id")?;
        Ok(Self {
            id,
            file_name: wire.file_name,
            file_size: wire.file_size,
            file_type: wire.file_type,
        })
    }
}

/// Classification tag of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageKind {
    Text,
    FileReference,
}

/// Logical content of a message, outgoing or decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    Text(String),
    File(FileDescriptor),
}

impl Content {
    pub fn kind(&self) -> MessageKind {
        match self {
            Content::Text(_) => MessageKind::Text,
            Content::File(_) => MessageKind::FileReference,
        }
    }

    /// What a conversation view shows for this content.
    pub fn display(&self) -> String {
        match self {
            Content::Text(text) => text.clone(),
            Content::File(file) => format!("[File: {}]", file.file_name),
        }
    }

    pub fn file(&self) -> Option<&FileDescriptor> {
        match self {
            Content::File(file) => Some(file),
            Content::Text(_) => None,
        }
    }
}

impl From<String> for Content {
    fn from(s: String) -> Self {
        Content::Text(s)
    }
}

impl From<&str> for Content {
    fn from(s: &str) -> Self {
        Content::Text(s.to_string())
    }
}

impl From<FileDescriptor> for Content {
    fn from(file: FileDescriptor) -> Self {
        Content::File(file)
    }
}

/// Where a message's timestamp came from.
///
/// The two clocks are never reconciled. A local echo carries the local send
/// time until the network copy of the same message replaces it in the
/// timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOrigin {
    /// Received from the network; timestamp is authoritative.
    Network,
    /// Appended locally right after a send; timestamp is the local send time.
    LocalEcho,
}

/// An immutable chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: String,
    pub sender: Address,
    pub content: Content,
    pub display_content: String,
    pub sent_at: DateTime<Utc>,
    pub origin: MessageOrigin,
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        self.content.kind()
    }

    pub fn file(&self) -> Option<&FileDescriptor> {
        self.content.file()
    }
}
