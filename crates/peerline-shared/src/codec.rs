//! Message payload codec.
//!
//! Text travels as raw UTF-8. File references travel as a JSON envelope
//! `{"file": {"id", "fileName", "fileSize", "fileType"}}`; recipients rely on
//! exactly this shape to tell a file apart from literal text.
//!
//! Decoding never fails. Anything that is not a well-formed file envelope is
//! text, including valid JSON of some other shape.

use serde::{Deserialize, Serialize};

use crate::types::{Content, FileDescriptor, MessageKind};

#[derive(Deserialize)]
struct FileEnvelope {
    file: FileDescriptor,
}

#[derive(Serialize)]
struct FileEnvelopeRef<'a> {
    file: &'a FileDescriptor,
}

/// Result of classifying an incoming payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    pub content: Content,
    pub display_content: String,
}

impl Decoded {
    pub fn kind(&self) -> MessageKind {
        self.content.kind()
    }

    pub fn file(&self) -> Option<&FileDescriptor> {
        self.content.file()
    }
}

pub fn encode_text(content: &str) -> Vec<u8> {
    content.as_bytes().to_vec()
}

pub fn encode_file_reference(descriptor: &FileDescriptor) -> Vec<u8> {
    // Serializing plain strings and integers into a Vec cannot fail.
    serde_json::to_vec(&FileEnvelopeRef { file: descriptor }).unwrap_or_default()
}

pub fn encode(content: &Content) -> Vec<u8> {
    match content {
        Content::Text(text) => encode_text(text),
        Content::File(file) => encode_file_reference(file),
    }
}

pub fn decode(bytes: &[u8]) -> Decoded {
    if let Some(file) = parse_file_envelope(bytes) {
        let content = Content::File(file);
        return Decoded {
            display_content: content.display(),
            content,
        };
    }

    let text = String::from_utf8_lossy(bytes).into_owned();
    Decoded {
        content: Content::Text(text.clone()),
        display_content: text,
    }
}

fn parse_file_envelope(bytes: &[u8]) -> Option<FileDescriptor> {
    let envelope: FileEnvelope = serde_json::from_slice(bytes).ok()?;
    if envelope.file.id.is_empty() {
        return None;
    }
    Some(envelope.file)
}
