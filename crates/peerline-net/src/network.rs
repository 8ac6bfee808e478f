//! Seam between the channel client and the messaging network.
//!
//! The network itself is a black box that guarantees ordered delivery per
//! conversation, at-least-once live delivery and durable history. Anything
//! that satisfies these traits can back a [`crate::ChannelClient`].

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::mpsc;

use peerline_shared::{Address, SigningIdentity};

#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),

    #[error("Network session closed")]
    Closed,

    #[error("Rejected by network: {0}")]
    Rejected(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type NetworkResult<T> = std::result::Result<T, NetworkError>;

/// A conversation as the network reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationInfo {
    /// Network-assigned identifier.
    pub id: String,
    pub peer: Address,
    pub created_at: DateTime<Utc>,
}

/// A raw message as stored and delivered by the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub id: String,
    pub conversation_id: String,
    pub sender: Address,
    pub sent_at: DateTime<Utc>,
    pub payload: Vec<u8>,
}

/// Entry point: binds a signing identity to a network session.
#[async_trait]
pub trait MessagingNetwork: Send + Sync {
    async fn connect(&self, signer: Arc<dyn SigningIdentity>)
        -> NetworkResult<Arc<dyn NetworkSession>>;
}

/// An authenticated session on the messaging network.
#[async_trait]
pub trait NetworkSession: Send + Sync {
    /// Address the session is bound to.
    fn address(&self) -> Address;

    /// Every conversation this identity takes part in, in creation order.
    async fn list_conversations(&self) -> NetworkResult<Vec<ConversationInfo>>;

    async fn new_conversation(&self, peer: &Address) -> NetworkResult<ConversationInfo>;

    /// Full history of a conversation, oldest first.
    async fn messages(&self, conversation_id: &str) -> NetworkResult<Vec<Envelope>>;

    async fn send(&self, conversation_id: &str, payload: Vec<u8>) -> NetworkResult<Envelope>;

    /// Live envelopes for a conversation. The receiver yields `None` once the
    /// network closes the stream.
    async fn stream(&self, conversation_id: &str) -> NetworkResult<mpsc::Receiver<Envelope>>;
}
