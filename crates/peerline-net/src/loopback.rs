//! In-process messaging network.
//!
//! A hub task owns every conversation and its history. Sessions talk to it
//! through an mpsc command channel with oneshot replies, the same way the
//! rest of the stack talks to a real network task. Used for tests, demos and
//! local development.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use peerline_shared::identity::verify_signature;
use peerline_shared::{Address, ConversationKey, SigningIdentity};

use crate::network::{
    ConversationInfo, Envelope, MessagingNetwork, NetworkError, NetworkResult, NetworkSession,
};

const COMMAND_BUFFER: usize = 256;
const STREAM_BUFFER: usize = 256;

/// Commands sent *into* the hub task.
#[derive(Debug)]
enum HubCommand {
    ListConversations {
        owner: Address,
        reply: oneshot::Sender<Vec<ConversationInfo>>,
    },
    NewConversation {
        owner: Address,
        peer: Address,
        reply: oneshot::Sender<ConversationInfo>,
    },
    Messages {
        owner: Address,
        conversation_id: String,
        reply: oneshot::Sender<NetworkResult<Vec<Envelope>>>,
    },
    Send {
        owner: Address,
        conversation_id: String,
        payload: Vec<u8>,
        reply: oneshot::Sender<NetworkResult<Envelope>>,
    },
    Stream {
        owner: Address,
        conversation_id: String,
        reply: oneshot::Sender<NetworkResult<mpsc::Receiver<Envelope>>>,
    },
    DropConversation {
        conversation_id: String,
        reply: oneshot::Sender<bool>,
    },
    CloseStreams {
        conversation_id: String,
        reply: oneshot::Sender<usize>,
    },
}

struct HubConversation {
    id: String,
    key: ConversationKey,
    members: [Address; 2],
    created_at: chrono::DateTime<Utc>,
    history: Vec<Envelope>,
    streams: Vec<mpsc::Sender<Envelope>>,
}

impl HubConversation {
    fn info_for(&self, owner: &Address) -> ConversationInfo {
        let peer = if &self.members[0] == owner {
            self.members[1].clone()
        } else {
            self.members[0].clone()
        };
        ConversationInfo {
            id: self.id.clone(),
            peer,
            created_at: self.created_at,
        }
    }
}

/// An in-process network shared by any number of sessions.
#[derive(Clone)]
pub struct LoopbackNetwork {
    cmd_tx: mpsc::Sender<HubCommand>,
    fail_next_connect: Arc<AtomicBool>,
    connects: Arc<AtomicUsize>,
}

impl LoopbackNetwork {
    /// Spawn the hub task. Must be called from within a tokio runtime.
    pub fn new() -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
        tokio::spawn(run_hub(cmd_rx));
        Self {
            cmd_tx,
            fail_next_connect: Arc::new(AtomicBool::new(false)),
            connects: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Make the next `connect` call fail.
    pub fn fail_next_connect(&self) {
        self.fail_next_connect.store(true, Ordering::SeqCst);
    }

    /// Number of session setups performed so far, failed ones included.
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Forget a conversation and its history, as if the network lost it.
    pub async fn drop_conversation(&self, conversation_id: &str) -> bool {
        let (reply, rx) = oneshot::channel();
        let cmd = HubCommand::DropConversation {
            conversation_id: conversation_id.to_string(),
            reply,
        };
        if self.cmd_tx.send(cmd).await.is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// End every live stream on a conversation. Returns how many were closed.
    pub async fn close_streams(&self, conversation_id: &str) -> usize {
        let (reply, rx) = oneshot::channel();
        let cmd = HubCommand::CloseStreams {
            conversation_id: conversation_id.to_string(),
            reply,
        };
        if self.cmd_tx.send(cmd).await.is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

impl Default for LoopbackNetwork {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessagingNetwork for LoopbackNetwork {
    async fn connect(
        &self,
        signer: Arc<dyn SigningIdentity>,
    ) -> NetworkResult<Arc<dyn NetworkSession>> {
        self.connects.fetch_add(1, Ordering::SeqCst);

        if self.fail_next_connect.swap(false, Ordering::SeqCst) {
            return Err(NetworkError::Rejected("connect refused".into()));
        }

        // Prove possession of the key before binding the address.
        let challenge = Uuid::new_v4();
        let signature = signer.sign(challenge.as_bytes());
        verify_signature(&signer.public_key(), challenge.as_bytes(), &signature)
            .map_err(|e| NetworkError::Rejected(format!("identity check failed: {e}")))?;

        let address = signer.address();
        info!(address = %address, "Loopback session established");

        Ok(Arc::new(LoopbackSession {
            address,
            cmd_tx: self.cmd_tx.clone(),
        }))
    }
}

struct LoopbackSession {
    address: Address,
    cmd_tx: mpsc::Sender<HubCommand>,
}

impl LoopbackSession {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> HubCommand,
    ) -> NetworkResult<T> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(build(reply))
            .await
            .map_err(|_| NetworkError::Closed)?;
        rx.await.map_err(|_| NetworkError::Closed)
    }
}

#[async_trait]
impl NetworkSession for LoopbackSession {
    fn address(&self) -> Address {
        self.address.clone()
    }

    async fn list_conversations(&self) -> NetworkResult<Vec<ConversationInfo>> {
        let owner = self.address.clone();
        self.request(|reply| HubCommand::ListConversations { owner, reply })
            .await
    }

    async fn new_conversation(&self, peer: &Address) -> NetworkResult<ConversationInfo> {
        let owner = self.address.clone();
        let peer = peer.clone();
        self.request(|reply| HubCommand::NewConversation { owner, peer, reply })
            .await
    }

    async fn messages(&self, conversation_id: &str) -> NetworkResult<Vec<Envelope>> {
        let owner = self.address.clone();
        let conversation_id = conversation_id.to_string();
        self.request(|reply| HubCommand::Messages {
            owner,
            conversation_id,
            reply,
        })
        .await?
    }

    async fn send(&self, conversation_id: &str, payload: Vec<u8>) -> NetworkResult<Envelope> {
        let owner = self.address.clone();
        let conversation_id = conversation_id.to_string();
        self.request(|reply| HubCommand::Send {
            owner,
            conversation_id,
            payload,
            reply,
        })
        .await?
    }

    async fn stream(&self, conversation_id: &str) -> NetworkResult<mpsc::Receiver<Envelope>> {
        let owner = self.address.clone();
        let conversation_id = conversation_id.to_string();
        self.request(|reply| HubCommand::Stream {
            owner,
            conversation_id,
            reply,
        })
        .await?
    }
}

async fn run_hub(mut cmd_rx: mpsc::Receiver<HubCommand>) {
    let mut conversations: Vec<HubConversation> = Vec::new();

    debug!("Loopback hub started");

    while let Some(cmd) = cmd_rx.recv().await {
        match cmd {
            HubCommand::ListConversations { owner, reply } => {
                let infos = conversations
                    .iter()
                    .filter(|c| c.key.involves(&owner))
                    .map(|c| c.info_for(&owner))
                    .collect();
                let _ = reply.send(infos);
            }

            HubCommand::NewConversation { owner, peer, reply } => {
                let conversation = HubConversation {
                    id: Uuid::new_v4().to_string(),
                    key: ConversationKey::new(&owner, &peer),
                    members: [owner.clone(), peer],
                    created_at: Utc::now(),
                    history: Vec::new(),
                    streams: Vec::new(),
                };
                debug!(
                    conversation = %conversation.id,
                    key = %conversation.key,
                    "Conversation created"
                );
                let _ = reply.send(conversation.info_for(&owner));
                conversations.push(conversation);
            }

            HubCommand::Messages {
                owner,
                conversation_id,
                reply,
            } => {
                let result = find(&mut conversations, &owner, &conversation_id)
                    .map(|c| c.history.clone());
                let _ = reply.send(result);
            }

            HubCommand::Send {
                owner,
                conversation_id,
                payload,
                reply,
            } => {
                let result = find(&mut conversations, &owner, &conversation_id).map(|c| {
                    let envelope = Envelope {
                        id: Uuid::new_v4().to_string(),
                        conversation_id: c.id.clone(),
                        sender: owner.clone(),
                        sent_at: Utc::now(),
                        payload,
                    };
                    c.history.push(envelope.clone());
                    fan_out(c, &envelope);
                    envelope
                });
                let _ = reply.send(result);
            }

            HubCommand::Stream {
                owner,
                conversation_id,
                reply,
            } => {
                let result = find(&mut conversations, &owner, &conversation_id).map(|c| {
                    let (tx, rx) = mpsc::channel(STREAM_BUFFER);
                    c.streams.push(tx);
                    rx
                });
                let _ = reply.send(result);
            }

            HubCommand::DropConversation {
                conversation_id,
                reply,
            } => {
                let before = conversations.len();
                conversations.retain(|c| c.id != conversation_id);
                let _ = reply.send(conversations.len() != before);
            }

            HubCommand::CloseStreams {
                conversation_id,
                reply,
            } => {
                let closed = conversations
                    .iter_mut()
                    .find(|c| c.id == conversation_id)
                    .map(|c| std::mem::take(&mut c.streams).len())
                    .unwrap_or(0);
                let _ = reply.send(closed);
            }
        }
    }

    debug!("Loopback hub terminated");
}

fn find<'a>(
    conversations: &'a mut [HubConversation],
    owner: &Address,
    conversation_id: &str,
) -> NetworkResult<&'a mut HubConversation> {
    conversations
        .iter_mut()
        .find(|c| c.id == conversation_id && c.key.involves(owner))
        .ok_or_else(|| NetworkError::ConversationNotFound(conversation_id.to_string()))
}

fn fan_out(conversation: &mut HubConversation, envelope: &Envelope) {
    conversation.streams.retain(|tx| {
        match tx.try_send(envelope.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(conversation = %envelope.conversation_id, "Live stream full, dropping envelope");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    });
}
