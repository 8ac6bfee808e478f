//! The channel client: one per signed-in identity.
//!
//! State machine: `Uninitialized -> Initializing -> Ready`, with
//! `Initializing -> Failed` on setup errors. A failed client may be
//! initialized again. Every other operation only checks the state once and
//! fails fast with [`ChannelError::NotInitialized`] unless it is `Ready`;
//! nothing is queued behind an in-flight `initialize`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, error, info, warn};

use peerline_shared::codec;
use peerline_shared::{
    Address, ChannelError, Content, ConversationKey, Message, MessageOrigin, SigningIdentity,
};

use crate::network::{ConversationInfo, Envelope, MessagingNetwork, NetworkSession};

/// Lifecycle state of a [`ChannelClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Uninitialized,
    Initializing,
    Ready,
    Failed,
}

struct Inner {
    state: ChannelState,
    session: Option<Arc<dyn NetworkSession>>,
    bound: Option<Address>,
}

#[derive(Default)]
struct ConversationCache {
    /// First conversation resolved per participant pair.
    resolved: Mutex<HashMap<ConversationKey, ConversationInfo>>,
    /// Held across list-then-create so one pair is never created twice.
    resolving: Mutex<HashMap<ConversationKey, Arc<AsyncMutex<()>>>>,
}

impl ConversationCache {
    fn gate(&self, key: &ConversationKey) -> Arc<AsyncMutex<()>> {
        lock(&self.resolving).entry(key.clone()).or_default().clone()
    }

    fn clear(&self) {
        lock(&self.resolved).clear();
    }
}

pub struct ChannelClient {
    network: Arc<dyn MessagingNetwork>,
    inner: RwLock<Inner>,
    conversations: Arc<ConversationCache>,
}

impl ChannelClient {
    pub fn new(network: Arc<dyn MessagingNetwork>) -> Self {
        Self {
            network,
            inner: RwLock::new(Inner {
                state: ChannelState::Uninitialized,
                session: None,
                bound: None,
            }),
            conversations: Arc::new(ConversationCache::default()),
        }
    }

    /// Bind the client to a signing identity.
    ///
    /// A no-op when already `Ready` for the same address. Binding a different
    /// identity replaces the current session.
    pub async fn initialize(&self, signer: Arc<dyn SigningIdentity>) -> Result<(), ChannelError> {
        let address = signer.address();

        {
            let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
            match inner.state {
                ChannelState::Initializing => return Err(ChannelError::AlreadyInitializing),
                ChannelState::Ready if inner.bound.as_ref() == Some(&address) => {
                    debug!(address = %address, "Channel client already initialized");
                    return Ok(());
                }
                ChannelState::Ready => {
                    info!(
                        previous = ?inner.bound,
                        address = %address,
                        "Re-binding channel client to a new identity"
                    );
                }
                ChannelState::Uninitialized | ChannelState::Failed => {}
            }
            inner.state = ChannelState::Initializing;
            inner.session = None;
            inner.bound = None;
        }
        self.conversations.clear();

        info!(address = %address, "Initializing channel client");
        let result = self.network.connect(signer).await;

        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        match result {
            Ok(session) => {
                inner.session = Some(session);
                inner.bound = Some(address.clone());
                inner.state = ChannelState::Ready;
                info!(address = %address, "Channel client ready");
                Ok(())
            }
            Err(e) => {
                inner.state = ChannelState::Failed;
                error!(address = %address, error = %e, "Channel session setup failed");
                Err(ChannelError::SessionSetup(e.into()))
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state() == ChannelState::Ready
    }

    pub fn state(&self) -> ChannelState {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .state
    }

    /// Address of the bound identity, once `Ready`.
    pub fn address(&self) -> Option<Address> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .bound
            .clone()
    }

    /// Find the conversation with `peer`, creating it if none exists.
    ///
    /// Addresses match case-insensitively and the first match the network
    /// lists wins. Once resolved, a conversation keeps being used for that
    /// peer even if the remote later creates another one; it is replaced only
    /// when the network stops listing it.
    pub async fn resolve_conversation(
        &self,
        peer: &Address,
    ) -> Result<ConversationInfo, ChannelError> {
        let session = self.session()?;
        resolve(session.as_ref(), &self.conversations, peer).await
    }

    /// Encode and transmit `content` to `peer`.
    ///
    /// Failures are not retried. Success does not mean the message already
    /// shows up in [`ChannelClient::list_messages`]; callers echo it locally.
    pub async fn send(
        &self,
        peer: &Address,
        content: impl Into<Content>,
    ) -> Result<(), ChannelError> {
        let session = self.session()?;
        let content = content.into();
        let conversation = resolve(session.as_ref(), &self.conversations, peer).await?;

        let payload = codec::encode(&content);
        let envelope = session
            .send(&conversation.id, payload)
            .await
            .map_err(|e| {
                warn!(peer = %peer, error = %e, "Send failed");
                ChannelError::Transmission(e.into())
            })?;

        debug!(
            peer = %peer,
            conversation = %conversation.id,
            message = %envelope.id,
            kind = ?content.kind(),
            "Message sent"
        );
        Ok(())
    }

    /// Full decoded history with `peer`, newest first.
    ///
    /// The network hands history out oldest first; it is reversed here and
    /// display code sorts it back to ascending order.
    pub async fn list_messages(&self, peer: &Address) -> Result<Vec<Message>, ChannelError> {
        let session = self.session()?;
        let conversation = resolve(session.as_ref(), &self.conversations, peer).await?;

        let envelopes = session
            .messages(&conversation.id)
            .await
            .map_err(|e| ChannelError::Transmission(e.into()))?;

        debug!(peer = %peer, count = envelopes.len(), "Fetched history");

        let mut messages: Vec<Message> = envelopes.into_iter().map(decode_envelope).collect();
        messages.reverse();
        Ok(messages)
    }

    /// Deliver every new message with `peer` to `on_message`.
    ///
    /// Returns immediately; delivery runs on its own task until the network
    /// closes the stream. Opening the subscription happens on that task, and
    /// failures there are logged rather than returned. Each call opens an
    /// independent subscription, so calling this twice for one peer delivers
    /// every message twice.
    pub fn listen<F>(&self, peer: &Address, on_message: F) -> Result<(), ChannelError>
    where
        F: Fn(Message) + Send + Sync + 'static,
    {
        let session = self.session()?;
        let cache = self.conversations.clone();
        let peer = peer.clone();

        tokio::spawn(async move {
            let conversation = match resolve(session.as_ref(), &cache, &peer).await {
                Ok(c) => c,
                Err(e) => {
                    warn!(peer = %peer, error = %e, "Could not open live subscription");
                    return;
                }
            };

            let mut stream = match session.stream(&conversation.id).await {
                Ok(rx) => rx,
                Err(e) => {
                    let e = ChannelError::Subscription(e.into());
                    warn!(peer = %peer, error = %e, "Could not open live subscription");
                    return;
                }
            };

            debug!(peer = %peer, conversation = %conversation.id, "Live subscription open");

            while let Some(envelope) = stream.recv().await {
                on_message(decode_envelope(envelope));
            }

            debug!(peer = %peer, conversation = %conversation.id, "Live subscription ended");
        });

        Ok(())
    }

    /// Every conversation the network lists for this identity.
    pub async fn conversations(&self) -> Result<Vec<ConversationInfo>, ChannelError> {
        let session = self.session()?;
        session
            .list_conversations()
            .await
            .map_err(|e| ChannelError::ConversationResolution(e.into()))
    }

    fn session(&self) -> Result<Arc<dyn NetworkSession>, ChannelError> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        match (inner.state, &inner.session) {
            (ChannelState::Ready, Some(session)) => Ok(session.clone()),
            _ => Err(ChannelError::NotInitialized),
        }
    }
}

async fn resolve(
    session: &dyn NetworkSession,
    cache: &ConversationCache,
    peer: &Address,
) -> Result<ConversationInfo, ChannelError> {
    let key = ConversationKey::new(&session.address(), peer);
    let gate = cache.gate(&key);
    let _resolving = gate.lock().await;

    let listed = list(session).await?;

    let cached = lock(&cache.resolved).get(&key).cloned();
    if let Some(cached) = cached {
        if listed.iter().any(|c| c.id == cached.id) {
            return Ok(cached);
        }
        warn!(
            peer = %peer,
            conversation = %cached.id,
            "Conversation no longer listed by the network, re-resolving"
        );
        lock(&cache.resolved).remove(&key);
    }

    let conversation = match listed.into_iter().find(|c| &c.peer == peer) {
        Some(found) => found,
        None => {
            debug!(peer = %peer, "No conversation yet, creating one");
            let created = session
                .new_conversation(peer)
                .await
                .map_err(|e| ChannelError::ConversationResolution(e.into()))?;

            // The peer may have created one concurrently; the first listed wins.
            list(session)
                .await?
                .into_iter()
                .find(|c| &c.peer == peer)
                .unwrap_or(created)
        }
    };

    lock(&cache.resolved).insert(key, conversation.clone());
    Ok(conversation)
}

async fn list(session: &dyn NetworkSession) -> Result<Vec<ConversationInfo>, ChannelError> {
    session
        .list_conversations()
        .await
        .map_err(|e| ChannelError::ConversationResolution(e.into()))
}

fn decode_envelope(envelope: Envelope) -> Message {
    let decoded = codec::decode(&envelope.payload);
    Message {
        id: envelope.id,
        sender: envelope.sender,
        content: decoded.content,
        display_content: decoded.display_content,
        sent_at: envelope.sent_at,
        origin: MessageOrigin::Network,
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::{mpsc, Semaphore};

    use peerline_shared::{FileDescriptor, LocalIdentity, MessageKind};

    use crate::loopback::LoopbackNetwork;
    use crate::network::NetworkResult;

    fn identity() -> Arc<dyn SigningIdentity> {
        Arc::new(LocalIdentity::generate())
    }

    async fn ready_client(net: &LoopbackNetwork) -> (Arc<ChannelClient>, Arc<dyn SigningIdentity>) {
        let id = identity();
        let client = Arc::new(ChannelClient::new(Arc::new(net.clone())));
        client.initialize(id.clone()).await.unwrap();
        (client, id)
    }

    /// Holds `connect` until a permit is released.
    struct GatedNetwork {
        inner: LoopbackNetwork,
        gate: Arc<Semaphore>,
    }

    #[async_trait]
    impl MessagingNetwork for GatedNetwork {
        async fn connect(
            &self,
            signer: Arc<dyn SigningIdentity>,
        ) -> NetworkResult<Arc<dyn NetworkSession>> {
            let _permit = self.gate.acquire().await.map_err(anyhow::Error::from)?;
            self.inner.connect(signer).await
        }
    }

    /// Lists conversations slowly so concurrent resolutions overlap.
    struct SlowListNetwork {
        inner: LoopbackNetwork,
    }

    #[async_trait]
    impl MessagingNetwork for SlowListNetwork {
        async fn connect(
            &self,
            signer: Arc<dyn SigningIdentity>,
        ) -> NetworkResult<Arc<dyn NetworkSession>> {
            let inner = self.inner.connect(signer).await?;
            Ok(Arc::new(SlowListSession { inner }))
        }
    }

    struct SlowListSession {
        inner: Arc<dyn NetworkSession>,
    }

    #[async_trait]
    impl NetworkSession for SlowListSession {
        fn address(&self) -> Address {
            self.inner.address()
        }

        async fn list_conversations(&self) -> NetworkResult<Vec<ConversationInfo>> {
            let listed = self.inner.list_conversations().await?;
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(listed)
        }

        async fn new_conversation(&self, peer: &Address) -> NetworkResult<ConversationInfo> {
            self.inner.new_conversation(peer).await
        }

        async fn messages(&self, conversation_id: &str) -> NetworkResult<Vec<Envelope>> {
            self.inner.messages(conversation_id).await
        }

        async fn send(&self, conversation_id: &str, payload: Vec<u8>) -> NetworkResult<Envelope> {
            self.inner.send(conversation_id, payload).await
        }

        async fn stream(&self, conversation_id: &str) -> NetworkResult<mpsc::Receiver<Envelope>> {
            self.inner.stream(conversation_id).await
        }
    }

    #[tokio::test]
    async fn test_send_uninitialized_fails_without_network_call() {
        let net = LoopbackNetwork::new();
        let client = ChannelClient::new(Arc::new(net.clone()));

        let result = client.send(&Address::from("0xABCpeer"), "hello").await;
        assert!(matches!(result, Err(ChannelError::NotInitialized)));
        assert!(matches!(
            client.list_messages(&Address::from("0xABCpeer")).await,
            Err(ChannelError::NotInitialized)
        ));
        assert!(matches!(
            client.listen(&Address::from("0xABCpeer"), |_| {}),
            Err(ChannelError::NotInitialized)
        ));
        assert_eq!(net.connect_count(), 0);
        assert_eq!(client.state(), ChannelState::Uninitialized);
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let net = LoopbackNetwork::new();
        let (client, id) = ready_client(&net).await;

        client.initialize(id.clone()).await.unwrap();
        assert_eq!(net.connect_count(), 1);
        assert_eq!(client.state(), ChannelState::Ready);
        assert_eq!(client.address(), Some(id.address()));
    }

    #[tokio::test]
    async fn test_initialize_failure_then_retry() {
        let net = LoopbackNetwork::new();
        let client = ChannelClient::new(Arc::new(net.clone()));
        let id = identity();

        net.fail_next_connect();
        let err = client.initialize(id.clone()).await.unwrap_err();
        assert!(matches!(err, ChannelError::SessionSetup(_)));
        assert_eq!(client.state(), ChannelState::Failed);
        assert!(!client.is_ready());

        client.initialize(id).await.unwrap();
        assert!(client.is_ready());
    }

    #[tokio::test]
    async fn test_initialize_while_initializing() {
        let gate = Arc::new(Semaphore::new(0));
        let net = GatedNetwork {
            inner: LoopbackNetwork::new(),
            gate: gate.clone(),
        };
        let client = Arc::new(ChannelClient::new(Arc::new(net)));
        let id = identity();

        let pending = {
            let client = client.clone();
            let id = id.clone();
            tokio::spawn(async move { client.initialize(id).await })
        };

        while client.state() != ChannelState::Initializing {
            tokio::task::yield_now().await;
        }

        assert!(matches!(
            client.initialize(id.clone()).await,
            Err(ChannelError::AlreadyInitializing)
        ));
        assert!(matches!(
            client.send(&Address::from("0xpeer"), "too early").await,
            Err(ChannelError::NotInitialized)
        ));

        gate.add_permits(1);
        pending.await.unwrap().unwrap();
        assert!(client.is_ready());
    }

    #[tokio::test]
    async fn test_rebind_to_other_identity() {
        let net = LoopbackNetwork::new();
        let (client, _) = ready_client(&net).await;
        let other = identity();

        client.initialize(other.clone()).await.unwrap();
        assert_eq!(net.connect_count(), 2);
        assert_eq!(client.address(), Some(other.address()));
    }

    #[tokio::test]
    async fn test_resolve_is_case_insensitive() {
        let net = LoopbackNetwork::new();
        let (client, _) = ready_client(&net).await;

        let upper = client
            .resolve_conversation(&Address::from("0xABCDEF"))
            .await
            .unwrap();
        let lower = client
            .resolve_conversation(&Address::from("0xabcdef"))
            .await
            .unwrap();
        assert_eq!(upper.id, lower.id);
        assert_eq!(client.conversations().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_resolution_creates_one_conversation() {
        let net = LoopbackNetwork::new();
        let alice = ChannelClient::new(Arc::new(SlowListNetwork { inner: net.clone() }));
        let alice_id = identity();
        alice.initialize(alice_id.clone()).await.unwrap();
        let (bob, _) = ready_client(&net).await;
        let bob_address = bob.address().unwrap();

        let (listed, sent) = tokio::join!(
            alice.list_messages(&bob_address),
            alice.send(&bob_address, "hello")
        );
        listed.unwrap();
        sent.unwrap();

        assert_eq!(alice.conversations().await.unwrap().len(), 1);
        let history = bob.list_messages(&alice_id.address()).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].display_content, "hello");
    }

    #[tokio::test]
    async fn test_first_listed_conversation_wins() {
        let net = LoopbackNetwork::new();
        let (alice, alice_id) = ready_client(&net).await;
        let (bob, _) = ready_client(&net).await;
        let bob_address = bob.address().unwrap();

        // Bob's side creates two conversations with Alice before she looks.
        let first = bob.resolve_conversation(&alice_id.address()).await.unwrap();
        let duplicate = bob
            .session()
            .unwrap()
            .new_conversation(&alice_id.address())
            .await
            .unwrap();
        assert_ne!(first.id, duplicate.id);

        let resolved = alice.resolve_conversation(&bob_address).await.unwrap();
        assert_eq!(resolved.id, first.id);
    }

    #[tokio::test]
    async fn test_keeps_first_resolved_after_remote_duplicate() {
        let net = LoopbackNetwork::new();
        let (alice, alice_id) = ready_client(&net).await;
        let (bob, _) = ready_client(&net).await;
        let bob_address = bob.address().unwrap();

        // Bob creates one and Alice resolves it. Bob then creates a second
        // one and the network loses the first.
        let raw_bob = bob.session().unwrap();
        let remote_dup = raw_bob.new_conversation(&alice_id.address()).await.unwrap();
        let resolved = alice.resolve_conversation(&bob_address).await.unwrap();
        assert_eq!(resolved.id, remote_dup.id);

        let newer = raw_bob.new_conversation(&alice_id.address()).await.unwrap();
        net.drop_conversation(&remote_dup.id).await;
        let after_loss = alice.resolve_conversation(&bob_address).await.unwrap();
        assert_eq!(after_loss.id, newer.id);

        // A later duplicate does not displace the one already in use.
        raw_bob.new_conversation(&alice_id.address()).await.unwrap();
        let again = alice.resolve_conversation(&bob_address).await.unwrap();
        assert_eq!(again.id, newer.id);
    }

    #[tokio::test]
    async fn test_lost_conversation_recreated_transparently() {
        let net = LoopbackNetwork::new();
        let (client, _) = ready_client(&net).await;
        let peer = Address::from("0xfeed");

        client.send(&peer, "before").await.unwrap();
        let original = client.resolve_conversation(&peer).await.unwrap();
        assert!(net.drop_conversation(&original.id).await);

        client.send(&peer, "after").await.unwrap();
        let recreated = client.resolve_conversation(&peer).await.unwrap();
        assert_ne!(original.id, recreated.id);

        let history = client.list_messages(&peer).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].display_content, "after");
    }

    #[tokio::test]
    async fn test_list_messages_newest_first_and_decoded() {
        let net = LoopbackNetwork::new();
        let (alice, _) = ready_client(&net).await;
        let (bob, _) = ready_client(&net).await;
        let bob_address = bob.address().unwrap();

        let file = FileDescriptor {
            id: "c0ffee".into(),
            file_name: "notes.txt".into(),
            file_size: 12,
            file_type: "text/plain".into(),
        };

        alice.send(&bob_address, "first").await.unwrap();
        alice.send(&bob_address, file.clone()).await.unwrap();
        alice.send(&bob_address, r#"{"not":"a file"}"#).await.unwrap();

        let history = alice.list_messages(&bob_address).await.unwrap();
        let shown: Vec<_> = history.iter().map(|m| m.display_content.as_str()).collect();
        assert_eq!(shown, vec![r#"{"not":"a file"}"#, "[File: notes.txt]", "first"]);
        assert_eq!(history[1].kind(), MessageKind::FileReference);
        assert_eq!(history[1].file(), Some(&file));
        assert_eq!(history[0].kind(), MessageKind::Text);
        assert!(history.iter().all(|m| m.origin == MessageOrigin::Network));
    }

    #[tokio::test]
    async fn test_two_listeners_both_receive() {
        let net = LoopbackNetwork::new();
        let (alice, alice_id) = ready_client(&net).await;
        let (bob, _) = ready_client(&net).await;
        let bob_address = bob.address().unwrap();

        let conversation = alice.resolve_conversation(&bob_address).await.unwrap();

        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        alice
            .listen(&bob_address, move |m| {
                let _ = tx1.send(m);
            })
            .unwrap();
        alice
            .listen(&bob_address, move |m| {
                let _ = tx2.send(m);
            })
            .unwrap();

        // Let both subscriptions register before sending.
        tokio::time::sleep(Duration::from_millis(50)).await;

        bob.send(&alice_id.address(), "ping").await.unwrap();
        bob.send(&alice_id.address(), "pong").await.unwrap();

        for rx in [&mut rx1, &mut rx2] {
            let first = rx.recv().await.unwrap();
            let second = rx.recv().await.unwrap();
            assert_eq!(first.display_content, "ping");
            assert_eq!(second.display_content, "pong");
            assert_eq!(first.sender, bob_address);
        }

        // Closing the network stream ends both delivery tasks.
        assert_eq!(net.close_streams(&conversation.id).await, 2);
    }
}
