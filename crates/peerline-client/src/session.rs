//! Session lifecycle.
//!
//! One [`ChannelClient`] per login, created when the user signs in and
//! destroyed on logout. Every consumer obtains the same instance through
//! [`SessionManager::channel`].

use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, info};

use peerline_net::{
    BackendMessage, ChannelClient, ErrorCallback, MessagingNetwork, NotificationTransport,
    ReconnectingSubscriber, SubscriberState, WsTransport,
};
use peerline_shared::{Address, FileDescriptor};
use peerline_store::{gateway_url, is_local_content_id, BlobStore, FsBlobStore};

use crate::config::ClientConfig;
use crate::error::SessionError;
use crate::files;
use crate::identity::IdentityProvider;
use crate::timeline::Timeline;

struct Session {
    address: Address,
    channel: Arc<ChannelClient>,
    notifications: ReconnectingSubscriber,
}

pub struct SessionManager {
    config: ClientConfig,
    network: Arc<dyn MessagingNetwork>,
    transport: Arc<dyn NotificationTransport>,
    blobs: Arc<dyn BlobStore>,
    current: RwLock<Option<Arc<Session>>>,
}

impl SessionManager {
    pub fn new(
        config: ClientConfig,
        network: Arc<dyn MessagingNetwork>,
        transport: Arc<dyn NotificationTransport>,
        blobs: Arc<dyn BlobStore>,
    ) -> Self {
        Self {
            config,
            network,
            transport,
            blobs,
            current: RwLock::new(None),
        }
    }

    /// WebSocket notifications and a filesystem blob store, both taken from
    /// `config`.
    pub async fn from_config(
        config: ClientConfig,
        network: Arc<dyn MessagingNetwork>,
    ) -> Result<Self, SessionError> {
        let transport = Arc::new(WsTransport::new(config.ws_base_url.clone()));
        let blobs = Arc::new(FsBlobStore::new(config.blob_dir.clone(), config.max_file_size).await?);
        Ok(Self::new(config, network, transport, blobs))
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Sign in with the provider's current signer.
    ///
    /// Any previous session is logged out first. On failure no session is
    /// kept.
    pub async fn login(&self, provider: &dyn IdentityProvider) -> Result<Address, SessionError> {
        let signer = provider.signer().ok_or(SessionError::NoSigner)?;
        let address = signer.address();

        self.logout();

        let channel = Arc::new(ChannelClient::new(self.network.clone()));
        channel.initialize(signer).await?;

        let session = Session {
            address: address.clone(),
            channel,
            notifications: ReconnectingSubscriber::new(
                self.transport.clone(),
                self.config.backoff_policy(),
            ),
        };
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(session));

        info!(address = %address, "Logged in");
        Ok(address)
    }

    /// Drop the current session, if any. Live notifications are disconnected.
    pub fn logout(&self) {
        let previous = self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(session) = previous {
            session.notifications.disconnect();
            info!(address = %session.address, "Logged out");
        }
    }

    pub fn is_logged_in(&self) -> bool {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn address(&self) -> Option<Address> {
        self.session().ok().map(|s| s.address.clone())
    }

    /// The channel client of the current session.
    pub fn channel(&self) -> Result<Arc<ChannelClient>, SessionError> {
        Ok(self.session()?.channel.clone())
    }

    /// Connect the backend notification socket for the signed-in address.
    pub fn start_notifications<F>(
        &self,
        on_message: F,
        on_error: Option<ErrorCallback>,
    ) -> Result<(), SessionError>
    where
        F: Fn(BackendMessage) + Send + Sync + 'static,
    {
        let session = self.session()?;
        session
            .notifications
            .connect(session.address.as_str(), on_message, on_error);
        Ok(())
    }

    pub fn stop_notifications(&self) {
        if let Ok(session) = self.session() {
            session.notifications.disconnect();
        }
    }

    pub fn notification_state(&self) -> Option<SubscriberState> {
        self.session().ok().map(|s| s.notifications.state())
    }

    /// History with `peer`, oldest first.
    pub async fn timeline(&self, peer: &Address) -> Result<Timeline, SessionError> {
        let channel = self.channel()?;
        let history = channel.list_messages(peer).await?;
        debug!(peer = %peer, count = history.len(), "Timeline loaded");
        Ok(Timeline::from_history(history))
    }

    pub async fn send_file(
        &self,
        peer: &Address,
        path: &Path,
    ) -> Result<FileDescriptor, SessionError> {
        let channel = self.channel()?;
        files::send_file(
            &channel,
            self.blobs.as_ref(),
            peer,
            path,
            self.config.max_file_size,
        )
        .await
    }

    pub async fn fetch_file(&self, descriptor: &FileDescriptor) -> Result<Vec<u8>, SessionError> {
        files::fetch_file(self.blobs.as_ref(), descriptor).await
    }

    /// Public gateway link for an attachment.
    ///
    /// `None` for blobs held only in the local store, which no gateway can
    /// serve.
    pub fn share_url(&self, descriptor: &FileDescriptor) -> Option<String> {
        if is_local_content_id(&descriptor.id) {
            return None;
        }
        Some(gateway_url(&self.config.gateway_url, &descriptor.id))
    }

    fn session(&self) -> Result<Arc<Session>, SessionError> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(SessionError::NotLoggedIn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use peerline_net::{LoopbackNetwork, ScriptedSocket, SocketEvent, TransportError};
    use peerline_shared::{ChannelError, LocalIdentity, SigningIdentity};
    use peerline_store::MemoryBlobStore;

    use crate::identity::StaticIdentityProvider;

    struct IdleTransport;

    #[async_trait::async_trait]
    impl NotificationTransport for IdleTransport {
        async fn open(
            &self,
            _user_id: &str,
        ) -> Result<Box<dyn peerline_net::NotificationSocket>, TransportError> {
            Ok(Box::new(ScriptedSocket::new(
                Vec::<SocketEvent>::new(),
                Default::default(),
            )))
        }
    }

    fn manager(network: LoopbackNetwork) -> SessionManager {
        SessionManager::new(
            ClientConfig::default(),
            Arc::new(network),
            Arc::new(IdleTransport),
            Arc::new(MemoryBlobStore::default()),
        )
    }

    #[tokio::test]
    async fn test_login_without_signer() {
        let sessions = manager(LoopbackNetwork::new());
        let result = sessions.login(&StaticIdentityProvider::empty()).await;
        assert!(matches!(result, Err(SessionError::NoSigner)));
        assert!(!sessions.is_logged_in());
        assert!(matches!(sessions.channel(), Err(SessionError::NotLoggedIn)));
    }

    #[tokio::test]
    async fn test_channel_shared_until_logout() {
        let sessions = manager(LoopbackNetwork::new());
        let identity = LocalIdentity::generate();
        let expected = identity.address();

        let address = sessions.login(&StaticIdentityProvider::from(identity)).await.unwrap();
        assert_eq!(address, expected);

        let a = sessions.channel().unwrap();
        let b = sessions.channel().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(a.is_ready());

        sessions.logout();
        sessions.logout();
        assert!(sessions.address().is_none());
        assert!(matches!(sessions.channel(), Err(SessionError::NotLoggedIn)));
    }

    #[tokio::test]
    async fn test_new_login_gets_fresh_channel() {
        let sessions = manager(LoopbackNetwork::new());

        sessions
            .login(&StaticIdentityProvider::from(LocalIdentity::generate()))
            .await
            .unwrap();
        let first = sessions.channel().unwrap();

        let second_identity = LocalIdentity::generate();
        let second_address = second_identity.address();
        sessions.login(&StaticIdentityProvider::from(second_identity)).await.unwrap();
        let second = sessions.channel().unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(second.address(), Some(second_address));
    }

    #[tokio::test]
    async fn test_failed_login_keeps_no_session() {
        let network = LoopbackNetwork::new();
        network.fail_next_connect();
        let sessions = manager(network);

        let result = sessions
            .login(&StaticIdentityProvider::from(LocalIdentity::generate()))
            .await;
        assert!(matches!(
            result,
            Err(SessionError::Channel(ChannelError::SessionSetup(_)))
        ));
        assert!(!sessions.is_logged_in());
    }

    #[tokio::test]
    async fn test_notifications_follow_session() {
        let sessions = manager(LoopbackNetwork::new());
        assert!(matches!(
            sessions.start_notifications(|_| {}, None),
            Err(SessionError::NotLoggedIn)
        ));

        sessions
            .login(&StaticIdentityProvider::from(LocalIdentity::generate()))
            .await
            .unwrap();
        sessions.start_notifications(|_| {}, None).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(
            sessions.notification_state(),
            Some(SubscriberState::Connected)
        );

        sessions.logout();
        assert_eq!(sessions.notification_state(), None);
    }

    #[test]
    fn test_share_url() {
        let sessions = SessionManager::new(
            ClientConfig::default(),
            Arc::new(NoNetwork),
            Arc::new(IdleTransport),
            Arc::new(MemoryBlobStore::default()),
        );
        let mut descriptor = FileDescriptor {
            id: "ipfs://QmAbc".into(),
            file_name: "a.txt".into(),
            file_size: 1,
            file_type: "text/plain".into(),
        };
        assert_eq!(
            sessions.share_url(&descriptor).as_deref(),
            Some("https://ipfs.io/ipfs/QmAbc")
        );

        descriptor.id = peerline_store::content_id(b"x");
        assert_eq!(sessions.share_url(&descriptor), None);
    }

    struct NoNetwork;

    #[async_trait::async_trait]
    impl MessagingNetwork for NoNetwork {
        async fn connect(
            &self,
            _signer: Arc<dyn peerline_shared::SigningIdentity>,
        ) -> peerline_net::NetworkResult<Arc<dyn peerline_net::NetworkSession>> {
            Err(peerline_net::NetworkError::Closed)
        }
    }
}
