// Messaging plumbing: the channel client over an abstract messaging network,
// and the reconnecting subscriber for backend push notifications.

pub mod backoff;
pub mod channel;
pub mod loopback;
pub mod network;
pub mod notifications;
pub mod subscriber;
pub mod ws;

pub use backoff::{Backoff, BackoffPolicy};
pub use channel::{ChannelClient, ChannelState};
pub use loopback::LoopbackNetwork;
pub use network::{
    ConversationInfo, Envelope, MessagingNetwork, NetworkError, NetworkResult, NetworkSession,
};
pub use notifications::{parse_frame, BackendMessage, BackendMessageKind, Notification};
pub use subscriber::{
    ErrorCallback, MessageCallback, NotificationSocket, NotificationTransport,
    ReconnectingSubscriber, ScriptedSocket, SocketEvent, SubscriberState, TransportError,
};
pub use ws::{notification_url, WsTransport};
