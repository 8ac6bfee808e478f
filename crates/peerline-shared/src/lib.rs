//! Types shared by every Peerline crate: addresses, signing identities,
//! the message codec and the channel error taxonomy.

pub mod address;
pub mod codec;
pub mod constants;
pub mod error;
pub mod identity;
pub mod types;

pub use address::{Address, ConversationKey};
pub use error::{ChannelError, IdentityError};
pub use identity::{LocalIdentity, SigningIdentity};
pub use types::{Content, FileDescriptor, Message, MessageKind, MessageOrigin};
