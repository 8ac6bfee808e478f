use thiserror::Error;

use peerline_shared::ChannelError;
use peerline_store::StoreError;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("No signing identity available")]
    NoSigner,

    #[error("Not logged in")]
    NotLoggedIn,

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("File too large: {size} bytes (max {max})")]
    FileTooLarge { size: u64, max: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
