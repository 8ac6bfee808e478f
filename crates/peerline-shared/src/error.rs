use thiserror::Error;

/// Failures surfaced by the channel client.
///
/// Cause-bearing variants keep the underlying error so callers can log the
/// full chain with `{:#}`.
#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("Channel client not initialized")]
    NotInitialized,

    #[error("Channel client is already initializing")]
    AlreadyInitializing,

    #[error("Session setup failed: {0:#}")]
    SessionSetup(anyhow::Error),

    #[error("Conversation resolution failed: {0:#}")]
    ConversationResolution(anyhow::Error),

    #[error("Transmission failed: {0:#}")]
    Transmission(anyhow::Error),

    #[error("Subscription failed: {0:#}")]
    Subscription(anyhow::Error),
}

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("Invalid key bytes")]
    InvalidKeyBytes,

    #[error("Invalid signature")]
    InvalidSignature,
}
