/// Application name
pub const APP_NAME: &str = "Peerline";

/// Prefix of every wallet-style address.
pub const ADDRESS_PREFIX: &str = "0x";

/// Number of hex digits following [`ADDRESS_PREFIX`].
pub const ADDRESS_HEX_LEN: usize = 40;

/// Ed25519 public key size in bytes
pub const PUBKEY_SIZE: usize = 32;

/// Ed25519 secret key size in bytes
pub const SECRET_KEY_SIZE: usize = 32;

/// Maximum file size accepted for a file-reference send (50 MiB)
pub const MAX_FILE_SIZE: usize = 50 * 1024 * 1024;

/// Key derivation context for wallet-style addresses (BLAKE3)
pub const KDF_CONTEXT_ADDRESS: &str = "peerline-address-v1";

/// Topic prefix for one-to-one conversations
pub const CONVERSATION_TOPIC_PREFIX: &str = "dm";

/// Reconnect delay before the first retry, in milliseconds
pub const RECONNECT_INITIAL_DELAY_MS: u64 = 1_000;

/// Upper bound for the reconnect delay, in milliseconds
pub const RECONNECT_MAX_DELAY_MS: u64 = 30_000;

/// Consecutive reconnect attempts before the subscriber gives up
pub const RECONNECT_MAX_ATTEMPTS: u32 = 5;

/// Default backend push endpoint
pub const DEFAULT_WS_BASE_URL: &str = "ws://localhost:8001";

/// Default public gateway for content ids
pub const DEFAULT_GATEWAY_URL: &str = "https://ipfs.io/ipfs/";

/// MIME type used when none can be guessed
pub const FALLBACK_MIME_TYPE: &str = "application/octet-stream";
