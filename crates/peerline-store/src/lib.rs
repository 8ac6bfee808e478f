// Content-addressed storage for file attachments.

pub mod blob;
pub mod error;
pub mod gateway;

pub use blob::{content_id, is_local_content_id, BlobStore, FsBlobStore, MemoryBlobStore};
pub use error::StoreError;
pub use gateway::gateway_url;
