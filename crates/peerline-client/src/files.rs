//! File attachments: upload to the blob store, then send a reference.

use std::path::Path;

use tracing::{debug, info, warn};

use peerline_net::ChannelClient;
use peerline_shared::constants::FALLBACK_MIME_TYPE;
use peerline_shared::{Address, FileDescriptor};
use peerline_store::BlobStore;

use crate::error::SessionError;

/// Upload the file at `path` and send a file reference to `peer`.
///
/// Files larger than `max_size`, or than the store accepts, are rejected
/// before anything is read or uploaded. Returns the descriptor that was sent.
pub async fn send_file(
    channel: &ChannelClient,
    blobs: &dyn BlobStore,
    peer: &Address,
    path: &Path,
    max_size: usize,
) -> Result<FileDescriptor, SessionError> {
    let max = max_size.min(blobs.max_size());
    let size = tokio::fs::metadata(path).await?.len();
    if size > max as u64 {
        return Err(SessionError::FileTooLarge { size, max });
    }

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown")
        .to_string();

    let data = tokio::fs::read(path).await?;
    let id = blobs.put(&data).await?;

    let descriptor = FileDescriptor {
        id,
        file_name,
        file_size: data.len() as u64,
        file_type: guess_mime(path),
    };

    debug!(
        id = %descriptor.id,
        file = %descriptor.file_name,
        mime = %descriptor.file_type,
        "Uploaded attachment"
    );

    channel.send(peer, descriptor.clone()).await?;

    info!(
        peer = %peer,
        file = %descriptor.file_name,
        size = descriptor.file_size,
        "File reference sent"
    );
    Ok(descriptor)
}

/// Download the bytes a file reference points to.
pub async fn fetch_file(
    blobs: &dyn BlobStore,
    descriptor: &FileDescriptor,
) -> Result<Vec<u8>, SessionError> {
    let data = blobs.get(&descriptor.id).await?;
    if data.len() as u64 != descriptor.file_size {
        warn!(
            id = %descriptor.id,
            expected = descriptor.file_size,
            actual = data.len(),
            "Attachment size differs from its descriptor"
        );
    }
    Ok(data)
}

fn guess_mime(path: &Path) -> String {
    mime_guess::from_path(path)
        .first()
        .map(|m| m.essence_str().to_string())
        .unwrap_or_else(|| FALLBACK_MIME_TYPE.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use peerline_net::LoopbackNetwork;
    use peerline_shared::{LocalIdentity, SigningIdentity};
    use peerline_store::MemoryBlobStore;
    use tempfile::TempDir;

    #[test]
    fn test_guess_mime() {
        assert_eq!(guess_mime(Path::new("photo.png")), "image/png");
        assert_eq!(guess_mime(Path::new("notes.txt")), "text/plain");
        assert_eq!(guess_mime(Path::new("blob.zzunknown")), FALLBACK_MIME_TYPE);
        assert_eq!(guess_mime(Path::new("README")), FALLBACK_MIME_TYPE);
    }

    async fn ready_channel() -> ChannelClient {
        let channel = ChannelClient::new(Arc::new(LoopbackNetwork::new()));
        let signer: Arc<dyn SigningIdentity> = Arc::new(LocalIdentity::generate());
        channel.initialize(signer).await.unwrap();
        channel
    }

    #[tokio::test]
    async fn test_send_and_fetch() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("report.pdf");
        std::fs::write(&path, b"%PDF-1.4 fake").unwrap();

        let channel = ready_channel().await;
        let blobs = MemoryBlobStore::default();
        let peer = Address::from("0xb0b");

        let descriptor = send_file(&channel, &blobs, &peer, &path, 1024)
            .await
            .unwrap();
        assert_eq!(descriptor.file_name, "report.pdf");
        assert_eq!(descriptor.file_type, "application/pdf");
        assert_eq!(descriptor.file_size, 13);

        let history = channel.list_messages(&peer).await.unwrap();
        assert_eq!(history[0].file(), Some(&descriptor));
        assert_eq!(history[0].display_content, "[File: report.pdf]");

        assert_eq!(fetch_file(&blobs, &descriptor).await.unwrap(), b"%PDF-1.4 fake");
    }

    #[tokio::test]
    async fn test_oversize_rejected_before_upload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("big.bin");
        std::fs::write(&path, vec![7u8; 64]).unwrap();

        let channel = ready_channel().await;
        let blobs = MemoryBlobStore::default();

        let result = send_file(&channel, &blobs, &Address::from("0xb0b"), &path, 16).await;
        assert!(matches!(
            result,
            Err(SessionError::FileTooLarge { size: 64, max: 16 })
        ));
        assert!(blobs.is_empty());
    }

    #[tokio::test]
    async fn test_store_limit_applies_below_configured_max() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mid.bin");
        std::fs::write(&path, vec![1u8; 12]).unwrap();

        let channel = ready_channel().await;
        let blobs = MemoryBlobStore::new(8);

        let result = send_file(&channel, &blobs, &Address::from("0xb0b"), &path, 1024).await;
        assert!(matches!(
            result,
            Err(SessionError::FileTooLarge { size: 12, max: 8 })
        ));
        assert!(blobs.is_empty());
        assert!(channel
            .list_messages(&Address::from("0xb0b"))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_send_requires_ready_channel() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, b"hi").unwrap();

        let channel = ChannelClient::new(Arc::new(LoopbackNetwork::new()));
        let blobs = MemoryBlobStore::default();

        let result = send_file(&channel, &blobs, &Address::from("0xb0b"), &path, 1024).await;
        assert!(matches!(
            result,
            Err(SessionError::Channel(peerline_shared::ChannelError::NotInitialized))
        ));
    }
}
