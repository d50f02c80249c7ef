//! Upload storage seam
//!
//! Content persistence belongs to an external blob store; [`UploadStore`] is
//! the only interface the upload path needs. [`LocalDirStore`] writes each
//! upload to its own file and is what the bundled server uses.

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWriteExt};
use tracing::{debug, warn};

use crate::models::{SubjectId, UploadId};
use crate::{Error, Result};

/// Result of a completed upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredUpload {
    pub id: UploadId,
    pub size: u64,
}

#[async_trait]
pub trait UploadStore: Send + Sync {
    /// Consume `reader` to its end and persist it.
    ///
    /// Partial content must not remain visible when reading fails.
    async fn store(
        &self,
        owner: &SubjectId,
        original_name: Option<&str>,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<StoredUpload>;
}

/// Writes uploads to `<root>/<upload id>`
#[derive(Debug, Clone)]
pub struct LocalDirStore {
    root: PathBuf,
}

impl LocalDirStore {
    /// Create the store, creating `root` if needed
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn path_of(&self, id: &UploadId) -> PathBuf {
        self.root.join(id.as_str())
    }
}

#[async_trait]
impl UploadStore for LocalDirStore {
    async fn store(
        &self,
        owner: &SubjectId,
        original_name: Option<&str>,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<StoredUpload> {
        let id = UploadId::new();
        let path = self.path_of(&id);
        let mut file = tokio::fs::File::create(&path).await?;

        let copied = match tokio::io::copy(reader, &mut file).await {
            Ok(n) => file.flush().await.map(|()| n),
            Err(e) => Err(e),
        };

        match copied {
            Ok(size) => {
                debug!(
                    upload_id = %id,
                    owner = %owner,
                    original_name = original_name.unwrap_or_default(),
                    size,
                    "Upload stored"
                );
                Ok(StoredUpload { id, size })
            }
            Err(e) => {
                drop(file);
                if let Err(remove_err) = tokio::fs::remove_file(&path).await {
                    warn!(upload_id = %id, error = %remove_err, "Failed to remove partial upload");
                }
                Err(Error::from_body_io(e))
            }
        }
    }
}

/// Body length limit exceeded; carried inside an `io::Error`
#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("upload exceeds {limit} bytes")]
pub struct LimitExceeded {
    pub limit: u64,
}

/// Fail `stream` with [`LimitExceeded`] once more than `limit` bytes have passed
pub fn limit_body<S, B>(stream: S, limit: u64) -> LimitedBody<S>
where
    S: Stream<Item = std::io::Result<B>> + Unpin,
    B: AsRef<[u8]>,
{
    LimitedBody {
        inner: stream,
        limit,
        seen: 0,
        tripped: Arc::default(),
    }
}

pub struct LimitedBody<S> {
    inner: S,
    limit: u64,
    seen: u64,
    tripped: Arc<AtomicBool>,
}

impl<S> LimitedBody<S> {
    /// Handle that reports whether the limit was hit, even after the error
    /// has been rewrapped by a downstream parser.
    #[must_use]
    pub fn watch(&self) -> LimitWatch {
        LimitWatch {
            limit: self.limit,
            tripped: self.tripped.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LimitWatch {
    limit: u64,
    tripped: Arc<AtomicBool>,
}

impl LimitWatch {
    #[must_use]
    pub fn exceeded(&self) -> Option<LimitExceeded> {
        self.tripped
            .load(Ordering::Acquire)
            .then_some(LimitExceeded { limit: self.limit })
    }
}

impl<S, B> Stream for LimitedBody<S>
where
    S: Stream<Item = std::io::Result<B>> + Unpin,
    B: AsRef<[u8]>,
{
    type Item = std::io::Result<B>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.seen += chunk.as_ref().len() as u64;
                if this.seen > this.limit {
                    this.tripped.store(true, Ordering::Release);
                    return Poll::Ready(Some(Err(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        LimitExceeded { limit: this.limit },
                    ))));
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tokio_util::io::StreamReader;

    fn owner() -> SubjectId {
        SubjectId::from_string("alice".to_string())
    }

    #[tokio::test]
    async fn test_store_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalDirStore::new(dir.path().join("uploads")).await.unwrap();

        let mut reader: &[u8] = b"hello world";
        let stored = store.store(&owner(), Some("hello.txt"), &mut reader).await.unwrap();

        assert_eq!(stored.size, 11);
        let content = tokio::fs::read(store.path_of(&stored.id)).await.unwrap();
        assert_eq!(content, b"hello world");
    }

    #[tokio::test]
    async fn test_limit_exceeded_removes_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalDirStore::new(dir.path()).await.unwrap();

        let chunks: Vec<std::io::Result<Bytes>> =
            vec![Ok(Bytes::from_static(b"12345")), Ok(Bytes::from_static(b"67890"))];
        let mut reader = StreamReader::new(limit_body(futures::stream::iter(chunks), 8));

        let err = store.store(&owner(), None, &mut reader).await.unwrap_err();
        assert!(matches!(err, Error::PayloadTooLarge { limit: 8 }), "{err:?}");

        let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_limit_allows_exact_size() {
        let chunks: Vec<std::io::Result<Bytes>> = vec![Ok(Bytes::from_static(b"1234"))];
        let body = limit_body(futures::stream::iter(chunks), 4);
        let watch = body.watch();
        let mut reader = StreamReader::new(body);
        let mut out = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut reader, &mut out).await.unwrap();
        assert_eq!(out, b"1234");
        assert!(watch.exceeded().is_none());
    }

    #[tokio::test]
    async fn test_watch_sees_limit_through_rewrapped_error() {
        use futures::StreamExt;

        let chunks: Vec<std::io::Result<Bytes>> =
            vec![Ok(Bytes::from_static(b"12345")), Ok(Bytes::from_static(b"67890"))];
        let body = limit_body(futures::stream::iter(chunks), 8);
        let watch = body.watch();

        // a parser that flattens the error to a string loses the source
        let flattened: Vec<std::result::Result<Bytes, String>> =
            body.map(|chunk| chunk.map_err(|e| e.to_string())).collect().await;

        assert!(flattened[1].is_err());
        assert!(matches!(watch.exceeded(), Some(LimitExceeded { limit: 8 })));
    }
}
