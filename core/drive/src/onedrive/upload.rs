//! Chunked uploads through a Graph upload session.
//!
//! Files above [`SIMPLE_UPLOAD_LIMIT`] are sent as consecutive ranges of at
//! most [`UPLOAD_CHUNK_SIZE`] bytes. Only one chunk is held in memory at a
//! time.

use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use reqwest::StatusCode;
use std::ops::Range;
use tokio::io::AsyncReadExt;
use tokio_util::io::StreamReader;

use skyview_common::{Error, Result};

use crate::api::{stream_error, ByteStream};
use crate::model::DriveItem;

/// Files up to this size are sent in a single PUT.
pub const SIMPLE_UPLOAD_LIMIT: u64 = 4 * 1024 * 1024;

/// Upload session chunk size (10 MiB, a multiple of the required 320 KiB).
pub const UPLOAD_CHUNK_SIZE: u64 = 10 * 1024 * 1024;

/// Whether a file of `size` bytes needs an upload session.
pub fn needs_upload_session(size: u64) -> bool {
    size > SIMPLE_UPLOAD_LIMIT
}

/// Byte ranges of the chunks for a file of `total` bytes. Only the last one
/// may be shorter than [`UPLOAD_CHUNK_SIZE`].
pub fn chunk_ranges(total: u64) -> impl Iterator<Item = Range<u64>> {
    (0..total)
        .step_by(UPLOAD_CHUNK_SIZE as usize)
        .map(move |start| start..u64::min(start + UPLOAD_CHUNK_SIZE, total))
}

/// `Content-Range` header value for one chunk.
pub fn content_range(range: &Range<u64>, total: u64) -> String {
    format!("bytes {}-{}/{}", range.start, range.end - 1, total)
}

/// How the service answered one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkStatus {
    /// More chunks expected.
    Accepted,
    /// The file is complete; the body is the item.
    Completed,
    Failed,
}

impl ChunkStatus {
    pub fn from_status(status: StatusCode) -> Self {
        match status {
            StatusCode::ACCEPTED => Self::Accepted,
            StatusCode::OK | StatusCode::CREATED => Self::Completed,
            _ => Self::Failed,
        }
    }
}

/// Receiver of an upload session's chunks.
#[async_trait]
pub trait ChunkSink: Send + Sync {
    /// Send one chunk. Returns the item once the service holds the whole
    /// file.
    async fn put_chunk(
        &self,
        range: Range<u64>,
        total: u64,
        chunk: Bytes,
    ) -> Result<Option<DriveItem>>;

    /// Abandon the session. Failures are only logged.
    async fn cancel(&self);
}

/// Send the `total` bytes of `data` through `sink`, buffering one chunk at
/// a time.
///
/// The session is cancelled when a chunk fails, the stream fails or runs
/// short, or the service never reports the file complete.
pub async fn send_chunks(sink: &dyn ChunkSink, data: ByteStream, total: u64) -> Result<DriveItem> {
    let result = send_all(sink, data, total).await;
    if result.is_err() {
        sink.cancel().await;
    }
    result
}

async fn send_all(sink: &dyn ChunkSink, data: ByteStream, total: u64) -> Result<DriveItem> {
    let mut reader = StreamReader::new(data.map_err(std::io::Error::other));

    for range in chunk_ranges(total) {
        let mut buffer = vec![0u8; (range.end - range.start) as usize];
        reader.read_exact(&mut buffer).await.map_err(stream_error)?;

        if let Some(item) = sink.put_chunk(range, total, Bytes::from(buffer)).await? {
            return Ok(item);
        }
    }

    Err(Error::Network("Upload did not complete".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    const MIB: u64 = 1024 * 1024;

    fn pattern(len: u64) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    /// Split `data` into a stream of 1 MiB pieces.
    fn stream_of(data: Vec<u8>) -> ByteStream {
        let pieces: Vec<Result<Bytes>> = data
            .chunks(MIB as usize)
            .map(|piece| Ok(Bytes::copy_from_slice(piece)))
            .collect();
        Box::pin(futures::stream::iter(pieces))
    }

    /// Records every chunk; completes on the final range unless told
    /// otherwise.
    #[derive(Default)]
    struct RecordingSink {
        chunks: Mutex<Vec<(String, Bytes)>>,
        fail_at: Option<usize>,
        never_complete: bool,
        cancelled: AtomicBool,
    }

    #[async_trait]
    impl ChunkSink for RecordingSink {
        async fn put_chunk(
            &self,
            range: Range<u64>,
            total: u64,
            chunk: Bytes,
        ) -> Result<Option<DriveItem>> {
            let mut chunks = self.chunks.lock().unwrap();
            if self.fail_at == Some(chunks.len()) {
                return Err(Error::Service {
                    status: 416,
                    code: "invalidRange".to_string(),
                    message: "Bad range".to_string(),
                });
            }
            let last = range.end == total;
            chunks.push((content_range(&range, total), chunk));

            if last && !self.never_complete {
                Ok(Some(DriveItem {
                    id: "big".to_string(),
                    name: "big.bin".to_string(),
                    size: Some(total as i64),
                    ..Default::default()
                }))
            } else {
                Ok(None)
            }
        }

        async fn cancel(&self) {
            self.cancelled.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_chunk_size_is_multiple_of_320_kib() {
        assert_eq!(UPLOAD_CHUNK_SIZE % (320 * 1024), 0);
        assert!(UPLOAD_CHUNK_SIZE > SIMPLE_UPLOAD_LIMIT);
    }

    #[test]
    fn test_upload_session_threshold() {
        assert!(!needs_upload_session(0));
        assert!(!needs_upload_session(4 * MIB));
        assert!(needs_upload_session(4 * MIB + 1));
    }

    #[test]
    fn test_chunk_ranges_at_boundaries() {
        let ranges: Vec<_> = chunk_ranges(4 * MIB + 1).collect();
        assert_eq!(ranges, vec![0..4 * MIB + 1]);

        let ranges: Vec<_> = chunk_ranges(10 * MIB).collect();
        assert_eq!(ranges, vec![0..10 * MIB]);

        let ranges: Vec<_> = chunk_ranges(10 * MIB + 1).collect();
        assert_eq!(ranges, vec![0..10 * MIB, 10 * MIB..10 * MIB + 1]);

        let ranges: Vec<_> = chunk_ranges(25 * MIB).collect();
        assert_eq!(ranges, vec![0..10 * MIB, 10 * MIB..20 * MIB, 20 * MIB..25 * MIB]);

        assert_eq!(chunk_ranges(0).count(), 0);
    }

    #[test]
    fn test_content_range_is_inclusive() {
        let total = 10 * MIB + 1;
        assert_eq!(
            content_range(&(0..10 * MIB), total),
            "bytes 0-10485759/10485761"
        );
        assert_eq!(
            content_range(&(10 * MIB..total), total),
            "bytes 10485760-10485760/10485761"
        );
    }

    #[test]
    fn test_chunk_status() {
        assert_eq!(ChunkStatus::from_status(StatusCode::ACCEPTED), ChunkStatus::Accepted);
        assert_eq!(ChunkStatus::from_status(StatusCode::OK), ChunkStatus::Completed);
        assert_eq!(ChunkStatus::from_status(StatusCode::CREATED), ChunkStatus::Completed);
        assert_eq!(
            ChunkStatus::from_status(StatusCode::RANGE_NOT_SATISFIABLE),
            ChunkStatus::Failed
        );
        assert_eq!(
            ChunkStatus::from_status(StatusCode::INTERNAL_SERVER_ERROR),
            ChunkStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_send_chunks_rechunks_stream() {
        let total = 10 * MIB + 1;
        let data = pattern(total);
        let sink = RecordingSink::default();

        let item = send_chunks(&sink, stream_of(data.clone()), total).await.unwrap();

        assert_eq!(item.size, Some(total as i64));
        assert!(!sink.cancelled.load(Ordering::SeqCst));

        let chunks = sink.chunks.lock().unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].0, "bytes 0-10485759/10485761");
        assert_eq!(chunks[0].1.len() as u64, 10 * MIB);
        assert_eq!(chunks[1].0, "bytes 10485760-10485760/10485761");
        assert_eq!(&chunks[1].1[..], &data[(10 * MIB) as usize..]);
    }

    #[tokio::test]
    async fn test_failed_chunk_cancels_session() {
        let total = 10 * MIB + 1;
        let sink = RecordingSink {
            fail_at: Some(1),
            ..Default::default()
        };

        let result = send_chunks(&sink, stream_of(pattern(total)), total).await;

        assert!(matches!(result, Err(Error::Service { status: 416, .. })));
        assert!(sink.cancelled.load(Ordering::SeqCst));
        assert_eq!(sink.chunks.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_short_stream_cancels_session() {
        let sink = RecordingSink::default();

        let result = send_chunks(&sink, stream_of(pattern(5 * MIB)), 10 * MIB + 1).await;

        assert!(matches!(result, Err(Error::Io(_))));
        assert!(sink.cancelled.load(Ordering::SeqCst));
        assert!(sink.chunks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stream_error_cancels_session() {
        let sink = RecordingSink::default();
        let pieces = vec![
            Ok(Bytes::from(pattern(MIB))),
            Err(Error::Network("connection reset".to_string())),
        ];

        let result = send_chunks(&sink, Box::pin(futures::stream::iter(pieces)), 5 * MIB).await;

        assert!(matches!(result, Err(Error::Network(ref m)) if m == "connection reset"));
        assert!(sink.cancelled.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_session_without_final_item_is_cancelled() {
        let total = 10 * MIB + 1;
        let sink = RecordingSink {
            never_complete: true,
            ..Default::default()
        };

        let result = send_chunks(&sink, stream_of(pattern(total)), total).await;

        assert!(matches!(result, Err(Error::Network(_))));
        assert!(sink.cancelled.load(Ordering::SeqCst));
        assert_eq!(sink.chunks.lock().unwrap().len(), 2);
    }
}
