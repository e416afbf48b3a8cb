use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct Buffer {
    bytes: Vec<u8>,
    closed: bool,
}

/// Combined stdout/stderr capture for a single job.
///
/// Both output pumps append through the same write lock, so the interleaving
/// of the two streams is whatever order the reads complete in, but no bytes
/// are lost. Snapshots take the read lock and never observe a half-applied
/// append. Content only grows: a snapshot is always a prefix of any snapshot
/// taken after it.
#[derive(Debug, Default)]
pub struct OutputSink {
    inner: RwLock<Buffer>,
}

impl OutputSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk read from either output stream.
    ///
    /// Chunks arriving after [`close`](Self::close) are dropped.
    pub async fn append(&self, chunk: &[u8]) {
        if chunk.is_empty() {
            return;
        }
        let mut buffer = self.inner.write().await;
        if buffer.closed {
            tracing::debug!(len = chunk.len(), "dropping output appended after close");
            return;
        }
        buffer.bytes.extend_from_slice(chunk);
    }

    /// Mark the stream complete. Called once both pumps have drained.
    pub async fn close(&self) {
        self.inner.write().await.closed = true;
    }

    pub async fn is_closed(&self) -> bool {
        self.inner.read().await.closed
    }

    /// Everything captured so far, decoded as UTF-8 (lossy).
    ///
    /// While the stream is open a trailing multi-byte character that is still
    /// missing bytes is held back, otherwise it would render as a replacement
    /// character now and as the real character later, breaking the prefix
    /// property between snapshots.
    pub async fn snapshot(&self) -> String {
        let buffer = self.inner.read().await;
        let end = if buffer.closed {
            buffer.bytes.len()
        } else {
            complete_prefix_len(&buffer.bytes)
        };
        String::from_utf8_lossy(&buffer.bytes[..end]).into_owned()
    }

    /// Number of bytes captured.
    pub async fn len(&self) -> usize {
        self.inner.read().await.bytes.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Length of `bytes` without a trailing, still incomplete UTF-8 sequence.
fn complete_prefix_len(bytes: &[u8]) -> usize {
    let len = bytes.len();
    // A sequence is at most 4 bytes, so a pending lead byte sits in the last 3.
    for back in 1..=len.min(3) {
        let byte = bytes[len - back];
        if byte & 0b1100_0000 == 0b1000_0000 {
            continue;
        }
        let width = match byte {
            0xC0..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF7 => 4,
            _ => 1,
        };
        return if back < width { len - back } else { len };
    }
    len
}
