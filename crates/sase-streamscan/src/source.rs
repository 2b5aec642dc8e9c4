//! Chunk sources
//!
//! A source yields an ordered sequence of non-empty chunks and then signals
//! exhaustion, a size-limit cut, or a fault. Uploads are split in memory,
//! files are read incrementally and URLs are streamed over HTTP.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Unrecoverable source failures
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("read error: {0}")]
    Io(#[from] std::io::Error),

    #[error("download failed: {0}")]
    Http(String),

    #[error("server returned HTTP {0}")]
    Status(u16),
}

/// What the source produced next
#[derive(Debug, Clone, PartialEq)]
pub enum SourceSignal {
    Chunk(Bytes),
    Exhausted,
    /// More data exists past the configured cap; the stream is truncated
    SizeLimitExceeded,
}

/// Ordered producer of byte chunks
#[async_trait]
pub trait ChunkSource: Send {
    async fn next_chunk(&mut self) -> Result<SourceSignal, SourceError>;
}

#[async_trait]
impl<S: ChunkSource + ?Sized> ChunkSource for Box<S> {
    async fn next_chunk(&mut self) -> Result<SourceSignal, SourceError> {
        (**self).next_chunk().await
    }
}

/// Splits an in-memory upload into fixed-size chunks (zero copy)
pub struct BytesChunkSource {
    data: Bytes,
    chunk_size: usize,
    offset: usize,
}

impl BytesChunkSource {
    pub fn new(data: impl Into<Bytes>, chunk_size: usize) -> Self {
        Self {
            data: data.into(),
            chunk_size: chunk_size.max(1),
            offset: 0,
        }
    }
}

#[async_trait]
impl ChunkSource for BytesChunkSource {
    async fn next_chunk(&mut self) -> Result<SourceSignal, SourceError> {
        if self.offset >= self.data.len() {
            return Ok(SourceSignal::Exhausted);
        }
        let end = (self.offset + self.chunk_size).min(self.data.len());
        let chunk = self.data.slice(self.offset..end);
        self.offset = end;
        Ok(SourceSignal::Chunk(chunk))
    }
}

/// Reads any async reader (files, sockets, pipes) in `chunk_size` pieces
pub struct ReaderChunkSource<R> {
    reader: R,
    chunk_size: usize,
    eof: bool,
}

impl<R> ReaderChunkSource<R>
where
    R: AsyncRead + Unpin + Send,
{
    pub fn new(reader: R, chunk_size: usize) -> Self {
        Self {
            reader,
            chunk_size: chunk_size.max(1),
            eof: false,
        }
    }
}

#[async_trait]
impl<R> ChunkSource for ReaderChunkSource<R>
where
    R: AsyncRead + Unpin + Send,
{
    async fn next_chunk(&mut self) -> Result<SourceSignal, SourceError> {
        if self.eof {
            return Ok(SourceSignal::Exhausted);
        }

        // fill a whole chunk unless the reader ends first
        let mut buf = vec![0u8; self.chunk_size];
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.reader.read(&mut buf[filled..]).await?;
            if n == 0 {
                self.eof = true;
                break;
            }
            filled += n;
        }

        if filled == 0 {
            return Ok(SourceSignal::Exhausted);
        }
        buf.truncate(filled);
        Ok(SourceSignal::Chunk(Bytes::from(buf)))
    }
}

/// Streams a URL with `reqwest`, re-chunking the body to `chunk_size`
#[cfg(feature = "http")]
pub struct HttpChunkSource {
    client: reqwest::Client,
    url: String,
    chunk_size: usize,
    response: Option<reqwest::Response>,
    pending: Bytes,
    done: bool,
}

#[cfg(feature = "http")]
impl HttpChunkSource {
    pub fn new(url: &str, chunk_size: usize) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("streamscan/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| SourceError::Http(e.to_string()))?;

        Ok(Self {
            client,
            url: url.to_string(),
            chunk_size: chunk_size.max(1),
            response: None,
            pending: Bytes::new(),
            done: false,
        })
    }

    async fn open(&mut self) -> Result<(), SourceError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| SourceError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status(status.as_u16()));
        }
        self.response = Some(response);
        Ok(())
    }
}

#[cfg(feature = "http")]
#[async_trait]
impl ChunkSource for HttpChunkSource {
    async fn next_chunk(&mut self) -> Result<SourceSignal, SourceError> {
        if self.response.is_none() && !self.done {
            self.open().await?;
        }

        while self.pending.is_empty() {
            if self.done {
                return Ok(SourceSignal::Exhausted);
            }
            let Some(response) = self.response.as_mut() else {
                return Ok(SourceSignal::Exhausted);
            };
            match response
                .chunk()
                .await
                .map_err(|e| SourceError::Http(e.to_string()))?
            {
                Some(body) => self.pending = body,
                None => {
                    self.done = true;
                    self.response = None;
                }
            }
        }

        let take = self.chunk_size.min(self.pending.len());
        Ok(SourceSignal::Chunk(self.pending.split_to(take)))
    }
}

/// Enforces a byte cap on any source. The chunk that crosses the cap is cut
/// to fit and the following call reports `SizeLimitExceeded`.
pub struct Capped<S> {
    inner: S,
    max_bytes: u64,
    delivered: u64,
    tripped: bool,
}

impl<S: ChunkSource> Capped<S> {
    pub fn new(inner: S, max_bytes: u64) -> Self {
        Self {
            inner,
            max_bytes,
            delivered: 0,
            tripped: false,
        }
    }

    pub fn delivered(&self) -> u64 {
        self.delivered
    }
}

#[async_trait]
impl<S: ChunkSource> ChunkSource for Capped<S> {
    async fn next_chunk(&mut self) -> Result<SourceSignal, SourceError> {
        if self.tripped {
            return Ok(SourceSignal::SizeLimitExceeded);
        }

        match self.inner.next_chunk().await? {
            SourceSignal::Chunk(chunk) => {
                let remaining = self.max_bytes - self.delivered;
                if remaining == 0 {
                    self.tripped = true;
                    return Ok(SourceSignal::SizeLimitExceeded);
                }
                if chunk.len() as u64 > remaining {
                    self.tripped = true;
                    self.delivered = self.max_bytes;
                    return Ok(SourceSignal::Chunk(chunk.slice(..remaining as usize)));
                }
                self.delivered += chunk.len() as u64;
                Ok(SourceSignal::Chunk(chunk))
            }
            other => Ok(other),
        }
    }
}
