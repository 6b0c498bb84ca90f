use futures_util::StreamExt;
use regex::Regex;
use reqwest::header::{CONTENT_RANGE, RANGE};
use reqwest::{Client, Response, StatusCode};
use std::sync::LazyLock;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{Chunk, DestinationFile, DownloadError};

pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

static CONTENT_RANGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^bytes\s+(\d+)-(\d+)/(\d+|\*)$").expect("content-range pattern is valid")
});

/// How often a failed chunk is retried before the whole download fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
        }
    }

    /// Exponential backoff: `base_delay * 2^(attempt - 1)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(factor)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

/// Streams one byte range of the remote file into the destination file.
#[derive(Debug, Clone)]
pub struct ChunkFetcher {
    client: Client,
    buffer_size: usize,
    allow_full_response: bool,
    retry: RetryPolicy,
}

impl ChunkFetcher {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            buffer_size: DEFAULT_BUFFER_SIZE,
            allow_full_response: false,
            retry: RetryPolicy::none(),
        }
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size.max(1);
        self
    }

    /// Accept `200 OK` as well as `206`. Only valid when a single fetcher
    /// covers the whole file, since the server then sends it from byte 0.
    pub fn allow_full_response(mut self, allow: bool) -> Self {
        self.allow_full_response = allow;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Fetches the chunk, retrying retryable failures with backoff. Each
    /// retry picks up from the chunk's current offset.
    pub async fn fetch_with_retry<F>(
        &self,
        url: &str,
        chunk: &mut Chunk,
        file: &DestinationFile,
        cancel: &CancellationToken,
        on_bytes_read: F,
    ) -> Result<(), DownloadError>
    where
        F: Fn(u64),
    {
        let mut attempt = 0;

        loop {
            let error = match self.fetch(url, chunk, file, cancel, &on_bytes_read).await {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };

            attempt += 1;
            if !error.is_retryable() || attempt > self.retry.max_retries {
                return Err(error);
            }

            let delay = self.retry.delay_for(attempt);
            warn!(
                chunk = chunk.id,
                attempt,
                max_retries = self.retry.max_retries,
                "{}; retrying in {:?}",
                error,
                delay
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Single attempt at fetching `chunk`.
    ///
    /// Cancellation is checked before every read from the body; bytes that
    /// were already buffered are still written so the chunk cursor stays
    /// accurate.
    pub async fn fetch<F>(
        &self,
        url: &str,
        chunk: &mut Chunk,
        file: &DestinationFile,
        cancel: &CancellationToken,
        on_bytes_read: F,
    ) -> Result<(), DownloadError>
    where
        F: Fn(u64),
    {
        if chunk.is_complete() {
            return Ok(());
        }
        if cancel.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }

        let request = self.client.get(url).header(RANGE, chunk.range_header());
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
            response = request.send() => response
                .map_err(|e| DownloadError::network(chunk.id, "request failed", e))?,
        };

        // Bytes at the head of the body that we already have on disk.
        let mut skip = self.check_response(&response, chunk)?;

        let mut stream = response.bytes_stream();
        let mut buffer = Vec::with_capacity(self.buffer_size);

        loop {
            let frame = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.flush(&mut buffer, chunk, file, &on_bytes_read).await?;
                    return Err(DownloadError::Cancelled);
                }
                frame = stream.next() => frame,
            };

            let Some(frame) = frame else { break };
            let bytes = match frame {
                Ok(bytes) => bytes,
                Err(e) => {
                    self.flush(&mut buffer, chunk, file, &on_bytes_read).await?;
                    return Err(DownloadError::network(chunk.id, "body read failed", e));
                }
            };

            let mut data = &bytes[..];
            if skip > 0 {
                let n = skip.min(data.len() as u64) as usize;
                data = &data[n..];
                skip -= n as u64;
            }

            let wanted = match chunk.remaining() {
                Some(remaining) => remaining - buffer.len() as u64,
                None => u64::MAX,
            };
            let take = (data.len() as u64).min(wanted) as usize;
            buffer.extend_from_slice(&data[..take]);

            if buffer.len() >= self.buffer_size {
                self.flush(&mut buffer, chunk, file, &on_bytes_read).await?;
            }

            if take as u64 == wanted {
                // Range satisfied; anything the server sends past it is ignored.
                break;
            }
        }

        self.flush(&mut buffer, chunk, file, &on_bytes_read).await?;

        if !chunk.is_unbounded() && !chunk.is_complete() {
            return Err(DownloadError::transfer(
                chunk.id,
                format!(
                    "stream ended at offset {} before range end {}",
                    chunk.current_offset, chunk.end
                ),
                true,
            ));
        }

        debug!(chunk = chunk.id, bytes = chunk.downloaded(), "Chunk finished");
        Ok(())
    }

    /// Validates the status line and returns how many leading body bytes to
    /// discard.
    fn check_response(&self, response: &Response, chunk: &Chunk) -> Result<u64, DownloadError> {
        match response.status() {
            StatusCode::PARTIAL_CONTENT => {
                let content_range = response
                    .headers()
                    .get(CONTENT_RANGE)
                    .and_then(|v| v.to_str().ok());

                if let Some(start) = content_range.and_then(parse_content_range_start) {
                    if start != chunk.current_offset {
                        return Err(DownloadError::transfer(
                            chunk.id,
                            format!(
                                "server answered from offset {} instead of {}",
                                start, chunk.current_offset
                            ),
                            false,
                        ));
                    }
                }
                Ok(0)
            }
            StatusCode::OK if self.allow_full_response => {
                if chunk.current_offset > 0 {
                    debug!(
                        chunk = chunk.id,
                        skip = chunk.current_offset,
                        "Server ignored the range; skipping bytes already on disk"
                    );
                }
                Ok(chunk.current_offset)
            }
            status => Err(DownloadError::http_status(chunk.id, status)),
        }
    }

    async fn flush<F>(
        &self,
        buffer: &mut Vec<u8>,
        chunk: &mut Chunk,
        file: &DestinationFile,
        on_bytes_read: &F,
    ) -> Result<(), DownloadError>
    where
        F: Fn(u64),
    {
        if buffer.is_empty() {
            return Ok(());
        }

        let data = std::mem::replace(buffer, Vec::with_capacity(self.buffer_size));
        let written = data.len() as u64;
        file.write_at(data, chunk.current_offset).await?;

        chunk.current_offset += written;
        on_bytes_read(written);
        Ok(())
    }
}

fn parse_content_range_start(value: &str) -> Option<u64> {
    CONTENT_RANGE_RE
        .captures(value.trim())
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_content_range() {
        assert_eq!(parse_content_range_start("bytes 250-499/1000"), Some(250));
        assert_eq!(parse_content_range_start("bytes 0-0/*"), Some(0));
        assert_eq!(parse_content_range_start("bytes */1000"), None);
        assert_eq!(parse_content_range_start("items 1-2/3"), None);
    }

    #[test]
    fn test_retry_backoff_doubles() {
        let policy = RetryPolicy {
            max_retries: 4,
            base_delay: Duration::from_millis(100),
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(RetryPolicy::none().delay_for(3), Duration::ZERO);
    }
}
