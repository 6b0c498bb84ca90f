use reqwest::StatusCode;
use thiserror::Error;

/// Failures a download can run into.
///
/// Only `ProbeFailed` is absorbed inside the engine; everything else except
/// `Cancelled` ends the download and is surfaced as `DownloadStatus::Error`.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("probe failed: {0}")]
    ProbeFailed(String),

    #[error("chunk {chunk_id} transfer failed: {message}")]
    ChunkTransferFailed {
        chunk_id: usize,
        message: String,
        retryable: bool,
        #[source]
        source: Option<reqwest::Error>,
    },

    #[error("{context}: {source}")]
    IoFailure {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("fetch task aborted: {0}")]
    TaskAborted(String),

    #[error("download cancelled")]
    Cancelled,
}

impl DownloadError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::IoFailure {
            context: context.into(),
            source,
        }
    }

    /// A network-level failure while talking to the server for `chunk_id`.
    pub fn network(chunk_id: usize, message: impl Into<String>, source: reqwest::Error) -> Self {
        Self::ChunkTransferFailed {
            chunk_id,
            message: message.into(),
            retryable: true,
            source: Some(source),
        }
    }

    pub fn http_status(chunk_id: usize, status: StatusCode) -> Self {
        let retryable = status.is_server_error()
            || status == StatusCode::REQUEST_TIMEOUT
            || status == StatusCode::TOO_MANY_REQUESTS;

        Self::ChunkTransferFailed {
            chunk_id,
            message: format!("unexpected HTTP status {}", status),
            retryable,
            source: None,
        }
    }

    pub fn transfer(chunk_id: usize, message: impl Into<String>, retryable: bool) -> Self {
        Self::ChunkTransferFailed {
            chunk_id,
            message: message.into(),
            retryable,
            source: None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ChunkTransferFailed {
                retryable: true,
                ..
            }
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Renders the underlying source chain, if any, as a single line.
    pub fn cause(&self) -> Option<String> {
        let mut source = std::error::Error::source(self);
        let mut parts = Vec::new();
        while let Some(err) = source {
            parts.push(err.to_string());
            source = err.source();
        }

        if parts.is_empty() {
            None
        } else {
            Some(parts.join(": "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(DownloadError::http_status(0, StatusCode::INTERNAL_SERVER_ERROR).is_retryable());
        assert!(DownloadError::http_status(0, StatusCode::TOO_MANY_REQUESTS).is_retryable());
        assert!(!DownloadError::http_status(0, StatusCode::NOT_FOUND).is_retryable());
        assert!(!DownloadError::http_status(0, StatusCode::OK).is_retryable());
    }

    #[test]
    fn test_non_transfer_errors_are_not_retryable() {
        let io = DownloadError::io("write failed", std::io::Error::other("disk full"));
        assert!(!io.is_retryable());
        assert!(!DownloadError::Cancelled.is_retryable());
        assert!(DownloadError::Cancelled.is_cancelled());
    }

    #[test]
    fn test_cause_renders_source_chain() {
        let err = DownloadError::io("write failed", std::io::Error::other("disk full"));
        assert_eq!(err.cause(), Some("disk full".to_string()));
        assert_eq!(err.to_string(), "write failed: disk full");

        let err = DownloadError::transfer(2, "stream closed early", true);
        assert_eq!(err.cause(), None);
        assert_eq!(err.to_string(), "chunk 2 transfer failed: stream closed early");
    }
}
