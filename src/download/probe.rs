use reqwest::Client;
use reqwest::header::{ACCEPT_RANGES, CONTENT_LENGTH, ETAG, HeaderMap, HeaderName, LAST_MODIFIED};
use tracing::{debug, warn};

use super::DownloadError;

/// What a HEAD request told us about the remote file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileInfo {
    /// `None` when the server did not announce a length.
    pub content_length: Option<u64>,
    pub supports_ranges: bool,
    pub last_modified: Option<String>,
    pub etag: Option<String>,
}

impl FileInfo {
    /// The conservative result used whenever probing fails: no known length
    /// and no range support, which forces a plain single-stream download.
    pub fn unknown() -> Self {
        Self::default()
    }

    /// Length with `-1` standing in for "unknown".
    pub fn total_length(&self) -> i64 {
        self.content_length
            .and_then(|len| i64::try_from(len).ok())
            .unwrap_or(-1)
    }

    /// True when the response headers allow parallel, resumable fetching.
    pub fn can_split(&self) -> bool {
        self.supports_ranges && self.content_length.is_some_and(|len| len > 0)
    }

    pub fn from_headers(headers: &HeaderMap) -> Self {
        let header = |name: HeaderName| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.trim().to_string())
        };

        let content_length = header(CONTENT_LENGTH).and_then(|s| s.parse::<u64>().ok());
        let supports_ranges = header(ACCEPT_RANGES)
            .map(|s| {
                s.split(',')
                    .any(|unit| unit.trim().eq_ignore_ascii_case("bytes"))
            })
            .unwrap_or(false);

        Self {
            content_length,
            supports_ranges,
            last_modified: header(LAST_MODIFIED),
            etag: header(ETAG),
        }
    }
}

/// Issues the metadata-only request that decides the download strategy.
#[derive(Debug, Clone)]
pub struct RangeProbe {
    client: Client,
}

impl RangeProbe {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Never fails: any error degrades to `FileInfo::unknown()`.
    pub async fn probe(&self, url: &str) -> FileInfo {
        match self.try_probe(url).await {
            Ok(info) => {
                debug!(
                    total_length = info.total_length(),
                    supports_ranges = info.supports_ranges,
                    etag = ?info.etag,
                    "Probe succeeded"
                );
                info
            }
            Err(e) => {
                warn!("{}; falling back to a single-stream download", e);
                FileInfo::unknown()
            }
        }
    }

    async fn try_probe(&self, url: &str) -> Result<FileInfo, DownloadError> {
        let response = self
            .client
            .head(url)
            .send()
            .await
            .map_err(|e| DownloadError::ProbeFailed(format!("HEAD {} failed: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(DownloadError::ProbeFailed(format!(
                "HEAD {} returned status {}",
                url,
                response.status()
            )));
        }

        Ok(FileInfo::from_headers(response.headers()))
    }
}
