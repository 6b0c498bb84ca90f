pub mod checksum;
pub mod engine;
pub mod error;
pub mod fetcher;
pub mod manifest;
pub mod planner;
pub mod probe;
pub mod progress;
pub mod storage;

pub use checksum::{ChecksumType, ChecksumVerifier};
pub use engine::{DownloadOrchestrator, EngineOptions};
pub use error::DownloadError;
pub use fetcher::{ChunkFetcher, RetryPolicy};
pub use manifest::ResumeManifest;
pub use planner::{Chunk, ChunkPlanner};
pub use probe::{FileInfo, RangeProbe};
pub use progress::{DownloadStatus, ProgressAggregator};
pub use storage::DestinationFile;

use std::path::PathBuf;

/// One download request, built by the caller and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    pub url: String,
    /// Directory the file is written into.
    pub destination_path: PathBuf,
    pub file_name: String,
    /// Number of concurrent chunk fetchers requested, at least 1.
    pub parallelism: usize,
    /// Size the caller already knows about. Lets an already complete file
    /// be recognised without touching the network.
    pub expected_length: Option<u64>,
    pub expected_checksum: Option<String>,
    pub checksum_type: Option<ChecksumType>,
}

impl DownloadConfig {
    pub fn new(url: String, destination_path: PathBuf, file_name: String) -> Self {
        Self {
            url,
            destination_path,
            file_name,
            parallelism: 1,
            expected_length: None,
            expected_checksum: None,
            checksum_type: None,
        }
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    pub fn with_expected_length(mut self, length: u64) -> Self {
        self.expected_length = Some(length);
        self
    }

    pub fn with_checksum(mut self, checksum: String, checksum_type: ChecksumType) -> Self {
        self.expected_checksum = Some(checksum);
        self.checksum_type = Some(checksum_type);
        self
    }

    pub fn file_path(&self) -> PathBuf {
        self.destination_path.join(&self.file_name)
    }
}

/// Derives a file name from the last path segment of `url`.
pub fn file_name_from_url(url: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(url).ok()?;
    let segment = parsed.path_segments()?.next_back()?;
    let name = segment.trim();

    if name.is_empty() || name == "." || name == ".." {
        None
    } else {
        Some(name.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = DownloadConfig::new(
            "https://example.com/file.iso".to_string(),
            PathBuf::from("/tmp/downloads"),
            "file.iso".to_string(),
        )
        .with_parallelism(0)
        .with_expected_length(1000)
        .with_checksum("abc".to_string(), ChecksumType::Sha256);

        assert_eq!(config.parallelism, 1);
        assert_eq!(config.expected_length, Some(1000));
        assert_eq!(config.checksum_type, Some(ChecksumType::Sha256));
        assert_eq!(config.file_path(), PathBuf::from("/tmp/downloads/file.iso"));
    }

    #[test]
    fn test_file_name_from_url() {
        assert_eq!(
            file_name_from_url("https://example.com/pub/archive.tar.gz?sig=1"),
            Some("archive.tar.gz".to_string())
        );
        assert_eq!(file_name_from_url("https://example.com/"), None);
        assert_eq!(file_name_from_url("not a url"), None);
    }
}
