//! Sidecar record of chunk progress for resuming pre-sized files.
//!
//! Once the destination file has been grown to its final size its length no
//! longer says how much of it is valid, so `<file>.part.json` carries the
//! chunk cursors instead. The manifest is written before the file is grown
//! and removed after a successful download; as long as it exists the file is
//! considered incomplete.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use tracing::warn;

use super::{Chunk, DownloadError, FileInfo};

pub const MANIFEST_SUFFIX: &str = ".part.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumeManifest {
    pub url: String,
    pub total_length: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
    pub chunks: Vec<Chunk>,
    pub updated_at: DateTime<Utc>,
}

impl ResumeManifest {
    pub fn new(url: &str, total_length: u64, info: &FileInfo, chunks: Vec<Chunk>) -> Self {
        Self {
            url: url.to_string(),
            total_length,
            etag: info.etag.clone(),
            last_modified: info.last_modified.clone(),
            chunks,
            updated_at: Utc::now(),
        }
    }

    pub fn path_for(destination: &Path) -> PathBuf {
        let mut name = OsString::from(destination.as_os_str());
        name.push(MANIFEST_SUFFIX);
        PathBuf::from(name)
    }

    /// The download file a manifest path belongs to, if it is one.
    pub fn destination_for(manifest: &Path) -> Option<PathBuf> {
        let name = manifest.file_name()?.to_str()?;
        let stem = name.strip_suffix(MANIFEST_SUFFIX)?;
        if stem.is_empty() {
            return None;
        }
        Some(manifest.with_file_name(stem))
    }

    /// Loads the manifest. A missing file is `None`; so is an unreadable
    /// one, which is logged and treated as if the download never started.
    pub async fn load(path: &Path) -> Result<Option<Self>, DownloadError> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(DownloadError::io(
                    format!("Failed to read resume manifest {:?}", path),
                    e,
                ));
            }
        };

        match serde_json::from_str(&content) {
            Ok(manifest) => Ok(Some(manifest)),
            Err(e) => {
                warn!("Ignoring corrupt resume manifest {:?}: {}", path, e);
                Ok(None)
            }
        }
    }

    /// Writes to a temporary file first so a crash never leaves a torn manifest.
    pub async fn save(&mut self, path: &Path) -> Result<(), DownloadError> {
        self.updated_at = Utc::now();
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| DownloadError::io("Failed to serialize resume manifest", e.into()))?;

        let mut tmp = OsString::from(path.as_os_str());
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| DownloadError::io(format!("Failed to write {:?}", tmp), e))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| DownloadError::io(format!("Failed to replace {:?}", path), e))
    }

    pub async fn remove(path: &Path) -> Result<(), DownloadError> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DownloadError::io(format!("Failed to remove {:?}", path), e)),
        }
    }

    /// Whether the bytes recorded here still belong to the file the server
    /// is offering now.
    pub fn matches(&self, url: &str, info: &FileInfo) -> bool {
        fn same(recorded: &Option<String>, current: &Option<String>) -> bool {
            match (recorded, current) {
                (Some(a), Some(b)) => a == b,
                _ => true,
            }
        }

        self.url == url
            && info.content_length == Some(self.total_length)
            && same(&self.etag, &info.etag)
            && same(&self.last_modified, &info.last_modified)
    }

    /// Replaces the recorded state of one chunk. The cursor only moves forward.
    pub fn record(&mut self, chunk: &Chunk) {
        if let Some(entry) = self.chunks.iter_mut().find(|c| c.id == chunk.id) {
            entry.current_offset = entry.current_offset.max(chunk.current_offset);
        }
    }

    pub fn pending_chunks(&self) -> Vec<Chunk> {
        self.chunks
            .iter()
            .filter(|c| !c.is_complete())
            .copied()
            .collect()
    }

    /// Bytes known to be valid: everything outside the recorded chunks plus
    /// what each chunk has already fetched.
    pub fn downloaded_bytes(&self) -> u64 {
        let missing: u64 = self.chunks.iter().filter_map(|c| c.remaining()).sum();
        self.total_length.saturating_sub(missing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn info(len: u64, etag: Option<&str>) -> FileInfo {
        FileInfo {
            content_length: Some(len),
            supports_ranges: true,
            last_modified: None,
            etag: etag.map(String::from),
        }
    }

    fn sample() -> ResumeManifest {
        let mut chunks = vec![Chunk::new(0, 200, 599), Chunk::new(1, 600, 999)];
        chunks[0].current_offset = 600;
        chunks[1].current_offset = 700;
        ResumeManifest::new("http://example.com/f", 1000, &info(1000, Some("\"v1\"")), chunks)
    }

    #[test]
    fn test_paths() {
        let manifest = ResumeManifest::path_for(Path::new("/tmp/dl/file.iso"));
        assert_eq!(manifest, PathBuf::from("/tmp/dl/file.iso.part.json"));
        assert_eq!(
            ResumeManifest::destination_for(&manifest),
            Some(PathBuf::from("/tmp/dl/file.iso"))
        );
        assert_eq!(ResumeManifest::destination_for(Path::new("/tmp/x.json")), None);
    }

    #[test]
    fn test_progress_accounting() {
        let manifest = sample();
        // 200 bytes before the first chunk, 400 in chunk 0, 100 in chunk 1.
        assert_eq!(manifest.downloaded_bytes(), 700);

        let pending = manifest.pending_chunks();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].range_header(), "bytes=700-999");
    }

    #[test]
    fn test_record_never_moves_backwards() {
        let mut manifest = sample();
        let mut stale = Chunk::new(1, 600, 999);
        stale.current_offset = 650;
        manifest.record(&stale);
        assert_eq!(manifest.chunks[1].current_offset, 700);

        stale.current_offset = 1000;
        manifest.record(&stale);
        assert!(manifest.chunks[1].is_complete());
        assert_eq!(manifest.downloaded_bytes(), 1000);
    }

    #[test]
    fn test_matches_checks_validators() {
        let manifest = sample();
        let url = "http://example.com/f";

        assert!(manifest.matches(url, &info(1000, Some("\"v1\""))));
        assert!(manifest.matches(url, &info(1000, None)));
        assert!(!manifest.matches(url, &info(1000, Some("\"v2\""))));
        assert!(!manifest.matches(url, &info(999, Some("\"v1\""))));
        assert!(!manifest.matches("http://example.com/g", &info(1000, None)));
        assert!(!manifest.matches(url, &FileInfo::unknown()));
    }

    #[tokio::test]
    async fn test_save_load_remove() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let path = ResumeManifest::path_for(&dir.path().join("file.bin"));

        assert!(ResumeManifest::load(&path).await?.is_none());

        let mut manifest = sample();
        manifest.save(&path).await?;
        let loaded = ResumeManifest::load(&path).await?.expect("manifest present");
        assert_eq!(loaded.chunks, manifest.chunks);
        assert_eq!(loaded.etag.as_deref(), Some("\"v1\""));

        ResumeManifest::remove(&path).await?;
        assert!(!path.exists());
        // Removing twice is fine.
        ResumeManifest::remove(&path).await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_corrupt_manifest_is_ignored() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("file.bin.part.json");
        tokio::fs::write(&path, "{ not json").await?;

        assert!(ResumeManifest::load(&path).await?.is_none());
        Ok(())
    }
}
