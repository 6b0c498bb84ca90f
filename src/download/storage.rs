//! Positional writes into the shared destination file.
//!
//! Every fetcher holds a clone of the same `DestinationFile` and writes only
//! inside its own chunk, so no locking is needed around the handle.
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::DownloadError;

#[derive(Debug, Clone)]
pub struct DestinationFile {
    path: PathBuf,
    file: Arc<File>,
}

impl DestinationFile {
    /// Opens (or creates) the file without truncating existing content.
    pub async fn open(path: &Path) -> Result<Self, DownloadError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    DownloadError::io(format!("Failed to create directory {:?}", parent), e)
                })?;
            }
        }

        let owned = path.to_path_buf();
        let file = blocking(move || {
            OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&owned)
        })
        .await
        .map_err(|e| DownloadError::io(format!("Failed to open {:?}", path), e))?;

        Ok(Self {
            path: path.to_path_buf(),
            file: Arc::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn len(&self) -> Result<u64, DownloadError> {
        let file = Arc::clone(&self.file);
        blocking(move || file.metadata().map(|m| m.len()))
            .await
            .map_err(|e| self.io_error("Failed to stat", e))
    }

    /// Grows the file to `len` bytes so fetchers never extend it mid-flight.
    pub async fn preallocate(&self, len: u64) -> Result<(), DownloadError> {
        if self.len().await? >= len {
            return Ok(());
        }
        self.set_len(len).await
    }

    pub async fn set_len(&self, len: u64) -> Result<(), DownloadError> {
        let file = Arc::clone(&self.file);
        blocking(move || file.set_len(len))
            .await
            .map_err(|e| self.io_error("Failed to resize", e))
    }

    /// Writes all of `buf` starting at absolute `offset`.
    pub async fn write_at(&self, buf: Vec<u8>, offset: u64) -> Result<(), DownloadError> {
        let file = Arc::clone(&self.file);
        blocking(move || write_all_at(&file, &buf, offset))
            .await
            .map_err(|e| self.io_error(&format!("Failed to write at offset {} of", offset), e))
    }

    pub async fn sync(&self) -> Result<(), DownloadError> {
        let file = Arc::clone(&self.file);
        blocking(move || file.sync_all())
            .await
            .map_err(|e| self.io_error("Failed to sync", e))
    }

    fn io_error(&self, action: &str, source: io::Error) -> DownloadError {
        DownloadError::io(format!("{} {:?}", action, self.path), source)
    }
}

/// Current length of the file at `path`, or 0 when it does not exist.
pub async fn existing_length(path: &Path) -> Result<u64, DownloadError> {
    match tokio::fs::metadata(path).await {
        Ok(metadata) => Ok(metadata.len()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(DownloadError::io(format!("Failed to stat {:?}", path), e)),
    }
}

async fn blocking<T, F>(f: F) -> io::Result<T>
where
    F: FnOnce() -> io::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(io::Error::other)?
}

#[cfg(unix)]
fn write_all_at(file: &File, buf: &[u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.write_all_at(buf, offset)
}

#[cfg(windows)]
fn write_all_at(file: &File, mut buf: &[u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_write(buf, offset) {
            Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero)),
            Ok(n) => {
                buf = &buf[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
