use anyhow::{Context, Result};
use reqwest::Client;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, info, info_span, warn};
use uuid::Uuid;

use super::fetcher::DEFAULT_BUFFER_SIZE;
use super::planner::DEFAULT_MIN_CHUNK_SIZE;
use super::progress::DEFAULT_PUBLISH_INTERVAL;
use super::storage::{self, DestinationFile};
use super::{
    Chunk, ChunkFetcher, ChunkPlanner, ChecksumVerifier, DownloadConfig, DownloadError,
    DownloadStatus, FileInfo, ProgressAggregator, RangeProbe, ResumeManifest, RetryPolicy,
};

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub buffer_size: usize,
    pub min_chunk_size: u64,
    pub retry: RetryPolicy,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub publish_interval: Duration,
    pub user_agent: String,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            min_chunk_size: DEFAULT_MIN_CHUNK_SIZE,
            retry: RetryPolicy::default(),
            connect_timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(60),
            publish_interval: DEFAULT_PUBLISH_INTERVAL,
            user_agent: concat!("chunkfetch/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

struct Plan {
    chunks: Vec<Chunk>,
    /// Bytes already valid on disk before this run.
    baseline: u64,
    manifest: Option<ResumeManifest>,
}

/// Public entry point: runs one download at a time and publishes its
/// progress as a `DownloadStatus` stream.
///
/// `start` never returns an error. Every outcome, failures included, is
/// reported through the status channel and as the returned final status.
pub struct DownloadOrchestrator {
    client: Client,
    options: EngineOptions,
    status: Arc<watch::Sender<DownloadStatus>>,
    cancel: Mutex<CancellationToken>,
    pause_requested: AtomicBool,
    running: tokio::sync::Mutex<()>,
}

impl DownloadOrchestrator {
    pub fn new(options: EngineOptions) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(options.connect_timeout)
            .read_timeout(options.read_timeout)
            .user_agent(options.user_agent.clone())
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self::with_client(client, options))
    }

    pub fn with_client(client: Client, options: EngineOptions) -> Self {
        let (status, _) = watch::channel(DownloadStatus::Idle);

        Self {
            client,
            options,
            status: Arc::new(status),
            cancel: Mutex::new(CancellationToken::new()),
            pause_requested: AtomicBool::new(false),
            running: tokio::sync::Mutex::new(()),
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn subscribe(&self) -> watch::Receiver<DownloadStatus> {
        self.status.subscribe()
    }

    pub fn status(&self) -> DownloadStatus {
        self.status.borrow().clone()
    }

    /// Runs `config` to completion and returns the final status.
    ///
    /// A second call waits for the first to finish; each run owns its own
    /// chunks, fetch tasks and aggregator. A `cancel` or `pause` stops the
    /// running download and every call already queued behind it.
    pub async fn start(&self, config: DownloadConfig) -> DownloadStatus {
        let cancel = self.current_token();
        let _running = self.running.lock().await;

        let id = Uuid::new_v4().to_string()[..8].to_string();
        let span = info_span!("download", id = %id, url = %config.url);

        let outcome = self.run(&config, &cancel).instrument(span.clone()).await;
        let status = self.final_status(&config, outcome).instrument(span).await;

        self.status.send_replace(status.clone());
        status
    }

    /// Stops the running download and resets the status to `Idle`. Returns
    /// once every fetcher has stopped and its connection has been dropped.
    pub async fn cancel(&self) {
        self.stop(false).await;
    }

    /// Like `cancel`, but reports `Paused` and keeps the resume manifest.
    pub async fn pause(&self) {
        self.stop(true).await;
    }

    async fn stop(&self, pause: bool) {
        self.pause_requested.store(pause, Ordering::Release);
        self.current_token().cancel();

        // `start` holds this lock until all of its fetch tasks are joined,
        // and calls queued before this one hold the cancelled token.
        let _idle = self.running.lock().await;
        if !pause {
            self.status.send_replace(DownloadStatus::Idle);
        }

        // Calls to `start` from here on run with a live token.
        let mut current = self.cancel.lock().unwrap_or_else(PoisonError::into_inner);
        if current.is_cancelled() {
            *current = CancellationToken::new();
        }
        self.pause_requested.store(false, Ordering::Release);
    }

    fn current_token(&self) -> CancellationToken {
        self.cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn final_status(
        &self,
        config: &DownloadConfig,
        outcome: Result<PathBuf, DownloadError>,
    ) -> DownloadStatus {
        match outcome {
            Ok(file_path) => {
                info!("Download complete: {:?}", file_path);
                DownloadStatus::Success { file_path }
            }
            Err(DownloadError::Cancelled) if self.pause_requested.load(Ordering::Acquire) => {
                let (downloaded_bytes, total_bytes) = self.paused_figures(config).await;
                info!(downloaded_bytes, "Download paused");
                DownloadStatus::Paused {
                    downloaded_bytes,
                    total_bytes,
                }
            }
            Err(DownloadError::Cancelled) => {
                info!("Download cancelled");
                DownloadStatus::Idle
            }
            Err(e) => {
                warn!("Download failed: {}", e);
                DownloadStatus::Error {
                    message: e.to_string(),
                    cause: e.cause(),
                }
            }
        }
    }

    /// Progress to report for a pause. The last published figures win;
    /// a pause that lands before them reports what is already on disk.
    async fn paused_figures(&self, config: &DownloadConfig) -> (u64, Option<u64>) {
        let published = match &*self.status.borrow() {
            DownloadStatus::Downloading {
                downloaded_bytes,
                total_bytes,
                ..
            } => Some((*downloaded_bytes, *total_bytes)),
            _ => None,
        };
        if let Some(figures) = published {
            return figures;
        }

        let path = config.file_path();
        match ResumeManifest::load(&ResumeManifest::path_for(&path)).await {
            Ok(Some(manifest)) => (manifest.downloaded_bytes(), Some(manifest.total_length)),
            _ => (
                storage::existing_length(&path).await.unwrap_or(0),
                config.expected_length,
            ),
        }
    }

    async fn run(
        &self,
        config: &DownloadConfig,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, DownloadError> {
        self.status.send_replace(DownloadStatus::Pending);

        let path = config.file_path();
        let manifest_path = ResumeManifest::path_for(&path);
        let existing = storage::existing_length(&path).await?;
        let previous = ResumeManifest::load(&manifest_path).await?;

        // Without a manifest the file length is the whole resume state.
        if previous.is_none() {
            if let Some(expected) = config.expected_length {
                if expected > 0 && existing >= expected {
                    info!(existing, "File already complete, nothing to fetch");
                    self.verify(config, &path, &manifest_path).await?;
                    return Ok(path);
                }
            }
        }

        let probe = RangeProbe::new(self.client.clone());
        let info = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
            info = probe.probe(&config.url) => info,
        };

        if previous.is_none()
            && info
                .content_length
                .is_some_and(|total| total > 0 && existing >= total)
        {
            info!(existing, "File already complete, nothing to fetch");
            self.verify(config, &path, &manifest_path).await?;
            return Ok(path);
        }

        let file = DestinationFile::open(&path).await?;
        let mut plan = self
            .plan(config, &info, existing, previous, &file, &manifest_path)
            .await?;

        let total = plan.manifest.as_ref().map(|m| m.total_length);
        let aggregator = Arc::new(
            ProgressAggregator::new(Arc::clone(&self.status), total, plan.baseline)
                .with_publish_interval(self.options.publish_interval),
        );
        aggregator.publish();

        let fetched = self
            .fetch_all(
                &config.url,
                plan.chunks,
                &file,
                &aggregator,
                plan.manifest.as_mut(),
                &manifest_path,
                cancel,
            )
            .await;

        // Final exact figures, also what a pause reports.
        aggregator.publish();
        let synced = file.sync().await;
        drop(file);
        fetched?;
        synced?;

        if let Some(total) = total {
            debug_assert_eq!(aggregator.downloaded_bytes(), total);
        }
        info!(
            transferred = aggregator.transferred_bytes(),
            speed_bps = aggregator.speed_bytes_per_sec(),
            "All chunks fetched"
        );

        self.verify(config, &path, &manifest_path).await?;
        ResumeManifest::remove(&manifest_path).await?;
        Ok(path)
    }

    /// Decides which chunks this run fetches. A matching manifest wins; a
    /// stale one invalidates the file; otherwise the file length is the
    /// resume point.
    async fn plan(
        &self,
        config: &DownloadConfig,
        info: &FileInfo,
        existing: u64,
        previous: Option<ResumeManifest>,
        file: &DestinationFile,
        manifest_path: &Path,
    ) -> Result<Plan, DownloadError> {
        let existing = match previous {
            Some(manifest)
                if manifest.matches(&config.url, info)
                    && info.supports_ranges
                    && existing >= manifest.total_length =>
            {
                // The earlier run sized the file before recording any bytes.
                file.preallocate(manifest.total_length).await?;
                let chunks = manifest.pending_chunks();
                info!(
                    chunks = chunks.len(),
                    downloaded = manifest.downloaded_bytes(),
                    total = manifest.total_length,
                    "Resuming from manifest"
                );
                return Ok(Plan {
                    baseline: manifest.downloaded_bytes(),
                    chunks,
                    manifest: Some(manifest),
                });
            }
            Some(manifest) => {
                if existing < manifest.total_length {
                    warn!(
                        existing,
                        expected = manifest.total_length,
                        "Partial file is shorter than its resume manifest, restarting from zero"
                    );
                } else {
                    warn!("Resume manifest does not match the remote file, restarting from zero");
                }
                ResumeManifest::remove(manifest_path).await?;
                file.set_len(0).await?;
                0
            }
            None => existing,
        };

        let planner = ChunkPlanner::new(self.options.min_chunk_size);
        let chunks = planner.plan(
            info.content_length,
            info.supports_ranges,
            existing,
            config.parallelism,
            existing,
        );

        let Some(total) = info.content_length.filter(|&t| t > 0) else {
            // Unknown length: nothing on disk can be trusted.
            info!("Length unknown, streaming from byte 0");
            file.set_len(0).await?;
            return Ok(Plan {
                chunks,
                baseline: 0,
                manifest: None,
            });
        };

        let missing: u64 = chunks.iter().filter_map(Chunk::remaining).sum();
        let strategy = if chunks.len() > 1 {
            "multi-chunk"
        } else {
            "single-stream"
        };
        info!(
            total,
            resume_from = existing.min(total),
            chunks = chunks.len(),
            strategy,
            "Planned download"
        );

        // The manifest must exist before the file grows past its valid bytes.
        let mut manifest = ResumeManifest::new(&config.url, total, info, chunks.clone());
        manifest.save(manifest_path).await?;
        file.preallocate(total).await?;

        Ok(Plan {
            chunks,
            baseline: total - missing,
            manifest: Some(manifest),
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn fetch_all(
        &self,
        url: &str,
        chunks: Vec<Chunk>,
        file: &DestinationFile,
        aggregator: &Arc<ProgressAggregator>,
        mut manifest: Option<&mut ResumeManifest>,
        manifest_path: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), DownloadError> {
        let fetcher = Arc::new(
            ChunkFetcher::new(self.client.clone())
                .with_buffer_size(self.options.buffer_size)
                .with_retry(self.options.retry)
                .allow_full_response(chunks.len() == 1),
        );

        // Stopping siblings after a failure must not look like a user cancel.
        let siblings = cancel.child_token();
        let url: Arc<str> = Arc::from(url);
        let mut tasks = JoinSet::new();

        for mut chunk in chunks {
            let fetcher = Arc::clone(&fetcher);
            let file = file.clone();
            let aggregator = Arc::clone(aggregator);
            let token = siblings.clone();
            let url = Arc::clone(&url);

            tasks.spawn(
                async move {
                    let result = fetcher
                        .fetch_with_retry(&url, &mut chunk, &file, &token, |n| {
                            aggregator.add_bytes(n)
                        })
                        .await;
                    (chunk, result)
                }
                .instrument(Span::current()),
            );
        }

        let mut first_error: Option<DownloadError> = None;
        let mut fail = |error: DownloadError| {
            if first_error.is_none() {
                warn!("{}; stopping remaining chunks", error);
                siblings.cancel();
                first_error = Some(error);
            }
        };

        while let Some(joined) = tasks.join_next().await {
            let (chunk, result) = match joined {
                Ok(done) => done,
                Err(e) => {
                    fail(DownloadError::TaskAborted(e.to_string()));
                    continue;
                }
            };

            if let Some(manifest) = manifest.as_mut() {
                manifest.record(&chunk);
                if let Err(e) = manifest.save(manifest_path).await {
                    fail(e);
                }
            }

            match result {
                Ok(()) => debug!(chunk = chunk.id, "Chunk complete"),
                Err(e) if e.is_cancelled() => {
                    debug!(chunk = chunk.id, offset = chunk.current_offset, "Chunk stopped")
                }
                Err(e) => fail(e),
            }
        }

        if cancel.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Checks the configured checksum, removing the file on mismatch so the
    /// next attempt starts clean.
    async fn verify(
        &self,
        config: &DownloadConfig,
        path: &Path,
        manifest_path: &Path,
    ) -> Result<(), DownloadError> {
        let (Some(expected), Some(kind)) = (&config.expected_checksum, config.checksum_type) else {
            return Ok(());
        };

        let actual = ChecksumVerifier::calculate_checksum(path, kind)
            .await
            .map_err(|e| DownloadError::io(format!("Failed to hash {:?}", path), io::Error::other(e)))?;

        if actual.eq_ignore_ascii_case(expected.trim()) {
            debug!(%kind, "Checksum verified");
            return Ok(());
        }

        warn!("Checksum mismatch, removing {:?}", path);
        if let Err(e) = tokio::fs::remove_file(path).await {
            warn!("Failed to remove {:?}: {}", path, e);
        }
        ResumeManifest::remove(manifest_path).await?;

        Err(DownloadError::ChecksumMismatch {
            expected: expected.clone(),
            actual,
        })
    }
}
