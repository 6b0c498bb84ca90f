//! Resumable, parallel-chunk HTTP downloads.
//!
//! A `DownloadOrchestrator` probes the remote file, splits it into byte
//! ranges, fetches the ranges concurrently into a pre-sized file and
//! publishes a `DownloadStatus` stream while it works. Interrupted
//! downloads resume from what is already on disk.
pub mod config;
pub mod download;

pub use config::ConfigManager;
pub use download::{
    ChecksumType, Chunk, ChunkPlanner, DownloadConfig, DownloadError, DownloadOrchestrator,
    DownloadStatus, EngineOptions, FileInfo, ProgressAggregator, RangeProbe, RetryPolicy,
};
