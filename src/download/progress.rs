use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// The only state observers ever see.
#[derive(Debug, Clone, PartialEq)]
pub enum DownloadStatus {
    Idle,
    Pending,
    Downloading {
        /// Fraction in `0.0..=1.0`; stays 0 when the total is unknown.
        progress: f64,
        downloaded_bytes: u64,
        total_bytes: Option<u64>,
        speed_bytes_per_sec: u64,
    },
    Paused {
        downloaded_bytes: u64,
        total_bytes: Option<u64>,
    },
    Success {
        file_path: PathBuf,
    },
    Error {
        message: String,
        cause: Option<String>,
    },
}

impl DownloadStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success { .. } | Self::Error { .. })
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Downloading { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Pending => "pending",
            Self::Downloading { .. } => "downloading",
            Self::Paused { .. } => "paused",
            Self::Success { .. } => "success",
            Self::Error { .. } => "error",
        }
    }
}

pub const DEFAULT_PUBLISH_INTERVAL: Duration = Duration::from_millis(250);

/// Sums byte deltas from all fetchers of one download and publishes
/// coalesced `Downloading` updates.
///
/// With a known total a new status goes out each time the whole-percent
/// value advances (so 100% is always published). With an unknown total
/// updates are rate-limited to one per `publish_interval`.
pub struct ProgressAggregator {
    status: Arc<watch::Sender<DownloadStatus>>,
    total_bytes: Option<u64>,
    baseline: u64,
    downloaded: AtomicU64,
    started: Instant,
    last_percent: AtomicU64,
    last_publish_ms: AtomicU64,
    publish_interval: Duration,
}

impl ProgressAggregator {
    /// `baseline` is what was already on disk before this run started.
    pub fn new(
        status: Arc<watch::Sender<DownloadStatus>>,
        total_bytes: Option<u64>,
        baseline: u64,
    ) -> Self {
        let total_bytes = total_bytes.filter(|&t| t > 0);
        let initial_percent = total_bytes.map(|t| percent(baseline, t)).unwrap_or(0);

        Self {
            status,
            total_bytes,
            baseline,
            downloaded: AtomicU64::new(baseline),
            started: Instant::now(),
            last_percent: AtomicU64::new(initial_percent),
            last_publish_ms: AtomicU64::new(0),
            publish_interval: DEFAULT_PUBLISH_INTERVAL,
        }
    }

    pub fn with_publish_interval(mut self, interval: Duration) -> Self {
        self.publish_interval = interval;
        self
    }

    pub fn add_bytes(&self, delta: u64) {
        if delta == 0 {
            return;
        }
        let downloaded = self.downloaded.fetch_add(delta, Ordering::AcqRel) + delta;

        if self.should_publish(downloaded) {
            self.send(downloaded);
        }
    }

    /// Cumulative total including the bytes that were already on disk.
    pub fn downloaded_bytes(&self) -> u64 {
        self.downloaded.load(Ordering::Acquire)
    }

    /// Bytes moved over the network during this run.
    pub fn transferred_bytes(&self) -> u64 {
        self.downloaded_bytes() - self.baseline
    }

    pub fn speed_bytes_per_sec(&self) -> u64 {
        let elapsed = self.started.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            (self.transferred_bytes() as f64 / elapsed) as u64
        } else {
            0
        }
    }

    /// Publishes the current figures regardless of the coalescing policy.
    pub fn publish(&self) {
        self.send(self.downloaded_bytes());
    }

    fn should_publish(&self, downloaded: u64) -> bool {
        match self.total_bytes {
            Some(total) => {
                let step = percent(downloaded, total);
                let mut last = self.last_percent.load(Ordering::Acquire);
                while step > last {
                    match self.last_percent.compare_exchange_weak(
                        last,
                        step,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    ) {
                        Ok(_) => return true,
                        Err(actual) => last = actual,
                    }
                }
                false
            }
            None => {
                let now = self.started.elapsed().as_millis() as u64;
                let last = self.last_publish_ms.load(Ordering::Acquire);
                now.saturating_sub(last) >= self.publish_interval.as_millis() as u64
                    && self
                        .last_publish_ms
                        .compare_exchange(last, now, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
            }
        }
    }

    fn send(&self, downloaded: u64) {
        let next = self.status_for(downloaded);
        // Publishers race; never let an older figure overwrite a newer one,
        // and never resurrect a download that already left the active states.
        self.status.send_if_modified(|current| {
            let newer = match current {
                DownloadStatus::Pending => true,
                DownloadStatus::Downloading {
                    downloaded_bytes, ..
                } => *downloaded_bytes < downloaded,
                _ => false,
            };
            if newer {
                *current = next;
            }
            newer
        });
    }

    fn status_for(&self, downloaded: u64) -> DownloadStatus {
        let progress = match self.total_bytes {
            Some(total) => (downloaded as f64 / total as f64).clamp(0.0, 1.0),
            None => 0.0,
        };

        DownloadStatus::Downloading {
            progress,
            downloaded_bytes: downloaded,
            total_bytes: self.total_bytes,
            speed_bytes_per_sec: self.speed_bytes_per_sec(),
        }
    }
}

fn percent(downloaded: u64, total: u64) -> u64 {
    (downloaded.min(total) as u128 * 100 / total as u128) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> (Arc<watch::Sender<DownloadStatus>>, watch::Receiver<DownloadStatus>) {
        let (tx, rx) = watch::channel(DownloadStatus::Pending);
        (Arc::new(tx), rx)
    }

    fn downloaded(status: &DownloadStatus) -> u64 {
        match status {
            DownloadStatus::Downloading {
                downloaded_bytes, ..
            } => *downloaded_bytes,
            other => panic!("expected Downloading, got {:?}", other),
        }
    }

    #[test]
    fn test_updates_are_coalesced_by_percent() {
        let (tx, mut rx) = channel();
        let aggregator = ProgressAggregator::new(tx, Some(1000), 0);
        aggregator.publish();
        rx.borrow_and_update();

        // 5 bytes is 0.5%, not enough for a new update.
        aggregator.add_bytes(5);
        assert!(!rx.has_changed().unwrap());

        aggregator.add_bytes(5);
        assert!(rx.has_changed().unwrap());
        assert_eq!(downloaded(&rx.borrow_and_update()), 10);

        aggregator.add_bytes(990);
        let status = rx.borrow_and_update().clone();
        assert_eq!(downloaded(&status), 1000);
        assert!(matches!(status, DownloadStatus::Downloading { progress, .. } if progress == 1.0));
    }

    #[test]
    fn test_baseline_counts_toward_progress_but_not_speed() {
        let (tx, rx) = channel();
        let aggregator = ProgressAggregator::new(tx, Some(1000), 400);
        aggregator.publish();

        assert_eq!(downloaded(&rx.borrow()), 400);
        assert_eq!(aggregator.transferred_bytes(), 0);

        aggregator.add_bytes(600);
        assert_eq!(aggregator.downloaded_bytes(), 1000);
        assert_eq!(aggregator.transferred_bytes(), 600);
    }

    #[test]
    fn test_terminal_status_is_not_overwritten() {
        let (tx, rx) = channel();
        let aggregator = ProgressAggregator::new(Arc::clone(&tx), Some(100), 0);
        tx.send_replace(DownloadStatus::Idle);

        aggregator.add_bytes(50);
        aggregator.publish();
        assert_eq!(*rx.borrow(), DownloadStatus::Idle);
    }

    #[test]
    fn test_unknown_total_is_rate_limited() {
        let (tx, rx) = channel();
        let aggregator =
            ProgressAggregator::new(tx, None, 0).with_publish_interval(Duration::from_secs(3600));
        aggregator.publish();

        aggregator.add_bytes(10);
        aggregator.add_bytes(10);
        assert_eq!(downloaded(&rx.borrow()), 0);
        assert_eq!(aggregator.downloaded_bytes(), 20);

        aggregator.publish();
        let status = rx.borrow().clone();
        assert!(matches!(
            status,
            DownloadStatus::Downloading { progress, total_bytes: None, downloaded_bytes: 20, .. } if progress == 0.0
        ));
    }

    #[test]
    fn test_concurrent_adds_are_exact() {
        let (tx, rx) = channel();
        let total = 8 * 10_000;
        let aggregator = Arc::new(ProgressAggregator::new(tx, Some(total), 0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let aggregator = Arc::clone(&aggregator);
                std::thread::spawn(move || {
                    for _ in 0..10_000 {
                        aggregator.add_bytes(1);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(aggregator.downloaded_bytes(), total);
        // The 100% step is published by whichever thread crossed it last.
        assert_eq!(downloaded(&rx.borrow()), total);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn final_total_is_exact_for_any_interleaving(
                deltas in prop::collection::vec(prop::collection::vec(1u64..5000, 1..40), 1..8)
            ) {
                let expected: u64 = deltas.iter().flatten().sum();
                let (tx, rx) = channel();
                let aggregator = Arc::new(ProgressAggregator::new(tx, Some(expected), 0));

                std::thread::scope(|scope| {
                    for fetcher in &deltas {
                        let aggregator = Arc::clone(&aggregator);
                        scope.spawn(move || {
                            for &delta in fetcher {
                                aggregator.add_bytes(delta);
                                std::thread::yield_now();
                            }
                        });
                    }
                });

                prop_assert_eq!(aggregator.downloaded_bytes(), expected);
                prop_assert_eq!(downloaded(&rx.borrow()), expected);
            }
        }
    }
}
