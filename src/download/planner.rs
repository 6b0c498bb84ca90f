//! Splitting a download into byte-range chunks.
//!
//! A chunk is an inclusive `[start, end]` range plus a cursor
//! (`current_offset`) pointing at the first byte that still has to be
//! fetched. Chunks are handed to exactly one fetcher each and never overlap.
use serde::{Deserialize, Serialize};

/// End offset used for a chunk whose length is not known up front.
pub const UNBOUNDED: u64 = u64::MAX;

/// Smallest chunk the default planner will produce when splitting.
pub const DEFAULT_MIN_CHUNK_SIZE: u64 = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: usize,
    /// First byte of the range (0-based).
    pub start: u64,
    /// Last byte of the range, inclusive. `UNBOUNDED` for unknown lengths.
    pub end: u64,
    /// Next byte to fetch. The chunk is complete once this passes `end`.
    pub current_offset: u64,
}

impl Chunk {
    pub fn new(id: usize, start: u64, end: u64) -> Self {
        Self {
            id,
            start,
            end,
            current_offset: start,
        }
    }

    pub fn is_unbounded(&self) -> bool {
        self.end == UNBOUNDED
    }

    /// Total size of the range, `None` when unbounded.
    pub fn size(&self) -> Option<u64> {
        (!self.is_unbounded()).then(|| self.end - self.start + 1)
    }

    /// Bytes still to fetch, `None` when unbounded.
    pub fn remaining(&self) -> Option<u64> {
        if self.is_unbounded() {
            None
        } else {
            Some((self.end + 1).saturating_sub(self.current_offset))
        }
    }

    pub fn downloaded(&self) -> u64 {
        self.current_offset - self.start
    }

    pub fn is_complete(&self) -> bool {
        !self.is_unbounded() && self.current_offset > self.end
    }

    /// Value for the HTTP `Range` header covering the unfetched part.
    pub fn range_header(&self) -> String {
        if self.is_unbounded() {
            format!("bytes={}-", self.current_offset)
        } else {
            format!("bytes={}-{}", self.current_offset, self.end)
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ChunkPlanner {
    min_chunk_size: u64,
}

impl ChunkPlanner {
    pub fn new(min_chunk_size: u64) -> Self {
        Self {
            min_chunk_size: min_chunk_size.max(1),
        }
    }

    pub fn min_chunk_size(&self) -> u64 {
        self.min_chunk_size
    }

    /// Plans the chunks needed to bring the file up to `total_length`.
    ///
    /// Falls back to a single chunk when the length is unknown, ranges are
    /// unsupported, or only one fetcher was asked for. An unknown length
    /// always restarts from byte 0 with an unbounded chunk. Chunks already
    /// covered by `existing_file_length` are dropped; partially covered
    /// ones start at the first byte past the end of the file.
    pub fn plan(
        &self,
        total_length: Option<u64>,
        supports_ranges: bool,
        already_downloaded: u64,
        parallelism: usize,
        existing_file_length: u64,
    ) -> Vec<Chunk> {
        let total = match total_length {
            Some(total) if total > 0 => total,
            _ => return vec![Chunk::new(0, 0, UNBOUNDED)],
        };

        let resume_from = already_downloaded.min(total);
        if resume_from >= total {
            return Vec::new();
        }

        let remaining = total - resume_from;
        let count = if supports_ranges {
            self.effective_parallelism(remaining, parallelism)
        } else {
            1
        };

        let chunk_size = remaining / count;
        let mut chunks = Vec::with_capacity(count as usize);

        for i in 0..count {
            let start = resume_from + i * chunk_size;
            let end = if i == count - 1 {
                total - 1
            } else {
                start + chunk_size - 1
            };

            let mut chunk = Chunk::new(i as usize, start, end);
            // A byte is only trusted if the file already reaches past it.
            chunk.current_offset = existing_file_length.clamp(start, end + 1);

            if !chunk.is_complete() {
                chunks.push(chunk);
            }
        }

        chunks
    }

    /// Reduces parallelism so no chunk is smaller than the minimum size.
    /// Never returns zero and never more than `remaining`.
    fn effective_parallelism(&self, remaining: u64, desired: usize) -> u64 {
        let desired = desired.max(1) as u64;
        let by_size = (remaining / self.min_chunk_size).max(1);
        desired.min(by_size).min(remaining)
    }
}

impl Default for ChunkPlanner {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_CHUNK_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranges(chunks: &[Chunk]) -> Vec<(u64, u64)> {
        chunks.iter().map(|c| (c.current_offset, c.end)).collect()
    }

    #[test]
    fn test_even_split_on_fresh_file() {
        let planner = ChunkPlanner::new(1);
        let chunks = planner.plan(Some(1000), true, 0, 4, 0);

        assert_eq!(
            ranges(&chunks),
            vec![(0, 249), (250, 499), (500, 749), (750, 999)]
        );
        assert!(chunks.iter().all(|c| c.start == c.current_offset));
    }

    #[test]
    fn test_last_chunk_absorbs_remainder() {
        let planner = ChunkPlanner::new(1);
        let chunks = planner.plan(Some(100), true, 0, 3, 0);

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].size(), Some(33));
        assert_eq!(chunks[1].size(), Some(33));
        assert_eq!(chunks[2].size(), Some(34));
        assert_eq!(chunks[2].end, 99);
    }

    #[test]
    fn test_no_range_support_yields_single_chunk() {
        let planner = ChunkPlanner::new(1);
        for parallelism in [1, 2, 8, 32] {
            let chunks = planner.plan(Some(1000), false, 300, parallelism, 300);
            assert_eq!(ranges(&chunks), vec![(300, 999)]);
        }
    }

    #[test]
    fn test_unknown_length_yields_unbounded_chunk() {
        let planner = ChunkPlanner::new(1);
        for total in [None, Some(0)] {
            let chunks = planner.plan(total, true, 500, 4, 500);
            assert_eq!(chunks.len(), 1);
            assert_eq!(chunks[0].current_offset, 0);
            assert!(chunks[0].is_unbounded());
            assert_eq!(chunks[0].range_header(), "bytes=0-");
        }
    }

    #[test]
    fn test_resume_covers_only_missing_tail() {
        let planner = ChunkPlanner::new(1);
        let chunks = planner.plan(Some(1000), true, 400, 3, 400);

        assert_eq!(chunks.first().map(|c| c.start), Some(400));
        assert_eq!(chunks.last().map(|c| c.end), Some(999));
        let planned: u64 = chunks.iter().filter_map(|c| c.remaining()).sum();
        assert_eq!(planned, 600);
    }

    #[test]
    fn test_existing_bytes_inside_a_chunk_advance_its_cursor() {
        let planner = ChunkPlanner::new(1);
        // The file reaches further than the caller-declared resume point.
        let chunks = planner.plan(Some(1000), true, 0, 4, 600);

        assert_eq!(ranges(&chunks), vec![(600, 749), (750, 999)]);
        assert_eq!(chunks[0].start, 500);
        assert_eq!(chunks[0].downloaded(), 100);
    }

    #[test]
    fn test_complete_file_needs_no_chunks() {
        let planner = ChunkPlanner::new(1);
        assert!(planner.plan(Some(1000), true, 1000, 4, 1000).is_empty());
    }

    #[test]
    fn test_small_files_collapse_parallelism() {
        let planner = ChunkPlanner::new(256);
        assert_eq!(planner.plan(Some(1000), true, 0, 8, 0).len(), 3);
        assert_eq!(planner.plan(Some(100), true, 0, 8, 0).len(), 1);

        // Never a zero-length chunk, even with no minimum.
        let planner = ChunkPlanner::new(1);
        let chunks = planner.plan(Some(3), true, 0, 8, 0);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.size() == Some(1)));
    }

    #[test]
    fn test_chunk_state_helpers() {
        let mut chunk = Chunk::new(1, 10, 19);
        assert_eq!(chunk.range_header(), "bytes=10-19");
        assert_eq!(chunk.remaining(), Some(10));
        assert!(!chunk.is_complete());

        chunk.current_offset = 15;
        assert_eq!(chunk.range_header(), "bytes=15-19");
        assert_eq!(chunk.downloaded(), 5);

        chunk.current_offset = 20;
        assert!(chunk.is_complete());
        assert_eq!(chunk.remaining(), Some(0));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn chunks_partition_the_file(total in 1u64..5_000_000, parallelism in 1usize..33, min in 1u64..100_000) {
                let chunks = ChunkPlanner::new(min).plan(Some(total), true, 0, parallelism, 0);

                prop_assert!(!chunks.is_empty());
                prop_assert_eq!(chunks[0].start, 0);
                prop_assert_eq!(chunks[chunks.len() - 1].end, total - 1);
                for pair in chunks.windows(2) {
                    prop_assert_eq!(pair[1].start, pair[0].end + 1);
                }
                for chunk in &chunks {
                    prop_assert!(chunk.end >= chunk.start);
                }
                let covered: u64 = chunks.iter().filter_map(|c| c.size()).sum();
                prop_assert_eq!(covered, total);
            }

            #[test]
            fn resume_never_refetches_existing_bytes(total in 1u64..1_000_000, existing in 0u64..1_000_000, parallelism in 1usize..17) {
                let existing = existing.min(total);
                let chunks = ChunkPlanner::new(1).plan(Some(total), true, existing, parallelism, existing);

                let missing: u64 = chunks.iter().filter_map(|c| c.remaining()).sum();
                prop_assert_eq!(missing, total - existing);
                for chunk in &chunks {
                    prop_assert!(chunk.current_offset >= existing);
                }
            }
        }
    }
}
