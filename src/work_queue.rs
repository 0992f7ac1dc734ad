//! Per-shard work queues
//!
//! Each shard of the target database gets one `WorkDescriptor` holding the
//! range of object indices still to be handed out. Workers ask for work by
//! shard; every request carves one chunk off the front of that shard's
//! range until it is exhausted, after which requests get the empty
//! sentinel and the worker stops asking.
//!
//! Only the dispatcher touches these queues, so there is no locking here.

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Default number of chunks handed out per worker per search
pub const DEFAULT_OVERSUBSCRIPTION: u64 = 128;

/// Reply to a work request: a half-open `[start, end)` range of object
/// indices, or the empty sentinel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkReply {
    pub start: u64,
    pub end: u64,
}

impl ChunkReply {
    /// Sentinel meaning "no work remains"
    pub const EMPTY: ChunkReply = ChunkReply {
        start: u64::MAX,
        end: u64::MAX,
    };

    /// Check for the sentinel
    pub fn is_empty(&self) -> bool {
        *self == Self::EMPTY || self.start >= self.end
    }

    /// Index range of the chunk, `None` for the sentinel
    pub fn range(&self) -> Option<Range<u64>> {
        if self.is_empty() {
            None
        } else {
            Some(self.start..self.end)
        }
    }

    /// Number of objects in the chunk
    pub fn len(&self) -> u64 {
        self.range().map_or(0, |r| r.end - r.start)
    }
}

/// Remaining work for one shard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkDescriptor {
    /// First index not yet handed out; `u64::MAX` once exhausted
    pub start: u64,

    /// One past the last index of the range
    pub end: u64,

    /// Indices handed out per request
    pub chunk_size: u64,
}

impl WorkDescriptor {
    /// A descriptor with no work
    pub fn empty() -> Self {
        Self {
            start: u64::MAX,
            end: 0,
            chunk_size: 0,
        }
    }

    /// A descriptor covering `range`
    pub fn new(range: Range<u64>, chunk_size: u64) -> Self {
        Self {
            start: range.start,
            end: range.end,
            chunk_size: chunk_size.max(1),
        }
    }

    /// True when nothing remains to hand out
    pub fn is_exhausted(&self) -> bool {
        self.start >= self.end
    }

    /// Objects not yet handed out
    pub fn remaining(&self) -> u64 {
        if self.is_exhausted() {
            0
        } else {
            self.end - self.start
        }
    }

    /// Carve the next chunk off the front of the range
    pub fn take_chunk(&mut self) -> ChunkReply {
        if self.is_exhausted() {
            return ChunkReply::EMPTY;
        }

        let start = self.start;
        let end = start.saturating_add(self.chunk_size).min(self.end);

        if end >= self.end {
            // Last chunk: mark the queue empty
            self.start = u64::MAX;
        } else {
            self.start = end;
        }

        ChunkReply { start, end }
    }
}

/// Chunk size giving roughly `workers * oversubscription` chunks over a
/// range of `range_len` objects, rounded up so no sliver is left over
pub fn chunk_size_for(range_len: u64, workers: usize, oversubscription: u64) -> u64 {
    let divisor = (workers as u64).saturating_mul(oversubscription).max(1);
    range_len / divisor + 1
}

/// Counters for one search
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkQueueStats {
    /// Non-empty chunks handed out
    pub chunks_served: u64,

    /// Requests answered with the empty sentinel
    pub empty_replies: u64,
}

/// One work queue per shard
#[derive(Debug)]
pub struct WorkQueueSet {
    queues: Vec<WorkDescriptor>,
    stats: WorkQueueStats,
}

impl WorkQueueSet {
    /// Create `num_shards` empty queues
    pub fn new(num_shards: usize) -> Self {
        Self {
            queues: vec![WorkDescriptor::empty(); num_shards],
            stats: WorkQueueStats::default(),
        }
    }

    /// Seed every shard's queue for a new search
    pub fn reset(&mut self, range: Range<u64>, chunk_size: u64) {
        for queue in &mut self.queues {
            *queue = WorkDescriptor::new(range.clone(), chunk_size);
        }
        self.stats = WorkQueueStats::default();
    }

    /// Mark every queue empty
    pub fn clear(&mut self) {
        for queue in &mut self.queues {
            *queue = WorkDescriptor::empty();
        }
    }

    /// Serve one work request for `shard` from worker `source_id`
    pub fn next_chunk(&mut self, shard: u32, source_id: usize) -> ProtocolResult<ChunkReply> {
        let num_shards = self.queues.len();
        let queue = self
            .queues
            .get_mut(shard as usize)
            .ok_or(ProtocolError::ShardOutOfRange {
                shard,
                source_id,
                num_shards,
            })?;

        let reply = queue.take_chunk();
        if reply.is_empty() {
            self.stats.empty_replies += 1;
        } else {
            self.stats.chunks_served += 1;
        }
        Ok(reply)
    }

    /// Objects not yet handed out, over all shards
    pub fn remaining(&self) -> u64 {
        self.queues.iter().map(WorkDescriptor::remaining).sum()
    }

    /// True when every shard is exhausted
    pub fn is_exhausted(&self) -> bool {
        self.queues.iter().all(WorkDescriptor::is_exhausted)
    }

    /// Counters since the last reset
    pub fn stats(&self) -> WorkQueueStats {
        self.stats
    }
}
