//! Message buffer pools
//!
//! Hit messages are received by the dispatcher and merged by the aggregation
//! thread. Buffers travel between the two through a pair of pools:
//!
//! ```text
//!             acquire()                      submit()
//!   ┌──────┐ ──────────▶  Dispatcher  ────────────────▶ ┌───────┐
//!   │ free │                                            │ ready │ (FIFO)
//!   └──────┘ ◀──────────  Aggregator  ◀──────────────── └───────┘
//!             recycle()                    take_ready()
//! ```
//!
//! A buffer is owned by exactly one side at a time; ownership moves by
//! value through these calls. Both pools are behind short-lived mutexes
//! whose critical sections are a single push or pop.

use crate::hits::TopHits;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

/// Buffers created up front; more are allocated on demand
pub const DEFAULT_POOL_SIZE: usize = 10;

/// Initial receive capacity of a new buffer
const INITIAL_BUFFER_CAPACITY: usize = 1024;

/// A reusable receive buffer with its decoded hit batch
#[derive(Debug)]
pub struct ResultBuffer {
    /// Raw message bytes
    bytes: Vec<u8>,

    /// Hits decoded from `bytes`
    hits: TopHits,

    /// Last batch from its worker for this search
    is_final: bool,

    /// Worker that sent the batch
    source: usize,
}

impl ResultBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self {
            bytes: Vec::with_capacity(INITIAL_BUFFER_CAPACITY),
            hits: TopHits::new(),
            is_final: false,
            source: 0,
        }
    }

    /// Receive area; cleared before each use
    pub fn bytes_mut(&mut self) -> &mut Vec<u8> {
        &mut self.bytes
    }

    /// Raw message bytes
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Attach a decoded batch, refilling the pooled hit list in place
    pub fn set_batch(&mut self, mut hits: TopHits, source: usize, is_final: bool) {
        self.hits.clear();
        self.hits.merge(&mut hits);
        self.source = source;
        self.is_final = is_final;
    }

    /// Decoded hits
    pub fn hits_mut(&mut self) -> &mut TopHits {
        &mut self.hits
    }

    pub fn hits(&self) -> &TopHits {
        &self.hits
    }

    pub fn is_final(&self) -> bool {
        self.is_final
    }

    pub fn source(&self) -> usize {
        self.source
    }

    /// Forget the previous message, keeping allocations
    fn reset(&mut self) {
        self.bytes.clear();
        self.hits.clear();
        self.is_final = false;
        self.source = 0;
    }
}

impl Default for ResultBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Pool counters
#[derive(Debug, Default)]
pub struct PoolStats {
    /// Buffers allocated because the free pool was empty
    pub allocated: AtomicU64,

    /// Buffers handed to the aggregation thread
    pub submitted: AtomicU64,

    /// Buffers returned to the free pool
    pub recycled: AtomicU64,
}

impl PoolStats {
    pub fn allocated(&self) -> u64 {
        self.allocated.load(Ordering::Relaxed)
    }

    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }

    pub fn recycled(&self) -> u64 {
        self.recycled.load(Ordering::Relaxed)
    }
}

/// The free and ready pools
#[derive(Debug)]
pub struct MessagePool {
    free: Mutex<Vec<ResultBuffer>>,
    ready: Mutex<VecDeque<ResultBuffer>>,
    stats: PoolStats,
}

impl MessagePool {
    /// Create a pool with `initial` free buffers
    pub fn new(initial: usize) -> Self {
        Self {
            free: Mutex::new((0..initial).map(|_| ResultBuffer::new()).collect()),
            ready: Mutex::new(VecDeque::new()),
            stats: PoolStats::default(),
        }
    }

    /// Take a free buffer, allocating one if the free pool is empty
    pub fn acquire(&self) -> ResultBuffer {
        let recycled = self.free.lock().pop();
        recycled.unwrap_or_else(|| {
            self.stats.allocated.fetch_add(1, Ordering::Relaxed);
            ResultBuffer::new()
        })
    }

    /// Hand a filled buffer to the aggregation thread
    pub fn submit(&self, buffer: ResultBuffer) {
        self.ready.lock().push_back(buffer);
        self.stats.submitted.fetch_add(1, Ordering::Relaxed);
    }

    /// Oldest filled buffer, if any
    pub fn take_ready(&self) -> Option<ResultBuffer> {
        self.ready.lock().pop_front()
    }

    /// Return a processed buffer to the free pool
    pub fn recycle(&self, mut buffer: ResultBuffer) {
        buffer.reset();
        self.free.lock().push(buffer);
        self.stats.recycled.fetch_add(1, Ordering::Relaxed);
    }

    /// Buffers waiting for the aggregation thread
    pub fn ready_len(&self) -> usize {
        self.ready.lock().len()
    }

    /// Buffers available for receiving
    pub fn free_len(&self) -> usize {
        self.free.lock().len()
    }

    pub fn stats(&self) -> &PoolStats {
        &self.stats
    }
}

impl Default for MessagePool {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_SIZE)
    }
}
