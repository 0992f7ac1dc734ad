//! Hit aggregation thread
//!
//! Merges hit batches from the ready pool into the search's global hit list
//! while the dispatcher keeps polling the cluster. Between searches the
//! thread waits on a condition variable.
//!
//! The thread holds the handshake mutex for the whole time it is merging
//! and only releases it by waiting. So when the main loop takes the mutex
//! to start a search, the thread is known to be parked. A generation
//! counter tells a real start signal from a spurious wakeup.

use crate::error::WorkerError;
use crate::hits::TopHits;
use crate::pool::MessagePool;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, trace};

const THREAD_NAME: &str = "hit-aggregator";

#[derive(Debug, Default)]
struct Handshake {
    /// Thread reached its wait loop
    ready: bool,
    shutdown: bool,
    /// Bumped once per search start
    generation: u64,
}

#[derive(Debug)]
struct Shared {
    control: Mutex<Handshake>,
    start: Condvar,
    started: Condvar,

    /// Checked while merging so shutdown does not wait for a search
    stop: AtomicBool,

    pool: Arc<MessagePool>,
    worker_count: usize,

    hits: Mutex<TopHits>,
    workers_done: AtomicUsize,
    batches_merged: AtomicU64,
}

/// Handle to the aggregation thread
#[derive(Debug)]
pub struct HitAggregator {
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl HitAggregator {
    /// Start the thread and wait until it is parked
    pub fn spawn(pool: Arc<MessagePool>, worker_count: usize) -> Result<Self, WorkerError> {
        let shared = Arc::new(Shared {
            control: Mutex::new(Handshake::default()),
            start: Condvar::new(),
            started: Condvar::new(),
            stop: AtomicBool::new(false),
            pool,
            worker_count,
            hits: Mutex::new(TopHits::new()),
            workers_done: AtomicUsize::new(0),
            batches_merged: AtomicU64::new(0),
        });

        let thread_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(THREAD_NAME.into())
            .spawn(move || aggregate_loop(&thread_shared))
            .map_err(|e| WorkerError::SpawnFailed {
                name: THREAD_NAME.into(),
                reason: e.to_string(),
            })?;

        {
            let mut guard = shared.control.lock();
            while !guard.ready {
                shared.started.wait(&mut guard);
            }
        }
        debug!("Aggregation thread ready");

        Ok(Self {
            shared,
            handle: Some(handle),
        })
    }

    /// Reset per-search state and release the thread to merge
    ///
    /// Blocks until the thread has finished any previous search.
    pub fn begin_search(&self) {
        let mut guard = self.shared.control.lock();
        self.shared.workers_done.store(0, Ordering::Release);
        self.shared.batches_merged.store(0, Ordering::Relaxed);
        self.shared.hits.lock().clear();
        guard.generation += 1;
        self.shared.start.notify_one();
    }

    /// Workers whose final batch has been merged
    pub fn workers_done(&self) -> usize {
        self.shared.workers_done.load(Ordering::Acquire)
    }

    /// Batches merged in the current search
    pub fn batches_merged(&self) -> u64 {
        self.shared.batches_merged.load(Ordering::Relaxed)
    }

    /// Take the merged hits, leaving an empty list behind
    pub fn take_hits(&self) -> TopHits {
        std::mem::take(&mut *self.shared.hits.lock())
    }

    /// Stop the thread and wait for it; later calls do nothing
    pub fn shutdown(&mut self) -> Result<(), WorkerError> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };

        self.shared.stop.store(true, Ordering::Release);
        {
            let mut guard = self.shared.control.lock();
            guard.shutdown = true;
            self.shared.start.notify_one();
        }

        handle.join().map_err(|e| WorkerError::Panicked {
            name: THREAD_NAME.into(),
            message: panic_message(&*e),
        })?;
        debug!("Aggregation thread stopped");
        Ok(())
    }
}

impl Drop for HitAggregator {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

fn aggregate_loop(shared: &Shared) {
    let mut guard = shared.control.lock();
    guard.ready = true;
    shared.started.notify_all();
    let mut seen = guard.generation;

    loop {
        while !guard.shutdown && guard.generation == seen {
            shared.start.wait(&mut guard);
        }
        if guard.shutdown {
            return;
        }
        seen = guard.generation;

        merge_until_done(shared);
    }
}

/// Merge ready batches until every worker's final batch is in
fn merge_until_done(shared: &Shared) {
    while shared.workers_done.load(Ordering::Acquire) < shared.worker_count {
        if shared.stop.load(Ordering::Acquire) {
            return;
        }

        let Some(mut buffer) = shared.pool.take_ready() else {
            thread::yield_now();
            continue;
        };

        shared.hits.lock().merge(buffer.hits_mut());
        shared.batches_merged.fetch_add(1, Ordering::Relaxed);
        if buffer.is_final() {
            let done = shared.workers_done.fetch_add(1, Ordering::AcqRel) + 1;
            trace!(worker = buffer.source(), done, "Final batch merged");
        }
        shared.pool.recycle(buffer);
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".into()
    }
}
