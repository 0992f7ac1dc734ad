//! The coordinator
//!
//! ```text
//!  CommandQueue ──pop──▶ Master::run
//!                          │
//!                          ├─ process_search
//!                          │    ├─ seed work queues, wake aggregator
//!                          │    ├─ broadcast Start
//!                          │    ├─ poll dispatcher until every worker has
//!                          │    │  sent its final batch and statistics
//!                          │    └─ sort / threshold / encode / send
//!                          │
//!                          └─ process_shutdown
//!                               └─ broadcast Shutdown, stop aggregator
//! ```
//!
//! One search runs at a time. The main thread is the dispatcher; hit
//! merging runs on the aggregation thread.

pub mod aggregator;
pub mod dispatcher;
pub mod results;

pub use aggregator::HitAggregator;
pub use dispatcher::{Dispatcher, PollOutcome};
pub use results::{send_response, EncodedResponse, ResultParams, SearchResult};

use crate::client::request::{ClientHandle, Command, SearchRequest};
use crate::cluster::{ClusterTransport, ControlMessage, SearchCommand};
use crate::command_queue::CommandQueue;
use crate::config::MasterConfig;
use crate::error::{ClientError, Result};
use crate::pool::{MessagePool, DEFAULT_POOL_SIZE};
use crate::shard::Database;
use crate::stats::PipelineMode;
use crate::summary;
use crate::work_queue::{chunk_size_for, DEFAULT_OVERSUBSCRIPTION};
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Scheduling knobs
#[derive(Debug, Clone)]
pub struct MasterSettings {
    pub num_shards: usize,
    pub oversubscription: u64,
    pub stall_timeout: Duration,
    pub pool_size: usize,
    pub show_summary: bool,
}

impl Default for MasterSettings {
    fn default() -> Self {
        Self {
            num_shards: 1,
            oversubscription: DEFAULT_OVERSUBSCRIPTION,
            stall_timeout: Duration::from_secs(60),
            pool_size: DEFAULT_POOL_SIZE,
            show_summary: false,
        }
    }
}

impl From<&MasterConfig> for MasterSettings {
    fn from(config: &MasterConfig) -> Self {
        Self {
            num_shards: config.num_shards,
            oversubscription: config.oversubscription,
            stall_timeout: config.stall_timeout,
            pool_size: config.pool_size,
            show_summary: config.show_summary,
        }
    }
}

/// Everything the coordinator shares across searches
#[derive(Debug, Clone)]
pub struct MasterContext {
    pub settings: MasterSettings,
    pub databases: Arc<Vec<Database>>,
    pub pool: Arc<MessagePool>,

    /// Stall diagnostics logged since startup
    pub stall_warnings: Arc<AtomicU64>,
}

impl MasterContext {
    pub fn new(settings: MasterSettings, databases: Arc<Vec<Database>>) -> Self {
        let pool = Arc::new(MessagePool::new(settings.pool_size));
        Self {
            settings,
            databases,
            pool,
            stall_warnings: Arc::new(AtomicU64::new(0)),
        }
    }
}

/// Result of one search, for logging and the summary
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub query: String,
    pub mode: PipelineMode,
    pub database: usize,
    pub elapsed: Duration,
    pub targets: u64,
    pub nhits: u64,
    pub nreported: u64,
    pub nincluded: u64,
    pub chunks_served: u64,
    /// Hit batches merged by the aggregation thread
    pub batches_merged: u64,
    /// Stall diagnostics logged while waiting on workers
    pub stalls: u64,
    pub gcups: f64,
    /// `None` when there was no client or the write failed
    pub bytes_sent: Option<usize>,
}

/// The coordinator
pub struct Master<T: ClusterTransport> {
    ctx: MasterContext,
    dispatcher: Dispatcher<T>,
    aggregator: HitAggregator,
}

impl<T: ClusterTransport> Master<T> {
    /// Start the aggregation thread and take over the cluster link
    pub fn new(ctx: MasterContext, transport: T) -> Result<Self> {
        let workers = transport.worker_count();
        let aggregator = HitAggregator::spawn(Arc::clone(&ctx.pool), workers)?;
        let dispatcher = Dispatcher::new(transport, ctx.settings.num_shards, Arc::clone(&ctx.pool));

        Ok(Self {
            ctx,
            dispatcher,
            aggregator,
        })
    }

    /// Serve queued requests until a shutdown request arrives
    pub fn run(&mut self, queue: &CommandQueue) -> Result<()> {
        info!(workers = self.dispatcher.worker_count(), "Coordinator ready");

        while let Some(request) = queue.pop() {
            let waited = Utc::now() - request.received_at;
            debug!(
                kind = ?request.kind(),
                queued_ms = waited.num_milliseconds(),
                pending = queue.len(),
                "Processing request"
            );

            match request.command {
                Command::Search(search) => {
                    let outcome = self.process_search(&search, request.origin.as_ref())?;
                    if self.ctx.settings.show_summary {
                        summary::print_search_summary(&outcome, request.origin.as_ref().map(ClientHandle::addr));
                    }
                }
                Command::Shutdown => {
                    info!(
                        from = request.origin.as_ref().map(ClientHandle::addr).unwrap_or("signal"),
                        "Shutdown requested"
                    );
                    queue.close();
                    return self.process_shutdown();
                }
            }
        }

        // Queue closed without an explicit request
        self.process_shutdown()
    }

    /// Run one search across the cluster and answer the client
    pub fn process_search(
        &mut self,
        search: &SearchRequest,
        origin: Option<&ClientHandle>,
    ) -> Result<SearchOutcome> {
        let db = self
            .ctx
            .databases
            .get(search.database)
            .ok_or(ClientError::UnknownDatabase {
                index: search.database + 1,
                available: self.ctx.databases.len(),
            })?;

        let range = db.index_range();
        let total_length = db.total_length();
        let objects = db.len();

        let workers = self.dispatcher.worker_count();
        let chunk_size = chunk_size_for(range.end - range.start, workers, self.ctx.settings.oversubscription);
        let started = Instant::now();

        info!(
            query = search.query.name(),
            database = search.database + 1,
            objects,
            chunk_size,
            "Starting search"
        );

        let stalls_before = self.ctx.stall_warnings.load(Ordering::Relaxed);
        self.dispatcher.begin_search(range, chunk_size);
        self.aggregator.begin_search();
        self.dispatcher.broadcast(&ControlMessage::Start(SearchCommand {
            mode: search.mode,
            database: search.database,
            query: search.query.clone(),
        }))?;

        self.wait_for_workers(workers)?;
        self.dispatcher.end_search();
        let elapsed = started.elapsed();

        let query_length = search.query.length() as u64;
        let params = ResultParams {
            mode: search.mode,
            query_length,
            thresholds: search.options.thresholds(),
            z: search.options.z,
            dom_z: search.options.dom_z,
            elapsed: elapsed.as_secs_f64(),
        };
        let mut result = SearchResult::build(self.aggregator.take_hits(), self.dispatcher.pipeline(), &params);

        let secs = elapsed.as_secs_f64();
        let ncells = query_length as f64 * total_length as f64;
        let gcups = if secs > 0.0 { ncells / secs / 1e9 } else { 0.0 };
        info!(
            query = search.query.name(),
            elapsed_secs = %format!("{:.3}", secs),
            m = query_length,
            batches = self.aggregator.batches_merged(),
            gcups = %format!("{:.2}", gcups),
            "Search finished"
        );

        let encoded = result.encode()?;
        let bytes_sent = origin.and_then(|client| send_response(client, &encoded));

        Ok(SearchOutcome {
            query: search.query.name().to_string(),
            mode: search.mode,
            database: search.database,
            elapsed,
            targets: self.dispatcher.pipeline().targets(search.mode),
            nhits: result.stats.nhits,
            nreported: result.stats.nreported,
            nincluded: result.stats.nincluded,
            chunks_served: self.dispatcher.work_stats().chunks_served,
            batches_merged: self.aggregator.batches_merged(),
            stalls: self.ctx.stall_warnings.load(Ordering::Relaxed) - stalls_before,
            gcups,
            bytes_sent,
        })
    }

    /// Poll until every worker has sent its final batch and statistics
    fn wait_for_workers(&mut self, workers: usize) -> Result<()> {
        let stall_timeout = self.ctx.settings.stall_timeout;
        let mut last_activity = Instant::now();
        let mut last_done = 0;

        loop {
            let done = self.aggregator.workers_done();
            if done >= workers && self.dispatcher.stats_received() >= workers {
                return Ok(());
            }
            if done != last_done {
                last_done = done;
                last_activity = Instant::now();
            }

            match self.dispatcher.poll()? {
                PollOutcome::Idle => {
                    if last_activity.elapsed() >= stall_timeout {
                        warn!(
                            workers,
                            final_batches = done,
                            stats_received = self.dispatcher.stats_received(),
                            pending_batches = self.ctx.pool.ready_len(),
                            work_remaining = self.dispatcher.work_remaining(),
                            silent_secs = last_activity.elapsed().as_secs(),
                            "Search stalled waiting on workers"
                        );
                        self.ctx.stall_warnings.fetch_add(1, Ordering::Relaxed);
                        last_activity = Instant::now();
                    }
                    thread::yield_now();
                }
                _ => last_activity = Instant::now(),
            }
        }
    }

    /// Tell every worker to exit and stop the aggregation thread
    pub fn process_shutdown(&mut self) -> Result<()> {
        if let Err(e) = self.dispatcher.broadcast(&ControlMessage::Shutdown) {
            warn!(error = %e, "Shutdown broadcast failed");
        }
        self.aggregator.shutdown()?;

        let pool = self.ctx.pool.stats();
        info!(
            buffers_allocated = pool.allocated(),
            buffers_free = self.ctx.pool.free_len(),
            batches = pool.submitted(),
            recycled = pool.recycled(),
            "Coordinator stopped"
        );
        Ok(())
    }
}
