//! Cluster message dispatcher
//!
//! The only code that receives from the cluster. Each poll probes for one
//! pending message and handles it by tag: work requests are answered from
//! the shard work queues, hit batches go to the aggregation thread through
//! the ready pool, pipeline statistics are merged here.

use crate::cluster::{ClusterTransport, ControlMessage, MessageTag, WorkerId};
use crate::codec;
use crate::error::{ProtocolError, Result};
use crate::hits::TopHits;
use crate::pool::{MessagePool, ResultBuffer};
use crate::stats::PipelineStats;
use crate::work_queue::{ChunkReply, WorkQueueSet, WorkQueueStats};
use std::ops::Range;
use std::sync::Arc;
use tracing::{debug, trace};

/// What one poll did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// No message pending
    Idle,
    /// Answered a work request
    WorkServed { worker: WorkerId, reply: ChunkReply },
    /// Merged a worker's pipeline statistics
    Stats { worker: WorkerId },
    /// Handed a hit batch to the aggregation thread
    Hits { worker: WorkerId, is_final: bool, count: usize },
}

/// Receives and routes worker messages
pub struct Dispatcher<T: ClusterTransport> {
    transport: T,
    work_queues: WorkQueueSet,
    pool: Arc<MessagePool>,

    /// Buffer acquired for the next hit message; kept across polls
    held: Option<ResultBuffer>,

    /// Scratch space for small messages
    scratch: Vec<u8>,

    pipeline: PipelineStats,
    stats_received: usize,
}

impl<T: ClusterTransport> Dispatcher<T> {
    pub fn new(transport: T, num_shards: usize, pool: Arc<MessagePool>) -> Self {
        Self {
            transport,
            work_queues: WorkQueueSet::new(num_shards),
            pool,
            held: None,
            scratch: Vec::new(),
            pipeline: PipelineStats::default(),
            stats_received: 0,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.transport.worker_count()
    }

    /// Seed the work queues and clear per-search state
    pub fn begin_search(&mut self, range: Range<u64>, chunk_size: u64) {
        self.work_queues.reset(range, chunk_size);
        self.pipeline = PipelineStats::default();
        self.stats_received = 0;
    }

    /// Send a control message to every worker
    pub fn broadcast(&mut self, message: &ControlMessage) -> Result<()> {
        let payload = codec::encode(message)?;
        self.transport.broadcast(&payload)
    }

    /// Handle at most one pending message
    pub fn poll(&mut self) -> Result<PollOutcome> {
        if self.held.is_none() {
            self.held = Some(self.pool.acquire());
        }

        let Some(header) = self.transport.probe()? else {
            return Ok(PollOutcome::Idle);
        };
        let source = header.source;

        match header.tag {
            MessageTag::WorkRequest => {
                self.transport.receive(&header, &mut self.scratch)?;
                let shard: u32 = codec::decode(&self.scratch).map_err(|e| malformed("work request", source, e))?;

                let reply = self.work_queues.next_chunk(shard, source)?;
                let payload = codec::encode(&reply)?;
                self.transport.send(source, MessageTag::WorkReply, &payload)?;

                trace!(worker = source, shard, start = reply.start, end = reply.end, "Served work request");
                Ok(PollOutcome::WorkServed { worker: source, reply })
            }

            MessageTag::PipelineStats => {
                self.transport.receive(&header, &mut self.scratch)?;
                let stats: PipelineStats =
                    codec::decode(&self.scratch).map_err(|e| malformed("pipeline statistics", source, e))?;

                self.pipeline.merge(&stats);
                self.stats_received += 1;
                debug!(worker = source, received = self.stats_received, "Merged pipeline statistics");
                Ok(PollOutcome::Stats { worker: source })
            }

            MessageTag::Hits | MessageTag::FinalHits => {
                let is_final = header.tag == MessageTag::FinalHits;
                let mut buffer = self.held.take().unwrap_or_else(|| self.pool.acquire());

                self.transport.receive(&header, buffer.bytes_mut())?;
                let hits: TopHits = match codec::decode(buffer.bytes()) {
                    Ok(hits) => hits,
                    Err(e) => {
                        self.pool.recycle(buffer);
                        return Err(malformed("hit batch", source, e).into());
                    }
                };

                let count = hits.len();
                buffer.set_batch(hits, source, is_final);
                self.pool.submit(buffer);

                trace!(worker = source, count, is_final, "Queued hit batch");
                Ok(PollOutcome::Hits {
                    worker: source,
                    is_final,
                    count,
                })
            }

            tag => Err(ProtocolError::UnexpectedTag {
                tag: tag.as_u32(),
                source_id: source,
            }
            .into()),
        }
    }

    /// Workers whose statistics have arrived this search
    pub fn stats_received(&self) -> usize {
        self.stats_received
    }

    /// Merged statistics of the current search
    pub fn pipeline(&self) -> &PipelineStats {
        &self.pipeline
    }

    pub fn work_stats(&self) -> WorkQueueStats {
        self.work_queues.stats()
    }

    /// Objects of the current search not yet handed to a worker
    pub fn work_remaining(&self) -> u64 {
        self.work_queues.remaining()
    }

    /// Drop leftover work so late requests get the sentinel
    pub fn end_search(&mut self) {
        if !self.work_queues.is_exhausted() {
            debug!(remaining = self.work_queues.remaining(), "Dropping unserved work");
        }
        self.work_queues.clear();
    }
}

fn malformed(what: &'static str, source_id: WorkerId, err: impl std::fmt::Display) -> ProtocolError {
    ProtocolError::Malformed {
        what,
        source_id,
        reason: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::LocalCluster;
    use crate::error::MasterError;
    use crate::hits::Hit;

    fn setup(workers: usize, shards: usize) -> (Dispatcher<LocalCluster>, Vec<crate::cluster::WorkerLink>, Arc<MessagePool>) {
        let (cluster, links) = LocalCluster::new(workers);
        let pool = Arc::new(MessagePool::new(2));
        (Dispatcher::new(cluster, shards, Arc::clone(&pool)), links, pool)
    }

    fn hit(name: &str) -> Hit {
        Hit {
            name: name.into(),
            acc: None,
            desc: None,
            target_index: 0,
            sortkey: 2.0,
            score: 2.0,
            bias: 0.0,
            ln_p: -2.0,
            ndom: 1,
            reported: false,
            included: false,
        }
    }

    #[test]
    fn test_idle_poll_keeps_buffer() {
        let (mut dispatcher, _links, pool) = setup(1, 1);
        assert_eq!(dispatcher.poll().unwrap(), PollOutcome::Idle);
        assert_eq!(dispatcher.poll().unwrap(), PollOutcome::Idle);
        // One buffer taken and held, not one per poll
        assert_eq!(pool.free_len(), 1);
    }

    #[test]
    fn test_work_request_served() {
        let (mut dispatcher, links, _pool) = setup(1, 1);
        dispatcher.begin_search(0..10, 4);

        links[0]
            .send_raw(MessageTag::WorkRequest, codec::encode(&0u32).unwrap())
            .unwrap();
        let outcome = dispatcher.poll().unwrap();
        assert_eq!(
            outcome,
            PollOutcome::WorkServed {
                worker: 0,
                reply: ChunkReply { start: 0, end: 4 }
            }
        );

        let (tag, payload) = links[0].recv().unwrap();
        assert_eq!(tag, MessageTag::WorkReply);
        assert_eq!(codec::decode::<ChunkReply>(&payload).unwrap(), ChunkReply { start: 0, end: 4 });
    }

    #[test]
    fn test_hits_go_to_ready_pool() {
        let (mut dispatcher, links, pool) = setup(2, 1);
        links[1]
            .send_hits(&TopHits::from_hits(vec![hit("a"), hit("b")]), true)
            .unwrap();

        let outcome = dispatcher.poll().unwrap();
        assert_eq!(
            outcome,
            PollOutcome::Hits {
                worker: 1,
                is_final: true,
                count: 2
            }
        );

        let buffer = pool.take_ready().unwrap();
        assert!(buffer.is_final());
        assert_eq!(buffer.source(), 1);
        assert_eq!(buffer.hits().len(), 2);
    }

    #[test]
    fn test_stats_merged() {
        let (mut dispatcher, links, _pool) = setup(2, 1);
        dispatcher.begin_search(0..1, 1);
        for link in &links {
            link.send_stats(&PipelineStats {
                nseqs: 5,
                nres: 100,
                ..Default::default()
            })
            .unwrap();
        }

        dispatcher.poll().unwrap();
        dispatcher.poll().unwrap();
        assert_eq!(dispatcher.stats_received(), 2);
        assert_eq!(dispatcher.pipeline().nseqs, 10);
        assert_eq!(dispatcher.pipeline().nres, 200);
    }

    #[test]
    fn test_unknown_tag_is_fatal() {
        let (mut dispatcher, links, _pool) = setup(1, 1);
        links[0].send_raw(MessageTag::Unknown(99), Vec::new()).unwrap();
        assert!(matches!(
            dispatcher.poll(),
            Err(MasterError::Protocol(ProtocolError::UnexpectedTag { tag: 99, source_id: 0 }))
        ));
    }

    #[test]
    fn test_out_of_range_shard_is_fatal() {
        let (mut dispatcher, links, _pool) = setup(1, 2);
        dispatcher.begin_search(0..10, 5);
        links[0]
            .send_raw(MessageTag::WorkRequest, codec::encode(&7u32).unwrap())
            .unwrap();
        assert!(matches!(
            dispatcher.poll(),
            Err(MasterError::Protocol(ProtocolError::ShardOutOfRange { shard: 7, .. }))
        ));
    }
}
