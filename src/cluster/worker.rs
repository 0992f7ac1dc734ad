//! In-process worker node
//!
//! Runs the worker half of the search protocol against a `WorkerLink`:
//! wait for a broadcast, pull chunks of its shard until the sentinel comes
//! back, stream hit batches as chunks complete, then send the final batch
//! and the pipeline statistics. Comparison itself is delegated to a
//! `ChunkSearcher`.

use crate::client::query::Query;
use crate::cluster::local::WorkerLink;
use crate::cluster::{ControlMessage, SearchCommand, WorkerId};
use crate::error::{Result, WorkerError};
use crate::hits::{Hit, TopHits};
use crate::shard::{Database, DbObject};
use crate::stats::{PipelineMode, PipelineStats};
use std::collections::HashSet;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info};

/// Compares a query with one target object
pub trait ChunkSearcher: Send + Sync {
    /// Score `target`, updating the filter counters in `stats`
    fn search_target(&self, query: &Query, target: &DbObject, stats: &mut PipelineStats) -> Option<Hit>;
}

/// Shared k-mer comparison
///
/// Counts distinct query k-mers found in the target. It stands in for a
/// real scoring pipeline and produces deterministic, plausibly ranked hits.
#[derive(Debug, Clone)]
pub struct KmerSearcher {
    k: usize,
    /// Minimum shared k-mers for a hit
    min_shared: usize,
}

impl KmerSearcher {
    pub fn new(k: usize, min_shared: usize) -> Self {
        Self {
            k: k.max(1),
            min_shared: min_shared.max(1),
        }
    }

    fn shared_kmers(&self, query: &[u8], target: &[u8]) -> usize {
        if query.len() < self.k || target.len() < self.k {
            return 0;
        }
        let wanted: HashSet<&[u8]> = query.windows(self.k).collect();
        let found: HashSet<&[u8]> = target.windows(self.k).filter(|w| wanted.contains(w)).collect();
        found.len()
    }
}

impl Default for KmerSearcher {
    fn default() -> Self {
        Self::new(3, 2)
    }
}

impl ChunkSearcher for KmerSearcher {
    fn search_target(&self, query: &Query, target: &DbObject, stats: &mut PipelineStats) -> Option<Hit> {
        let shared = self.shared_kmers(query.residues(), &target.residues);
        if shared == 0 {
            return None;
        }
        stats.n_past_msv += 1;
        if shared < self.min_shared {
            return None;
        }
        stats.n_past_bias += 1;
        stats.n_past_vit += 1;
        stats.n_past_fwd += 1;

        // One bit per shared k-mer; P = 2^-score
        let score = shared as f64;
        Some(Hit {
            name: target.name.clone(),
            acc: target.acc.clone(),
            desc: target.desc.clone(),
            target_index: target.index,
            sortkey: score,
            score: score as f32,
            bias: 0.0,
            ln_p: -score * std::f64::consts::LN_2,
            ndom: 1,
            reported: false,
            included: false,
        })
    }
}

/// A worker thread's state
pub struct WorkerNode {
    link: WorkerLink,
    databases: Arc<Vec<Database>>,
    searcher: Arc<dyn ChunkSearcher>,
    shard: u32,
    num_shards: u32,
}

impl WorkerNode {
    /// Worker `link.id()` serves shard `id % num_shards`
    pub fn new(
        link: WorkerLink,
        databases: Arc<Vec<Database>>,
        searcher: Arc<dyn ChunkSearcher>,
        num_shards: usize,
    ) -> Self {
        let num_shards = num_shards.max(1) as u32;
        let shard = (link.id() as u32) % num_shards;
        Self {
            link,
            databases,
            searcher,
            shard,
            num_shards,
        }
    }

    pub fn id(&self) -> WorkerId {
        self.link.id()
    }

    /// Run on a named thread
    pub fn spawn(self) -> std::result::Result<JoinHandle<Result<()>>, WorkerError> {
        let name = format!("worker-{}", self.id());
        thread::Builder::new()
            .name(name.clone())
            .spawn(move || self.run())
            .map_err(|e| WorkerError::SpawnFailed {
                name,
                reason: e.to_string(),
            })
    }

    /// Serve searches until told to shut down
    pub fn run(self) -> Result<()> {
        debug!(worker = self.id(), shard = self.shard, "Worker started");
        loop {
            match self.link.recv_control()? {
                ControlMessage::Start(command) => self.run_search(&command)?,
                ControlMessage::Shutdown => {
                    debug!(worker = self.id(), "Worker shutting down");
                    return Ok(());
                }
            }
        }
    }

    fn run_search(&self, command: &SearchCommand) -> Result<()> {
        let mut stats = PipelineStats::default();
        let mut chunks = 0u64;
        let mut nhits = 0usize;
        let db = self.databases.get(command.database);

        loop {
            let reply = self.link.request_chunk(self.shard)?;
            let Some(range) = reply.range() else { break };
            chunks += 1;

            let mut batch = TopHits::new();
            if let Some(db) = db {
                for target in db.objects_in(range) {
                    if target.index % u64::from(self.num_shards) != u64::from(self.shard) {
                        continue;
                    }
                    match command.mode {
                        PipelineMode::SearchSeqs => {
                            stats.nseqs += 1;
                            stats.nres += target.length;
                        }
                        PipelineMode::ScanModels => {
                            stats.nmodels += 1;
                            stats.nnodes += target.length;
                        }
                    }
                    if let Some(hit) = self.searcher.search_target(&command.query, target, &mut stats) {
                        batch.push(hit);
                    }
                }
            }

            if !batch.is_empty() {
                nhits += batch.len();
                self.link.send_hits(&batch, false)?;
            }
        }

        self.link.send_hits(&TopHits::new(), true)?;
        self.link.send_stats(&stats)?;

        info!(
            worker = self.id(),
            shard = self.shard,
            chunks,
            hits = nhits,
            "Worker finished search"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::query::Sequence;

    fn object(index: u64, residues: &[u8]) -> DbObject {
        DbObject {
            index,
            name: format!("t{}", index),
            acc: None,
            desc: None,
            residues: residues.to_vec(),
            length: residues.len() as u64,
        }
    }

    fn query(residues: &[u8]) -> Query {
        Query::Sequence(Sequence {
            name: "q".into(),
            desc: None,
            residues: residues.to_vec(),
        })
    }

    #[test]
    fn test_kmer_hit_and_filters() {
        let searcher = KmerSearcher::new(3, 2);
        let mut stats = PipelineStats::default();
        let q = query(b"ACDEFGHIK");

        let hit = searcher
            .search_target(&q, &object(5, b"WWACDEFWW"), &mut stats)
            .unwrap();
        assert_eq!(hit.target_index, 5);
        assert_eq!(hit.score, 3.0);
        assert!(hit.ln_p < 0.0);

        // One shared k-mer passes the first filter only
        assert!(searcher.search_target(&q, &object(6, b"ACDWW"), &mut stats).is_none());
        assert!(searcher.search_target(&q, &object(7, b"WWWWW"), &mut stats).is_none());

        assert_eq!(stats.n_past_msv, 2);
        assert_eq!(stats.n_past_fwd, 1);
    }

    #[test]
    fn test_short_inputs() {
        let searcher = KmerSearcher::default();
        let mut stats = PipelineStats::default();
        assert!(searcher.search_target(&query(b"AC"), &object(0, b"ACDE"), &mut stats).is_none());
        assert_eq!(stats, PipelineStats::default());
    }
}
