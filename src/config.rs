//! Configuration types for shard-master
//!
//! This module defines:
//! - CLI argument parsing using clap derive macros
//! - Runtime configuration with validation

use crate::error::ConfigError;
use crate::pool::DEFAULT_POOL_SIZE;
use crate::work_queue::DEFAULT_OVERSUBSCRIPTION;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Maximum reasonable worker count
const MAX_WORKERS: usize = 512;

/// Default client port
pub const DEFAULT_CLIENT_PORT: u16 = 51371;

/// Coordinator for a sharded sequence/profile search cluster
#[derive(Parser, Debug, Clone)]
#[command(
    name = "shard-master",
    version,
    about = "Coordinator for a sharded sequence/profile search cluster",
    long_about = "Loads one or more target databases, accepts search requests from clients \
                  over TCP and farms each search out to worker nodes in small chunks.\n\n\
                  Databases are numbered from 1 in command-line order; clients pick one \
                  with --seqdb N (sequence database) or --hmmdb N (model database).",
    after_help = "EXAMPLES:\n    \
        shard-master uniprot.fa\n    \
        shard-master uniprot.fa pfam.hmm -w 16 --shards 4\n    \
        shard-master pfam.hmm --cport 9000 --oversubscription 64 -v"
)]
pub struct CliArgs {
    /// Database files to load (FASTA sequences or HMMER3 models)
    #[arg(value_name = "DB", required = true)]
    pub databases: Vec<PathBuf>,

    /// Port for client connections
    #[arg(long, default_value_t = DEFAULT_CLIENT_PORT, value_name = "PORT")]
    pub cport: u16,

    /// Address to bind the client port on
    #[arg(long, default_value = "0.0.0.0", value_name = "ADDR")]
    pub bind: String,

    /// Number of worker nodes
    #[arg(
        short = 'w',
        long,
        default_value_t = default_workers(),
        value_name = "NUM"
    )]
    pub workers: usize,

    /// Number of database shards; worker N serves shard N % shards
    #[arg(long, default_value_t = 1, value_name = "NUM")]
    pub shards: usize,

    /// Chunks handed out per worker per search
    #[arg(long, default_value_t = DEFAULT_OVERSUBSCRIPTION, value_name = "NUM")]
    pub oversubscription: u64,

    /// Seconds without cluster traffic before a search is reported as stalled
    #[arg(long, default_value = "60", value_name = "SECS")]
    pub stall_timeout: u64,

    /// Result buffers to preallocate
    #[arg(long, default_value_t = DEFAULT_POOL_SIZE, value_name = "NUM")]
    pub pool_size: usize,

    /// K-mer length used by the worker nodes
    #[arg(long, default_value = "3", value_name = "K")]
    pub kmer: usize,

    /// Quiet mode - suppress per-search summaries
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Verbose output (debug logging)
    #[arg(short = 'v', long)]
    pub verbose: bool,
}

fn default_workers() -> usize {
    num_cpus::get()
}

/// Validated runtime configuration
#[derive(Debug, Clone)]
pub struct MasterConfig {
    /// Database files in load order
    pub databases: Vec<PathBuf>,

    /// Client bind address and port
    pub bind: String,
    pub client_port: u16,

    /// Number of worker nodes
    pub worker_count: usize,

    /// Number of shards
    pub num_shards: usize,

    /// Chunks per worker per search
    pub oversubscription: u64,

    /// Silence before a stall warning
    pub stall_timeout: Duration,

    /// Preallocated result buffers
    pub pool_size: usize,

    /// Worker k-mer length
    pub kmer: usize,

    /// Show per-search summaries
    pub show_summary: bool,

    /// Verbose logging
    pub verbose: bool,
}

impl MasterConfig {
    /// Create and validate configuration from CLI arguments
    pub fn from_args(args: CliArgs) -> Result<Self, ConfigError> {
        if args.databases.is_empty() {
            return Err(ConfigError::NoDatabases);
        }
        if let Some(missing) = args.databases.iter().find(|p| !p.exists()) {
            return Err(ConfigError::MissingDatabase(missing.clone()));
        }

        if args.workers == 0 || args.workers > MAX_WORKERS {
            return Err(ConfigError::InvalidWorkerCount {
                count: args.workers,
                max: MAX_WORKERS,
            });
        }

        // Every shard needs at least one worker
        if args.shards == 0 || args.shards > args.workers {
            return Err(ConfigError::InvalidShardCount {
                count: args.shards,
                max: args.workers,
            });
        }

        if args.oversubscription == 0 {
            return Err(ConfigError::InvalidOversubscription(args.oversubscription));
        }

        Ok(Self {
            databases: args.databases,
            bind: args.bind,
            client_port: args.cport,
            worker_count: args.workers,
            num_shards: args.shards,
            oversubscription: args.oversubscription,
            stall_timeout: Duration::from_secs(args.stall_timeout.max(1)),
            pool_size: args.pool_size,
            kmer: args.kmer.max(1),
            show_summary: !args.quiet,
            verbose: args.verbose,
        })
    }

    /// `addr:port` for the client listener
    pub fn client_addr(&self) -> String {
        format!("{}:{}", self.bind, self.client_port)
    }
}
