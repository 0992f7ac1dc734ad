//! shard-master - Coordinator for a sharded search cluster
//!
//! Accepts search requests from many clients over TCP, runs them one at a
//! time across a cluster of worker nodes, and streams ranked hits back to
//! the client that asked.
//!
//! # Features
//!
//! - **Dynamic load balancing**: each shard's object range is handed out in
//!   small chunks on request, so fast workers simply ask more often.
//!
//! - **Overlapped merging**: hit batches are merged on a dedicated thread
//!   while the dispatcher keeps serving work requests.
//!
//! - **Bounded allocation**: receive buffers cycle between a free pool and
//!   a ready queue instead of being allocated per message.
//!
//! # Architecture
//!
//! ```text
//!   clients ──TCP──▶ session threads ──parse──▶ CommandQueue
//!                                                    │
//!                                                    ▼
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         Master (main thread)                     │
//! │                                                                  │
//! │   ┌──────────────┐   WorkRequest/Reply   ┌───────────────────┐   │
//! │   │  Dispatcher  │◀─────────────────────▶│  WorkQueueSet     │   │
//! │   │  (poll loop) │                       │  (one per shard)  │   │
//! │   └──────┬───────┘                       └───────────────────┘   │
//! │          │ hit batches                                           │
//! │          ▼                                                       │
//! │   ┌──────────────┐  ready (FIFO)  ┌────────────────┐             │
//! │   │ MessagePool  │───────────────▶│ HitAggregator  │             │
//! │   │  free/ready  │◀───────────────│ (own thread)   │             │
//! │   └──────────────┘    recycle     └────────────────┘             │
//! │                                                                  │
//! │   sort ▶ threshold ▶ encode ▶ status │ stats │ hits ──▶ client   │
//! └──────────────────────────────────────────────────────────────────┘
//!                  ▲
//!                  │ ClusterTransport (tagged messages)
//!                  ▼
//!        worker 0   worker 1   ...   worker N-1
//! ```
//!
//! # Example
//!
//! ```bash
//! # Two databases, eight workers over two shards
//! shard-master targets.fa models.hmm -w 8 --shards 2
//!
//! # Client message: options line, payload, terminator
//! printf '@--seqdb 1 -E 0.01\n>q\nMKVLAAGIVG\n//\n' | nc localhost 51371
//! ```

pub mod client;
pub mod cluster;
pub mod codec;
pub mod command_queue;
pub mod config;
pub mod error;
pub mod hits;
pub mod master;
pub mod pool;
pub mod shard;
pub mod stats;
pub mod summary;
pub mod work_queue;

pub use config::{CliArgs, MasterConfig};
pub use error::{MasterError, Result};
pub use master::{Master, MasterContext, MasterSettings, SearchOutcome};
