//! Cluster messaging
//!
//! The coordinator talks to worker nodes through a `ClusterTransport`: a
//! tagged, point-to-point byte message layer with a non-blocking probe.
//! Payloads are bincode-encoded records from `codec`.
//!
//! Messages from workers:
//!
//! | tag            | payload                     |
//! |----------------|-----------------------------|
//! | `WorkRequest`  | shard id (`u32`)            |
//! | `Hits`         | `TopHits` batch             |
//! | `FinalHits`    | last `TopHits` batch        |
//! | `PipelineStats`| `PipelineStats`             |
//!
//! Messages to workers are `WorkReply` (a `ChunkReply`) and `Control`
//! broadcasts (a `ControlMessage`).

pub mod local;
pub mod worker;

use crate::client::query::Query;
use crate::error::Result;
use crate::stats::PipelineMode;
use serde::{Deserialize, Serialize};

pub use local::{LocalCluster, WorkerLink};
pub use worker::{ChunkSearcher, KmerSearcher, WorkerNode};

/// Worker rank within the cluster
pub type WorkerId = usize;

/// Message type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageTag {
    WorkRequest,
    PipelineStats,
    Hits,
    FinalHits,
    WorkReply,
    Control,
    /// Any value this build does not know
    Unknown(u32),
}

impl MessageTag {
    pub fn as_u32(self) -> u32 {
        match self {
            MessageTag::WorkRequest => 1,
            MessageTag::PipelineStats => 2,
            MessageTag::Hits => 3,
            MessageTag::FinalHits => 4,
            MessageTag::WorkReply => 5,
            MessageTag::Control => 6,
            MessageTag::Unknown(v) => v,
        }
    }

    pub fn from_u32(value: u32) -> Self {
        match value {
            1 => MessageTag::WorkRequest,
            2 => MessageTag::PipelineStats,
            3 => MessageTag::Hits,
            4 => MessageTag::FinalHits,
            5 => MessageTag::WorkReply,
            6 => MessageTag::Control,
            other => MessageTag::Unknown(other),
        }
    }
}

/// Envelope of a pending message, returned by `probe`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub source: WorkerId,
    pub tag: MessageTag,
    /// Payload size in bytes
    pub len: usize,
}

/// Search broadcast to every worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchCommand {
    pub mode: PipelineMode,
    /// Zero-based database index
    pub database: usize,
    pub query: Query,
}

/// Broadcast from the coordinator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ControlMessage {
    Start(SearchCommand),
    Shutdown,
}

/// Coordinator side of the cluster link
pub trait ClusterTransport {
    /// Number of worker nodes
    fn worker_count(&self) -> usize;

    /// Header of the next pending message, without blocking
    fn probe(&mut self) -> Result<Option<MessageHeader>>;

    /// Receive the probed message into `buf`, replacing its contents
    fn receive(&mut self, header: &MessageHeader, buf: &mut Vec<u8>) -> Result<()>;

    /// Send to one worker
    fn send(&mut self, to: WorkerId, tag: MessageTag, payload: &[u8]) -> Result<()>;

    /// Send the same control payload to every worker
    fn broadcast(&mut self, payload: &[u8]) -> Result<()> {
        for worker in 0..self.worker_count() {
            self.send(worker, MessageTag::Control, payload)?;
        }
        Ok(())
    }
}
