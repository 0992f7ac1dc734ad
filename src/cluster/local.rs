//! In-process cluster transport
//!
//! Worker nodes run as threads in the coordinator's process and talk to it
//! over crossbeam channels: one shared inbox for the coordinator, one inbox
//! per worker. Message tags and payload encodings are the same as on a real
//! interconnect.

use crate::cluster::{ClusterTransport, ControlMessage, MessageHeader, MessageTag, WorkerId};
use crate::codec;
use crate::error::{MasterError, ProtocolError, Result, WorkerError};
use crate::hits::TopHits;
use crate::stats::PipelineStats;
use crate::work_queue::ChunkReply;
use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};

#[derive(Debug)]
struct Envelope {
    source: WorkerId,
    tag: MessageTag,
    payload: Vec<u8>,
}

/// Coordinator end of an in-process cluster
#[derive(Debug)]
pub struct LocalCluster {
    inbox: Receiver<Envelope>,

    /// Message taken off the channel by `probe`, awaiting `receive`
    pending: Option<Envelope>,

    outboxes: Vec<Sender<(MessageTag, Vec<u8>)>>,
}

impl LocalCluster {
    /// Create a cluster of `workers` nodes; the links go to the worker threads
    pub fn new(workers: usize) -> (Self, Vec<WorkerLink>) {
        let (to_master, inbox) = unbounded();
        let mut outboxes = Vec::with_capacity(workers);
        let mut links = Vec::with_capacity(workers);

        for id in 0..workers {
            let (tx, rx) = unbounded();
            outboxes.push(tx);
            links.push(WorkerLink {
                id,
                to_master: to_master.clone(),
                inbox: rx,
            });
        }

        let cluster = Self {
            inbox,
            pending: None,
            outboxes,
        };
        (cluster, links)
    }
}

impl ClusterTransport for LocalCluster {
    fn worker_count(&self) -> usize {
        self.outboxes.len()
    }

    fn probe(&mut self) -> Result<Option<MessageHeader>> {
        if self.pending.is_none() {
            match self.inbox.try_recv() {
                Ok(envelope) => self.pending = Some(envelope),
                Err(TryRecvError::Empty) => return Ok(None),
                Err(TryRecvError::Disconnected) => return Err(MasterError::ChannelClosed),
            }
        }

        Ok(self.pending.as_ref().map(|e| MessageHeader {
            source: e.source,
            tag: e.tag,
            len: e.payload.len(),
        }))
    }

    fn receive(&mut self, header: &MessageHeader, buf: &mut Vec<u8>) -> Result<()> {
        let envelope = match self.pending.take() {
            Some(e) if e.source == header.source && e.tag == header.tag => e,
            other => {
                self.pending = other;
                return Err(ProtocolError::Malformed {
                    what: "probed",
                    source_id: header.source,
                    reason: "no matching message pending".into(),
                }
                .into());
            }
        };

        buf.clear();
        buf.extend_from_slice(&envelope.payload);
        Ok(())
    }

    fn send(&mut self, to: WorkerId, tag: MessageTag, payload: &[u8]) -> Result<()> {
        let outbox = self
            .outboxes
            .get(to)
            .ok_or(ProtocolError::UnknownWorker(to))?;
        outbox
            .send((tag, payload.to_vec()))
            .map_err(|_| WorkerError::LinkClosed(to))?;
        Ok(())
    }
}

/// Worker end of an in-process cluster
#[derive(Debug)]
pub struct WorkerLink {
    id: WorkerId,
    to_master: Sender<Envelope>,
    inbox: Receiver<(MessageTag, Vec<u8>)>,
}

impl WorkerLink {
    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Send a raw tagged payload to the coordinator
    pub fn send_raw(&self, tag: MessageTag, payload: Vec<u8>) -> Result<()> {
        self.to_master
            .send(Envelope {
                source: self.id,
                tag,
                payload,
            })
            .map_err(|_| WorkerError::LinkClosed(self.id))?;
        Ok(())
    }

    /// Block for the next message from the coordinator
    pub fn recv(&self) -> Result<(MessageTag, Vec<u8>)> {
        self.inbox
            .recv()
            .map_err(|_| WorkerError::LinkClosed(self.id).into())
    }

    /// Block for the next control broadcast
    pub fn recv_control(&self) -> Result<ControlMessage> {
        let (tag, payload) = self.recv()?;
        if tag != MessageTag::Control {
            return Err(ProtocolError::UnexpectedTag {
                tag: tag.as_u32(),
                source_id: self.id,
            }
            .into());
        }
        Ok(codec::decode(&payload)?)
    }

    /// Ask for the next chunk of `shard` and wait for the reply
    pub fn request_chunk(&self, shard: u32) -> Result<ChunkReply> {
        self.send_raw(MessageTag::WorkRequest, codec::encode(&shard)?)?;

        let (tag, payload) = self.recv()?;
        if tag != MessageTag::WorkReply {
            return Err(ProtocolError::UnexpectedTag {
                tag: tag.as_u32(),
                source_id: self.id,
            }
            .into());
        }
        Ok(codec::decode(&payload)?)
    }

    /// Send a batch of hits
    pub fn send_hits(&self, hits: &TopHits, is_final: bool) -> Result<()> {
        let tag = if is_final {
            MessageTag::FinalHits
        } else {
            MessageTag::Hits
        };
        self.send_raw(tag, codec::encode(hits)?)
    }

    /// Send this worker's pipeline statistics for the search
    pub fn send_stats(&self, stats: &PipelineStats) -> Result<()> {
        self.send_raw(MessageTag::PipelineStats, codec::encode(stats)?)
    }
}
