//! Pipeline and search statistics
//!
//! `PipelineStats` is what each worker reports at the end of a search; the
//! dispatcher merges them additively. `SearchStats` and `SearchStatus` are
//! the two header records of a client response.

use serde::{Deserialize, Serialize};

/// Status codes carried in a `SearchStatus` header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u32)]
pub enum StatusCode {
    Ok = 0,
    Format = 7,
    Invalid = 11,
}

impl StatusCode {
    /// Numeric wire value
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// Map a wire value back to a status code
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(StatusCode::Ok),
            7 => Some(StatusCode::Format),
            11 => Some(StatusCode::Invalid),
            _ => None,
        }
    }
}

/// Which side of the comparison the database sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineMode {
    /// One query model against a sequence database
    SearchSeqs,
    /// One query sequence against a model database
    ScanModels,
}

/// How an effective database size was determined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ZSetBy {
    /// Counted from the targets actually searched
    #[default]
    NTargets,
    /// Fixed by a client option
    Option,
    /// Derived from the number of significant targets
    NSignificant,
}

/// Per-worker pipeline accounting, merged additively by the coordinator
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineStats {
    pub nmodels: u64,
    pub nnodes: u64,
    pub nseqs: u64,
    pub nres: u64,
    pub n_past_msv: u64,
    pub n_past_bias: u64,
    pub n_past_vit: u64,
    pub n_past_fwd: u64,
}

impl PipelineStats {
    /// Add another worker's counts into this one
    pub fn merge(&mut self, other: &PipelineStats) {
        self.nmodels += other.nmodels;
        self.nnodes += other.nnodes;
        self.nseqs += other.nseqs;
        self.nres += other.nres;
        self.n_past_msv += other.n_past_msv;
        self.n_past_bias += other.n_past_bias;
        self.n_past_vit += other.n_past_vit;
        self.n_past_fwd += other.n_past_fwd;
    }

    /// Number of targets compared, given the pipeline mode
    pub fn targets(&self, mode: PipelineMode) -> u64 {
        match mode {
            PipelineMode::SearchSeqs => self.nseqs,
            PipelineMode::ScanModels => self.nmodels,
        }
    }
}

/// Statistics block of a client response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchStats {
    /// Wall-clock seconds spent on the search
    pub elapsed: f64,

    pub z: f64,
    pub dom_z: f64,
    pub z_setby: ZSetBy,
    pub dom_z_setby: ZSetBy,

    pub nmodels: u64,
    pub nnodes: u64,
    pub nseqs: u64,
    pub nres: u64,
    pub n_past_msv: u64,
    pub n_past_bias: u64,
    pub n_past_vit: u64,
    pub n_past_fwd: u64,

    pub nhits: u64,
    pub nreported: u64,
    pub nincluded: u64,

    /// Byte offset of each hit within the serialized hit block
    pub hit_offsets: Vec<u64>,
}

impl SearchStats {
    /// Fill the counting fields from merged pipeline statistics
    ///
    /// Search mode reports a single model of `query_length` nodes; scan mode
    /// reports a single query sequence of `query_length` residues.
    pub fn from_pipeline(pipeline: &PipelineStats, mode: PipelineMode, query_length: u64) -> Self {
        let (nmodels, nnodes, nseqs, nres) = match mode {
            PipelineMode::SearchSeqs => (1, query_length, pipeline.nseqs, pipeline.nres),
            PipelineMode::ScanModels => (pipeline.nmodels, pipeline.nnodes, 1, query_length),
        };

        Self {
            nmodels,
            nnodes,
            nseqs,
            nres,
            n_past_msv: pipeline.n_past_msv,
            n_past_bias: pipeline.n_past_bias,
            n_past_vit: pipeline.n_past_vit,
            n_past_fwd: pipeline.n_past_fwd,
            ..Default::default()
        }
    }
}

/// Fixed-size header that precedes every client response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchStatus {
    /// Raw status code (see `StatusCode`)
    pub status: u32,

    /// Size in bytes of everything that follows this header
    pub msg_size: u64,
}

impl SearchStatus {
    /// Header for a response of `msg_size` trailing bytes
    pub fn new(status: StatusCode, msg_size: u64) -> Self {
        Self {
            status: status.as_u32(),
            msg_size,
        }
    }

    /// Decoded status code, if known
    pub fn code(&self) -> Option<StatusCode> {
        StatusCode::from_u32(self.status)
    }
}
