//! Result dispatch
//!
//! Turns the merged hits and statistics of a finished search into the
//! three-block client response and writes it out.

use crate::client::request::ClientHandle;
use crate::codec;
use crate::error::CodecResult;
use crate::hits::{Thresholds, TopHits};
use crate::stats::{PipelineMode, PipelineStats, SearchStats, SearchStatus, StatusCode, ZSetBy};
use tracing::{debug, error};

/// Per-search inputs to result assembly
#[derive(Debug, Clone, Copy)]
pub struct ResultParams {
    pub mode: PipelineMode,
    /// Query length in residues or match states
    pub query_length: u64,
    pub thresholds: Thresholds,
    /// Fixed effective database size (`-Z`)
    pub z: Option<f64>,
    /// Fixed effective significant-target count (`--domZ`)
    pub dom_z: Option<f64>,
    /// Search wall time in seconds
    pub elapsed: f64,
}

/// A finished search, ready to encode
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub stats: SearchStats,
    pub hits: TopHits,
}

impl SearchResult {
    /// Sort, threshold and count the merged hits
    pub fn build(mut hits: TopHits, pipeline: &PipelineStats, params: &ResultParams) -> Self {
        let mut stats = SearchStats::from_pipeline(pipeline, params.mode, params.query_length);
        stats.elapsed = params.elapsed;

        (stats.z, stats.z_setby) = match params.z {
            Some(z) => (z, ZSetBy::Option),
            None => (pipeline.targets(params.mode) as f64, ZSetBy::NTargets),
        };

        hits.sort();
        hits.threshold(&params.thresholds, stats.z);

        (stats.dom_z, stats.dom_z_setby) = match params.dom_z {
            Some(dom_z) => (dom_z, ZSetBy::Option),
            None => (hits.nreported() as f64, ZSetBy::NSignificant),
        };

        stats.nhits = hits.len() as u64;
        stats.nreported = hits.nreported();
        stats.nincluded = hits.nincluded();

        Self { stats, hits }
    }

    /// Encode the three response blocks; fills in the hit offsets
    pub fn encode(&mut self) -> CodecResult<EncodedResponse> {
        let (hits, offsets) = codec::encode_hits(self.hits.hits())?;
        self.stats.hit_offsets = offsets;

        let stats = codec::encode(&self.stats)?;
        let msg_size = (stats.len() + hits.len()) as u64;
        let status = codec::encode_status(&SearchStatus::new(StatusCode::Ok, msg_size))?;

        Ok(EncodedResponse { status, stats, hits })
    }
}

/// Encoded response blocks
#[derive(Debug, Clone)]
pub struct EncodedResponse {
    pub status: Vec<u8>,
    pub stats: Vec<u8>,
    pub hits: Vec<u8>,
}

impl EncodedResponse {
    pub fn len(&self) -> usize {
        self.status.len() + self.stats.len() + self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Write a response to its client
///
/// Returns the bytes written. On a failed write the rest of the response is
/// dropped and the connection is closed.
pub fn send_response(client: &ClientHandle, response: &EncodedResponse) -> Option<usize> {
    match client.write_blocks(&[&response.status, &response.stats, &response.hits]) {
        Ok(()) => {
            debug!(addr = %client.addr(), bytes = response.len(), "Sent search results");
            Some(response.len())
        }
        Err(e) => {
            error!(addr = %client.addr(), error = %e, "Failed to write results to client, closing connection");
            client.close();
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{read_search_response, SearchResponse};
    use crate::hits::{Cutoff, Hit};
    use parking_lot::Mutex;
    use std::io::{self, Write};
    use std::sync::Arc;

    fn hit(index: u64, sortkey: f64) -> Hit {
        Hit {
            name: format!("t{}", index),
            acc: None,
            desc: None,
            target_index: index,
            sortkey,
            score: sortkey as f32,
            bias: 0.0,
            ln_p: -sortkey,
            ndom: 1,
            reported: false,
            included: false,
        }
    }

    fn params() -> ResultParams {
        ResultParams {
            mode: PipelineMode::SearchSeqs,
            query_length: 120,
            thresholds: Thresholds::default(),
            z: None,
            dom_z: None,
            elapsed: 0.5,
        }
    }

    fn pipeline() -> PipelineStats {
        PipelineStats {
            nseqs: 1000,
            nres: 250_000,
            ..Default::default()
        }
    }

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct Broken;

    impl Write for Broken {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer gone"))
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_build_sorts_and_counts() {
        // Z = 1000: ln_p -30 -> E ~ 1e-10, ln_p -8 -> E ~ 0.34, ln_p -2 -> E ~ 135
        let hits = TopHits::from_hits(vec![hit(3, 8.0), hit(1, 2.0), hit(2, 30.0)]);
        let result = SearchResult::build(hits, &pipeline(), &params());

        let order: Vec<u64> = result.hits.hits().iter().map(|h| h.target_index).collect();
        assert_eq!(order, vec![2, 3, 1]);
        assert_eq!(result.stats.z, 1000.0);
        assert_eq!(result.stats.z_setby, ZSetBy::NTargets);
        assert_eq!(result.stats.nhits, 3);
        assert_eq!(result.stats.nreported, 2);
        assert_eq!(result.stats.nincluded, 1);
        assert_eq!(result.stats.dom_z, 2.0);
        assert_eq!(result.stats.dom_z_setby, ZSetBy::NSignificant);
        assert_eq!((result.stats.nmodels, result.stats.nnodes), (1, 120));
    }

    #[test]
    fn test_z_from_option() {
        let p = ResultParams {
            z: Some(1e6),
            dom_z: Some(50.0),
            thresholds: Thresholds {
                report: Cutoff::Score(5.0),
                include: Cutoff::Score(20.0),
            },
            ..params()
        };
        let result = SearchResult::build(TopHits::from_hits(vec![hit(1, 8.0)]), &pipeline(), &p);
        assert_eq!((result.stats.z, result.stats.z_setby), (1e6, ZSetBy::Option));
        assert_eq!((result.stats.dom_z, result.stats.dom_z_setby), (50.0, ZSetBy::Option));
        assert_eq!(result.stats.nreported, 1);
        assert_eq!(result.stats.nincluded, 0);
    }

    #[test]
    fn test_response_round_trip() {
        let hits = TopHits::from_hits(vec![hit(1, 40.0), hit(2, 25.0)]);
        let mut result = SearchResult::build(hits, &pipeline(), &params());
        let encoded = result.encode().unwrap();

        let out = SharedBuf::default();
        let client = ClientHandle::new(1, "test", out.clone());
        assert_eq!(send_response(&client, &encoded), Some(encoded.len()));

        let bytes = out.0.lock().clone();
        let SearchResponse::Results { stats, hits } = read_search_response(&mut bytes.as_slice()).unwrap() else {
            panic!("expected results");
        };
        assert_eq!(stats.nhits, 2);
        assert_eq!(stats.hit_offsets.len(), 2);
        assert_eq!(hits[0].target_index, 1);
        assert!(hits[1].reported);
    }

    #[test]
    fn test_empty_result() {
        let mut result = SearchResult::build(TopHits::new(), &pipeline(), &params());
        let encoded = result.encode().unwrap();
        assert!(encoded.hits.is_empty());
        assert_eq!(result.stats.nhits, 0);
        assert_eq!(result.stats.dom_z, 0.0);
    }

    #[test]
    fn test_write_failure_is_reported() {
        let mut result = SearchResult::build(TopHits::new(), &pipeline(), &params());
        let encoded = result.encode().unwrap();
        let client = ClientHandle::new(2, "gone", Broken);
        assert_eq!(send_response(&client, &encoded), None);
    }

    #[test]
    fn test_write_failure_closes_connection() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let mut peer = std::net::TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (accepted, _) = listener.accept().unwrap();
        peer.set_read_timeout(Some(std::time::Duration::from_secs(5))).unwrap();

        let client = ClientHandle::new(3, "peer", Broken).with_socket(accepted);
        let mut result = SearchResult::build(TopHits::new(), &pipeline(), &params());
        let encoded = result.encode().unwrap();
        assert_eq!(send_response(&client, &encoded), None);

        let mut buf = [0u8; 16];
        assert_eq!(io::Read::read(&mut peer, &mut buf).unwrap(), 0);
    }
}
