//! Record encoding for the client and cluster wire formats
//!
//! Individual records (hits, statistics, status headers, chunk replies) are
//! encoded with bincode's fixed-width little-endian encoding. A client
//! response is three back-to-back blocks:
//!
//! ```text
//! ┌────────────────┬──────────────────────┬─────────────────────────┐
//! │ SearchStatus   │ SearchStats          │ Hit, Hit, Hit, ...      │
//! │ (fixed 12 B)   │ (incl. hit_offsets)  │ (offsets index here)    │
//! └────────────────┴──────────────────────┴─────────────────────────┘
//!                  └──────────── status.msg_size bytes ─────────────┘
//! ```
//!
//! Error responses replace the last two blocks with a NUL-terminated
//! message.

use crate::error::{CodecError, CodecResult};
use crate::hits::Hit;
use crate::stats::{SearchStats, SearchStatus, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{Cursor, ErrorKind, Read};

/// Encoded size of a `SearchStatus` header
pub const STATUS_HEADER_LEN: usize = 12;

/// Encode any record
pub fn encode<T: Serialize>(value: &T) -> CodecResult<Vec<u8>> {
    Ok(bincode::serialize(value)?)
}

/// Decode any record
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> CodecResult<T> {
    Ok(bincode::deserialize(bytes)?)
}

/// Encode a hit list, returning the block and each hit's starting offset
pub fn encode_hits<'a, I>(hits: I) -> CodecResult<(Vec<u8>, Vec<u64>)>
where
    I: IntoIterator<Item = &'a Hit>,
{
    let mut buf = Vec::new();
    let mut offsets = Vec::new();

    for hit in hits {
        offsets.push(buf.len() as u64);
        bincode::serialize_into(&mut buf, hit)?;
    }

    Ok((buf, offsets))
}

/// Encode a status header
pub fn encode_status(status: &SearchStatus) -> CodecResult<Vec<u8>> {
    let buf = encode(status)?;
    debug_assert_eq!(buf.len(), STATUS_HEADER_LEN);
    Ok(buf)
}

/// Build the two blocks of an error response: header, then message + NUL
pub fn encode_error(status: StatusCode, message: &str) -> CodecResult<(Vec<u8>, Vec<u8>)> {
    let mut body = Vec::with_capacity(message.len() + 1);
    body.extend_from_slice(message.as_bytes());
    body.push(0);

    let header = encode_status(&SearchStatus::new(status, body.len() as u64))?;
    Ok((header, body))
}

/// A decoded client response
#[derive(Debug, Clone, PartialEq)]
pub enum SearchResponse {
    /// Successful search
    Results { stats: SearchStats, hits: Vec<Hit> },

    /// Error reported by the coordinator
    Error { status: u32, message: String },
}

/// Read one complete response from a byte stream
///
/// The body is read through a reader capped at the header's `msg_size`, so
/// a corrupt size can only fail with `Truncated`.
pub fn read_search_response<R: Read>(reader: &mut R) -> CodecResult<SearchResponse> {
    let mut header = [0u8; STATUS_HEADER_LEN];
    reader.read_exact(&mut header).map_err(|e| match e.kind() {
        ErrorKind::UnexpectedEof => CodecError::Truncated {
            what: "status header",
            expected: STATUS_HEADER_LEN,
            actual: 0,
        },
        _ => CodecError::Io(e),
    })?;
    let status: SearchStatus = decode(&header)?;

    let mut payload = Vec::new();
    reader.by_ref().take(status.msg_size).read_to_end(&mut payload)?;
    if payload.len() as u64 != status.msg_size {
        return Err(CodecError::Truncated {
            what: "response body",
            expected: usize::try_from(status.msg_size).unwrap_or(usize::MAX),
            actual: payload.len(),
        });
    }

    if status.code() != Some(StatusCode::Ok) {
        let text = payload.strip_suffix(&[0u8]).unwrap_or(&payload[..]);
        return Ok(SearchResponse::Error {
            status: status.status,
            message: String::from_utf8_lossy(text).into_owned(),
        });
    }

    let mut cursor = Cursor::new(payload.as_slice());
    let stats: SearchStats = bincode::deserialize_from(&mut cursor)?;
    let hit_block = &payload[cursor.position() as usize..];

    let mut hits = Vec::with_capacity(stats.hit_offsets.len());
    for &offset in &stats.hit_offsets {
        let start = offset as usize;
        if start > hit_block.len() {
            return Err(CodecError::Truncated {
                what: "hit block",
                expected: start,
                actual: hit_block.len(),
            });
        }
        hits.push(decode::<Hit>(&hit_block[start..])?);
    }

    Ok(SearchResponse::Results { stats, hits })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(name: &str, sortkey: f64) -> Hit {
        Hit {
            name: name.into(),
            acc: Some(format!("ACC_{}", name)),
            desc: None,
            target_index: 0,
            sortkey,
            score: sortkey as f32,
            bias: 0.1,
            ln_p: -sortkey,
            ndom: 1,
            reported: true,
            included: false,
        }
    }

    #[test]
    fn test_status_header_is_fixed_size() {
        let small = encode_status(&SearchStatus::new(StatusCode::Ok, 0)).unwrap();
        let large = encode_status(&SearchStatus::new(StatusCode::Invalid, u64::MAX)).unwrap();
        assert_eq!(small.len(), STATUS_HEADER_LEN);
        assert_eq!(large.len(), STATUS_HEADER_LEN);
    }

    #[test]
    fn test_hit_offsets_locate_each_hit() {
        let hits = vec![hit("first", 30.0), hit("second-longer-name", 20.0)];
        let (block, offsets) = encode_hits(&hits).unwrap();

        assert_eq!(offsets[0], 0);
        assert!(offsets[1] > 0);
        let second: Hit = decode(&block[offsets[1] as usize..]).unwrap();
        assert_eq!(second.name, "second-longer-name");
    }

    #[test]
    fn test_error_response_round_trip() {
        let (header, body) = encode_error(StatusCode::Invalid, "Unknown command reboot").unwrap();
        let mut stream = header;
        stream.extend_from_slice(&body);

        let response = read_search_response(&mut stream.as_slice()).unwrap();
        assert_eq!(
            response,
            SearchResponse::Error {
                status: StatusCode::Invalid.as_u32(),
                message: "Unknown command reboot".into(),
            }
        );
    }

    #[test]
    fn test_truncated_response() {
        let header = encode_status(&SearchStatus::new(StatusCode::Ok, 100)).unwrap();
        let err = read_search_response(&mut header.as_slice()).unwrap_err();
        assert!(matches!(err, CodecError::Truncated { .. }));
    }

    #[test]
    fn test_oversized_body_length_is_truncation() {
        let header = encode_status(&SearchStatus::new(StatusCode::Ok, u64::MAX)).unwrap();
        let mut stream = header;
        stream.extend_from_slice(b"short body");

        match read_search_response(&mut stream.as_slice()).unwrap_err() {
            CodecError::Truncated { what, actual, .. } => {
                assert_eq!(what, "response body");
                assert_eq!(actual, 10);
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_short_status_header() {
        let err = read_search_response(&mut &[0u8, 0, 0][..]).unwrap_err();
        assert!(matches!(err, CodecError::Truncated { what: "status header", .. }));
    }
}
