//! Error types for shard-master
//!
//! This module defines the error hierarchy for the coordinator:
//! - Client input errors (reported back to the client, connection kept)
//! - Cluster protocol violations (fatal to the coordinator)
//! - Shard loading and configuration errors
//! - Aggregation/worker thread errors
//!
//! Design philosophy:
//! - Use thiserror for structured error types in library code
//! - Client-facing errors carry the wire status code they are reported with
//! - Protocol violations are never retried or papered over

use crate::stats::StatusCode;
use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for the coordinator
#[derive(Error, Debug)]
pub enum MasterError {
    /// Malformed client input
    #[error("Client error: {0}")]
    Client(#[from] ClientError),

    /// Cluster protocol violation
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Shard/database errors
    #[error("Shard error: {0}")]
    Shard(#[from] ShardError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Aggregation thread / simulated worker errors
    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    /// Record encoding errors
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// I/O errors (sockets, files)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Cluster transport closed underneath the dispatcher
    #[error("Cluster channel closed unexpectedly")]
    ChannelClosed,
}

/// Errors in a client request; each one is reported to the client as a
/// status + message pair and the request is dropped.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClientError {
    /// Message did not start with `!` or `@`
    #[error("Missing options string")]
    MissingOptions,

    /// Options line present but no payload before the terminator
    #[error("Missing search sequence/hmm")]
    MissingQuery,

    /// Unknown administrative command
    #[error("Unknown command {0}")]
    UnknownCommand(String),

    /// Option string could not be parsed
    #[error("Failed to parse options string: {0}")]
    BadOptions(String),

    /// Positional arguments in the option string
    #[error("Incorrect number of command line arguments.")]
    UnexpectedArguments,

    /// Neither --seqdb nor --hmmdb given
    #[error("No search database specified, --seqdb or --hmmdb.")]
    NoDatabase,

    /// Database index out of range
    #[error("Database {index} does not exist ({available} loaded)")]
    UnknownDatabase { index: usize, available: usize },

    /// Database holds the wrong kind of objects for the requested command
    #[error("Database {index} is not a {expected} database")]
    WrongDatabaseKind { index: usize, expected: &'static str },

    /// FASTA payload failed to parse
    #[error("Error parsing FASTA sequence: {0}")]
    BadSequence(String),

    /// FASTA payload with no residues
    #[error("Error zero length FASTA sequence")]
    EmptySequence,

    /// Profile payload failed to parse
    #[error("Error reading query hmm: {0}")]
    BadProfile(String),

    /// Profile sent against a model database
    #[error("A HMM cannot be used to search a hmm database")]
    ProfileAgainstModels,

    /// Payload is neither FASTA nor a profile
    #[error("Unknown query sequence/hmm format")]
    UnknownFormat,
}

impl ClientError {
    /// Status code sent to the client alongside the message
    pub fn status(&self) -> StatusCode {
        match self {
            ClientError::UnknownCommand(_)
            | ClientError::NoDatabase
            | ClientError::UnknownDatabase { .. }
            | ClientError::WrongDatabaseKind { .. }
            | ClientError::ProfileAgainstModels
            | ClientError::UnexpectedArguments
            | ClientError::BadOptions(_) => StatusCode::Invalid,
            ClientError::MissingOptions
            | ClientError::MissingQuery
            | ClientError::BadSequence(_)
            | ClientError::EmptySequence
            | ClientError::BadProfile(_)
            | ClientError::UnknownFormat => StatusCode::Format,
        }
    }
}

/// Cluster protocol violations. These indicate a build/version mismatch
/// across the cluster and stop the coordinator.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Message tag the coordinator does not understand
    #[error("Unexpected message tag {tag} from worker {source_id}")]
    UnexpectedTag { tag: u32, source_id: usize },

    /// Work request for a shard that does not exist
    #[error("Out-of-range shard {shard} in work request from worker {source_id} ({num_shards} shards)")]
    ShardOutOfRange {
        shard: u32,
        source_id: usize,
        num_shards: usize,
    },

    /// Payload could not be decoded
    #[error("Malformed {what} message from worker {source_id}: {reason}")]
    Malformed {
        what: &'static str,
        source_id: usize,
        reason: String,
    },

    /// Message addressed to a worker that does not exist
    #[error("Unknown worker {0}")]
    UnknownWorker(usize),
}

/// Shard loading errors
#[derive(Error, Debug)]
pub enum ShardError {
    /// Could not open or read the database file
    #[error("Failed to read database '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Leading bytes matched neither a model nor a sequence database
    #[error("Couldn't determine type of datafile for database '{0}'")]
    UnknownKind(PathBuf),

    /// Database parsed to zero objects
    #[error("Database '{0}' contains no objects")]
    Empty(PathBuf),

    /// Malformed record inside the database
    #[error("Malformed record {record} in '{path}': {reason}")]
    Malformed {
        path: PathBuf,
        record: usize,
        reason: String,
    },
}

/// Configuration and CLI errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Invalid worker count
    #[error("Invalid worker count {count}: must be between 1 and {max}")]
    InvalidWorkerCount { count: usize, max: usize },

    /// Invalid shard count
    #[error("Invalid shard count {count}: must be between 1 and {max}")]
    InvalidShardCount { count: usize, max: usize },

    /// Oversubscription factor of zero
    #[error("Invalid oversubscription factor {0}: must be at least 1")]
    InvalidOversubscription(u64),

    /// No database files given
    #[error("At least one database file is required")]
    NoDatabases,

    /// Database path does not exist
    #[error("Database file '{0}' does not exist")]
    MissingDatabase(PathBuf),
}

/// Aggregation thread and simulated worker errors
#[derive(Error, Debug)]
pub enum WorkerError {
    /// Thread panicked
    #[error("{name} panicked: {message}")]
    Panicked { name: String, message: String },

    /// Thread could not be spawned
    #[error("Failed to spawn {name}: {reason}")]
    SpawnFailed { name: String, reason: String },

    /// Link to the coordinator closed
    #[error("Worker {0} lost its link to the coordinator")]
    LinkClosed(usize),
}

/// Record encoding/decoding errors
#[derive(Error, Debug)]
pub enum CodecError {
    /// bincode failure
    #[error("Serialization error: {0}")]
    Bincode(#[from] bincode::Error),

    /// Stream ended before a complete record
    #[error("Truncated {what}: expected {expected} bytes, got {actual}")]
    Truncated {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    /// I/O failure while reading a response
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for MasterError
pub type Result<T> = std::result::Result<T, MasterError>;

/// Result type alias for ClientError
pub type ClientResult<T> = std::result::Result<T, ClientError>;

/// Result type alias for ProtocolError
pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;

/// Result type alias for ShardError
pub type ShardResult<T> = std::result::Result<T, ShardError>;

/// Result type alias for CodecError
pub type CodecResult<T> = std::result::Result<T, CodecError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_error_status() {
        assert_eq!(ClientError::NoDatabase.status(), StatusCode::Invalid);
        assert_eq!(ClientError::EmptySequence.status(), StatusCode::Format);
        assert_eq!(ClientError::UnknownFormat.status(), StatusCode::Format);
        assert_eq!(
            ClientError::UnknownCommand("reboot".into()).status(),
            StatusCode::Invalid
        );
    }

    #[test]
    fn test_client_error_messages() {
        assert_eq!(
            ClientError::NoDatabase.to_string(),
            "No search database specified, --seqdb or --hmmdb."
        );
        assert_eq!(
            ClientError::UnknownCommand("reboot".into()).to_string(),
            "Unknown command reboot"
        );
    }

    #[test]
    fn test_error_conversion() {
        let err = ProtocolError::UnexpectedTag {
            tag: 99,
            source_id: 3,
        };
        let master_err: MasterError = err.into();
        assert!(matches!(master_err, MasterError::Protocol(_)));
    }
}
