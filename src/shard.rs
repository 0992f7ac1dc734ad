//! Loaded target databases
//!
//! Every database file named on the command line is read once at startup.
//! Its kind is decided from the leading bytes: `HMMER3` means a model
//! database (scanned with a query sequence), `>` means a FASTA sequence
//! database (searched with a query profile). Objects are numbered from 0 in
//! file order; those indices are what the work queues hand out.
//!
//! Workers hold their own copy of the databases and search only the objects
//! of their shard: `index % num_shards == shard`.

use crate::client::options::DatabaseSelector;
use crate::client::query::{parse_fasta_records, split_profiles, Alphabet, Profile};
use crate::error::{ClientError, ClientResult, ShardError, ShardResult};
use std::fmt;
use std::ops::Range;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// What a database holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseKind {
    Sequences,
    Models,
}

impl DatabaseKind {
    /// Detect the kind from the first bytes of a file
    pub fn detect(bytes: &[u8]) -> Option<Self> {
        let head = bytes.trim_ascii_start();
        if head.starts_with(b"HMMER3") {
            Some(DatabaseKind::Models)
        } else if head.starts_with(b">") {
            Some(DatabaseKind::Sequences)
        } else {
            None
        }
    }
}

impl fmt::Display for DatabaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatabaseKind::Sequences => write!(f, "sequence"),
            DatabaseKind::Models => write!(f, "hmm"),
        }
    }
}

/// One searchable object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbObject {
    pub index: u64,
    pub name: String,
    pub acc: Option<String>,
    pub desc: Option<String>,

    /// Residues, or model consensus
    pub residues: Vec<u8>,

    /// Residue count, or model length
    pub length: u64,
}

/// A database held in memory
#[derive(Debug, Clone)]
pub struct Database {
    path: PathBuf,
    kind: DatabaseKind,
    objects: Vec<DbObject>,
    total_length: u64,
}

impl Database {
    /// Read and parse a database file
    pub fn open(path: impl AsRef<Path>) -> ShardResult<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| ShardError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let text = String::from_utf8_lossy(&bytes);

        let db = Self::from_text(path, &text)?;
        info!(
            path = %path.display(),
            kind = %db.kind,
            objects = db.objects.len(),
            total_length = db.total_length,
            "Loaded database"
        );
        Ok(db)
    }

    /// Parse database text; `path` is used for naming and errors only
    pub fn from_text(path: impl AsRef<Path>, text: &str) -> ShardResult<Self> {
        let path = path.as_ref().to_path_buf();
        let kind = DatabaseKind::detect(text.as_bytes())
            .ok_or_else(|| ShardError::UnknownKind(path.clone()))?;

        let objects = match kind {
            DatabaseKind::Sequences => Self::parse_sequences(&path, text)?,
            DatabaseKind::Models => Self::parse_models(&path, text)?,
        };
        if objects.is_empty() {
            return Err(ShardError::Empty(path));
        }

        let total_length = objects.iter().map(|o| o.length).sum();
        Ok(Self {
            path,
            kind,
            objects,
            total_length,
        })
    }

    fn parse_sequences(path: &Path, text: &str) -> ShardResult<Vec<DbObject>> {
        let records = parse_fasta_records(text, Alphabet::Amino).map_err(|f| ShardError::Malformed {
            path: path.to_path_buf(),
            record: f.record,
            reason: f.reason,
        })?;

        Ok(records
            .into_iter()
            .enumerate()
            .map(|(i, seq)| DbObject {
                index: i as u64,
                length: seq.residues.len() as u64,
                name: seq.name,
                acc: None,
                desc: seq.desc,
                residues: seq.residues,
            })
            .collect())
    }

    fn parse_models(path: &Path, text: &str) -> ShardResult<Vec<DbObject>> {
        split_profiles(text)
            .into_iter()
            .enumerate()
            .map(|(i, block)| {
                let profile =
                    Profile::parse(block, Alphabet::Amino).map_err(|reason| ShardError::Malformed {
                        path: path.to_path_buf(),
                        record: i,
                        reason,
                    })?;
                debug!(index = i, name = %profile.name, length = profile.length, "Parsed model");
                Ok(DbObject {
                    index: i as u64,
                    length: profile.length as u64,
                    name: profile.name,
                    acc: profile.acc,
                    desc: profile.desc,
                    residues: profile.consensus,
                })
            })
            .collect()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> DatabaseKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Sum of all object lengths
    pub fn total_length(&self) -> u64 {
        self.total_length
    }

    /// Half-open range of object indices
    pub fn index_range(&self) -> Range<u64> {
        match (self.objects.first(), self.objects.last()) {
            (Some(first), Some(last)) => first.index..last.index + 1,
            _ => 0..0,
        }
    }

    /// Objects whose indices fall in `range`, clamped to the database
    pub fn objects_in(&self, range: Range<u64>) -> &[DbObject] {
        let len = self.objects.len() as u64;
        let start = range.start.min(len);
        let end = range.end.min(len).max(start);
        &self.objects[start as usize..end as usize]
    }
}

/// Kinds of the loaded databases, used to validate requests
#[derive(Debug, Clone, Default)]
pub struct DatabaseCatalog {
    kinds: Vec<DatabaseKind>,
}

impl DatabaseCatalog {
    pub fn new(kinds: Vec<DatabaseKind>) -> Self {
        Self { kinds }
    }

    pub fn from_databases(databases: &[Database]) -> Self {
        Self::new(databases.iter().map(Database::kind).collect())
    }

    /// Zero-based index of the database a request names
    pub fn resolve(&self, selector: DatabaseSelector) -> ClientResult<usize> {
        let index = selector.index();
        let available = self.kinds.len();
        if index == 0 || index > available {
            return Err(ClientError::UnknownDatabase { index, available });
        }

        let (expected, expected_name) = match selector {
            DatabaseSelector::Sequences(_) => (DatabaseKind::Sequences, "sequence"),
            DatabaseSelector::Models(_) => (DatabaseKind::Models, "hmm"),
        };
        if self.kinds[index - 1] != expected {
            return Err(ClientError::WrongDatabaseKind {
                index,
                expected: expected_name,
            });
        }
        Ok(index - 1)
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}
