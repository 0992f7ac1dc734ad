//! Per-request option strings
//!
//! The first line of a search message carries a command-line style option
//! string (`--seqdb 1 -E 0.01`). It is parsed with the same clap derive
//! machinery as the daemon's own command line.

use crate::error::{ClientError, ClientResult};
use crate::hits::{Cutoff, Thresholds};
use clap::Parser;

/// Program name put in front of the option words so clap sees argv[0]
const OPTION_ARGV0: &str = "shard-master";

/// Database named by a request, still 1-based as the client sent it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseSelector {
    /// `--seqdb N`: search a sequence database
    Sequences(usize),
    /// `--hmmdb N`: scan a model database
    Models(usize),
}

impl DatabaseSelector {
    /// 1-based index as sent
    pub fn index(&self) -> usize {
        match *self {
            DatabaseSelector::Sequences(n) | DatabaseSelector::Models(n) => n,
        }
    }
}

/// Options accepted on a search request
#[derive(Parser, Debug, Clone, PartialEq)]
#[command(
    name = OPTION_ARGV0,
    disable_help_flag = true,
    disable_version_flag = true,
    allow_negative_numbers = true
)]
pub struct SearchOptions {
    /// Search the N-th loaded database (sequence database)
    #[arg(long, value_name = "N", conflicts_with = "hmmdb")]
    pub seqdb: Option<usize>,

    /// Scan the N-th loaded database (model database)
    #[arg(long, value_name = "N")]
    pub hmmdb: Option<usize>,

    /// Report targets with E-value <= X
    #[arg(short = 'E', value_name = "X", default_value_t = 10.0)]
    pub evalue: f64,

    /// Report targets with score >= X (overrides -E)
    #[arg(short = 'T', value_name = "X")]
    pub score: Option<f64>,

    /// Include targets with E-value <= X
    #[arg(long = "incE", value_name = "X", default_value_t = 0.01)]
    pub inc_evalue: f64,

    /// Include targets with score >= X (overrides --incE)
    #[arg(long = "incT", value_name = "X")]
    pub inc_score: Option<f64>,

    /// Effective number of targets for E-values
    #[arg(short = 'Z', value_name = "X")]
    pub z: Option<f64>,

    /// Effective number of significant targets for domain E-values
    #[arg(long = "domZ", value_name = "X")]
    pub dom_z: Option<f64>,

    /// Stray positional words; any are an error
    #[arg(hide = true)]
    pub extra: Vec<String>,
}

impl SearchOptions {
    /// Parse the option line of a search request
    pub fn parse_option_string(line: &str) -> ClientResult<Self> {
        let argv = std::iter::once(OPTION_ARGV0).chain(line.split_whitespace());
        let opts = Self::try_parse_from(argv).map_err(|e| ClientError::BadOptions(clap_message(&e)))?;

        if !opts.extra.is_empty() {
            return Err(ClientError::UnexpectedArguments);
        }
        Ok(opts)
    }

    /// Which database the request names
    pub fn database(&self) -> ClientResult<DatabaseSelector> {
        match (self.seqdb, self.hmmdb) {
            (Some(n), _) => Ok(DatabaseSelector::Sequences(n)),
            (None, Some(n)) => Ok(DatabaseSelector::Models(n)),
            (None, None) => Err(ClientError::NoDatabase),
        }
    }

    /// Reporting and inclusion cutoffs
    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            report: self.score.map_or(Cutoff::EValue(self.evalue), Cutoff::Score),
            include: self
                .inc_score
                .map_or(Cutoff::EValue(self.inc_evalue), Cutoff::Score),
        }
    }
}

/// First line of a clap error, without the "error: " prefix
fn clap_message(err: &clap::Error) -> String {
    let text = err.to_string();
    let first = text.lines().next().unwrap_or("").trim();
    first.strip_prefix("error:").unwrap_or(first).trim().to_string()
}
