//! Query payload parsing
//!
//! A client payload is either a single FASTA sequence or a profile block in
//! HMMER3 text format. Only the fields the coordinator needs are pulled out
//! of a profile (name, accession, description, length, consensus); the
//! raw text travels with it so workers can rebuild the full model.

use crate::error::{ClientError, ClientResult};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Header fields we read from a profile block
static PROFILE_FIELD_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(NAME|ACC|DESC|LENG|ALPH)\s+(.+?)\s*$").expect("Invalid profile field regex")
});

/// Residue alphabet of a query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Alphabet {
    #[default]
    Amino,
}

impl Alphabet {
    /// Number of canonical residues
    pub fn size(&self) -> usize {
        match self {
            Alphabet::Amino => 20,
        }
    }

    /// Check a residue symbol (uppercase), including degenerate codes
    pub fn is_valid(&self, residue: u8) -> bool {
        match self {
            Alphabet::Amino => b"ACDEFGHIKLMNPQRSTVWYBJZOUX*-".contains(&residue),
        }
    }
}

/// A parsed sequence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sequence {
    pub name: String,
    pub desc: Option<String>,
    /// Uppercase residue symbols
    pub residues: Vec<u8>,
}

/// A parsed profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    pub acc: Option<String>,
    pub desc: Option<String>,
    /// Number of match states
    pub length: usize,
    /// Consensus residue per match state, when the block carries one
    pub consensus: Vec<u8>,
    /// The block as received
    pub text: String,
}

/// The object a client searches with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Query {
    Sequence(Sequence),
    Profile(Profile),
}

impl Query {
    pub fn name(&self) -> &str {
        match self {
            Query::Sequence(s) => &s.name,
            Query::Profile(p) => &p.name,
        }
    }

    /// Residues for a sequence, match states for a profile
    pub fn length(&self) -> usize {
        match self {
            Query::Sequence(s) => s.residues.len(),
            Query::Profile(p) => p.length,
        }
    }

    /// Residue string used for comparison
    pub fn residues(&self) -> &[u8] {
        match self {
            Query::Sequence(s) => &s.residues,
            Query::Profile(p) => &p.consensus,
        }
    }
}

/// Where a parse failed, shared by the query and database readers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseFailure {
    /// Zero-based record number
    pub record: usize,
    pub reason: String,
}

/// Parse every record of a FASTA text
pub fn parse_fasta_records(text: &str, alphabet: Alphabet) -> Result<Vec<Sequence>, ParseFailure> {
    let mut records = Vec::new();
    let mut current: Option<Sequence> = None;

    for line in text.lines() {
        let line = line.trim_end();
        if let Some(header) = line.strip_prefix('>') {
            if let Some(done) = current.take() {
                records.push(done);
            }
            let record = records.len();
            let mut parts = header.trim().splitn(2, char::is_whitespace);
            let name = parts.next().unwrap_or("").to_string();
            if name.is_empty() {
                return Err(ParseFailure {
                    record,
                    reason: "missing sequence name".into(),
                });
            }
            let desc = parts
                .next()
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .map(String::from);
            current = Some(Sequence {
                name,
                desc,
                residues: Vec::new(),
            });
            continue;
        }

        if line.trim().is_empty() || line.trim() == "//" {
            continue;
        }

        let Some(seq) = current.as_mut() else {
            return Err(ParseFailure {
                record: 0,
                reason: "residues before the first '>' header".into(),
            });
        };

        for &b in line.as_bytes() {
            if b.is_ascii_whitespace() {
                continue;
            }
            let residue = b.to_ascii_uppercase();
            if !alphabet.is_valid(residue) {
                return Err(ParseFailure {
                    record: records.len(),
                    reason: format!("invalid residue '{}' in {}", b as char, seq.name),
                });
            }
            seq.residues.push(residue);
        }
    }

    if let Some(done) = current.take() {
        records.push(done);
    }
    Ok(records)
}

/// Parse a client payload holding exactly one FASTA sequence
pub fn parse_sequence(payload: &str, alphabet: Alphabet) -> ClientResult<Sequence> {
    let mut records =
        parse_fasta_records(payload, alphabet).map_err(|f| ClientError::BadSequence(f.reason))?;

    if records.len() > 1 {
        return Err(ClientError::BadSequence(format!(
            "expected one sequence, found {}",
            records.len()
        )));
    }
    let seq = records
        .pop()
        .ok_or_else(|| ClientError::BadSequence("no sequence found".into()))?;
    if seq.residues.is_empty() {
        return Err(ClientError::EmptySequence);
    }
    Ok(seq)
}

impl Profile {
    /// Parse one profile block
    pub fn parse(text: &str, alphabet: Alphabet) -> Result<Self, String> {
        let mut lines = text.lines();
        let first = lines.next().unwrap_or("").trim();
        if !first.starts_with("HMMER3") {
            return Err(format!("bad format line '{}'", first));
        }

        let mut name = None;
        let mut acc = None;
        let mut desc = None;
        let mut length = None;
        let mut consensus = Vec::new();
        let mut in_body = false;

        for line in lines {
            let line = line.trim_end();
            if line.trim() == "//" {
                break;
            }

            if !in_body {
                if line.starts_with("HMM ") || line == "HMM" {
                    in_body = true;
                    continue;
                }
                if let Some(caps) = PROFILE_FIELD_REGEX.captures(line) {
                    let value = caps[2].to_string();
                    match &caps[1] {
                        "NAME" => name = Some(value),
                        "ACC" => acc = Some(value),
                        "DESC" => desc = Some(value),
                        "LENG" => {
                            let n = value
                                .parse::<usize>()
                                .map_err(|_| format!("bad LENG '{}'", value))?;
                            length = Some(n);
                        }
                        "ALPH" => {
                            if !value.eq_ignore_ascii_case("amino") {
                                return Err(format!("unsupported alphabet '{}'", value));
                            }
                        }
                        _ => {}
                    }
                }
                continue;
            }

            // Match-state lines: node index, K emissions, MAP, CONS, ...
            let tokens: Vec<&str> = line.split_whitespace().collect();
            let is_match_line = tokens
                .first()
                .is_some_and(|t| t.parse::<usize>().is_ok());
            if is_match_line && tokens.len() > alphabet.size() + 2 {
                if let Some(&c) = tokens[alphabet.size() + 2].as_bytes().first() {
                    consensus.push(c.to_ascii_uppercase());
                }
            }
        }

        let name = name.ok_or("missing NAME")?;
        let length = length.ok_or("missing LENG")?;
        if length == 0 {
            return Err("zero length model".into());
        }
        if !in_body {
            return Err("missing HMM body".into());
        }

        Ok(Self {
            name,
            acc,
            desc,
            length,
            consensus,
            text: text.to_string(),
        })
    }
}

/// Split a model database text into its profile blocks
pub fn split_profiles(text: &str) -> Vec<&str> {
    let mut blocks = Vec::new();
    let mut start = 0;
    let mut offset = 0;

    for line in text.split_inclusive('\n') {
        offset += line.len();
        if line.trim() == "//" {
            let block = &text[start..offset];
            if !block.trim().is_empty() {
                blocks.push(block);
            }
            start = offset;
        }
    }
    if !text[start..].trim().is_empty() {
        blocks.push(&text[start..]);
    }
    blocks
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Three-node amino profile used across the crate's tests
    pub(crate) const TINY_PROFILE: &str = "HMMER3/f [3.1b2 | February 2015]
NAME  tiny
ACC   PF00001.1
DESC  A tiny test model
LENG  3
ALPH  amino
HMM          A        C        D        E        F        G        H        I        K        L        M        N        P        Q        R        S        T        V        W        Y
            m->m     m->i     m->d     i->m     i->i     d->m     d->d
  COMPO   2.5 2.5 2.5 2.5 2.5 2.5 2.5 2.5 2.5 2.5 2.5 2.5 2.5 2.5 2.5 2.5 2.5 2.5 2.5 2.5
  1   1 1 1 1 1 1 1 1 1 1 1 1 1 1 1 1 1 1 1 1      1 m - - -
  2   1 1 1 1 1 1 1 1 1 1 1 1 1 1 1 1 1 1 1 1      2 k - - -
  3   1 1 1 1 1 1 1 1 1 1 1 1 1 1 1 1 1 1 1 1      3 v - - -
//
";

    #[test]
    fn test_parse_single_sequence() {
        let seq = parse_sequence(">q1 test query\nACDEF\nghik\n", Alphabet::Amino).unwrap();
        assert_eq!(seq.name, "q1");
        assert_eq!(seq.desc.as_deref(), Some("test query"));
        assert_eq!(seq.residues, b"ACDEFGHIK");
    }

    #[test]
    fn test_zero_length_sequence() {
        assert_eq!(
            parse_sequence(">empty\n", Alphabet::Amino),
            Err(ClientError::EmptySequence)
        );
    }

    #[test]
    fn test_invalid_residue() {
        let err = parse_sequence(">bad\nAC1DE\n", Alphabet::Amino).unwrap_err();
        assert!(matches!(err, ClientError::BadSequence(_)));
    }

    #[test]
    fn test_multiple_records() {
        let records = parse_fasta_records(">a\nAC\n>b desc\nDE\n", Alphabet::Amino).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].name, "b");

        assert!(parse_sequence(">a\nAC\n>b\nDE\n", Alphabet::Amino).is_err());
    }

    #[test]
    fn test_parse_profile() {
        let profile = Profile::parse(TINY_PROFILE, Alphabet::Amino).unwrap();
        assert_eq!(profile.name, "tiny");
        assert_eq!(profile.acc.as_deref(), Some("PF00001.1"));
        assert_eq!(profile.length, 3);
        assert_eq!(profile.consensus, b"MKV");
    }

    #[test]
    fn test_profile_missing_fields() {
        assert!(Profile::parse("HMMER3/f\nLENG 3\nHMM\n", Alphabet::Amino).is_err());
        assert!(Profile::parse("not a profile\n", Alphabet::Amino).is_err());
    }

    #[test]
    fn test_split_profiles() {
        let text = format!("{}{}", TINY_PROFILE, TINY_PROFILE.replace("tiny", "tiny2"));
        let blocks = split_profiles(&text);
        assert_eq!(blocks.len(), 2);
        assert!(blocks[1].contains("NAME  tiny2"));
    }
}
