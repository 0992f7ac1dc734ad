//! Ranked hit collections
//!
//! A `TopHits` is the mergeable, sortable, threshold-able set of results for
//! one search. Workers send partial collections; the aggregation thread
//! merges them into the global one.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// One scored target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hit {
    /// Target name
    pub name: String,

    /// Target accession
    pub acc: Option<String>,

    /// Target description
    pub desc: Option<String>,

    /// Index of the target object in its database
    pub target_index: u64,

    /// Primary ranking key; larger ranks first
    pub sortkey: f64,

    /// Bit score
    pub score: f32,

    /// Composition bias correction applied to the score
    pub bias: f32,

    /// Natural log of the P-value
    pub ln_p: f64,

    /// Number of domains found
    pub ndom: u32,

    /// Passed the reporting threshold
    pub reported: bool,

    /// Passed the inclusion threshold
    pub included: bool,
}

impl Hit {
    /// E-value of this hit against a database of effective size `z`
    pub fn evalue(&self, z: f64) -> f64 {
        self.ln_p.exp() * z
    }

    /// Rank order: descending sortkey, then ascending target index, then name
    pub fn rank_cmp(&self, other: &Hit) -> Ordering {
        other
            .sortkey
            .total_cmp(&self.sortkey)
            .then_with(|| self.target_index.cmp(&other.target_index))
            .then_with(|| self.name.cmp(&other.name))
    }
}

/// A score or E-value cutoff
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Cutoff {
    /// Keep hits with E-value at or below this
    EValue(f64),
    /// Keep hits with bit score at or above this
    Score(f64),
}

impl Cutoff {
    fn passes(&self, hit: &Hit, z: f64) -> bool {
        match *self {
            Cutoff::EValue(e) => hit.evalue(z) <= e,
            Cutoff::Score(t) => f64::from(hit.score) >= t,
        }
    }
}

/// Reporting and inclusion cutoffs for a search
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub report: Cutoff,
    pub include: Cutoff,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            report: Cutoff::EValue(10.0),
            include: Cutoff::EValue(0.01),
        }
    }
}

/// Mergeable collection of hits
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TopHits {
    hits: Vec<Hit>,
    nreported: u64,
    nincluded: u64,
    sorted: bool,
}

impl TopHits {
    /// Create an empty collection
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a collection from a batch of hits
    pub fn from_hits(hits: Vec<Hit>) -> Self {
        Self {
            hits,
            ..Default::default()
        }
    }

    /// Add one hit
    pub fn push(&mut self, hit: Hit) {
        self.hits.push(hit);
        self.sorted = false;
    }

    /// Move every hit of `other` into this collection
    pub fn merge(&mut self, other: &mut TopHits) {
        if other.hits.is_empty() {
            return;
        }
        self.hits.append(&mut other.hits);
        self.sorted = false;
        other.clear();
    }

    /// Stable sort into rank order
    pub fn sort(&mut self) {
        if !self.sorted {
            self.hits.sort_by(Hit::rank_cmp);
            self.sorted = true;
        }
    }

    /// Flag hits against the cutoffs and recount reported/included
    pub fn threshold(&mut self, thresholds: &Thresholds, z: f64) {
        let mut nreported = 0;
        let mut nincluded = 0;

        for hit in &mut self.hits {
            hit.reported = thresholds.report.passes(hit, z);
            hit.included = thresholds.include.passes(hit, z);
            nreported += u64::from(hit.reported);
            nincluded += u64::from(hit.included);
        }

        self.nreported = nreported;
        self.nincluded = nincluded;
    }

    /// Drop every hit and reset counts; keeps the allocation
    pub fn clear(&mut self) {
        self.hits.clear();
        self.nreported = 0;
        self.nincluded = 0;
        self.sorted = false;
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn hits(&self) -> &[Hit] {
        &self.hits
    }

    pub fn nreported(&self) -> u64 {
        self.nreported
    }

    pub fn nincluded(&self) -> u64 {
        self.nincluded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(name: &str, index: u64, sortkey: f64, ln_p: f64) -> Hit {
        Hit {
            name: name.into(),
            acc: None,
            desc: None,
            target_index: index,
            sortkey,
            score: sortkey as f32,
            bias: 0.0,
            ln_p,
            ndom: 1,
            reported: false,
            included: false,
        }
    }

    #[test]
    fn test_merge_moves_hits() {
        let mut global = TopHits::new();
        let mut batch = TopHits::from_hits(vec![hit("a", 1, 10.0, -5.0), hit("b", 2, 20.0, -9.0)]);

        global.merge(&mut batch);

        assert_eq!(global.len(), 2);
        assert!(batch.is_empty());
        assert_eq!(global.hits()[1].name, "b");
    }

    #[test]
    fn test_sort_descending_with_tie_break() {
        let mut th = TopHits::from_hits(vec![
            hit("low", 7, 1.0, -1.0),
            hit("tie-b", 9, 5.0, -2.0),
            hit("high", 3, 50.0, -30.0),
            hit("tie-a", 4, 5.0, -2.0),
        ]);

        th.sort();

        let order: Vec<&str> = th.hits().iter().map(|h| h.name.as_str()).collect();
        assert_eq!(order, vec!["high", "tie-a", "tie-b", "low"]);
    }

    #[test]
    fn test_threshold_by_evalue() {
        // Z = 1000: ln_p -20 -> E ~ 2e-6, ln_p -5 -> E ~ 6.7, ln_p -1 -> E ~ 368
        let mut th = TopHits::from_hits(vec![
            hit("strong", 1, 40.0, -20.0),
            hit("weak", 2, 8.0, -5.0),
            hit("noise", 3, 1.0, -1.0),
        ]);

        th.threshold(&Thresholds::default(), 1000.0);

        assert_eq!(th.nreported(), 2);
        assert_eq!(th.nincluded(), 1);
        assert!(th.hits()[0].included);
        assert!(th.hits()[1].reported && !th.hits()[1].included);
        assert!(!th.hits()[2].reported);
    }

    #[test]
    fn test_threshold_by_score() {
        let mut th = TopHits::from_hits(vec![hit("a", 1, 30.0, -1.0), hit("b", 2, 10.0, -1.0)]);
        let thresholds = Thresholds {
            report: Cutoff::Score(5.0),
            include: Cutoff::Score(25.0),
        };

        th.threshold(&thresholds, 1.0);

        assert_eq!(th.nreported(), 2);
        assert_eq!(th.nincluded(), 1);
    }
}
