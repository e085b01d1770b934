//! Visitor-to-block-list correlation.

use crate::network::RangeIndex;
use rayon::prelude::*;
use std::collections::{BTreeSet, HashSet};
use std::net::IpAddr;
use tracing::{debug, info};

/// Unique visitor addresses taken from an access log.
pub type VisitorSet = HashSet<IpAddr>;

/// Visitor addresses found inside at least one block-list range.
///
/// Ordered so that downstream stages see the same sequence on every run.
pub type MatchSet = BTreeSet<IpAddr>;

/// Visitor sets at or below this size are checked on the calling thread.
pub const DEFAULT_PARALLEL_THRESHOLD: usize = 1024;

/// Owns the range index for one correlation run.
#[derive(Debug)]
pub struct Correlator {
    index: RangeIndex,
    parallel_threshold: usize,
}

impl Correlator {
    /// Create a correlator over a fully built index.
    pub fn new(index: RangeIndex) -> Self {
        Self {
            index,
            parallel_threshold: DEFAULT_PARALLEL_THRESHOLD,
        }
    }

    /// Set the visitor-set size above which queries fan out over rayon.
    pub fn with_parallel_threshold(mut self, threshold: usize) -> Self {
        self.parallel_threshold = threshold;
        self
    }

    /// The index queries run against.
    pub fn index(&self) -> &RangeIndex {
        &self.index
    }

    /// Return every visitor that falls inside a retained range.
    ///
    /// Addresses are typed, so syntactic validity is the caller's job (the
    /// access-log parser only yields parsed addresses). Each visitor is
    /// queried once; an empty visitor set or index gives an empty result.
    pub fn correlate(&self, visitors: &VisitorSet) -> MatchSet {
        if visitors.is_empty() || self.index.is_empty() {
            debug!(
                visitors = visitors.len(),
                ranges = self.index.len(),
                "Nothing to correlate"
            );
            return MatchSet::new();
        }

        let matches: MatchSet = if visitors.len() > self.parallel_threshold {
            visitors
                .par_iter()
                .filter(|ip| self.index.contains(ip))
                .copied()
                .collect()
        } else {
            visitors
                .iter()
                .filter(|ip| self.index.contains(ip))
                .copied()
                .collect()
        };

        info!(
            visitors = visitors.len(),
            ranges = self.index.len(),
            matches = matches.len(),
            "Correlation complete"
        );

        matches
    }
}

/// Correlate `visitors` against `index` with default settings.
pub fn correlate(visitors: &VisitorSet, index: RangeIndex) -> MatchSet {
    Correlator::new(index).correlate(visitors)
}
