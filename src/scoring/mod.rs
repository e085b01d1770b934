//! Severity scoring of matched addresses.
//!
//! The scorer depends only on the [`Classifier`] capability: a fixed list of
//! feature columns, the class order, and per-class probabilities for a batch
//! of feature rows. [`model`] provides loadable forest and linear models.

pub mod features;
pub mod model;
pub mod scorer;

pub use features::FeatureEncoder;
pub use scorer::{priority_score, SeverityScorer};

use crate::context::MatchRecord;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Severity label assigned by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "Low",
            Severity::Medium => "Medium",
            Severity::High => "High",
            Severity::Critical => "Critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A match record with its severity and priority.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredRecord {
    #[serde(flatten)]
    pub record: MatchRecord,
    /// Arg-max class of the model.
    pub severity: Severity,
    /// `100 * P(Critical) + 50 * P(High)`; higher is more urgent.
    pub priority_score: f64,
}

/// Scoring failure. All variants are fatal for the run.
#[derive(Debug, Error)]
pub enum ScoringError {
    #[error("model expects unknown feature column {0:?}")]
    UnknownColumn(String),

    #[error("model lists feature column {0:?} more than once")]
    DuplicateColumn(String),

    #[error("model does not use required feature column {0:?}")]
    MissingColumn(&'static str),

    #[error("model has no {0} class")]
    MissingClass(Severity),

    #[error("feature row {row} has {found} columns, model expects {expected}")]
    RowWidth {
        row: usize,
        found: usize,
        expected: usize,
    },

    #[error("model returned {found} rows for a batch of {expected}")]
    BatchSize { found: usize, expected: usize },

    #[error("invalid model artifact: {0}")]
    Model(String),

    #[error("failed to read model {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse model: {0}")]
    Json(#[from] serde_json::Error),
}

/// A trained severity classifier.
pub trait Classifier: Send + Sync {
    /// Feature columns, in the order rows must follow.
    fn feature_columns(&self) -> &[String];

    /// Class labels, in the order probabilities are returned.
    fn classes(&self) -> &[Severity];

    /// Per-class probabilities for each row.
    fn predict_proba(&self, rows: &[Vec<f64>]) -> Result<Vec<Vec<f64>>, ScoringError>;

    /// Most likely class for each row.
    fn predict(&self, rows: &[Vec<f64>]) -> Result<Vec<Severity>, ScoringError> {
        let classes = self.classes();
        self.predict_proba(rows)?
            .iter()
            .map(|probs| {
                argmax(probs)
                    .and_then(|i| classes.get(i).copied())
                    .ok_or_else(|| ScoringError::Model("empty probability row".to_string()))
            })
            .collect()
    }
}

/// Index of the largest value; the first one wins ties.
pub(crate) fn argmax(values: &[f64]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, value) in values.iter().enumerate() {
        match best {
            Some(b) if *value <= values[b] => {}
            _ => best = Some(i),
        }
    }
    best
}

/// Check that every row has the width the model expects.
pub(crate) fn check_rows(rows: &[Vec<f64>], expected: usize) -> Result<(), ScoringError> {
    match rows.iter().position(|r| r.len() != expected) {
        Some(row) => Err(ScoringError::RowWidth {
            row,
            found: rows[row].len(),
            expected,
        }),
        None => Ok(()),
    }
}
