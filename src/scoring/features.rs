//! Feature encoding for the severity model.
//!
//! Column names follow one convention: the two numeric columns are
//! `reputation_score` and `recency_days`, and every categorical value the
//! model was trained on gets an indicator column `threat_type=<Value>` or
//! `confidence=<Value>`.

use super::ScoringError;
use crate::context::{Confidence, ThreatContext, ThreatType};
use std::collections::HashSet;

pub const REPUTATION_COLUMN: &str = "reputation_score";
pub const RECENCY_COLUMN: &str = "recency_days";
pub const THREAT_TYPE_PREFIX: &str = "threat_type=";
pub const CONFIDENCE_PREFIX: &str = "confidence=";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Column {
    Reputation,
    Recency,
    ThreatType(ThreatType),
    Confidence(Confidence),
}

impl Column {
    fn parse(name: &str) -> Option<Self> {
        if name == REPUTATION_COLUMN {
            Some(Column::Reputation)
        } else if name == RECENCY_COLUMN {
            Some(Column::Recency)
        } else if let Some(value) = name.strip_prefix(THREAT_TYPE_PREFIX) {
            value.parse().ok().map(Column::ThreatType)
        } else if let Some(value) = name.strip_prefix(CONFIDENCE_PREFIX) {
            value.parse().ok().map(Column::Confidence)
        } else {
            None
        }
    }

    fn value(&self, context: &ThreatContext) -> f64 {
        let indicator = |hit: bool| if hit { 1.0 } else { 0.0 };
        match self {
            Column::Reputation => f64::from(context.reputation_score),
            Column::Recency => f64::from(context.recency_days),
            Column::ThreatType(t) => indicator(*t == context.threat_type),
            Column::Confidence(c) => indicator(*c == context.confidence),
        }
    }
}

/// Turns threat context into feature rows in the model's column order.
#[derive(Debug, Clone)]
pub struct FeatureEncoder {
    columns: Vec<Column>,
}

impl FeatureEncoder {
    /// Build an encoder for a model's column list.
    ///
    /// Fails on any column the engine cannot produce, on repeated columns,
    /// and when either numeric column is absent. The engine never guesses
    /// alignment.
    pub fn new(columns: &[String]) -> Result<Self, ScoringError> {
        let mut seen = HashSet::new();
        let mut parsed = Vec::with_capacity(columns.len());

        for name in columns {
            if !seen.insert(name.as_str()) {
                return Err(ScoringError::DuplicateColumn(name.clone()));
            }
            let column = Column::parse(name).ok_or_else(|| ScoringError::UnknownColumn(name.clone()))?;
            parsed.push(column);
        }

        for (required, column) in [
            (REPUTATION_COLUMN, Column::Reputation),
            (RECENCY_COLUMN, Column::Recency),
        ] {
            if !parsed.contains(&column) {
                return Err(ScoringError::MissingColumn(required));
            }
        }

        Ok(Self { columns: parsed })
    }

    /// Every column the engine can produce, in canonical order.
    pub fn standard_columns() -> Vec<String> {
        let mut columns = vec![REPUTATION_COLUMN.to_string(), RECENCY_COLUMN.to_string()];
        columns.extend(
            ThreatType::ALL
                .iter()
                .map(|t| format!("{}{}", THREAT_TYPE_PREFIX, t)),
        );
        columns.extend(
            Confidence::ALL
                .iter()
                .map(|c| format!("{}{}", CONFIDENCE_PREFIX, c)),
        );
        columns
    }

    /// Number of columns per row.
    pub fn width(&self) -> usize {
        self.columns.len()
    }

    /// Encode one record.
    pub fn encode(&self, context: &ThreatContext) -> Vec<f64> {
        self.columns.iter().map(|c| c.value(context)).collect()
    }
}
