//! Severity scorer.

use super::{Classifier, FeatureEncoder, ScoredRecord, ScoringError, Severity};
use crate::context::MatchRecord;
use std::sync::Arc;
use tracing::{debug, info};

/// Priority from class probabilities: `100 * P(Critical) + 50 * P(High)`.
///
/// Medium and Low probability mass does not contribute and the result is not
/// normalized. Downstream consumers rely on this exact scale.
pub fn priority_score(p_critical: f64, p_high: f64) -> f64 {
    100.0 * p_critical + 50.0 * p_high
}

/// Assigns a severity and a priority to each match record.
///
/// The column layout is checked once at construction; a scorer that exists
/// always produces rows the model accepts.
pub struct SeverityScorer {
    model: Arc<dyn Classifier>,
    encoder: FeatureEncoder,
    critical: usize,
    high: usize,
}

impl std::fmt::Debug for SeverityScorer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeverityScorer")
            .field("columns", &self.model.feature_columns())
            .field("classes", &self.model.classes())
            .finish()
    }
}

impl SeverityScorer {
    /// Bind a scorer to a model.
    pub fn new(model: Arc<dyn Classifier>) -> Result<Self, ScoringError> {
        let encoder = FeatureEncoder::new(model.feature_columns())?;
        let class_index = |wanted: Severity| {
            model
                .classes()
                .iter()
                .position(|c| *c == wanted)
                .ok_or(ScoringError::MissingClass(wanted))
        };
        let critical = class_index(Severity::Critical)?;
        let high = class_index(Severity::High)?;

        Ok(Self {
            model,
            encoder,
            critical,
            high,
        })
    }

    /// Score a batch of records with one model call.
    pub fn score(&self, records: Vec<MatchRecord>) -> Result<Vec<ScoredRecord>, ScoringError> {
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let rows: Vec<Vec<f64>> = records.iter().map(|r| self.encoder.encode(&r.context)).collect();
        let probabilities = self.model.predict_proba(&rows)?;
        let labels = self.model.predict(&rows)?;

        for found in [probabilities.len(), labels.len()] {
            if found != records.len() {
                return Err(ScoringError::BatchSize {
                    found,
                    expected: records.len(),
                });
            }
        }

        let classes = self.model.classes().len();
        let scored = records
            .into_iter()
            .zip(probabilities)
            .zip(labels)
            .enumerate()
            .map(|(row, ((record, probs), severity))| {
                if probs.len() != classes {
                    return Err(ScoringError::Model(format!(
                        "row {} has {} probabilities for {} classes",
                        row,
                        probs.len(),
                        classes
                    )));
                }
                let priority_score = priority_score(probs[self.critical], probs[self.high]);
                debug!(
                    ip = %record.ip,
                    severity = %severity,
                    priority = priority_score,
                    "Record scored"
                );
                Ok(ScoredRecord {
                    record,
                    severity,
                    priority_score,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        info!(records = scored.len(), "Severity scoring complete");
        Ok(scored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Confidence, ThreatContext, ThreatType};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Returns the same distribution for every row and counts batches.
    struct FixedModel {
        columns: Vec<String>,
        classes: Vec<Severity>,
        probs: Vec<f64>,
        batches: AtomicUsize,
    }

    impl FixedModel {
        fn new(classes: Vec<Severity>, probs: Vec<f64>) -> Self {
            Self {
                columns: FeatureEncoder::standard_columns(),
                classes,
                probs,
                batches: AtomicUsize::new(0),
            }
        }
    }

    impl Classifier for FixedModel {
        fn feature_columns(&self) -> &[String] {
            &self.columns
        }

        fn classes(&self) -> &[Severity] {
            &self.classes
        }

        fn predict_proba(&self, rows: &[Vec<f64>]) -> Result<Vec<Vec<f64>>, ScoringError> {
            self.batches.fetch_add(1, Ordering::SeqCst);
            Ok(rows.iter().map(|_| self.probs.clone()).collect())
        }
    }

    fn record(last_octet: u8) -> MatchRecord {
        MatchRecord {
            ip: std::net::IpAddr::from([1, 186, 20, last_octet]),
            context: ThreatContext {
                reputation_score: 95,
                recency_days: 2,
                threat_type: ThreatType::Malware,
                confidence: Confidence::High,
            },
        }
    }

    #[test]
    fn test_priority_formula_is_exact() {
        assert_eq!(priority_score(0.6, 0.3), 75.0);
        assert_eq!(priority_score(0.0, 0.0), 0.0);
        assert_eq!(priority_score(1.0, 0.0), 100.0);
    }

    #[test]
    fn test_score_uses_model_class_order() {
        // Alphabetical, as many training libraries emit them.
        let model = Arc::new(FixedModel::new(
            vec![Severity::Critical, Severity::High, Severity::Low, Severity::Medium],
            vec![0.6, 0.3, 0.0, 0.1],
        ));
        let scorer = SeverityScorer::new(model).unwrap();

        let scored = scorer.score(vec![record(106)]).unwrap();
        assert_eq!(scored.len(), 1);
        assert_eq!(scored[0].priority_score, 75.0);
        assert_eq!(scored[0].severity, Severity::Critical);
        assert_eq!(scored[0].record, record(106));
    }

    #[test]
    fn test_severity_is_independent_of_priority() {
        // Medium wins the arg-max but contributes nothing to priority.
        let model = Arc::new(FixedModel::new(
            vec![Severity::Low, Severity::Medium, Severity::High, Severity::Critical],
            vec![0.1, 0.5, 0.2, 0.2],
        ));
        let scored = SeverityScorer::new(model).unwrap().score(vec![record(1)]).unwrap();
        assert_eq!(scored[0].severity, Severity::Medium);
        assert!((scored[0].priority_score - 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_single_batch_per_call() {
        let model = Arc::new(FixedModel::new(
            vec![Severity::Critical, Severity::High],
            vec![0.5, 0.5],
        ));
        let scorer = SeverityScorer::new(model.clone()).unwrap();
        scorer.score((1..=20).map(record).collect()).unwrap();
        // predict_proba once directly, once through the default predict.
        assert_eq!(model.batches.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_empty_batch_skips_model() {
        let model = Arc::new(FixedModel::new(
            vec![Severity::Critical, Severity::High],
            vec![0.5, 0.5],
        ));
        let scorer = SeverityScorer::new(model.clone()).unwrap();
        assert!(scorer.score(Vec::new()).unwrap().is_empty());
        assert_eq!(model.batches.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_missing_class_is_fatal() {
        let model = Arc::new(FixedModel::new(vec![Severity::Critical, Severity::Low], vec![0.5, 0.5]));
        assert!(matches!(
            SeverityScorer::new(model),
            Err(ScoringError::MissingClass(Severity::High))
        ));
    }

    #[test]
    fn test_schema_mismatch_is_fatal() {
        let mut model = FixedModel::new(vec![Severity::Critical, Severity::High], vec![0.5, 0.5]);
        model.columns.push("country".to_string());
        assert!(matches!(
            SeverityScorer::new(Arc::new(model)),
            Err(ScoringError::UnknownColumn(_))
        ));
    }

    #[test]
    fn test_wrong_probability_width_is_fatal() {
        let model = Arc::new(FixedModel::new(
            vec![Severity::Critical, Severity::High, Severity::Low],
            vec![0.5, 0.5],
        ));
        let scorer = SeverityScorer::new(model).unwrap();
        assert!(matches!(scorer.score(vec![record(1)]), Err(ScoringError::Model(_))));
    }
}
