//! Loadable severity model artifacts.
//!
//! Artifacts are JSON documents tagged with `kind`:
//!
//! ```json
//! {
//!   "kind": "linear",
//!   "feature_columns": ["reputation_score", "recency_days", "confidence=High"],
//!   "classes": ["Critical", "High", "Low", "Medium"],
//!   "weights": [[0.1, -0.1, 2.0], [0.05, 0.0, 1.0], [0.0, 0.0, 0.0], [0.02, 0.0, 0.0]],
//!   "bias": [-10.0, -5.0, 0.0, -2.0]
//! }
//! ```
//!
//! A `forest` artifact carries a list of trees instead; each tree is a flat
//! node array rooted at index 0.

use super::{check_rows, Classifier, ScoringError, Severity};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use tracing::info;

/// One node of a decision tree.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Node {
    /// Rows with `x[feature] <= threshold` go left.
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    /// Per-class weights (counts or fractions) at a leaf.
    Leaf { value: Vec<f64> },
}

/// A single decision tree.
#[derive(Debug, Clone, Deserialize)]
pub struct Tree {
    pub nodes: Vec<Node>,
}

impl Tree {
    fn validate(&self, features: usize, classes: usize) -> Result<(), String> {
        if self.nodes.is_empty() {
            return Err("tree has no nodes".to_string());
        }
        for (idx, node) in self.nodes.iter().enumerate() {
            match node {
                Node::Split {
                    feature,
                    left,
                    right,
                    ..
                } => {
                    if *feature >= features {
                        return Err(format!("node {} splits on missing feature {}", idx, feature));
                    }
                    // Children after parents rules out cycles.
                    for child in [*left, *right] {
                        if child <= idx || child >= self.nodes.len() {
                            return Err(format!("node {} has invalid child {}", idx, child));
                        }
                    }
                }
                Node::Leaf { value } => {
                    if value.len() != classes {
                        return Err(format!(
                            "leaf {} has {} values for {} classes",
                            idx,
                            value.len(),
                            classes
                        ));
                    }
                    if value.iter().any(|v| *v < 0.0) || value.iter().sum::<f64>() <= 0.0 {
                        return Err(format!("leaf {} has no positive weight", idx));
                    }
                }
            }
        }
        Ok(())
    }

    /// Normalized class distribution for one row.
    fn distribution(&self, row: &[f64]) -> Vec<f64> {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if row[*feature] <= *threshold { *left } else { *right };
                }
                Node::Leaf { value } => {
                    let total: f64 = value.iter().sum();
                    return value.iter().map(|v| v / total).collect();
                }
            }
        }
    }
}

/// Random-forest style ensemble: probabilities are the mean of the trees'
/// leaf distributions.
#[derive(Debug, Clone, Deserialize)]
pub struct ForestModel {
    pub feature_columns: Vec<String>,
    pub classes: Vec<Severity>,
    pub trees: Vec<Tree>,
}

impl ForestModel {
    fn validate(&self) -> Result<(), ScoringError> {
        if self.trees.is_empty() {
            return Err(ScoringError::Model("forest has no trees".to_string()));
        }
        for (i, tree) in self.trees.iter().enumerate() {
            tree.validate(self.feature_columns.len(), self.classes.len())
                .map_err(|e| ScoringError::Model(format!("tree {}: {}", i, e)))?;
        }
        Ok(())
    }
}

impl Classifier for ForestModel {
    fn feature_columns(&self) -> &[String] {
        &self.feature_columns
    }

    fn classes(&self) -> &[Severity] {
        &self.classes
    }

    fn predict_proba(&self, rows: &[Vec<f64>]) -> Result<Vec<Vec<f64>>, ScoringError> {
        check_rows(rows, self.feature_columns.len())?;
        let trees = self.trees.len() as f64;

        Ok(rows
            .iter()
            .map(|row| {
                let mut sum = vec![0.0; self.classes.len()];
                for tree in &self.trees {
                    for (acc, p) in sum.iter_mut().zip(tree.distribution(row)) {
                        *acc += p;
                    }
                }
                sum.into_iter().map(|s| s / trees).collect()
            })
            .collect())
    }
}

/// Multinomial logistic model: softmax over `weights · x + bias`.
#[derive(Debug, Clone, Deserialize)]
pub struct LinearModel {
    pub feature_columns: Vec<String>,
    pub classes: Vec<Severity>,
    /// One weight vector per class.
    pub weights: Vec<Vec<f64>>,
    /// One intercept per class.
    pub bias: Vec<f64>,
}

impl LinearModel {
    fn validate(&self) -> Result<(), ScoringError> {
        let classes = self.classes.len();
        if self.weights.len() != classes || self.bias.len() != classes {
            return Err(ScoringError::Model(format!(
                "{} classes but {} weight rows and {} biases",
                classes,
                self.weights.len(),
                self.bias.len()
            )));
        }
        if let Some(i) = self
            .weights
            .iter()
            .position(|w| w.len() != self.feature_columns.len())
        {
            return Err(ScoringError::Model(format!(
                "weight row {} has {} entries for {} features",
                i,
                self.weights[i].len(),
                self.feature_columns.len()
            )));
        }
        Ok(())
    }

    fn softmax(&self, row: &[f64]) -> Vec<f64> {
        let logits: Vec<f64> = self
            .weights
            .iter()
            .zip(&self.bias)
            .map(|(w, b)| w.iter().zip(row).map(|(w, x)| w * x).sum::<f64>() + b)
            .collect();
        let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let exps: Vec<f64> = logits.iter().map(|l| (l - max).exp()).collect();
        let total: f64 = exps.iter().sum();
        exps.into_iter().map(|e| e / total).collect()
    }
}

impl Classifier for LinearModel {
    fn feature_columns(&self) -> &[String] {
        &self.feature_columns
    }

    fn classes(&self) -> &[Severity] {
        &self.classes
    }

    fn predict_proba(&self, rows: &[Vec<f64>]) -> Result<Vec<Vec<f64>>, ScoringError> {
        check_rows(rows, self.feature_columns.len())?;
        Ok(rows.iter().map(|row| self.softmax(row)).collect())
    }
}

/// A model artifact as stored on disk.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ModelArtifact {
    Forest(ForestModel),
    Linear(LinearModel),
}

impl ModelArtifact {
    /// Parse and validate an artifact.
    pub fn from_json(json: &str) -> Result<Self, ScoringError> {
        let artifact: ModelArtifact = serde_json::from_str(json)?;
        artifact.validate()?;
        Ok(artifact)
    }

    /// Read, parse and validate an artifact file.
    pub fn load(path: &Path) -> Result<Self, ScoringError> {
        let json = std::fs::read_to_string(path).map_err(|source| ScoringError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let artifact = Self::from_json(&json)?;
        let classifier = artifact.classifier();
        info!(
            path = %path.display(),
            kind = artifact.kind(),
            features = classifier.feature_columns().len(),
            classes = classifier.classes().len(),
            "Severity model loaded"
        );
        Ok(artifact)
    }

    /// Artifact kind, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ModelArtifact::Forest(_) => "forest",
            ModelArtifact::Linear(_) => "linear",
        }
    }

    /// The artifact as a classifier.
    pub fn classifier(&self) -> &dyn Classifier {
        match self {
            ModelArtifact::Forest(m) => m,
            ModelArtifact::Linear(m) => m,
        }
    }

    /// Take ownership of the classifier.
    pub fn into_classifier(self) -> Box<dyn Classifier> {
        match self {
            ModelArtifact::Forest(m) => Box::new(m),
            ModelArtifact::Linear(m) => Box::new(m),
        }
    }

    fn validate(&self) -> Result<(), ScoringError> {
        let classifier = self.classifier();
        let mut seen = HashSet::new();
        if let Some(dup) = classifier.classes().iter().find(|c| !seen.insert(**c)) {
            return Err(ScoringError::Model(format!("class {} listed twice", dup)));
        }
        match self {
            ModelArtifact::Forest(m) => m.validate(),
            ModelArtifact::Linear(m) => m.validate(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const FOREST: &str = r#"{
        "kind": "forest",
        "feature_columns": ["reputation_score", "recency_days"],
        "classes": ["Critical", "High", "Low", "Medium"],
        "trees": [
            {"nodes": [
                {"feature": 0, "threshold": 80.0, "left": 1, "right": 2},
                {"value": [0.0, 0.0, 3.0, 1.0]},
                {"value": [6.0, 2.0, 0.0, 0.0]}
            ]},
            {"nodes": [
                {"feature": 1, "threshold": 7.0, "left": 1, "right": 2},
                {"value": [1.0, 1.0, 0.0, 0.0]},
                {"value": [0.0, 0.0, 1.0, 1.0]}
            ]}
        ]
    }"#;

    #[test]
    fn test_forest_probabilities() {
        let artifact = ModelArtifact::from_json(FOREST).unwrap();
        let model = artifact.classifier();

        let proba = model.predict_proba(&[vec![90.0, 3.0], vec![50.0, 20.0]]).unwrap();
        // Tree 1: [0.75, 0.25, 0, 0]; tree 2: [0.5, 0.5, 0, 0].
        assert_eq!(proba[0], vec![0.625, 0.375, 0.0, 0.0]);
        // Tree 1: [0, 0, 0.75, 0.25]; tree 2: [0, 0, 0.5, 0.5].
        assert_eq!(proba[1], vec![0.0, 0.0, 0.625, 0.375]);

        let labels = model.predict(&[vec![90.0, 3.0], vec![50.0, 20.0]]).unwrap();
        assert_eq!(labels, vec![Severity::Critical, Severity::Low]);
    }

    #[test]
    fn test_linear_probabilities_sum_to_one() {
        let json = r#"{
            "kind": "linear",
            "feature_columns": ["reputation_score", "recency_days"],
            "classes": ["Low", "High"],
            "weights": [[0.0, 0.0], [0.1, -0.2]],
            "bias": [0.0, -5.0]
        }"#;
        let artifact = ModelArtifact::from_json(json).unwrap();
        assert_eq!(artifact.kind(), "linear");

        let model = artifact.into_classifier();
        let proba = model.predict_proba(&[vec![100.0, 2.0], vec![10.0, 30.0]]).unwrap();
        for row in &proba {
            assert!((row.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        }
        assert_eq!(
            model.predict(&[vec![100.0, 2.0], vec![10.0, 30.0]]).unwrap(),
            vec![Severity::High, Severity::Low]
        );
    }

    #[test]
    fn test_row_width_is_checked() {
        let model = ModelArtifact::from_json(FOREST).unwrap().into_classifier();
        assert!(matches!(
            model.predict_proba(&[vec![1.0]]),
            Err(ScoringError::RowWidth { .. })
        ));
    }

    #[test]
    fn test_invalid_artifacts() {
        let cyclic = r#"{
            "kind": "forest",
            "feature_columns": ["reputation_score"],
            "classes": ["Low"],
            "trees": [{"nodes": [{"feature": 0, "threshold": 1.0, "left": 0, "right": 0}]}]
        }"#;
        assert!(matches!(ModelArtifact::from_json(cyclic), Err(ScoringError::Model(_))));

        let short_leaf = r#"{
            "kind": "forest",
            "feature_columns": ["reputation_score"],
            "classes": ["Low", "High"],
            "trees": [{"nodes": [{"value": [1.0]}]}]
        }"#;
        assert!(matches!(ModelArtifact::from_json(short_leaf), Err(ScoringError::Model(_))));

        let ragged = r#"{
            "kind": "linear",
            "feature_columns": ["reputation_score", "recency_days"],
            "classes": ["Low", "High"],
            "weights": [[0.0, 0.0], [0.1]],
            "bias": [0.0, 0.0]
        }"#;
        assert!(matches!(ModelArtifact::from_json(ragged), Err(ScoringError::Model(_))));

        let duplicate_class = r#"{
            "kind": "linear",
            "feature_columns": ["reputation_score"],
            "classes": ["High", "High"],
            "weights": [[0.0], [0.1]],
            "bias": [0.0, 0.0]
        }"#;
        assert!(matches!(ModelArtifact::from_json(duplicate_class), Err(ScoringError::Model(_))));

        assert!(matches!(
            ModelArtifact::from_json(r#"{"kind": "svm"}"#),
            Err(ScoringError::Json(_))
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let err = ModelArtifact::load(Path::new("/nonexistent/model.json")).unwrap_err();
        assert!(matches!(err, ScoringError::Io { .. }));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(FOREST.as_bytes()).unwrap();
        file.flush().unwrap();

        let artifact = ModelArtifact::load(file.path()).unwrap();
        assert_eq!(artifact.kind(), "forest");
        assert_eq!(artifact.classifier().classes().len(), 4);
    }

    #[test]
    fn test_bundled_model_is_valid() {
        let json = include_str!("../../models/threat_scorer.json");
        let artifact = ModelArtifact::from_json(json).unwrap();
        let model = artifact.classifier();
        assert!(crate::scoring::FeatureEncoder::new(model.feature_columns()).is_ok());
        assert!(model.classes().contains(&Severity::Critical));
        assert!(model.classes().contains(&Severity::High));
    }
}
