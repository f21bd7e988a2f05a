//! Scoring model loading and inference.
//!
//! The scorer is an external collaborator: anything that implements
//! [`Scorer`] can sit behind the decision layer. [`ForestModel`] is the
//! bundled implementation, a random forest exported to JSON together with
//! the standard scaler and field order it was trained with:
//!
//! ```json
//! {
//!   "schema_version": 2,
//!   "feature_names": ["num_class_files", "..."],
//!   "classes": [0, 1],
//!   "scaler": { "mean": [0.0], "scale": [1.0] },
//!   "trees": [
//!     { "nodes": [
//!       { "feature": 0, "threshold": 0.5, "left": 1, "right": 2 },
//!       { "value": [9.0, 1.0] },
//!       { "value": [2.0, 8.0] }
//!     ] }
//!   ]
//! }
//! ```

use std::fs;
use std::path::Path;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{Result, ScanError};
use crate::features::{FeatureVector, SCHEMA_VERSION};
use crate::verdict::{Label, ModelOutput};

/// Class id the training data used for malicious samples.
const MALICIOUS_CLASS: u8 = 1;

pub trait Scorer: Send + Sync {
    /// Field names in the order the model was trained on.
    fn expected_features(&self) -> &[String];

    /// Score one vector.
    fn score(&self, features: &FeatureVector) -> Result<ModelOutput>;
}

#[derive(Debug, Clone, Deserialize)]
pub struct StandardScaler {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

impl StandardScaler {
    fn transform(&self, values: &mut [f64]) {
        for ((v, mean), scale) in values.iter_mut().zip(&self.mean).zip(&self.scale) {
            let scale = if *scale == 0.0 { 1.0 } else { *scale };
            *v = (*v - mean) / scale;
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TreeNode {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        value: Vec<f64>,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct DecisionTree {
    pub nodes: Vec<TreeNode>,
}

impl DecisionTree {
    /// Per-class weights of the leaf `x` lands in.
    fn leaf(&self, x: &[f64]) -> &[f64] {
        let mut idx = 0;
        // Depth is bounded by the node count; validation rules out cycles
        // beyond that.
        for _ in 0..=self.nodes.len() {
            match &self.nodes[idx] {
                TreeNode::Leaf { value } => return value,
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if x[*feature] <= *threshold { *left } else { *right };
                }
            }
        }
        &[]
    }

    fn validate(&self, n_features: usize, n_classes: usize) -> std::result::Result<(), String> {
        if self.nodes.is_empty() {
            return Err("tree has no nodes".into());
        }
        for (i, node) in self.nodes.iter().enumerate() {
            match node {
                TreeNode::Split {
                    feature,
                    left,
                    right,
                    threshold,
                } => {
                    if *feature >= n_features {
                        return Err(format!("node {i} splits on unknown feature {feature}"));
                    }
                    // Children must come after their parent, which also rules out cycles.
                    let n = self.nodes.len();
                    if *left <= i || *right <= i || *left >= n || *right >= n {
                        return Err(format!("node {i} has invalid children {left}/{right}"));
                    }
                    if !threshold.is_finite() {
                        return Err(format!("node {i} has a non-finite threshold"));
                    }
                }
                TreeNode::Leaf { value } => {
                    if value.len() != n_classes {
                        return Err(format!(
                            "leaf {i} has {} class weights, expected {n_classes}",
                            value.len()
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

/// A random-forest classifier with its scaler and field order.
#[derive(Debug, Clone, Deserialize)]
pub struct ForestModel {
    /// Feature schema version the model was trained against, if recorded.
    #[serde(default)]
    pub schema_version: Option<u32>,
    pub feature_names: Vec<String>,
    pub classes: Vec<u8>,
    pub scaler: StandardScaler,
    #[serde(default)]
    pub trees: Vec<DecisionTree>,
}

impl ForestModel {
    /// Load and validate a model file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)?;
        let model = Self::from_json(&data)?;
        debug!(
            "loaded model {} ({} trees, {} features)",
            path.display(),
            model.trees.len(),
            model.feature_names.len()
        );
        Ok(model)
    }

    pub fn from_json(data: &str) -> Result<Self> {
        let model: ForestModel =
            serde_json::from_str(data).map_err(|e| ScanError::model(e.to_string()))?;
        model.validate()?;
        if let Some(drift) = model.schema_drift() {
            warn!("{drift}");
        }
        Ok(model)
    }

    /// How the model's field list differs from the extractor's schema.
    pub fn schema_drift(&self) -> Option<ScanError> {
        FeatureVector::zeroed().project(&self.feature_names).mismatch()
    }

    fn validate(&self) -> Result<()> {
        if let Some(version) = self.schema_version {
            if version != SCHEMA_VERSION {
                return Err(ScanError::model(format!(
                    "trained on feature schema v{version}, extractor produces v{SCHEMA_VERSION}"
                )));
            }
        }
        let n = self.feature_names.len();
        if self.classes.is_empty() {
            return Err(ScanError::model("model has no classes"));
        }
        if self.scaler.mean.len() != n || self.scaler.scale.len() != n {
            return Err(ScanError::model(format!(
                "scaler covers {}/{} values for {n} features",
                self.scaler.mean.len(),
                self.scaler.scale.len()
            )));
        }
        if self.classes.len() > 1 {
            if !self.classes.contains(&MALICIOUS_CLASS) {
                return Err(ScanError::model("no malicious class"));
            }
            if self.trees.is_empty() {
                return Err(ScanError::model("model has no trees"));
            }
        }
        for (i, tree) in self.trees.iter().enumerate() {
            tree.validate(n, self.classes.len())
                .map_err(|e| ScanError::model(format!("tree {i}: {e}")))?;
        }
        Ok(())
    }

    /// The label a single-class model always predicts.
    fn only_class(&self) -> Option<Label> {
        match self.classes.as_slice() {
            [only] if *only == MALICIOUS_CLASS => Some(Label::Malicious),
            [_] => Some(Label::Safe),
            _ => None,
        }
    }

    /// Mean malicious-class share over all trees.
    fn predict_proba(&self, x: &[f64]) -> f64 {
        let Some(class_idx) = self.classes.iter().position(|c| *c == MALICIOUS_CLASS) else {
            return 0.0;
        };
        let total: f64 = self
            .trees
            .iter()
            .map(|tree| {
                let leaf = tree.leaf(x);
                let sum: f64 = leaf.iter().sum();
                if sum > 0.0 {
                    leaf.get(class_idx).copied().unwrap_or(0.0) / sum
                } else {
                    0.0
                }
            })
            .sum();
        total / self.trees.len() as f64
    }
}

impl Scorer for ForestModel {
    fn expected_features(&self) -> &[String] {
        &self.feature_names
    }

    fn score(&self, features: &FeatureVector) -> Result<ModelOutput> {
        if let Some(label) = self.only_class() {
            return Ok(ModelOutput::SingleClass(label));
        }

        let mut x = features.project(&self.feature_names).values;
        self.scaler.transform(&mut x);
        Ok(ModelOutput::Probability(self.predict_proba(&x)))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::features::{Feature, FeatureVectorBuilder, FEATURE_COUNT};

    /// Two stumps over `discord_webhook` and `base64_usage`, unscaled.
    pub(crate) const STUMP_MODEL: &str = r#"{
        "feature_names": ["discord_webhook", "base64_usage", "legacy_size_kb"],
        "classes": [0, 1],
        "scaler": { "mean": [0.0, 0.0, 0.0], "scale": [1.0, 1.0, 0.0] },
        "trees": [
            { "nodes": [
                { "feature": 0, "threshold": 0.5, "left": 1, "right": 2 },
                { "value": [10.0, 0.0] },
                { "value": [0.0, 10.0] }
            ] },
            { "nodes": [
                { "feature": 1, "threshold": 2.5, "left": 1, "right": 2 },
                { "value": [3.0, 1.0] },
                { "value": [1.0, 3.0] }
            ] }
        ]
    }"#;

    #[test]
    fn forest_averages_tree_probabilities() {
        let model = ForestModel::from_json(STUMP_MODEL).unwrap();
        let clean = FeatureVector::zeroed();
        assert_eq!(
            model.score(&clean).unwrap(),
            ModelOutput::Probability((0.0 + 0.25) / 2.0)
        );

        let bad = FeatureVectorBuilder::new()
            .flag(Feature::DiscordWebhook, true)
            .count(Feature::Base64Usage, 5)
            .build();
        assert_eq!(
            model.score(&bad).unwrap(),
            ModelOutput::Probability((1.0 + 0.75) / 2.0)
        );
    }

    #[test]
    fn scaler_is_applied_before_splits() {
        let json = r#"{
            "feature_names": ["total_classes"],
            "classes": [0, 1],
            "scaler": { "mean": [10.0], "scale": [5.0] },
            "trees": [ { "nodes": [
                { "feature": 0, "threshold": 0.0, "left": 1, "right": 2 },
                { "value": [1.0, 0.0] },
                { "value": [0.0, 1.0] }
            ] } ]
        }"#;
        let model = ForestModel::from_json(json).unwrap();
        let few = FeatureVectorBuilder::new().count(Feature::TotalClasses, 5).build();
        let many = FeatureVectorBuilder::new().count(Feature::TotalClasses, 20).build();
        assert_eq!(model.score(&few).unwrap(), ModelOutput::Probability(0.0));
        assert_eq!(model.score(&many).unwrap(), ModelOutput::Probability(1.0));
    }

    #[test]
    fn single_class_model_is_flagged() {
        let json = r#"{
            "feature_names": [],
            "classes": [1],
            "scaler": { "mean": [], "scale": [] }
        }"#;
        let model = ForestModel::from_json(json).unwrap();
        assert_eq!(
            model.score(&FeatureVector::zeroed()).unwrap(),
            ModelOutput::SingleClass(Label::Malicious)
        );
    }

    #[test]
    fn rejects_out_of_range_children() {
        let json = r#"{
            "feature_names": ["a"],
            "classes": [0, 1],
            "scaler": { "mean": [0.0], "scale": [1.0] },
            "trees": [ { "nodes": [
                { "feature": 0, "threshold": 0.0, "left": 1, "right": 7 },
                { "value": [1.0, 0.0] }
            ] } ]
        }"#;
        let err = ForestModel::from_json(json).unwrap_err();
        assert!(err.to_string().contains("invalid children"));
    }

    #[test]
    fn rejects_backward_edges() {
        let json = r#"{
            "feature_names": ["a"],
            "classes": [0, 1],
            "scaler": { "mean": [0.0], "scale": [1.0] },
            "trees": [ { "nodes": [
                { "value": [1.0, 0.0] },
                { "feature": 0, "threshold": 0.0, "left": 0, "right": 1 }
            ] } ]
        }"#;
        assert!(ForestModel::from_json(json).is_err());
    }

    #[test]
    fn rejects_scaler_length_mismatch() {
        let json = r#"{
            "feature_names": ["a", "b"],
            "classes": [0, 1],
            "scaler": { "mean": [0.0], "scale": [1.0] },
            "trees": [ { "nodes": [ { "value": [1.0, 0.0] } ] } ]
        }"#;
        assert!(matches!(
            ForestModel::from_json(json),
            Err(ScanError::Model { .. })
        ));
    }

    #[test]
    fn drift_reports_missing_and_dropped_fields() {
        let model = ForestModel::from_json(STUMP_MODEL).unwrap();
        match model.schema_drift() {
            Some(ScanError::SchemaMismatch { missing, extra }) => {
                assert_eq!(missing, vec!["legacy_size_kb".to_string()]);
                assert_eq!(extra.len(), FEATURE_COUNT - 2);
                assert!(extra.contains(&"entropy_score".to_string()));
            }
            other => panic!("expected schema mismatch, got {other:?}"),
        }
    }

    #[test]
    fn model_using_a_subset_still_reports_drops() {
        let json = r#"{
            "feature_names": ["discord_webhook"],
            "classes": [0, 1],
            "scaler": { "mean": [0.0], "scale": [1.0] },
            "trees": [ { "nodes": [ { "value": [1.0, 1.0] } ] } ]
        }"#;
        let model = ForestModel::from_json(json).unwrap();
        match model.schema_drift() {
            Some(ScanError::SchemaMismatch { missing, extra }) => {
                assert!(missing.is_empty());
                assert_eq!(extra.len(), FEATURE_COUNT - 1);
            }
            other => panic!("expected schema mismatch, got {other:?}"),
        }
    }

    #[test]
    fn full_schema_model_has_no_drift() {
        let names: Vec<String> = Feature::ALL.iter().map(|f| f.name().to_string()).collect();
        let model = ForestModel {
            schema_version: Some(SCHEMA_VERSION),
            feature_names: names,
            classes: vec![1],
            scaler: StandardScaler {
                mean: vec![0.0; FEATURE_COUNT],
                scale: vec![1.0; FEATURE_COUNT],
            },
            trees: Vec::new(),
        };
        assert!(model.validate().is_ok());
        assert!(model.schema_drift().is_none());
    }

    #[test]
    fn rejects_other_schema_version() {
        let json = r#"{
            "schema_version": 1,
            "feature_names": [],
            "classes": [0],
            "scaler": { "mean": [], "scale": [] }
        }"#;
        let err = ForestModel::from_json(json).unwrap_err();
        assert!(err.to_string().contains("schema v1"));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        fs::write(&path, STUMP_MODEL).unwrap();
        let model = ForestModel::load(&path).unwrap();
        assert_eq!(model.expected_features().len(), 3);
    }
}
