//! Decision fusion: model output plus legitimacy evidence to a verdict.

use std::fmt;

use serde::{Deserialize, Serialize, Serializer};

use crate::error::{Result, ScanError};
use crate::features::{Feature, FeatureVector};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Label {
    Safe,
    Malicious,
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Label::Safe => f.write_str("safe"),
            Label::Malicious => f.write_str("malicious"),
        }
    }
}

/// What a scorer returns for one vector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ModelOutput {
    /// Probability of the malicious class.
    Probability(f64),
    /// The model only ever saw one label, so its answer is fixed.
    SingleClass(Label),
}

/// Policy constants for the decision. Configuration, not derived values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecisionPolicy {
    /// Probabilities strictly above this are malicious.
    pub threshold: f64,
    /// The legitimacy override only applies below this probability.
    pub override_ceiling: f64,
}

impl Default for DecisionPolicy {
    fn default() -> Self {
        Self {
            threshold: 0.7,
            override_ceiling: 0.98,
        }
    }
}

impl DecisionPolicy {
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("threshold", self.threshold),
            ("override_ceiling", self.override_ceiling),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ScanError::config(format!(
                    "{name} must be within [0, 1], got {value}"
                )));
            }
        }
        Ok(())
    }

    /// Fuse a model output with the vector's legitimacy signals.
    pub fn decide(&self, features: &FeatureVector, output: ModelOutput) -> Verdict {
        let probability = match output {
            ModelOutput::SingleClass(Label::Malicious) => 1.0,
            ModelOutput::SingleClass(Label::Safe) => 0.0,
            ModelOutput::Probability(p) if p.is_finite() => p.clamp(0.0, 1.0),
            ModelOutput::Probability(_) => 0.0,
        };

        let label = if self.legitimacy_override(features, probability) {
            Label::Safe
        } else if probability > self.threshold {
            Label::Malicious
        } else {
            Label::Safe
        };

        Verdict { label, probability }
    }

    /// Strong structural evidence of a genuine mod outweighs a moderately
    /// elevated score, never an almost-certain one, and never a live webhook.
    pub fn legitimacy_override(&self, features: &FeatureVector, probability: f64) -> bool {
        features.get(Feature::HasModMetadata) > 0.0
            && features.get(Feature::MinecraftApiUsage) > 0.0
            && features.get(Feature::LegitimateConnections) > 0.0
            && features.get(Feature::DiscordWebhook) == 0.0
            && probability < self.override_ceiling
    }
}

/// Final label and malicious probability for one scan.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Verdict {
    pub label: Label,
    #[serde(serialize_with = "serialize_rounded")]
    pub probability: f64,
}

impl Verdict {
    /// The verdict for input that could not be read at all.
    pub fn unreadable() -> Self {
        Self {
            label: Label::Safe,
            probability: 0.0,
        }
    }

    pub fn is_malicious(&self) -> bool {
        self.label == Label::Malicious
    }
}

fn round4(p: f64) -> f64 {
    (p * 10_000.0).round() / 10_000.0
}

pub(crate) fn serialize_rounded<S: Serializer>(
    p: &f64,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_f64(round4(*p))
}
