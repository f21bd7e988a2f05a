//! Feature vector schema and assembly.
//!
//! The schema is closed: [`Feature`] enumerates every field the scoring model
//! knows, in the model's training order, and [`FeatureVector`] stores exactly
//! one finite value per variant. There is no way to insert an ad hoc key.
//!
//! Assembly merges the walker's counts, the pattern report, the legitimacy
//! signals, and the text statistics. Anything a stage did not produce stays
//! at zero.

use std::fmt;

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use tracing::warn;

use crate::archive::{ArchiveContent, ContentSource};
use crate::entropy::{code_structure, shannon_entropy, CodeStructure};
use crate::error::ScanError;
use crate::patterns::{legitimacy_signals, match_patterns, LegitimacySignals, PatternReport};

/// Bumped whenever a field is added, removed, renamed, or reordered.
pub const SCHEMA_VERSION: u32 = 2;

macro_rules! schema {
    ($($variant:ident => $name:literal,)+) => {
        /// One named field of the feature schema.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Feature {
            $($variant,)+
        }

        impl Feature {
            /// Every field, in schema order.
            pub const ALL: &'static [Feature] = &[$(Feature::$variant,)+];

            /// The field name agreed with the scoring model.
            pub const fn name(self) -> &'static str {
                match self {
                    $(Feature::$variant => $name,)+
                }
            }
        }
    };
}

schema! {
    NumClassFiles => "num_class_files",
    NumFilesTotal => "num_files_total",
    FilenameLength => "filename_length",
    HasDatFile => "has_dat_file",
    ClassToTotalRatio => "class_to_total_ratio",
    EntropyScore => "entropy_score",
    DiscordWebhook => "discord_webhook",
    SuspiciousUrls => "suspicious_urls",
    LegitimateConnections => "legitimate_connections",
    DataCollectionPatterns => "data_collection_patterns",
    TokenAccessPatterns => "token_access_patterns",
    HttpOperationsCount => "http_operations_count",
    Base64Usage => "base64_usage",
    NetworkToGameRatio => "network_to_game_ratio",
    AvgClassNameLength => "avg_class_name_length",
    AvgMethodNameLength => "avg_method_name_length",
    ShortClassNamesRatio => "short_class_names_ratio",
    ShortMethodNamesRatio => "short_method_names_ratio",
    TotalClasses => "total_classes",
    TotalMethods => "total_methods",
    HasModMetadata => "has_mod_metadata",
    MinecraftApiUsage => "minecraft_api_usage",
    ObfuscationTools => "obfuscation_tools",
    SuspiciousFileOperations => "suspicious_file_operations",
    FilenameEntropy => "filename_entropy",
    UsesReflection => "uses_reflection",
    ExecutesCommands => "executes_commands",
    Func111286B => "func_111286_b",
    DiscordHomoglyph => "discòrd",
    RequestV2 => "requestv2",
}

pub const FEATURE_COUNT: usize = Feature::ALL.len();

impl Feature {
    pub fn from_name(name: &str) -> Option<Feature> {
        Feature::ALL.iter().copied().find(|f| f.name() == name)
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A complete, finite value for every schema field.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    values: [f64; FEATURE_COUNT],
}

impl FeatureVector {
    /// The vector reported for unreadable input: every field present, all zero.
    pub fn zeroed() -> Self {
        Self {
            values: [0.0; FEATURE_COUNT],
        }
    }

    pub fn get(&self, feature: Feature) -> f64 {
        self.values[feature.index()]
    }

    /// Look a field up by its schema name.
    pub fn value_of(&self, name: &str) -> Option<f64> {
        Feature::from_name(name).map(|f| self.get(f))
    }

    pub fn iter(&self) -> impl Iterator<Item = (Feature, f64)> + '_ {
        Feature::ALL.iter().map(move |&f| (f, self.get(f)))
    }

    pub fn is_zero(&self) -> bool {
        self.values.iter().all(|v| *v == 0.0)
    }

    /// Values in the order a scorer expects, zero-filling names this schema
    /// does not have and dropping schema fields the scorer does not list.
    pub fn project(&self, expected: &[String]) -> Projection {
        let mut values = Vec::with_capacity(expected.len());
        let mut missing = Vec::new();
        for name in expected {
            match self.value_of(name) {
                Some(v) => values.push(v),
                None => {
                    values.push(0.0);
                    missing.push(name.clone());
                }
            }
        }
        let dropped = Feature::ALL
            .iter()
            .filter(|f| !expected.iter().any(|n| n == f.name()))
            .map(|f| f.name().to_string())
            .collect();
        Projection {
            values,
            missing,
            dropped,
        }
    }
}

impl Serialize for FeatureVector {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(FEATURE_COUNT))?;
        for (feature, value) in self.iter() {
            map.serialize_entry(feature.name(), &value)?;
        }
        map.end()
    }
}

/// A feature vector reconciled against a scorer's field list.
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    pub values: Vec<f64>,
    /// Names the scorer expects that the schema lacks (zero-filled).
    pub missing: Vec<String>,
    /// Schema fields the scorer does not use.
    pub dropped: Vec<String>,
}

impl Projection {
    /// The drift as a diagnostic, if there is any.
    pub fn mismatch(&self) -> Option<ScanError> {
        if self.missing.is_empty() && self.dropped.is_empty() {
            return None;
        }
        Some(ScanError::SchemaMismatch {
            missing: self.missing.clone(),
            extra: self.dropped.clone(),
        })
    }
}

/// Collects stage outputs into a vector; every unset field stays zero.
#[derive(Debug, Clone)]
pub struct FeatureVectorBuilder {
    values: [f64; FEATURE_COUNT],
}

impl Default for FeatureVectorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl FeatureVectorBuilder {
    pub fn new() -> Self {
        Self {
            values: [0.0; FEATURE_COUNT],
        }
    }

    /// Set one field. Non-finite values are stored as zero.
    pub fn set(&mut self, feature: Feature, value: f64) -> &mut Self {
        self.values[feature.index()] = if value.is_finite() {
            value
        } else {
            warn!("non-finite value {value} for {feature}, zeroing");
            0.0
        };
        self
    }

    pub fn flag(&mut self, feature: Feature, present: bool) -> &mut Self {
        self.set(feature, if present { 1.0 } else { 0.0 })
    }

    pub fn count(&mut self, feature: Feature, n: usize) -> &mut Self {
        self.set(feature, n as f64)
    }

    pub fn structure(&mut self, content: &ArchiveContent) -> &mut Self {
        self.count(Feature::NumClassFiles, content.num_class_files)
            .count(Feature::NumFilesTotal, content.num_files_total)
            .flag(Feature::HasDatFile, content.has_dat_file)
            .set(Feature::ClassToTotalRatio, content.class_to_total_ratio())
            .set(Feature::EntropyScore, content.average_entropy())
    }

    pub fn file_name(&mut self, file_name: &str) -> &mut Self {
        self.count(Feature::FilenameLength, file_name.chars().count())
            .set(Feature::FilenameEntropy, shannon_entropy(file_name))
    }

    pub fn patterns(&mut self, report: &PatternReport) -> &mut Self {
        self.flag(Feature::DiscordWebhook, report.discord_webhook)
            .count(Feature::SuspiciousUrls, report.suspicious_urls)
            .flag(Feature::LegitimateConnections, report.legitimate_connections)
            .count(Feature::DataCollectionPatterns, report.data_collection_patterns)
            .count(Feature::TokenAccessPatterns, report.token_access_patterns)
            .count(Feature::HttpOperationsCount, report.http_operations)
            .count(Feature::Base64Usage, report.base64_usage)
            .set(Feature::NetworkToGameRatio, report.network_to_game_ratio)
            .flag(Feature::Func111286B, report.rat_signatures.func_111286_b)
            .flag(Feature::DiscordHomoglyph, report.rat_signatures.discord_homoglyph)
            .flag(Feature::RequestV2, report.rat_signatures.requestv2)
    }

    pub fn legitimacy(&mut self, signals: &LegitimacySignals) -> &mut Self {
        self.flag(Feature::HasModMetadata, signals.has_mod_metadata)
            .count(Feature::MinecraftApiUsage, signals.minecraft_api_usage)
            .count(Feature::ObfuscationTools, signals.obfuscation_tools)
            .count(
                Feature::SuspiciousFileOperations,
                signals.suspicious_file_operations,
            )
            .flag(Feature::UsesReflection, signals.uses_reflection)
            .flag(Feature::ExecutesCommands, signals.executes_commands)
    }

    pub fn code(&mut self, structure: &CodeStructure) -> &mut Self {
        self.set(Feature::AvgClassNameLength, structure.classes.avg_length)
            .set(Feature::AvgMethodNameLength, structure.methods.avg_length)
            .set(Feature::ShortClassNamesRatio, structure.classes.short_ratio)
            .set(Feature::ShortMethodNamesRatio, structure.methods.short_ratio)
            .count(Feature::TotalClasses, structure.classes.total)
            .count(Feature::TotalMethods, structure.methods.total)
    }

    pub fn build(&self) -> FeatureVector {
        FeatureVector {
            values: self.values,
        }
    }
}

/// Run the text analyses over a walk's aggregate and assemble the vector.
///
/// `file_name` is the archive's own name (not an entry name).
pub fn extract_features(content: &ArchiveContent, file_name: &str) -> FeatureVector {
    let lowered = content.aggregate.to_lowercase();
    let report = match_patterns(&lowered);
    let signals = legitimacy_signals(
        &lowered,
        content.has_metadata_entry,
        content.source == ContentSource::Directory,
    );
    let structure = code_structure(&content.aggregate);

    FeatureVectorBuilder::new()
        .structure(content)
        .file_name(file_name)
        .patterns(&report)
        .legitimacy(&signals)
        .code(&structure)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_has_thirty_unique_fields() {
        assert_eq!(FEATURE_COUNT, 30);
        let mut names: Vec<_> = Feature::ALL.iter().map(|f| f.name()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), FEATURE_COUNT);
    }

    #[test]
    fn schema_order_matches_model_contract() {
        assert_eq!(Feature::ALL[0].name(), "num_class_files");
        assert_eq!(Feature::ALL[5].name(), "entropy_score");
        assert_eq!(Feature::ALL[13].name(), "network_to_game_ratio");
        assert_eq!(Feature::ALL[29].name(), "requestv2");
        for (i, f) in Feature::ALL.iter().enumerate() {
            assert_eq!(f.index(), i);
        }
    }

    #[test]
    fn zeroed_vector_is_complete() {
        let v = FeatureVector::zeroed();
        assert_eq!(v.iter().count(), FEATURE_COUNT);
        assert!(v.is_zero());
    }

    #[test]
    fn builder_zeroes_non_finite() {
        let v = FeatureVectorBuilder::new()
            .set(Feature::EntropyScore, f64::NAN)
            .set(Feature::NetworkToGameRatio, f64::INFINITY)
            .set(Feature::TotalClasses, 4.0)
            .build();
        assert_eq!(v.get(Feature::EntropyScore), 0.0);
        assert_eq!(v.get(Feature::NetworkToGameRatio), 0.0);
        assert_eq!(v.get(Feature::TotalClasses), 4.0);
    }

    #[test]
    fn serializes_every_field_in_order() {
        let v = FeatureVectorBuilder::new()
            .count(Feature::NumFilesTotal, 3)
            .build();
        let json = serde_json::to_string(&v).unwrap();
        assert!(json.starts_with("{\"num_class_files\":0.0,\"num_files_total\":3.0"));
        let parsed: serde_json::Map<String, serde_json::Value> =
            serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.len(), FEATURE_COUNT);
        assert!(parsed.contains_key("discòrd"));
    }

    #[test]
    fn projection_zero_fills_and_drops() {
        let v = FeatureVectorBuilder::new()
            .count(Feature::NumClassFiles, 7)
            .flag(Feature::DiscordWebhook, true)
            .build();
        let expected = vec![
            "discord_webhook".to_string(),
            "size_kb".to_string(),
            "num_class_files".to_string(),
        ];
        let p = v.project(&expected);
        assert_eq!(p.values, vec![1.0, 0.0, 7.0]);
        assert_eq!(p.missing, vec!["size_kb".to_string()]);
        assert_eq!(p.dropped.len(), FEATURE_COUNT - 2);
        assert!(matches!(p.mismatch(), Some(ScanError::SchemaMismatch { .. })));
    }

    #[test]
    fn projection_on_identical_schema_has_no_drift() {
        let expected: Vec<String> = Feature::ALL.iter().map(|f| f.name().to_string()).collect();
        let p = FeatureVector::zeroed().project(&expected);
        assert_eq!(p.values.len(), FEATURE_COUNT);
        assert!(p.mismatch().is_none());
    }

    #[test]
    fn extract_from_content() {
        let content = ArchiveContent {
            num_files_total: 4,
            num_class_files: 2,
            has_metadata_entry: true,
            aggregate: "public class examplemod { } net.minecraft.client \
                        https://modrinth.com/x https://discord.com/api/webhooks/1/tok"
                .to_string(),
            ..ArchiveContent::default()
        };
        let v = extract_features(&content, "example-1.0.jar");
        assert_eq!(v.get(Feature::NumClassFiles), 2.0);
        assert_eq!(v.get(Feature::ClassToTotalRatio), 0.5);
        assert_eq!(v.get(Feature::FilenameLength), 15.0);
        assert!(v.get(Feature::FilenameEntropy) > 0.0);
        assert_eq!(v.get(Feature::HasModMetadata), 1.0);
        assert_eq!(v.get(Feature::MinecraftApiUsage), 1.0);
        assert_eq!(v.get(Feature::LegitimateConnections), 1.0);
        assert_eq!(v.get(Feature::DiscordWebhook), 1.0);
        assert_eq!(v.get(Feature::TotalClasses), 1.0);
        assert!(v.iter().all(|(_, x)| x.is_finite()));
    }

    #[test]
    fn metadata_mention_counts_only_in_source_trees() {
        let container = ArchiveContent {
            aggregate: "// see plugin.yml".to_string(),
            ..ArchiveContent::default()
        };
        let v = extract_features(&container, "x.jar");
        assert_eq!(v.get(Feature::HasModMetadata), 0.0);

        let tree = ArchiveContent {
            source: ContentSource::Directory,
            ..container
        };
        let v = extract_features(&tree, "x");
        assert_eq!(v.get(Feature::HasModMetadata), 1.0);
    }
}
