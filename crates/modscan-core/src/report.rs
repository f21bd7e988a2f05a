//! Output formatting for scan results.

use std::path::PathBuf;

use serde::Serialize;

use crate::features::{FeatureVector, SCHEMA_VERSION};
use crate::verdict::{Label, Verdict};

/// How a target was analyzed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisMode {
    /// Entries of the ZIP/JAR itself.
    Container,
    /// A directory tree given directly.
    Directory,
    /// A directory produced by the decompiler from the archive.
    Decompiled,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanResult {
    pub path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    pub mode: AnalysisMode,
    pub archive_readable: bool,
    pub label: Label,
    #[serde(serialize_with = "crate::verdict::serialize_rounded")]
    pub probability: f64,
    pub is_malicious: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub features: Option<FeatureVector>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ScanResult {
    pub fn new(path: PathBuf, mode: AnalysisMode, verdict: Verdict) -> Self {
        Self {
            path,
            sha256: None,
            mode,
            archive_readable: true,
            label: verdict.label,
            probability: verdict.probability,
            is_malicious: verdict.is_malicious(),
            features: None,
            error: None,
        }
    }

    /// A target that failed outright; reported as safe with the error kept.
    pub fn failed(path: PathBuf, mode: AnalysisMode, error: String) -> Self {
        Self {
            archive_readable: false,
            error: Some(error),
            ..Self::new(path, mode, Verdict::unreadable())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [("text", OutputFormat::Text), ("json", OutputFormat::Json)]
            .into_iter()
            .find(|(name, _)| s.eq_ignore_ascii_case(name))
            .map(|(_, format)| format)
            .ok_or_else(|| format!("unsupported output format '{s}' (expected text or json)"))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub total: usize,
    pub malicious: usize,
    pub safe: usize,
    pub unreadable: usize,
    pub errors: usize,
}

impl Summary {
    pub fn of(results: &[ScanResult]) -> Self {
        let errors = results.iter().filter(|r| r.error.is_some()).count();
        let malicious = results.iter().filter(|r| r.is_malicious).count();
        Self {
            total: results.len(),
            malicious,
            safe: results.len() - malicious - errors,
            unreadable: results
                .iter()
                .filter(|r| !r.archive_readable && r.error.is_none())
                .count(),
            errors,
        }
    }
}

pub fn print_results(results: &[ScanResult], format: OutputFormat) {
    match format {
        OutputFormat::Text => print!("{}", render_text(results)),
        OutputFormat::Json => println!("{}", render_json(results)),
    }
}

pub fn render_text(results: &[ScanResult]) -> String {
    use std::fmt::Write;

    let malicious: Vec<_> = results.iter().filter(|r| r.is_malicious).collect();
    let unreadable: Vec<_> = results
        .iter()
        .filter(|r| !r.archive_readable && r.error.is_none())
        .collect();
    let errors: Vec<_> = results.iter().filter(|r| r.error.is_some()).collect();
    let summary = Summary::of(results);

    let mut out = String::new();
    let rule = "=".repeat(70);
    let _ = writeln!(out, "\n{rule}");
    let _ = writeln!(out, "SCAN RESULTS");
    let _ = writeln!(out, "{rule}");

    if !malicious.is_empty() {
        let _ = writeln!(out, "\nMALICIOUS MODS ({}):", malicious.len());
        for r in &malicious {
            let _ = writeln!(out, "  [{:.4}] {}", r.probability, r.path.display());
        }
    }

    if !unreadable.is_empty() {
        let _ = writeln!(out, "\nUNREADABLE ARCHIVES ({}):", unreadable.len());
        for r in &unreadable {
            let _ = writeln!(out, "  [----] {}", r.path.display());
        }
    }

    if !errors.is_empty() {
        let _ = writeln!(out, "\nERRORS ({}):", errors.len());
        for r in &errors {
            let err = r.error.as_deref().unwrap_or("unknown");
            let _ = writeln!(out, "  [ERR ] {} -- {}", r.path.display(), err);
        }
    }

    let _ = writeln!(out, "\nSUMMARY:");
    let _ = writeln!(out, "  Total mods scanned:  {}", summary.total);
    let _ = writeln!(out, "  Malicious:           {}", summary.malicious);
    let _ = writeln!(out, "  Safe:                {}", summary.safe);
    let _ = writeln!(out, "  Unreadable:          {}", summary.unreadable);
    let _ = writeln!(out, "  Errors:              {}", summary.errors);
    let _ = writeln!(out, "{rule}");
    out
}

pub fn render_json(results: &[ScanResult]) -> String {
    let output = serde_json::json!({
        "schema_version": SCHEMA_VERSION,
        "results": results,
        "summary": Summary::of(results),
    });
    serde_json::to_string_pretty(&output).unwrap_or_default()
}
