//! Scan orchestrator with progress tracking.
//!
//! One target goes through: walk (container, directory, or decompiled tree)
//! → feature extraction → scorer → decision policy. Many targets run in
//! parallel on rayon with atomic counters and a shared cancel flag.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result as AnyResult};
use rayon::prelude::*;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::archive::{walk_container, walk_directory, ArchiveContent, WalkLimits};
use crate::config::ScannerConfig;
use crate::decompile::{has_output, Decompiler};
use crate::error::{Result, ScanError};
use crate::features::{extract_features, FeatureVector};
use crate::hash::{sha256_file, sha256_tree};
use crate::model::{ForestModel, Scorer};
use crate::report::{AnalysisMode, ScanResult};
use crate::verdict::{DecisionPolicy, Verdict};

/// Archive extensions a directory argument is expanded to.
const ARCHIVE_EXTENSIONS: &[&str] = &["jar", "zip"];

/// Configuration for a scan run.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub model_path: PathBuf,
    pub target_paths: Vec<PathBuf>,
    pub scanner: ScannerConfig,
    pub include_features: bool,
}

/// Atomic progress tracking, shared with whoever started the scan.
pub struct ScanProgress {
    pub total_files: AtomicUsize,
    pub scanned_files: AtomicUsize,
    pub malicious_count: AtomicUsize,
    pub unreadable_count: AtomicUsize,
    pub error_count: AtomicUsize,
    pub cancel: AtomicBool,
}

impl ScanProgress {
    pub fn new() -> Self {
        Self {
            total_files: AtomicUsize::new(0),
            scanned_files: AtomicUsize::new(0),
            malicious_count: AtomicUsize::new(0),
            unreadable_count: AtomicUsize::new(0),
            error_count: AtomicUsize::new(0),
            cancel: AtomicBool::new(false),
        }
    }

    fn record(&self, result: &ScanResult) {
        if result.error.is_some() {
            self.error_count.fetch_add(1, Ordering::Relaxed);
        } else if !result.archive_readable {
            self.unreadable_count.fetch_add(1, Ordering::Relaxed);
        } else if result.is_malicious {
            self.malicious_count.fetch_add(1, Ordering::Relaxed);
        }
        self.scanned_files.fetch_add(1, Ordering::Relaxed);
    }
}

impl Default for ScanProgress {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything one target's pipeline needs, borrowed for the scan's duration.
#[derive(Clone, Copy)]
pub struct ScanContext<'a> {
    pub policy: DecisionPolicy,
    pub limits: WalkLimits,
    pub scorer: &'a dyn Scorer,
    pub decompiler: Option<&'a dyn Decompiler>,
    pub cancel: Option<&'a AtomicBool>,
    pub include_features: bool,
}

impl<'a> ScanContext<'a> {
    pub fn new(scorer: &'a dyn Scorer) -> Self {
        Self {
            policy: DecisionPolicy::default(),
            limits: WalkLimits::default(),
            scorer,
            decompiler: None,
            cancel: None,
            include_features: false,
        }
    }
}

/// Features of one target and how they were obtained.
#[derive(Debug, Clone)]
pub struct Analysis {
    pub mode: AnalysisMode,
    pub features: FeatureVector,
    /// False when the container could not be opened at all.
    pub readable: bool,
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn analysis_from(mode: AnalysisMode, content: &ArchiveContent, path: &Path) -> Analysis {
    Analysis {
        mode,
        features: extract_features(content, &file_name_of(path)),
        readable: true,
    }
}

/// Walk a directory, a decompiled archive, or a raw container and assemble
/// its feature vector.
///
/// A container that is not a valid archive yields an all-zero vector with
/// `readable = false`. Any decompiler failure other than cancellation falls
/// back to the container.
pub fn analyze_path(path: &Path, ctx: &ScanContext<'_>) -> Result<Analysis> {
    if path.is_dir() {
        let content = walk_directory(path, &ctx.limits, ctx.cancel)?;
        return Ok(analysis_from(AnalysisMode::Directory, &content, path));
    }

    if let Some(decompiler) = ctx.decompiler {
        match decompile_and_walk(decompiler, path, ctx) {
            Ok(content) => return Ok(analysis_from(AnalysisMode::Decompiled, &content, path)),
            Err(ScanError::Cancelled) => return Err(ScanError::Cancelled),
            Err(e) => {
                warn!("{}: {e}; analyzing the container directly", path.display());
            }
        }
    }

    match walk_container(path, &ctx.limits, ctx.cancel) {
        Ok(content) => Ok(analysis_from(AnalysisMode::Container, &content, path)),
        Err(e @ ScanError::Format { .. }) => {
            warn!("{e}");
            Ok(Analysis {
                mode: AnalysisMode::Container,
                features: FeatureVector::zeroed(),
                readable: false,
            })
        }
        Err(e) => Err(e),
    }
}

fn decompile_and_walk(
    decompiler: &dyn Decompiler,
    archive: &Path,
    ctx: &ScanContext<'_>,
) -> Result<ArchiveContent> {
    let out = tempfile::Builder::new()
        .prefix("modscan-")
        .tempdir()
        .map_err(|e| ScanError::external_tool(decompiler.name(), e.to_string()))?;
    debug!(
        "decompiling {} with {} into {}",
        archive.display(),
        decompiler.name(),
        out.path().display()
    );
    decompiler.decompile(archive, out.path()).map_err(|e| match e {
        ScanError::Cancelled | ScanError::ExternalToolFailure { .. } => e,
        other => ScanError::external_tool(decompiler.name(), other.to_string()),
    })?;
    if !has_output(out.path()) {
        return Err(ScanError::external_tool(decompiler.name(), "produced no files"));
    }
    walk_directory(out.path(), &ctx.limits, ctx.cancel)
}

fn expected_mode(path: &Path, ctx: &ScanContext<'_>) -> AnalysisMode {
    if path.is_dir() {
        AnalysisMode::Directory
    } else if ctx.decompiler.is_some() {
        AnalysisMode::Decompiled
    } else {
        AnalysisMode::Container
    }
}

/// Full pipeline for one target.
///
/// Per-target failures become a result with `error` set; only cancellation
/// is returned as an error.
pub fn scan_path(path: &Path, ctx: &ScanContext<'_>) -> Result<ScanResult> {
    let analysis = match analyze_path(path, ctx) {
        Ok(analysis) => analysis,
        Err(ScanError::Cancelled) => return Err(ScanError::Cancelled),
        Err(e) => {
            warn!("{}: {e}", path.display());
            let mode = expected_mode(path, ctx);
            return Ok(ScanResult::failed(path.to_path_buf(), mode, e.to_string()));
        }
    };

    let verdict = if analysis.readable {
        match ctx.scorer.score(&analysis.features) {
            Ok(output) => ctx.policy.decide(&analysis.features, output),
            Err(e) => {
                warn!("{}: scoring failed: {e}", path.display());
                return Ok(ScanResult::failed(
                    path.to_path_buf(),
                    analysis.mode,
                    format!("scoring error: {e}"),
                ));
            }
        }
    } else {
        Verdict::unreadable()
    };

    let hash = if path.is_dir() {
        sha256_tree(path)
    } else {
        sha256_file(path)
    };

    let mut result = ScanResult::new(path.to_path_buf(), analysis.mode, verdict);
    result.archive_readable = analysis.readable;
    result.sha256 = match hash {
        Ok(h) => Some(h),
        Err(e) => {
            debug!("{}: cannot hash: {e}", path.display());
            None
        }
    };
    if ctx.include_features {
        result.features = Some(analysis.features);
    }

    debug!(
        "{}: {} ({:.4}, {:?})",
        path.display(),
        result.label,
        result.probability,
        result.mode
    );
    Ok(result)
}

fn is_archive(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| ARCHIVE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
}

/// Expand command-line paths into scan targets.
///
/// Files are taken as they are. A directory holding `.jar`/`.zip` archives
/// expands to those archives; one without any is a single decompiled tree.
pub fn collect_targets(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut targets = Vec::new();

    for path in paths {
        if !path.is_dir() {
            targets.push(path.clone());
            continue;
        }
        let archives: Vec<PathBuf> = WalkDir::new(path)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .flatten()
            .filter(|e| e.file_type().is_file() && is_archive(e.path()))
            .map(|e| e.into_path())
            .collect();
        if archives.is_empty() {
            debug!("{}: no archives, scanning as a source tree", path.display());
            targets.push(path.clone());
        } else {
            targets.extend(archives);
        }
    }

    targets
}

/// Scan targets in parallel. Results come back in target order; targets not
/// reached before cancellation are left out.
pub fn scan_targets(
    targets: &[PathBuf],
    ctx: &ScanContext<'_>,
    progress: &ScanProgress,
) -> Vec<ScanResult> {
    progress.total_files.store(targets.len(), Ordering::Relaxed);

    targets
        .par_iter()
        .filter_map(|path| {
            if progress.cancel.load(Ordering::Relaxed) {
                return None;
            }
            let result = scan_path(path, ctx).ok()?;
            progress.record(&result);
            Some(result)
        })
        .collect()
}

/// Run a full scan with progress tracking. Blocking.
pub fn run_scan(config: &ScanConfig, progress: &Arc<ScanProgress>) -> AnyResult<Vec<ScanResult>> {
    config.scanner.validate()?;
    let model = ForestModel::load(&config.model_path)
        .with_context(|| format!("loading model {}", config.model_path.display()))?;

    let targets = collect_targets(&config.target_paths);
    if targets.is_empty() {
        return Ok(Vec::new());
    }

    let ctx = ScanContext {
        policy: config.scanner.policy,
        limits: config.scanner.limits,
        scorer: &model,
        decompiler: config
            .scanner
            .decompiler
            .as_ref()
            .map(|d| d as &dyn Decompiler),
        cancel: Some(&progress.cancel),
        include_features: config.include_features,
    };

    let results = scan_targets(&targets, &ctx, progress);
    if progress.cancel.load(Ordering::Relaxed) {
        info!(
            "scan cancelled after {} of {} targets",
            results.len(),
            targets.len()
        );
    }
    Ok(results)
}
