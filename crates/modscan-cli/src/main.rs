//! modscan - classify Minecraft mod archives as safe or malicious.
//!
//! Usage:
//!   modscan mods/ --model model.json
//!   modscan suspicious.jar --model model.json --threshold 0.8 --format json
//!   modscan mods/ --model model.json --decompiler java --decompiler-arg=-jar \
//!       --decompiler-arg=cfr.jar --decompiler-arg={input} \
//!       --decompiler-arg=--outputdir --decompiler-arg={output}

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use modscan_core::config::{load_config, ScannerConfig};
use modscan_core::decompile::CommandDecompiler;
use modscan_core::report::{print_results, OutputFormat};
use modscan_core::scan::{run_scan, ScanConfig, ScanProgress};

#[derive(Parser)]
#[command(name = "modscan")]
#[command(about = "Static malware classifier for Minecraft mod JARs")]
struct Cli {
    /// Mod archives, folders of archives, or decompiled source trees
    #[arg(required = true)]
    paths: Vec<PathBuf>,

    /// Path to the random-forest model JSON
    #[arg(short, long)]
    model: PathBuf,

    /// Path to a modscan.json configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Maliciousness threshold (0.0-1.0), overrides the config file
    #[arg(short, long)]
    threshold: Option<f64>,

    /// Probability at or above which legitimacy evidence is ignored
    #[arg(long)]
    override_ceiling: Option<f64>,

    /// Decompiler program to run on each archive before analysis
    #[arg(long)]
    decompiler: Option<String>,

    /// Argument for the decompiler; `{input}` and `{output}` are substituted
    #[arg(long = "decompiler-arg", allow_hyphen_values = true)]
    decompiler_args: Vec<String>,

    /// Output format
    #[arg(short, long, default_value = "text")]
    format: OutputFormat,

    /// Include the feature vector of every result in the output
    #[arg(long)]
    include_features: bool,

    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    /// Config file values with command-line overrides applied.
    fn scanner_config(&self) -> Result<ScannerConfig> {
        let mut config = match &self.config {
            Some(path) => load_config(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => ScannerConfig::default(),
        };
        if let Some(t) = self.threshold {
            config.policy.threshold = t;
        }
        if let Some(c) = self.override_ceiling {
            config.policy.override_ceiling = c;
        }
        if let Some(program) = &self.decompiler {
            config.decompiler = Some(CommandDecompiler::new(
                program.as_str(),
                self.decompiler_args.clone(),
            ));
        }
        config.validate()?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let env_filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if cli.verbose {
        EnvFilter::new("modscan=debug,modscan_core=debug")
    } else {
        EnvFilter::new("modscan=info,modscan_core=info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let scanner = cli.scanner_config()?;
    debug!(
        "threshold {}, override ceiling {}, decompiler {:?}",
        scanner.policy.threshold,
        scanner.policy.override_ceiling,
        scanner.decompiler.as_ref().map(|d| d.program.as_str())
    );

    info!("Loading model from {}...", cli.model.display());
    let config = ScanConfig {
        model_path: cli.model,
        target_paths: cli.paths,
        scanner,
        include_features: cli.include_features,
    };

    let progress = Arc::new(ScanProgress::new());

    info!("Scanning...");
    let results = run_scan(&config, &progress)?;

    let total = progress.total_files.load(Ordering::Relaxed);
    info!("Scanned {} targets", total);

    if results.is_empty() {
        info!("No files to scan.");
        return Ok(());
    }

    print_results(&results, cli.format);

    Ok(())
}
