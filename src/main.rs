//! staicc-eval CLI
//!
//! Reproducible in-context-learning classification benchmark

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use staicc_eval::{
    Benchmark, HarnessConfig, LabeledDataset, Prediction, PromptWriter, ReportBuilder,
    TripletSplit,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "staicc-eval")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum ReportFormat {
    Markdown,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Split a dataset with its standard sizes and summarize the parts
    Split {
        /// Dataset JSON file
        #[arg(long)]
        dataset: PathBuf,
    },

    /// Render an example prompt from a dataset's standard split
    Prompt {
        /// Dataset JSON file
        #[arg(long)]
        dataset: PathBuf,

        /// Demonstrations per prompt
        #[arg(long, default_value = "4")]
        k: usize,
    },

    /// Run the uniform-prior reference inference over every dataset
    Run {
        /// Dataset files (glob pattern, overrides the config file)
        #[arg(long)]
        datasets: Option<String>,

        /// Harness configuration file (YAML)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output report file (stdout if absent)
        #[arg(long)]
        output: Option<PathBuf>,

        /// Report format
        #[arg(long, value_enum, default_value = "markdown")]
        format: ReportFormat,
    },
}

fn load_dataset(path: &Path) -> anyhow::Result<LabeledDataset> {
    LabeledDataset::load_json(path)
        .with_context(|| format!("Failed to load dataset {}", path.display()))
}

fn split_summary(path: &Path) -> anyhow::Result<()> {
    let dataset = load_dataset(path)?;
    let split = TripletSplit::standard(&dataset)?;

    println!("Split: {}", split.dataset_name());
    println!("=================");
    println!("Source records: {}", dataset.len());
    println!("Label space: {}", split.label_space().join(", "));
    for (part, set) in [
        ("calibration", &split.calibration),
        ("demonstration", &split.demonstration),
        ("test", &split.test),
    ] {
        let mut counts = vec![0usize; set.label_space().len()];
        for i in 0..set.len() {
            counts[set.label_index_of(i)?] += 1;
        }
        println!("  {part:<14} {:>5} records, label counts {counts:?}", set.len());
    }
    for drift in split.diagnostics().warnings() {
        println!("warning: {drift}");
    }
    Ok(())
}

fn example_prompt(path: &Path, k: usize) -> anyhow::Result<()> {
    let dataset = load_dataset(path)?;
    let split = TripletSplit::standard(&dataset)?;
    let mut writer = PromptWriter::new(Arc::new(split));
    print!("{}", writer.example(k)?);
    println!();
    Ok(())
}

fn run_benchmark(
    datasets: Option<String>,
    config: Option<PathBuf>,
    output: Option<PathBuf>,
    format: ReportFormat,
) -> anyhow::Result<()> {
    let mut harness = match &config {
        Some(path) => HarnessConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => HarnessConfig::default(),
    };
    if let Some(pattern) = datasets {
        harness.datasets = pattern;
    }

    let paths = harness.dataset_paths()?;
    anyhow::ensure!(!paths.is_empty(), "No datasets match {}", harness.datasets);

    tracing::info!(
        datasets = paths.len(),
        k = harness.experiment.k,
        repeat_times = harness.experiment.repeat_times,
        strict = harness.settings.strict,
        "Starting benchmark"
    );

    let mut benchmark = Benchmark::from_loaders(
        paths.iter().map(|path| move || load_dataset(path)),
        &harness.experiment,
        harness.settings,
    )?;
    for experimentor in benchmark.experimentors_mut() {
        experimentor.set_ece_bins(harness.ece_bins)?;
    }

    let result = benchmark.run(|_prompt, label_space| {
        #[allow(clippy::cast_precision_loss)]
        let uniform = 1.0 / label_space.len() as f64;
        Ok(Prediction::Probabilities(vec![uniform; label_space.len()]))
    })?;

    let report = ReportBuilder::new("Uniform-prior reference benchmark")
        .with_config(&harness)
        .build(&result);
    let rendered = match format {
        ReportFormat::Markdown => report.to_markdown(),
        ReportFormat::Json => report.to_json()?,
    };

    match output {
        Some(path) => {
            std::fs::write(&path, rendered)
                .with_context(|| format!("Failed to write report {}", path.display()))?;
            tracing::info!(output = %path.display(), "Report written");
        }
        None => println!("{rendered}"),
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    if cli.verbose {
        tracing::info!("Verbose mode enabled");
    }

    match cli.command {
        Commands::Split { dataset } => {
            tracing::info!(dataset = %dataset.display(), "Splitting dataset");
            split_summary(&dataset)
        }
        Commands::Prompt { dataset, k } => {
            tracing::info!(dataset = %dataset.display(), k = k, "Rendering example prompt");
            example_prompt(&dataset, k)
        }
        Commands::Run {
            datasets,
            config,
            output,
            format,
        } => run_benchmark(datasets, config, output, format),
    }
}
