//! Integration tests for the staicc-eval CLI and library.
//!
//! These tests verify end-to-end functionality including:
//! - datasets load from disk and split with their standard sizes
//! - benchmark runs are reproducible
//! - calibration changes predictions through the experimentor
//! - bias diagnosis exposes a skewed model prior
//! - CLI commands work correctly

#![allow(clippy::unwrap_used)]
#![allow(clippy::cast_precision_loss)]

use staicc_eval::metrics::{DISTRIBUTION, ENTROPY, KL_DIVERGENCE};
use staicc_eval::{
    Benchmark, BenchmarkReport, BiasKind, Calibrator, CalibrationStatus, ConfigDrift,
    ExperimentConfig, Experimentor, Furniture, HarnessConfig, InferenceOutput, LabeledDataset,
    Prediction, Record, ReportBuilder, Settings,
};
use std::path::Path;
use std::process::Command;

const LABELS: [&str; 3] = ["negative", "neutral", "positive"];

/// Registered as 512/1024/512, so 2100 records suffice
fn phrasebank() -> LabeledDataset {
    let records = (0..2100)
        .map(|i| Record::new([format!("item {i}")], LABELS[i % 3]))
        .collect();
    LabeledDataset::new(
        "financial_phrasebank",
        LABELS.iter().map(ToString::to_string).collect(),
        Furniture {
            instruction: "Classify the sentiment.\n".to_string(),
            input_prefixes: vec!["text: ".to_string()],
            input_affixes: vec!["\n".to_string()],
            label_prefix: "label: ".to_string(),
            label_affix: "\n".to_string(),
            ..Furniture::default()
        },
        records,
    )
    .unwrap()
}

fn write_dataset(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("financial_phrasebank.json");
    std::fs::write(&path, serde_json::to_string(&phrasebank()).unwrap()).unwrap();
    path
}

/// Record number of the query (the last `text:` field of the prompt)
fn query_number(prompt: &str) -> Option<usize> {
    prompt
        .rsplit("text: ")
        .next()?
        .strip_prefix("item ")?
        .split_whitespace()
        .next()?
        .parse()
        .ok()
}

fn oracle(prompt: &str, _labels: &[String]) -> anyhow::Result<Prediction> {
    let n = query_number(prompt).ok_or_else(|| anyhow::anyhow!("no query in prompt"))?;
    Ok(Prediction::Label(n % 3))
}

/// Leans towards the first label; content-free queries return the prior
fn biased_model(prompt: &str, _labels: &[String]) -> anyhow::Result<InferenceOutput> {
    let mut probs = vec![0.6, 0.2, 0.2];
    if let Some(n) = query_number(prompt) {
        probs[n % 3] += 0.25;
        for p in &mut probs {
            *p /= 1.25;
        }
    }
    Ok(InferenceOutput::from(probs))
}

// ============================================================================
// Library Integration Tests
// ============================================================================

#[test]
fn test_load_from_glob_and_run_oracle() {
    let dir = tempfile::tempdir().unwrap();
    write_dataset(dir.path());
    let config = HarnessConfig {
        datasets: format!("{}/*.json", dir.path().display()),
        ..HarnessConfig::default()
    };

    let paths = config.dataset_paths().unwrap();
    let datasets: Vec<LabeledDataset> = paths
        .iter()
        .map(|p| LabeledDataset::load_json(p).unwrap())
        .collect();
    let mut benchmark = Benchmark::new(&datasets, &config.experiment, config.settings).unwrap();
    let result = benchmark.run(oracle).unwrap();

    let scores = &result.per_dataset["financial_phrasebank"];
    assert!((scores["accuracy"] - 1.0).abs() < f64::EPSILON);
    assert!((scores["macro_F1"] - 1.0).abs() < f64::EPSILON);
    assert!(scores["expected_calibration_error_1"].abs() < f64::EPSILON);
    assert_eq!(result.outcomes[0].trial_accuracy.len(), 2);
    assert!(result.outcomes[0].warnings.is_empty());
}

#[test]
fn test_benchmark_is_reproducible() {
    let run = || {
        let mut benchmark =
            Benchmark::new(&[phrasebank()], &ExperimentConfig::default(), Settings::lenient())
                .unwrap();
        benchmark
            .run(|prompt, _| Ok(Prediction::Label(prompt.len() % 3)))
            .unwrap()
    };
    assert_eq!(run(), run());
}

#[test]
fn test_strict_mode_reverts_and_reports_drift() {
    let config = ExperimentConfig {
        repeat_times: 3,
        ..ExperimentConfig::default()
    };
    let benchmark = Benchmark::new(&[phrasebank()], &config, Settings::strict()).unwrap();
    let experimentor = &benchmark.experimentors()[0];
    assert_eq!(experimentor.repeat_times(), 2);
    assert!(experimentor
        .diagnostics()
        .warnings()
        .iter()
        .any(|d| matches!(d, ConfigDrift::RepeatTimes { requested: 3, .. })));
}

#[test]
fn test_contextual_calibration_corrects_bias() {
    let dataset = phrasebank();
    let mut experimentor = Experimentor::standard(&dataset).unwrap();

    let raw = experimentor
        .run(|p, l| Ok(Prediction::from(biased_model(p, l)?)))
        .unwrap();
    assert!(raw["accuracy"] < 0.5);

    let mut calibrator = Calibrator::contextual(dataset.label_space().to_vec());
    experimentor
        .train_calibrator(&mut calibrator, biased_model, None)
        .unwrap();
    assert_eq!(calibrator.status(), CalibrationStatus::Trained);

    let calibrated = experimentor.run(calibrator.wrap(biased_model)).unwrap();
    assert!((calibrated["accuracy"] - 1.0).abs() < f64::EPSILON);
}

#[test]
fn test_bias_diagnosis_exposes_prior() {
    let mut benchmark =
        Benchmark::new(&[phrasebank()], &ExperimentConfig::default(), Settings::lenient())
            .unwrap();
    let result = benchmark
        .diagnose_triplet(|p, l| Ok(Prediction::from(biased_model(p, l)?)))
        .unwrap();

    let prior = &result.contextual.outcomes[0].distributions[DISTRIBUTION];
    assert!((prior[0] - 0.6).abs() < 1e-9, "prior = {prior:?}");
    assert!(result.contextual.averaged[ENTROPY] < 0.9);
    assert_eq!(result.domain.outcomes.len(), 1);

    // the prior outweighs the evidence, so every query is predicted "negative"
    let post = &result.post.outcomes[0];
    assert_eq!(post.distributions[DISTRIBUTION], vec![1.0, 0.0, 0.0]);
    assert!(post.scores[KL_DIVERGENCE] > 1.0);
}

#[test]
fn test_calibration_removes_post_bias() {
    let dataset = phrasebank();
    let mut experimentor = Experimentor::standard(&dataset).unwrap();
    let mut calibrator = Calibrator::contextual(dataset.label_space().to_vec());
    experimentor
        .train_calibrator(&mut calibrator, biased_model, None)
        .unwrap();

    let outcome = experimentor
        .run_bias(BiasKind::Post, calibrator.wrap(biased_model))
        .unwrap();
    assert!(outcome.scores[KL_DIVERGENCE].abs() < 1e-12);
}

#[test]
fn test_report_from_run() {
    let mut benchmark =
        Benchmark::new(&[phrasebank()], &ExperimentConfig::default(), Settings::lenient())
            .unwrap();
    let result = benchmark.run(oracle).unwrap();
    let report = ReportBuilder::new("Oracle").build(&result);

    let markdown = report.to_markdown();
    assert!(markdown.contains("financial_phrasebank"));
    assert!(markdown.contains("100.00%"));
    assert!(!markdown.contains("## Configuration Drift"));

    let parsed: BenchmarkReport = serde_json::from_str(&report.to_json().unwrap()).unwrap();
    assert_eq!(parsed.datasets.len(), 1);
}

// ============================================================================
// CLI Integration Tests
// ============================================================================

fn cli() -> Command {
    Command::new(env!("CARGO_BIN_EXE_staicc-eval"))
}

#[test]
fn test_cli_help_command() {
    let output = cli().arg("--help").output().expect("Failed to execute CLI");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success());
    assert!(stdout.contains("split"), "Help should list split command");
    assert!(stdout.contains("prompt"), "Help should list prompt command");
    assert!(stdout.contains("run"), "Help should list run command");
}

#[test]
fn test_cli_split_summary() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_dataset(dir.path());
    let output = cli()
        .args(["split", "--dataset", path.to_str().unwrap()])
        .output()
        .expect("Failed to execute CLI");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success(), "{stdout}");
    assert!(stdout.contains("Split: financial_phrasebank"));
    assert!(stdout.contains("demonstration"));
    assert!(stdout.contains("1024 records"));
}

#[test]
fn test_cli_prompt_example() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_dataset(dir.path());
    let output = cli()
        .args(["prompt", "--dataset", path.to_str().unwrap(), "--k", "2"])
        .output()
        .expect("Failed to execute CLI");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success(), "{stdout}");
    assert!(stdout.starts_with("Classify the sentiment."));
    assert_eq!(stdout.matches("text: ").count(), 3);
}

#[test]
fn test_cli_run_writes_json_report() {
    let dir = tempfile::tempdir().unwrap();
    write_dataset(dir.path());
    let report_path = dir.path().join("report.json");
    let output = cli()
        .args([
            "run",
            "--datasets",
            &format!("{}/*.json", dir.path().display()),
            "--format",
            "json",
            "--output",
            report_path.to_str().unwrap(),
        ])
        .output()
        .expect("Failed to execute CLI");
    assert!(
        output.status.success(),
        "{}",
        String::from_utf8_lossy(&output.stderr)
    );

    let report: BenchmarkReport =
        serde_json::from_str(&std::fs::read_to_string(&report_path).unwrap()).unwrap();
    assert_eq!(report.datasets.len(), 1);
    assert_eq!(report.metadata.k, 4);
    // Uniform probabilities always pick the first label
    let accuracy = report.datasets[0].accuracy.value;
    assert!(accuracy > 0.0 && accuracy < 1.0);
}

#[test]
fn test_cli_run_without_matches_fails() {
    let dir = tempfile::tempdir().unwrap();
    let output = cli()
        .args(["run", "--datasets", &format!("{}/*.json", dir.path().display())])
        .output()
        .expect("Failed to execute CLI");
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("No datasets match"));
}
