//! Report generation for benchmark results.
//!
//! A report carries:
//! - run metadata (timestamp, version, configuration)
//! - per-dataset scores with a per-trial accuracy interval
//! - the cross-dataset average
//! - configuration drift warnings
//! - optional significance tests against another run

use crate::benchmark::BenchmarkResult;
use crate::config::HarnessConfig;
use crate::diagnostics::ConfigDrift;
use crate::metrics::{
    SignificanceResult, ACCURACY, AVERAGED_TRUELABEL_LIKELIHOOD, EXPECTED_CALIBRATION_ERROR_1,
    MACRO_F1,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as FmtWrite;
use tabled::{Table, Tabled};

/// Full benchmark report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkReport {
    pub metadata: ReportMetadata,
    pub datasets: Vec<DatasetReport>,
    pub averaged: BTreeMap<String, f64>,
    pub warnings: Vec<WarningEntry>,
    pub comparisons: Vec<StatisticalComparison>,
}

/// Report metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMetadata {
    pub title: String,
    pub generated_at: DateTime<Utc>,
    /// Harness version
    pub framework_version: String,
    /// Demonstrations per prompt
    pub k: usize,
    pub repeat_times: usize,
    pub strict: bool,
    pub ece_bins: usize,
}

/// Scores of one dataset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetReport {
    pub dataset: String,
    pub scores: BTreeMap<String, f64>,
    /// Accuracy with the interval over trials
    pub accuracy: MetricWithCI,
    pub trials: usize,
}

/// Metric value with confidence interval
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricWithCI {
    pub value: f64,
    pub ci_lower: f64,
    pub ci_upper: f64,
}

/// One drift warning attributed to a dataset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarningEntry {
    pub dataset: String,
    pub drift: ConfigDrift,
}

/// Significance of one metric between this run and a reference run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatisticalComparison {
    /// Name of the reference run
    pub against: String,
    pub metric: String,
    pub significance: SignificanceResult,
}

/// Report builder
pub struct ReportBuilder {
    title: String,
    config: HarnessConfig,
    comparisons: Vec<StatisticalComparison>,
}

impl ReportBuilder {
    #[must_use]
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            config: HarnessConfig::default(),
            comparisons: Vec::new(),
        }
    }

    /// Record the configuration the run used
    #[must_use]
    pub fn with_config(mut self, config: &HarnessConfig) -> Self {
        self.config = config.clone();
        self
    }

    /// Add significance tests against a reference run (see `Benchmark::compare`)
    #[must_use]
    pub fn with_comparison(
        mut self,
        against: &str,
        comparison: BTreeMap<String, Option<SignificanceResult>>,
    ) -> Self {
        self.comparisons
            .extend(comparison.into_iter().filter_map(|(metric, significance)| {
                Some(StatisticalComparison {
                    against: against.to_string(),
                    metric,
                    significance: significance?,
                })
            }));
        self
    }

    /// Build the report from one benchmark run
    #[must_use]
    pub fn build(self, result: &BenchmarkResult) -> BenchmarkReport {
        let datasets = result
            .outcomes
            .iter()
            .map(|outcome| DatasetReport {
                dataset: outcome.dataset.clone(),
                scores: outcome.scores.clone(),
                accuracy: MetricWithCI {
                    value: outcome.scores.get(ACCURACY).copied().unwrap_or_default(),
                    ci_lower: outcome.accuracy_ci.0,
                    ci_upper: outcome.accuracy_ci.1,
                },
                trials: outcome.trial_accuracy.len(),
            })
            .collect();

        let warnings = result
            .outcomes
            .iter()
            .flat_map(|outcome| {
                outcome.warnings.iter().map(|drift| WarningEntry {
                    dataset: outcome.dataset.clone(),
                    drift: drift.clone(),
                })
            })
            .collect();

        BenchmarkReport {
            metadata: ReportMetadata {
                title: self.title,
                generated_at: Utc::now(),
                framework_version: env!("CARGO_PKG_VERSION").to_string(),
                k: self.config.experiment.k,
                repeat_times: self.config.experiment.repeat_times,
                strict: self.config.settings.strict,
                ece_bins: self.config.ece_bins,
            },
            datasets,
            averaged: result.averaged.clone(),
            warnings,
            comparisons: self.comparisons,
        }
    }
}

/// Table row for markdown output
#[derive(Tabled)]
struct ScoreTableRow {
    #[tabled(rename = "Dataset")]
    dataset: String,
    #[tabled(rename = "Accuracy")]
    accuracy: String,
    #[tabled(rename = "True-label likelihood")]
    likelihood: String,
    #[tabled(rename = "Macro-F1")]
    macro_f1: String,
    #[tabled(rename = "ECE")]
    ece: String,
}

fn percent(scores: &BTreeMap<String, f64>, metric: &str) -> String {
    scores
        .get(metric)
        .map_or_else(|| "-".to_string(), |v| format!("{:.2}%", v * 100.0))
}

fn plain(scores: &BTreeMap<String, f64>, metric: &str) -> String {
    scores
        .get(metric)
        .map_or_else(|| "-".to_string(), |v| format!("{v:.4}"))
}

impl BenchmarkReport {
    /// Render report as JSON
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Render report as markdown
    #[must_use]
    pub fn to_markdown(&self) -> String {
        let mut output = String::new();

        writeln!(output, "# {}", self.metadata.title).ok();
        writeln!(output).ok();
        writeln!(
            output,
            "**Generated:** {}",
            self.metadata.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
        )
        .ok();
        writeln!(
            output,
            "**Framework Version:** {}",
            self.metadata.framework_version
        )
        .ok();
        writeln!(output).ok();

        writeln!(output, "## Results").ok();
        writeln!(output).ok();
        let mut rows: Vec<ScoreTableRow> = self
            .datasets
            .iter()
            .map(|d| ScoreTableRow {
                dataset: d.dataset.clone(),
                accuracy: format!(
                    "{:.2}% [{:.2}-{:.2}]",
                    d.accuracy.value * 100.0,
                    d.accuracy.ci_lower * 100.0,
                    d.accuracy.ci_upper * 100.0
                ),
                likelihood: plain(&d.scores, AVERAGED_TRUELABEL_LIKELIHOOD),
                macro_f1: plain(&d.scores, MACRO_F1),
                ece: plain(&d.scores, EXPECTED_CALIBRATION_ERROR_1),
            })
            .collect();
        rows.push(ScoreTableRow {
            dataset: "average".to_string(),
            accuracy: percent(&self.averaged, ACCURACY),
            likelihood: plain(&self.averaged, AVERAGED_TRUELABEL_LIKELIHOOD),
            macro_f1: plain(&self.averaged, MACRO_F1),
            ece: plain(&self.averaged, EXPECTED_CALIBRATION_ERROR_1),
        });
        writeln!(output, "{}", Table::new(rows)).ok();
        writeln!(output).ok();

        if !self.comparisons.is_empty() {
            writeln!(output, "## Statistical Comparisons").ok();
            writeln!(output).ok();
            writeln!(
                output,
                "| Metric | Against | t-stat | p-value | Effect Size | Significant |"
            )
            .ok();
            writeln!(
                output,
                "|--------|---------|--------|---------|-------------|-------------|"
            )
            .ok();
            for c in &self.comparisons {
                writeln!(
                    output,
                    "| {} | {} | {:.3} | {:.4} | {} ({:.2}) | {} |",
                    c.metric,
                    c.against,
                    c.significance.t_statistic,
                    c.significance.p_value,
                    c.significance.effect,
                    c.significance.cohens_d,
                    if c.significance.is_significant {
                        "Yes"
                    } else {
                        "No"
                    }
                )
                .ok();
            }
            writeln!(output).ok();
        }

        if !self.warnings.is_empty() {
            writeln!(output, "## Configuration Drift").ok();
            writeln!(output).ok();
            writeln!(
                output,
                "These results deviate from the standard settings and are not comparable with baselines."
            )
            .ok();
            writeln!(output).ok();
            for w in &self.warnings {
                writeln!(output, "- {}: {}", w.dataset, w.drift).ok();
            }
            writeln!(output).ok();
        }

        writeln!(output, "## Configuration").ok();
        writeln!(output).ok();
        writeln!(output, "- k: {}", self.metadata.k).ok();
        writeln!(output, "- Repeat times: {}", self.metadata.repeat_times).ok();
        writeln!(output, "- ECE bins: {}", self.metadata.ece_bins).ok();
        writeln!(
            output,
            "- Strict mode: {}",
            if self.metadata.strict { "on" } else { "off" }
        )
        .ok();

        output
    }
}
