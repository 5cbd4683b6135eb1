//! Metric functions over (ground-truth index, probability vector) runs.
//!
//! All metric functions are pure, validate their input the same way, and
//! share one signature so they can sit in a [`MetricRegistry`]:
//! - every probability must lie in `[0, 1]`
//! - ground truth and predictions must be aligned
//! - a run must not be empty
//!
//! Bias-diagnosis metrics look at the label distribution of a run instead
//! of its correctness. Some of them return one value per label and register
//! as a [`DistributionFn`].
//!
//! The last part of the module holds the statistics used to summarize trials
//! and compare benchmark runs: bootstrap confidence intervals, a paired
//! t-test, and Cohen's d.

use crate::config::{Settings, STANDARD_ECE_BINS};
use crate::diagnostics::Diagnostics;
use crate::error::{HarnessError, Result};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, StudentsT};
use std::collections::BTreeMap;

/// Shared signature of every metric function
pub type MetricFn = fn(&[usize], &[Vec<f64>]) -> Result<f64>;

/// Metric that yields one value per label instead of a single score
pub type DistributionFn = fn(&[usize], &[Vec<f64>]) -> Result<Vec<f64>>;

pub const ACCURACY: &str = "accuracy";
pub const AVERAGED_TRUELABEL_LIKELIHOOD: &str = "averaged_truelabel_likelihood";
pub const MACRO_F1: &str = "macro_F1";
pub const EXPECTED_CALIBRATION_ERROR_1: &str = "expected_calibration_error_1";

/// Normalized entropy of the mean prior distribution
pub const ENTROPY: &str = "entropy";
/// Per-label distribution of a bias diagnosis
pub const DISTRIBUTION: &str = "distribution";
/// Divergence of the predicted label frequency from the true one
pub const KL_DIVERGENCE: &str = "kl_divergence";

/// Floor applied to predicted frequencies before taking logarithms
const KL_EPSILON: f64 = 1e-12;

/// Index of the first maximum
#[must_use]
pub fn argmax(values: &[f64]) -> usize {
    values
        .iter()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |(best, max), (i, &v)| {
            if v > max {
                (i, v)
            } else {
                (best, max)
            }
        })
        .0
}

/// Expand a label index into a one-hot vector over `labels` labels
///
/// # Errors
///
/// Returns `HarnessError::Index` if `label >= labels`.
pub fn one_hot(label: usize, labels: usize) -> Result<Vec<f64>> {
    if label >= labels {
        return Err(HarnessError::Index {
            what: "predicted label",
            index: label,
            len: labels,
        });
    }
    let mut v = vec![0.0; labels];
    v[label] = 1.0;
    Ok(v)
}

fn validate(ground_truth: &[usize], predictions: &[Vec<f64>]) -> Result<()> {
    if ground_truth.len() != predictions.len() {
        return Err(HarnessError::Length {
            ground_truth: ground_truth.len(),
            predictions: predictions.len(),
        });
    }
    if predictions.is_empty() {
        return Err(HarnessError::EmptyRun);
    }
    for (row, (prediction, &truth)) in predictions.iter().zip(ground_truth).enumerate() {
        if let Some(&value) = prediction.iter().find(|v| !(0.0..=1.0).contains(*v)) {
            return Err(HarnessError::Range { row, value });
        }
        if truth >= prediction.len() {
            return Err(HarnessError::Index {
                what: "ground truth label",
                index: truth,
                len: prediction.len(),
            });
        }
    }
    Ok(())
}

/// Fraction of predictions whose argmax equals the ground truth
///
/// # Errors
///
/// Returns `Range`, `Length`, `Index`, or `EmptyRun` errors on invalid input.
#[allow(clippy::cast_precision_loss)]
pub fn accuracy(ground_truth: &[usize], predictions: &[Vec<f64>]) -> Result<f64> {
    validate(ground_truth, predictions)?;
    let correct = predictions
        .iter()
        .zip(ground_truth)
        .filter(|(p, &t)| argmax(p) == t)
        .count();
    Ok(correct as f64 / ground_truth.len() as f64)
}

/// Mean probability assigned to the true label
///
/// # Errors
///
/// Returns `Range`, `Length`, `Index`, or `EmptyRun` errors on invalid input.
#[allow(clippy::cast_precision_loss)]
pub fn averaged_truelabel_likelihood(
    ground_truth: &[usize],
    predictions: &[Vec<f64>],
) -> Result<f64> {
    validate(ground_truth, predictions)?;
    let total: f64 = predictions
        .iter()
        .zip(ground_truth)
        .map(|(p, &t)| p[t])
        .sum();
    Ok(total / ground_truth.len() as f64)
}

/// Unweighted mean of per-label F1; zero wherever a denominator is zero
///
/// # Errors
///
/// Returns `Range`, `Length`, `Index`, or `EmptyRun` errors on invalid input,
/// `Shape` if prediction vectors disagree in length.
#[allow(clippy::cast_precision_loss)]
pub fn macro_f1(ground_truth: &[usize], predictions: &[Vec<f64>]) -> Result<f64> {
    validate(ground_truth, predictions)?;
    let labels = label_count(predictions)?;

    let mut tp = vec![0_usize; labels];
    let mut fp = vec![0_usize; labels];
    let mut fn_ = vec![0_usize; labels];
    for (p, &t) in predictions.iter().zip(ground_truth) {
        let predicted = argmax(p);
        if predicted == t {
            tp[t] += 1;
        } else {
            fp[predicted] += 1;
            fn_[t] += 1;
        }
    }

    let ratio = |num: usize, den: usize| {
        if den == 0 {
            0.0
        } else {
            num as f64 / den as f64
        }
    };
    let f1_sum: f64 = (0..labels)
        .map(|l| {
            let precision = ratio(tp[l], tp[l] + fp[l]);
            let recall = ratio(tp[l], tp[l] + fn_[l]);
            if precision + recall == 0.0 {
                0.0
            } else {
                2.0 * precision * recall / (precision + recall)
            }
        })
        .sum();
    Ok(f1_sum / labels as f64)
}

/// Expected calibration error with the standard 10 bins
///
/// # Errors
///
/// Returns `Range`, `Length`, `Index`, or `EmptyRun` errors on invalid input.
pub fn expected_calibration_error_1(
    ground_truth: &[usize],
    predictions: &[Vec<f64>],
) -> Result<f64> {
    validate(ground_truth, predictions)?;
    Ok(ece_unchecked(ground_truth, predictions, STANDARD_ECE_BINS))
}

/// Expected calibration error with a caller-chosen bin count.
///
/// A non-standard bin count is recorded as drift and, under a strict policy,
/// replaced by the standard one. The bin count may exceed the number of
/// samples; empty bins contribute zero.
///
/// # Errors
///
/// Returns `HarnessError::Shape` if `bins <= 1`, otherwise as
/// [`expected_calibration_error_1`].
pub fn ece_with_bins(
    ground_truth: &[usize],
    predictions: &[Vec<f64>],
    bins: usize,
    settings: Settings,
    diagnostics: &mut Diagnostics,
) -> Result<f64> {
    check_bins(bins)?;
    let bins = settings.resolve_ece_bins(bins, diagnostics);
    expected_calibration_error(ground_truth, predictions, bins)
}

/// Expected calibration error with an already-resolved bin count.
///
/// More bins than samples is accepted and simply leaves bins empty.
///
/// # Errors
///
/// Returns `HarnessError::Shape` if `bins <= 1`, otherwise as
/// [`expected_calibration_error_1`].
pub fn expected_calibration_error(
    ground_truth: &[usize],
    predictions: &[Vec<f64>],
    bins: usize,
) -> Result<f64> {
    validate(ground_truth, predictions)?;
    check_bins(bins)?;
    Ok(ece_unchecked(ground_truth, predictions, bins))
}

pub(crate) fn check_bins(bins: usize) -> Result<()> {
    if bins <= 1 {
        return Err(HarnessError::Shape(format!(
            "ECE needs more than one bin, got {bins}"
        )));
    }
    Ok(())
}

/// Equal-width `[lo, hi)` confidence bins over `[0, 1]`; a confidence of
/// exactly 1.0 falls in no bin.
#[allow(clippy::cast_precision_loss)]
fn ece_unchecked(ground_truth: &[usize], predictions: &[Vec<f64>], bins: usize) -> f64 {
    let total = ground_truth.len() as f64;
    let scored: Vec<(f64, bool)> = predictions
        .iter()
        .zip(ground_truth)
        .map(|(p, &t)| {
            let predicted = argmax(p);
            (p[predicted], predicted == t)
        })
        .collect();

    (0..bins)
        .map(|b| {
            let lower = b as f64 / bins as f64;
            let upper = (b + 1) as f64 / bins as f64;
            let in_bin: Vec<&(f64, bool)> = scored
                .iter()
                .filter(|(c, _)| lower <= *c && *c < upper)
                .collect();
            if in_bin.is_empty() {
                return 0.0;
            }
            let n = in_bin.len() as f64;
            let acc = in_bin.iter().filter(|(_, hit)| *hit).count() as f64 / n;
            let conf = in_bin.iter().map(|(c, _)| c).sum::<f64>() / n;
            n / total * (acc - conf).abs()
        })
        .sum()
}

/// Number of labels shared by every prediction vector
fn label_count(predictions: &[Vec<f64>]) -> Result<usize> {
    let labels = predictions.first().map_or(0, Vec::len);
    if predictions.iter().any(|p| p.len() != labels) {
        return Err(HarnessError::Shape(
            "prediction vectors disagree on the number of labels".to_string(),
        ));
    }
    Ok(labels)
}

// =============================================================================
// Bias diagnosis
// =============================================================================

/// Mean probability per label over a run.
///
/// On content-free queries this is the model's prior over the label space.
///
/// # Errors
///
/// Returns `Range`, `Length`, `Index`, or `EmptyRun` errors on invalid input,
/// `Shape` if prediction vectors disagree in length.
#[allow(clippy::cast_precision_loss)]
pub fn bias_mean(ground_truth: &[usize], predictions: &[Vec<f64>]) -> Result<Vec<f64>> {
    validate(ground_truth, predictions)?;
    let mut mean = vec![0.0; label_count(predictions)?];
    for p in predictions {
        for (m, v) in mean.iter_mut().zip(p) {
            *m += v;
        }
    }
    let n = predictions.len() as f64;
    for m in &mut mean {
        *m /= n;
    }
    Ok(mean)
}

/// Entropy of the renormalized [`bias_mean`], divided by `ln(labels)`.
///
/// 1.0 means the prior is uniform, 0.0 that all mass sits on one label.
/// A single-label space scores 1.0, as does a run whose probabilities are
/// all zero.
///
/// # Errors
///
/// As [`bias_mean`].
#[allow(clippy::cast_precision_loss)]
pub fn bias_mean_entropy(ground_truth: &[usize], predictions: &[Vec<f64>]) -> Result<f64> {
    let mean = bias_mean(ground_truth, predictions)?;
    let total: f64 = mean.iter().sum();
    if mean.len() < 2 || total <= 0.0 {
        return Ok(1.0);
    }
    let entropy: f64 = mean
        .iter()
        .map(|m| m / total)
        .filter(|p| *p > 0.0)
        .map(|p| -p * p.ln())
        .sum();
    Ok(entropy / (mean.len() as f64).ln())
}

#[allow(clippy::cast_precision_loss)]
fn frequency(labels: impl Iterator<Item = usize>, width: usize, n: usize) -> Vec<f64> {
    let mut counts = vec![0.0; width];
    for label in labels {
        counts[label] += 1.0;
    }
    counts.iter().map(|c| c / n as f64).collect()
}

/// Share of the run predicted as each label (argmax frequency)
///
/// # Errors
///
/// As [`bias_mean`].
pub fn post_bias_distribution(ground_truth: &[usize], predictions: &[Vec<f64>]) -> Result<Vec<f64>> {
    validate(ground_truth, predictions)?;
    let width = label_count(predictions)?;
    Ok(frequency(
        predictions.iter().map(|p| argmax(p)),
        width,
        predictions.len(),
    ))
}

/// `KL(true label frequency || predicted label frequency)` in nats.
///
/// Predicted frequencies are floored at `1e-12`, so a label the model never
/// picks yields a large but finite divergence. Zero when the model predicts
/// every label exactly as often as it occurs.
///
/// # Errors
///
/// As [`bias_mean`].
pub fn post_bias_kl_divergence(ground_truth: &[usize], predictions: &[Vec<f64>]) -> Result<f64> {
    let predicted = post_bias_distribution(ground_truth, predictions)?;
    let truth = frequency(ground_truth.iter().copied(), predicted.len(), ground_truth.len());
    Ok(truth
        .iter()
        .zip(&predicted)
        .filter(|(t, _)| **t > 0.0)
        .map(|(t, q)| t * (t / q.max(KL_EPSILON)).ln())
        .sum())
}

/// Ordered name → metric function table.
///
/// Scalar metrics and per-label distribution metrics live in separate
/// tables; a name may appear in only one of them.
#[derive(Debug, Clone, Default)]
pub struct MetricRegistry {
    metrics: BTreeMap<String, MetricFn>,
    distributions: BTreeMap<String, DistributionFn>,
}

impl MetricRegistry {
    /// Empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The four standard metrics
    #[must_use]
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register(ACCURACY, accuracy);
        registry.register(AVERAGED_TRUELABEL_LIKELIHOOD, averaged_truelabel_likelihood);
        registry.register(MACRO_F1, macro_f1);
        registry.register(EXPECTED_CALIBRATION_ERROR_1, expected_calibration_error_1);
        registry
    }

    /// Entropy and mean distribution of content-free predictions
    #[must_use]
    pub fn prior_bias() -> Self {
        let mut registry = Self::new();
        registry.register(ENTROPY, bias_mean_entropy);
        registry.register_distribution(DISTRIBUTION, bias_mean);
        registry
    }

    /// Divergence and predicted-label distribution of real predictions
    #[must_use]
    pub fn post_bias() -> Self {
        let mut registry = Self::new();
        registry.register(KL_DIVERGENCE, post_bias_kl_divergence);
        registry.register_distribution(DISTRIBUTION, post_bias_distribution);
        registry
    }

    /// Add or replace a scalar metric
    pub fn register(&mut self, name: impl Into<String>, metric: MetricFn) {
        let name = name.into();
        self.distributions.remove(&name);
        self.metrics.insert(name, metric);
    }

    /// Add or replace a distribution metric
    pub fn register_distribution(&mut self, name: impl Into<String>, metric: DistributionFn) {
        let name = name.into();
        self.metrics.remove(&name);
        self.distributions.insert(name, metric);
    }

    /// Remove a scalar metric
    pub fn remove(&mut self, name: &str) -> Option<MetricFn> {
        self.metrics.remove(name)
    }

    pub fn remove_distribution(&mut self, name: &str) -> Option<DistributionFn> {
        self.distributions.remove(name)
    }

    /// Names of the scalar metrics
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.metrics.keys().map(String::as_str)
    }

    pub fn distribution_names(&self) -> impl Iterator<Item = &str> {
        self.distributions.keys().map(String::as_str)
    }

    /// Scalar and distribution metrics together
    #[must_use]
    pub fn len(&self) -> usize {
        self.metrics.len() + self.distributions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty() && self.distributions.is_empty()
    }

    /// Evaluate every scalar metric on one run
    ///
    /// # Errors
    ///
    /// Returns the first metric error encountered.
    pub fn evaluate(
        &self,
        ground_truth: &[usize],
        predictions: &[Vec<f64>],
    ) -> Result<BTreeMap<String, f64>> {
        self.metrics
            .iter()
            .map(|(name, metric)| Ok((name.clone(), metric(ground_truth, predictions)?)))
            .collect()
    }

    /// Evaluate every distribution metric on one run
    ///
    /// # Errors
    ///
    /// Returns the first metric error encountered.
    pub fn evaluate_distributions(
        &self,
        ground_truth: &[usize],
        predictions: &[Vec<f64>],
    ) -> Result<BTreeMap<String, Vec<f64>>> {
        self.distributions
            .iter()
            .map(|(name, metric)| Ok((name.clone(), metric(ground_truth, predictions)?)))
            .collect()
    }
}

// =============================================================================
// Trial and dataset statistics
// =============================================================================

/// Mean score over trials or datasets; zero for no scores
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn compute_mean(scores: &[f64]) -> f64 {
    if scores.is_empty() {
        return 0.0;
    }
    scores.iter().sum::<f64>() / scores.len() as f64
}

/// Spread of scores with the `n - 1` denominator
#[allow(clippy::cast_precision_loss)]
fn compute_std(scores: &[f64]) -> f64 {
    if scores.len() < 2 {
        return 0.0;
    }
    let mean = compute_mean(scores);
    let variance =
        scores.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (scores.len() - 1) as f64;
    variance.sqrt()
}

/// Settings for trial confidence intervals and dataset comparisons
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatConfig {
    /// Resamples drawn for a confidence interval
    pub bootstrap_n: usize,
    /// Interval coverage, 0.95 by default
    pub confidence: f64,
    /// Family-wise significance level of a comparison
    pub alpha: f64,
    /// Seed of the resampling generator
    pub seed: u64,
}

impl Default for StatConfig {
    fn default() -> Self {
        Self {
            bootstrap_n: 10_000,
            confidence: 0.95,
            alpha: 0.05,
            seed: crate::config::STANDARD_SEED,
        }
    }
}

/// Percentile bootstrap interval around the mean of per-trial accuracies.
///
/// Trials are resampled with replacement from a generator seeded with
/// `config.seed`, so the interval of a run is as reproducible as the run
/// itself. With fewer than two trials the interval collapses onto the mean.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_sign_loss,
    clippy::cast_possible_truncation
)]
pub fn bootstrap_ci(trial_scores: &[f64], config: &StatConfig) -> (f64, f64) {
    let trials = trial_scores.len();
    if trials < 2 || config.bootstrap_n == 0 {
        let mean = compute_mean(trial_scores);
        return (mean, mean);
    }

    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let mut resampled: Vec<f64> = (0..config.bootstrap_n)
        .map(|_| {
            (0..trials)
                .map(|_| trial_scores[rng.next_u64() as usize % trials])
                .sum::<f64>()
                / trials as f64
        })
        .collect();
    resampled.sort_by(f64::total_cmp);

    let tail = (1.0 - config.confidence) / 2.0;
    let last = resampled.len() - 1;
    let lower = ((config.bootstrap_n as f64 * tail).floor() as usize).min(last);
    let upper = ((config.bootstrap_n as f64 * (1.0 - tail)).ceil() as usize).min(last);
    (resampled[lower], resampled[upper])
}

/// Size class of a Cohen's d value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectSize {
    Negligible,
    Small,
    Medium,
    Large,
}

impl EffectSize {
    /// Classify with the 0.2 / 0.5 / 0.8 thresholds on `|d|`
    #[must_use]
    pub fn from_cohens_d(d: f64) -> Self {
        match d.abs() {
            x if x < 0.2 => Self::Negligible,
            x if x < 0.5 => Self::Small,
            x if x < 0.8 => Self::Medium,
            _ => Self::Large,
        }
    }
}

impl std::fmt::Display for EffectSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Negligible => "negligible",
            Self::Small => "small",
            Self::Medium => "medium",
            Self::Large => "large",
        })
    }
}

/// Outcome of comparing one metric between two benchmark runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignificanceResult {
    pub t_statistic: f64,
    pub p_value: f64,
    pub degrees_of_freedom: f64,
    /// `p_value` below the (corrected) alpha
    pub is_significant: bool,
    /// Mean per-dataset difference over its spread
    pub cohens_d: f64,
    pub effect: EffectSize,
}

/// Paired t-test on one metric of two benchmark runs.
///
/// `scores_a[i]` and `scores_b[i]` are the scores of the same dataset under
/// the two runs. Returns `None` when the test is undefined: unequal lengths,
/// fewer than two shared datasets, or identical differences on every
/// dataset.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn paired_t_test(scores_a: &[f64], scores_b: &[f64], alpha: f64) -> Option<SignificanceResult> {
    if scores_a.len() != scores_b.len() || scores_a.len() < 2 {
        return None;
    }

    let gains: Vec<f64> = scores_a.iter().zip(scores_b).map(|(a, b)| a - b).collect();
    let mean_gain = compute_mean(&gains);
    let spread = compute_std(&gains);
    if spread < f64::EPSILON {
        return None;
    }

    let datasets = gains.len() as f64;
    let t_statistic = mean_gain / (spread / datasets.sqrt());
    let degrees_of_freedom = datasets - 1.0;
    let t_dist = StudentsT::new(0.0, 1.0, degrees_of_freedom).ok()?;
    let p_value = 2.0 * (1.0 - t_dist.cdf(t_statistic.abs()));

    let cohens_d = mean_gain / spread;
    Some(SignificanceResult {
        t_statistic,
        p_value,
        degrees_of_freedom,
        is_significant: p_value < alpha,
        cohens_d,
        effect: EffectSize::from_cohens_d(cohens_d),
    })
}

/// Per-metric alpha when one comparison tests `metric_count` metrics
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn bonferroni_correction(alpha: f64, metric_count: usize) -> f64 {
    if metric_count == 0 {
        alpha
    } else {
        alpha / metric_count as f64
    }
}

#[cfg(test)]
#[allow(
    clippy::float_cmp,
    clippy::cast_precision_loss,
    clippy::unwrap_used
)]
mod tests {
    use super::*;
    use crate::diagnostics::ConfigDrift;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    // =========================================================================
    // Classification metrics
    // =========================================================================

    #[test]
    fn test_accuracy_reference_values() {
        assert_eq!(
            accuracy(&[0, 1], &[vec![1.0, 0.0], vec![0.0, 1.0]]).unwrap(),
            1.0
        );
        assert_eq!(
            accuracy(&[0, 1], &[vec![0.0, 1.0], vec![0.0, 1.0]]).unwrap(),
            0.5
        );
    }

    #[test]
    fn test_argmax_first_maximum() {
        assert_eq!(argmax(&[0.5, 0.5]), 0);
        assert_eq!(argmax(&[0.1, 0.7, 0.2]), 1);
    }

    #[test]
    fn test_averaged_truelabel_likelihood() {
        let value =
            averaged_truelabel_likelihood(&[0, 1], &[vec![0.8, 0.2], vec![0.4, 0.6]]).unwrap();
        assert!(close(value, 0.7));
    }

    #[test]
    fn test_macro_f1_hand_computed() {
        // label 0: P=1, R=0.5, F1=2/3; label 1: P=2/3, R=1, F1=0.8
        let predictions = vec![
            vec![0.9, 0.1],
            vec![0.3, 0.7],
            vec![0.2, 0.8],
            vec![0.4, 0.6],
        ];
        let value = macro_f1(&[0, 0, 1, 1], &predictions).unwrap();
        assert!(close(value, (2.0 / 3.0 + 0.8) / 2.0));
    }

    #[test]
    fn test_macro_f1_zero_denominators() {
        // label 1 is never predicted nor true
        let value = macro_f1(&[0, 0], &[vec![1.0, 0.0], vec![1.0, 0.0]]).unwrap();
        assert!(close(value, 0.5));
    }

    #[test]
    fn test_ece_two_bins() {
        let mut diagnostics = Diagnostics::new();
        let value = ece_with_bins(
            &[0, 1],
            &[vec![0.9, 0.1], vec![0.4, 0.6]],
            2,
            Settings::lenient(),
            &mut diagnostics,
        )
        .unwrap();
        // both confidences land in [0.5, 1): accuracy 1, mean confidence 0.75
        assert!(close(value, 0.25));
        assert!(matches!(
            diagnostics.warnings()[0],
            ConfigDrift::EceBins { .. }
        ));
    }

    #[test]
    fn test_ece_hand_computed_four_samples() {
        // bins of width 0.1: 0.9 (hit) and 0.7 (miss), 0.6 (hit) and 0.6 (hit)
        let predictions = vec![
            vec![0.9, 0.1],
            vec![0.7, 0.3],
            vec![0.4, 0.6],
            vec![0.6, 0.4],
        ];
        let value = expected_calibration_error_1(&[0, 1, 1, 0], &predictions).unwrap();
        let expected = 0.25 * 0.1 + 0.25 * 0.7 + 0.5 * 0.4;
        assert!(close(value, expected), "ece = {value}");
    }

    #[test]
    fn test_ece_more_bins_than_samples() {
        // 0.9 (hit) and 0.7 (miss) each sit alone; the other 98 bins are empty
        let predictions = vec![vec![0.9, 0.1], vec![0.7, 0.3]];
        let value = expected_calibration_error(&[0, 1], &predictions, 100).unwrap();
        assert!(close(value, 0.5 * 0.1 + 0.5 * 0.7), "ece = {value}");
    }

    #[test]
    fn test_ece_full_confidence_lands_in_no_bin() {
        let value = expected_calibration_error_1(&[1], &[vec![0.0, 1.0]]).unwrap();
        assert_eq!(value, 0.0);
    }

    #[test]
    fn test_ece_strict_reverts_bins() {
        let mut diagnostics = Diagnostics::new();
        let predictions = vec![vec![0.9, 0.1], vec![0.4, 0.6]];
        let strict =
            ece_with_bins(&[0, 1], &predictions, 2, Settings::strict(), &mut diagnostics).unwrap();
        let standard = expected_calibration_error_1(&[0, 1], &predictions).unwrap();
        assert_eq!(strict, standard);
    }

    #[test]
    fn test_ece_rejects_single_bin() {
        let mut diagnostics = Diagnostics::new();
        let result = ece_with_bins(
            &[0],
            &[vec![1.0, 0.0]],
            1,
            Settings::lenient(),
            &mut diagnostics,
        );
        assert!(matches!(result, Err(HarnessError::Shape(_))));
    }

    #[test]
    fn test_range_error() {
        let result = accuracy(&[0], &[vec![1.2, -0.2]]);
        assert!(matches!(result, Err(HarnessError::Range { row: 0, .. })));
    }

    #[test]
    fn test_length_error() {
        let result = macro_f1(&[0, 1], &[vec![1.0, 0.0]]);
        assert_eq!(
            result,
            Err(HarnessError::Length {
                ground_truth: 2,
                predictions: 1
            })
        );
    }

    #[test]
    fn test_empty_run() {
        assert_eq!(accuracy(&[], &[]), Err(HarnessError::EmptyRun));
    }

    #[test]
    fn test_one_hot() {
        assert_eq!(one_hot(1, 3).unwrap(), vec![0.0, 1.0, 0.0]);
        assert!(one_hot(3, 3).is_err());
    }

    #[test]
    fn test_registry_standard_order_and_values() {
        let registry = MetricRegistry::standard();
        let names: Vec<_> = registry.names().collect();
        assert_eq!(
            names,
            [
                ACCURACY,
                AVERAGED_TRUELABEL_LIKELIHOOD,
                EXPECTED_CALIBRATION_ERROR_1,
                MACRO_F1
            ]
        );

        let scores = registry
            .evaluate(&[0, 1], &[vec![1.0, 0.0], vec![0.0, 1.0]])
            .unwrap();
        assert_eq!(scores[ACCURACY], 1.0);
        assert_eq!(scores[MACRO_F1], 1.0);
    }

    #[test]
    fn test_registry_custom_metric() {
        fn always_half(_: &[usize], _: &[Vec<f64>]) -> Result<f64> {
            Ok(0.5)
        }
        let mut registry = MetricRegistry::new();
        registry.register("half", always_half);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.evaluate(&[0], &[vec![1.0]]).unwrap()["half"], 0.5);
        assert!(registry.remove("half").is_some());
        assert!(registry.is_empty());
    }

    // =========================================================================
    // Bias diagnosis
    // =========================================================================

    #[test]
    fn test_bias_mean_averages_per_label() {
        let mean = bias_mean(&[0, 0], &[vec![0.8, 0.2], vec![0.6, 0.4]]).unwrap();
        assert!(close(mean[0], 0.7) && close(mean[1], 0.3));
        assert!(matches!(
            bias_mean(&[0, 0], &[vec![0.5, 0.5], vec![1.0]]),
            Err(HarnessError::Shape(_))
        ));
    }

    #[test]
    fn test_bias_mean_entropy_extremes() {
        let uniform = vec![vec![0.25; 4]; 3];
        assert!(close(bias_mean_entropy(&[0, 1, 2], &uniform).unwrap(), 1.0));

        let peaked = vec![vec![1.0, 0.0, 0.0]; 2];
        assert!(close(bias_mean_entropy(&[0, 0], &peaked).unwrap(), 0.0));

        // unnormalized probabilities are renormalized first
        let halved = vec![vec![0.1, 0.1]; 2];
        assert!(close(bias_mean_entropy(&[0, 1], &halved).unwrap(), 1.0));
    }

    #[test]
    fn test_bias_mean_entropy_hand_computed() {
        // mean prior [0.75, 0.25]: H = 0.5623 nats, over ln 2
        let value = bias_mean_entropy(&[0], &[vec![0.75, 0.25]]).unwrap();
        let expected = -(0.75_f64 * 0.75_f64.ln() + 0.25 * 0.25_f64.ln()) / 2.0_f64.ln();
        assert!(close(value, expected));
    }

    #[test]
    fn test_post_bias_distribution_counts_argmax() {
        let predictions = vec![
            vec![0.6, 0.3, 0.1],
            vec![0.5, 0.4, 0.1],
            vec![0.2, 0.7, 0.1],
            vec![0.9, 0.05, 0.05],
        ];
        let distribution = post_bias_distribution(&[0, 1, 2, 0], &predictions).unwrap();
        assert_eq!(distribution, vec![0.75, 0.25, 0.0]);
    }

    #[test]
    fn test_post_bias_kl_divergence() {
        // predictions match the true frequencies exactly
        let matched = post_bias_kl_divergence(&[0, 1], &[vec![0.9, 0.1], vec![0.2, 0.8]]).unwrap();
        assert!(close(matched, 0.0));

        // truth [0.5, 0.5], predicted [0.75, 0.25]
        let skewed = post_bias_kl_divergence(
            &[0, 1, 0, 1],
            &[
                vec![0.9, 0.1],
                vec![0.6, 0.4],
                vec![0.7, 0.3],
                vec![0.3, 0.7],
            ],
        )
        .unwrap();
        let expected = 0.5 * (0.5_f64 / 0.75).ln() + 0.5 * (0.5_f64 / 0.25).ln();
        assert!(close(skewed, expected));

        // a never-predicted true label stays finite
        let collapsed = post_bias_kl_divergence(&[0, 1], &[vec![1.0, 0.0], vec![1.0, 0.0]]).unwrap();
        assert!(collapsed.is_finite() && collapsed > 10.0);
    }

    #[test]
    fn test_bias_registries() {
        let prior = MetricRegistry::prior_bias();
        assert_eq!(prior.names().collect::<Vec<_>>(), [ENTROPY]);
        assert_eq!(prior.distribution_names().collect::<Vec<_>>(), [DISTRIBUTION]);
        assert_eq!(prior.len(), 2);

        let predictions = vec![vec![0.5, 0.5], vec![0.5, 0.5]];
        let distributions = prior.evaluate_distributions(&[0, 1], &predictions).unwrap();
        assert_eq!(distributions[DISTRIBUTION], vec![0.5, 0.5]);

        let post = MetricRegistry::post_bias();
        let scores = post.evaluate(&[0, 1], &[vec![0.9, 0.1], vec![0.2, 0.8]]).unwrap();
        assert!(close(scores[KL_DIVERGENCE], 0.0));
    }

    #[test]
    fn test_register_moves_name_between_tables() {
        let mut registry = MetricRegistry::prior_bias();
        registry.register(DISTRIBUTION, accuracy);
        assert_eq!(registry.distribution_names().count(), 0);
        assert_eq!(registry.len(), 2);
        assert!(registry.remove_distribution(DISTRIBUTION).is_none());
        assert!(registry.remove(DISTRIBUTION).is_some());
    }

    // =========================================================================
    // Trial and dataset statistics
    // =========================================================================

    #[test]
    fn test_trial_spread_uses_n_minus_one() {
        let accuracies = vec![0.50, 0.55, 0.60, 0.65];
        // squared deviations sum to 0.0125 over 3 degrees of freedom
        assert!(close(compute_std(&accuracies), (0.0125_f64 / 3.0).sqrt()));
        assert_eq!(compute_std(&[0.7]), 0.0);
        assert_eq!(compute_mean(&[]), 0.0);
    }

    #[test]
    fn test_trial_ci_is_reproducible() {
        let accuracies = [0.61, 0.64, 0.58, 0.66, 0.63];
        let config = StatConfig::default();
        assert_eq!(
            bootstrap_ci(&accuracies, &config),
            bootstrap_ci(&accuracies, &config)
        );

        let reseeded = StatConfig {
            seed: 7,
            ..StatConfig::default()
        };
        let (lower, upper) = bootstrap_ci(&accuracies, &reseeded);
        assert!(lower >= 0.58 && upper <= 0.66);
    }

    #[test]
    fn test_trial_ci_brackets_mean_accuracy() {
        let accuracies: Vec<f64> = (0..64).map(|t| 0.70 + f64::from(t % 8) * 0.005).collect();
        let (lower, upper) = bootstrap_ci(&accuracies, &StatConfig::default());
        let mean = compute_mean(&accuracies);
        assert!(lower <= mean && mean <= upper, "[{lower}, {upper}] vs {mean}");
        assert!(upper - lower < 0.02);
    }

    #[test]
    fn test_single_trial_ci_collapses() {
        assert_eq!(bootstrap_ci(&[0.75], &StatConfig::default()), (0.75, 0.75));
        let no_resamples = StatConfig {
            bootstrap_n: 0,
            ..StatConfig::default()
        };
        assert_eq!(bootstrap_ci(&[0.5, 0.7], &no_resamples), (0.6, 0.6));
    }

    #[test]
    fn test_dataset_comparison_detects_calibration_gain() {
        // calibrated vs raw accuracy on eight datasets, gains 0.08 to 0.12
        let raw = [0.52, 0.61, 0.47, 0.70, 0.58, 0.66, 0.49, 0.55];
        let calibrated: Vec<f64> = raw
            .iter()
            .enumerate()
            .map(|(i, r)| r + 0.08 + (i % 3) as f64 * 0.02)
            .collect();
        let result = paired_t_test(&calibrated, &raw, 0.05).unwrap();
        assert!(result.is_significant, "p = {}", result.p_value);
        assert!(result.t_statistic > 0.0);
        assert_eq!(result.degrees_of_freedom, 7.0);
        assert_eq!(result.effect, EffectSize::Large);
    }

    #[test]
    fn test_dataset_comparison_undefined_cases() {
        // same gain on every dataset
        assert!(paired_t_test(&[0.5, 0.25], &[0.25, 0.0], 0.05).is_none());
        // one shared dataset
        assert!(paired_t_test(&[0.9], &[0.8], 0.05).is_none());
        // runs over different dataset counts
        assert!(paired_t_test(&[0.9, 0.8, 0.7], &[0.8], 0.05).is_none());
    }

    #[test]
    fn test_bonferroni_splits_alpha_across_metrics() {
        assert!(close(bonferroni_correction(0.05, 4), 0.0125));
        assert!(close(bonferroni_correction(0.05, 0), 0.05));
    }

    #[test]
    fn test_effect_size_classes() {
        assert_eq!(EffectSize::from_cohens_d(0.1), EffectSize::Negligible);
        assert_eq!(EffectSize::from_cohens_d(0.3), EffectSize::Small);
        assert_eq!(EffectSize::from_cohens_d(0.6), EffectSize::Medium);
        assert_eq!(EffectSize::from_cohens_d(-0.9), EffectSize::Large);
        assert_eq!(EffectSize::Medium.to_string(), "medium");
    }
}
