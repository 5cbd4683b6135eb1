//! Evaluation of one inference function on one dataset.
//!
//! For every trial and every test record the experimentor renders a prompt
//! from that position's demonstration set, calls the inference function,
//! and collects the (ground truth, prediction) pair. Calls are strictly
//! sequential. Collected pairs live in a [`RunAccumulator`] that the caller
//! may own, so a run aborted by a failing inference call can be resumed.
//!
//! Besides plain runs, an experimentor can run in noisy-channel mode (one
//! prompt per candidate label) and can diagnose label bias: the model's
//! prior on content-free or random-word queries, and the skew of its
//! predictions on real queries.

use crate::calibration::{
    batch_calibrate, demo_lines, random_word_line, Calibrator, InferenceOutput,
};
use crate::config::{
    ExperimentConfig, Settings, SplitSizes, STANDARD_CALIBRATION_EPISODES,
    STANDARD_DIAGNOSIS_QUERY_LENGTH, STANDARD_ECE_BINS,
};
use crate::dataset::LabeledDataset;
use crate::diagnostics::{ConfigDrift, Diagnostics};
use crate::error::{HarnessError, Result};
use crate::metrics::{
    self, bootstrap_ci, MetricRegistry, StatConfig, EXPECTED_CALIBRATION_ERROR_1,
};
use crate::prompt::PromptWriter;
use crate::random::StableRandom;
use crate::sampler::DemonstrationSampler;
use crate::split::TripletSplit;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// What an inference function returns for one prompt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Prediction {
    /// A single predicted label index
    Label(usize),
    /// One probability per label
    Probabilities(Vec<f64>),
}

impl Prediction {
    /// Probability vector over `labels` labels; label indices become one-hot
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::Index` for an out-of-range label and
    /// `HarnessError::Shape` for a vector of the wrong length.
    pub fn into_probabilities(self, labels: usize) -> Result<Vec<f64>> {
        match self {
            Self::Label(label) => metrics::one_hot(label, labels),
            Self::Probabilities(p) if p.len() == labels => Ok(p),
            Self::Probabilities(p) => Err(HarnessError::Shape(format!(
                "prediction has {} probabilities, label space has {labels}",
                p.len()
            ))),
        }
    }
}

impl From<usize> for Prediction {
    fn from(label: usize) -> Self {
        Self::Label(label)
    }
}

impl From<Vec<f64>> for Prediction {
    fn from(probs: Vec<f64>) -> Self {
        Self::Probabilities(probs)
    }
}

impl From<InferenceOutput> for Prediction {
    fn from(output: InferenceOutput) -> Self {
        Self::Probabilities(output.label_probs)
    }
}

/// Aligned ground-truth indices and probability vectors of one run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunAccumulator {
    ground_truth: Vec<usize>,
    predictions: Vec<Vec<f64>>,
}

impl RunAccumulator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, ground_truth: usize, prediction: Vec<f64>) {
        self.ground_truth.push(ground_truth);
        self.predictions.push(prediction);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ground_truth.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ground_truth.is_empty()
    }

    #[must_use]
    pub fn ground_truth(&self) -> &[usize] {
        &self.ground_truth
    }

    #[must_use]
    pub fn predictions(&self) -> &[Vec<f64>] {
        &self.predictions
    }

    pub fn clear(&mut self) {
        self.ground_truth.clear();
        self.predictions.clear();
    }
}

/// Scores of one run plus per-trial detail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentOutcome {
    pub dataset: String,
    pub scores: BTreeMap<String, f64>,
    /// Accuracy of each trial over the whole test set
    pub trial_accuracy: Vec<f64>,
    /// Bootstrap confidence interval of the per-trial accuracy
    pub accuracy_ci: (f64, f64),
    pub warnings: Vec<ConfigDrift>,
}

/// Which label bias a diagnosis run measures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BiasKind {
    /// Real demonstrations followed by an empty query
    Contextual,
    /// Real demonstrations followed by `query_length` random in-domain words
    Domain { query_length: usize },
    /// Real demonstrations and real test queries
    Post,
}

impl BiasKind {
    /// Domain bias with the standard 128-word query
    #[must_use]
    pub const fn domain_standard() -> Self {
        Self::Domain {
            query_length: STANDARD_DIAGNOSIS_QUERY_LENGTH,
        }
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Contextual => "contextual",
            Self::Domain { .. } => "domain",
            Self::Post => "post",
        }
    }

    /// Prior-bias metrics for content-free kinds, post-bias metrics otherwise
    #[must_use]
    pub fn metrics(&self) -> MetricRegistry {
        match self {
            Self::Contextual | Self::Domain { .. } => MetricRegistry::prior_bias(),
            Self::Post => MetricRegistry::post_bias(),
        }
    }
}

/// Scores of one bias diagnosis run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BiasOutcome {
    pub dataset: String,
    pub kind: BiasKind,
    pub scores: BTreeMap<String, f64>,
    /// Per-label values, aligned with the label space
    pub distributions: BTreeMap<String, Vec<f64>>,
}

/// Query line source of a bias diagnosis run
struct BiasQueries<'a> {
    kind: BiasKind,
    split: &'a TripletSplit,
    empty: Vec<String>,
    bag_rng: StableRandom,
}

impl<'a> BiasQueries<'a> {
    fn new(kind: BiasKind, split: &'a TripletSplit) -> Result<Self> {
        if matches!(kind, BiasKind::Domain { .. }) && split.demonstration.is_empty() {
            return Err(HarnessError::Size {
                dataset: split.demonstration.name().to_string(),
                requested: 1,
                available: 0,
            });
        }
        Ok(Self {
            kind,
            split,
            empty: vec![String::new(); split.test.input_field_count()],
            bag_rng: StableRandom::new(),
        })
    }

    fn line(&mut self, index: usize) -> Result<Vec<String>> {
        match self.kind {
            BiasKind::Contextual => Ok(self.empty.clone()),
            BiasKind::Domain { query_length } => Ok(random_word_line(
                &mut self.bag_rng,
                &self.split.demonstration,
                query_length,
            )),
            BiasKind::Post => Ok(self.split.test.get(index)?.inputs.clone()),
        }
    }
}

/// Runs one dataset's evaluation
#[derive(Debug, Clone)]
pub struct Experimentor {
    split: Arc<TripletSplit>,
    writer: PromptWriter,
    k: usize,
    allow_replacement: bool,
    default_repeat_times: usize,
    repeat_times: usize,
    sampler: DemonstrationSampler,
    metrics: MetricRegistry,
    ece_bins: usize,
    settings: Settings,
    diagnostics: Diagnostics,
}

impl Experimentor {
    /// Build an experimentor over an existing split.
    ///
    /// The demonstration sampler is drawn once here, one index set per
    /// (trial, test record) position.
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::Size` if `k` exceeds the demonstration set and
    /// `allow_replacement` is off.
    pub fn new(split: TripletSplit, config: ExperimentConfig, settings: Settings) -> Result<Self> {
        let mut diagnostics = split.diagnostics().clone();
        let repeat_times = settings.resolve_repeat_times(config.repeat_times, &mut diagnostics);
        let split = Arc::new(split);
        let sampler = build_sampler(
            &split,
            config.k,
            config.allow_replacement,
            repeat_times,
            &mut diagnostics,
        )?;

        tracing::info!(
            dataset = %split.dataset_name(),
            k = config.k,
            repeat_times,
            test = split.test.len(),
            "Experimentor ready"
        );

        Ok(Self {
            writer: PromptWriter::new(Arc::clone(&split)),
            split,
            k: config.k,
            allow_replacement: config.allow_replacement,
            default_repeat_times: repeat_times,
            repeat_times,
            sampler,
            metrics: MetricRegistry::standard(),
            ece_bins: STANDARD_ECE_BINS,
            settings,
            diagnostics,
        })
    }

    /// Split `source` and build an experimentor over the result
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::Size` if the source is too small for the split
    /// or `k` exceeds the demonstration set.
    pub fn from_dataset(
        source: &LabeledDataset,
        sizes: SplitSizes,
        config: ExperimentConfig,
        settings: Settings,
    ) -> Result<Self> {
        Self::new(TripletSplit::new(source, sizes, settings)?, config, settings)
    }

    /// Standard split sizes, standard configuration
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::Size` if the source is too small.
    pub fn standard(source: &LabeledDataset) -> Result<Self> {
        Self::new(
            TripletSplit::standard(source)?,
            ExperimentConfig::default(),
            Settings::default(),
        )
    }

    #[must_use]
    pub fn split(&self) -> &TripletSplit {
        &self.split
    }

    /// Edit the split's furniture, then rebuild the prompt writer from it.
    ///
    /// Edits made earlier through [`Self::prompt_writer_mut`] are replaced by
    /// the split's furniture.
    pub fn edit_split<R>(&mut self, edit: impl FnOnce(&mut TripletSplit) -> R) -> R {
        let result = edit(Arc::make_mut(&mut self.split));
        self.resync_prompt_writer();
        result
    }

    /// Discard prompt-writer edits and take the split's furniture again
    pub fn resync_prompt_writer(&mut self) {
        self.writer.resync(Arc::clone(&self.split));
    }

    #[must_use]
    pub const fn prompt_writer(&self) -> &PromptWriter {
        &self.writer
    }

    pub fn prompt_writer_mut(&mut self) -> &mut PromptWriter {
        &mut self.writer
    }

    #[must_use]
    pub fn calibration_set(&self) -> &LabeledDataset {
        &self.split.calibration
    }

    #[must_use]
    pub fn demonstration_set(&self) -> &LabeledDataset {
        &self.split.demonstration
    }

    #[must_use]
    pub fn test_set(&self) -> &LabeledDataset {
        &self.split.test
    }

    #[must_use]
    pub const fn k(&self) -> usize {
        self.k
    }

    #[must_use]
    pub const fn repeat_times(&self) -> usize {
        self.repeat_times
    }

    #[must_use]
    pub const fn sampler(&self) -> &DemonstrationSampler {
        &self.sampler
    }

    #[must_use]
    pub const fn metrics(&self) -> &MetricRegistry {
        &self.metrics
    }

    pub fn metrics_mut(&mut self) -> &mut MetricRegistry {
        &mut self.metrics
    }

    #[must_use]
    pub const fn ece_bins(&self) -> usize {
        self.ece_bins
    }

    /// Use a non-standard ECE bin count for `expected_calibration_error_1`
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::Shape` if `bins <= 1`.
    pub fn set_ece_bins(&mut self, bins: usize) -> Result<()> {
        metrics::check_bins(bins)?;
        self.ece_bins = self.settings.resolve_ece_bins(bins, &mut self.diagnostics);
        Ok(())
    }

    /// Every drift warning recorded by the split, this experimentor, and its
    /// prompt writer
    #[must_use]
    pub fn diagnostics(&self) -> Diagnostics {
        let mut all = self.diagnostics.clone();
        all.extend_from(self.writer.diagnostics());
        all
    }

    /// Total number of inference calls in one run
    #[must_use]
    pub fn run_length(&self) -> usize {
        self.repeat_times * self.split.test.len()
    }

    /// Restore the originally drawn sampler and repeat count
    pub fn reset_demonstration_sampler(&mut self) {
        self.sampler.reset();
        self.repeat_times = self.default_repeat_times;
    }

    /// Fix the demonstrations of every test record; the run becomes a single trial
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::Shape` unless there is one set of `k` indices
    /// per test record.
    pub fn set_demonstration_sampler(&mut self, sets: Vec<Vec<usize>>) -> Result<()> {
        self.diagnostics.record(ConfigDrift::SamplerOverride {
            dataset: self.split.dataset_name().to_string(),
        });
        if let Some(&bad) = sets
            .iter()
            .flatten()
            .find(|&&i| i >= self.split.demonstration.len())
        {
            return Err(HarnessError::Index {
                what: "demonstration",
                index: bad,
                len: self.split.demonstration.len(),
            });
        }
        self.sampler.override_with(sets, self.split.test.len())?;
        self.repeat_times = 1;
        Ok(())
    }

    /// Redraw the sampler for a new `k`, optionally rebuilding the prompt
    /// writer from the split
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::Size` as [`Self::new`].
    pub fn reinitialize(&mut self, k: usize, keep_prompt_writer: bool) -> Result<()> {
        self.sampler = build_sampler(
            &self.split,
            k,
            self.allow_replacement,
            self.default_repeat_times,
            &mut self.diagnostics,
        )?;
        self.k = k;
        self.repeat_times = self.default_repeat_times;
        if !keep_prompt_writer {
            self.writer = PromptWriter::new(Arc::clone(&self.split));
        }
        Ok(())
    }

    /// Train `calibrator` on the calibration set with this run's `k` and prompt writer
    ///
    /// # Errors
    ///
    /// See [`Calibrator::train`].
    pub fn train_calibrator<F>(
        &self,
        calibrator: &mut Calibrator,
        inference: F,
        episodes: Option<usize>,
    ) -> Result<()>
    where
        F: FnMut(&str, &[String]) -> anyhow::Result<InferenceOutput>,
    {
        calibrator.train(
            &self.writer,
            inference,
            &self.split.calibration,
            episodes.unwrap_or(STANDARD_CALIBRATION_EPISODES),
            self.k,
        )
    }

    /// Evaluate `inference` over every trial and test record
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::Inference` if the inference function fails, or
    /// any metric error.
    pub fn run<F>(&mut self, inference: F) -> Result<BTreeMap<String, f64>>
    where
        F: FnMut(&str, &[String]) -> anyhow::Result<Prediction>,
    {
        let mut accumulator = RunAccumulator::new();
        self.run_resumable(&mut accumulator, inference)
    }

    /// Like [`Self::run`], but collects into a caller-owned accumulator and
    /// skips positions it already holds.
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::Shape` if the accumulator holds more pairs than
    /// this run has positions, otherwise as [`Self::run`].
    pub fn run_resumable<F>(
        &mut self,
        accumulator: &mut RunAccumulator,
        mut inference: F,
    ) -> Result<BTreeMap<String, f64>>
    where
        F: FnMut(&str, &[String]) -> anyhow::Result<Prediction>,
    {
        self.collect_direct(accumulator, &mut inference)?;
        self.evaluate(accumulator.ground_truth(), accumulator.predictions())
    }

    /// Run and report per-trial accuracy with a bootstrap interval
    ///
    /// # Errors
    ///
    /// As [`Self::run`].
    pub fn run_detailed<F>(&mut self, mut inference: F) -> Result<ExperimentOutcome>
    where
        F: FnMut(&str, &[String]) -> anyhow::Result<Prediction>,
    {
        let mut accumulator = RunAccumulator::new();
        self.collect_direct(&mut accumulator, &mut inference)?;
        let scores = self.evaluate(accumulator.ground_truth(), accumulator.predictions())?;

        let per_trial = self.split.test.len().max(1);
        let trial_accuracy = accumulator
            .ground_truth()
            .chunks(per_trial)
            .zip(accumulator.predictions().chunks(per_trial))
            .map(|(gt, preds)| metrics::accuracy(gt, preds))
            .collect::<Result<Vec<_>>>()?;
        let accuracy_ci = bootstrap_ci(&trial_accuracy, &StatConfig::default());

        Ok(ExperimentOutcome {
            dataset: self.split.dataset_name().to_string(),
            scores,
            trial_accuracy,
            accuracy_ci,
            warnings: self.diagnostics().warnings().to_vec(),
        })
    }

    /// Run, then batch-calibrate the whole run's probabilities before scoring
    ///
    /// # Errors
    ///
    /// As [`Self::run`], plus `HarnessError::Shape` if `batch_size` is zero.
    pub fn run_batch_calibrated<F>(
        &mut self,
        mut inference: F,
        batch_size: usize,
    ) -> Result<BTreeMap<String, f64>>
    where
        F: FnMut(&str, &[String]) -> anyhow::Result<Prediction>,
    {
        let mut accumulator = RunAccumulator::new();
        self.collect_direct(&mut accumulator, &mut inference)?;
        let calibrated = batch_calibrate(accumulator.predictions(), batch_size)?;
        self.evaluate(accumulator.ground_truth(), &calibrated)
    }

    /// Evaluate a noisy-channel inference function.
    ///
    /// Each call gets one prompt per label (see
    /// [`PromptWriter::render_noisy_channel`]) and must score the label space
    /// as a whole, e.g. a softmax over negated per-prompt losses.
    ///
    /// # Errors
    ///
    /// As [`Self::run`].
    pub fn run_noisy_channel<F>(&mut self, mut inference: F) -> Result<BTreeMap<String, f64>>
    where
        F: FnMut(&[String], &[String]) -> anyhow::Result<Prediction>,
    {
        let mut accumulator = RunAccumulator::new();
        self.collect(&mut accumulator, |demos, index| {
            let prompts = self.writer.render_noisy_channel(demos, index)?;
            into_harness(inference(&prompts, self.writer.label_space()))
        })?;
        self.evaluate(accumulator.ground_truth(), accumulator.predictions())
    }

    /// Diagnose one kind of label bias.
    ///
    /// Positions, demonstrations and trial order are those of [`Self::run`];
    /// only the query line changes with `kind`. Scores come from
    /// [`BiasKind::metrics`].
    ///
    /// # Errors
    ///
    /// As [`Self::run`], plus `HarnessError::Size` for a domain diagnosis
    /// over an empty demonstration set.
    pub fn run_bias<F>(&mut self, kind: BiasKind, mut inference: F) -> Result<BiasOutcome>
    where
        F: FnMut(&str, &[String]) -> anyhow::Result<Prediction>,
    {
        let mut queries = BiasQueries::new(kind, &self.split)?;
        let mut accumulator = RunAccumulator::new();
        self.collect(&mut accumulator, |demos, index| {
            let lines = demo_lines(&self.split.demonstration, demos)?;
            let prompt = self.writer.render_from_raw(&lines, &queries.line(index)?)?;
            into_harness(inference(&prompt, self.writer.label_space()))
        })?;
        self.bias_outcome(kind, &accumulator)
    }

    /// [`Self::run_bias`] with noisy-channel prompts
    ///
    /// # Errors
    ///
    /// As [`Self::run_bias`].
    pub fn run_bias_noisy_channel<F>(
        &mut self,
        kind: BiasKind,
        mut inference: F,
    ) -> Result<BiasOutcome>
    where
        F: FnMut(&[String], &[String]) -> anyhow::Result<Prediction>,
    {
        let mut queries = BiasQueries::new(kind, &self.split)?;
        let mut accumulator = RunAccumulator::new();
        self.collect(&mut accumulator, |demos, index| {
            let lines = demo_lines(&self.split.demonstration, demos)?;
            let prompts = self
                .writer
                .render_noisy_channel_from_raw(&lines, &queries.line(index)?)?;
            into_harness(inference(&prompts, self.writer.label_space()))
        })?;
        self.bias_outcome(kind, &accumulator)
    }

    fn bias_outcome(&self, kind: BiasKind, accumulator: &RunAccumulator) -> Result<BiasOutcome> {
        let registry = kind.metrics();
        let scores = registry.evaluate(accumulator.ground_truth(), accumulator.predictions())?;
        let distributions = registry
            .evaluate_distributions(accumulator.ground_truth(), accumulator.predictions())?;
        tracing::info!(
            dataset = %self.split.dataset_name(),
            bias = kind.name(),
            ?scores,
            "Bias diagnosed"
        );
        Ok(BiasOutcome {
            dataset: self.split.dataset_name().to_string(),
            kind,
            scores,
            distributions,
        })
    }

    fn collect_direct<F>(&self, accumulator: &mut RunAccumulator, inference: &mut F) -> Result<()>
    where
        F: FnMut(&str, &[String]) -> anyhow::Result<Prediction>,
    {
        self.collect(accumulator, |demos, index| {
            let prompt = self.writer.render(demos, index)?;
            into_harness(inference(&prompt, self.writer.label_space()))
        })
    }

    /// Ask for a prediction at every position not yet in `accumulator`;
    /// `ask` receives the position's demonstration indices and test index
    fn collect<A>(&self, accumulator: &mut RunAccumulator, mut ask: A) -> Result<()>
    where
        A: FnMut(&[usize], usize) -> Result<Prediction>,
    {
        let test_len = self.split.test.len();
        let total = self.run_length();
        let labels = self.split.label_space().len();
        let start = accumulator.len();
        if start > total {
            return Err(HarnessError::Shape(format!(
                "accumulator holds {start} pairs but the run has {total} positions"
            )));
        }

        tracing::info!(
            dataset = %self.split.dataset_name(),
            total,
            resumed_at = start,
            "Starting run"
        );

        for position in start..total {
            // position = index + trial * |test|
            let index = position % test_len;
            let demos = self.sampler.get(position)?;
            let probs = ask(demos, index)?.into_probabilities(labels)?;
            accumulator.push(self.split.ground_truth_index(index)?, probs);
            tracing::debug!(
                position = position + 1,
                total,
                trial = position / test_len,
                "Inference collected"
            );
        }

        tracing::info!(dataset = %self.split.dataset_name(), total, "Run complete");
        Ok(())
    }

    fn evaluate(
        &self,
        ground_truth: &[usize],
        predictions: &[Vec<f64>],
    ) -> Result<BTreeMap<String, f64>> {
        let mut scores = self.metrics.evaluate(ground_truth, predictions)?;
        if self.ece_bins != STANDARD_ECE_BINS {
            if let Some(ece) = scores.get_mut(EXPECTED_CALIBRATION_ERROR_1) {
                *ece = metrics::expected_calibration_error(ground_truth, predictions, self.ece_bins)?;
            }
        }
        Ok(scores)
    }
}

fn into_harness<T>(result: anyhow::Result<T>) -> Result<T> {
    result.map_err(|e| HarnessError::Inference(format!("{e:#}")))
}

fn build_sampler(
    split: &TripletSplit,
    k: usize,
    allow_replacement: bool,
    repeat_times: usize,
    diagnostics: &mut Diagnostics,
) -> Result<DemonstrationSampler> {
    let pool_size = split.demonstration.len();
    if k > pool_size {
        if !allow_replacement {
            return Err(HarnessError::Size {
                dataset: split.demonstration.name().to_string(),
                requested: k,
                available: pool_size,
            });
        }
        diagnostics.record(ConfigDrift::SamplingWithReplacement { k, pool_size });
    }
    DemonstrationSampler::build(k, pool_size, repeat_times * split.test.len())
}

impl fmt::Display for Experimentor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "--- single experimentor ---")?;
        writeln!(f, "dataset: {}", self.split.dataset_name())?;
        writeln!(f, "{}", self.writer)?;
        writeln!(f, "k: {}", self.k)?;
        writeln!(
            f,
            "metrics: {}",
            self.metrics.names().collect::<Vec<_>>().join(", ")
        )?;
        write!(f, "samples per test record: {}", self.repeat_times)
    }
}
