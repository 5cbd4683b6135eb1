//! Multi-dataset benchmark: one experimentor per dataset, averaged scores.
//!
//! The same experimentors also drive the bias diagnosis suite: contextual,
//! domain, and post bias, each averaged across datasets like a normal run.

use crate::config::{standard_split_for, ExperimentConfig, Settings};
use crate::dataset::LabeledDataset;
use crate::error::{HarnessError, Result};
use crate::experimentor::{BiasKind, BiasOutcome, ExperimentOutcome, Experimentor, Prediction};
use crate::metrics::{bonferroni_correction, compute_mean, paired_t_test, SignificanceResult};
use crate::split::TripletSplit;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Scores of one benchmark run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkResult {
    /// Metric scores keyed by dataset name
    pub per_dataset: BTreeMap<String, BTreeMap<String, f64>>,
    /// Arithmetic mean of each metric across datasets
    pub averaged: BTreeMap<String, f64>,
    /// Per-dataset detail (trial accuracy, drift warnings), in run order
    pub outcomes: Vec<ExperimentOutcome>,
}

impl BenchmarkResult {
    fn from_outcomes(outcomes: Vec<ExperimentOutcome>) -> Self {
        let per_dataset = outcomes
            .iter()
            .map(|o| (o.dataset.clone(), o.scores.clone()))
            .collect();
        Self {
            averaged: average_columns(outcomes.iter().map(|o| &o.scores)),
            per_dataset,
            outcomes,
        }
    }
}

/// Scores of one bias diagnosis over every dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosisResult {
    pub kind: BiasKind,
    /// Scalar bias scores keyed by dataset name
    pub per_dataset: BTreeMap<String, BTreeMap<String, f64>>,
    /// Arithmetic mean of each scalar score across datasets
    pub averaged: BTreeMap<String, f64>,
    /// Per-dataset detail including label distributions, in run order
    pub outcomes: Vec<BiasOutcome>,
}

impl DiagnosisResult {
    fn from_outcomes(kind: BiasKind, outcomes: Vec<BiasOutcome>) -> Self {
        let per_dataset = outcomes
            .iter()
            .map(|o| (o.dataset.clone(), o.scores.clone()))
            .collect();
        Self {
            kind,
            averaged: average_columns(outcomes.iter().map(|o| &o.scores)),
            per_dataset,
            outcomes,
        }
    }
}

/// The three bias diagnoses of one benchmark
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripletBiasResult {
    pub contextual: DiagnosisResult,
    pub domain: DiagnosisResult,
    pub post: DiagnosisResult,
}

fn average_columns<'a>(
    rows: impl Iterator<Item = &'a BTreeMap<String, f64>>,
) -> BTreeMap<String, f64> {
    let mut columns: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for scores in rows {
        for (metric, &value) in scores {
            columns.entry(metric.clone()).or_default().push(value);
        }
    }
    columns
        .into_iter()
        .map(|(metric, values)| (metric, compute_mean(&values)))
        .collect()
}

fn check_unique_names(experimentors: &[Experimentor]) -> Result<()> {
    let mut seen = std::collections::BTreeSet::new();
    for experimentor in experimentors {
        let name = experimentor.split().dataset_name();
        if !seen.insert(name) {
            return Err(HarnessError::Shape(format!(
                "dataset {name} appears more than once in the benchmark"
            )));
        }
    }
    Ok(())
}

/// Runs the same inference function over several datasets
#[derive(Debug, Clone)]
pub struct Benchmark {
    experimentors: Vec<Experimentor>,
}

impl Benchmark {
    /// Split every dataset with its standard sizes and build its experimentor
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::Size` if a dataset is too small for its
    /// standard split or for `k`, `HarnessError::Shape` if two datasets
    /// share a name.
    pub fn new(
        datasets: &[LabeledDataset],
        config: &ExperimentConfig,
        settings: Settings,
    ) -> Result<Self> {
        let experimentors = datasets
            .iter()
            .map(|dataset| {
                let split = TripletSplit::new(dataset, standard_split_for(dataset.name()), settings)?;
                Experimentor::new(split, config.clone(), settings)
            })
            .collect::<Result<Vec<_>>>()?;
        Self::from_experimentors(experimentors)
    }

    /// Build from zero-argument dataset factories
    ///
    /// # Errors
    ///
    /// Returns an error if a factory fails or a dataset cannot be split.
    pub fn from_loaders<I, F>(
        loaders: I,
        config: &ExperimentConfig,
        settings: Settings,
    ) -> anyhow::Result<Self>
    where
        I: IntoIterator<Item = F>,
        F: FnOnce() -> anyhow::Result<LabeledDataset>,
    {
        let datasets = loaders
            .into_iter()
            .enumerate()
            .map(|(i, load)| load().with_context(|| format!("Failed to load dataset #{i}")))
            .collect::<anyhow::Result<Vec<_>>>()?;
        tracing::info!(datasets = datasets.len(), "Loaded benchmark datasets");
        Ok(Self::new(&datasets, config, settings)?)
    }

    /// Wrap already-built experimentors
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::Shape` if two experimentors cover datasets with
    /// the same name, since results are keyed by dataset name.
    pub fn from_experimentors(experimentors: Vec<Experimentor>) -> Result<Self> {
        check_unique_names(&experimentors)?;
        Ok(Self { experimentors })
    }

    #[must_use]
    pub fn experimentors(&self) -> &[Experimentor] {
        &self.experimentors
    }

    pub fn experimentors_mut(&mut self) -> &mut [Experimentor] {
        &mut self.experimentors
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.experimentors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.experimentors.is_empty()
    }

    /// Evaluate `inference` on every dataset in turn
    ///
    /// # Errors
    ///
    /// Returns the first dataset's error; earlier datasets' scores are lost.
    pub fn run<F>(&mut self, mut inference: F) -> Result<BenchmarkResult>
    where
        F: FnMut(&str, &[String]) -> anyhow::Result<Prediction>,
    {
        let outcomes = self
            .experimentors
            .iter_mut()
            .map(|experimentor| {
                let outcome = experimentor.run_detailed(&mut inference)?;
                tracing::info!(
                    dataset = %outcome.dataset,
                    accuracy = outcome.scores.get(crate::metrics::ACCURACY).copied().unwrap_or_default(),
                    "Dataset finished"
                );
                Ok(outcome)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(BenchmarkResult::from_outcomes(outcomes))
    }

    /// Diagnose one kind of label bias on every dataset in turn
    ///
    /// # Errors
    ///
    /// Returns the first dataset's error.
    pub fn diagnose<F>(&mut self, kind: BiasKind, mut inference: F) -> Result<DiagnosisResult>
    where
        F: FnMut(&str, &[String]) -> anyhow::Result<Prediction>,
    {
        let outcomes = self
            .experimentors
            .iter_mut()
            .map(|experimentor| experimentor.run_bias(kind, &mut inference))
            .collect::<Result<Vec<_>>>()?;
        Ok(DiagnosisResult::from_outcomes(kind, outcomes))
    }

    /// [`Self::diagnose`] with noisy-channel prompts
    ///
    /// # Errors
    ///
    /// Returns the first dataset's error.
    pub fn diagnose_noisy_channel<F>(
        &mut self,
        kind: BiasKind,
        mut inference: F,
    ) -> Result<DiagnosisResult>
    where
        F: FnMut(&[String], &[String]) -> anyhow::Result<Prediction>,
    {
        let outcomes = self
            .experimentors
            .iter_mut()
            .map(|experimentor| experimentor.run_bias_noisy_channel(kind, &mut inference))
            .collect::<Result<Vec<_>>>()?;
        Ok(DiagnosisResult::from_outcomes(kind, outcomes))
    }

    /// Contextual, standard domain, then post bias
    ///
    /// # Errors
    ///
    /// Returns the first error of any diagnosis.
    pub fn diagnose_triplet<F>(&mut self, mut inference: F) -> Result<TripletBiasResult>
    where
        F: FnMut(&str, &[String]) -> anyhow::Result<Prediction>,
    {
        Ok(TripletBiasResult {
            contextual: self.diagnose(BiasKind::Contextual, &mut inference)?,
            domain: self.diagnose(BiasKind::domain_standard(), &mut inference)?,
            post: self.diagnose(BiasKind::Post, &mut inference)?,
        })
    }

    /// Redraw every sampler for a new `k`
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::Size` if `k` exceeds a demonstration set.
    pub fn reinitialize(&mut self, k: usize, keep_prompt_writers: bool) -> Result<()> {
        for experimentor in &mut self.experimentors {
            experimentor.reinitialize(k, keep_prompt_writers)?;
        }
        Ok(())
    }

    /// Paired t-test of each shared metric across the datasets both runs cover.
    ///
    /// `alpha` is Bonferroni-corrected for the number of metrics compared.
    /// A metric maps to `None` when the test is undefined (fewer than two
    /// datasets or identical differences).
    #[must_use]
    pub fn compare(
        a: &BenchmarkResult,
        b: &BenchmarkResult,
        alpha: f64,
    ) -> BTreeMap<String, Option<SignificanceResult>> {
        let metrics: Vec<&String> = a
            .averaged
            .keys()
            .filter(|m| b.averaged.contains_key(*m))
            .collect();
        let corrected = bonferroni_correction(alpha, metrics.len());

        metrics
            .into_iter()
            .map(|metric| {
                let (left, right): (Vec<f64>, Vec<f64>) = a
                    .per_dataset
                    .iter()
                    .filter_map(|(dataset, scores)| {
                        Some((
                            *scores.get(metric)?,
                            *b.per_dataset.get(dataset)?.get(metric)?,
                        ))
                    })
                    .unzip();
                (metric.clone(), paired_t_test(&left, &right, corrected))
            })
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::dataset::{Furniture, Record};
    use crate::metrics::{ACCURACY, DISTRIBUTION, ENTROPY, KL_DIVERGENCE};

    /// Dataset large enough for the standard split, labels alternating
    fn dataset(name: &str) -> LabeledDataset {
        let records = (0..5700)
            .map(|i| {
                let label = if i % 2 == 0 { "yes" } else { "no" };
                Record::new([format!("item {i}")], label)
            })
            .collect();
        LabeledDataset::new(
            name,
            vec!["no".to_string(), "yes".to_string()],
            Furniture {
                input_prefixes: vec!["Input: ".to_string()],
                input_affixes: vec!["\n".to_string()],
                label_prefix: "Answer: ".to_string(),
                label_affix: "\n".to_string(),
                ..Furniture::default()
            },
            records,
        )
        .unwrap()
    }

    fn small_config() -> ExperimentConfig {
        ExperimentConfig {
            k: 1,
            repeat_times: 1,
            allow_replacement: false,
        }
    }

    fn result(per_dataset: &[(&str, f64)]) -> BenchmarkResult {
        let outcomes = per_dataset
            .iter()
            .map(|(name, acc)| ExperimentOutcome {
                dataset: (*name).to_string(),
                scores: BTreeMap::from([(ACCURACY.to_string(), *acc)]),
                trial_accuracy: vec![*acc],
                accuracy_ci: (*acc, *acc),
                warnings: Vec::new(),
            })
            .collect();
        BenchmarkResult::from_outcomes(outcomes)
    }

    #[test]
    fn test_averaged_is_arithmetic_mean() {
        let result = result(&[("a", 0.5), ("b", 0.75), ("c", 1.0)]);
        assert_eq!(result.averaged[ACCURACY], 0.75);
        assert_eq!(result.per_dataset.len(), 3);
    }

    #[test]
    fn test_run_over_two_datasets() {
        let mut benchmark = Benchmark::new(
            &[dataset("first"), dataset("second")],
            &small_config(),
            Settings::lenient(),
        )
        .unwrap();
        assert_eq!(benchmark.len(), 2);

        let mut calls = 0;
        let result = benchmark
            .run(|_, _| {
                calls += 1;
                Ok(Prediction::Label(1))
            })
            .unwrap();

        assert_eq!(calls, 2 * 512);
        assert_eq!(result.per_dataset.len(), 2);
        let mean = (result.per_dataset["first"][ACCURACY] + result.per_dataset["second"][ACCURACY])
            / 2.0;
        assert!((result.averaged[ACCURACY] - mean).abs() < 1e-12);
    }

    #[test]
    fn test_from_loaders_reports_failing_loader() {
        let loaders: Vec<Box<dyn FnOnce() -> anyhow::Result<LabeledDataset>>> = vec![
            Box::new(|| Ok(dataset("ok"))),
            Box::new(|| Err(anyhow::anyhow!("disk unavailable"))),
        ];
        let err = Benchmark::from_loaders(loaders, &small_config(), Settings::lenient())
            .unwrap_err();
        assert!(format!("{err:#}").contains("dataset #1"));
    }

    #[test]
    fn test_from_loaders_too_small_dataset() {
        let loaders = vec![|| {
            LabeledDataset::new("tiny", vec!["a".to_string()], Furniture::default(), Vec::new())
                .map_err(anyhow::Error::from)
        }];
        let err = Benchmark::from_loaders(loaders, &small_config(), Settings::lenient())
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<HarnessError>(),
            Some(HarnessError::Size { .. })
        ));
    }

    #[test]
    fn test_reinitialize_all_experimentors() {
        let mut benchmark =
            Benchmark::new(&[dataset("first")], &small_config(), Settings::lenient()).unwrap();
        benchmark.reinitialize(3, true).unwrap();
        assert!(benchmark.experimentors().iter().all(|e| e.k() == 3));
    }

    #[test]
    fn test_duplicate_dataset_names_rejected() {
        let result = Benchmark::new(
            &[dataset("same"), dataset("other"), dataset("same")],
            &small_config(),
            Settings::lenient(),
        );
        assert!(matches!(result, Err(HarnessError::Shape(msg)) if msg.contains("same")));

        let experimentor = |name: &str| {
            let split = TripletSplit::new(&dataset(name), standard_split_for(name), Settings::lenient())
                .unwrap();
            Experimentor::new(split, small_config(), Settings::lenient()).unwrap()
        };
        assert!(Benchmark::from_experimentors(vec![experimentor("a"), experimentor("a")]).is_err());
        assert_eq!(
            Benchmark::from_experimentors(vec![experimentor("a"), experimentor("b")])
                .unwrap()
                .len(),
            2
        );
    }

    #[test]
    fn test_diagnose_averages_across_datasets() {
        let mut benchmark = Benchmark::new(
            &[dataset("first"), dataset("second")],
            &small_config(),
            Settings::lenient(),
        )
        .unwrap();

        let mut calls = 0;
        let result = benchmark
            .diagnose(BiasKind::Contextual, |prompt, _| {
                calls += 1;
                assert!(prompt.ends_with("Input: \nAnswer: "));
                Ok(Prediction::Probabilities(vec![0.5, 0.5]))
            })
            .unwrap();

        assert_eq!(calls, 2 * 512);
        assert_eq!(result.kind, BiasKind::Contextual);
        assert_eq!(result.per_dataset.len(), 2);
        assert!((result.averaged[ENTROPY] - 1.0).abs() < 1e-12);
        assert_eq!(result.outcomes[1].distributions[DISTRIBUTION], vec![0.5, 0.5]);
    }

    #[test]
    fn test_diagnose_triplet_runs_three_kinds() {
        let mut benchmark =
            Benchmark::new(&[dataset("only")], &small_config(), Settings::lenient()).unwrap();
        let mut queries = Vec::new();
        let result = benchmark
            .diagnose_triplet(|prompt, _| {
                queries.push(prompt.rsplit("Input: ").next().unwrap_or_default().to_string());
                Ok(Prediction::Label(1))
            })
            .unwrap();

        assert_eq!(queries.len(), 3 * 512);
        // contextual queries are empty, domain queries are 128-word bags
        assert_eq!(queries[0], "\nAnswer: ");
        let bag = queries[512].strip_suffix("\nAnswer: ").unwrap();
        assert_eq!(bag.split(' ').count(), 128);
        assert!(queries[1024].starts_with("item "));

        assert_eq!(result.contextual.kind, BiasKind::Contextual);
        assert_eq!(result.domain.kind, BiasKind::domain_standard());
        assert!(result.contextual.averaged[ENTROPY].abs() < 1e-12);
        // "no" is never predicted but makes up about half the test set
        assert!(result.post.averaged[KL_DIVERGENCE] > 1.0);
    }

    #[test]
    fn test_diagnose_noisy_channel() {
        let mut benchmark =
            Benchmark::new(&[dataset("only")], &small_config(), Settings::lenient()).unwrap();
        let result = benchmark
            .diagnose_noisy_channel(BiasKind::Post, |prompts, labels| {
                assert_eq!(prompts.len(), labels.len());
                Ok(Prediction::Probabilities(vec![0.5, 0.5]))
            })
            .unwrap();
        // ties resolve to the first label, "no"
        assert_eq!(result.outcomes[0].distributions[DISTRIBUTION], vec![1.0, 0.0]);
    }

    #[test]
    fn test_compare_detects_consistent_improvement() {
        let base = result(&[("a", 0.50), ("b", 0.61), ("c", 0.55), ("d", 0.70)]);
        let better = result(&[("a", 0.60), ("b", 0.70), ("c", 0.66), ("d", 0.79)]);
        let comparison = Benchmark::compare(&better, &base, 0.05);
        let accuracy = comparison[ACCURACY].as_ref().unwrap();
        assert!(accuracy.t_statistic > 0.0);
        assert!(accuracy.is_significant, "p = {}", accuracy.p_value);
    }

    #[test]
    fn test_compare_single_dataset_is_undefined() {
        let a = result(&[("a", 0.5)]);
        let b = result(&[("a", 0.6)]);
        assert!(Benchmark::compare(&a, &b, 0.05)[ACCURACY].is_none());
    }
}
