//! Calibration transforms over raw label probabilities.
//!
//! Contextual and domain calibration learn a per-label bias from content-free
//! or random-word queries and divide it out. Hidden-state calibration learns a
//! centroid per label and scores by distance. Batch calibration is stateless
//! and works over a whole run at once.

use crate::config::{STANDARD_BATCH_SIZE, STANDARD_DOMAIN_QUERY_LENGTH};
use crate::dataset::LabeledDataset;
use crate::error::{HarnessError, Result};
use crate::experimentor::Prediction;
use crate::prompt::{DemoLine, PromptWriter};
use crate::random::StableRandom;
use serde::{Deserialize, Serialize};

/// Initial value of every bias term before accumulation
const BIAS_FLOOR: f64 = 1e-5;

/// What an inference function returns to a calibrator
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InferenceOutput {
    /// Probability per label, aligned with the label space
    pub label_probs: Vec<f64>,
    /// Full next-token distribution, when the model exposes it
    pub full_vocab_probs: Option<Vec<f64>>,
    /// Final hidden state at the generation point
    pub hidden_state: Option<Vec<f64>>,
}

impl InferenceOutput {
    #[must_use]
    pub fn with_hidden_state(mut self, hidden_state: Vec<f64>) -> Self {
        self.hidden_state = Some(hidden_state);
        self
    }
}

impl From<Vec<f64>> for InferenceOutput {
    fn from(label_probs: Vec<f64>) -> Self {
        Self {
            label_probs,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationMethod {
    /// Empty query, bias divided out
    Contextual,
    /// Random in-domain words as the query, bias divided out
    Domain { query_length: usize },
    /// Distance to per-label hidden-state centroids
    HiddenState,
}

impl CalibrationMethod {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Contextual => "contextual",
            Self::Domain { .. } => "domain",
            Self::HiddenState => "hidden_state",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationStatus {
    Untrained,
    Trained,
    /// Training could not estimate every label; `apply` passes through
    Failed,
}

/// Trainable calibration transform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Calibrator {
    method: CalibrationMethod,
    label_space: Vec<String>,
    status: CalibrationStatus,
    /// Per-label bias (contextual and domain)
    bias: Vec<f64>,
    /// Per-label centroid (hidden state)
    centroids: Vec<Vec<f64>>,
}

impl Calibrator {
    fn with_method(method: CalibrationMethod, label_space: Vec<String>) -> Self {
        let bias = vec![BIAS_FLOOR; label_space.len()];
        Self {
            method,
            label_space,
            status: CalibrationStatus::Untrained,
            bias,
            centroids: Vec::new(),
        }
    }

    #[must_use]
    pub fn contextual(label_space: Vec<String>) -> Self {
        Self::with_method(CalibrationMethod::Contextual, label_space)
    }

    /// Domain calibrator whose queries are bags of `query_length` words
    /// sampled from the training pool, one new bag per episode
    #[must_use]
    pub fn domain(label_space: Vec<String>, query_length: usize) -> Self {
        Self::with_method(CalibrationMethod::Domain { query_length }, label_space)
    }

    /// Domain calibrator with the standard 64-word query
    #[must_use]
    pub fn domain_standard(label_space: Vec<String>) -> Self {
        Self::domain(label_space, STANDARD_DOMAIN_QUERY_LENGTH)
    }

    #[must_use]
    pub fn hidden_state(label_space: Vec<String>) -> Self {
        Self::with_method(CalibrationMethod::HiddenState, label_space)
    }

    #[must_use]
    pub const fn method(&self) -> CalibrationMethod {
        self.method
    }

    #[must_use]
    pub const fn status(&self) -> CalibrationStatus {
        self.status
    }

    #[must_use]
    pub fn label_space(&self) -> &[String] {
        &self.label_space
    }

    /// Learned bias per label; the floor value until trained
    #[must_use]
    pub fn bias(&self) -> &[f64] {
        &self.bias
    }

    #[must_use]
    pub fn centroids(&self) -> &[Vec<f64>] {
        &self.centroids
    }

    /// Learn the calibration statistic from `calibration_n` synthetic episodes.
    ///
    /// Each episode renders `k` demonstrations drawn with replacement from
    /// `pool`, followed by a query that depends on the method. A domain
    /// calibrator draws a fresh random-word bag for every episode rather than
    /// reusing one bag for the whole training run.
    ///
    /// Retraining starts from scratch. On error the calibrator keeps its
    /// previous state, so a trained calibrator stays usable.
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::Shape` if `calibration_n` is zero or an output
    /// has the wrong number of labels, `HarnessError::Size` if the pool is
    /// empty, and `HarnessError::Inference` if the inference function fails
    /// (or omits the hidden state a hidden-state calibrator needs).
    pub fn train<F>(
        &mut self,
        writer: &PromptWriter,
        mut inference: F,
        pool: &LabeledDataset,
        calibration_n: usize,
        k: usize,
    ) -> Result<()>
    where
        F: FnMut(&str, &[String]) -> anyhow::Result<InferenceOutput>,
    {
        if calibration_n == 0 {
            return Err(HarnessError::Shape(
                "calibration needs at least one episode".to_string(),
            ));
        }
        if pool.is_empty() {
            return Err(HarnessError::Size {
                dataset: pool.name().to_string(),
                requested: calibration_n,
                available: 0,
            });
        }

        tracing::info!(
            method = self.method.name(),
            dataset = %pool.name(),
            episodes = calibration_n,
            k,
            "Training calibrator"
        );

        let mut trained = Self::with_method(self.method, self.label_space.clone());
        match self.method {
            CalibrationMethod::Contextual => {
                let empty = vec![String::new(); pool.input_field_count()];
                trained.train_bias(writer, &mut inference, pool, calibration_n, k, |_| {
                    Ok(empty.clone())
                })?;
            }
            CalibrationMethod::Domain { query_length } => {
                let mut bag_rng = StableRandom::new();
                trained.train_bias(writer, &mut inference, pool, calibration_n, k, |pool| {
                    Ok(random_word_line(&mut bag_rng, pool, query_length))
                })?;
            }
            CalibrationMethod::HiddenState => {
                trained.train_centroids(writer, &mut inference, pool, calibration_n, k)?;
            }
        }
        *self = trained;
        Ok(())
    }

    fn train_bias<F, Q>(
        &mut self,
        writer: &PromptWriter,
        inference: &mut F,
        pool: &LabeledDataset,
        calibration_n: usize,
        k: usize,
        mut query_line: Q,
    ) -> Result<()>
    where
        F: FnMut(&str, &[String]) -> anyhow::Result<InferenceOutput>,
        Q: FnMut(&LabeledDataset) -> Result<Vec<String>>,
    {
        let mut rng = StableRandom::new();
        let demos = rng.sample_index_set_with_replacement(calibration_n * k, pool.len())?;

        for episode in 0..calibration_n {
            let lines = demo_lines(pool, &demos[episode * k..(episode + 1) * k])?;
            let query = query_line(pool)?;
            let prompt = writer.render_from_raw(&lines, &query)?;
            let output = call(inference, &prompt, writer.label_space())?;
            self.check_labels(&output.label_probs)?;
            for (b, p) in self.bias.iter_mut().zip(&output.label_probs) {
                *b += p;
            }
        }

        #[allow(clippy::cast_precision_loss)]
        let n = calibration_n as f64;
        for b in &mut self.bias {
            *b /= n;
        }
        self.status = CalibrationStatus::Trained;
        tracing::debug!(bias = ?self.bias, "Calibration bias estimated");
        Ok(())
    }

    fn train_centroids<F>(
        &mut self,
        writer: &PromptWriter,
        inference: &mut F,
        pool: &LabeledDataset,
        calibration_n: usize,
        k: usize,
    ) -> Result<()>
    where
        F: FnMut(&str, &[String]) -> anyhow::Result<InferenceOutput>,
    {
        let mut rng = StableRandom::new();
        let indices = rng.sample_index_set_with_replacement(calibration_n * (k + 1), pool.len())?;

        let labels = self.label_space.len();
        let mut sums: Vec<Option<Vec<f64>>> = vec![None; labels];
        let mut counts = vec![0_usize; labels];

        for episode in indices.chunks(k + 1) {
            let (demos, query) = episode.split_at(k);
            let lines = demo_lines(pool, demos)?;
            let query_index = query[0];
            let query_record = pool.get(query_index)?;
            let label = pool.label_index_of(query_index)?;

            let prompt = writer.render_from_raw(&lines, &query_record.inputs)?;
            let output = call(inference, &prompt, writer.label_space())?;
            let hidden = output.hidden_state.ok_or_else(|| {
                HarnessError::Inference("hidden-state calibration needs a hidden state".to_string())
            })?;

            let slot = sums.get_mut(label).ok_or(HarnessError::Index {
                what: "label",
                index: label,
                len: labels,
            })?;
            match slot {
                Some(sum) => {
                    if sum.len() != hidden.len() {
                        return Err(HarnessError::Shape(format!(
                            "hidden state has {} dimensions, expected {}",
                            hidden.len(),
                            sum.len()
                        )));
                    }
                    for (s, h) in sum.iter_mut().zip(&hidden) {
                        *s += h;
                    }
                }
                None => *slot = Some(hidden),
            }
            counts[label] += 1;
        }

        if let Some(missing) = counts.iter().position(|&c| c == 0) {
            tracing::warn!(
                dataset = %pool.name(),
                label = %self.label_space[missing],
                "Hidden-state calibration saw no sample for a label; passing probabilities through"
            );
            self.status = CalibrationStatus::Failed;
            return Ok(());
        }

        #[allow(clippy::cast_precision_loss)]
        {
            self.centroids = sums
                .into_iter()
                .zip(&counts)
                .map(|(sum, &count)| {
                    sum.unwrap_or_default()
                        .into_iter()
                        .map(|s| s / count as f64)
                        .collect()
                })
                .collect();
        }
        self.status = CalibrationStatus::Trained;
        Ok(())
    }

    fn check_labels(&self, probs: &[f64]) -> Result<()> {
        if probs.len() == self.label_space.len() {
            Ok(())
        } else {
            Err(HarnessError::Shape(format!(
                "got {} label probabilities, expected {}",
                probs.len(),
                self.label_space.len()
            )))
        }
    }

    /// Correct one raw output.
    ///
    /// Untrained and failed calibrators return `label_probs` unchanged.
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::Shape` on a label or hidden-state dimension
    /// mismatch, `HarnessError::Inference` if a trained hidden-state
    /// calibrator gets no hidden state.
    pub fn apply(
        &self,
        label_probs: &[f64],
        _full_vocab_probs: Option<&[f64]>,
        hidden_state: Option<&[f64]>,
    ) -> Result<Vec<f64>> {
        self.check_labels(label_probs)?;
        if self.status != CalibrationStatus::Trained {
            return Ok(label_probs.to_vec());
        }

        match self.method {
            CalibrationMethod::Contextual | CalibrationMethod::Domain { .. } => Ok(softmax(
                &label_probs
                    .iter()
                    .zip(&self.bias)
                    .map(|(p, b)| p / b)
                    .collect::<Vec<_>>(),
            )),
            CalibrationMethod::HiddenState => {
                let hidden = hidden_state.ok_or_else(|| {
                    HarnessError::Inference(
                        "hidden-state calibration needs a hidden state".to_string(),
                    )
                })?;
                let distances = self
                    .centroids
                    .iter()
                    .map(|c| euclidean(hidden, c))
                    .collect::<Result<Vec<_>>>()?;
                let first = distances.first().copied().unwrap_or_default();
                Ok(softmax(
                    &distances.iter().map(|d| first - d).collect::<Vec<_>>(),
                ))
            }
        }
    }

    /// Apply to a whole [`InferenceOutput`]
    ///
    /// # Errors
    ///
    /// See [`Self::apply`].
    pub fn apply_output(&self, output: &InferenceOutput) -> Result<Vec<f64>> {
        self.apply(
            &output.label_probs,
            output.full_vocab_probs.as_deref(),
            output.hidden_state.as_deref(),
        )
    }

    /// Adapt a raw inference function into one that yields calibrated
    /// probabilities, ready for the experimentor.
    pub fn wrap<'a, F>(
        &'a self,
        mut inference: F,
    ) -> impl FnMut(&str, &[String]) -> anyhow::Result<Prediction> + 'a
    where
        F: FnMut(&str, &[String]) -> anyhow::Result<InferenceOutput> + 'a,
    {
        move |prompt, label_space| {
            let output = inference(prompt, label_space)?;
            Ok(Prediction::Probabilities(self.apply_output(&output)?))
        }
    }
}

fn call<F>(inference: &mut F, prompt: &str, label_space: &[String]) -> Result<InferenceOutput>
where
    F: FnMut(&str, &[String]) -> anyhow::Result<InferenceOutput>,
{
    inference(prompt, label_space).map_err(|e| HarnessError::Inference(format!("{e:#}")))
}

pub(crate) fn demo_lines(pool: &LabeledDataset, indices: &[usize]) -> Result<Vec<DemoLine>> {
    indices
        .iter()
        .map(|&i| {
            let record = pool.get(i)?;
            Ok((record.inputs.clone(), record.label.clone()))
        })
        .collect()
}

/// One query line of `length` words per field, each word taken from a
/// random record's same field
pub(crate) fn random_word_line(
    rng: &mut StableRandom,
    pool: &LabeledDataset,
    length: usize,
) -> Vec<String> {
    (0..pool.input_field_count())
        .map(|field| {
            let mut words = Vec::with_capacity(length);
            while words.len() < length {
                let record_index = rng.int_in_range(0, pool.len());
                let text = pool
                    .get(record_index)
                    .ok()
                    .and_then(|r| r.inputs.get(field))
                    .map_or("", String::as_str);
                let tokens: Vec<&str> = text.split(' ').collect();
                let token = tokens[rng.int_in_range(0, tokens.len())];
                words.push(token);
            }
            words.join(" ")
        })
        .collect()
}

fn euclidean(a: &[f64], b: &[f64]) -> Result<f64> {
    if a.len() != b.len() {
        return Err(HarnessError::Shape(format!(
            "hidden state has {} dimensions, centroid has {}",
            a.len(),
            b.len()
        )));
    }
    Ok(a.iter()
        .zip(b)
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt())
}

/// Numerically stable softmax
#[must_use]
pub fn softmax(values: &[f64]) -> Vec<f64> {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = values.iter().map(|v| (v - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Batch calibration: subtract each chunk's mean vector, then softmax.
///
/// The run is cut into chunks of `batch_size` plus one trailing remainder.
///
/// # Errors
///
/// Returns `HarnessError::Shape` if `batch_size` is zero or vectors within a
/// chunk disagree in length.
pub fn batch_calibrate(probs: &[Vec<f64>], batch_size: usize) -> Result<Vec<Vec<f64>>> {
    if batch_size == 0 {
        return Err(HarnessError::Shape("batch size must be positive".to_string()));
    }

    let mut calibrated = Vec::with_capacity(probs.len());
    for chunk in probs.chunks(batch_size) {
        let width = chunk[0].len();
        if let Some(bad) = chunk.iter().find(|p| p.len() != width) {
            return Err(HarnessError::Shape(format!(
                "batch mixes {}-label and {width}-label vectors",
                bad.len()
            )));
        }

        #[allow(clippy::cast_precision_loss)]
        let n = chunk.len() as f64;
        let mut mean = vec![0.0; width];
        for p in chunk {
            for (m, v) in mean.iter_mut().zip(p) {
                *m += v;
            }
        }
        for m in &mut mean {
            *m /= n;
        }

        calibrated.extend(chunk.iter().map(|p| {
            softmax(&p.iter().zip(&mean).map(|(v, m)| v - m).collect::<Vec<_>>())
        }));
    }
    Ok(calibrated)
}

/// [`batch_calibrate`] with the standard chunk size
///
/// # Errors
///
/// See [`batch_calibrate`].
pub fn batch_calibrate_standard(probs: &[Vec<f64>]) -> Result<Vec<Vec<f64>>> {
    batch_calibrate(probs, STANDARD_BATCH_SIZE)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::config::SplitSizes;
    use crate::dataset::{Furniture, Record};
    use crate::prompt::tests::toy_split;

    fn writer() -> PromptWriter {
        PromptWriter::new(toy_split(60, SplitSizes::new(10, 20, 10)))
    }

    fn labels() -> Vec<String> {
        vec!["negative".to_string(), "positive".to_string()]
    }

    /// Number embedded in the query line of a toy sentiment prompt
    fn query_number(prompt: &str) -> Option<usize> {
        prompt
            .rsplit('\n')
            .next()?
            .split_whitespace()
            .find_map(|w| w.parse().ok())
    }

    #[test]
    fn test_softmax_sums_to_one() {
        let p = softmax(&[1.0, 2.0, 3.0]);
        assert!((p.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!(p[2] > p[1] && p[1] > p[0]);
        assert_eq!(softmax(&[0.0, 0.0]), vec![0.5, 0.5]);
    }

    #[test]
    fn test_untrained_passes_through() {
        let calibrator = Calibrator::contextual(labels());
        assert_eq!(calibrator.status(), CalibrationStatus::Untrained);
        assert_eq!(calibrator.apply(&[0.7, 0.3], None, None).unwrap(), vec![0.7, 0.3]);
    }

    #[test]
    fn test_contextual_removes_constant_bias() {
        let writer = writer();
        let mut calibrator = Calibrator::contextual(labels());
        let mut prompts = Vec::new();
        calibrator
            .train(
                &writer,
                |prompt, _| {
                    prompts.push(prompt.to_string());
                    Ok(vec![0.8, 0.2].into())
                },
                &writer.split().calibration,
                16,
                2,
            )
            .unwrap();

        assert_eq!(prompts.len(), 16);
        assert!(prompts.iter().all(|p| p.ends_with("review:  sentiment: ")));
        assert_eq!(calibrator.status(), CalibrationStatus::Trained);
        assert!((calibrator.bias()[0] - 0.8).abs() < 1e-5);

        let corrected = calibrator.apply(&[0.8, 0.2], None, None).unwrap();
        assert!((corrected[0] - 0.5).abs() < 1e-4);
    }

    #[test]
    fn test_contextual_zero_shot_episodes() {
        let writer = writer();
        let mut calibrator = Calibrator::contextual(labels());
        let mut calls = 0;
        calibrator
            .train(
                &writer,
                |prompt, _| {
                    calls += 1;
                    assert_eq!(prompt, "review:  sentiment: ");
                    Ok(vec![0.5, 0.5].into())
                },
                &writer.split().calibration,
                5,
                0,
            )
            .unwrap();
        assert_eq!(calls, 5);
    }

    #[test]
    fn test_domain_queries_are_random_words() {
        let writer = writer();
        let mut calibrator = Calibrator::domain(labels(), 12);
        let mut queries = Vec::new();
        calibrator
            .train(
                &writer,
                |prompt, _| {
                    let last = prompt.rsplit('\n').next().unwrap_or_default();
                    let bag = last
                        .strip_prefix("review: ")
                        .and_then(|s| s.strip_suffix(" sentiment: "))
                        .unwrap()
                        .to_string();
                    queries.push(bag);
                    Ok(vec![0.6, 0.4].into())
                },
                &writer.split().calibration,
                4,
                1,
            )
            .unwrap();

        assert_eq!(queries.len(), 4);
        for bag in &queries {
            assert_eq!(bag.split(' ').count(), 12);
        }
        assert_ne!(queries[0], queries[1]);
        assert_eq!(calibrator.status(), CalibrationStatus::Trained);
    }

    #[test]
    fn test_training_is_reproducible() {
        let writer = writer();
        let train = || {
            let mut calibrator = Calibrator::domain_standard(labels());
            let mut prompts = Vec::new();
            calibrator
                .train(
                    &writer,
                    |prompt, _| {
                        prompts.push(prompt.to_string());
                        Ok(vec![0.5, 0.5].into())
                    },
                    &writer.split().demonstration,
                    3,
                    2,
                )
                .unwrap();
            prompts
        };
        assert_eq!(train(), train());
    }

    #[test]
    fn test_wrong_label_count_is_shape_error() {
        let writer = writer();
        let mut calibrator = Calibrator::contextual(labels());
        let result = calibrator.train(
            &writer,
            |_, _| Ok(vec![1.0].into()),
            &writer.split().calibration,
            2,
            1,
        );
        assert!(matches!(result, Err(HarnessError::Shape(_))));
        assert!(matches!(
            calibrator.apply(&[1.0], None, None),
            Err(HarnessError::Shape(_))
        ));
    }

    #[test]
    fn test_inference_failure_propagates() {
        let writer = writer();
        let mut calibrator = Calibrator::contextual(labels());
        let result = calibrator.train(
            &writer,
            |_, _| Err(anyhow::anyhow!("device lost")),
            &writer.split().calibration,
            2,
            1,
        );
        assert_eq!(result, Err(HarnessError::Inference("device lost".to_string())));
    }

    #[test]
    fn test_failed_retraining_keeps_previous_state() {
        let writer = writer();
        let mut calibrator = Calibrator::contextual(labels());
        calibrator
            .train(
                &writer,
                |_, _| Ok(vec![0.8, 0.2].into()),
                &writer.split().calibration,
                4,
                1,
            )
            .unwrap();
        let before = calibrator.apply(&[0.6, 0.4], None, None).unwrap();

        let mut calls = 0;
        let result = calibrator.train(
            &writer,
            |_, _| {
                calls += 1;
                if calls == 3 {
                    Err(anyhow::anyhow!("server timed out"))
                } else {
                    Ok(vec![0.1, 0.9].into())
                }
            },
            &writer.split().calibration,
            4,
            1,
        );

        assert!(matches!(result, Err(HarnessError::Inference(_))));
        assert_eq!(calibrator.status(), CalibrationStatus::Trained);
        assert_eq!(calibrator.apply(&[0.6, 0.4], None, None).unwrap(), before);
    }

    #[test]
    fn test_hidden_state_centroids() {
        let writer = writer();
        let mut calibrator = Calibrator::hidden_state(labels());
        calibrator
            .train(
                &writer,
                |prompt, _| {
                    let even = query_number(prompt).unwrap() % 2 == 0;
                    let hidden = if even { vec![1.0, 0.0] } else { vec![0.0, 1.0] };
                    Ok(InferenceOutput::from(vec![0.5, 0.5]).with_hidden_state(hidden))
                },
                &writer.split().demonstration,
                32,
                1,
            )
            .unwrap();

        assert_eq!(calibrator.status(), CalibrationStatus::Trained);
        // even-numbered reviews are positive (label 1)
        assert_eq!(calibrator.centroids()[1], vec![1.0, 0.0]);
        assert_eq!(calibrator.centroids()[0], vec![0.0, 1.0]);

        let p = calibrator
            .apply(&[0.5, 0.5], None, Some(&[1.0, 0.0]))
            .unwrap();
        assert!(p[1] > p[0]);
        assert!(calibrator.apply(&[0.5, 0.5], None, None).is_err());
    }

    #[test]
    fn test_hidden_state_fails_on_missing_label() {
        let records = (0..10)
            .map(|i| Record::new([format!("text {i}")], "yes"))
            .collect();
        let pool = LabeledDataset::new(
            "one_sided",
            vec!["no".to_string(), "yes".to_string()],
            Furniture {
                input_prefixes: vec![String::new()],
                input_affixes: vec![String::new()],
                ..Furniture::default()
            },
            records,
        )
        .unwrap();
        let split = std::sync::Arc::new(
            crate::split::TripletSplit::new(
                &pool,
                SplitSizes::new(4, 4, 2),
                crate::config::Settings::lenient(),
            )
            .unwrap(),
        );
        let writer = PromptWriter::new(split);

        let mut calibrator = Calibrator::hidden_state(vec!["no".to_string(), "yes".to_string()]);
        calibrator
            .train(
                &writer,
                |_, _| Ok(InferenceOutput::from(vec![0.5, 0.5]).with_hidden_state(vec![1.0])),
                &pool,
                8,
                1,
            )
            .unwrap();

        assert_eq!(calibrator.status(), CalibrationStatus::Failed);
        assert_eq!(
            calibrator.apply(&[0.9, 0.1], None, Some(&[1.0])).unwrap(),
            vec![0.9, 0.1]
        );
    }

    #[test]
    fn test_hidden_state_requires_hidden_output() {
        let writer = writer();
        let mut calibrator = Calibrator::hidden_state(labels());
        let result = calibrator.train(
            &writer,
            |_, _| Ok(vec![0.5, 0.5].into()),
            &writer.split().demonstration,
            2,
            1,
        );
        assert!(matches!(result, Err(HarnessError::Inference(_))));
    }

    #[test]
    fn test_zero_episodes_rejected() {
        let writer = writer();
        let mut calibrator = Calibrator::contextual(labels());
        let result = calibrator.train(
            &writer,
            |_, _| Ok(vec![0.5, 0.5].into()),
            &writer.split().calibration,
            0,
            1,
        );
        assert!(matches!(result, Err(HarnessError::Shape(_))));
    }

    #[test]
    fn test_batch_identical_entries_become_uniform() {
        let probs = vec![vec![0.7, 0.2, 0.1]; 5];
        for p in batch_calibrate(&probs, 2).unwrap() {
            for v in p {
                assert!((v - 1.0 / 3.0).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_batch_chunks_with_remainder() {
        let probs = vec![
            vec![0.9, 0.1],
            vec![0.7, 0.3],
            vec![0.2, 0.8],
        ];
        let calibrated = batch_calibrate(&probs, 2).unwrap();
        assert_eq!(calibrated.len(), 3);
        // chunk [0.9, 0.1] / [0.7, 0.3] has mean [0.8, 0.2]
        assert_eq!(calibrated[0], softmax(&[0.1, -0.1]));
        // lone trailing entry minus its own mean is zero
        assert_eq!(calibrated[2], vec![0.5, 0.5]);
    }

    #[test]
    fn test_batch_rejects_zero_size_and_ragged() {
        assert!(batch_calibrate(&[vec![1.0]], 0).is_err());
        assert!(batch_calibrate(&[vec![1.0], vec![0.5, 0.5]], 4).is_err());
        assert!(batch_calibrate_standard(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_wrap_yields_calibrated_probabilities() {
        let mut calibrator = Calibrator::contextual(labels());
        calibrator.bias = vec![0.8, 0.2];
        calibrator.status = CalibrationStatus::Trained;

        let mut wrapped = calibrator.wrap(|_, _| Ok(vec![0.8, 0.2].into()));
        let Prediction::Probabilities(p) = wrapped("prompt", &labels()).unwrap() else {
            panic!("expected probabilities");
        };
        assert!((p[0] - 0.5).abs() < 1e-12);
    }
}
