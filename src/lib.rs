//! # staicc-eval
//!
//! Reproducible benchmark harness for in-context-learning text
//! classification.
//!
//! A language model is asked to classify a query after seeing `k` labeled
//! demonstrations. Everything except the model is fixed here: which records
//! land in the calibration, demonstration, and test sets, which
//! demonstrations each test query sees, how prompts are laid out, and how
//! predictions are scored. Results are comparable across runs and machines
//! because every random choice comes from a seeded generator.
//!
//! ## Pipeline
//!
//! ```text
//! LabeledDataset
//!        ↓
//! TripletSplit (calibration / demonstration / test)
//!        ↓
//! DemonstrationSampler (k indices per test record per trial)
//!        ↓
//! PromptWriter (instruction + demonstrations + query)
//!        ↓
//! caller's inference function (prompt, label space) → Prediction
//!        ↓  optional Calibrator or batch calibration
//! Metrics (accuracy, true-label likelihood, macro-F1, ECE)
//!        ↓
//! Benchmark average → BenchmarkReport
//! ```
//!
//! The same pipeline diagnoses label bias: [`BiasKind::Contextual`] and
//! [`BiasKind::Domain`] swap the query for an empty or random-word line and
//! measure the model's prior, [`BiasKind::Post`] measures how skewed its
//! predictions on real queries are. Noisy-channel inference (one prompt per
//! candidate label) is available for runs and diagnoses alike.
//!
//! Departures from the registered standard settings are allowed but are
//! recorded as [`ConfigDrift`] warnings; [`Settings::strict`] reverts them.

pub mod benchmark;
pub mod calibration;
pub mod config;
pub mod dataset;
pub mod diagnostics;
pub mod error;
pub mod experimentor;
pub mod metrics;
pub mod prompt;
pub mod random;
pub mod report;
pub mod sampler;
pub mod split;

pub use benchmark::{Benchmark, BenchmarkResult, DiagnosisResult, TripletBiasResult};
pub use calibration::{
    batch_calibrate, batch_calibrate_standard, softmax, CalibrationMethod, CalibrationStatus,
    Calibrator, InferenceOutput,
};
pub use config::{
    standard_split_for, ConfigError, ExperimentConfig, HarnessConfig, Settings, SplitSizes,
};
pub use dataset::{Furniture, LabeledDataset, Record};
pub use diagnostics::{ConfigDrift, Diagnostics};
pub use error::{HarnessError, Result};
pub use experimentor::{
    BiasKind, BiasOutcome, ExperimentOutcome, Experimentor, Prediction, RunAccumulator,
};
pub use metrics::{
    bonferroni_correction, bootstrap_ci, paired_t_test, DistributionFn, EffectSize, MetricFn,
    MetricRegistry, SignificanceResult, StatConfig,
};
pub use prompt::{DemoLine, PromptWriter};
pub use random::StableRandom;
pub use report::{BenchmarkReport, ReportBuilder, ReportMetadata};
pub use sampler::DemonstrationSampler;
pub use split::TripletSplit;
