//! Structured configuration-drift warnings.
//!
//! Any deviation from the standard benchmark settings (seed, split sizes,
//! repeat count, ECE bins, prompt furniture, demonstration sampler) makes
//! results incomparable with published baselines. Such deviations never abort
//! a run; they are recorded here so callers and tests can inspect them, and
//! are logged through `tracing`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single non-fatal deviation from the standard configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConfigDrift {
    /// Generator seeded with something other than the standard seed
    Seed { requested: u64, standard: u64 },
    /// Split sizes differ from the dataset's registered standard split
    SplitSizes {
        dataset: String,
        requested: [usize; 3],
        standard: [usize; 3],
    },
    /// Trial count differs from the standard
    RepeatTimes { requested: usize, standard: usize },
    /// ECE bin count differs from the standard
    EceBins { requested: usize, standard: usize },
    /// A prompt furniture field or the label space was edited
    Furniture { field: String },
    /// The demonstration sampler was replaced by caller-supplied index sets
    SamplerOverride { dataset: String },
    /// Demonstrations had to be drawn with replacement (`k` exceeds the pool)
    SamplingWithReplacement { k: usize, pool_size: usize },
}

impl fmt::Display for ConfigDrift {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Seed {
                requested,
                standard,
            } => write!(f, "random seed {requested} differs from standard {standard}"),
            Self::SplitSizes {
                dataset,
                requested,
                standard,
            } => write!(
                f,
                "split sizes {requested:?} for {dataset} differ from standard {standard:?}"
            ),
            Self::RepeatTimes {
                requested,
                standard,
            } => write!(f, "repeat times {requested} differs from standard {standard}"),
            Self::EceBins {
                requested,
                standard,
            } => write!(f, "ECE bins {requested} differs from standard {standard}"),
            Self::Furniture { field } => write!(f, "prompt furniture field `{field}` was edited"),
            Self::SamplerOverride { dataset } => {
                write!(f, "demonstration sampler for {dataset} was overridden")
            }
            Self::SamplingWithReplacement { k, pool_size } => write!(
                f,
                "k = {k} exceeds demonstration pool of {pool_size}; sampling with replacement"
            ),
        }
    }
}

/// Ordered collection of drift warnings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostics {
    warnings: Vec<ConfigDrift>,
}

impl Diagnostics {
    /// Create an empty collection
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a drift warning and log it
    pub fn record(&mut self, drift: ConfigDrift) {
        tracing::warn!(
            drift = %drift,
            "You are off the standard benchmark configuration; results are not baseline-comparable"
        );
        self.warnings.push(drift);
    }

    /// Append every warning of another collection without re-logging
    pub fn extend_from(&mut self, other: &Self) {
        self.warnings.extend(other.warnings.iter().cloned());
    }

    /// All recorded warnings in order
    #[must_use]
    pub fn warnings(&self) -> &[ConfigDrift] {
        &self.warnings
    }

    /// True when the configuration is entirely standard
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.warnings.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.warnings.is_empty()
    }
}
