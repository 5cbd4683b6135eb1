//! Configuration module for benchmark settings.
//!
//! Holds the registered standard settings every comparable result must use,
//! the per-dataset split policy, the strict-mode drift policy, and the YAML
//! harness configuration consumed by the CLI.

use crate::diagnostics::{ConfigDrift, Diagnostics};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur during configuration or dataset loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML configuration: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON dataset: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid glob pattern: {0}")]
    InvalidGlob(String),

    #[error("Invalid dataset: {0}")]
    InvalidDataset(String),
}

/// Standard random seed shared by every generator
pub const STANDARD_SEED: u64 = 42;
/// Standard number of calibration records
pub const STANDARD_CALIBRATION_NUMBER: usize = 1024;
/// Standard number of demonstration records
pub const STANDARD_DEMONSTRATION_NUMBER: usize = 4096;
/// Standard number of test records
pub const STANDARD_TEST_NUMBER: usize = 512;
/// Standard number of trials per test record
pub const STANDARD_REPEAT_TIMES: usize = 2;
/// Standard number of ECE bins
pub const STANDARD_ECE_BINS: usize = 10;
/// Standard shot count
pub const STANDARD_K: usize = 4;
/// Standard chunk size for batch calibration
pub const STANDARD_BATCH_SIZE: usize = 128;
/// Standard number of words in a domain-calibration query
pub const STANDARD_DOMAIN_QUERY_LENGTH: usize = 64;
/// Standard number of calibration episodes when training a transform
pub const STANDARD_CALIBRATION_EPISODES: usize = 128;
/// Standard number of words in a domain-bias diagnosis query
pub const STANDARD_DIAGNOSIS_QUERY_LENGTH: usize = 128;

/// Requested calibration/demonstration/test sizes
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct SplitSizes {
    pub calibration: usize,
    pub demonstration: usize,
    pub test: usize,
}

impl SplitSizes {
    #[must_use]
    pub const fn new(calibration: usize, demonstration: usize, test: usize) -> Self {
        Self {
            calibration,
            demonstration,
            test,
        }
    }

    /// Total number of source records consumed
    #[must_use]
    pub const fn total(&self) -> usize {
        self.calibration + self.demonstration + self.test
    }

    #[must_use]
    pub const fn as_array(&self) -> [usize; 3] {
        [self.calibration, self.demonstration, self.test]
    }
}

impl Default for SplitSizes {
    fn default() -> Self {
        Self::new(
            STANDARD_CALIBRATION_NUMBER,
            STANDARD_DEMONSTRATION_NUMBER,
            STANDARD_TEST_NUMBER,
        )
    }
}

/// Registered standard split for a dataset.
///
/// Small datasets cannot supply the default 1024/4096/512 triple and carry
/// their own registered sizes.
#[must_use]
pub fn standard_split_for(dataset: &str) -> SplitSizes {
    match dataset {
        "financial_phrasebank" => SplitSizes::new(512, 1024, 512),
        "tweet_eval_emotion" => SplitSizes::new(1024, 2048, 512),
        _ => SplitSizes::default(),
    }
}

/// Drift policy applied whenever a caller deviates from the standard
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Settings {
    /// Revert deviant values to the standard instead of honouring them
    #[serde(default)]
    pub strict: bool,
}

impl Settings {
    /// Lenient policy: deviations are honoured and recorded
    #[must_use]
    pub const fn lenient() -> Self {
        Self { strict: false }
    }

    /// Strict policy: deviations are recorded and reverted
    #[must_use]
    pub const fn strict() -> Self {
        Self { strict: true }
    }

    /// Resolve the seed to use, recording drift
    #[must_use]
    pub fn resolve_seed(&self, requested: u64, diagnostics: &mut Diagnostics) -> u64 {
        if requested == STANDARD_SEED {
            return requested;
        }
        diagnostics.record(ConfigDrift::Seed {
            requested,
            standard: STANDARD_SEED,
        });
        if self.strict {
            STANDARD_SEED
        } else {
            requested
        }
    }

    /// Resolve split sizes for a dataset, recording drift
    #[must_use]
    pub fn resolve_split(
        &self,
        dataset: &str,
        requested: SplitSizes,
        diagnostics: &mut Diagnostics,
    ) -> SplitSizes {
        let standard = standard_split_for(dataset);
        if requested == standard {
            return requested;
        }
        diagnostics.record(ConfigDrift::SplitSizes {
            dataset: dataset.to_string(),
            requested: requested.as_array(),
            standard: standard.as_array(),
        });
        if self.strict {
            standard
        } else {
            requested
        }
    }

    /// Resolve the trial count, recording drift
    #[must_use]
    pub fn resolve_repeat_times(&self, requested: usize, diagnostics: &mut Diagnostics) -> usize {
        if requested == STANDARD_REPEAT_TIMES {
            return requested;
        }
        diagnostics.record(ConfigDrift::RepeatTimes {
            requested,
            standard: STANDARD_REPEAT_TIMES,
        });
        if self.strict {
            STANDARD_REPEAT_TIMES
        } else {
            requested
        }
    }

    /// Resolve the ECE bin count, recording drift
    #[must_use]
    pub fn resolve_ece_bins(&self, requested: usize, diagnostics: &mut Diagnostics) -> usize {
        if requested == STANDARD_ECE_BINS {
            return requested;
        }
        diagnostics.record(ConfigDrift::EceBins {
            requested,
            standard: STANDARD_ECE_BINS,
        });
        if self.strict {
            STANDARD_ECE_BINS
        } else {
            requested
        }
    }
}

/// Per-run experiment configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExperimentConfig {
    /// Demonstrations per prompt
    #[serde(default = "default_k")]
    pub k: usize,
    /// Trials per test record
    #[serde(default = "default_repeat_times")]
    pub repeat_times: usize,
    /// Permit `k` larger than the demonstration pool (sampling with replacement)
    #[serde(default)]
    pub allow_replacement: bool,
}

const fn default_k() -> usize {
    STANDARD_K
}
const fn default_repeat_times() -> usize {
    STANDARD_REPEAT_TIMES
}
const fn default_ece_bins() -> usize {
    STANDARD_ECE_BINS
}
fn default_datasets() -> String {
    "datasets/*.json".to_string()
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            k: default_k(),
            repeat_times: default_repeat_times(),
            allow_replacement: false,
        }
    }
}

impl ExperimentConfig {
    /// Standard configuration with a different shot count
    #[must_use]
    pub fn with_k(k: usize) -> Self {
        Self {
            k,
            ..Self::default()
        }
    }
}

/// Harness configuration loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HarnessConfig {
    /// Experiment parameters
    #[serde(flatten)]
    pub experiment: ExperimentConfig,
    /// Drift policy
    #[serde(flatten)]
    pub settings: Settings,
    /// ECE bins used by the report
    #[serde(default = "default_ece_bins")]
    pub ece_bins: usize,
    /// Glob pattern for dataset files
    #[serde(default = "default_datasets")]
    pub datasets: String,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            experiment: ExperimentConfig::default(),
            settings: Settings::default(),
            ece_bins: default_ece_bins(),
            datasets: default_datasets(),
        }
    }
}

impl HarnessConfig {
    /// Load harness configuration from YAML file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Load harness configuration from YAML string
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML cannot be parsed.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Dataset files matching the `datasets` glob, in sorted order
    ///
    /// # Errors
    ///
    /// Returns an error if the pattern is invalid or a match is unreadable.
    pub fn dataset_paths(&self) -> Result<Vec<PathBuf>, ConfigError> {
        let paths = glob::glob(&self.datasets)
            .map_err(|e| ConfigError::InvalidGlob(format!("{}: {e}", self.datasets)))?;

        let mut files = paths
            .map(|entry| {
                entry.map_err(|e| ConfigError::IoError(std::io::Error::other(format!("Glob error: {e}"))))
            })
            .collect::<Result<Vec<_>, _>>()?;
        files.sort();
        Ok(files)
    }
}
