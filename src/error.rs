//! Error taxonomy shared by the experiment engine.
//!
//! Every variant is a structural violation of harness setup and is fatal:
//! callers propagate it with `?`, nothing is retried. Non-fatal deviations
//! from the standard configuration are reported through
//! [`crate::diagnostics::Diagnostics`] instead.

use thiserror::Error;

/// Errors raised by the deterministic experiment engine
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HarnessError {
    #[error("dataset {dataset} is too small ({available}) to provide {requested} records")]
    Size {
        dataset: String,
        requested: usize,
        available: usize,
    },

    #[error("shape mismatch: {0}")]
    Shape(String),

    #[error("{what} index {index} out of range (len {len})")]
    Index {
        what: &'static str,
        index: usize,
        len: usize,
    },

    #[error("probability {value} at prediction {row} is outside [0, 1]")]
    Range { row: usize, value: f64 },

    #[error("ground truth ({ground_truth}) and predictions ({predictions}) differ in length")]
    Length {
        ground_truth: usize,
        predictions: usize,
    },

    #[error("no predictions were collected")]
    EmptyRun,

    #[error("label {label:?} is not in the label space of {dataset}")]
    UnknownLabel { dataset: String, label: String },

    #[error("inference failed: {0}")]
    Inference(String),
}

/// Convenience alias used across the crate
pub type Result<T, E = HarnessError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_error_names_dataset() {
        let err = HarnessError::Size {
            dataset: "sst2".to_string(),
            requested: 5632,
            available: 100,
        };
        let msg = err.to_string();
        assert!(msg.contains("sst2"));
        assert!(msg.contains("5632"));
        assert!(msg.contains("100"));
    }

    #[test]
    fn test_index_error_display() {
        let err = HarnessError::Index {
            what: "query",
            index: 7,
            len: 3,
        };
        assert_eq!(err.to_string(), "query index 7 out of range (len 3)");
    }
}
