//! Demonstration-index sampling for repeated trials.

use crate::error::{HarnessError, Result};
use crate::random::StableRandom;

/// Precomputed demonstration index sets, one per trial
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemonstrationSampler {
    k: usize,
    pool_size: usize,
    computed: Vec<Vec<usize>>,
    overridden: Option<Vec<Vec<usize>>>,
}

impl DemonstrationSampler {
    /// Draw `trial_count` index sets of length `k` from `[0, pool_size)`.
    ///
    /// Within a trial indices are distinct whenever `k <= pool_size`; when
    /// `k` exceeds the pool the trial is drawn with replacement. Trials are
    /// independent of each other, so different trials may share indices.
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::Size` if `k > 0` and the pool is empty.
    pub fn build(k: usize, pool_size: usize, trial_count: usize) -> Result<Self> {
        let mut rng = StableRandom::new();
        let computed = (0..trial_count)
            .map(|_| {
                if k > pool_size {
                    rng.sample_index_set_with_replacement(k, pool_size)
                } else {
                    rng.sample_unique_index_set(k, pool_size)
                }
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            k,
            pool_size,
            computed,
            overridden: None,
        })
    }

    #[must_use]
    pub const fn k(&self) -> usize {
        self.k
    }

    #[must_use]
    pub const fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// True when the computed sets were drawn with replacement
    #[must_use]
    pub const fn used_replacement(&self) -> bool {
        self.k > self.pool_size
    }

    #[must_use]
    pub const fn is_overridden(&self) -> bool {
        self.overridden.is_some()
    }

    fn active(&self) -> &[Vec<usize>] {
        self.overridden.as_deref().unwrap_or(&self.computed)
    }

    /// Number of index sets currently in effect
    #[must_use]
    pub fn len(&self) -> usize {
        self.active().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.active().is_empty()
    }

    /// Index set for `trial`
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::Index` if out of range.
    pub fn get(&self, trial: usize) -> Result<&[usize]> {
        let active = self.active();
        active
            .get(trial)
            .map(Vec::as_slice)
            .ok_or(HarnessError::Index {
                what: "demonstration trial",
                index: trial,
                len: active.len(),
            })
    }

    /// Restore the originally computed index sets
    pub fn reset(&mut self) {
        self.overridden = None;
    }

    /// Replace the index sets wholesale with caller-supplied ones
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::Shape` if `sets.len() != expected_len` or any
    /// set does not hold exactly `k` indices.
    pub fn override_with(&mut self, sets: Vec<Vec<usize>>, expected_len: usize) -> Result<()> {
        if sets.len() != expected_len {
            return Err(HarnessError::Shape(format!(
                "sampler override has {} sets, expected one per test record ({expected_len})",
                sets.len()
            )));
        }
        if let Some((i, set)) = sets.iter().enumerate().find(|(_, s)| s.len() != self.k) {
            return Err(HarnessError::Shape(format!(
                "sampler override set {i} has {} indices, expected k = {}",
                set.len(),
                self.k
            )));
        }
        self.overridden = Some(sets);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_build_shape() {
        let sampler = DemonstrationSampler::build(4, 100, 12).unwrap();
        assert_eq!(sampler.len(), 12);
        for trial in 0..12 {
            let set = sampler.get(trial).unwrap();
            assert_eq!(set.len(), 4);
            assert!(set.iter().all(|&i| i < 100));
        }
        assert!(!sampler.used_replacement());
    }

    #[test]
    fn test_no_duplicates_within_trial_when_k_fits() {
        let sampler = DemonstrationSampler::build(8, 8, 50).unwrap();
        for trial in 0..sampler.len() {
            let unique: HashSet<_> = sampler.get(trial).unwrap().iter().collect();
            assert_eq!(unique.len(), 8);
        }
    }

    #[test]
    fn test_replacement_when_k_exceeds_pool() {
        let sampler = DemonstrationSampler::build(5, 2, 3).unwrap();
        assert!(sampler.used_replacement());
        for trial in 0..3 {
            let set = sampler.get(trial).unwrap();
            assert_eq!(set.len(), 5);
            assert!(set.iter().all(|&i| i < 2));
        }
    }

    #[test]
    fn test_trials_are_independent() {
        let sampler = DemonstrationSampler::build(2, 50, 20).unwrap();
        let distinct: HashSet<Vec<usize>> =
            (0..20).map(|t| sampler.get(t).unwrap().to_vec()).collect();
        assert!(distinct.len() > 1);
    }

    #[test]
    fn test_build_is_reproducible() {
        let a = DemonstrationSampler::build(4, 64, 10).unwrap();
        let b = DemonstrationSampler::build(4, 64, 10).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_get_out_of_range() {
        let sampler = DemonstrationSampler::build(1, 10, 2).unwrap();
        assert!(matches!(
            sampler.get(2),
            Err(HarnessError::Index { index: 2, len: 2, .. })
        ));
    }

    #[test]
    fn test_override_and_reset() {
        let mut sampler = DemonstrationSampler::build(2, 10, 6).unwrap();
        let original = sampler.get(0).unwrap().to_vec();

        sampler
            .override_with(vec![vec![0, 1], vec![2, 3], vec![4, 5]], 3)
            .unwrap();
        assert!(sampler.is_overridden());
        assert_eq!(sampler.len(), 3);
        assert_eq!(sampler.get(1).unwrap(), &[2, 3]);

        sampler.reset();
        assert!(!sampler.is_overridden());
        assert_eq!(sampler.len(), 6);
        assert_eq!(sampler.get(0).unwrap(), original.as_slice());
    }

    #[test]
    fn test_override_shape_errors() {
        let mut sampler = DemonstrationSampler::build(2, 10, 4).unwrap();
        assert!(matches!(
            sampler.override_with(vec![vec![0, 1]], 2),
            Err(HarnessError::Shape(_))
        ));
        assert!(matches!(
            sampler.override_with(vec![vec![0, 1], vec![2]], 2),
            Err(HarnessError::Shape(_))
        ));
        assert!(!sampler.is_overridden());
    }

    #[test]
    fn test_zero_k() {
        let sampler = DemonstrationSampler::build(0, 10, 3).unwrap();
        assert_eq!(sampler.len(), 3);
        assert!(sampler.get(0).unwrap().is_empty());
    }
}
