//! Calibration/demonstration/test partitioning.

use crate::config::{Settings, SplitSizes};
use crate::dataset::LabeledDataset;
use crate::diagnostics::Diagnostics;
use crate::error::{HarnessError, Result};
use crate::random::StableRandom;

/// Three disjoint sub-collections drawn from one source collection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TripletSplit {
    dataset_name: String,
    sizes: SplitSizes,
    /// Source indices of each part, in draw order
    indices: [Vec<usize>; 3],
    pub calibration: LabeledDataset,
    pub demonstration: LabeledDataset,
    pub test: LabeledDataset,
    diagnostics: Diagnostics,
}

impl TripletSplit {
    /// Partition `source` into calibration, demonstration, and test parts.
    ///
    /// Sizes that differ from the dataset's registered standard split are
    /// recorded as drift (and reverted under a strict policy).
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::Size` if the source holds fewer records than
    /// the three parts need.
    pub fn new(source: &LabeledDataset, sizes: SplitSizes, settings: Settings) -> Result<Self> {
        let mut diagnostics = Diagnostics::new();
        let sizes = settings.resolve_split(source.name(), sizes, &mut diagnostics);

        if sizes.total() > source.len() {
            return Err(HarnessError::Size {
                dataset: source.name().to_string(),
                requested: sizes.total(),
                available: source.len(),
            });
        }

        let mut rng = StableRandom::new();
        let drawn = rng.sample_unique_index_set(sizes.total(), source.len())?;
        let (calibration_idx, rest) = drawn.split_at(sizes.calibration);
        let (demonstration_idx, test_idx) = rest.split_at(sizes.demonstration);

        let mut parts = source
            .split(&[calibration_idx, demonstration_idx, test_idx])?
            .into_iter();
        let (Some(mut calibration), Some(mut demonstration), Some(mut test)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(HarnessError::Shape(
                "partition did not yield three parts".to_string(),
            ));
        };

        let name = source.name();
        calibration.rename(format!("{name}-calibration"));
        demonstration.rename(format!("{name}-demonstration"));
        test.rename(format!("{name}-test"));

        tracing::debug!(
            dataset = %name,
            calibration = sizes.calibration,
            demonstration = sizes.demonstration,
            test = sizes.test,
            "Split dataset"
        );

        Ok(Self {
            dataset_name: name.to_string(),
            sizes,
            indices: [
                calibration_idx.to_vec(),
                demonstration_idx.to_vec(),
                test_idx.to_vec(),
            ],
            calibration,
            demonstration,
            test,
            diagnostics,
        })
    }

    /// Partition with the dataset's registered standard sizes
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::Size` if the source is too small.
    pub fn standard(source: &LabeledDataset) -> Result<Self> {
        Self::new(
            source,
            crate::config::standard_split_for(source.name()),
            Settings::default(),
        )
    }

    #[must_use]
    pub fn dataset_name(&self) -> &str {
        &self.dataset_name
    }

    #[must_use]
    pub const fn sizes(&self) -> SplitSizes {
        self.sizes
    }

    /// Source indices of the calibration, demonstration, and test parts
    #[must_use]
    pub const fn source_indices(&self) -> &[Vec<usize>; 3] {
        &self.indices
    }

    #[must_use]
    pub const fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Label space shared by the three parts
    #[must_use]
    pub fn label_space(&self) -> &[String] {
        self.demonstration.label_space()
    }

    /// Label word of test record `index`
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::Index` if out of range.
    pub fn ground_truth_label(&self, index: usize) -> Result<&str> {
        self.test
            .get(index)
            .map(|r| r.label.as_str())
            .map_err(|_| HarnessError::Index {
                what: "test",
                index,
                len: self.test.len(),
            })
    }

    /// Label-space index of test record `index`
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::Index` if out of range.
    pub fn ground_truth_index(&self, index: usize) -> Result<usize> {
        if index >= self.test.len() {
            return Err(HarnessError::Index {
                what: "test",
                index,
                len: self.test.len(),
            });
        }
        self.test.label_index_of(index)
    }

    fn parts_mut(&mut self) -> [&mut LabeledDataset; 3] {
        [
            &mut self.calibration,
            &mut self.demonstration,
            &mut self.test,
        ]
    }

    pub fn set_instruction_triple(&mut self, instruction: &str) {
        for part in self.parts_mut() {
            part.set_instruction(instruction);
        }
    }

    /// # Errors
    ///
    /// Returns `HarnessError::Shape` if the list length differs from the field count.
    pub fn set_input_prefixes_triple(&mut self, prefixes: &[String]) -> Result<()> {
        for part in self.parts_mut() {
            part.set_input_prefixes(prefixes.to_vec())?;
        }
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `HarnessError::Shape` if the list length differs from the field count.
    pub fn set_input_affixes_triple(&mut self, affixes: &[String]) -> Result<()> {
        for part in self.parts_mut() {
            part.set_input_affixes(affixes.to_vec())?;
        }
        Ok(())
    }

    pub fn set_label_prefix_triple(&mut self, prefix: &str) {
        for part in self.parts_mut() {
            part.set_label_prefix(prefix);
        }
    }

    pub fn set_label_affix_triple(&mut self, affix: &str) {
        for part in self.parts_mut() {
            part.set_label_affix(affix);
        }
    }

    pub fn set_query_prefix_triple(&mut self, prefix: &str) {
        for part in self.parts_mut() {
            part.set_query_prefix(prefix);
        }
    }

    /// Replace the label space of all three parts, or of none.
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::UnknownLabel` if a record label of any part is
    /// missing from the new space.
    pub fn set_label_space_triple(&mut self, label_space: &[String]) -> Result<()> {
        for part in [&self.calibration, &self.demonstration, &self.test] {
            part.check_label_space(label_space)?;
        }
        for part in self.parts_mut() {
            part.set_label_space(label_space.to_vec())?;
        }
        Ok(())
    }
}
