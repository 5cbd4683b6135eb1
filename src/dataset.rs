//! Labeled record collections and their prompt furniture.
//!
//! Raw dataset acquisition is the caller's business: a collection is built in
//! memory (or read from a local JSON file of the same shape) and handed to the
//! partitioner.

use crate::config::ConfigError;
use crate::error::{HarnessError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One labeled example: ordered input fields plus a label word
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Input text fields (one for single-sentence tasks, two for pair tasks)
    pub inputs: Vec<String>,
    /// Label word, a member of the dataset's label space
    pub label: String,
}

impl Record {
    #[must_use]
    pub fn new<I, S>(inputs: I, label: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            inputs: inputs.into_iter().map(Into::into).collect(),
            label: label.into(),
        }
    }
}

/// Textual scaffolding wrapped around raw data to form a prompt
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Furniture {
    #[serde(default)]
    pub instruction: String,
    /// One prefix per input field
    #[serde(default)]
    pub input_prefixes: Vec<String>,
    /// One affix per input field
    #[serde(default)]
    pub input_affixes: Vec<String>,
    #[serde(default)]
    pub label_prefix: String,
    #[serde(default)]
    pub label_affix: String,
    #[serde(default)]
    pub query_prefix: String,
}

impl Furniture {
    /// Check that prefix/affix lists match the number of input fields
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::Shape` on a length mismatch.
    pub fn validate(&self, input_fields: usize) -> Result<()> {
        check_field_list("input_prefixes", &self.input_prefixes, input_fields)?;
        check_field_list("input_affixes", &self.input_affixes, input_fields)
    }
}

pub(crate) fn check_field_list(name: &str, list: &[String], input_fields: usize) -> Result<()> {
    if list.len() == input_fields {
        Ok(())
    } else {
        Err(HarnessError::Shape(format!(
            "{name} has {} entries but records have {input_fields} input fields",
            list.len()
        )))
    }
}

/// Ordered, labeled record collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabeledDataset {
    name: String,
    label_space: Vec<String>,
    #[serde(default)]
    furniture: Furniture,
    records: Vec<Record>,
}

impl LabeledDataset {
    /// Build a collection, validating labels and field counts
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::UnknownLabel` if a record's label is outside the
    /// label space, or `HarnessError::Shape` if records disagree on the number
    /// of input fields or the furniture lists do not match it.
    pub fn new(
        name: impl Into<String>,
        label_space: Vec<String>,
        furniture: Furniture,
        records: Vec<Record>,
    ) -> Result<Self> {
        let dataset = Self {
            name: name.into(),
            label_space,
            furniture,
            records,
        };
        dataset.validate()?;
        Ok(dataset)
    }

    fn validate(&self) -> Result<()> {
        let fields = self.input_field_count();
        for (i, record) in self.records.iter().enumerate() {
            if record.inputs.len() != fields {
                return Err(HarnessError::Shape(format!(
                    "record {i} of {} has {} input fields, expected {fields}",
                    self.name,
                    record.inputs.len()
                )));
            }
            if !self.label_space.contains(&record.label) {
                return Err(HarnessError::UnknownLabel {
                    dataset: self.name.clone(),
                    label: record.label.clone(),
                });
            }
        }
        if !self.records.is_empty() {
            self.furniture.validate(fields)?;
        }
        Ok(())
    }

    /// Load a collection from a JSON file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Parse a collection from a JSON string
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON cannot be parsed or validated.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let dataset: Self = serde_json::from_str(json)?;
        dataset
            .validate()
            .map_err(|e| ConfigError::InvalidDataset(e.to_string()))?;
        Ok(dataset)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rename(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Record at `index`
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::Index` if out of range.
    pub fn get(&self, index: usize) -> Result<&Record> {
        self.records.get(index).ok_or(HarnessError::Index {
            what: "record",
            index,
            len: self.records.len(),
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.records.iter()
    }

    #[must_use]
    pub fn label_space(&self) -> &[String] {
        &self.label_space
    }

    /// Position of a label word in the label space
    #[must_use]
    pub fn label_index(&self, label: &str) -> Option<usize> {
        self.label_space.iter().position(|l| l == label)
    }

    /// Label-space index of the record at `index`
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::Index` or `HarnessError::UnknownLabel`.
    pub fn label_index_of(&self, index: usize) -> Result<usize> {
        let record = self.get(index)?;
        self.label_index(&record.label)
            .ok_or_else(|| HarnessError::UnknownLabel {
                dataset: self.name.clone(),
                label: record.label.clone(),
            })
    }

    /// Number of input fields per record (derived from the furniture when empty)
    #[must_use]
    pub fn input_field_count(&self) -> usize {
        self.records
            .first()
            .map_or(self.furniture.input_prefixes.len(), |r| r.inputs.len())
    }

    #[must_use]
    pub fn furniture(&self) -> &Furniture {
        &self.furniture
    }

    pub fn set_instruction(&mut self, instruction: impl Into<String>) {
        self.furniture.instruction = instruction.into();
    }

    /// # Errors
    ///
    /// Returns `HarnessError::Shape` if the list length differs from the field count.
    pub fn set_input_prefixes(&mut self, prefixes: Vec<String>) -> Result<()> {
        check_field_list("input_prefixes", &prefixes, self.input_field_count())?;
        self.furniture.input_prefixes = prefixes;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `HarnessError::Shape` if the list length differs from the field count.
    pub fn set_input_affixes(&mut self, affixes: Vec<String>) -> Result<()> {
        check_field_list("input_affixes", &affixes, self.input_field_count())?;
        self.furniture.input_affixes = affixes;
        Ok(())
    }

    pub fn set_label_prefix(&mut self, prefix: impl Into<String>) {
        self.furniture.label_prefix = prefix.into();
    }

    pub fn set_label_affix(&mut self, affix: impl Into<String>) {
        self.furniture.label_affix = affix.into();
    }

    pub fn set_query_prefix(&mut self, prefix: impl Into<String>) {
        self.furniture.query_prefix = prefix.into();
    }

    /// Replace the label space.
    ///
    /// Records keep their label words, so the new space must still contain
    /// every label in use (it may reorder or add words).
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::UnknownLabel` if a record label is missing.
    pub fn set_label_space(&mut self, label_space: Vec<String>) -> Result<()> {
        self.check_label_space(&label_space)?;
        self.label_space = label_space;
        Ok(())
    }

    /// Check that `label_space` covers every record label without changing anything
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::UnknownLabel` for the first uncovered label.
    pub fn check_label_space(&self, label_space: &[String]) -> Result<()> {
        match self.records.iter().find(|r| !label_space.contains(&r.label)) {
            Some(record) => Err(HarnessError::UnknownLabel {
                dataset: self.name.clone(),
                label: record.label.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Partition by explicit index lists; each part inherits name, label
    /// space, and furniture
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::Index` if any index is out of range.
    pub fn split(&self, groups: &[&[usize]]) -> Result<Vec<Self>> {
        groups
            .iter()
            .map(|group| {
                let records = group
                    .iter()
                    .map(|&i| self.get(i).cloned())
                    .collect::<Result<Vec<_>>>()?;
                Ok(Self {
                    name: self.name.clone(),
                    label_space: self.label_space.clone(),
                    furniture: self.furniture.clone(),
                    records,
                })
            })
            .collect()
    }
}
