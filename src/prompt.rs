//! Prompt assembly from a structured template.
//!
//! A prompt is laid out as:
//!
//! ```text
//! <instruction>
//! [ <prefix[i]><demo.input[i]><affix[i]> ... <label_prefix><demo.label><label_affix> ] * k
//! <query_prefix>
//! <prefix[i]><query.input[i]><affix[i]> ...
//! <label_prefix>
//! ```
//!
//! No separators are inserted; any newline must be part of the furniture.
//!
//! A noisy-channel prompt puts every label before its inputs and is rendered
//! once per candidate label, so the model scores `P(input | label)`:
//!
//! ```text
//! <instruction>
//! [ <label_prefix><demo.label><label_affix><prefix[i]><demo.input[i]><affix[i]> ... ] * k
//! <query_prefix>
//! <label_prefix><candidate><label_affix><prefix[i]><query.input[i]><affix[i]> ...
//! ```

use crate::dataset::{check_field_list, Furniture};
use crate::diagnostics::{ConfigDrift, Diagnostics};
use crate::error::{HarnessError, Result};
use crate::random::StableRandom;
use crate::split::TripletSplit;
use std::fmt;
use std::sync::Arc;

/// Caller-supplied demonstration line: input fields plus label word
pub type DemoLine = (Vec<String>, String);

/// Renders prompts for one triplet split from a furniture snapshot
#[derive(Debug, Clone)]
pub struct PromptWriter {
    split: Arc<TripletSplit>,
    instruction: String,
    input_prefixes: Vec<String>,
    input_affixes: Vec<String>,
    label_prefix: String,
    label_affix: String,
    query_prefix: String,
    label_space: Vec<String>,
    input_fields: usize,
    example_rng: StableRandom,
    diagnostics: Diagnostics,
}

impl PromptWriter {
    /// Snapshot the split's furniture.
    ///
    /// Instruction, prefixes, affixes, and label space come from the
    /// demonstration part; the query prefix from the test part. Later edits
    /// to the split do not reach this writer until [`Self::resync`].
    #[must_use]
    pub fn new(split: Arc<TripletSplit>) -> Self {
        let demo = split.demonstration.furniture().clone();
        let query_prefix = split.test.furniture().query_prefix.clone();
        let label_space = split.demonstration.label_space().to_vec();
        let input_fields = split.demonstration.input_field_count();
        let Furniture {
            instruction,
            input_prefixes,
            input_affixes,
            label_prefix,
            label_affix,
            ..
        } = demo;

        Self {
            split,
            instruction,
            input_prefixes,
            input_affixes,
            label_prefix,
            label_affix,
            query_prefix,
            label_space,
            input_fields,
            example_rng: StableRandom::new(),
            diagnostics: Diagnostics::new(),
        }
    }

    /// Re-take the furniture snapshot from a (possibly edited) split
    pub fn resync(&mut self, split: Arc<TripletSplit>) {
        let diagnostics = std::mem::take(&mut self.diagnostics);
        *self = Self::new(split);
        self.diagnostics = diagnostics;
    }

    #[must_use]
    pub fn split(&self) -> &TripletSplit {
        &self.split
    }

    #[must_use]
    pub fn label_space(&self) -> &[String] {
        &self.label_space
    }

    #[must_use]
    pub const fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    #[must_use]
    pub const fn input_fields(&self) -> usize {
        self.input_fields
    }

    /// Current furniture of this writer
    #[must_use]
    pub fn furniture(&self) -> Furniture {
        Furniture {
            instruction: self.instruction.clone(),
            input_prefixes: self.input_prefixes.clone(),
            input_affixes: self.input_affixes.clone(),
            label_prefix: self.label_prefix.clone(),
            label_affix: self.label_affix.clone(),
            query_prefix: self.query_prefix.clone(),
        }
    }

    /// Label word of test record `query_index`
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::Index` if out of range.
    pub fn label_of_test_sample(&self, query_index: usize) -> Result<&str> {
        self.split.ground_truth_label(query_index)
    }

    fn push_inputs(&self, prompt: &mut String, inputs: &[String]) {
        for ((prefix, input), affix) in self
            .input_prefixes
            .iter()
            .zip(inputs)
            .zip(&self.input_affixes)
        {
            prompt.push_str(prefix);
            prompt.push_str(input);
            prompt.push_str(affix);
        }
    }

    fn push_demo(&self, prompt: &mut String, inputs: &[String], label: &str) {
        self.push_inputs(prompt, inputs);
        prompt.push_str(&self.label_prefix);
        prompt.push_str(label);
        prompt.push_str(&self.label_affix);
    }

    fn push_channel_demo(&self, prompt: &mut String, inputs: &[String], label: &str) {
        prompt.push_str(&self.label_prefix);
        prompt.push_str(label);
        prompt.push_str(&self.label_affix);
        self.push_inputs(prompt, inputs);
    }

    fn push_query(&self, prompt: &mut String, inputs: &[String]) {
        prompt.push_str(&self.query_prefix);
        self.push_inputs(prompt, inputs);
        prompt.push_str(&self.label_prefix);
    }

    /// Render the prompt for demonstration indices `demos` and test record `query`
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::Index` if any demonstration or query index is out of range.
    pub fn render(&self, demos: &[usize], query: usize) -> Result<String> {
        let test = &self.split.test;
        let query_record = test.get(query).map_err(|_| HarnessError::Index {
            what: "query",
            index: query,
            len: test.len(),
        })?;

        let demonstration = &self.split.demonstration;
        let mut prompt = self.instruction.clone();
        for &index in demos {
            let record = demonstration.get(index).map_err(|_| HarnessError::Index {
                what: "demonstration",
                index,
                len: demonstration.len(),
            })?;
            self.push_demo(&mut prompt, &record.inputs, &record.label);
        }
        self.push_query(&mut prompt, &query_record.inputs);
        Ok(prompt)
    }

    /// Render from caller-supplied lines instead of dataset indices.
    ///
    /// Used for synthetic calibration prompts (empty or content-free queries).
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::Shape` if a line's field count differs from the
    /// writer's input field count.
    pub fn render_from_raw(&self, demo_lines: &[DemoLine], query_line: &[String]) -> Result<String> {
        let mut prompt = self.instruction.clone();
        for (inputs, label) in demo_lines {
            self.check_line(inputs)?;
            self.push_demo(&mut prompt, inputs, label);
        }
        self.check_line(query_line)?;
        self.push_query(&mut prompt, query_line);
        Ok(prompt)
    }

    /// Noisy-channel prompts for demonstration indices `demos` and test
    /// record `query`, one per label of the label space, in label order
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::Index` if any demonstration or query index is out of range.
    pub fn render_noisy_channel(&self, demos: &[usize], query: usize) -> Result<Vec<String>> {
        let test = &self.split.test;
        let query_record = test.get(query).map_err(|_| HarnessError::Index {
            what: "query",
            index: query,
            len: test.len(),
        })?;
        let demonstration = &self.split.demonstration;
        let lines = demos
            .iter()
            .map(|&index| {
                let record = demonstration.get(index).map_err(|_| HarnessError::Index {
                    what: "demonstration",
                    index,
                    len: demonstration.len(),
                })?;
                Ok((record.inputs.clone(), record.label.clone()))
            })
            .collect::<Result<Vec<DemoLine>>>()?;
        self.render_noisy_channel_from_raw(&lines, &query_record.inputs)
    }

    /// Noisy-channel prompts from caller-supplied lines
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::Shape` if a line's field count differs from the
    /// writer's input field count.
    pub fn render_noisy_channel_from_raw(
        &self,
        demo_lines: &[DemoLine],
        query_line: &[String],
    ) -> Result<Vec<String>> {
        let mut context = self.instruction.clone();
        for (inputs, label) in demo_lines {
            self.check_line(inputs)?;
            self.push_channel_demo(&mut context, inputs, label);
        }
        self.check_line(query_line)?;
        context.push_str(&self.query_prefix);

        Ok(self
            .label_space
            .iter()
            .map(|candidate| {
                let mut prompt = context.clone();
                self.push_channel_demo(&mut prompt, query_line, candidate);
                prompt
            })
            .collect())
    }

    fn check_line(&self, inputs: &[String]) -> Result<()> {
        if inputs.len() == self.input_fields {
            Ok(())
        } else {
            Err(HarnessError::Shape(format!(
                "line has {} input fields, expected {}",
                inputs.len(),
                self.input_fields
            )))
        }
    }

    /// Illustrative prompt with `k` random demonstrations and a random query
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::Size` if `k` exceeds the demonstration set or the
    /// test set is empty.
    pub fn example(&mut self, k: usize) -> Result<String> {
        let pool = self.split.demonstration.len();
        let demos = self
            .example_rng
            .sample_unique_index_set(k, pool)
            .map_err(|_| HarnessError::Size {
                dataset: self.split.demonstration.name().to_string(),
                requested: k,
                available: pool,
            })?;
        if self.split.test.is_empty() {
            return Err(HarnessError::Size {
                dataset: self.split.test.name().to_string(),
                requested: 1,
                available: 0,
            });
        }
        let query = self.example_rng.int_in_range(0, self.split.test.len());
        self.render(&demos, query)
    }

    fn record_edit(&mut self, field: &str) {
        self.diagnostics.record(ConfigDrift::Furniture {
            field: field.to_string(),
        });
    }

    pub fn set_instruction(&mut self, instruction: impl Into<String>) {
        self.record_edit("instruction");
        self.instruction = instruction.into();
    }

    /// # Errors
    ///
    /// Returns `HarnessError::Shape` if the list length differs from the field count.
    pub fn set_input_prefixes(&mut self, prefixes: Vec<String>) -> Result<()> {
        self.record_edit("input_prefixes");
        check_field_list("input_prefixes", &prefixes, self.input_fields)?;
        self.input_prefixes = prefixes;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `HarnessError::Shape` if the list length differs from the field count.
    pub fn set_input_affixes(&mut self, affixes: Vec<String>) -> Result<()> {
        self.record_edit("input_affixes");
        check_field_list("input_affixes", &affixes, self.input_fields)?;
        self.input_affixes = affixes;
        Ok(())
    }

    pub fn set_label_prefix(&mut self, prefix: impl Into<String>) {
        self.record_edit("label_prefix");
        self.label_prefix = prefix.into();
    }

    pub fn set_label_affix(&mut self, affix: impl Into<String>) {
        self.record_edit("label_affix");
        self.label_affix = affix.into();
    }

    pub fn set_query_prefix(&mut self, prefix: impl Into<String>) {
        self.record_edit("query_prefix");
        self.query_prefix = prefix.into();
    }

    /// Replace the label words the inference function is asked to score.
    ///
    /// Ground truth stays indexed by the split's own label space, so the new
    /// space must have the same number of labels.
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::Shape` on a label count mismatch.
    pub fn set_label_space(&mut self, label_space: Vec<String>) -> Result<()> {
        self.record_edit("label_space");
        if label_space.len() != self.label_space.len() {
            return Err(HarnessError::Shape(format!(
                "label space has {} labels, expected {}",
                label_space.len(),
                self.label_space.len()
            )));
        }
        self.label_space = label_space;
        Ok(())
    }
}

impl fmt::Display for PromptWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let escape = |s: &str| s.replace('\n', "\\n");
        writeln!(f, "--- In-context learning prompt writer ---")?;
        writeln!(f, "\tdemonstration set: {}", self.split.demonstration.name())?;
        writeln!(f, "\tquery set: {}", self.split.test.name())?;
        writeln!(f, "\tinstruction: {}", escape(&self.instruction))?;
        writeln!(f, "\tinput prefixes: {}", escape(&format!("{:?}", self.input_prefixes)))?;
        writeln!(f, "\tinput affixes: {}", escape(&format!("{:?}", self.input_affixes)))?;
        writeln!(f, "\tlabel prefix: {}", escape(&self.label_prefix))?;
        writeln!(f, "\tlabel affix: {}", escape(&self.label_affix))?;
        writeln!(f, "\tquery prefix: {}", escape(&self.query_prefix))?;
        write!(f, "\tlabel space: {:?}", self.label_space)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod tests {
    use super::*;
    use crate::config::{Settings, SplitSizes};
    use crate::dataset::tests::sentiment_dataset;
    use crate::dataset::{LabeledDataset, Record};

    pub(crate) fn toy_split(n: usize, sizes: SplitSizes) -> Arc<TripletSplit> {
        Arc::new(TripletSplit::new(&sentiment_dataset(n), sizes, Settings::lenient()).unwrap())
    }

    fn single_field_split() -> Arc<TripletSplit> {
        let records = vec![Record::new(["hi"], "x"), Record::new(["yo"], "y")];
        let dataset = LabeledDataset::new(
            "tiny",
            vec!["x".to_string(), "y".to_string()],
            Furniture {
                instruction: "I:".to_string(),
                input_prefixes: vec!["P:".to_string()],
                input_affixes: vec!["A:".to_string()],
                label_prefix: "L:".to_string(),
                label_affix: String::new(),
                query_prefix: "Q:".to_string(),
            },
            records,
        )
        .unwrap();
        Arc::new(
            TripletSplit::new(&dataset, SplitSizes::new(0, 1, 1), Settings::lenient()).unwrap(),
        )
    }

    #[test]
    fn test_render_without_demonstrations() {
        let writer = PromptWriter::new(single_field_split());
        let query = writer.split().test.get(0).unwrap().inputs[0].clone();
        assert_eq!(
            writer.render(&[], 0).unwrap(),
            format!("I:Q:P:{query}A:L:")
        );
    }

    #[test]
    fn test_render_from_raw_matches_template() {
        let writer = PromptWriter::new(single_field_split());
        let prompt = writer.render_from_raw(&[], &["hi".to_string()]).unwrap();
        assert_eq!(prompt, "I:Q:P:hiA:L:");
    }

    #[test]
    fn test_render_with_demonstrations() {
        let writer = PromptWriter::new(single_field_split());
        let demo = writer.split().demonstration.get(0).unwrap().clone();
        let query = writer.split().test.get(0).unwrap().clone();
        let expected = format!(
            "I:P:{}A:L:{}Q:P:{}A:L:",
            demo.inputs[0], demo.label, query.inputs[0]
        );
        assert_eq!(writer.render(&[0], 0).unwrap(), expected);
    }

    #[test]
    fn test_render_out_of_range() {
        let writer = PromptWriter::new(single_field_split());
        assert!(matches!(
            writer.render(&[], 1),
            Err(HarnessError::Index { what: "query", .. })
        ));
        assert!(matches!(
            writer.render(&[3], 0),
            Err(HarnessError::Index {
                what: "demonstration",
                ..
            })
        ));
    }

    #[test]
    fn test_render_from_raw_shape_error() {
        let writer = PromptWriter::new(single_field_split());
        let result = writer.render_from_raw(&[], &["a".to_string(), "b".to_string()]);
        assert!(matches!(result, Err(HarnessError::Shape(_))));
    }

    #[test]
    fn test_render_from_raw_contextual_style() {
        let split = toy_split(40, SplitSizes::new(4, 4, 4));
        let writer = PromptWriter::new(split);
        let demos = vec![
            (vec!["great".to_string()], "positive".to_string()),
            (vec!["awful".to_string()], "negative".to_string()),
        ];
        let prompt = writer.render_from_raw(&demos, &[String::new()]).unwrap();
        assert_eq!(
            prompt,
            "review: great sentiment: positive\nreview: awful sentiment: negative\nreview:  sentiment: "
        );
    }

    #[test]
    fn test_noisy_channel_one_prompt_per_label() {
        let writer = PromptWriter::new(single_field_split());
        let demo = writer.split().demonstration.get(0).unwrap().clone();
        let query = writer.split().test.get(0).unwrap().clone();

        let prompts = writer.render_noisy_channel(&[0], 0).unwrap();
        assert_eq!(prompts.len(), 2);
        for (prompt, candidate) in prompts.iter().zip(["x", "y"]) {
            assert_eq!(
                prompt,
                &format!(
                    "I:L:{}P:{}A:Q:L:{candidate}P:{}A:",
                    demo.label, demo.inputs[0], query.inputs[0]
                )
            );
        }
    }

    #[test]
    fn test_noisy_channel_from_raw_and_errors() {
        let writer = PromptWriter::new(single_field_split());
        assert_eq!(
            writer
                .render_noisy_channel_from_raw(&[], &[String::new()])
                .unwrap(),
            ["I:Q:L:xP:A:", "I:Q:L:yP:A:"]
        );
        assert!(matches!(
            writer.render_noisy_channel_from_raw(&[], &[]),
            Err(HarnessError::Shape(_))
        ));
        assert!(matches!(
            writer.render_noisy_channel(&[], 1),
            Err(HarnessError::Index { what: "query", .. })
        ));
    }

    #[test]
    fn test_noisy_channel_uses_writer_label_space() {
        let mut writer = PromptWriter::new(single_field_split());
        writer
            .set_label_space(vec!["no".to_string(), "yes".to_string()])
            .unwrap();
        let prompts = writer
            .render_noisy_channel_from_raw(&[], &["hi".to_string()])
            .unwrap();
        assert!(prompts[0].ends_with("L:noP:hiA:"));
        assert!(prompts[1].ends_with("L:yesP:hiA:"));
    }

    #[test]
    fn test_setters_record_drift_and_validate() {
        let mut writer = PromptWriter::new(single_field_split());
        writer.set_instruction("New:");
        assert!(writer
            .set_input_prefixes(vec!["a".to_string(), "b".to_string()])
            .is_err());
        writer.set_query_prefix("");
        assert_eq!(writer.diagnostics().len(), 3);
        assert_eq!(writer.render_from_raw(&[], &["hi".to_string()]).unwrap(), "New:P:hiA:L:");
    }

    #[test]
    fn test_snapshot_independent_of_split_edits() {
        let split = single_field_split();
        let writer = PromptWriter::new(Arc::clone(&split));

        let mut edited = (*split).clone();
        edited.set_instruction_triple("Changed:");
        let edited = Arc::new(edited);

        assert_eq!(writer.furniture().instruction, "I:");

        let mut resynced = writer.clone();
        resynced.resync(edited);
        assert_eq!(resynced.furniture().instruction, "Changed:");
    }

    #[test]
    fn test_set_label_space_requires_same_count() {
        let mut writer = PromptWriter::new(single_field_split());
        assert!(writer.set_label_space(vec!["only".to_string()]).is_err());
        writer
            .set_label_space(vec!["X".to_string(), "Y".to_string()])
            .unwrap();
        assert_eq!(writer.label_space(), ["X", "Y"]);
    }

    #[test]
    fn test_example_is_reproducible() {
        let split = toy_split(60, SplitSizes::new(10, 10, 10));
        let mut a = PromptWriter::new(Arc::clone(&split));
        let mut b = PromptWriter::new(split);
        assert_eq!(a.example(3).unwrap(), b.example(3).unwrap());
        assert!(a.example(11).is_err());
    }

    #[test]
    fn test_display_escapes_newlines() {
        let writer = PromptWriter::new(toy_split(30, SplitSizes::new(2, 2, 2)));
        let text = writer.to_string();
        assert!(text.contains("label affix: \\n"));
        assert!(text.contains("toy_sentiment-demonstration"));
    }
}
