//! Core scenario types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::normalize::normalize_step_text;

/// One free-text sentence subject to pattern matching.
///
/// Descriptions and expected results are both steps; the matcher does not
/// distinguish between them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Step {
    pub text: String,
}

impl Step {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// Field name to value mapping attached to a single step
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TestDataRecord(BTreeMap<String, String>);

impl TestDataRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a field by name
    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    /// Insert or replace a field
    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<String>) {
        self.0.insert(field.into(), value.into());
    }

    /// All values, ordered by field name
    pub fn values(&self) -> impl Iterator<Item = &str> {
        self.0.values().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for TestDataRecord {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Stands in for a blank step description
pub const NO_DESCRIPTION: &str = "No description provided";

/// Stands in for a blank expected result
pub const NO_EXPECTED_RESULT: &str = "No expected result";

/// A step together with its test data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioStep {
    pub step: Step,
    #[serde(default)]
    pub test_data: TestDataRecord,
}

/// One test case: an ordered sequence of steps and their test data.
///
/// Immutable once built; the runner consumes it exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scenario {
    pub key: String,
    pub steps: Vec<ScenarioStep>,
}

impl Scenario {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            steps: Vec::new(),
        }
    }

    /// Append a step (builder style)
    pub fn step(mut self, text: impl Into<String>, test_data: TestDataRecord) -> Self {
        self.steps.push(ScenarioStep {
            step: Step::new(text),
            test_data,
        });
        self
    }

    /// Build a scenario from test-management step records.
    ///
    /// Each record contributes its description and then its expected result,
    /// both carrying the record's test data. Text that normalises to nothing
    /// becomes [`NO_DESCRIPTION`] or [`NO_EXPECTED_RESULT`]; no rule claims
    /// the former, so a blank description skips the scenario.
    pub fn from_records(key: impl Into<String>, records: &[TestStepRecord]) -> Self {
        let mut scenario = Self::new(key);
        for record in records {
            for (text, placeholder) in [
                (&record.description, NO_DESCRIPTION),
                (&record.expected_result, NO_EXPECTED_RESULT),
            ] {
                let mut text = normalize_step_text(text);
                if text.is_empty() {
                    text = placeholder.to_string();
                }
                scenario.steps.push(ScenarioStep {
                    step: Step::new(text),
                    test_data: record.test_data.clone(),
                });
            }
        }
        scenario
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Step texts in order
    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().map(|s| s.step.text.as_str())
    }
}

/// A step as delivered by the test-management service
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestStepRecord {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub expected_result: String,
    #[serde(default)]
    pub test_data: TestDataRecord,
}

/// Final verdict for one scenario
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ScenarioOutcome {
    Passed,
    Failed { reason: String },
    Skipped { unmatched: Vec<String> },
}

impl ScenarioOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::Failed { .. } => "failed",
            Self::Skipped { .. } => "skipped",
        }
    }
}
