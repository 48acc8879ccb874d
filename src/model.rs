use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub type Record = Map<String, Value>;

#[derive(Debug, Clone, Default)]
pub struct RecordSet {
    pub label: String,
    pub origin: String,
    pub records: BTreeMap<String, Record>,
    pub categories: BTreeMap<String, String>,
    pub fingerprint: String,
}

impl RecordSet {
    pub fn new(label: impl Into<String>, origin: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            origin: origin.into(),
            ..Self::default()
        }
    }

    pub fn insert(&mut self, id: impl Into<String>, record: Record) {
        self.records.insert(id.into(), record);
    }

    pub fn tag_category(&mut self, id: impl Into<String>, category: impl Into<String>) {
        self.categories.insert(id.into(), category.into());
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Record> {
        self.records.get(id)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExpectedOutcomesManifest {
    #[serde(default)]
    pub total_tests: Option<usize>,
    pub test_posts: Vec<Map<String, Value>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordSetSummary {
    pub label: String,
    pub origin: String,
    pub record_count: usize,
    pub fingerprint: String,
}

impl From<&RecordSet> for RecordSetSummary {
    fn from(set: &RecordSet) -> Self {
        Self {
            label: set.label.clone(),
            origin: set.origin.clone(),
            record_count: set.len(),
            fingerprint: set.fingerprint.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceOutcome {
    pub label: String,
    pub actual: RecordSetSummary,
    pub total_expected: usize,
    pub total_matched: usize,
    pub missing_count: usize,
    pub unexpected_count: usize,
    pub tier1_rate: f64,
    pub tier2_rate: f64,
    pub overall_rate: f64,
    pub verdict: String,
    pub ready: bool,
    pub artifacts: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EvaluationRunManifest {
    pub manifest_version: u32,
    pub run_id: String,
    pub generated_at: String,
    pub command: String,
    pub taxonomy_version: String,
    pub tier1_gate: f64,
    pub tier2_gate: f64,
    pub expected: RecordSetSummary,
    pub sources: Vec<SourceOutcome>,
    pub all_ready: bool,
    pub warnings: Vec<String>,
}
