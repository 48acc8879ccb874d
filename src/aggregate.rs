use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use serde_json::Value;

use crate::category::CategoryResolver;
use crate::evaluate::{FieldResult, RecordResult, evaluate_record};
use crate::model::RecordSet;
use crate::taxonomy::{FieldKind, Taxonomy, Tier};


#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PassTally {
    pub pass: usize,
    pub fail: usize,
    pub rate: f64,
}

impl PassTally {
    fn new(pass: usize, total: usize) -> Self {
        Self {
            pass,
            fail: total - pass,
            rate: percent(pass, total),
        }
    }

    pub fn total(&self) -> usize {
        self.pass + self.fail
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TierTotals {
    pub tier1: PassTally,
    pub tier2: PassTally,
    pub tier3: PassTally,
    pub entity: PassTally,
    pub overall: PassTally,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldTally {
    pub field: String,
    pub tier: Tier,
    pub kind: FieldKind,
    pub evaluated: usize,
    pub passed: usize,
    pub failed: usize,
    pub mean_score: f64,
    pub failure_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfusionCell {
    pub expected: Value,
    pub actual: Value,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LabelCount {
    pub label: Value,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfusionMatrix {
    pub field: String,
    pub tier: Tier,
    pub evaluated: usize,
    pub correct: usize,
    pub accuracy: f64,
    pub correct_by_label: Vec<LabelCount>,
    pub cells: Vec<ConfusionCell>,
}

#[cfg(test)]
impl ConfusionMatrix {
    pub fn count(&self, expected: &Value, actual: &Value) -> usize {
        self.cells
            .iter()
            .find(|cell| cell.expected == expected && cell.actual == actual)
            .map(|cell| cell.count)
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemCount {
    pub item: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractionFrequency {
    pub field: String,
    pub tier: Tier,
    pub records: usize,
    pub mean_precision: f64,
    pub mean_recall: f64,
    pub f1: f64,
    pub over_extracted: Vec<ItemCount>,
    pub under_extracted: Vec<ItemCount>,
}

#[cfg(test)]
impl ExtractionFrequency {
    pub fn over_count(&self, item: &str) -> usize {
        lookup_count(&self.over_extracted, item)
    }

    pub fn under_count(&self, item: &str) -> usize {
        lookup_count(&self.under_extracted, item)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryBreakdown {
    pub category: String,
    pub matched: usize,
    pub missing: usize,
    pub tier1: PassTally,
    pub tier2: PassTally,
    pub overall: PassTally,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub result: RecordResult,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateReport {
    pub source: String,
    pub taxonomy_version: String,
    pub total_expected: usize,
    pub total_matched: usize,
    pub missing_ids: Vec<String>,
    pub unexpected_ids: Vec<String>,
    pub tiers: TierTotals,
    pub tier_score_means: BTreeMap<Tier, f64>,
    pub fields: Vec<FieldTally>,
    pub confusion: Vec<ConfusionMatrix>,
    pub extraction: Vec<ExtractionFrequency>,
    pub categories: Vec<CategoryBreakdown>,
    pub unregistered_fields: Vec<String>,
    pub records: Vec<ScoredRecord>,
}

impl AggregateReport {
    pub fn field(&self, name: &str) -> Option<&FieldTally> {
        self.fields.iter().find(|tally| tally.field == name)
    }

    pub fn confusion_for(&self, name: &str) -> Option<&ConfusionMatrix> {
        self.confusion.iter().find(|matrix| matrix.field == name)
    }

    pub fn extraction_for(&self, name: &str) -> Option<&ExtractionFrequency> {
        self.extraction.iter().find(|table| table.field == name)
    }

    #[cfg(test)]
    pub fn category(&self, name: &str) -> Option<&CategoryBreakdown> {
        self.categories
            .iter()
            .find(|breakdown| breakdown.category == name)
    }
}

#[derive(Debug, Default)]
struct FieldAccumulator {
    tier: Option<Tier>,
    kind: FieldKind,
    evaluated: usize,
    passed: usize,
    score_sum: f64,
}

#[derive(Debug, Default)]
struct ConfusionAccumulator {
    tier: Option<Tier>,
    evaluated: usize,
    correct: BTreeMap<LabelKey, usize>,
    cells: BTreeMap<(LabelKey, LabelKey), usize>,
}

/// A scalar label ordered by its canonical JSON text. Strings keep their
/// quotes, so `"1"` and `1` are distinct keys while `1` and `1.0` are not.
#[derive(Debug, Clone)]
struct LabelKey {
    canonical: String,
    value: Value,
}

impl LabelKey {
    fn new(value: &Value) -> Self {
        let canonical = match value {
            Value::Number(number) => number
                .as_f64()
                .map(|float| float.to_string())
                .unwrap_or_else(|| number.to_string()),
            other => other.to_string(),
        };
        Self {
            canonical,
            value: value.clone(),
        }
    }
}

impl PartialEq for LabelKey {
    fn eq(&self, other: &Self) -> bool {
        self.canonical == other.canonical
    }
}

impl Eq for LabelKey {}

impl PartialOrd for LabelKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for LabelKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.canonical.cmp(&other.canonical)
    }
}

#[derive(Debug, Default)]
struct ExtractionAccumulator {
    tier: Option<Tier>,
    records: usize,
    precision_sum: f64,
    recall_sum: f64,
    over: BTreeMap<String, usize>,
    under: BTreeMap<String, usize>,
}

#[derive(Debug, Default)]
struct CategoryAccumulator {
    matched: usize,
    missing: usize,
    tier1: usize,
    tier2: usize,
    overall: usize,
}

#[derive(Debug, Default)]
struct PassCounts {
    tier1: usize,
    tier2: usize,
    tier3: usize,
    entity: usize,
    overall: usize,
}

pub struct Aggregator<'a> {
    taxonomy: &'a Taxonomy,
    source: String,
    category_of: Option<Box<dyn Fn(&str) -> String + 'a>>,
    matched: usize,
    passes: PassCounts,
    tier_score_sums: BTreeMap<Tier, f64>,
    fields: BTreeMap<String, FieldAccumulator>,
    confusion: BTreeMap<String, ConfusionAccumulator>,
    extraction: BTreeMap<String, ExtractionAccumulator>,
    categories: BTreeMap<String, CategoryAccumulator>,
    missing_ids: Vec<String>,
    unexpected_ids: Vec<String>,
    unregistered: BTreeSet<String>,
    records: Vec<ScoredRecord>,
}

impl<'a> Aggregator<'a> {
    pub fn new(taxonomy: &'a Taxonomy, source: impl Into<String>) -> Self {
        Self {
            taxonomy,
            source: source.into(),
            category_of: None,
            matched: 0,
            passes: PassCounts::default(),
            tier_score_sums: BTreeMap::new(),
            fields: BTreeMap::new(),
            confusion: BTreeMap::new(),
            extraction: BTreeMap::new(),
            categories: BTreeMap::new(),
            missing_ids: Vec::new(),
            unexpected_ids: Vec::new(),
            unregistered: BTreeSet::new(),
            records: Vec::new(),
        }
    }

    pub fn with_categories<F>(mut self, category_of: F) -> Self
    where
        F: Fn(&str) -> String + 'a,
    {
        self.category_of = Some(Box::new(category_of));
        self
    }

    pub fn push(&mut self, result: RecordResult) {
        self.matched += 1;
        self.passes.tier1 += usize::from(result.tier1_pass);
        self.passes.tier2 += usize::from(result.tier2_pass);
        self.passes.tier3 += usize::from(result.tier3_pass);
        self.passes.entity += usize::from(result.entity_pass);
        self.passes.overall += usize::from(result.overall_pass);

        for (tier, score) in &result.tier_scores {
            *self.tier_score_sums.entry(*tier).or_insert(0.0) += score;
        }

        for field in &result.field_results {
            self.observe_field(field);
        }

        self.unregistered
            .extend(result.unregistered_fields.iter().cloned());

        let category = self.category_of.as_ref().map(|resolve| resolve(&result.id));
        if let Some(category) = &category {
            let bucket = self.categories.entry(category.clone()).or_default();
            bucket.matched += 1;
            bucket.tier1 += usize::from(result.tier1_pass);
            bucket.tier2 += usize::from(result.tier2_pass);
            bucket.overall += usize::from(result.overall_pass);
        }

        self.records.push(ScoredRecord { category, result });
    }

    pub fn record_missing(&mut self, id: &str) {
        if let Some(resolve) = &self.category_of {
            self.categories.entry(resolve(id)).or_default().missing += 1;
        }
        self.missing_ids.push(id.to_string());
    }

    pub fn record_unexpected(&mut self, id: &str) {
        self.unexpected_ids.push(id.to_string());
    }

    fn observe_field(&mut self, field: &FieldResult) {
        let tally = self.fields.entry(field.field_name.clone()).or_default();
        tally.tier = Some(field.tier);
        tally.kind = field.kind;
        tally.evaluated += 1;
        tally.passed += usize::from(field.passed);
        tally.score_sum += field.score;

        if field.tier.is_core() && field.kind == FieldKind::Scalar {
            let matrix = self.confusion.entry(field.field_name.clone()).or_default();
            matrix.tier = Some(field.tier);
            matrix.evaluated += 1;
            let expected = LabelKey::new(&field.expected_value);
            if field.matched {
                *matrix.correct.entry(expected).or_insert(0) += 1;
            } else {
                let actual = LabelKey::new(&field.actual_value);
                *matrix.cells.entry((expected, actual)).or_insert(0) += 1;
            }
        }

        if let (FieldKind::SetOfStrings, Some(set)) = (field.kind, &field.set) {
            let table = self.extraction.entry(field.field_name.clone()).or_default();
            table.tier = Some(field.tier);
            table.records += 1;
            table.precision_sum += set.precision();
            table.recall_sum += set.recall();
            if !field.matched {
                for item in &set.extra {
                    *table.over.entry(item.clone()).or_insert(0) += 1;
                }
                for item in &set.missing {
                    *table.under.entry(item.clone()).or_insert(0) += 1;
                }
            }
        }
    }

    pub fn finish(mut self) -> AggregateReport {
        let total = self.matched;
        let order = self
            .taxonomy
            .fields()
            .iter()
            .map(|spec| spec.name.as_str())
            .collect::<Vec<&str>>();

        let fields = order
            .iter()
            .filter_map(|name| self.fields.remove_entry(*name))
            .map(|(field, tally)| FieldTally {
                field,
                tier: tally.tier.unwrap_or(Tier::Skip),
                kind: tally.kind,
                evaluated: tally.evaluated,
                passed: tally.passed,
                failed: tally.evaluated - tally.passed,
                mean_score: mean(tally.score_sum, tally.evaluated),
                failure_rate: percent(tally.evaluated - tally.passed, tally.evaluated),
            })
            .collect::<Vec<FieldTally>>();

        let confusion = order
            .iter()
            .filter_map(|name| self.confusion.remove_entry(*name))
            .map(|(field, matrix)| {
                let correct = matrix.correct.values().sum::<usize>();
                ConfusionMatrix {
                    field,
                    tier: matrix.tier.unwrap_or(Tier::Skip),
                    evaluated: matrix.evaluated,
                    correct,
                    accuracy: percent(correct, matrix.evaluated),
                    correct_by_label: matrix
                        .correct
                        .into_iter()
                        .map(|(label, count)| LabelCount {
                            label: label.value,
                            count,
                        })
                        .collect(),
                    cells: sorted_cells(matrix.cells),
                }
            })
            .collect::<Vec<ConfusionMatrix>>();

        let extraction = order
            .iter()
            .filter_map(|name| self.extraction.remove_entry(*name))
            .map(|(field, table)| {
                let mean_precision = mean(table.precision_sum, table.records);
                let mean_recall = mean(table.recall_sum, table.records);
                ExtractionFrequency {
                    field,
                    tier: table.tier.unwrap_or(Tier::Skip),
                    records: table.records,
                    mean_precision,
                    mean_recall,
                    f1: harmonic_mean(mean_precision, mean_recall),
                    over_extracted: sorted_items(table.over),
                    under_extracted: sorted_items(table.under),
                }
            })
            .collect::<Vec<ExtractionFrequency>>();

        let categories = self
            .categories
            .into_iter()
            .map(|(category, bucket)| CategoryBreakdown {
                category,
                matched: bucket.matched,
                missing: bucket.missing,
                tier1: PassTally::new(bucket.tier1, bucket.matched),
                tier2: PassTally::new(bucket.tier2, bucket.matched),
                overall: PassTally::new(bucket.overall, bucket.matched),
            })
            .collect::<Vec<CategoryBreakdown>>();

        let tier_score_means = Tier::SCORED
            .iter()
            .map(|tier| {
                let sum = self.tier_score_sums.get(tier).copied().unwrap_or(0.0);
                (*tier, if total == 0 { 1.0 } else { sum / total as f64 })
            })
            .collect::<BTreeMap<Tier, f64>>();

        self.missing_ids.sort();
        self.unexpected_ids.sort();
        self.records
            .sort_by(|left, right| left.result.id.cmp(&right.result.id));

        AggregateReport {
            source: self.source,
            taxonomy_version: self.taxonomy.version().to_string(),
            total_expected: total + self.missing_ids.len(),
            total_matched: total,
            missing_ids: self.missing_ids,
            unexpected_ids: self.unexpected_ids,
            tiers: TierTotals {
                tier1: PassTally::new(self.passes.tier1, total),
                tier2: PassTally::new(self.passes.tier2, total),
                tier3: PassTally::new(self.passes.tier3, total),
                entity: PassTally::new(self.passes.entity, total),
                overall: PassTally::new(self.passes.overall, total),
            },
            tier_score_means,
            fields,
            confusion,
            extraction,
            categories,
            unregistered_fields: self.unregistered.into_iter().collect(),
            records: self.records,
        }
    }
}

pub fn evaluate_sets(
    expected: &RecordSet,
    actual: &RecordSet,
    taxonomy: &Taxonomy,
    categories: Option<&CategoryResolver>,
) -> AggregateReport {
    let mut aggregator = Aggregator::new(taxonomy, actual.label.clone());
    if let Some(resolver) = categories {
        aggregator = aggregator.with_categories(move |id| resolver.category_of(id));
    }

    for (id, expected_record) in &expected.records {
        match actual.get(id) {
            Some(actual_record) => {
                aggregator.push(evaluate_record(id, expected_record, actual_record, taxonomy));
            }
            None => aggregator.record_missing(id),
        }
    }

    for id in actual.records.keys() {
        if !expected.records.contains_key(id) {
            aggregator.record_unexpected(id);
        }
    }

    aggregator.finish()
}

/// Percentage in `[0, 100]`; zero when there is nothing to count.
pub fn percent(count: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 * 100.0 / total as f64
    }
}

fn mean(sum: f64, count: usize) -> f64 {
    if count == 0 { 0.0 } else { sum / count as f64 }
}

fn harmonic_mean(left: f64, right: f64) -> f64 {
    if left + right == 0.0 {
        0.0
    } else {
        2.0 * left * right / (left + right)
    }
}

/// Most frequent first; ties keep the key order of the map.
fn sorted_cells(cells: BTreeMap<(LabelKey, LabelKey), usize>) -> Vec<ConfusionCell> {
    let mut cells = cells
        .into_iter()
        .map(|((expected, actual), count)| ConfusionCell {
            expected: expected.value,
            actual: actual.value,
            count,
        })
        .collect::<Vec<ConfusionCell>>();
    cells.sort_by(|left, right| right.count.cmp(&left.count));
    cells
}

fn sorted_items(items: BTreeMap<String, usize>) -> Vec<ItemCount> {
    let mut items = items
        .into_iter()
        .map(|(item, count)| ItemCount { item, count })
        .collect::<Vec<ItemCount>>();
    items.sort_by(|left, right| {
        right
            .count
            .cmp(&left.count)
            .then_with(|| left.item.cmp(&right.item))
    });
    items
}

#[cfg(test)]
fn lookup_count(items: &[ItemCount], item: &str) -> usize {
    items
        .iter()
        .find(|entry| entry.item == item)
        .map(|entry| entry.count)
        .unwrap_or(0)
}
