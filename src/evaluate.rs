use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use serde_json::Value;

use crate::compare::{Comparison, SetBreakdown, compare_field};
use crate::model::Record;
use crate::taxonomy::{FieldKind, FieldSpec, Taxonomy, Tier};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldResult {
    pub field_name: String,
    pub tier: Tier,
    pub kind: FieldKind,
    pub matched: bool,
    pub passed: bool,
    pub gating: bool,
    pub score: f64,
    pub expected_value: Value,
    pub actual_value: Value,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub set: Option<SetBreakdown>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordResult {
    pub id: String,
    pub tier1_pass: bool,
    pub tier2_pass: bool,
    pub tier3_pass: bool,
    pub entity_pass: bool,
    pub overall_pass: bool,
    pub tier_scores: BTreeMap<Tier, f64>,
    pub field_results: Vec<FieldResult>,
    pub mismatches: Vec<String>,
    pub unregistered_fields: Vec<String>,
}

impl RecordResult {
    pub fn field(&self, name: &str) -> Option<&FieldResult> {
        self.field_results
            .iter()
            .find(|result| result.field_name == name)
    }

    pub fn tier_score(&self, tier: Tier) -> f64 {
        self.tier_scores.get(&tier).copied().unwrap_or(1.0)
    }

    pub fn extraction_quality(&self) -> f64 {
        self.tier_score(Tier::EntityOnly)
    }
}

pub fn evaluate_record(
    id: &str,
    expected: &Record,
    actual: &Record,
    taxonomy: &Taxonomy,
) -> RecordResult {
    let names = expected
        .keys()
        .chain(actual.keys())
        .collect::<BTreeSet<&String>>();

    let mut field_results = Vec::<FieldResult>::new();
    let mut unregistered_fields = Vec::<String>::new();

    for name in names {
        let Some(spec) = taxonomy.lookup(name) else {
            unregistered_fields.push(name.clone());
            continue;
        };
        if spec.tier == Tier::Skip {
            continue;
        }

        let expected_value = expected.get(name);
        let actual_value = actual.get(name);
        let comparison = compare_field(spec, expected_value, actual_value);
        field_results.push(build_field_result(
            spec,
            comparison,
            expected_value,
            actual_value,
        ));
    }

    let tier_pass = |tier: Tier| {
        field_results
            .iter()
            .filter(|result| result.tier == tier)
            .all(|result| result.passed)
    };

    let tier_scores = Tier::SCORED
        .iter()
        .map(|tier| (*tier, mean_score(&field_results, *tier)))
        .collect::<BTreeMap<Tier, f64>>();

    let mismatches = field_results
        .iter()
        .filter(|result| !result.passed)
        .map(|result| {
            format!(
                "[{}] {}: {}",
                result.tier.tag(),
                result.field_name,
                result.detail
            )
        })
        .collect::<Vec<String>>();

    let overall_pass = field_results
        .iter()
        .filter(|result| result.gating)
        .all(|result| result.passed);

    RecordResult {
        id: id.to_string(),
        tier1_pass: tier_pass(Tier::Tier1Critical),
        tier2_pass: tier_pass(Tier::Tier2Core),
        tier3_pass: tier_pass(Tier::Tier3Enhancement),
        entity_pass: tier_pass(Tier::EntityOnly),
        overall_pass,
        tier_scores,
        field_results,
        mismatches,
        unregistered_fields,
    }
}

fn build_field_result(
    spec: &FieldSpec,
    comparison: Comparison,
    expected: Option<&Value>,
    actual: Option<&Value>,
) -> FieldResult {
    let passed = match (&spec.kind, &comparison.set) {
        (FieldKind::SetOfStrings, Some(_)) => comparison.score >= spec.pass_threshold(),
        _ => comparison.matched,
    };

    FieldResult {
        field_name: spec.name.clone(),
        tier: spec.tier,
        kind: spec.kind,
        matched: comparison.matched,
        passed,
        gating: spec.gates(),
        score: comparison.score,
        expected_value: expected.cloned().unwrap_or(Value::Null),
        actual_value: actual.cloned().unwrap_or(Value::Null),
        detail: comparison.detail,
        set: comparison.set,
    }
}

fn mean_score(results: &[FieldResult], tier: Tier) -> f64 {
    let scores = results
        .iter()
        .filter(|result| result.tier == tier)
        .map(|result| result.score)
        .collect::<Vec<f64>>();

    if scores.is_empty() {
        1.0
    } else {
        scores.iter().sum::<f64>() / scores.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            other => panic!("fixture must be an object, got {other}"),
        }
    }

    fn fixture_taxonomy() -> Taxonomy {
        Taxonomy::builder("fixture")
            .field(FieldSpec::new("flags", Tier::Tier1Critical, FieldKind::SetOfStrings))
            .field(FieldSpec::new("relevance_label", Tier::Tier1Critical, FieldKind::Scalar))
            .field(
                FieldSpec::new("engagement_score", Tier::Tier2Core, FieldKind::NumericTolerant)
                    .with_tolerance(0.15),
            )
            .field(FieldSpec::new("themes", Tier::Tier2Core, FieldKind::SetOfStrings))
            .field(FieldSpec::new("metrics", Tier::Tier2Core, FieldKind::NestedObject))
            .field(FieldSpec::new("intent", Tier::Tier3Enhancement, FieldKind::SetOfStrings))
            .field(
                FieldSpec::new("topics", Tier::EntityOnly, FieldKind::SetOfStrings)
                    .with_overlap_threshold(0.8),
            )
            .skip(["source_id", "text"])
            .build()
            .expect("fixture taxonomy should build")
    }

    #[test]
    fn identical_records_pass_with_full_scores() {
        let taxonomy = fixture_taxonomy();
        let post = record(json!({
            "source_id": "ae_test_01",
            "flags": ["adverse_event"],
            "relevance_label": "relevant",
            "engagement_score": 7,
            "themes": ["recovery"],
            "metrics": {"likes": 3},
            "intent": [],
            "topics": ["diabetes"]
        }));

        let result = evaluate_record("ae_test_01", &post, &post, &taxonomy);

        assert!(result.overall_pass);
        assert!(result.tier1_pass && result.tier2_pass && result.tier3_pass && result.entity_pass);
        assert!(result.mismatches.is_empty());
        assert_eq!(result.field_results.len(), 7);
        assert!(result.field_results.iter().all(|field| field.score == 1.0));
        assert!(result.tier_scores.values().all(|score| *score == 1.0));
    }

    #[test]
    fn matching_label_and_flags_pass_tier1() {
        let taxonomy = fixture_taxonomy();
        let expected = record(json!({"relevance_label": "relevant", "flags": ["adverse_event"]}));
        let actual = expected.clone();

        let result = evaluate_record("post", &expected, &actual, &taxonomy);
        assert!(result.tier1_pass);
        assert!(result.overall_pass);
    }

    #[test]
    fn missing_critical_flag_fails_tier1_with_half_jaccard() {
        let taxonomy = fixture_taxonomy();
        let expected = record(json!({"flags": ["adverse_event", "crisis"]}));
        let actual = record(json!({"flags": ["adverse_event"]}));

        let result = evaluate_record("post", &expected, &actual, &taxonomy);
        let flags = result.field("flags").expect("flags evaluated");

        assert!(!result.tier1_pass);
        assert!(!result.overall_pass);
        assert_eq!(flags.score, 0.5);
        assert_eq!(
            flags.set.as_ref().expect("breakdown").missing,
            vec!["crisis".to_string()]
        );
        assert_eq!(result.tier_score(Tier::Tier1Critical), 0.5);
        assert_eq!(
            result.mismatches,
            vec!["[T1] flags: missing: [crisis]; jaccard 0.500".to_string()]
        );
    }

    #[test]
    fn entity_overlap_below_threshold_fails_entity_but_not_overall() {
        let taxonomy = fixture_taxonomy();
        let expected = record(json!({"topics": ["diabetes", "surgery"]}));
        let actual = record(json!({"topics": ["diabetes", "surgery", "recovery"]}));

        let result = evaluate_record("post", &expected, &actual, &taxonomy);
        let topics = result.field("topics").expect("topics evaluated");

        assert!((topics.score - 2.0 / 3.0).abs() < 1e-12);
        assert!(!topics.passed);
        assert!(!topics.gating);
        assert!(!result.entity_pass);
        assert!(result.overall_pass);
        assert!((result.extraction_quality() - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn gated_entity_field_fails_overall() {
        let taxonomy = Taxonomy::builder("gated")
            .field(
                FieldSpec::new("topics", Tier::EntityOnly, FieldKind::SetOfStrings)
                    .with_overlap_threshold(0.8)
                    .with_gate(true),
            )
            .build()
            .expect("taxonomy should build");
        let expected = record(json!({"topics": ["diabetes", "surgery"]}));
        let actual = record(json!({"topics": ["diabetes"]}));

        let result = evaluate_record("post", &expected, &actual, &taxonomy);
        assert!(result.tier1_pass && result.tier2_pass);
        assert!(!result.overall_pass);
    }

    #[test]
    fn engagement_score_within_tolerance_matches() {
        let taxonomy = fixture_taxonomy();
        let expected = record(json!({"engagement_score": 10}));
        let actual = record(json!({"engagement_score": 10.1}));

        let result = evaluate_record("post", &expected, &actual, &taxonomy);
        let engagement = result.field("engagement_score").expect("evaluated");
        assert!(engagement.matched);
        assert_eq!(engagement.score, 1.0);
        assert!(result.tier2_pass);
    }

    #[test]
    fn tier2_set_passes_on_threshold_without_exact_match() {
        let taxonomy = fixture_taxonomy();
        let expected = record(json!({"themes": ["a", "b", "c", "d", "e"]}));
        let actual = record(json!({"themes": ["a", "b", "c", "d"]}));

        let result = evaluate_record("post", &expected, &actual, &taxonomy);
        let themes = result.field("themes").expect("evaluated");
        assert!(!themes.matched);
        assert!(themes.passed);
        assert!(result.tier2_pass);
        assert!(result.mismatches.is_empty());
    }

    #[test]
    fn tier3_failure_never_gates_overall() {
        let taxonomy = fixture_taxonomy();
        let expected = record(json!({"intent": ["seeking_advice"]}));
        let actual = record(json!({"intent": ["sharing_experience"]}));

        let result = evaluate_record("post", &expected, &actual, &taxonomy);
        assert!(!result.tier3_pass);
        assert!(result.overall_pass);
        assert_eq!(result.mismatches.len(), 1);
        assert!(result.mismatches[0].starts_with("[T3] intent:"));
    }

    #[test]
    fn absent_field_is_a_failure_not_an_error() {
        let taxonomy = fixture_taxonomy();
        let expected = record(json!({"relevance_label": "relevant", "flags": ["crisis"]}));
        let actual = record(json!({}));

        let result = evaluate_record("post", &expected, &actual, &taxonomy);
        assert!(!result.tier1_pass);
        assert_eq!(result.field("relevance_label").expect("evaluated").actual_value, Value::Null);
        assert_eq!(
            result.field("flags").expect("evaluated").detail,
            "missing: [crisis] (actual empty)"
        );
    }

    #[test]
    fn type_mismatch_scores_zero() {
        let taxonomy = fixture_taxonomy();
        let expected = record(json!({"flags": ["crisis"]}));
        let actual = record(json!({"flags": "crisis"}));

        let result = evaluate_record("post", &expected, &actual, &taxonomy);
        let flags = result.field("flags").expect("evaluated");
        assert!(!flags.passed);
        assert_eq!(flags.score, 0.0);
        assert!(flags.detail.starts_with("type mismatch"));
    }

    #[test]
    fn unregistered_and_skipped_fields_are_not_evaluated() {
        let taxonomy = fixture_taxonomy();
        let expected = record(json!({"source_id": "a", "text": "post body", "novel": 1}));
        let actual = record(json!({"source_id": "b", "brand_new": true}));

        let result = evaluate_record("post", &expected, &actual, &taxonomy);
        assert!(result.field_results.is_empty());
        assert!(result.overall_pass);
        assert_eq!(
            result.unregistered_fields,
            vec!["brand_new".to_string(), "novel".to_string()]
        );
    }

    #[test]
    fn evaluation_is_deterministic() {
        let taxonomy = fixture_taxonomy();
        let expected = record(json!({"flags": ["b", "a"], "themes": ["x"], "relevance_label": "borderline"}));
        let actual = record(json!({"themes": ["y", "x"], "flags": ["a"], "relevance_label": "relevant"}));

        let first = evaluate_record("post", &expected, &actual, &taxonomy);
        let second = evaluate_record("post", &expected, &actual, &taxonomy);
        assert_eq!(first, second);
        assert_eq!(
            first
                .field_results
                .iter()
                .map(|field| field.field_name.as_str())
                .collect::<Vec<&str>>(),
            vec!["flags", "relevance_label", "themes"]
        );
    }
}
