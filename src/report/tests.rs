use serde_json::{Value, json};

use super::csv_export::{csv_header, csv_row};
use super::policy::{
    DEFAULT_TIER2_GATE, FieldMetric, GatePolicy, Severity, SeverityBands, Verdict,
    default_root_cause_rules,
};
use super::*;
use crate::aggregate::{AggregateReport, evaluate_sets};
use crate::category::CategoryResolver;
use crate::model::{Record, RecordSet};
use crate::taxonomy::{FieldKind, FieldSpec, Taxonomy, Tier};

fn record(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        other => panic!("fixture must be an object, got {other}"),
    }
}

fn taxonomy() -> Taxonomy {
    Taxonomy::builder("fixture")
        .field(FieldSpec::new("flags", Tier::Tier1Critical, FieldKind::SetOfStrings))
        .field(FieldSpec::new("relevance_label", Tier::Tier1Critical, FieldKind::Scalar))
        .field(FieldSpec::new("audience_label", Tier::Tier2Core, FieldKind::Scalar))
        .field(
            FieldSpec::new("topics", Tier::EntityOnly, FieldKind::SetOfStrings)
                .with_overlap_threshold(0.8),
        )
        .build()
        .expect("fixture taxonomy should build")
}

fn post(relevance: &str, audience: &str) -> Record {
    record(json!({
        "flags": ["adverse_event"],
        "relevance_label": relevance,
        "audience_label": audience,
        "topics": ["dumping_syndrome"],
    }))
}

fn report_with(failing_relevance: usize, failing_audience: usize) -> AggregateReport {
    let taxonomy = taxonomy();
    let mut expected = RecordSet::new("expected", "fixture");
    let mut actual = RecordSet::new("enriched", "fixture");
    for index in 0..10 {
        let id = format!("ae_test_{index:02}");
        expected.insert(id.clone(), post("relevant", "patient"));
        let relevance = if index < failing_relevance { "borderline" } else { "relevant" };
        let audience = if index < failing_audience { "caregiver" } else { "patient" };
        actual.insert(id, post(relevance, audience));
    }
    expected.insert("edge_01", post("relevant", "patient"));
    evaluate_sets(
        &expected,
        &actual,
        &taxonomy,
        Some(&CategoryResolver::with_default_prefixes()),
    )
}

#[test]
fn gate_is_inclusive_at_the_boundary() {
    let gates = GatePolicy::default();

    assert!(gates.decide(90.0, 80.0).ready());
    assert_eq!(gates.decide(89.9, 100.0).verdict, Verdict::NotReady);
    assert_eq!(gates.decide(95.0, 79.9).verdict, Verdict::Tier2NeedsWork);
    assert_eq!(gates.decide(50.0, 10.0).verdict, Verdict::NotReady);
}

#[test]
fn nine_of_ten_records_meets_the_default_gate() {
    let report = report_with(1, 0);
    let decision = GatePolicy::default().evaluate(&report);

    assert!((report.tiers.tier1.rate - 90.0).abs() < 1e-9);
    assert!(decision.tier1_pass);
    assert_eq!(decision.verdict, Verdict::Ready);
}

#[test]
fn severity_bands_use_strict_cut_points() {
    let bands = SeverityBands::default();

    assert_eq!(bands.classify(20.1), Severity::High);
    assert_eq!(bands.classify(20.0), Severity::Medium);
    assert_eq!(bands.classify(10.5), Severity::Medium);
    assert_eq!(bands.classify(10.0), Severity::Low);
    assert_eq!(bands.classify(0.0), Severity::Low);
}

#[test]
fn root_cause_rules_fire_above_their_threshold() {
    let policy = ReportPolicy::default();

    let quiet = report_with(1, 0);
    assert!(policy.root_causes(&quiet).is_empty());

    let noisy = report_with(2, 1);
    let findings = policy.root_causes(&noisy);
    let fields = findings
        .iter()
        .map(|finding| finding.field.as_str())
        .collect::<Vec<&str>>();
    assert_eq!(fields, vec!["relevance_label", "audience_label"]);
    assert_eq!(findings[0].severity, Severity::Medium);
    assert_eq!(findings[1].failed, 1);
}

#[test]
fn policy_file_overrides_only_named_values() {
    let policy: ReportPolicy = serde_json::from_value(json!({
        "gates": { "tier1_min": 95.0 },
        "top_n": 3
    }))
    .expect("policy should parse");

    assert_eq!(policy.gates.tier1_min, 95.0);
    assert_eq!(policy.gates.tier2_min, DEFAULT_TIER2_GATE);
    assert_eq!(policy.top_n, 3);
    assert_eq!(policy.root_causes.len(), default_root_cause_rules().len());
    assert!(policy.validate().is_ok());

    let invalid = ReportPolicy {
        gates: GatePolicy {
            tier1_min: 120.0,
            tier2_min: 80.0,
        },
        ..ReportPolicy::default()
    };
    assert!(invalid.validate().is_err());
}

#[test]
fn csv_has_per_field_columns_and_notes() {
    let taxonomy = taxonomy();
    let report = report_with(1, 0);

    assert_eq!(
        csv_header(&taxonomy),
        vec![
            "id",
            "category",
            "tier1_pass",
            "tier2_pass",
            "tier3_pass",
            "overall_pass",
            "tier1_score",
            "tier2_score",
            "tier3_score",
            "flags_match",
            "relevance_label_match",
            "audience_label_match",
            "extraction_quality",
            "notes",
        ]
    );

    let mut buffer = Vec::<u8>::new();
    write_csv(&mut buffer, &report, &taxonomy).expect("csv should render");
    let text = String::from_utf8(buffer).expect("csv is utf-8");
    let lines = text.lines().collect::<Vec<&str>>();

    assert_eq!(lines.len(), 11);
    assert!(lines[1].starts_with("ae_test_00,adverse_events,FAIL,PASS,PASS,FAIL,0.500,"));
    assert!(lines[1].contains("[T1] relevance_label: expected: relevant, actual: borderline"));
    assert!(lines[2].ends_with("1.000,All fields match"));
}

#[test]
fn csv_marks_unevaluated_fields_as_not_applicable() {
    let taxonomy = taxonomy();
    let mut expected = RecordSet::new("expected", "fixture");
    let mut actual = RecordSet::new("enriched", "fixture");
    expected.insert("x", record(json!({ "relevance_label": "relevant" })));
    actual.insert("x", record(json!({ "relevance_label": "relevant" })));
    let report = evaluate_sets(&expected, &actual, &taxonomy, None);

    let row = csv_row(&report.records[0], &taxonomy);

    assert_eq!(row[1], "");
    assert_eq!(row[9], "N/A");
    assert_eq!(row[10], "PASS");
    assert_eq!(row[11], "N/A");
}

#[test]
fn markdown_lists_every_section_for_a_failing_run() {
    let report = report_with(3, 1);
    let markdown = render_markdown(&report, &ReportPolicy::default(), "2026-01-01T00:00:00Z");

    assert!(markdown.starts_with("# Evaluation Report: enriched"));
    assert!(markdown.contains("### Verdict: NOT READY"));
    assert!(markdown.contains("| relevance_label | T1 | 3 | 10 | 30.0% | 0.700 | high |"));
    assert!(markdown.contains("- expected `relevant`, got `borderline`: 3"));
    assert!(markdown.contains("### Relevance classification (high severity)"));
    assert!(markdown.contains("## Missing Records"));
    assert!(markdown.contains("- `edge_01`"));
    assert!(markdown.contains("| edge_cases | 0 | 1 |"));
}

#[test]
fn field_gate_summary_checks_each_core_field_against_its_tier_gate() {
    let report = report_with(2, 3);
    let checks = GatePolicy::default().field_gates(&report);

    let fields = checks
        .iter()
        .map(|check| check.field.as_str())
        .collect::<Vec<&str>>();
    assert_eq!(fields, vec!["flags", "relevance_label", "audience_label"]);

    let relevance = &checks[1];
    assert_eq!(relevance.metric, FieldMetric::Accuracy);
    assert!((relevance.value - 80.0).abs() < 1e-9);
    assert_eq!(relevance.gate, 90.0);
    assert!(!relevance.passed);

    let audience = &checks[2];
    assert_eq!(audience.tier, Tier::Tier2Core);
    assert!((audience.value - 70.0).abs() < 1e-9);
    assert_eq!(audience.gate, 80.0);
    assert!(!audience.passed);

    assert_eq!(checks[0].metric, FieldMetric::F1);
    assert!(checks[0].passed);

    let markdown = render_markdown(&report, &ReportPolicy::default(), "now");
    assert!(markdown.contains("## Field Gate Summary"));
    assert!(markdown.contains("| flags | T1 | F1 | 100.0% | >= 90.0% | PASS |"));
    assert!(markdown.contains("| relevance_label | T1 | accuracy | 80.0% | >= 90.0% | FAIL |"));
    assert!(markdown.contains("| audience_label | T2 | accuracy | 70.0% | >= 80.0% | FAIL |"));
    assert!(markdown.contains("- Correct by label: `relevant` (8)"));
    assert!(markdown.contains("- Correct by label: `patient` (7)"));
}

#[test]
fn confusion_labels_show_types_when_values_print_alike() {
    let taxonomy = taxonomy();
    let mut expected = RecordSet::new("expected", "fixture");
    let mut actual = RecordSet::new("enriched", "fixture");
    expected.insert("ae_test_01", record(json!({"relevance_label": "1"})));
    actual.insert("ae_test_01", record(json!({"relevance_label": 1})));
    expected.insert("ae_test_02", record(json!({"relevance_label": "null"})));
    actual.insert("ae_test_02", record(json!({})));
    expected.insert("ae_test_03", record(json!({"relevance_label": "relevant"})));
    actual.insert("ae_test_03", record(json!({"relevance_label": "borderline"})));

    let report = evaluate_sets(&expected, &actual, &taxonomy, None);
    let markdown = render_markdown(&report, &ReportPolicy::default(), "now");

    assert!(markdown.contains("- expected `\"1\" (string)`, got `1 (number)`: 1"));
    assert!(markdown.contains("- expected `\"null\" (string)`, got `null (null)`: 1"));
    assert!(markdown.contains("- expected `relevant`, got `borderline`: 1"));
}

#[test]
fn categories_are_ordered_worst_first() {
    let report = report_with(3, 0);
    let markdown = render_markdown(&report, &ReportPolicy::default(), "now");

    let edge = markdown.find("| edge_cases |").expect("edge row");
    let adverse = markdown.find("| adverse_events |").expect("adverse row");
    assert!(edge < adverse);
}

#[test]
fn console_summary_and_source_table_show_verdicts() {
    let good = report_with(0, 0);
    let bad = report_with(5, 0);
    let gates = GatePolicy::default();

    let summary = render_console_summary(&good, &gates.evaluate(&good));
    assert!(summary.contains("Tier 1: 10/10 (100.0%) gate 90.0% PASS"));
    assert!(summary.ends_with("Verdict: READY"));

    let table = render_sources_table(&[(&good, gates.evaluate(&good)), (&bad, gates.evaluate(&bad))]);
    assert!(table.contains("| enriched | 10/11 | 100.0% | 100.0% | 100.0% | READY |"));
    assert!(table.contains("| enriched | 10/11 | 50.0% | 100.0% | 50.0% | NOT READY |"));
}
