use serde_json::Value;

use crate::aggregate::{AggregateReport, CategoryBreakdown, FieldTally, ItemCount, PassTally};
use crate::compare::{display_value, type_name};
use crate::taxonomy::Tier;

use super::policy::{GateDecision, ReportPolicy};

pub fn render_markdown(report: &AggregateReport, policy: &ReportPolicy, generated_at: &str) -> String {
    let decision = policy.gates.evaluate(report);
    let mut lines = Vec::<String>::new();

    lines.push(format!("# Evaluation Report: {}", report.source));
    lines.push(String::new());
    lines.push(format!("- Taxonomy: `{}`", report.taxonomy_version));
    lines.push(format!("- Generated: {generated_at}"));
    lines.push(format!(
        "- Matched records: {}/{} (missing {}, unexpected {})",
        report.total_matched,
        report.total_expected,
        report.missing_ids.len(),
        report.unexpected_ids.len()
    ));
    lines.push(String::new());

    push_gates(&mut lines, report, &decision);
    push_field_gates(&mut lines, report, policy);
    push_tier_scores(&mut lines, report);
    push_field_issues(&mut lines, report, policy);
    push_confusion(&mut lines, report, policy.top_n);
    push_extraction(&mut lines, report, policy.top_n);
    push_categories(&mut lines, report);
    push_root_causes(&mut lines, report, policy);
    push_id_list(&mut lines, "Unregistered Fields", &report.unregistered_fields);
    push_id_list(&mut lines, "Missing Records", &report.missing_ids);
    push_id_list(&mut lines, "Unexpected Records", &report.unexpected_ids);

    lines.join("\n")
}

pub fn render_console_summary(report: &AggregateReport, decision: &GateDecision) -> String {
    let mut lines = vec![
        format!(
            "Source: {} (taxonomy {})",
            report.source, report.taxonomy_version
        ),
        format!(
            "Matched: {}/{} (missing {}, unexpected {})",
            report.total_matched,
            report.total_expected,
            report.missing_ids.len(),
            report.unexpected_ids.len()
        ),
        format!(
            "Tier 1: {} gate {:.1}% {}",
            tally_text(&report.tiers.tier1),
            decision.tier1_min,
            pass_fail(decision.tier1_pass)
        ),
        format!(
            "Tier 2: {} gate {:.1}% {}",
            tally_text(&report.tiers.tier2),
            decision.tier2_min,
            pass_fail(decision.tier2_pass)
        ),
        format!("Tier 3: {} tracked", tally_text(&report.tiers.tier3)),
        format!("Overall: {}", tally_text(&report.tiers.overall)),
    ];
    lines.push(format!("Verdict: {}", decision.verdict));
    lines.join("\n")
}

pub fn render_sources_table(outcomes: &[(&AggregateReport, GateDecision)]) -> String {
    let mut lines = vec![
        "# Source Comparison".to_string(),
        String::new(),
        "| Source | Matched | Tier 1 | Tier 2 | Overall | Verdict |".to_string(),
        "| --- | --- | --- | --- | --- | --- |".to_string(),
    ];

    for (report, decision) in outcomes {
        lines.push(format!(
            "| {} | {}/{} | {:.1}% | {:.1}% | {:.1}% | {} |",
            report.source,
            report.total_matched,
            report.total_expected,
            report.tiers.tier1.rate,
            report.tiers.tier2.rate,
            report.tiers.overall.rate,
            decision.verdict
        ));
    }

    lines.join("\n")
}

fn push_gates(lines: &mut Vec<String>, report: &AggregateReport, decision: &GateDecision) {
    lines.push("## Release Gates".to_string());
    lines.push(String::new());
    lines.push("| Tier | Pass | Rate | Gate | Status |".to_string());
    lines.push("| --- | --- | --- | --- | --- |".to_string());
    lines.push(gate_row(
        "Tier 1 (critical)",
        &report.tiers.tier1,
        &format!(">= {:.1}%", decision.tier1_min),
        pass_fail(decision.tier1_pass),
    ));
    lines.push(gate_row(
        "Tier 2 (core)",
        &report.tiers.tier2,
        &format!(">= {:.1}%", decision.tier2_min),
        pass_fail(decision.tier2_pass),
    ));
    lines.push(gate_row("Tier 3 (enhancement)", &report.tiers.tier3, "tracked", "-"));
    lines.push(gate_row("Overall", &report.tiers.overall, "-", "-"));
    lines.push(String::new());
    lines.push(format!("### Verdict: {}", decision.verdict));
    lines.push(String::new());
    lines.push(decision.headline());
    lines.push(String::new());
}

fn push_field_gates(lines: &mut Vec<String>, report: &AggregateReport, policy: &ReportPolicy) {
    let checks = policy.gates.field_gates(report);
    if checks.is_empty() {
        return;
    }

    lines.push("## Field Gate Summary".to_string());
    lines.push(String::new());
    lines.push("| Field | Tier | Metric | Value | Gate | Status |".to_string());
    lines.push("| --- | --- | --- | --- | --- | --- |".to_string());
    for check in checks {
        lines.push(format!(
            "| {} | {} | {} | {:.1}% | >= {:.1}% | {} |",
            check.field,
            check.tier.tag(),
            check.metric.as_str(),
            check.value,
            check.gate,
            pass_fail(check.passed)
        ));
    }
    lines.push(String::new());
}

fn gate_row(label: &str, tally: &PassTally, gate: &str, status: &str) -> String {
    format!(
        "| {label} | {}/{} | {:.1}% | {gate} | {status} |",
        tally.pass,
        tally.total(),
        tally.rate
    )
}

fn push_tier_scores(lines: &mut Vec<String>, report: &AggregateReport) {
    lines.push("## Average Tier Scores".to_string());
    lines.push(String::new());
    lines.push("| Tier | Mean Score |".to_string());
    lines.push("| --- | --- |".to_string());
    for tier in Tier::SCORED {
        let score = report.tier_score_means.get(&tier).copied().unwrap_or(1.0);
        lines.push(format!("| {} | {score:.3} |", tier.as_str()));
    }
    lines.push(String::new());
}

fn push_field_issues(lines: &mut Vec<String>, report: &AggregateReport, policy: &ReportPolicy) {
    lines.push("## Field Issues".to_string());
    lines.push(String::new());

    let mut failing = report
        .fields
        .iter()
        .filter(|tally| tally.failed > 0)
        .collect::<Vec<&FieldTally>>();
    if failing.is_empty() {
        lines.push("No field failures.".to_string());
        lines.push(String::new());
        return;
    }
    failing.sort_by(|left, right| right.failure_rate.total_cmp(&left.failure_rate));

    lines.push("| Field | Tier | Failed | Evaluated | Failure Rate | Mean Score | Severity |".to_string());
    lines.push("| --- | --- | --- | --- | --- | --- | --- |".to_string());
    for tally in failing {
        lines.push(format!(
            "| {} | {} | {} | {} | {:.1}% | {:.3} | {} |",
            tally.field,
            tally.tier.tag(),
            tally.failed,
            tally.evaluated,
            tally.failure_rate,
            tally.mean_score,
            policy.severity.classify(tally.failure_rate)
        ));
    }
    lines.push(String::new());
}

fn push_confusion(lines: &mut Vec<String>, report: &AggregateReport, top_n: usize) {
    let matrices = report
        .confusion
        .iter()
        .filter(|matrix| matrix.evaluated > 0)
        .collect::<Vec<_>>();
    if matrices.is_empty() {
        return;
    }

    lines.push("## Confusion Patterns".to_string());
    lines.push(String::new());
    for matrix in matrices {
        lines.push(format!(
            "### {} (accuracy {:.1}%, {}/{})",
            matrix.field, matrix.accuracy, matrix.correct, matrix.evaluated
        ));
        lines.push(String::new());
        if !matrix.correct_by_label.is_empty() {
            let shown = matrix
                .correct_by_label
                .iter()
                .map(|entry| display_value(Some(&entry.label)))
                .collect::<Vec<String>>();
            let correct = matrix
                .correct_by_label
                .iter()
                .zip(&shown)
                .map(|(entry, text)| {
                    let collides = shown.iter().filter(|other| *other == text).count() > 1;
                    format!("`{}` ({})", label_text(&entry.label, collides), entry.count)
                })
                .collect::<Vec<String>>();
            lines.push(format!("- Correct by label: {}", correct.join(", ")));
        }
        for cell in matrix.cells.iter().take(top_n) {
            let collides = display_value(Some(&cell.expected)) == display_value(Some(&cell.actual));
            lines.push(format!(
                "- expected `{}`, got `{}`: {}",
                label_text(&cell.expected, collides),
                label_text(&cell.actual, collides),
                cell.count
            ));
        }
        lines.push(String::new());
    }
}

fn push_extraction(lines: &mut Vec<String>, report: &AggregateReport, top_n: usize) {
    if report.extraction.is_empty() {
        return;
    }

    lines.push("## Extraction Frequencies".to_string());
    lines.push(String::new());
    lines.push("| Field | Tier | Records | Precision | Recall | F1 |".to_string());
    lines.push("| --- | --- | --- | --- | --- | --- |".to_string());
    for table in &report.extraction {
        lines.push(format!(
            "| {} | {} | {} | {:.3} | {:.3} | {:.3} |",
            table.field,
            table.tier.tag(),
            table.records,
            table.mean_precision,
            table.mean_recall,
            table.f1
        ));
    }
    lines.push(String::new());

    for table in &report.extraction {
        if table.over_extracted.is_empty() && table.under_extracted.is_empty() {
            continue;
        }
        lines.push(format!("### {}", table.field));
        lines.push(String::new());
        if !table.over_extracted.is_empty() {
            lines.push(format!(
                "- Over-extracted: {}",
                item_list(&table.over_extracted, top_n)
            ));
        }
        if !table.under_extracted.is_empty() {
            lines.push(format!(
                "- Under-extracted: {}",
                item_list(&table.under_extracted, top_n)
            ));
        }
        lines.push(String::new());
    }
}

fn push_categories(lines: &mut Vec<String>, report: &AggregateReport) {
    if report.categories.is_empty() {
        return;
    }

    let mut categories = report.categories.iter().collect::<Vec<&CategoryBreakdown>>();
    categories.sort_by(|left, right| {
        left.overall
            .rate
            .total_cmp(&right.overall.rate)
            .then_with(|| left.category.cmp(&right.category))
    });

    lines.push("## Categories".to_string());
    lines.push(String::new());
    lines.push("| Category | Matched | Missing | Tier 1 | Tier 2 | Overall |".to_string());
    lines.push("| --- | --- | --- | --- | --- | --- |".to_string());
    for breakdown in categories {
        lines.push(format!(
            "| {} | {} | {} | {:.1}% | {:.1}% | {:.1}% |",
            breakdown.category,
            breakdown.matched,
            breakdown.missing,
            breakdown.tier1.rate,
            breakdown.tier2.rate,
            breakdown.overall.rate
        ));
    }
    lines.push(String::new());
}

fn push_root_causes(lines: &mut Vec<String>, report: &AggregateReport, policy: &ReportPolicy) {
    lines.push("## Root Causes".to_string());
    lines.push(String::new());

    let findings = policy.root_causes(report);
    if findings.is_empty() {
        lines.push("No root-cause rules triggered.".to_string());
        lines.push(String::new());
        return;
    }

    for finding in findings {
        lines.push(format!("### {} ({} severity)", finding.title, finding.severity));
        lines.push(String::new());
        lines.push(format!(
            "**{} of {} records failed `{}` ({:.1}%)**",
            finding.failed, finding.evaluated, finding.field, finding.failure_rate
        ));
        lines.push(String::new());
        lines.push(finding.observation);
        lines.push(String::new());
        lines.push(format!("**Recommendation:** {}", finding.recommendation));
        lines.push(String::new());
    }
}

fn push_id_list(lines: &mut Vec<String>, title: &str, ids: &[String]) {
    if ids.is_empty() {
        return;
    }

    lines.push(format!("## {title}"));
    lines.push(String::new());
    lines.extend(ids.iter().map(|id| format!("- `{id}`")));
    lines.push(String::new());
}

/// Plain text for a label. When two different values share a display string
/// the label switches to its JSON form plus the value type, e.g. `"1" (string)`.
fn label_text(value: &Value, with_type: bool) -> String {
    if with_type {
        format!("{value} ({})", type_name(value))
    } else {
        display_value(Some(value))
    }
}

fn item_list(items: &[ItemCount], top_n: usize) -> String {
    items
        .iter()
        .take(top_n)
        .map(|entry| format!("{} ({})", entry.item, entry.count))
        .collect::<Vec<String>>()
        .join(", ")
}

fn tally_text(tally: &PassTally) -> String {
    format!("{}/{} ({:.1}%)", tally.pass, tally.total(), tally.rate)
}

fn pass_fail(passed: bool) -> &'static str {
    if passed { "PASS" } else { "FAIL" }
}
