use std::collections::BTreeSet;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use crate::aggregate::{AggregateReport, evaluate_sets};
use crate::category::CategoryResolver;
use crate::cli::CompareArgs;
use crate::loader::{LoadOptions, RecordRole, load_record_set};
use crate::model::{EvaluationRunManifest, RecordSet, RecordSetSummary, SourceOutcome};
use crate::report::{
    GateDecision, ReportPolicy, render_console_summary, render_markdown, render_sources_table,
    write_csv,
};
use crate::taxonomy::Taxonomy;
use crate::util::{now_utc_string, utc_compact_string, write_json_pretty, write_text};

use super::taxonomy::resolve;

const MANIFEST_VERSION: u32 = 1;

#[derive(Debug, Serialize)]
struct SourceArtifact<'a> {
    generated_at: &'a str,
    run_id: &'a str,
    expected_fingerprint: &'a str,
    actual_fingerprint: &'a str,
    gate: &'a GateDecision,
    report: &'a AggregateReport,
}

pub fn run(args: CompareArgs) -> Result<bool> {
    let taxonomy = resolve(&args.taxonomy)?;
    let policy = load_policy(&args)?;
    let labels = source_labels(&args.actuals, &args.labels)?;

    let run_id = args
        .run_id
        .clone()
        .unwrap_or_else(|| utc_compact_string(Utc::now()));
    let generated_at = now_utc_string();

    let expected = load_record_set(
        &args.expected,
        &LoadOptions::new(RecordRole::Expected, "expected", &taxonomy)
            .with_id_field(args.id_field.clone()),
    )?;
    info!(
        path = %args.expected.display(),
        records = expected.len(),
        tagged = expected.categories.len(),
        fingerprint = %expected.fingerprint,
        "loaded expected set"
    );
    if expected.is_empty() {
        warn!(path = %args.expected.display(), "expected set is empty; all rates will be zero");
    }

    let prefixes = if args.no_prefix_categories {
        CategoryResolver::new()
    } else {
        CategoryResolver::with_default_prefixes()
    };

    let mut reports = Vec::<(AggregateReport, GateDecision)>::new();
    let mut outcomes = Vec::<SourceOutcome>::new();
    let mut warnings = Vec::<String>::new();

    for (path, label) in args.actuals.iter().zip(labels.iter()) {
        let actual = load_record_set(
            path,
            &LoadOptions::new(RecordRole::Actual, label.clone(), &taxonomy)
                .with_id_field(args.id_field.clone()),
        )?;
        info!(
            source = %label,
            path = %path.display(),
            records = actual.len(),
            fingerprint = %actual.fingerprint,
            "loaded actual set"
        );

        let resolver = prefixes
            .clone()
            .with_explicit(&actual.categories)
            .with_explicit(&expected.categories);
        let report = evaluate_sets(&expected, &actual, &taxonomy, Some(&resolver));
        let decision = policy.gates.evaluate(&report);

        for field in &report.unregistered_fields {
            warn!(source = %label, field = %field, "field is not in the taxonomy; skipped");
            warnings.push(format!("{label}: unregistered field {field}"));
        }
        if !report.missing_ids.is_empty() {
            warn!(source = %label, missing = report.missing_ids.len(), "expected records missing from source");
            warnings.push(format!(
                "{label}: {} expected records missing",
                report.missing_ids.len()
            ));
        }
        if !report.unexpected_ids.is_empty() {
            warn!(source = %label, unexpected = report.unexpected_ids.len(), "source has records with no expected fixture");
        }

        let artifacts = write_source_artifacts(
            &args.output_dir,
            &run_id,
            &generated_at,
            &expected,
            &actual,
            &taxonomy,
            &policy,
            &report,
            &decision,
        )?;

        info!(
            source = %label,
            matched = report.total_matched,
            tier1_rate = report.tiers.tier1.rate,
            tier2_rate = report.tiers.tier2.rate,
            overall_rate = report.tiers.overall.rate,
            verdict = %decision.verdict,
            "source evaluated"
        );
        print_summary(&report, &decision)?;

        outcomes.push(SourceOutcome {
            label: label.clone(),
            actual: RecordSetSummary::from(&actual),
            total_expected: report.total_expected,
            total_matched: report.total_matched,
            missing_count: report.missing_ids.len(),
            unexpected_count: report.unexpected_ids.len(),
            tier1_rate: report.tiers.tier1.rate,
            tier2_rate: report.tiers.tier2.rate,
            overall_rate: report.tiers.overall.rate,
            verdict: decision.verdict.to_string(),
            ready: decision.ready(),
            artifacts: artifacts
                .iter()
                .map(|path| path.display().to_string())
                .collect(),
        });
        reports.push((report, decision));
    }

    if reports.len() > 1 {
        let path = args
            .output_dir
            .join(format!("sources_summary_{run_id}.md"));
        let rows = reports
            .iter()
            .map(|(report, decision)| (report, *decision))
            .collect::<Vec<(&AggregateReport, GateDecision)>>();
        write_text(&path, &render_sources_table(&rows))?;
        info!(path = %path.display(), sources = rows.len(), "wrote source comparison");
    }

    let all_ready = outcomes.iter().all(|outcome| outcome.ready);
    let manifest = EvaluationRunManifest {
        manifest_version: MANIFEST_VERSION,
        run_id: run_id.clone(),
        generated_at: generated_at.clone(),
        command: "compare".to_string(),
        taxonomy_version: taxonomy.version().to_string(),
        tier1_gate: policy.gates.tier1_min,
        tier2_gate: policy.gates.tier2_min,
        expected: RecordSetSummary::from(&expected),
        sources: outcomes,
        all_ready,
        warnings,
    };
    let manifest_path = args
        .output_dir
        .join(format!("evaluation_run_{run_id}.json"));
    write_json_pretty(&manifest_path, &manifest)?;
    info!(path = %manifest_path.display(), all_ready, "wrote evaluation run manifest");

    if !all_ready {
        warn!(
            tier1_gate = policy.gates.tier1_min,
            tier2_gate = policy.gates.tier2_min,
            "release gate not met"
        );
    }

    Ok(all_ready)
}

fn load_policy(args: &CompareArgs) -> Result<ReportPolicy> {
    let mut policy = match &args.policy_path {
        Some(path) => {
            let policy = ReportPolicy::load(path)?;
            info!(path = %path.display(), "loaded report policy");
            policy
        }
        None => ReportPolicy::default(),
    };

    if let Some(gate) = args.tier1_gate {
        policy.gates.tier1_min = gate;
    }
    if let Some(gate) = args.tier2_gate {
        policy.gates.tier2_min = gate;
    }
    if let Some(top_n) = args.top_n {
        policy.top_n = top_n;
    }
    policy.validate().context("invalid report policy overrides")?;
    Ok(policy)
}

fn source_labels(actuals: &[PathBuf], labels: &[String]) -> Result<Vec<String>> {
    if !labels.is_empty() && labels.len() != actuals.len() {
        bail!(
            "got {} --label values for {} --actual sources",
            labels.len(),
            actuals.len()
        );
    }

    let labels = if labels.is_empty() {
        actuals
            .iter()
            .map(|path| default_label(path))
            .collect::<Vec<String>>()
    } else {
        labels
            .iter()
            .map(|label| sanitize_label(label))
            .collect::<Vec<String>>()
    };

    let mut seen = BTreeSet::<&str>::new();
    for label in &labels {
        if !seen.insert(label.as_str()) {
            bail!("source label {label} is used twice; pass distinct --label values");
        }
    }
    Ok(labels)
}

fn default_label(path: &Path) -> String {
    let stem = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("source");
    sanitize_label(stem)
}

fn sanitize_label(label: &str) -> String {
    let cleaned = label
        .trim()
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect::<String>();
    if cleaned.is_empty() {
        "source".to_string()
    } else {
        cleaned
    }
}

#[allow(clippy::too_many_arguments)]
fn write_source_artifacts(
    output_dir: &Path,
    run_id: &str,
    generated_at: &str,
    expected: &RecordSet,
    actual: &RecordSet,
    taxonomy: &Taxonomy,
    policy: &ReportPolicy,
    report: &AggregateReport,
    decision: &GateDecision,
) -> Result<Vec<PathBuf>> {
    let stem = format!("{}_{run_id}", actual.label);
    let csv_path = output_dir.join(format!("{stem}.csv"));
    let markdown_path = output_dir.join(format!("{stem}.md"));
    let json_path = output_dir.join(format!("{stem}.json"));

    crate::util::ensure_directory(output_dir)?;
    let file = File::create(&csv_path)
        .with_context(|| format!("failed to create {}", csv_path.display()))?;
    write_csv(BufWriter::new(file), report, taxonomy)
        .with_context(|| format!("failed to write {}", csv_path.display()))?;

    write_text(&markdown_path, &render_markdown(report, policy, generated_at))?;
    write_json_pretty(
        &json_path,
        &SourceArtifact {
            generated_at,
            run_id,
            expected_fingerprint: &expected.fingerprint,
            actual_fingerprint: &actual.fingerprint,
            gate: decision,
            report,
        },
    )?;

    info!(
        source = %actual.label,
        csv = %csv_path.display(),
        markdown = %markdown_path.display(),
        json = %json_path.display(),
        "wrote source artifacts"
    );
    Ok(vec![csv_path, markdown_path, json_path])
}

fn print_summary(report: &AggregateReport, decision: &GateDecision) -> Result<()> {
    let mut output = io::BufWriter::new(io::stdout().lock());
    writeln!(output, "{}", render_console_summary(report, decision))?;
    writeln!(output)?;
    output.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::cli::TaxonomySelection;

    fn write(path: &Path, text: &str) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create fixture dir");
        }
        fs::write(path, text).expect("write fixture");
    }

    fn args(root: &Path, actuals: Vec<PathBuf>, labels: Vec<String>) -> CompareArgs {
        CompareArgs {
            expected: root.join("expected"),
            actuals,
            labels,
            taxonomy: TaxonomySelection {
                taxonomy_version: "v7".to_string(),
                taxonomy_path: None,
            },
            id_field: "source_id".to_string(),
            policy_path: None,
            tier1_gate: None,
            tier2_gate: None,
            top_n: None,
            output_dir: root.join("reports"),
            run_id: Some("20260101T000000Z".to_string()),
            no_prefix_categories: false,
            enforce_gate: true,
        }
    }

    fn seed(root: &Path) {
        let post = r#"{"relevance_label": "relevant", "flags": ["adverse_event"], "audience_label": "patient", "themes": ["recovery"]}"#;
        for index in 0..10 {
            write(
                &root.join(format!("expected/adverse/ae_test_{index:02}_expected.json")),
                post,
            );
            let actual = if index == 0 {
                r#"{"relevance_label": "borderline", "flags": ["adverse_event"], "audience_label": "patient", "themes": ["recovery"], "mood": "calm"}"#
            } else {
                post
            };
            write(&root.join(format!("good/ae_test_{index:02}_enriched.json")), actual);
            let weak = if index < 3 {
                r#"{"relevance_label": "not_relevant", "flags": [], "audience_label": "patient", "themes": ["recovery"]}"#
            } else {
                post
            };
            write(&root.join(format!("weak/ae_test_{index:02}_actual.json")), weak);
        }
    }

    #[test]
    fn compare_writes_artifacts_and_reports_gate() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path();
        seed(root);

        let ready = run(args(root, vec![root.join("good"), root.join("weak")], Vec::new()))
            .expect("compare runs");
        assert!(!ready);

        let reports = root.join("reports");
        for name in [
            "good_20260101T000000Z.csv",
            "good_20260101T000000Z.md",
            "good_20260101T000000Z.json",
            "weak_20260101T000000Z.csv",
            "sources_summary_20260101T000000Z.md",
            "evaluation_run_20260101T000000Z.json",
        ] {
            assert!(reports.join(name).is_file(), "{name} should exist");
        }

        let manifest: serde_json::Value = serde_json::from_slice(
            &fs::read(reports.join("evaluation_run_20260101T000000Z.json")).expect("read manifest"),
        )
        .expect("parse manifest");
        assert_eq!(manifest["sources"][0]["verdict"], "READY");
        assert_eq!(manifest["sources"][1]["verdict"], "NOT READY");
        assert_eq!(manifest["all_ready"], false);
        assert_eq!(manifest["warnings"][0], "good: unregistered field mood");

        let csv = fs::read_to_string(reports.join("good_20260101T000000Z.csv")).expect("read csv");
        assert!(csv.contains("ae_test_00,adverse,FAIL"));
    }

    #[test]
    fn single_ready_source_passes_without_summary_table() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path();
        seed(root);

        let ready = run(args(root, vec![root.join("good")], vec!["candidate".to_string()]))
            .expect("compare runs");

        assert!(ready);
        assert!(root.join("reports/candidate_20260101T000000Z.md").is_file());
        assert!(!root.join("reports/sources_summary_20260101T000000Z.md").exists());
    }

    #[test]
    fn labels_must_match_sources_and_be_distinct() {
        let actuals = vec![PathBuf::from("a/run.json"), PathBuf::from("b/run.json")];

        assert!(source_labels(&actuals, &["only".to_string()]).is_err());
        assert!(source_labels(&actuals, &[]).is_err());
        assert_eq!(
            source_labels(&actuals, &["gpt 4o".to_string(), "mini".to_string()]).expect("labels"),
            vec!["gpt_4o".to_string(), "mini".to_string()]
        );
    }
}
