use std::io;

use anyhow::{Context, Result};

use crate::aggregate::{AggregateReport, ScoredRecord};
use crate::taxonomy::{Taxonomy, Tier};

const ALL_FIELDS_MATCH: &str = "All fields match";

pub fn csv_header(taxonomy: &Taxonomy) -> Vec<String> {
    let mut header = [
        "id",
        "category",
        "tier1_pass",
        "tier2_pass",
        "tier3_pass",
        "overall_pass",
        "tier1_score",
        "tier2_score",
        "tier3_score",
    ]
    .iter()
    .map(|column| column.to_string())
    .collect::<Vec<String>>();

    header.extend(
        taxonomy
            .core_fields()
            .iter()
            .map(|spec| format!("{}_match", spec.name)),
    );
    header.push("extraction_quality".to_string());
    header.push("notes".to_string());
    header
}

pub fn csv_row(scored: &ScoredRecord, taxonomy: &Taxonomy) -> Vec<String> {
    let result = &scored.result;
    let mut row = vec![
        result.id.clone(),
        scored.category.clone().unwrap_or_default(),
        pass_fail(result.tier1_pass).to_string(),
        pass_fail(result.tier2_pass).to_string(),
        pass_fail(result.tier3_pass).to_string(),
        pass_fail(result.overall_pass).to_string(),
        format!("{:.3}", result.tier_score(Tier::Tier1Critical)),
        format!("{:.3}", result.tier_score(Tier::Tier2Core)),
        format!("{:.3}", result.tier_score(Tier::Tier3Enhancement)),
    ];

    row.extend(taxonomy.core_fields().iter().map(|spec| {
        result
            .field(&spec.name)
            .map(|field| pass_fail(field.passed))
            .unwrap_or("N/A")
            .to_string()
    }));

    row.push(format!("{:.3}", result.extraction_quality()));
    row.push(if result.mismatches.is_empty() {
        ALL_FIELDS_MATCH.to_string()
    } else {
        result.mismatches.join("; ")
    });
    row
}

pub fn write_csv<W: io::Write>(output: W, report: &AggregateReport, taxonomy: &Taxonomy) -> Result<()> {
    let mut writer = csv::Writer::from_writer(output);
    writer
        .write_record(csv_header(taxonomy))
        .context("failed to write csv header")?;

    for scored in &report.records {
        writer
            .write_record(csv_row(scored, taxonomy))
            .with_context(|| format!("failed to write csv row for {}", scored.result.id))?;
    }

    writer.flush().context("failed to flush csv output")?;
    Ok(())
}

fn pass_fail(passed: bool) -> &'static str {
    if passed { "PASS" } else { "FAIL" }
}
