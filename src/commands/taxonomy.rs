use std::io::{self, Write};

use anyhow::{Context, Result};
use tracing::info;

use crate::cli::{TaxonomyArgs, TaxonomySelection};
use crate::taxonomy::{FieldKind, FieldSpec, Taxonomy, TaxonomyRegistry, Tier};

pub fn run(args: TaxonomyArgs) -> Result<()> {
    let taxonomy = resolve(&args.taxonomy)?;
    let mut output = io::BufWriter::new(io::stdout().lock());

    if args.json {
        let text = serde_json::to_string_pretty(&taxonomy.to_config())
            .context("failed to serialize taxonomy")?;
        writeln!(output, "{text}")?;
        return Ok(());
    }

    writeln!(
        output,
        "Taxonomy {} ({} fields)",
        taxonomy.version(),
        taxonomy.fields().len()
    )?;
    for tier in Tier::SCORED.into_iter().chain([Tier::Skip]) {
        for spec in taxonomy.fields_in(tier) {
            writeln!(
                output,
                "{:<5}\t{:<16}\t{}\t{}",
                tier.tag(),
                spec.kind.as_str(),
                spec.name,
                rule_text(spec)
            )?;
        }
    }
    output.flush()?;
    Ok(())
}

pub fn resolve(selection: &TaxonomySelection) -> Result<Taxonomy> {
    if let Some(path) = &selection.taxonomy_path {
        let taxonomy = Taxonomy::load(path)?;
        info!(
            path = %path.display(),
            version = %taxonomy.version(),
            fields = taxonomy.fields().len(),
            "loaded taxonomy file"
        );
        return Ok(taxonomy);
    }

    let registry = TaxonomyRegistry::builtin().context("builtin taxonomies failed validation")?;
    let taxonomy = registry
        .get(&selection.taxonomy_version)
        .context("failed to select taxonomy")?
        .clone();
    info!(version = %taxonomy.version(), fields = taxonomy.fields().len(), "selected builtin taxonomy");
    Ok(taxonomy)
}

fn rule_text(spec: &FieldSpec) -> String {
    if spec.tier == Tier::Skip {
        return "ignored".to_string();
    }

    let rule = match spec.kind {
        FieldKind::SetOfStrings if spec.pass_threshold() < 1.0 => {
            format!("jaccard >= {:.2}", spec.pass_threshold())
        }
        FieldKind::NumericTolerant => format!("within {:.2}", spec.tolerance()),
        _ => "exact".to_string(),
    };
    let gating = if spec.gates() { "gating" } else { "tracked" };
    format!("{rule}, {gating}")
}
