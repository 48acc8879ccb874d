use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::loader::DEFAULT_ID_FIELD;
use crate::taxonomy::DEFAULT_VERSION;

#[derive(Parser, Debug)]
#[command(
    name = "enrich-eval",
    version,
    about = "Tiered field comparison of enrichment output against expected fixtures"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    Compare(CompareArgs),
    Taxonomy(TaxonomyArgs),
}

#[derive(Args, Debug, Clone)]
pub struct TaxonomySelection {
    #[arg(long, default_value = DEFAULT_VERSION)]
    pub taxonomy_version: String,

    #[arg(long)]
    pub taxonomy_path: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct CompareArgs {
    #[arg(long)]
    pub expected: PathBuf,

    #[arg(long = "actual", required = true)]
    pub actuals: Vec<PathBuf>,

    #[arg(long = "label")]
    pub labels: Vec<String>,

    #[command(flatten)]
    pub taxonomy: TaxonomySelection,

    #[arg(long, default_value = DEFAULT_ID_FIELD)]
    pub id_field: String,

    #[arg(long)]
    pub policy_path: Option<PathBuf>,

    #[arg(long)]
    pub tier1_gate: Option<f64>,

    #[arg(long)]
    pub tier2_gate: Option<f64>,

    #[arg(long)]
    pub top_n: Option<usize>,

    #[arg(long, default_value = "reports")]
    pub output_dir: PathBuf,

    #[arg(long)]
    pub run_id: Option<String>,

    #[arg(long, default_value_t = false)]
    pub no_prefix_categories: bool,

    #[arg(long, default_value_t = false)]
    pub enforce_gate: bool,
}

#[derive(Args, Debug, Clone)]
pub struct TaxonomyArgs {
    #[command(flatten)]
    pub taxonomy: TaxonomySelection,

    #[arg(long, default_value_t = false)]
    pub json: bool,
}
