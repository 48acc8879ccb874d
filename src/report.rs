mod csv_export;
mod narrative;
mod policy;
#[cfg(test)]
mod tests;

pub use csv_export::write_csv;
pub use narrative::{render_console_summary, render_markdown, render_sources_table};
pub use policy::{GateDecision, ReportPolicy};
