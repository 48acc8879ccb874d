use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde_json::Value;

use crate::model::{ExpectedOutcomesManifest, Record, RecordSet};
use crate::taxonomy::Taxonomy;
use crate::util::fingerprint_json;

mod directory;
mod table;

use directory::load_directory;
use table::load_csv;

pub const DEFAULT_ID_FIELD: &str = "source_id";
const EXPECTED_PREFIX: &str = "expected_";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordRole {
    Expected,
    Actual,
}

impl RecordRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Expected => "expected",
            Self::Actual => "actual",
        }
    }

    /// Fixture file suffixes accepted for this role, most preferred first.
    fn suffixes(self) -> &'static [&'static str] {
        match self {
            Self::Expected => &["expected", "enriched"],
            Self::Actual => &["actual", "enriched"],
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoadOptions<'a> {
    pub role: RecordRole,
    pub label: String,
    pub id_field: String,
    pub taxonomy: &'a Taxonomy,
}

impl<'a> LoadOptions<'a> {
    pub fn new(role: RecordRole, label: impl Into<String>, taxonomy: &'a Taxonomy) -> Self {
        Self {
            role,
            label: label.into(),
            id_field: DEFAULT_ID_FIELD.to_string(),
            taxonomy,
        }
    }

    pub fn with_id_field(mut self, id_field: impl Into<String>) -> Self {
        self.id_field = id_field.into();
        self
    }
}

pub fn load_record_set(path: &Path, options: &LoadOptions<'_>) -> Result<RecordSet> {
    let loaded = if path.is_dir() {
        load_directory(path, options)
    } else if has_extension(path, "csv") {
        load_csv(path, options)
    } else {
        load_json(path, options)
    };
    let mut set = loaded.with_context(|| {
        format!(
            "could not load {} set from {}",
            options.role.as_str(),
            path.display()
        )
    })?;

    set.fingerprint = fingerprint_json(&set.records)?;
    Ok(set)
}

pub fn load_json(path: &Path, options: &LoadOptions<'_>) -> Result<RecordSet> {
    let raw = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let value: Value = serde_json::from_slice(&raw)
        .with_context(|| format!("failed to parse {}", path.display()))?;

    let mut set = RecordSet::new(options.label.clone(), path.display().to_string());
    match value {
        Value::Object(map) if map.contains_key("test_posts") => {
            let manifest: ExpectedOutcomesManifest = serde_json::from_value(Value::Object(map))
                .with_context(|| format!("failed to parse manifest {}", path.display()))?;
            fill_from_manifest(&mut set, manifest, &options.id_field)?;
        }
        Value::Object(map) => {
            for (id, record) in map {
                let Value::Object(record) = record else {
                    bail!("record {id} in {} is not a JSON object", path.display());
                };
                set.insert(id, record);
            }
        }
        Value::Array(items) => {
            for (position, item) in items.into_iter().enumerate() {
                let Value::Object(record) = item else {
                    bail!("entry {position} in {} is not a JSON object", path.display());
                };
                let id = record_id(&record, &options.id_field)
                    .with_context(|| format!("entry {position} in {}", path.display()))?;
                insert_unique(&mut set, id, record)?;
            }
        }
        other => bail!(
            "{} holds a JSON {}, wanted an object or an array of records",
            path.display(),
            json_kind(&other)
        ),
    }

    Ok(set)
}

fn fill_from_manifest(
    set: &mut RecordSet,
    manifest: ExpectedOutcomesManifest,
    id_field: &str,
) -> Result<()> {
    if let Some(total) = manifest.total_tests {
        if total != manifest.test_posts.len() {
            bail!(
                "manifest declares {total} tests but lists {}",
                manifest.test_posts.len()
            );
        }
    }

    for (position, post) in manifest.test_posts.into_iter().enumerate() {
        let id = record_id(&post, id_field).with_context(|| format!("test post {position}"))?;
        if let Some(category) = post.get("test_category").and_then(Value::as_str) {
            set.tag_category(id.clone(), category);
        }

        let record = post
            .into_iter()
            .filter_map(|(key, value)| {
                key.strip_prefix(EXPECTED_PREFIX)
                    .map(|field| (field.to_string(), value))
            })
            .collect::<Record>();
        insert_unique(set, id, record)?;
    }

    Ok(())
}

fn record_id(record: &Record, id_field: &str) -> Result<String> {
    match record.get(id_field) {
        Some(Value::String(id)) if !id.trim().is_empty() => Ok(id.trim().to_string()),
        Some(Value::Number(id)) => Ok(id.to_string()),
        _ => bail!("missing string id field '{id_field}'"),
    }
}

fn insert_unique(set: &mut RecordSet, id: String, record: Record) -> Result<()> {
    if set.records.contains_key(&id) {
        bail!("duplicate record id {id}");
    }
    set.insert(id, record);
    Ok(())
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .and_then(|value| value.to_str())
        .is_some_and(|value| value.eq_ignore_ascii_case(extension))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
