use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use regex::Regex;
use serde_json::Value;

use super::{LoadOptions, RecordRole};
use crate::model::RecordSet;

struct FixtureFile {
    path: PathBuf,
    rank: usize,
    category: Option<String>,
}

pub fn load_directory(root: &Path, options: &LoadOptions<'_>) -> Result<RecordSet> {
    let name_regex = Regex::new(r"^(?P<id>.+?)_(?P<suffix>expected|enriched|actual)\.json$")
        .context("failed to compile fixture filename regex")?;
    let mut chosen = BTreeMap::<String, FixtureFile>::new();

    collect_fixtures(root, None, &name_regex, options.role, &mut chosen)?;
    for entry in read_sorted(root)? {
        if entry.is_dir() {
            let category = entry
                .file_name()
                .and_then(|name| name.to_str())
                .map(ToOwned::to_owned);
            collect_fixtures(&entry, category, &name_regex, options.role, &mut chosen)?;
        }
    }

    let mut set = RecordSet::new(options.label.clone(), root.display().to_string());
    for (id, fixture) in chosen {
        let raw = fs::read(&fixture.path)
            .with_context(|| format!("failed to read {}", fixture.path.display()))?;
        let value: Value = serde_json::from_slice(&raw)
            .with_context(|| format!("failed to parse {}", fixture.path.display()))?;
        let Value::Object(record) = value else {
            bail!("{} is not a JSON object", fixture.path.display());
        };

        if let Some(category) = fixture.category {
            set.tag_category(id.clone(), category);
        }
        set.insert(id, record);
    }

    Ok(set)
}

fn collect_fixtures(
    dir: &Path,
    category: Option<String>,
    name_regex: &Regex,
    role: RecordRole,
    chosen: &mut BTreeMap<String, FixtureFile>,
) -> Result<()> {
    for path in read_sorted(dir)? {
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        let Some(captures) = name_regex.captures(name) else {
            continue;
        };
        let Some(rank) = role
            .suffixes()
            .iter()
            .position(|suffix| *suffix == &captures["suffix"])
        else {
            continue;
        };

        let id = captures["id"].to_string();
        match chosen.get(&id) {
            Some(existing) if existing.rank < rank => continue,
            Some(existing) if existing.rank == rank => bail!(
                "record {id} appears twice: {} and {}",
                existing.path.display(),
                path.display()
            ),
            _ => {}
        }
        chosen.insert(
            id,
            FixtureFile {
                path: path.clone(),
                rank,
                category: category.clone(),
            },
        );
    }

    Ok(())
}

fn read_sorted(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = fs::read_dir(dir)
        .with_context(|| format!("failed to read directory {}", dir.display()))?
        .map(|entry| entry.map(|entry| entry.path()))
        .collect::<Result<Vec<PathBuf>, _>>()
        .with_context(|| format!("failed to list directory {}", dir.display()))?;
    paths.sort();
    Ok(paths)
}
