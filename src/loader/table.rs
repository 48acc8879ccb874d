use std::iter::Peekable;
use std::path::Path;
use std::str::Chars;

use anyhow::{Context, Result, bail};
use serde_json::{Number, Value};

use super::{LoadOptions, insert_unique};
use crate::model::{Record, RecordSet};
use crate::taxonomy::{FieldKind, Taxonomy, Tier};

pub fn load_csv(path: &Path, options: &LoadOptions<'_>) -> Result<RecordSet> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("failed to open csv {}", path.display()))?;
    let headers = reader
        .headers()
        .with_context(|| format!("failed to read csv header {}", path.display()))?
        .iter()
        .map(|header| header.trim().to_string())
        .collect::<Vec<String>>();

    let Some(id_column) = headers.iter().position(|header| *header == options.id_field) else {
        bail!(
            "csv {} has no '{}' column",
            path.display(),
            options.id_field
        );
    };

    let mut set = RecordSet::new(options.label.clone(), path.display().to_string());
    for (line, row) in reader.records().enumerate() {
        let row = row.with_context(|| format!("failed to read csv row {} in {}", line + 2, path.display()))?;
        let id = row.get(id_column).map(str::trim).unwrap_or_default();
        if id.is_empty() {
            continue;
        }

        let record = headers
            .iter()
            .zip(row.iter())
            .map(|(header, cell)| {
                let value = if *header == options.id_field {
                    Value::String(id.to_string())
                } else {
                    decode_cell(header, cell, options.taxonomy)
                };
                (header.clone(), value)
            })
            .collect::<Record>();
        insert_unique(&mut set, id.to_string(), record)?;
    }

    Ok(set)
}

/// Turns a string-encoded CSV cell into the JSON value its field kind expects.
/// Undecodable cells stay strings so the comparator reports a type mismatch.
pub fn decode_cell(field: &str, cell: &str, taxonomy: &Taxonomy) -> Value {
    let cell = cell.trim();
    let spec = taxonomy.resolve(field);
    let kind = (spec.tier != Tier::Skip).then_some(spec.kind);

    match kind {
        Some(FieldKind::SetOfStrings) if cell.is_empty() => Value::Array(Vec::new()),
        Some(FieldKind::SetOfStrings) => match serde_json::from_str(cell) {
            Ok(Value::Array(items)) => Value::Array(items),
            _ => parse_literal_list(cell)
                .map(|items| Value::Array(items.into_iter().map(Value::String).collect()))
                .unwrap_or_else(|| Value::String(cell.to_string())),
        },
        Some(FieldKind::NestedObject) if cell.is_empty() => Value::Null,
        Some(FieldKind::NestedObject) => {
            serde_json::from_str(cell).unwrap_or_else(|_| Value::String(cell.to_string()))
        }
        Some(FieldKind::NumericTolerant) if cell.is_empty() => Value::Null,
        Some(FieldKind::NumericTolerant) => cell
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(cell.to_string())),
        _ if cell.is_empty() => Value::Null,
        _ => Value::String(cell.to_string()),
    }
}

/// Parses a list of quoted strings as written by a Python `repr`, where each
/// item picks `'` or `"` independently and may contain backslash escapes.
fn parse_literal_list(cell: &str) -> Option<Vec<String>> {
    let mut chars = cell.chars().peekable();
    let mut items = Vec::new();

    skip_whitespace(&mut chars);
    if chars.next()? != '[' {
        return None;
    }

    loop {
        skip_whitespace(&mut chars);
        match chars.next()? {
            ']' => break,
            quote @ ('\'' | '"') => items.push(parse_quoted(&mut chars, quote)?),
            _ => return None,
        }

        skip_whitespace(&mut chars);
        match chars.next()? {
            ',' => {}
            ']' => break,
            _ => return None,
        }
    }

    skip_whitespace(&mut chars);
    chars.next().is_none().then_some(items)
}

fn parse_quoted(chars: &mut Peekable<Chars<'_>>, quote: char) -> Option<String> {
    let mut item = String::new();
    loop {
        match chars.next()? {
            '\\' => item.push(match chars.next()? {
                'n' => '\n',
                't' => '\t',
                'r' => '\r',
                other => other,
            }),
            c if c == quote => return Some(item),
            c => item.push(c),
        }
    }
}

fn skip_whitespace(chars: &mut Peekable<Chars<'_>>) {
    while chars.next_if(|c| c.is_whitespace()).is_some() {}
}

