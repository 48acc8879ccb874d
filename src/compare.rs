use std::collections::BTreeSet;

use serde::Serialize;
use serde_json::Value;

use crate::taxonomy::{FieldKind, FieldSpec};

const TOLERANCE_SLACK: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SetBreakdown {
    pub missing: Vec<String>,
    pub extra: Vec<String>,
    pub shared: usize,
    pub expected_len: usize,
    pub actual_len: usize,
}

impl SetBreakdown {
    pub fn precision(&self) -> f64 {
        if self.actual_len == 0 {
            1.0
        } else {
            self.shared as f64 / self.actual_len as f64
        }
    }

    pub fn recall(&self) -> f64 {
        if self.expected_len == 0 {
            1.0
        } else {
            self.shared as f64 / self.expected_len as f64
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Comparison {
    pub matched: bool,
    pub score: f64,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub set: Option<SetBreakdown>,
}

impl Comparison {
    fn exact(matched: bool, detail: String) -> Self {
        Self {
            matched,
            score: if matched { 1.0 } else { 0.0 },
            detail,
            set: None,
        }
    }
}

pub fn compare_field(spec: &FieldSpec, expected: Option<&Value>, actual: Option<&Value>) -> Comparison {
    match spec.kind {
        FieldKind::Scalar => compare_scalar(expected, actual),
        FieldKind::SetOfStrings => compare_sets(expected, actual),
        FieldKind::NumericTolerant => compare_numeric(expected, actual, spec.tolerance()),
        FieldKind::NestedObject => compare_nested(expected, actual),
    }
}

pub fn compare_scalar(expected: Option<&Value>, actual: Option<&Value>) -> Comparison {
    let expected = expected.unwrap_or(&Value::Null);
    let actual = actual.unwrap_or(&Value::Null);

    if values_equal(expected, actual) {
        return Comparison::exact(true, "match".to_string());
    }

    let mut detail = format!(
        "expected: {}, actual: {}",
        display_value(Some(expected)),
        display_value(Some(actual))
    );
    if !expected.is_null() && !actual.is_null() && type_name(expected) != type_name(actual) {
        detail.push_str(&format!(
            " (type mismatch: {} vs {})",
            type_name(expected),
            type_name(actual)
        ));
    }
    Comparison::exact(false, detail)
}

pub fn compare_sets(expected: Option<&Value>, actual: Option<&Value>) -> Comparison {
    let expected_items = match string_set(expected) {
        Ok(items) => items,
        Err(found) => return set_type_mismatch("expected", found),
    };
    let actual_items = match string_set(actual) {
        Ok(items) => items,
        Err(found) => return set_type_mismatch("actual", found),
    };

    let missing = expected_items
        .difference(&actual_items)
        .cloned()
        .collect::<Vec<String>>();
    let extra = actual_items
        .difference(&expected_items)
        .cloned()
        .collect::<Vec<String>>();
    let shared = expected_items.intersection(&actual_items).count();
    let union = expected_items.len() + actual_items.len() - shared;

    let score = if union == 0 {
        1.0
    } else {
        shared as f64 / union as f64
    };
    let matched = missing.is_empty() && extra.is_empty();

    let detail = if union == 0 {
        "both empty".to_string()
    } else if matched {
        "exact match".to_string()
    } else if actual_items.is_empty() {
        format!("missing: {} (actual empty)", format_items(&missing))
    } else if expected_items.is_empty() {
        format!("extra: {} (expected empty)", format_items(&extra))
    } else {
        let mut parts = Vec::<String>::new();
        if !missing.is_empty() {
            parts.push(format!("missing: {}", format_items(&missing)));
        }
        if !extra.is_empty() {
            parts.push(format!("extra: {}", format_items(&extra)));
        }
        parts.push(format!("jaccard {score:.3}"));
        parts.join("; ")
    };

    Comparison {
        matched,
        score,
        detail,
        set: Some(SetBreakdown {
            missing,
            extra,
            shared,
            expected_len: expected_items.len(),
            actual_len: actual_items.len(),
        }),
    }
}

pub fn compare_numeric(expected: Option<&Value>, actual: Option<&Value>, tolerance: f64) -> Comparison {
    let (Some(expected_number), Some(actual_number)) = (
        expected.and_then(Value::as_f64),
        actual.and_then(Value::as_f64),
    ) else {
        return compare_scalar(expected, actual);
    };

    let diff = (expected_number - actual_number).abs();
    if diff == 0.0 {
        return Comparison::exact(true, "match".to_string());
    }
    if diff <= tolerance + TOLERANCE_SLACK {
        return Comparison::exact(
            true,
            format!("within tolerance (diff {diff:.3} <= {tolerance:.3})"),
        );
    }

    Comparison::exact(
        false,
        format!(
            "expected: {expected_number}, actual: {actual_number}, diff {diff:.3} exceeds {tolerance:.3}"
        ),
    )
}

pub fn compare_nested(expected: Option<&Value>, actual: Option<&Value>) -> Comparison {
    let expected = expected.unwrap_or(&Value::Null);
    let actual = actual.unwrap_or(&Value::Null);

    match first_difference(expected, actual, "$") {
        None => Comparison::exact(true, "match".to_string()),
        Some(path) => Comparison::exact(false, format!("nested value differs at {path}")),
    }
}

/// JSON equality where numbers compare by value, so `1` equals `1.0`.
pub fn values_equal(left: &Value, right: &Value) -> bool {
    first_difference(left, right, "").is_none()
}

fn first_difference(left: &Value, right: &Value, path: &str) -> Option<String> {
    match (left, right) {
        (Value::Number(left), Value::Number(right)) => {
            let equal = match (left.as_i64(), right.as_i64()) {
                (Some(left), Some(right)) => left == right,
                _ => left.as_f64() == right.as_f64(),
            };
            (!equal).then(|| path.to_string())
        }
        (Value::Array(left), Value::Array(right)) => {
            if left.len() != right.len() {
                return Some(format!("{path} (length {} vs {})", left.len(), right.len()));
            }
            left.iter()
                .zip(right.iter())
                .enumerate()
                .find_map(|(index, (left, right))| {
                    first_difference(left, right, &format!("{path}[{index}]"))
                })
        }
        (Value::Object(left), Value::Object(right)) => {
            let keys = left
                .keys()
                .chain(right.keys())
                .collect::<BTreeSet<&String>>();
            keys.into_iter().find_map(|key| {
                let child = format!("{path}.{key}");
                match (left.get(key), right.get(key)) {
                    (Some(left), Some(right)) => first_difference(left, right, &child),
                    _ => Some(child),
                }
            })
        }
        _ => (left != right).then(|| path.to_string()),
    }
}

pub fn display_value(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => "null".to_string(),
        Some(Value::String(text)) => text.clone(),
        Some(Value::Array(items)) if items.iter().all(Value::is_string) => format_items(
            &items
                .iter()
                .filter_map(Value::as_str)
                .map(ToOwned::to_owned)
                .collect::<Vec<String>>(),
        ),
        Some(other) => other.to_string(),
    }
}

fn format_items(items: &[String]) -> String {
    format!("[{}]", items.join(", "))
}

fn string_set(value: Option<&Value>) -> Result<BTreeSet<String>, &'static str> {
    match value {
        None | Some(Value::Null) => Ok(BTreeSet::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(ToOwned::to_owned)
                    .ok_or("list with non-string items")
            })
            .collect(),
        Some(other) => Err(type_name(other)),
    }
}

fn set_type_mismatch(side: &str, found: &str) -> Comparison {
    Comparison::exact(
        false,
        format!("type mismatch: {side} value is {found}, wanted a list of strings"),
    )
}

pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn scalar_never_coerces_between_types() {
        let result = compare_scalar(Some(&json!("1")), Some(&json!(1)));
        assert!(!result.matched);
        assert_eq!(result.score, 0.0);
        assert!(result.detail.contains("type mismatch"), "{}", result.detail);

        assert!(compare_scalar(None, Some(&Value::Null)).matched);
        assert!(compare_scalar(Some(&json!(1)), Some(&json!(1.0))).matched);
        assert!(!compare_scalar(Some(&json!("relevant")), None).matched);
    }

    #[test]
    fn sets_ignore_order_and_duplicates() {
        let result = compare_sets(
            Some(&json!(["crisis", "adverse_event", "crisis"])),
            Some(&json!(["adverse_event", "crisis"])),
        );
        assert!(result.matched);
        assert_eq!(result.score, 1.0);
        assert_eq!(result.detail, "exact match");
    }

    #[test]
    fn both_empty_sets_match_and_absent_counts_as_empty() {
        let result = compare_sets(Some(&json!([])), None);
        assert!(result.matched);
        assert_eq!(result.score, 1.0);
        assert_eq!(result.detail, "both empty");
    }

    #[test]
    fn one_empty_side_lists_the_other_side() {
        let result = compare_sets(Some(&json!(["crisis"])), Some(&json!([])));
        assert!(!result.matched);
        assert_eq!(result.score, 0.0);
        assert_eq!(result.detail, "missing: [crisis] (actual empty)");

        let reversed = compare_sets(None, Some(&json!(["crisis"])));
        assert_eq!(reversed.detail, "extra: [crisis] (expected empty)");
        assert_eq!(
            reversed.set.expect("breakdown").extra,
            vec!["crisis".to_string()]
        );
    }

    #[test]
    fn jaccard_is_symmetric_and_bounded() {
        let left = json!(["a", "b", "c"]);
        let right = json!(["b", "c", "d", "e"]);

        let forward = compare_sets(Some(&left), Some(&right));
        let backward = compare_sets(Some(&right), Some(&left));

        assert_eq!(forward.score, backward.score);
        assert!((forward.score - 0.4).abs() < 1e-12);
        assert!((0.0..=1.0).contains(&forward.score));

        let breakdown = forward.set.expect("breakdown");
        assert_eq!(breakdown.missing, vec!["a".to_string()]);
        assert_eq!(breakdown.extra, vec!["d".to_string(), "e".to_string()]);
        assert_eq!(breakdown.shared, 2);
        assert!((breakdown.precision() - 0.5).abs() < 1e-12);
        assert!((breakdown.recall() - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn set_score_is_one_only_without_missing_or_extra() {
        let cases = [
            (json!(["a"]), json!(["a"])),
            (json!(["a"]), json!(["a", "b"])),
            (json!(["a", "b"]), json!(["a"])),
            (json!(["x"]), json!(["y"])),
        ];
        for (expected, actual) in cases {
            let result = compare_sets(Some(&expected), Some(&actual));
            let breakdown = result.set.clone().expect("breakdown");
            let clean = breakdown.missing.is_empty() && breakdown.extra.is_empty();
            assert_eq!(result.score == 1.0, clean, "{expected} vs {actual}");
        }

        let same = json!(["diabetes", "surgery"]);
        assert_eq!(compare_sets(Some(&same), Some(&same)).score, 1.0);
    }

    #[test]
    fn set_field_holding_a_string_is_a_type_mismatch() {
        let result = compare_sets(Some(&json!(["crisis"])), Some(&json!("crisis")));
        assert!(!result.matched);
        assert_eq!(result.score, 0.0);
        assert!(result.set.is_none());
        assert_eq!(
            result.detail,
            "type mismatch: actual value is string, wanted a list of strings"
        );
    }

    #[test]
    fn numeric_tolerance_is_inclusive() {
        assert!(compare_numeric(Some(&json!(10)), Some(&json!(10.1)), 0.15).matched);
        assert!(compare_numeric(Some(&json!(0.85)), Some(&json!(0.70)), 0.15).matched);

        let outside = compare_numeric(Some(&json!(0.9)), Some(&json!(0.5)), 0.15);
        assert!(!outside.matched);
        assert_eq!(outside.score, 0.0);
    }

    #[test]
    fn numeric_widens_scalar() {
        let pairs = [
            (json!(0.5), json!(0.5)),
            (json!(3), json!(3.0)),
            (json!("high"), json!("high")),
            (Value::Null, Value::Null),
            (json!("high"), json!("low")),
            (json!("1"), json!(1)),
        ];
        for (expected, actual) in pairs {
            let scalar = compare_scalar(Some(&expected), Some(&actual));
            let numeric = compare_numeric(Some(&expected), Some(&actual), 0.1);
            if scalar.matched {
                assert!(numeric.matched, "{expected} vs {actual}");
            }
        }

        assert!(!compare_numeric(Some(&json!("0.5")), Some(&json!(0.5)), 1.0).matched);
    }

    #[test]
    fn nested_objects_compare_structurally_without_partial_credit() {
        let expected = json!({"likes": 10, "shares": {"count": 2}});
        let same = json!({"shares": {"count": 2.0}, "likes": 10});
        let different = json!({"likes": 10, "shares": {"count": 3}});

        assert!(compare_nested(Some(&expected), Some(&same)).matched);

        let result = compare_nested(Some(&expected), Some(&different));
        assert!(!result.matched);
        assert_eq!(result.score, 0.0);
        assert_eq!(result.detail, "nested value differs at $.shares.count");
    }
}
