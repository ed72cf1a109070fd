//! Raw record → [`PaperRevision`].
//!
//! The feed delivers the category field as either a single label or a list
//! of labels. Both normalize to a deduplicated set. A record with no
//! categories at all is rejected rather than stored with an empty set,
//! since every record in a harvested set belongs to at least that set.

use serde_json::Value;

use crate::error::NormalizeError;
use crate::models::{parse_date, CategorySet, PaperRevision, RawRecord};

/// Validate and canonicalize a raw record.
///
/// The payload is carried through unmodified.
pub fn normalize(raw: &RawRecord) -> Result<PaperRevision, NormalizeError> {
    let paper_id = raw
        .identifier
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or(NormalizeError::MissingIdentifier)?
        .to_string();

    let date_str = raw
        .datestamp
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .ok_or_else(|| NormalizeError::MissingDate {
            paper_id: paper_id.clone(),
        })?;
    let revision_date = parse_date(date_str).ok_or_else(|| NormalizeError::InvalidDate {
        paper_id: paper_id.clone(),
        value: date_str.to_string(),
    })?;

    let categories =
        normalize_categories(&raw.categories).map_err(|detail| NormalizeError::InvalidCategories {
            paper_id: paper_id.clone(),
            detail,
        })?;

    Ok(PaperRevision {
        paper_id,
        revision_date,
        categories,
        payload: raw.metadata.clone(),
    })
}

fn normalize_categories(value: &Value) -> Result<CategorySet, String> {
    let mut set = CategorySet::new();
    match value {
        Value::String(label) => {
            set.insert(category_label(label)?);
        }
        Value::Array(items) => {
            for item in items {
                match item {
                    Value::String(label) => {
                        set.insert(category_label(label)?);
                    }
                    other => return Err(format!("expected a string label, got {}", kind(other))),
                }
            }
        }
        other => {
            return Err(format!(
                "expected a label or a list of labels, got {}",
                kind(other)
            ))
        }
    }
    if set.is_empty() {
        return Err("no category labels".to_string());
    }
    Ok(set)
}

fn category_label(label: &str) -> Result<String, String> {
    let label = label.trim();
    if label.is_empty() {
        return Err("empty category label".to_string());
    }
    Ok(label.to_string())
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}
