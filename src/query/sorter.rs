//! Result ordering by a named property
//!
//! Documents without the property, or holding null, are left out of
//! sorted results. If the first document's value is a number, values are
//! compared numerically; otherwise by the lowercase first character of
//! their text. The sort is stable in both directions, so ties keep
//! catalog order, which is the order keys were first written.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::document::Document;

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

/// Sort by one property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub property: String,
    pub order: SortOrder,
}

impl SortSpec {
    pub fn asc(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            order: SortOrder::Asc,
        }
    }

    pub fn desc(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            order: SortOrder::Desc,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum SortKey {
    Number(f64),
    Text(Option<char>),
}

impl SortKey {
    fn of(value: &Value, numeric: bool) -> Self {
        match value.as_f64() {
            Some(n) if numeric => SortKey::Number(n),
            _ => SortKey::Text(first_char(value)),
        }
    }

    fn compare(&self, other: &Self) -> Ordering {
        match (self, other) {
            (SortKey::Number(a), SortKey::Number(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
            (SortKey::Text(a), SortKey::Text(b)) => a.cmp(b),
            (SortKey::Number(_), SortKey::Text(_)) => Ordering::Less,
            (SortKey::Text(_), SortKey::Number(_)) => Ordering::Greater,
        }
    }
}

fn first_char(value: &Value) -> Option<char> {
    let text = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    text.chars().flat_map(char::to_lowercase).next()
}

/// Sorts documents by a property.
pub struct DocumentSorter;

impl DocumentSorter {
    /// Orders `documents` by `spec`, dropping those the property is
    /// missing or null in.
    pub fn sort(documents: Vec<Document>, spec: &SortSpec) -> Vec<Document> {
        let mut numeric = None;
        let mut keyed: Vec<(SortKey, Document)> = documents
            .into_iter()
            .filter_map(|doc| {
                let value = match doc.get(&spec.property) {
                    None | Some(Value::Null) => return None,
                    Some(value) => value,
                };
                let numeric = *numeric.get_or_insert_with(|| value.is_number());
                Some((SortKey::of(value, numeric), doc))
            })
            .collect();

        keyed.sort_by(|(a, _), (b, _)| {
            let ordering = a.compare(b);
            match spec.order {
                SortOrder::Asc => ordering,
                SortOrder::Desc => ordering.reverse(),
            }
        });
        keyed.into_iter().map(|(_, doc)| doc).collect()
    }
}
