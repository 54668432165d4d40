//! Fetch results

use crate::document::Document;

/// Result of a fetch.
///
/// A query that matches nothing yields `NoRecords` rather than an error or
/// an empty `Many`, so callers can tell it apart from a failed lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// Matched documents in result order
    Many(Vec<Document>),
    /// First match, when `one` was requested
    One(Document),
    /// Number of matches, when `count` was requested
    Count(usize),
    /// Nothing matched
    NoRecords,
}

impl FetchOutcome {
    /// Returns true if nothing matched
    pub fn is_empty(&self) -> bool {
        matches!(self, FetchOutcome::NoRecords)
    }

    /// Number of documents matched or returned
    pub fn len(&self) -> usize {
        match self {
            FetchOutcome::Many(docs) => docs.len(),
            FetchOutcome::One(_) => 1,
            FetchOutcome::Count(n) => *n,
            FetchOutcome::NoRecords => 0,
        }
    }

    /// Returned documents; empty for counts and `NoRecords`.
    pub fn into_documents(self) -> Vec<Document> {
        match self {
            FetchOutcome::Many(docs) => docs,
            FetchOutcome::One(doc) => vec![doc],
            FetchOutcome::Count(_) | FetchOutcome::NoRecords => Vec::new(),
        }
    }

    /// The single document of a `one` fetch, or the first of many.
    pub fn into_first(self) -> Option<Document> {
        self.into_documents().into_iter().next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_accessors() {
        let doc = json!({"a": 1}).as_object().cloned().unwrap();
        let many = FetchOutcome::Many(vec![doc.clone(), doc.clone()]);
        assert_eq!(many.len(), 2);
        assert!(!many.is_empty());
        assert_eq!(FetchOutcome::One(doc.clone()).into_first(), Some(doc));
        assert_eq!(FetchOutcome::Count(4).len(), 4);
        assert!(FetchOutcome::Count(4).into_documents().is_empty());
        assert!(FetchOutcome::NoRecords.is_empty());
    }
}
