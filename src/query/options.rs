//! Fetch options

use serde::{Deserialize, Serialize};

use super::sorter::SortSpec;

/// Shaping applied to matched documents, in this order: sort, skip,
/// limit, one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchOptions {
    /// Order by a property instead of catalog order
    pub sort: Option<SortSpec>,
    /// Matches to drop from the front
    pub skip: usize,
    /// Maximum matches to return
    pub limit: Option<usize>,
    /// Return the first match alone
    pub one: bool,
    /// Skip uncached documents too large to cache instead of reading them
    pub shallow: bool,
    /// Count matches without returning them
    pub count: bool,
}

impl FetchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn asc(mut self, property: impl Into<String>) -> Self {
        self.sort = Some(SortSpec::asc(property));
        self
    }

    pub fn desc(mut self, property: impl Into<String>) -> Self {
        self.sort = Some(SortSpec::desc(property));
        self
    }

    pub fn skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Implies a limit of one.
    pub fn one(mut self) -> Self {
        self.one = true;
        self.limit = Some(1);
        self
    }

    pub fn shallow(mut self) -> Self {
        self.shallow = true;
        self
    }

    pub fn count(mut self) -> Self {
        self.count = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::SortOrder;

    #[test]
    fn test_builder() {
        let options = FetchOptions::new().desc("num").skip(1).limit(2);
        let sort = options.sort.clone().unwrap();
        assert_eq!(sort.property, "num");
        assert_eq!(sort.order, SortOrder::Desc);
        assert_eq!(options.skip, 1);
        assert_eq!(options.limit, Some(2));
        assert!(!options.one);
    }

    #[test]
    fn test_one_implies_limit() {
        let options = FetchOptions::new().limit(10).one();
        assert!(options.one);
        assert_eq!(options.limit, Some(1));
    }

    #[test]
    fn test_deserialize_partial() {
        let options: FetchOptions =
            serde_json::from_str(r#"{"sort": {"property": "age", "order": "asc"}, "shallow": true}"#)
                .unwrap();
        assert!(options.shallow);
        assert_eq!(options.sort, Some(SortSpec::asc("age")));
        assert_eq!(options.limit, None);
    }
}
