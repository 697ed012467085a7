//! Named SQL texts shared by every job of one configuration document.

use std::collections::BTreeMap;

/// Mapping from query name to raw SQL text.
///
/// Built once per load and never mutated afterwards. Keys are case-sensitive
/// and iterate in sorted order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryCatalog {
    entries: BTreeMap<String, String>,
}

impl QueryCatalog {
    pub fn new(entries: BTreeMap<String, String>) -> Self {
        Self { entries }
    }

    /// Returns the SQL text registered under `name`.
    pub fn resolve(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over `(name, sql)` pairs in sorted name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl FromIterator<(String, String)> for QueryCatalog {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_is_case_sensitive() {
        let catalog: QueryCatalog = [("Uptime".to_string(), "select 1".to_string())]
            .into_iter()
            .collect();
        assert_eq!(catalog.resolve("Uptime"), Some("select 1"));
        assert_eq!(catalog.resolve("uptime"), None);
    }

    #[test]
    fn iter_is_sorted() {
        let catalog: QueryCatalog = [
            ("zeta".to_string(), "select 3".to_string()),
            ("alpha".to_string(), "select 1".to_string()),
            ("mid".to_string(), "select 2".to_string()),
        ]
        .into_iter()
        .collect();
        let names: Vec<&str> = catalog.iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["alpha", "mid", "zeta"]);
        assert_eq!(catalog.len(), 3);
    }
}
