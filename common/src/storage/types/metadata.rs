use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Metadata attached to a source file and copied onto every chunk derived from it.
pub type Metadata = BTreeMap<String, Value>;

/// Every metadata key currently present in the ledger, mapped to the distinct
/// values seen for it.
pub type MetadataCatalogue = BTreeMap<String, Vec<Value>>;

/// Reserved metadata key under which the ledger stores chunk identifiers.
pub const IDS_KEY: &str = "ids";

/// Metadata key recording the ledger key of the file a chunk came from.
pub const FILENAME_KEY: &str = "filename";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterClause {
    #[serde(rename = "$in", default)]
    pub allowed: Vec<Value>,
}

impl FilterClause {
    pub fn new(allowed: Vec<Value>) -> Self {
        Self { allowed }
    }

    pub fn is_empty(&self) -> bool {
        self.allowed.is_empty()
    }

    pub fn admits(&self, value: &Value) -> bool {
        self.allowed.iter().any(|allowed| allowed == value)
    }
}

/// Whitelist filter over metadata, persisted as `{ key: { "$in": [...] } }`.
///
/// A clause with an empty whitelist behaves exactly as if the key were absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetadataFilter(pub BTreeMap<String, FilterClause>);

impl MetadataFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_clause(mut self, key: impl Into<String>, allowed: Vec<Value>) -> Self {
        self.0.insert(key.into(), FilterClause::new(allowed));
        self
    }

    /// Clauses that actually constrain something.
    pub fn active_clauses(&self) -> impl Iterator<Item = (&String, &FilterClause)> {
        self.0
            .iter()
            .filter(|(key, clause)| key.as_str() != IDS_KEY && !clause.is_empty())
    }

    pub fn is_unconstrained(&self) -> bool {
        self.active_clauses().next().is_none()
    }

    /// An entry matches iff every constrained key it carries holds a whitelisted value.
    pub fn matches(&self, metadata: &Metadata) -> bool {
        self.active_clauses().all(|(key, clause)| {
            metadata
                .get(key)
                .is_none_or(|value| clause.admits(value))
        })
    }

    /// Drops empty clauses and the reserved `ids` key.
    pub fn normalized(&self) -> Self {
        Self(
            self.active_clauses()
                .map(|(key, clause)| (key.clone(), clause.clone()))
                .collect(),
        )
    }

    /// Keeps only whitelisted values still present in `catalogue`, dropping
    /// clauses that end up empty.
    pub fn pruned(&self, catalogue: &MetadataCatalogue) -> Self {
        let mut pruned = BTreeMap::new();
        for (key, clause) in self.active_clauses() {
            let Some(present) = catalogue.get(key) else {
                continue;
            };
            let allowed: Vec<Value> = clause
                .allowed
                .iter()
                .filter(|value| present.contains(value))
                .cloned()
                .collect();
            if !allowed.is_empty() {
                pruned.insert(key.clone(), FilterClause::new(allowed));
            }
        }
        Self(pruned)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn metadata(pairs: &[(&str, Value)]) -> Metadata {
        pairs
            .iter()
            .map(|(key, value)| ((*key).to_string(), value.clone()))
            .collect()
    }

    #[test]
    fn filter_parses_in_clauses() {
        let filter: MetadataFilter =
            serde_json::from_value(json!({"year": {"$in": ["2024"]}, "team": {"$in": []}}))
                .unwrap();

        assert_eq!(filter.0.len(), 2);
        assert_eq!(filter.normalized().0.len(), 1);
        assert_eq!(
            serde_json::to_value(&filter.normalized()).unwrap(),
            json!({"year": {"$in": ["2024"]}})
        );
    }

    #[test]
    fn unconstrained_keys_pass() {
        let filter = MetadataFilter::new().with_clause("year", vec![json!("2024")]);

        assert!(filter.matches(&metadata(&[("year", json!("2024")), ("team", json!("a"))])));
        assert!(filter.matches(&metadata(&[("team", json!("a"))])));
        assert!(!filter.matches(&metadata(&[("year", json!("2023"))])));
    }

    #[test]
    fn empty_whitelist_is_the_same_as_absent() {
        let filter = MetadataFilter::new().with_clause("year", Vec::new());

        assert!(filter.is_unconstrained());
        assert!(filter.matches(&metadata(&[("year", json!("1999"))])));
    }

    #[test]
    fn pruning_drops_stale_values_and_keys() {
        let filter = MetadataFilter::new()
            .with_clause("year", vec![json!("2023"), json!("2024")])
            .with_clause("team", vec![json!("gone")])
            .with_clause("region", vec![json!("eu")]);
        let catalogue: MetadataCatalogue = [
            ("year".to_string(), vec![json!("2024")]),
            ("team".to_string(), vec![json!("alpha")]),
        ]
        .into_iter()
        .collect();

        let pruned = filter.pruned(&catalogue);

        assert_eq!(
            pruned,
            MetadataFilter::new().with_clause("year", vec![json!("2024")])
        );
    }
}
