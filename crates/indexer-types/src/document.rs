//! Search-engine documents produced by the content service.
//!
//! A document is opaque apart from two conventions: a delete carries a
//! nested `delete` object with an `id`, and an add may be stamped with an
//! `indexed` atomic-update field.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field stamped onto add documents when last-indexed tracking is on.
pub const INDEXED_FIELD: &str = "indexed";

/// An opaque search-engine document.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SolrDocument(pub Map<String, Value>);

impl SolrDocument {
    /// Create a document from a JSON object map.
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// The id named by this document's delete directive, if it is a delete.
    pub fn delete_id(&self) -> Option<&Value> {
        self.0.get("delete")?.as_object()?.get("id")
    }

    /// Whether this document is a delete directive.
    pub fn is_delete(&self) -> bool {
        self.delete_id().is_some()
    }

    /// Stamp the `indexed` field as an atomic `set` update.
    pub fn stamp_indexed(&mut self, timestamp: &str) {
        let mut update = Map::new();
        update.insert("set".to_string(), Value::String(timestamp.to_string()));
        self.0.insert(INDEXED_FIELD.to_string(), Value::Object(update));
    }

    /// The stamped `indexed` timestamp, if present.
    pub fn indexed_at(&self) -> Option<&str> {
        self.0.get(INDEXED_FIELD)?.get("set")?.as_str()
    }

    /// Look up a field by name.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }
}

/// A delete forwarded to the search engine: only the id is retained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteDirective {
    pub id: Value,
}

/// Output of processing one host slice.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExtractResult {
    /// Documents to upsert
    pub adds: Vec<SolrDocument>,
    /// Documents to remove
    pub deletes: Vec<DeleteDirective>,
}

impl ExtractResult {
    /// Create an empty result.
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify content-service documents into adds and deletes.
    ///
    /// When `indexed_at` is set every add is stamped with it.
    pub fn classify(contents: Vec<SolrDocument>, indexed_at: Option<&str>) -> Self {
        let mut result = Self::new();
        for mut doc in contents {
            if let Some(id) = doc.delete_id() {
                result.deletes.push(DeleteDirective { id: id.clone() });
                continue;
            }
            if let Some(timestamp) = indexed_at {
                doc.stamp_indexed(timestamp);
            }
            result.adds.push(doc);
        }
        result
    }

    /// Whether this result carries no documents.
    pub fn is_empty(&self) -> bool {
        self.adds.is_empty() && self.deletes.is_empty()
    }
}

/// Format a UTC instant the way the `indexed` field expects it.
pub fn indexed_timestamp(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn doc(value: Value) -> SolrDocument {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_delete_detection() {
        assert!(doc(json!({"delete": {"id": "123_45"}})).is_delete());
        assert!(!doc(json!({"delete": {"query": "*:*"}})).is_delete());
        assert!(!doc(json!({"delete": "123_45"})).is_delete());
        assert!(!doc(json!({"id": "123_45", "title": "Kermit"})).is_delete());
    }

    #[test]
    fn test_classify_with_stamp() {
        let contents = vec![
            doc(json!({"id": "1_1", "title": "Kermit"})),
            doc(json!({"delete": {"id": "1_2"}})),
            doc(json!({"id": "1_3", "title": "Gonzo"})),
        ];
        let result = ExtractResult::classify(contents, Some("2026-10-17T00:00:00.000000Z"));

        assert_eq!(result.adds.len(), 2);
        assert_eq!(result.deletes, vec![DeleteDirective { id: json!("1_2") }]);
        for add in &result.adds {
            assert_eq!(add.indexed_at(), Some("2026-10-17T00:00:00.000000Z"));
        }
    }

    #[test]
    fn test_classify_without_stamp() {
        let contents = vec![doc(json!({"id": "1_1"}))];
        let result = ExtractResult::classify(contents, None);
        assert_eq!(result.adds.len(), 1);
        assert!(result.adds[0].get(INDEXED_FIELD).is_none());
    }

    #[test]
    fn test_stamp_uses_atomic_set() {
        let mut add = doc(json!({"id": "1_1"}));
        add.stamp_indexed("2026-10-17T00:00:00.000000Z");
        assert_eq!(
            serde_json::to_value(&add).unwrap(),
            json!({"id": "1_1", "indexed": {"set": "2026-10-17T00:00:00.000000Z"}})
        );
    }

    #[test]
    fn test_delete_directive_serialization() {
        let directive = DeleteDirective { id: json!("1_2") };
        assert_eq!(serde_json::to_string(&directive).unwrap(), r#"{"id":"1_2"}"#);
    }

    #[test]
    fn test_indexed_timestamp_format() {
        let now = Utc.with_ymd_and_hms(2026, 10, 17, 8, 30, 5).unwrap();
        assert_eq!(indexed_timestamp(now), "2026-10-17T08:30:05.000000Z");
    }
}
