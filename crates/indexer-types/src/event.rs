//! Page-change events and the host slices built from them.
//!
//! Events are written by an upstream producer into spool files, one JSON
//! object per line or as a single JSON array. They are immutable once read.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Maximum number of page ids the content service accepts per request.
pub const MAX_IDS_PER_REQUEST: usize = 15;

/// A page-change event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Page identifier on the target host
    #[serde(rename = "pageId")]
    pub page_id: u64,

    /// Host the page lives on (e.g. "muppet.wikia.com")
    #[serde(rename = "serverName")]
    pub server_name: String,
}

impl Event {
    /// Create a new event.
    pub fn new(page_id: u64, server_name: impl Into<String>) -> Self {
        Self {
            page_id,
            server_name: server_name.into(),
        }
    }

    /// Extract an event from a decoded JSON value.
    ///
    /// Returns `None` when `pageId` is not an unsigned integer or
    /// `serverName` is not a string. Extra fields are ignored.
    pub fn from_value(value: &Value) -> Option<Self> {
        let page_id = value.get("pageId")?.as_u64()?;
        let server_name = value.get("serverName")?.as_str()?;
        Some(Self::new(page_id, server_name))
    }
}

/// A bounded list of page ids for one host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostSlice {
    /// Host the ids belong to
    pub server_name: String,

    /// At most [`MAX_IDS_PER_REQUEST`] page ids, in event order
    pub page_ids: Vec<u64>,
}

impl HostSlice {
    /// Split an ordered id list into request-sized slices.
    pub fn split(server_name: &str, page_ids: &[u64]) -> Vec<HostSlice> {
        page_ids
            .chunks(MAX_IDS_PER_REQUEST)
            .map(|chunk| HostSlice {
                server_name: server_name.to_string(),
                page_ids: chunk.to_vec(),
            })
            .collect()
    }

    /// Ids joined with the content service's `|` delimiter.
    pub fn joined_ids(&self) -> String {
        self.page_ids
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join("|")
    }

    /// Number of ids in this slice.
    pub fn len(&self) -> usize {
        self.page_ids.len()
    }

    /// Whether the slice carries no ids.
    pub fn is_empty(&self) -> bool {
        self.page_ids.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_from_value() {
        let value = json!({"pageId": 7, "serverName": "muppet.wikia.com", "extra": true});
        let event = Event::from_value(&value).unwrap();
        assert_eq!(event.page_id, 7);
        assert_eq!(event.server_name, "muppet.wikia.com");
    }

    #[test]
    fn test_event_from_value_missing_fields() {
        assert!(Event::from_value(&json!({"pageId": 7})).is_none());
        assert!(Event::from_value(&json!({"serverName": "a.wikia.com"})).is_none());
        assert!(Event::from_value(&json!({"pageId": "7", "serverName": "a"})).is_none());
        assert!(Event::from_value(&json!([1, 2])).is_none());
    }

    #[test]
    fn test_event_serde_field_names() {
        let event = Event::new(3, "a.wikia.com");
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"pageId\":3"));
        assert!(json.contains("\"serverName\":\"a.wikia.com\""));
    }

    #[test]
    fn test_split_respects_request_limit() {
        let ids: Vec<u64> = (1..=16).collect();
        let slices = HostSlice::split("a.wikia.com", &ids);
        assert_eq!(slices.len(), 2);
        assert_eq!(slices[0].len(), 15);
        assert_eq!(slices[1].page_ids, vec![16]);

        let flattened: Vec<u64> = slices.iter().flat_map(|s| s.page_ids.clone()).collect();
        assert_eq!(flattened, ids);
    }

    #[test]
    fn test_split_empty() {
        assert!(HostSlice::split("a.wikia.com", &[]).is_empty());
    }

    #[test]
    fn test_joined_ids() {
        let slice = HostSlice {
            server_name: "a.wikia.com".to_string(),
            page_ids: vec![1, 22, 333],
        };
        assert_eq!(slice.joined_ids(), "1|22|333");
    }
}
