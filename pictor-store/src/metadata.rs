use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Persistent record stored next to the cached bytes: JSON sidecar on the
/// filesystem backend, string-valued custom metadata on the object store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageMetadata {
    pub original_url: String,
    pub content_type: String,
    pub original_size: u64,
    pub cached_size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_id: Option<String>,
    pub cached_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    #[serde(default)]
    pub access_count: u64,
}

impl ImageMetadata {
    /// Record a read. Callers persist the result best-effort; a failed
    /// write-back must never fail the read itself.
    pub fn touch(&mut self) {
        self.last_accessed_at = Utc::now();
        self.access_count += 1;
    }

    /// Flatten into the string-valued custom metadata an object store accepts.
    pub fn to_object_metadata(&self) -> HashMap<String, String> {
        let mut map = HashMap::new();
        map.insert("x-original-url".to_string(), self.original_url.clone());
        map.insert("x-content-type".to_string(), self.content_type.clone());
        map.insert("x-original-size".to_string(), self.original_size.to_string());
        map.insert("x-cached-size".to_string(), self.cached_size.to_string());
        if let Some(w) = self.width {
            map.insert("x-width".to_string(), w.to_string());
        }
        if let Some(h) = self.height {
            map.insert("x-height".to_string(), h.to_string());
        }
        if let Some(ws) = &self.workspace_id {
            map.insert("x-workspace-id".to_string(), ws.clone());
        }
        if let Some(b) = &self.block_id {
            map.insert("x-block-id".to_string(), b.clone());
        }
        map.insert("x-cached-at".to_string(), self.cached_at.to_rfc3339());
        map.insert("x-access-count".to_string(), self.access_count.to_string());
        map
    }

    /// Rehydrate from object-store custom metadata. Tolerant of missing or
    /// malformed fields so a hand-uploaded object still reads back.
    pub fn from_object_metadata(map: &HashMap<String, String>) -> Self {
        let now = Utc::now();
        let get = |k: &str| map.get(k).cloned();
        let parse_u64 = |k: &str| get(k).and_then(|v| v.parse::<u64>().ok()).unwrap_or(0);
        let cached_at = get("x-cached-at")
            .and_then(|v| DateTime::parse_from_rfc3339(&v).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or(now);
        Self {
            original_url: get("x-original-url").unwrap_or_default(),
            content_type: get("x-content-type").unwrap_or_default(),
            original_size: parse_u64("x-original-size"),
            cached_size: parse_u64("x-cached-size"),
            width: get("x-width").and_then(|v| v.parse().ok()),
            height: get("x-height").and_then(|v| v.parse().ok()),
            workspace_id: get("x-workspace-id"),
            block_id: get("x-block-id"),
            cached_at,
            last_accessed_at: cached_at,
            access_count: parse_u64("x-access-count"),
        }
    }
}
