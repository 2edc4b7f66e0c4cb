//! # Documents
//!
//! In-memory representation of raw and consolidated documents, and the
//! [`DocumentClass`] descriptors that say where each class is stored.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};

use crate::store::{DocumentRef, StoredDocument, VersionToken};

/// How a class spreads its documents over storage locations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Partitioning {
    /// One location named after the prefix
    Static,
    /// `{prefix}-{YYYY-MM}` from the given date-time field
    Monthly { field: &'static str },
}

/// Storage descriptor of a document class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocumentClass {
    pub name: &'static str,
    pub location_prefix: &'static str,
    pub partitioning: Partitioning,
}

impl DocumentClass {
    pub const fn monthly(name: &'static str, location_prefix: &'static str, field: &'static str) -> Self {
        Self {
            name,
            location_prefix,
            partitioning: Partitioning::Monthly { field },
        }
    }

    pub const fn fixed(name: &'static str, location_prefix: &'static str) -> Self {
        Self {
            name,
            location_prefix,
            partitioning: Partitioning::Static,
        }
    }

    /// Pattern matching every location of this class
    pub fn search_pattern(&self) -> String {
        match self.partitioning {
            Partitioning::Static => self.location_prefix.to_string(),
            Partitioning::Monthly { .. } => format!("{}-*", self.location_prefix),
        }
    }

    /// Physical location for a document body
    ///
    /// Monthly classes fall back to the undated `{prefix}-undated` location
    /// when the partition field is absent.
    pub fn location_for(&self, body: &Map<String, Value>) -> String {
        match self.partitioning {
            Partitioning::Static => self.location_prefix.to_string(),
            Partitioning::Monthly { field } => match body.get(field).and_then(parse_datetime) {
                Some(at) => partition_location(self.location_prefix, at),
                None => format!("{}-undated", self.location_prefix),
            },
        }
    }
}

/// `"{prefix}-{YYYY-MM}"`
pub fn partition_location(prefix: &str, at: DateTime<Utc>) -> String {
    format!("{prefix}-{}", at.format("%Y-%m"))
}

pub fn parse_datetime(value: &Value) -> Option<DateTime<Utc>> {
    value
        .as_str()
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

pub fn format_datetime(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub class: String,
    pub id: String,
    pub location: String,
    /// `None` until the document has been read from or written to the store
    pub version: Option<VersionToken>,
    pub body: Map<String, Value>,
}

impl Document {
    pub fn new(class: impl Into<String>, id: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            id: id.into(),
            location: location.into(),
            version: None,
            body: Map::new(),
        }
    }

    pub fn from_stored(class: impl Into<String>, stored: StoredDocument) -> Self {
        Self {
            class: class.into(),
            id: stored.id,
            location: stored.location,
            version: Some(stored.version),
            body: stored.body,
        }
    }

    pub fn with_body(mut self, body: Map<String, Value>) -> Self {
        self.body = body;
        self
    }

    pub fn document_ref(&self) -> DocumentRef {
        DocumentRef::new(self.location.clone(), self.id.clone())
    }

    pub fn is_new(&self) -> bool {
        self.version.is_none()
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.body.get(field)
    }

    pub fn str_field(&self, field: &str) -> Option<&str> {
        self.body.get(field).and_then(Value::as_str)
    }

    pub fn i64_field(&self, field: &str) -> Option<i64> {
        self.body.get(field).and_then(Value::as_i64)
    }

    pub fn datetime_field(&self, field: &str) -> Option<DateTime<Utc>> {
        self.body.get(field).and_then(parse_datetime)
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.body.insert(field.into(), value.into());
    }

    pub fn set_datetime(&mut self, field: impl Into<String>, at: DateTime<Utc>) {
        self.body.insert(field.into(), Value::String(format_datetime(at)));
    }

    /// Set only when the field is absent
    pub fn set_default(&mut self, field: &str, value: impl Into<Value>) {
        if !self.body.contains_key(field) {
            self.body.insert(field.to_string(), value.into());
        }
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.body.remove(field)
    }

    /// Pre-transform copy of the body used for no-op detection
    pub fn snapshot(&self) -> Map<String, Value> {
        self.body.clone()
    }

    /// True when every field of the current body exists unchanged in `snapshot`
    ///
    /// A transform that only re-asserts known values leaves the document
    /// unchanged, so the write (and its version bump and downstream report) is
    /// skipped.
    pub fn is_unchanged_since(&self, snapshot: &Map<String, Value>) -> bool {
        is_superset(snapshot, &self.body)
    }
}

/// `superset` contains every key of `subset` with an equal value
pub fn is_superset(superset: &Map<String, Value>, subset: &Map<String, Value>) -> bool {
    subset.iter().all(|(key, value)| superset.get(key) == Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    const PRODUCT: DocumentClass = DocumentClass::monthly("product", "product", "content_date_start");

    #[test]
    fn test_monthly_partition_location() {
        let body = json!({"content_date_start": "2024-03-05T10:00:00Z"});
        assert_eq!(PRODUCT.location_for(body.as_object().unwrap()), "product-2024-03");
        assert_eq!(PRODUCT.location_for(&Map::new()), "product-undated");
        assert_eq!(PRODUCT.search_pattern(), "product-*");

        let fixed = DocumentClass::fixed("orbit-placeholder", "orbit-placeholder");
        assert_eq!(fixed.location_for(&Map::new()), "orbit-placeholder");
        assert_eq!(fixed.search_pattern(), "orbit-placeholder");
    }

    #[test]
    fn test_datetime_round_trip_through_body() {
        let at = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let mut doc = Document::new("product", "id", "product-2024-01");
        doc.set_datetime("content_date_start", at);
        assert_eq!(doc.datetime_field("content_date_start"), Some(at));
        assert_eq!(doc.str_field("content_date_start"), Some("2024-01-02T03:04:05.000000Z"));
    }

    #[test]
    fn test_unchanged_detection() {
        let mut doc = Document::new("product", "id", "loc");
        doc.set("name", "a");
        doc.set("size", 10);
        let snapshot = doc.snapshot();

        doc.set("size", 10);
        assert!(doc.is_unchanged_since(&snapshot));

        doc.set("size", 11);
        assert!(!doc.is_unchanged_since(&snapshot));

        doc.set("size", 10);
        doc.set("new_field", true);
        assert!(!doc.is_unchanged_since(&snapshot));
    }

    #[test]
    fn test_set_default_keeps_existing() {
        let mut doc = Document::new("product", "id", "loc");
        doc.set("mission", "S1");
        doc.set_default("mission", "S2");
        doc.set_default("satellite_unit", "S1A");
        assert_eq!(doc.str_field("mission"), Some("S1"));
        assert_eq!(doc.str_field("satellite_unit"), Some("S1A"));
    }
}
