//! # Store Types
//!
//! Bulk actions, per-item outcomes and search queries shared by every
//! [`DocumentStore`](super::DocumentStore) backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Optimistic-concurrency token read at load time and asserted at write time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionToken {
    pub seq_no: i64,
    pub primary_term: i64,
}

impl VersionToken {
    pub fn new(seq_no: i64, primary_term: i64) -> Self {
        Self {
            seq_no,
            primary_term,
        }
    }

    /// Token assigned to a freshly created document
    pub fn initial() -> Self {
        Self::new(0, 1)
    }

    /// Token after one more successful write
    pub fn next(self) -> Self {
        Self::new(self.seq_no + 1, self.primary_term)
    }
}

/// Physical address of a document: storage location plus id
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentRef {
    pub location: String,
    pub id: String,
}

impl DocumentRef {
    pub fn new(location: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for DocumentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.location, self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkOperation {
    /// Fails with a conflict if the document already exists
    Create,
    /// Full-document upsert, guarded by the version token when one is given
    Index,
    /// Partial merge into an existing document
    Update,
    Delete,
}

impl fmt::Display for BulkOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BulkOperation::Create => write!(f, "create"),
            BulkOperation::Index => write!(f, "index"),
            BulkOperation::Update => write!(f, "update"),
            BulkOperation::Delete => write!(f, "delete"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BulkAction {
    pub location: String,
    pub id: String,
    pub operation: BulkOperation,
    pub version: Option<VersionToken>,
    pub body: Option<Map<String, Value>>,
}

impl BulkAction {
    pub fn create(location: impl Into<String>, id: impl Into<String>, body: Map<String, Value>) -> Self {
        Self {
            location: location.into(),
            id: id.into(),
            operation: BulkOperation::Create,
            version: None,
            body: Some(body),
        }
    }

    pub fn index(
        location: impl Into<String>,
        id: impl Into<String>,
        body: Map<String, Value>,
        version: Option<VersionToken>,
    ) -> Self {
        Self {
            location: location.into(),
            id: id.into(),
            operation: BulkOperation::Index,
            version,
            body: Some(body),
        }
    }

    pub fn update(
        location: impl Into<String>,
        id: impl Into<String>,
        partial: Map<String, Value>,
        version: Option<VersionToken>,
    ) -> Self {
        Self {
            location: location.into(),
            id: id.into(),
            operation: BulkOperation::Update,
            version,
            body: Some(partial),
        }
    }

    pub fn delete(location: impl Into<String>, id: impl Into<String>, version: Option<VersionToken>) -> Self {
        Self {
            location: location.into(),
            id: id.into(),
            operation: BulkOperation::Delete,
            version,
            body: None,
        }
    }

    pub fn document_ref(&self) -> DocumentRef {
        DocumentRef::new(self.location.clone(), self.id.clone())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BulkItemStatus {
    Created,
    Updated,
    Deleted,
    /// Version mismatch, never reported as a generic error
    Conflict,
    Error(String),
}

impl BulkItemStatus {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            BulkItemStatus::Created | BulkItemStatus::Updated | BulkItemStatus::Deleted
        )
    }
}

/// Outcome of one bulk action. Outcomes arrive unordered: match them by
/// (location, id), never by position.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkItemOutcome {
    pub location: String,
    pub id: String,
    pub status: BulkItemStatus,
    /// Version after a successful create/index/update
    pub version: Option<VersionToken>,
}

impl BulkItemOutcome {
    pub fn new(action: &BulkAction, status: BulkItemStatus, version: Option<VersionToken>) -> Self {
        Self {
            location: action.location.clone(),
            id: action.id.clone(),
            status,
            version,
        }
    }

    pub fn document_ref(&self) -> DocumentRef {
        DocumentRef::new(self.location.clone(), self.id.clone())
    }
}

/// A document as read from the store, with its concurrency token
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub location: String,
    pub id: String,
    pub version: VersionToken,
    pub body: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Asc,
    Desc,
}

/// Inclusive bounds on a date-time field
#[derive(Debug, Clone, PartialEq)]
pub struct RangeFilter {
    pub field: String,
    pub gte: Option<DateTime<Utc>>,
    pub lte: Option<DateTime<Utc>>,
}

impl RangeFilter {
    pub fn matches(&self, body: &Map<String, Value>) -> bool {
        let Some(value) = body
            .get(&self.field)
            .and_then(Value::as_str)
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|dt| dt.with_timezone(&Utc))
        else {
            return false;
        };
        self.gte.map_or(true, |gte| value >= gte) && self.lte.map_or(true, |lte| value <= lte)
    }
}

/// Search over one or more location patterns (`prefix-*` globs allowed)
#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    pub locations: Vec<String>,
    pub terms: Vec<(String, Value)>,
    pub ranges: Vec<RangeFilter>,
    pub sort: Option<(String, SortOrder)>,
    pub limit: usize,
}

impl SearchQuery {
    pub const DEFAULT_LIMIT: usize = 10_000;

    pub fn new(location: impl Into<String>) -> Self {
        Self {
            locations: vec![location.into()],
            terms: Vec::new(),
            ranges: Vec::new(),
            sort: None,
            limit: Self::DEFAULT_LIMIT,
        }
    }

    pub fn with_locations(mut self, locations: Vec<String>) -> Self {
        if !locations.is_empty() {
            self.locations = locations;
        }
        self
    }

    pub fn term(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.terms.push((field.into(), value.into()));
        self
    }

    pub fn range(
        mut self,
        field: impl Into<String>,
        gte: Option<DateTime<Utc>>,
        lte: Option<DateTime<Utc>>,
    ) -> Self {
        self.ranges.push(RangeFilter {
            field: field.into(),
            gte,
            lte,
        });
        self
    }

    pub fn sort_by(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.sort = Some((field.into(), order));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Term and range filters only; locations are matched by the backend
    pub fn matches_body(&self, body: &Map<String, Value>) -> bool {
        self.terms
            .iter()
            .all(|(field, expected)| body.get(field) == Some(expected))
            && self.ranges.iter().all(|range| range.matches(body))
    }
}

/// `raw-product-*` matches every monthly partition, anything else is exact
pub fn location_matches(pattern: &str, location: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => location.starts_with(prefix),
        None => pattern == location,
    }
}
