//! # In-Memory Document Store
//!
//! Thread-safe in-memory store for testing and development.
//!
//! ## Features
//!
//! - **Version Guards**: Same conflict semantics as the Postgres backend
//! - **Location Patterns**: `prefix-*` globs across partitions
//! - **Round-Trip Counters**: [`StoreStats`] lets tests assert how many
//!   searches and bulk writes a message cost
//! - **Failure Injection**: `fail_next_bulk` simulates an unreachable store

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{Map, Value};

use super::{
    location_matches, BulkAction, BulkItemOutcome, BulkItemStatus, BulkOperation, DocumentStore,
    SearchQuery, SortOrder, StoreError, StoreResult, StoredDocument, VersionToken,
};

#[derive(Debug, Clone)]
struct StoredEntry {
    version: VersionToken,
    body: Map<String, Value>,
}

/// Snapshot of request counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub get_requests: u64,
    pub search_requests: u64,
    pub multi_search_requests: u64,
    pub bulk_requests: u64,
    /// Successful item writes (created, updated or deleted)
    pub documents_written: u64,
}

#[derive(Debug, Default)]
struct Counters {
    get_requests: AtomicU64,
    search_requests: AtomicU64,
    multi_search_requests: AtomicU64,
    bulk_requests: AtomicU64,
    documents_written: AtomicU64,
}

/// In-memory document store
///
/// Documents live in `location -> id -> entry` maps behind a `parking_lot`
/// lock that is never held across an await point.
#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    locations: RwLock<BTreeMap<String, BTreeMap<String, StoredEntry>>>,
    counters: Counters,
    fail_next_bulk: AtomicBool,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a document directly, bypassing counters (for fixtures)
    pub fn insert(&self, location: &str, id: &str, body: Map<String, Value>) -> VersionToken {
        let mut locations = self.locations.write();
        let entries = locations.entry(location.to_string()).or_default();
        let version = entries
            .get(id)
            .map(|entry| entry.version.next())
            .unwrap_or_else(VersionToken::initial);
        entries.insert(id.to_string(), StoredEntry { version, body });
        version
    }

    /// Read a single document without touching counters
    pub fn peek(&self, location: &str, id: &str) -> Option<StoredDocument> {
        let locations = self.locations.read();
        locations.get(location).and_then(|entries| {
            entries.get(id).map(|entry| StoredDocument {
                location: location.to_string(),
                id: id.to_string(),
                version: entry.version,
                body: entry.body.clone(),
            })
        })
    }

    /// Every document in locations matching `pattern`
    pub fn documents_in(&self, pattern: &str) -> Vec<StoredDocument> {
        let locations = self.locations.read();
        locations
            .iter()
            .filter(|(location, _)| location_matches(pattern, location))
            .flat_map(|(location, entries)| {
                entries.iter().map(move |(id, entry)| StoredDocument {
                    location: location.clone(),
                    id: id.clone(),
                    version: entry.version,
                    body: entry.body.clone(),
                })
            })
            .collect()
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            get_requests: self.counters.get_requests.load(Ordering::Relaxed),
            search_requests: self.counters.search_requests.load(Ordering::Relaxed),
            multi_search_requests: self.counters.multi_search_requests.load(Ordering::Relaxed),
            bulk_requests: self.counters.bulk_requests.load(Ordering::Relaxed),
            documents_written: self.counters.documents_written.load(Ordering::Relaxed),
        }
    }

    pub fn reset_stats(&self) {
        self.counters.get_requests.store(0, Ordering::Relaxed);
        self.counters.search_requests.store(0, Ordering::Relaxed);
        self.counters.multi_search_requests.store(0, Ordering::Relaxed);
        self.counters.bulk_requests.store(0, Ordering::Relaxed);
        self.counters.documents_written.store(0, Ordering::Relaxed);
    }

    /// Make the next `bulk` call fail as if the store were unreachable
    pub fn fail_next_bulk(&self) {
        self.fail_next_bulk.store(true, Ordering::Release);
    }

    /// Bump a document's version behind the caller's back (simulates a racing writer)
    pub fn touch(&self, location: &str, id: &str) -> Option<VersionToken> {
        let mut locations = self.locations.write();
        let entry = locations.get_mut(location)?.get_mut(id)?;
        entry.version = entry.version.next();
        Some(entry.version)
    }

    fn run_search(&self, query: &SearchQuery) -> Vec<StoredDocument> {
        let locations = self.locations.read();
        let mut hits: Vec<StoredDocument> = locations
            .iter()
            .filter(|(location, _)| {
                query
                    .locations
                    .iter()
                    .any(|pattern| location_matches(pattern, location))
            })
            .flat_map(|(location, entries)| {
                entries
                    .iter()
                    .filter(|(_, entry)| query.matches_body(&entry.body))
                    .map(move |(id, entry)| StoredDocument {
                        location: location.clone(),
                        id: id.clone(),
                        version: entry.version,
                        body: entry.body.clone(),
                    })
            })
            .collect();

        if let Some((field, order)) = &query.sort {
            hits.sort_by(|a, b| {
                let ordering = compare_field(&a.body, &b.body, field);
                match order {
                    SortOrder::Asc => ordering,
                    SortOrder::Desc => ordering.reverse(),
                }
            });
        }

        hits.truncate(query.limit);
        hits
    }

    fn apply(&self, entries: &mut BTreeMap<String, StoredEntry>, action: BulkAction) -> BulkItemOutcome {
        let current = entries.get(&action.id).map(|entry| entry.version);
        let version_matches = |current: VersionToken| action.version.map_or(true, |v| v == current);

        match action.operation {
            BulkOperation::Create => match current {
                Some(_) => BulkItemOutcome::new(&action, BulkItemStatus::Conflict, None),
                None => {
                    let version = VersionToken::initial();
                    let outcome = BulkItemOutcome::new(&action, BulkItemStatus::Created, Some(version));
                    entries.insert(
                        action.id,
                        StoredEntry {
                            version,
                            body: action.body.unwrap_or_default(),
                        },
                    );
                    outcome
                }
            },
            BulkOperation::Index => match current {
                Some(current) if !version_matches(current) => {
                    BulkItemOutcome::new(&action, BulkItemStatus::Conflict, None)
                }
                None if action.version.is_some() => {
                    BulkItemOutcome::new(&action, BulkItemStatus::Conflict, None)
                }
                Some(current) => {
                    let version = current.next();
                    let outcome = BulkItemOutcome::new(&action, BulkItemStatus::Updated, Some(version));
                    entries.insert(
                        action.id,
                        StoredEntry {
                            version,
                            body: action.body.unwrap_or_default(),
                        },
                    );
                    outcome
                }
                None => {
                    let version = VersionToken::initial();
                    let outcome = BulkItemOutcome::new(&action, BulkItemStatus::Created, Some(version));
                    entries.insert(
                        action.id,
                        StoredEntry {
                            version,
                            body: action.body.unwrap_or_default(),
                        },
                    );
                    outcome
                }
            },
            BulkOperation::Update => match entries.get_mut(&action.id) {
                None if action.version.is_some() => {
                    BulkItemOutcome::new(&action, BulkItemStatus::Conflict, None)
                }
                None => BulkItemOutcome::new(
                    &action,
                    BulkItemStatus::Error("document_missing_exception".to_string()),
                    None,
                ),
                Some(entry) if !version_matches(entry.version) => {
                    BulkItemOutcome::new(&action, BulkItemStatus::Conflict, None)
                }
                Some(entry) => {
                    for (key, value) in action.body.clone().unwrap_or_default() {
                        entry.body.insert(key, value);
                    }
                    entry.version = entry.version.next();
                    BulkItemOutcome::new(&action, BulkItemStatus::Updated, Some(entry.version))
                }
            },
            BulkOperation::Delete => match current {
                None if action.version.is_some() => {
                    BulkItemOutcome::new(&action, BulkItemStatus::Conflict, None)
                }
                None => BulkItemOutcome::new(
                    &action,
                    BulkItemStatus::Error("not_found".to_string()),
                    None,
                ),
                Some(current) if !version_matches(current) => {
                    BulkItemOutcome::new(&action, BulkItemStatus::Conflict, None)
                }
                Some(_) => {
                    entries.remove(&action.id);
                    BulkItemOutcome::new(&action, BulkItemStatus::Deleted, None)
                }
            },
        }
    }
}

fn compare_field(a: &Map<String, Value>, b: &Map<String, Value>, field: &str) -> CmpOrdering {
    match (a.get(field), b.get(field)) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(CmpOrdering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(_), None) => CmpOrdering::Less,
        (None, Some(_)) => CmpOrdering::Greater,
        _ => CmpOrdering::Equal,
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn get_many(&self, location: &str, ids: &[String]) -> StoreResult<Vec<StoredDocument>> {
        self.counters.get_requests.fetch_add(1, Ordering::Relaxed);
        let locations = self.locations.read();
        let mut found = Vec::new();
        for (name, entries) in locations.iter() {
            if !location_matches(location, name) {
                continue;
            }
            for id in ids {
                if let Some(entry) = entries.get(id) {
                    found.push(StoredDocument {
                        location: name.clone(),
                        id: id.clone(),
                        version: entry.version,
                        body: entry.body.clone(),
                    });
                }
            }
        }
        Ok(found)
    }

    async fn search(&self, query: &SearchQuery) -> StoreResult<Vec<StoredDocument>> {
        self.counters.search_requests.fetch_add(1, Ordering::Relaxed);
        Ok(self.run_search(query))
    }

    async fn multi_search(&self, queries: &[SearchQuery]) -> StoreResult<Vec<Vec<StoredDocument>>> {
        self.counters.multi_search_requests.fetch_add(1, Ordering::Relaxed);
        Ok(queries.iter().map(|query| self.run_search(query)).collect())
    }

    async fn bulk(&self, actions: Vec<BulkAction>) -> StoreResult<Vec<BulkItemOutcome>> {
        self.counters.bulk_requests.fetch_add(1, Ordering::Relaxed);
        if self.fail_next_bulk.swap(false, Ordering::AcqRel) {
            return Err(StoreError::unavailable("injected bulk failure"));
        }

        let mut by_location: HashMap<String, Vec<BulkAction>> = HashMap::new();
        for action in actions {
            by_location.entry(action.location.clone()).or_default().push(action);
        }

        let mut outcomes = Vec::new();
        let mut locations = self.locations.write();
        for (location, actions) in by_location {
            let entries = locations.entry(location).or_default();
            for action in actions {
                let outcome = self.apply(entries, action);
                if outcome.status.is_success() {
                    self.counters.documents_written.fetch_add(1, Ordering::Relaxed);
                }
                outcomes.push(outcome);
            }
        }
        Ok(outcomes)
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_create_conflicts_on_existing_document() {
        let store = InMemoryDocumentStore::new();
        store.insert("product-2024-01", "a", body(json!({"name": "a"})));

        let outcomes = store
            .bulk(vec![BulkAction::create("product-2024-01", "a", body(json!({"name": "b"})))])
            .await
            .unwrap();

        assert_eq!(outcomes[0].status, BulkItemStatus::Conflict);
        assert_eq!(store.peek("product-2024-01", "a").unwrap().body["name"], "a");
    }

    #[tokio::test]
    async fn test_index_guards_on_version_token() {
        let store = InMemoryDocumentStore::new();
        let version = store.insert("product-2024-01", "a", body(json!({"n": 1})));

        let ok = store
            .bulk(vec![BulkAction::index("product-2024-01", "a", body(json!({"n": 2})), Some(version))])
            .await
            .unwrap();
        assert_eq!(ok[0].status, BulkItemStatus::Updated);
        assert_eq!(ok[0].version, Some(version.next()));

        // Stale token
        let stale = store
            .bulk(vec![BulkAction::index("product-2024-01", "a", body(json!({"n": 3})), Some(version))])
            .await
            .unwrap();
        assert_eq!(stale[0].status, BulkItemStatus::Conflict);
        assert_eq!(store.peek("product-2024-01", "a").unwrap().body["n"], 2);
    }

    #[tokio::test]
    async fn test_update_merges_and_delete_removes() {
        let store = InMemoryDocumentStore::new();
        let version = store.insert("datatake-2024-01", "S1A-1", body(json!({"a": 1})));

        let outcomes = store
            .bulk(vec![BulkAction::update(
                "datatake-2024-01",
                "S1A-1",
                body(json!({"b": 2})),
                Some(version),
            )])
            .await
            .unwrap();
        assert_eq!(outcomes[0].status, BulkItemStatus::Updated);
        let stored = store.peek("datatake-2024-01", "S1A-1").unwrap();
        assert_eq!(stored.body["a"], 1);
        assert_eq!(stored.body["b"], 2);

        let outcomes = store
            .bulk(vec![BulkAction::delete("datatake-2024-01", "S1A-1", Some(stored.version))])
            .await
            .unwrap();
        assert_eq!(outcomes[0].status, BulkItemStatus::Deleted);
        assert!(store.peek("datatake-2024-01", "S1A-1").is_none());

        let missing = store
            .bulk(vec![BulkAction::delete("datatake-2024-01", "S1A-1", None)])
            .await
            .unwrap();
        assert!(matches!(missing[0].status, BulkItemStatus::Error(_)));
    }

    #[tokio::test]
    async fn test_get_many_spans_partitions() {
        let store = InMemoryDocumentStore::new();
        store.insert("raw-2024-01", "a", Map::new());
        store.insert("raw-2024-02", "b", Map::new());
        store.insert("other-2024-02", "c", Map::new());

        let ids = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let docs = store.get_many("raw-*", &ids).await.unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(store.stats().get_requests, 1);
    }

    #[tokio::test]
    async fn test_multi_search_is_one_round_trip() {
        let store = InMemoryDocumentStore::new();
        store.insert("datatake-2024-01", "x", body(json!({"satellite_unit": "S1A", "rank": 2})));
        store.insert("datatake-2024-01", "y", body(json!({"satellite_unit": "S1A", "rank": 1})));

        let queries = vec![
            SearchQuery::new("datatake-*")
                .term("satellite_unit", "S1A")
                .sort_by("rank", SortOrder::Asc),
            SearchQuery::new("datatake-*").term("satellite_unit", "S2A"),
        ];
        let results = store.multi_search(&queries).await.unwrap();

        assert_eq!(results[0].len(), 2);
        assert_eq!(results[0][0].id, "y");
        assert!(results[1].is_empty());
        let stats = store.stats();
        assert_eq!(stats.multi_search_requests, 1);
        assert_eq!(stats.search_requests, 0);
    }

    #[tokio::test]
    async fn test_injected_bulk_failure_is_transient() {
        let store = InMemoryDocumentStore::new();
        store.fail_next_bulk();
        let err = store
            .bulk(vec![BulkAction::create("p", "a", Map::new())])
            .await
            .unwrap_err();
        assert!(err.is_transient());

        // Only the next call fails
        let outcomes = store
            .bulk(vec![BulkAction::create("p", "a", Map::new())])
            .await
            .unwrap();
        assert_eq!(outcomes[0].status, BulkItemStatus::Created);
    }
}
