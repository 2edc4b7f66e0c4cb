//! # Data Engine
//!
//! Generic read/write path shared by every engine.
//!
//! ## Write Flow
//!
//! 1. Each [`DocumentWrite`] becomes one bulk action. New documents are
//!    created, existing ones are indexed under the version token read at load
//!    time, deletions carry the same token.
//! 2. Outcomes come back unordered and are matched to their action by
//!    `(location, id)` into a [`BulkSummary`].
//! 3. Any hard error fails the batch as [`ConsolidationError::WriteFailed`];
//!    conflicts alone fail it as [`ConsolidationError::WriteConflict`].
//! 4. Only a fully successful batch yields reports, one per (class, action),
//!    each listing the locations it touched.
//!
//! Every upserted document is stamped with the id of the message that wrote
//! it. When a redelivered message finds its own writes already in place,
//! [`DataEngine::replayed_reports`] rebuilds the reports the first delivery
//! could not publish.

use std::collections::{HashMap, HashSet};

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::EngineContext;
use crate::config::{MissingInputPolicy, StoreErrorPolicy};
use crate::document::{Document, DocumentClass};
use crate::error::{ConsolidationError, Result};
use crate::report::{merge_reports, Report, ReportKind};
use crate::store::{BulkAction, BulkItemOutcome, BulkItemStatus, DocumentRef, StoreError, VersionToken};

/// Id of the message whose write produced the stored body
pub const WRITTEN_BY_FIELD: &str = "written_by_message";
/// Id of the message that created the document
pub const CREATED_BY_FIELD: &str = "created_by_message";

/// One pending write produced by a transform
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentWrite {
    /// Create when the document was never stored, otherwise version-guarded index
    Upsert(Document),
    Delete(Document),
}

impl DocumentWrite {
    pub fn document(&self) -> &Document {
        match self {
            DocumentWrite::Upsert(document) | DocumentWrite::Delete(document) => document,
        }
    }

    fn to_action(&self) -> BulkAction {
        match self {
            DocumentWrite::Upsert(document) if document.is_new() => {
                BulkAction::create(&document.location, &document.id, document.body.clone())
            }
            DocumentWrite::Upsert(document) => BulkAction::index(
                &document.location,
                &document.id,
                document.body.clone(),
                document.version,
            ),
            DocumentWrite::Delete(document) => {
                BulkAction::delete(&document.location, &document.id, document.version)
            }
        }
    }
}

/// Bulk outcomes sorted by kind, keyed by document
#[derive(Debug, Default, Clone, PartialEq)]
pub struct BulkSummary {
    written: HashMap<DocumentRef, (ReportKind, Option<VersionToken>)>,
    pub conflicts: Vec<DocumentRef>,
    pub errors: Vec<(DocumentRef, String)>,
}

impl BulkSummary {
    pub fn is_success(&self) -> bool {
        self.conflicts.is_empty() && self.errors.is_empty()
    }

    pub fn kind_of(&self, reference: &DocumentRef) -> Option<ReportKind> {
        self.written.get(reference).map(|(kind, _)| *kind)
    }

    /// Version after the write, for created and updated documents
    pub fn version_of(&self, reference: &DocumentRef) -> Option<VersionToken> {
        self.written.get(reference).and_then(|(_, version)| *version)
    }

    pub fn count(&self, kind: ReportKind) -> usize {
        self.written.values().filter(|(k, _)| *k == kind).count()
    }
}

/// Read and write helpers bound to an engine name for logging
#[derive(Debug, Clone)]
pub struct DataEngine {
    name: String,
}

impl DataEngine {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The message's documents, in message order
    ///
    /// Reads from the locations the message names, or from every location of
    /// the class when it names none. Documents already in the session are
    /// not fetched again.
    pub async fn load_inputs(&self, ctx: &mut EngineContext<'_>) -> Result<Vec<Document>> {
        let message = ctx.message;
        let patterns = if message.document_indices.is_empty() {
            vec![format!("{}*", message.document_class)]
        } else {
            message.document_indices.clone()
        };
        self.load_documents(ctx, &message.document_class, &message.document_ids, &patterns)
            .await
    }

    pub async fn load_documents(
        &self,
        ctx: &mut EngineContext<'_>,
        class: &str,
        ids: &[String],
        patterns: &[String],
    ) -> Result<Vec<Document>> {
        let ids = dedup(ids);
        let mut found = self.fetch(ctx, class, &ids, patterns).await?;

        let missing: Vec<String> = ids.iter().filter(|id| !found.contains_key(*id)).cloned().collect();
        if !missing.is_empty() {
            match ctx.settings.missing_input_policy {
                MissingInputPolicy::Requeue => {
                    warn!(
                        engine = %self.name,
                        document_class = %class,
                        missing = missing.len(),
                        "Input documents not found, requeueing"
                    );
                    return Err(ConsolidationError::MissingInput {
                        document_class: class.to_string(),
                        ids: missing,
                    });
                }
                MissingInputPolicy::Drop => {
                    warn!(
                        engine = %self.name,
                        document_class = %class,
                        missing = ?missing,
                        "Input documents not found, dropping them"
                    );
                }
            }
        }

        Ok(ids.iter().filter_map(|id| found.remove(id)).collect())
    }

    /// Existing documents of `class` by id, in one round trip at most
    ///
    /// Absent ids are simply missing from the result.
    pub async fn fetch_existing(
        &self,
        ctx: &mut EngineContext<'_>,
        class: &DocumentClass,
        ids: &[String],
    ) -> Result<HashMap<String, Document>> {
        let ids = dedup(ids);
        self.fetch(ctx, class.name, &ids, &[class.search_pattern()]).await
    }

    async fn fetch(
        &self,
        ctx: &mut EngineContext<'_>,
        class: &str,
        ids: &[String],
        patterns: &[String],
    ) -> Result<HashMap<String, Document>> {
        let mut found: HashMap<String, Document> = HashMap::with_capacity(ids.len());
        let mut to_fetch: Vec<String> = Vec::new();
        for id in ids {
            match ctx.session.cached_by_id(class, id) {
                Some(document) => {
                    found.insert(id.clone(), document.clone());
                }
                None => to_fetch.push(id.clone()),
            }
        }

        if !to_fetch.is_empty() {
            for pattern in patterns {
                let stored = ctx
                    .store
                    .get_many(pattern, &to_fetch)
                    .await
                    .map_err(|err| self.store_failure(ctx.settings.on_store_error, err))?;
                for stored in stored {
                    if found.contains_key(&stored.id) {
                        continue;
                    }
                    let document = Document::from_stored(class, stored);
                    ctx.session.cache_document(document.clone());
                    found.insert(document.id.clone(), document);
                }
            }
        }

        debug!(
            engine = %self.name,
            document_class = %class,
            requested = ids.len(),
            fetched = to_fetch.len(),
            found = found.len(),
            "Loaded documents"
        );
        Ok(found)
    }

    /// Submit `writes` as one bulk batch and report what changed
    pub async fn write_documents(
        &self,
        ctx: &mut EngineContext<'_>,
        mut writes: Vec<DocumentWrite>,
    ) -> Result<Vec<Report>> {
        if writes.is_empty() {
            debug!(engine = %self.name, "Nothing to write");
            return Ok(Vec::new());
        }

        let message_id = ctx.message.message_id.to_string();
        for write in &mut writes {
            if let DocumentWrite::Upsert(document) = write {
                if document.is_new() {
                    document.set(CREATED_BY_FIELD, message_id.clone());
                }
                document.set(WRITTEN_BY_FIELD, message_id.clone());
            }
        }

        let actions: Vec<BulkAction> = writes.iter().map(DocumentWrite::to_action).collect();
        let outcomes = ctx
            .store
            .bulk(actions.clone())
            .await
            .map_err(|err| self.store_failure(ctx.settings.on_store_error, err))?;
        let summary = Self::classify(&actions, outcomes);

        if !summary.errors.is_empty() {
            let retryable = ctx.settings.on_store_error == StoreErrorPolicy::Retry;
            error!(
                engine = %self.name,
                errors = summary.errors.len(),
                conflicts = summary.conflicts.len(),
                retryable = retryable,
                first_error = ?summary.errors.first(),
                "Bulk write failed"
            );
            return Err(ConsolidationError::WriteFailed {
                errors: summary.errors,
                retryable,
            });
        }
        if !summary.conflicts.is_empty() {
            warn!(
                engine = %self.name,
                conflicts = summary.conflicts.len(),
                "Bulk write hit version conflicts"
            );
            return Err(ConsolidationError::WriteConflict {
                conflicts: summary.conflicts,
            });
        }

        let reports = Self::reports_for(&writes, &summary);

        for write in writes {
            match write {
                DocumentWrite::Upsert(mut document) => {
                    document.version = summary.version_of(&document.document_ref());
                    ctx.session.cache_document(document);
                }
                DocumentWrite::Delete(document) => {
                    ctx.session.forget_document(&document.document_ref());
                }
            }
        }

        info!(
            engine = %self.name,
            created = summary.count(ReportKind::New),
            updated = summary.count(ReportKind::Update),
            deleted = summary.count(ReportKind::Delete),
            "Bulk write complete"
        );
        Ok(reports)
    }

    /// Match unordered outcomes to their actions by `(location, id)`
    ///
    /// An action without an outcome counts as a hard error.
    pub fn classify(actions: &[BulkAction], outcomes: Vec<BulkItemOutcome>) -> BulkSummary {
        let mut by_ref: HashMap<DocumentRef, BulkItemOutcome> = outcomes
            .into_iter()
            .map(|outcome| (outcome.document_ref(), outcome))
            .collect();

        let mut summary = BulkSummary::default();
        for action in actions {
            let reference = action.document_ref();
            let Some(outcome) = by_ref.remove(&reference) else {
                if !summary.written.contains_key(&reference) {
                    summary
                        .errors
                        .push((reference, "no outcome returned for action".to_string()));
                }
                continue;
            };
            match outcome.status {
                BulkItemStatus::Created => {
                    summary.written.insert(reference, (ReportKind::New, outcome.version));
                }
                BulkItemStatus::Updated => {
                    summary.written.insert(reference, (ReportKind::Update, outcome.version));
                }
                BulkItemStatus::Deleted => {
                    summary.written.insert(reference, (ReportKind::Delete, None));
                }
                BulkItemStatus::Conflict => summary.conflicts.push(reference),
                BulkItemStatus::Error(reason) => summary.errors.push((reference, reason)),
            }
        }
        summary
    }

    /// One report per (class, action) in first-write order
    pub fn reports_for(writes: &[DocumentWrite], summary: &BulkSummary) -> Vec<Report> {
        let mut reports: Vec<Report> = Vec::new();
        let mut slots: HashMap<(String, ReportKind), usize> = HashMap::new();

        for write in writes {
            let document = write.document();
            let Some(kind) = summary.kind_of(&document.document_ref()) else {
                continue;
            };
            let slot = *slots
                .entry((document.class.clone(), kind))
                .or_insert_with(|| {
                    reports.push(Report::new(kind, document.class.clone()));
                    reports.len() - 1
                });
            reports[slot].push(document.id.clone(), document.location.clone());
        }
        reports
    }

    /// Reports for unchanged documents this message already wrote
    ///
    /// A document last written by `message_id` means an earlier delivery of
    /// the same message committed the write but never got to publish it.
    pub fn replayed_reports(&self, message_id: Uuid, documents: &[Document]) -> Vec<Report> {
        let message_id = message_id.to_string();
        let mut reports: Vec<Report> = Vec::new();
        for document in documents {
            if document.str_field(WRITTEN_BY_FIELD) != Some(message_id.as_str()) {
                continue;
            }
            let kind = if document.str_field(CREATED_BY_FIELD) == Some(message_id.as_str()) {
                ReportKind::New
            } else {
                ReportKind::Update
            };
            let mut report = Report::new(kind, document.class.clone());
            report.push(document.id.clone(), document.location.clone());
            reports.push(report);
        }
        let reports = merge_reports(reports);
        if !reports.is_empty() {
            info!(
                engine = %self.name,
                message_id = %message_id,
                documents = reports.iter().map(|report| report.ids.len()).sum::<usize>(),
                "Rebuilt reports for writes of an earlier delivery"
            );
        }
        reports
    }

    /// Store error mapped through the binding's store-error policy
    pub fn store_failure(&self, policy: StoreErrorPolicy, err: StoreError) -> ConsolidationError {
        error!(engine = %self.name, error = %err, policy = ?policy, "Store request failed");
        match policy {
            StoreErrorPolicy::Retry => ConsolidationError::Store(err),
            StoreErrorPolicy::Reject => ConsolidationError::StoreRejected(err),
        }
    }
}

fn dedup(ids: &[String]) -> Vec<String> {
    let mut seen = HashSet::with_capacity(ids.len());
    ids.iter().filter(|id| seen.insert(id.as_str())).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineSettings;
    use crate::error::ErrorCategory;
    use crate::messaging::ConsolidationMessage;
    use crate::session::Session;
    use crate::store::{DocumentStore, InMemoryDocumentStore};
    use serde_json::{json, Map, Value};
    use std::sync::Arc;

    fn body(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    fn seeded_store() -> Arc<InMemoryDocumentStore> {
        let store = Arc::new(InMemoryDocumentStore::new());
        store.insert("raw-dd-product-2024-05", "a", body(json!({"name": "A"})));
        store.insert("raw-dd-product-2024-06", "b", body(json!({"name": "B"})));
        store
    }

    fn message(ids: &[&str]) -> ConsolidationMessage {
        ConsolidationMessage::new("raw-dd-product", ids.iter().map(|id| id.to_string()).collect())
    }

    #[tokio::test]
    async fn test_load_inputs_across_partitions_in_message_order() {
        let store = seeded_store();
        let message = message(&["b", "a", "b"]);
        let mut session = Session::new(message.message_id);
        let mut ctx = EngineContext::new("new.raw", &message, &mut session, store.clone(), EngineSettings::default());

        let engine = DataEngine::new("test");
        let documents = engine.load_inputs(&mut ctx).await.unwrap();
        let ids: Vec<&str> = documents.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert_eq!(documents[0].location, "raw-dd-product-2024-06");
        assert!(documents.iter().all(|d| d.version.is_some()));
        assert_eq!(session.cached_documents(), 2);
    }

    #[tokio::test]
    async fn test_load_inputs_uses_session_cache() {
        let store = seeded_store();
        let message = message(&["a"]);
        let mut session = Session::new(message.message_id);
        let engine = DataEngine::new("test");

        let mut ctx = EngineContext::new("new.raw", &message, &mut session, store.clone(), EngineSettings::default());
        engine.load_inputs(&mut ctx).await.unwrap();
        engine.load_inputs(&mut ctx).await.unwrap();
        assert_eq!(store.stats().get_requests, 1);
    }

    #[tokio::test]
    async fn test_missing_inputs_follow_policy() {
        let store = seeded_store();
        let message = message(&["a", "ghost"]);
        let engine = DataEngine::new("test");

        let mut session = Session::new(message.message_id);
        let mut ctx = EngineContext::new("new.raw", &message, &mut session, store.clone(), EngineSettings::default());
        let err = engine.load_inputs(&mut ctx).await.unwrap_err();
        assert_eq!(err.category(), ErrorCategory::MissingInput);

        let settings = EngineSettings {
            missing_input_policy: MissingInputPolicy::Drop,
            ..EngineSettings::default()
        };
        let mut session = Session::new(message.message_id);
        let mut ctx = EngineContext::new("new.raw", &message, &mut session, store.clone(), settings);
        let documents = engine.load_inputs(&mut ctx).await.unwrap();
        assert_eq!(documents.len(), 1);
    }

    #[tokio::test]
    async fn test_write_reports_per_class_and_action() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let version = store.insert("product-2024-05", "existing", body(json!({"n": 1})));
        let message = message(&["a"]);
        let mut session = Session::new(message.message_id);
        let mut ctx = EngineContext::new("new.raw", &message, &mut session, store.clone(), EngineSettings::default());

        let mut existing = Document::new("product", "existing", "product-2024-05").with_body(body(json!({"n": 2})));
        existing.version = Some(version);
        let writes = vec![
            DocumentWrite::Upsert(Document::new("product", "p1", "product-2024-05")),
            DocumentWrite::Upsert(existing),
            DocumentWrite::Upsert(Document::new("product", "p2", "product-2024-06")),
        ];

        let reports = DataEngine::new("test").write_documents(&mut ctx, writes).await.unwrap();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].action, "new.product");
        assert_eq!(reports[0].ids, vec!["p1", "p2"]);
        assert_eq!(reports[0].locations, vec!["product-2024-05", "product-2024-06"]);
        assert_eq!(reports[1].action, "update.product");
        assert_eq!(reports[1].ids, vec!["existing"]);

        let cached = session.cached_by_id("product", "existing").unwrap();
        assert_eq!(cached.version, Some(version.next()));
        assert_eq!(store.peek("product-2024-05", "existing").unwrap().body["n"], json!(2));
    }

    #[tokio::test]
    async fn test_writes_are_stamped_and_replayed() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let version = store.insert("product-2024-05", "existing", body(json!({"n": 1})));
        let message = message(&["a"]);
        let mut session = Session::new(message.message_id);
        let mut ctx = EngineContext::new("new.raw", &message, &mut session, store.clone(), EngineSettings::default());

        let mut existing = Document::new("product", "existing", "product-2024-05").with_body(body(json!({"n": 2})));
        existing.version = Some(version);
        let engine = DataEngine::new("test");
        engine
            .write_documents(
                &mut ctx,
                vec![
                    DocumentWrite::Upsert(Document::new("product", "fresh", "product-2024-05")),
                    DocumentWrite::Upsert(existing),
                ],
            )
            .await
            .unwrap();

        let id = json!(message.message_id.to_string());
        let fresh = store.peek("product-2024-05", "fresh").unwrap().body;
        assert_eq!(fresh[WRITTEN_BY_FIELD], id);
        assert_eq!(fresh[CREATED_BY_FIELD], id);
        let updated = store.peek("product-2024-05", "existing").unwrap().body;
        assert_eq!(updated[WRITTEN_BY_FIELD], id);
        assert!(!updated.contains_key(CREATED_BY_FIELD));

        let stored: Vec<Document> = ["fresh", "existing"]
            .iter()
            .map(|id| Document::from_stored("product", store.peek("product-2024-05", id).unwrap()))
            .collect();
        let reports = engine.replayed_reports(message.message_id, &stored);
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].action, "new.product");
        assert_eq!(reports[0].ids, vec!["fresh"]);
        assert_eq!(reports[1].action, "update.product");
        assert_eq!(reports[1].ids, vec!["existing"]);

        assert!(engine.replayed_reports(Uuid::new_v4(), &stored).is_empty());
    }

    #[tokio::test]
    async fn test_conflicts_alone_raise_write_conflict() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let version = store.insert("product-2024-05", "p", Map::new());
        store.touch("product-2024-05", "p");

        let message = message(&["a"]);
        let mut session = Session::new(message.message_id);
        let mut ctx = EngineContext::new("new.raw", &message, &mut session, store.clone(), EngineSettings::default());
        let mut stale = Document::new("product", "p", "product-2024-05");
        stale.version = Some(version);

        let err = DataEngine::new("test")
            .write_documents(&mut ctx, vec![DocumentWrite::Upsert(stale)])
            .await
            .unwrap_err();
        assert!(matches!(err, ConsolidationError::WriteConflict { ref conflicts } if conflicts.len() == 1));
        assert_eq!(err.category(), ErrorCategory::Conflict);
    }

    #[tokio::test]
    async fn test_hard_errors_follow_store_error_policy() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let message = message(&["a"]);
        let missing = || DocumentWrite::Delete(Document::new("product", "nope", "product-2024-05"));

        let mut session = Session::new(message.message_id);
        let mut ctx = EngineContext::new("new.raw", &message, &mut session, store.clone(), EngineSettings::default());
        let err = DataEngine::new("test")
            .write_documents(&mut ctx, vec![missing()])
            .await
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Transient);

        let settings = EngineSettings {
            on_store_error: StoreErrorPolicy::Reject,
            ..EngineSettings::default()
        };
        let mut session = Session::new(message.message_id);
        let mut ctx = EngineContext::new("new.raw", &message, &mut session, store.clone(), settings);
        let err = DataEngine::new("test")
            .write_documents(&mut ctx, vec![missing()])
            .await
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Permanent);

        store.fail_next_bulk();
        let mut session = Session::new(message.message_id);
        let mut ctx = EngineContext::new("new.raw", &message, &mut session, store.clone(), settings);
        let err = DataEngine::new("test")
            .write_documents(&mut ctx, vec![DocumentWrite::Upsert(Document::new("product", "x", "product-2024-05"))])
            .await
            .unwrap_err();
        assert!(matches!(err, ConsolidationError::StoreRejected(_)));
    }

    #[test]
    fn test_classify_matches_unordered_outcomes() {
        let actions = vec![
            BulkAction::create("product-2024-05", "a", Map::new()),
            BulkAction::create("product-2024-05", "b", Map::new()),
            BulkAction::delete("product-2024-05", "c", Some(VersionToken::initial())),
        ];
        // Reversed, and "c" never answered
        let outcomes = vec![
            BulkItemOutcome::new(&actions[1], BulkItemStatus::Conflict, None),
            BulkItemOutcome::new(&actions[0], BulkItemStatus::Created, Some(VersionToken::initial())),
        ];

        let summary = DataEngine::classify(&actions, outcomes);
        assert_eq!(summary.kind_of(&actions[0].document_ref()), Some(ReportKind::New));
        assert_eq!(summary.conflicts, vec![actions[1].document_ref()]);
        assert_eq!(summary.errors.len(), 1);
        assert_eq!(summary.errors[0].0, actions[2].document_ref());
        assert!(!summary.is_success());
    }

    #[tokio::test]
    async fn test_store_backend_name_in_context_debug() {
        let store: Arc<dyn DocumentStore> = Arc::new(InMemoryDocumentStore::new());
        let message = message(&["a"]);
        let mut session = Session::new(message.message_id);
        let ctx = EngineContext::new("new.raw", &message, &mut session, store, EngineSettings::default());
        assert!(format!("{ctx:?}").contains(ctx.store.backend_name()));
    }
}
