//! # Raw Data Engine
//!
//! 1:1 consolidation of raw documents into long-lived target documents.
//!
//! ## Features
//!
//! - **In-memory merge**: raw documents resolving to the same target id are
//!   applied to one target instance, never processed twice
//! - **Single fetch**: existing targets are read by id list in one round trip
//! - **No-op suppression**: a target whose body is unchanged by the transform
//!   is not written, unless the message forces it. It is still reported when
//!   an earlier delivery of the same message wrote it.
//! - **Batch hooks**: `pre_batch` / `post_batch` run once per message for
//!   batch-wide enrichment queries

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use super::{DataEngine, DocumentWrite, Engine, EngineContext};
use crate::document::{Document, DocumentClass};
use crate::error::Result;
use crate::report::{merge_reports, Report};

/// Field stamped on every written target
pub const UPDATED_AT_FIELD: &str = "updated_at";

/// Business side of a 1:1 consolidation
#[async_trait]
pub trait RawConsolidator: Send + Sync + 'static {
    /// State computed once per message by `pre_batch`
    type Batch: Send + Sync;

    fn name(&self) -> &str;

    fn input_classes(&self) -> &[&'static str];

    fn target_class(&self) -> &DocumentClass;

    /// Business key of the target, a pure function of immutable raw attributes
    fn target_id(&self, raw: &Document) -> Result<String>;

    async fn pre_batch(&self, ctx: &mut EngineContext<'_>, raws: &[Document]) -> Result<Self::Batch>;

    /// Apply one raw document to its target
    fn consolidate(&self, batch: &Self::Batch, raw: &Document, target: &mut Document) -> Result<()>;

    async fn post_batch(
        &self,
        _ctx: &mut EngineContext<'_>,
        _batch: &Self::Batch,
        _targets: &mut [Document],
    ) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug)]
pub struct RawDataEngine<C> {
    consolidator: C,
    data: DataEngine,
}

impl<C: RawConsolidator> RawDataEngine<C> {
    pub fn new(consolidator: C) -> Self {
        let data = DataEngine::new(consolidator.name());
        Self { consolidator, data }
    }

    pub fn consolidator(&self) -> &C {
        &self.consolidator
    }

    /// Group raw documents by target id, in first-seen order
    fn group_by_target<'r>(&self, raws: &'r [Document]) -> (Vec<String>, HashMap<String, Vec<&'r Document>>) {
        let mut order = Vec::new();
        let mut groups: HashMap<String, Vec<&Document>> = HashMap::new();
        for raw in raws {
            match self.consolidator.target_id(raw) {
                Ok(target_id) => {
                    let group = groups.entry(target_id.clone()).or_default();
                    if group.is_empty() {
                        order.push(target_id);
                    }
                    group.push(raw);
                }
                Err(err) => warn!(
                    engine = %self.consolidator.name(),
                    raw_id = %raw.id,
                    error = %err,
                    "Skipping raw document without a target id"
                ),
            }
        }
        (order, groups)
    }
}

#[async_trait]
impl<C: RawConsolidator> Engine for RawDataEngine<C> {
    fn name(&self) -> &str {
        self.consolidator.name()
    }

    fn input_classes(&self) -> &[&'static str] {
        self.consolidator.input_classes()
    }

    async fn run(&self, ctx: &mut EngineContext<'_>) -> Result<Vec<Report>> {
        let raws = self.data.load_inputs(ctx).await?;
        if raws.is_empty() {
            debug!(engine = %self.name(), "No raw documents to consolidate");
            return Ok(Vec::new());
        }

        let class = self.consolidator.target_class();
        let (order, groups) = self.group_by_target(&raws);
        let mut existing = self.data.fetch_existing(ctx, class, &order).await?;
        let batch = self.consolidator.pre_batch(ctx, &raws).await?;

        let mut targets: Vec<Document> = Vec::with_capacity(order.len());
        let mut snapshots: Vec<Option<Map<String, Value>>> = Vec::with_capacity(order.len());
        for target_id in &order {
            let (mut target, snapshot) = match existing.remove(target_id) {
                Some(document) => {
                    let snapshot = document.snapshot();
                    (document, Some(snapshot))
                }
                None => (Document::new(class.name, target_id.clone(), String::new()), None),
            };

            let mut applied = 0usize;
            for raw in groups.get(target_id).into_iter().flatten() {
                match self.consolidator.consolidate(&batch, raw, &mut target) {
                    Ok(()) => applied += 1,
                    Err(err) => warn!(
                        engine = %self.name(),
                        raw_id = %raw.id,
                        target_id = %target_id,
                        error = %err,
                        "Consolidation of raw document failed, skipping it"
                    ),
                }
            }
            if applied == 0 && target.is_new() {
                continue;
            }
            targets.push(target);
            snapshots.push(snapshot);
        }

        self.consolidator.post_batch(ctx, &batch, &mut targets).await?;

        let now = Utc::now();
        let mut writes = Vec::with_capacity(targets.len());
        let mut unchanged = Vec::new();
        for (mut target, snapshot) in targets.into_iter().zip(snapshots) {
            let changed = snapshot
                .as_ref()
                .map_or(true, |snapshot| !target.is_unchanged_since(snapshot));
            if !changed && !ctx.settings.force {
                unchanged.push(target);
                continue;
            }
            if target.is_new() {
                target.location = class.location_for(&target.body);
            }
            target.set_datetime(UPDATED_AT_FIELD, now);
            writes.push(DocumentWrite::Upsert(target));
        }

        info!(
            engine = %self.name(),
            raw_documents = raws.len(),
            targets = order.len(),
            writes = writes.len(),
            unchanged = unchanged.len(),
            force = ctx.settings.force,
            "Consolidated raw documents"
        );
        let mut reports = self.data.write_documents(ctx, writes).await?;
        reports.extend(self.data.replayed_reports(ctx.message.message_id, &unchanged));
        Ok(merge_reports(reports))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineSettings;
    use crate::error::ConsolidationError;
    use crate::messaging::ConsolidationMessage;
    use crate::session::Session;
    use crate::store::InMemoryDocumentStore;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const TARGET: DocumentClass = DocumentClass::monthly("summary", "summary", "day");

    /// Collects the `value` of every raw document sharing a `key`
    #[derive(Default)]
    struct Collector {
        pre_batches: AtomicUsize,
    }

    #[async_trait]
    impl RawConsolidator for Collector {
        type Batch = ();

        fn name(&self) -> &str {
            "collector"
        }

        fn input_classes(&self) -> &[&'static str] {
            &["raw-sample"]
        }

        fn target_class(&self) -> &DocumentClass {
            &TARGET
        }

        fn target_id(&self, raw: &Document) -> Result<String> {
            raw.str_field("key")
                .map(str::to_string)
                .ok_or_else(|| ConsolidationError::transform(&raw.id, "no key"))
        }

        async fn pre_batch(&self, _ctx: &mut EngineContext<'_>, _raws: &[Document]) -> Result<()> {
            self.pre_batches.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }

        fn consolidate(&self, _batch: &(), raw: &Document, target: &mut Document) -> Result<()> {
            let value = raw
                .str_field("value")
                .ok_or_else(|| ConsolidationError::transform(&raw.id, "no value"))?;
            let mut values: Vec<String> = target
                .get("values")
                .and_then(|v| serde_json::from_value(v.clone()).ok())
                .unwrap_or_default();
            if !values.iter().any(|v| v == value) {
                values.push(value.to_string());
                values.sort();
            }
            target.set("values", json!(values));
            target.set("day", "2024-05-01T00:00:00Z");
            Ok(())
        }
    }

    fn seed(store: &InMemoryDocumentStore, id: &str, raw: Value) {
        store.insert("raw-sample-2024-05", id, raw.as_object().cloned().unwrap());
    }

    async fn run(
        engine: &RawDataEngine<Collector>,
        store: &Arc<InMemoryDocumentStore>,
        ids: &[&str],
        force: bool,
    ) -> Result<Vec<Report>> {
        let message = ConsolidationMessage::new("raw-sample", ids.iter().map(|id| id.to_string()).collect())
            .with_force(force);
        let mut session = Session::new(message.message_id);
        let settings = EngineSettings {
            force,
            ..EngineSettings::default()
        };
        let mut ctx = EngineContext::new("new.raw-sample", &message, &mut session, store.clone(), settings);
        engine.run(&mut ctx).await
    }

    fn seeded() -> Arc<InMemoryDocumentStore> {
        let store = Arc::new(InMemoryDocumentStore::new());
        seed(&store, "r1", json!({"key": "k", "value": "b"}));
        seed(&store, "r2", json!({"key": "k", "value": "a"}));
        seed(&store, "r3", json!({"key": "k", "value": "b"}));
        seed(&store, "r4", json!({"value": "orphan"}));
        seed(&store, "r5", json!({"key": "broken"}));
        store
    }

    #[tokio::test]
    async fn test_duplicates_merge_into_one_write() {
        let store = seeded();
        let engine = RawDataEngine::new(Collector::default());

        let reports = run(&engine, &store, &["r1", "r2", "r3", "r4", "r5"], false).await.unwrap();

        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].action, "new.summary");
        assert_eq!(reports[0].ids, vec!["k"]);
        assert_eq!(reports[0].locations, vec!["summary-2024-05"]);
        assert_eq!(store.stats().bulk_requests, 1);
        assert_eq!(store.stats().documents_written, 1);
        assert_eq!(engine.consolidator().pre_batches.load(Ordering::Relaxed), 1);

        let stored = store.peek("summary-2024-05", "k").unwrap();
        assert_eq!(stored.body["values"], json!(["a", "b"]));
        assert!(stored.body.contains_key(UPDATED_AT_FIELD));
        // "broken" had no applicable raw document, so no target was created
        assert!(store.peek("summary-2024-05", "broken").is_none());
    }

    #[tokio::test]
    async fn test_reprocessing_is_a_no_op() {
        let store = seeded();
        let engine = RawDataEngine::new(Collector::default());
        run(&engine, &store, &["r1", "r2", "r3"], false).await.unwrap();
        let version = store.peek("summary-2024-05", "k").unwrap().version;
        store.reset_stats();

        let reports = run(&engine, &store, &["r1", "r2", "r3"], false).await.unwrap();

        assert!(reports.is_empty());
        assert_eq!(store.stats().bulk_requests, 0);
        assert_eq!(store.peek("summary-2024-05", "k").unwrap().version, version);
    }

    #[tokio::test]
    async fn test_redelivery_reports_targets_written_by_first_delivery() {
        let store = seeded();
        let engine = RawDataEngine::new(Collector::default());
        let message = ConsolidationMessage::new("raw-sample", vec!["r1".into(), "r2".into()]);

        for _ in 0..2 {
            let mut session = Session::new(message.message_id);
            let mut ctx = EngineContext::new("new.raw-sample", &message, &mut session, store.clone(), EngineSettings::default());
            let reports = engine.run(&mut ctx).await.unwrap();
            assert_eq!(reports.len(), 1);
            assert_eq!(reports[0].action, "new.summary");
            assert_eq!(reports[0].ids, vec!["k"]);
            assert_eq!(reports[0].locations, vec!["summary-2024-05"]);
        }
        assert_eq!(store.stats().bulk_requests, 1);
    }

    #[tokio::test]
    async fn test_force_rewrites_unchanged_targets() {
        let store = seeded();
        let engine = RawDataEngine::new(Collector::default());
        run(&engine, &store, &["r1"], false).await.unwrap();

        let reports = run(&engine, &store, &["r1"], true).await.unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].action, "update.summary");
    }

    #[tokio::test]
    async fn test_new_raw_value_updates_existing_target() {
        let store = seeded();
        let engine = RawDataEngine::new(Collector::default());
        run(&engine, &store, &["r1"], false).await.unwrap();

        let reports = run(&engine, &store, &["r2"], false).await.unwrap();
        assert_eq!(reports[0].action, "update.summary");
        assert_eq!(
            store.peek("summary-2024-05", "k").unwrap().body["values"],
            json!(["a", "b"])
        );
    }
}
