//! # Datatake Completeness
//!
//! Recomputes the completeness of every datatake referenced by a batch of
//! product reports. For each datatake the products attached to it are read
//! back in one `multi_search`, turned into per-sub-type local records against
//! the mission table, and rolled up into the global record.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{mission_of, DATATAKE, PRODUCT};
use crate::completeness::{
    compute_set, reduce_periods, roll_up, ExpectedValueLookup, MissionTable, ObservedProduct, Period,
};
use crate::config::CompletenessConfig;
use crate::document::{parse_datetime, partition_location, Document};
use crate::engine::{DataEngine, DocumentWrite, Engine, EngineContext};
use crate::error::Result;
use crate::report::{merge_reports, Report};
use crate::store::{SearchQuery, StoredDocument};

pub struct DatatakeCompletenessEngine {
    lookup: Arc<ExpectedValueLookup>,
    config: CompletenessConfig,
    data: DataEngine,
}

impl std::fmt::Debug for DatatakeCompletenessEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatatakeCompletenessEngine")
            .field("lookup_generation", &self.lookup.generation())
            .field("config", &self.config)
            .finish()
    }
}

impl DatatakeCompletenessEngine {
    pub const NAME: &'static str = "datatake-completeness";

    pub fn new(lookup: Arc<ExpectedValueLookup>, config: CompletenessConfig) -> Self {
        Self {
            lookup,
            config,
            data: DataEngine::new(Self::NAME),
        }
    }

    fn mission_table(&self, datatake: &Document) -> Option<MissionTable> {
        datatake
            .str_field("mission")
            .or_else(|| datatake.str_field("satellite_unit").and_then(mission_of))
            .and_then(|mission| self.lookup.table(mission))
    }

    /// Product partitions a datatake's products can live in
    fn product_locations(&self, window: &Period) -> Vec<String> {
        let widened = window.expand(Duration::seconds(self.config.datatake_time_delta_seconds));
        let mut locations = vec![partition_location(PRODUCT.location_prefix, widened.start)];
        let last = partition_location(PRODUCT.location_prefix, widened.end);
        if !locations.contains(&last) {
            locations.push(last);
        }
        locations
    }
}

/// Write the completeness fields onto `datatake`
fn apply_completeness(
    datatake: &mut Document,
    table: &MissionTable,
    window: &Period,
    hits: &[StoredDocument],
) -> Result<()> {
    let observed: Vec<ObservedProduct> = hits.iter().filter_map(observed_product).collect();
    let set = compute_set(table, datatake.str_field("instrument_mode"), window, &observed);
    let global = roll_up(table, &set);

    let gaps: Vec<Period> = set
        .iter()
        .filter(|(sub_type, _)| table.global_group(sub_type).is_some())
        .flat_map(|(_, local)| local.missing_periods.iter().copied())
        .collect();
    let missing_periods = reduce_periods(&gaps, Duration::zero());

    datatake.set("completeness", serde_json::to_value(&set)?);
    datatake.set("global_completeness", serde_json::to_value(&global)?);
    datatake.set("completeness_status", global.record.status.to_string());
    datatake.set("missing_periods", serde_json::to_value(&missing_periods)?);
    Ok(())
}

fn observed_product(stored: &StoredDocument) -> Option<ObservedProduct> {
    let sub_type = stored.body.get("product_type").and_then(Value::as_str)?;
    let start = stored.body.get("content_date_start").and_then(parse_datetime)?;
    let end = stored
        .body
        .get("content_date_end")
        .and_then(parse_datetime)
        .unwrap_or(start);
    Some(ObservedProduct {
        key: stored.id.clone(),
        sub_type: sub_type.to_string(),
        period: Period::new(start, end)?,
    })
}

fn observation_window(datatake: &Document) -> Option<Period> {
    Period::new(
        datatake.datetime_field("observation_time_start")?,
        datatake.datetime_field("observation_time_end")?,
    )
}

#[async_trait]
impl Engine for DatatakeCompletenessEngine {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn input_classes(&self) -> &[&'static str] {
        &["product"]
    }

    async fn run(&self, ctx: &mut EngineContext<'_>) -> Result<Vec<Report>> {
        let products = self.data.load_inputs(ctx).await?;

        let mut seen = HashSet::new();
        let keys: Vec<String> = products
            .iter()
            .filter_map(|product| product.str_field("datatake_key"))
            .filter(|key| seen.insert(*key))
            .map(str::to_string)
            .collect();
        if keys.is_empty() {
            debug!(engine = Self::NAME, products = products.len(), "No datatake attached to products");
            return Ok(Vec::new());
        }

        let mut datatakes = self.data.fetch_existing(ctx, &DATATAKE, &keys).await?;
        let mut work = Vec::with_capacity(keys.len());
        for key in &keys {
            let Some(datatake) = datatakes.remove(key) else {
                warn!(engine = Self::NAME, datatake = %key, "Attached datatake not found");
                continue;
            };
            let Some(table) = self.mission_table(&datatake) else {
                warn!(engine = Self::NAME, datatake = %key, "No expected-value table for datatake mission");
                continue;
            };
            let Some(window) = observation_window(&datatake) else {
                warn!(engine = Self::NAME, datatake = %key, "Datatake has no observation window");
                continue;
            };
            work.push((datatake, table, window));
        }
        if work.is_empty() {
            return Ok(Vec::new());
        }

        let queries: Vec<SearchQuery> = work
            .iter()
            .map(|(datatake, _, window)| {
                SearchQuery::new(PRODUCT.search_pattern())
                    .with_locations(self.product_locations(window))
                    .term("datatake_key", datatake.id.clone())
            })
            .collect();
        let results = ctx
            .store
            .multi_search(&queries)
            .await
            .map_err(|err| self.data.store_failure(ctx.settings.on_store_error, err))?;

        let now = Utc::now();
        let mut writes = Vec::new();
        let mut unchanged = Vec::new();
        for ((mut datatake, table, window), hits) in work.into_iter().zip(results) {
            let snapshot = datatake.snapshot();
            apply_completeness(&mut datatake, &table, &window, &hits)?;
            if datatake.is_unchanged_since(&snapshot) && !ctx.settings.force {
                debug!(engine = Self::NAME, datatake = %datatake.id, "Completeness unchanged");
                unchanged.push(datatake);
                continue;
            }
            info!(
                engine = Self::NAME,
                datatake = %datatake.id,
                products = hits.len(),
                status = datatake.str_field("completeness_status").unwrap_or_default(),
                "Datatake completeness updated"
            );
            datatake.set_datetime("updated_at", now);
            writes.push(DocumentWrite::Upsert(datatake));
        }

        let mut reports = self.data.write_documents(ctx, writes).await?;
        reports.extend(self.data.replayed_reports(ctx.message.message_id, &unchanged));
        Ok(merge_reports(reports))
    }
}
