//! # Product Consolidation
//!
//! Folds raw product records from distribution (`raw-dd-product`) and
//! long-term archive (`raw-lta-product`) interfaces into one consolidated
//! `product` document per product, keyed by a uuid-v5 of its normalized name.
//!
//! ## Batch Enrichment
//!
//! `pre_batch` parses every product name once, intersects footprints with the
//! tile grid, and resolves the covering datatake of every product through
//! `multi_search` over per-satellite reduced periods, one round trip per
//! `parent_lookup_batch_size` queries.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use super::{DATATAKE, PRODUCT, RAW_DD_PRODUCT, RAW_LTA_PRODUCT};
use crate::collaborators::{CachedNameParser, ProductAttributes, TileIntersector};
use crate::completeness::{attach_nearest, reduce_periods, DatatakeCandidate, Period};
use crate::config::CompletenessConfig;
use crate::document::{format_datetime, parse_datetime, Document, DocumentClass};
use crate::engine::{DataEngine, EngineContext, HandlerTable, RawConsolidator};
use crate::error::{ConsolidationError, Result};
use crate::store::{SearchQuery, StoredDocument};

const SUFFIXES: [&str; 7] = [".zip", ".tar", ".tgz", ".SAFE", ".SEN3", ".nc", ".EOF"];

/// Product name without archive or container extensions
pub fn normalize_product_name(name: &str) -> &str {
    let mut stem = name.trim();
    while let Some(stripped) = SUFFIXES.iter().find_map(|suffix| stem.strip_suffix(suffix)) {
        stem = stripped;
    }
    stem
}

/// Document id of the consolidated product for a raw product name
pub fn product_id(name: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_URL, normalize_product_name(name).as_bytes()).to_string()
}

pub type ProductHandler = fn(&ProductBatch, &Document, &mut Document) -> Result<()>;

/// Per-message enrichment shared by every handler call
#[derive(Debug, Default)]
pub struct ProductBatch {
    attributes: HashMap<String, ProductAttributes>,
    tiles: HashMap<String, Vec<String>>,
    datatakes: HashMap<String, DatatakeCandidate>,
}

impl ProductBatch {
    /// Parsed attributes by product name
    pub fn attributes(&self, name: &str) -> Option<&ProductAttributes> {
        self.attributes.get(name)
    }

    /// Covering datatake by raw document id
    pub fn datatake(&self, raw_id: &str) -> Option<&DatatakeCandidate> {
        self.datatakes.get(raw_id)
    }

    pub fn tile_ids(&self, raw_id: &str) -> Option<&[String]> {
        self.tiles.get(raw_id).map(Vec::as_slice)
    }
}

pub struct ProductConsolidator {
    parser: CachedNameParser,
    tiles: Arc<dyn TileIntersector>,
    config: CompletenessConfig,
    handlers: HandlerTable<ProductHandler>,
    data: DataEngine,
}

impl std::fmt::Debug for ProductConsolidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProductConsolidator")
            .field("parser", &self.parser)
            .field("config", &self.config)
            .field("handlers", &self.handlers.registered_tags())
            .finish()
    }
}

impl ProductConsolidator {
    pub const NAME: &'static str = "product";

    pub fn new(parser: CachedNameParser, tiles: Arc<dyn TileIntersector>, config: CompletenessConfig) -> Self {
        let handlers = HandlerTable::new()
            .register(RAW_DD_PRODUCT, consolidate_distribution as ProductHandler)
            .register(RAW_LTA_PRODUCT, consolidate_archive as ProductHandler)
            .with_default(consolidate_common as ProductHandler);
        Self {
            parser,
            tiles,
            config,
            handlers,
            data: DataEngine::new(Self::NAME),
        }
    }

    pub fn handlers(&self) -> &HandlerTable<ProductHandler> {
        &self.handlers
    }

    fn delta(&self) -> Duration {
        Duration::seconds(self.config.datatake_time_delta_seconds)
    }

    /// Candidate datatakes per satellite unit, sorted by start then key
    async fn lookup_datatakes(
        &self,
        ctx: &mut EngineContext<'_>,
        periods: &BTreeMap<String, Vec<(String, Period)>>,
    ) -> Result<HashMap<String, Vec<DatatakeCandidate>>> {
        let tolerance = Duration::seconds(self.config.reduce_tolerance_seconds);
        let mut queries = Vec::new();
        let mut owners = Vec::new();
        for (satellite_unit, products) in periods {
            let product_periods: Vec<Period> = products.iter().map(|(_, period)| *period).collect();
            for reduced in reduce_periods(&product_periods, tolerance) {
                let window = reduced.expand(self.delta());
                queries.push(
                    SearchQuery::new(DATATAKE.search_pattern())
                        .term("satellite_unit", satellite_unit.clone())
                        .range("observation_time_start", None, Some(window.end))
                        .range("observation_time_end", Some(window.start), None),
                );
                owners.push(satellite_unit.clone());
            }
        }

        let mut candidates: HashMap<String, Vec<DatatakeCandidate>> = HashMap::new();
        let mut seen = HashSet::new();
        let chunk_size = self.config.parent_lookup_batch_size.max(1);
        for (chunk, chunk_owners) in queries.chunks(chunk_size).zip(owners.chunks(chunk_size)) {
            let results = ctx
                .store
                .multi_search(chunk)
                .await
                .map_err(|err| self.data.store_failure(ctx.settings.on_store_error, err))?;
            for (satellite_unit, hits) in chunk_owners.iter().zip(results) {
                for candidate in hits.iter().filter_map(datatake_candidate) {
                    if seen.insert(candidate.key.clone()) {
                        candidates.entry(satellite_unit.clone()).or_default().push(candidate);
                    }
                }
            }
        }
        for list in candidates.values_mut() {
            list.sort_by(|a, b| (a.period.start, &a.key).cmp(&(b.period.start, &b.key)));
        }

        debug!(
            queries = queries.len(),
            candidates = seen.len(),
            "Resolved datatake candidates"
        );
        Ok(candidates)
    }
}

#[async_trait]
impl RawConsolidator for ProductConsolidator {
    type Batch = ProductBatch;

    fn name(&self) -> &str {
        Self::NAME
    }

    fn input_classes(&self) -> &[&'static str] {
        &[RAW_DD_PRODUCT, RAW_LTA_PRODUCT]
    }

    fn target_class(&self) -> &DocumentClass {
        &PRODUCT
    }

    fn target_id(&self, raw: &Document) -> Result<String> {
        raw.str_field("product_name")
            .filter(|name| !normalize_product_name(name).is_empty())
            .map(product_id)
            .ok_or_else(|| ConsolidationError::transform(&raw.id, "missing product_name"))
    }

    async fn pre_batch(&self, ctx: &mut EngineContext<'_>, raws: &[Document]) -> Result<ProductBatch> {
        self.parser
            .precompute(raws.iter().filter_map(|raw| raw.str_field("product_name")));

        let mut batch = ProductBatch::default();
        let mut periods: BTreeMap<String, Vec<(String, Period)>> = BTreeMap::new();
        for raw in raws {
            let Some(name) = raw.str_field("product_name") else {
                continue;
            };
            if let Some(footprint) = raw.get("footprint") {
                let tile_ids = self.tiles.intersect(footprint);
                if !tile_ids.is_empty() {
                    batch.tiles.insert(raw.id.clone(), tile_ids);
                }
            }
            let Some(attributes) = self.parser.get(name) else {
                continue;
            };
            if let Some(period) = raw_period(raw, Some(&attributes)) {
                periods
                    .entry(attributes.satellite_unit.clone())
                    .or_default()
                    .push((raw.id.clone(), period));
            }
            batch.attributes.insert(name.to_string(), attributes);
        }

        if periods.is_empty() {
            return Ok(batch);
        }
        let candidates = self.lookup_datatakes(ctx, &periods).await?;
        for (satellite_unit, products) in &periods {
            let Some(list) = candidates.get(satellite_unit) else {
                continue;
            };
            for (raw_id, period) in products {
                if let Some(candidate) = attach_nearest(period, list, self.delta()) {
                    batch.datatakes.insert(raw_id.clone(), candidate.clone());
                }
            }
        }
        Ok(batch)
    }

    fn consolidate(&self, batch: &ProductBatch, raw: &Document, target: &mut Document) -> Result<()> {
        let handler = self.handlers.resolve(&raw.class)?;
        handler(batch, raw, target)
    }
}

/// Fields every raw product contributes, whatever its interface
fn consolidate_common(batch: &ProductBatch, raw: &Document, target: &mut Document) -> Result<()> {
    let name = raw
        .str_field("product_name")
        .ok_or_else(|| ConsolidationError::transform(&raw.id, "missing product_name"))?;
    target.set_default("name", name);
    target.set("key", normalize_product_name(name));

    let attributes = batch.attributes(name);
    if let Some(attributes) = attributes {
        target.set("mission", attributes.mission.clone());
        target.set("satellite_unit", attributes.satellite_unit.clone());
        target.set("product_type", attributes.product_type.clone());
    }

    if let Some(period) = raw_period(raw, attributes) {
        let start = target
            .datetime_field("content_date_start")
            .map_or(period.start, |current| current.min(period.start));
        let end = target
            .datetime_field("content_date_end")
            .map_or(period.end, |current| current.max(period.end));
        target.set_datetime("content_date_start", start);
        target.set_datetime("content_date_end", end);
    }

    if let Some(footprint) = raw.get("footprint") {
        target.set_default("footprint", footprint.clone());
    }
    if let Some(tile_ids) = batch.tile_ids(&raw.id) {
        merge_strings(target, "tile_ids", tile_ids);
    }
    if let Some(datatake) = batch.datatake(&raw.id) {
        target.set("datatake_key", datatake.key.clone());
        target.set("datatake_id", datatake.datatake_id.clone());
    }
    Ok(())
}

fn consolidate_distribution(batch: &ProductBatch, raw: &Document, target: &mut Document) -> Result<()> {
    consolidate_common(batch, raw, target)?;
    if let Some(size) = raw.get("product_size") {
        target.set_default("product_size", size.clone());
    }
    record_publication(raw, target, "publications");
    Ok(())
}

fn consolidate_archive(batch: &ProductBatch, raw: &Document, target: &mut Document) -> Result<()> {
    consolidate_common(batch, raw, target)?;
    record_publication(raw, target, "lta_publications");
    Ok(())
}

/// Keep the earliest publication date seen per interface
fn record_publication(raw: &Document, target: &mut Document, field: &str) {
    let Some(published) = raw.datetime_field("publication_date") else {
        return;
    };
    let interface = raw.str_field("interface_name").unwrap_or("unknown");

    let mut publications = target
        .get(field)
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    let earliest = publications
        .get(interface)
        .and_then(parse_datetime)
        .map_or(published, |current| current.min(published));
    publications.insert(interface.to_string(), Value::String(format_datetime(earliest)));
    target.set(field, Value::Object(publications));
}

/// Sorted union of string arrays
fn merge_strings(target: &mut Document, field: &str, values: &[String]) {
    let mut merged: Vec<String> = target
        .get(field)
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default();
    merged.extend(values.iter().cloned());
    merged.sort();
    merged.dedup();
    target.set(field, Value::from(merged));
}

/// Content period of a raw product, falling back to the name's sensing times
fn raw_period(raw: &Document, attributes: Option<&ProductAttributes>) -> Option<Period> {
    let start: DateTime<Utc> = raw
        .datetime_field("content_date_start")
        .or_else(|| attributes.and_then(|a| a.sensing_start))?;
    let end = raw
        .datetime_field("content_date_end")
        .or_else(|| attributes.and_then(|a| a.sensing_stop))
        .unwrap_or(start);
    Period::new(start, end)
}

fn datatake_candidate(stored: &StoredDocument) -> Option<DatatakeCandidate> {
    let start = stored.body.get("observation_time_start").and_then(parse_datetime)?;
    let end = stored.body.get("observation_time_end").and_then(parse_datetime)?;
    let text = |field: &str| stored.body.get(field).and_then(Value::as_str);
    Some(DatatakeCandidate {
        key: stored.id.clone(),
        datatake_id: text("datatake_id").unwrap_or(stored.id.as_str()).to_string(),
        satellite_unit: text("satellite_unit").unwrap_or_default().to_string(),
        period: Period::new(start, end)?,
    })
}
