//! # Orbit Placeholders
//!
//! When a datatake arrives, the orbits between it and the previous datatake of
//! the same satellite had no acquisition at all. Each of them gets a
//! placeholder document with a `missing` completeness status, so gaps show up
//! in completeness views instead of silently not existing. A placeholder is
//! deleted once a real datatake for its orbit arrives.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info};

use super::{mission_of, DATATAKE, ORBIT_PLACEHOLDER};
use crate::completeness::{missing_orbits, CompletenessRecord, ExpectedValueLookup, OrbitId};
use crate::document::Document;
use crate::engine::{DataEngine, DocumentWrite, Engine, EngineContext};
use crate::error::Result;
use crate::report::{merge_reports, Report};
use crate::store::{SearchQuery, SortOrder, StoredDocument};

/// `"{satellite}-PLACEHOLDER-{cycle:03}-{orbit:03}"`
pub fn placeholder_id(orbit: &OrbitId) -> String {
    format!(
        "{}-PLACEHOLDER-{:03}-{:03}",
        orbit.satellite, orbit.cycle, orbit.relative_orbit
    )
}

pub struct OrbitPlaceholderEngine {
    lookup: Arc<ExpectedValueLookup>,
    data: DataEngine,
}

impl std::fmt::Debug for OrbitPlaceholderEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrbitPlaceholderEngine")
            .field("lookup_generation", &self.lookup.generation())
            .finish()
    }
}

struct Arrival {
    datatake_id: String,
    orbit: OrbitId,
    orbits_per_cycle: u32,
    observed_at: DateTime<Utc>,
}

impl OrbitPlaceholderEngine {
    pub const NAME: &'static str = "orbit-placeholder";

    pub fn new(lookup: Arc<ExpectedValueLookup>) -> Self {
        Self {
            lookup,
            data: DataEngine::new(Self::NAME),
        }
    }

    fn arrival(&self, datatake: &Document) -> Option<Arrival> {
        let orbit = orbit_of(&datatake.body)?;
        let orbits_per_cycle = mission_of(&orbit.satellite)
            .and_then(|mission| self.lookup.table(mission))?
            .orbits_per_cycle;
        Some(Arrival {
            datatake_id: datatake.id.clone(),
            orbit,
            orbits_per_cycle,
            observed_at: datatake.datetime_field("observation_time_start")?,
        })
    }
}

fn orbit_of(body: &serde_json::Map<String, Value>) -> Option<OrbitId> {
    let satellite = body.get("satellite_unit").and_then(Value::as_str)?;
    let cycle = body.get("cycle_number").and_then(Value::as_u64)?;
    let relative_orbit = body.get("relative_orbit").and_then(Value::as_u64)?;
    Some(OrbitId::new(
        satellite,
        u32::try_from(cycle).ok()?,
        u32::try_from(relative_orbit).ok()?,
    ))
}

fn placeholder(orbit: &OrbitId, previous: &StoredDocument, next: &Arrival) -> Document {
    let mut document = Document::new(ORBIT_PLACEHOLDER.name, placeholder_id(orbit), ORBIT_PLACEHOLDER.location_prefix);
    document.set("satellite_unit", orbit.satellite.clone());
    if let Some(mission) = mission_of(&orbit.satellite) {
        document.set("mission", mission);
    }
    document.set("cycle_number", orbit.cycle);
    document.set("relative_orbit", orbit.relative_orbit);
    document.set("orbit_id", orbit.to_string());
    document.set("placeholder", true);
    document.set("previous_datatake", previous.id.clone());
    document.set("next_datatake", next.datatake_id.clone());
    let record = CompletenessRecord::missing(0.0);
    document.set("completeness_status", record.status.to_string());
    document.set("percentage", record.percentage);
    document.location = ORBIT_PLACEHOLDER.location_for(&document.body);
    document
}

#[async_trait]
impl Engine for OrbitPlaceholderEngine {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn input_classes(&self) -> &[&'static str] {
        &["datatake"]
    }

    async fn run(&self, ctx: &mut EngineContext<'_>) -> Result<Vec<Report>> {
        let datatakes = self.data.load_inputs(ctx).await?;
        let arrivals: Vec<Arrival> = datatakes.iter().filter_map(|datatake| self.arrival(datatake)).collect();
        if arrivals.is_empty() {
            debug!(engine = Self::NAME, datatakes = datatakes.len(), "No orbit information on datatakes");
            return Ok(Vec::new());
        }

        // Newest datatake at or before each arrival, other than the arrival itself
        let queries: Vec<SearchQuery> = arrivals
            .iter()
            .map(|arrival| {
                SearchQuery::new(DATATAKE.search_pattern())
                    .term("satellite_unit", arrival.orbit.satellite.clone())
                    .range("observation_time_start", None, Some(arrival.observed_at))
                    .sort_by("observation_time_start", SortOrder::Desc)
                    .limit(2)
            })
            .collect();
        let results = ctx
            .store
            .multi_search(&queries)
            .await
            .map_err(|err| self.data.store_failure(ctx.settings.on_store_error, err))?;

        let arrived: HashSet<String> = arrivals.iter().map(|arrival| placeholder_id(&arrival.orbit)).collect();
        let mut planned: Vec<Document> = Vec::new();
        let mut planned_ids = HashSet::new();
        for (arrival, hits) in arrivals.iter().zip(results) {
            let Some((previous, previous_orbit)) = hits
                .iter()
                .filter(|hit| hit.id != arrival.datatake_id)
                .find_map(|hit| orbit_of(&hit.body).map(|orbit| (hit, orbit)))
            else {
                continue;
            };
            for orbit in missing_orbits(&previous_orbit, &arrival.orbit, arrival.orbits_per_cycle) {
                let id = placeholder_id(&orbit);
                if arrived.contains(&id) || !planned_ids.insert(id) {
                    continue;
                }
                planned.push(placeholder(&orbit, previous, arrival));
            }
        }

        let mut ids: Vec<String> = planned.iter().map(|document| document.id.clone()).collect();
        ids.extend(arrived.iter().cloned());
        let existing = self.data.fetch_existing(ctx, &ORBIT_PLACEHOLDER, &ids).await?;

        let now = Utc::now();
        let mut writes = Vec::new();
        let mut kept = Vec::new();
        for mut document in planned {
            if let Some(stored) = existing.get(&document.id) {
                kept.push(stored.clone());
                continue;
            }
            document.set_datetime("updated_at", now);
            writes.push(DocumentWrite::Upsert(document));
        }
        let created = writes.len();
        for id in &arrived {
            if let Some(document) = existing.get(id) {
                writes.push(DocumentWrite::Delete(document.clone()));
            }
        }

        info!(
            engine = Self::NAME,
            arrivals = arrivals.len(),
            created = created,
            resolved = writes.len() - created,
            "Orbit placeholders reconciled"
        );
        let mut reports = self.data.write_documents(ctx, writes).await?;
        reports.extend(self.data.replayed_reports(ctx.message.message_id, &kept));
        Ok(merge_reports(reports))
    }
}
