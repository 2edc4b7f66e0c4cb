//! # Expected Values
//!
//! Per-mission tables saying, for each product type (sub-type), how its
//! observed value is measured and what it is expected to reach. Engines get
//! the tables through an injected [`ExpectedValueLookup`] instead of a global.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Duration;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// How a sub-type's observed value is derived
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExpectedValueStrategy {
    /// Covered seconds of the datatake window; expected is the window length
    Duration {
        tolerance_seconds: i64,
        max_gap_offset_seconds: i64,
    },
    /// Number of distinct products
    Count { expected: u32 },
}

impl ExpectedValueStrategy {
    pub fn duration(tolerance_seconds: i64) -> Self {
        Self::Duration {
            tolerance_seconds,
            max_gap_offset_seconds: 0,
        }
    }

    pub fn tolerance(&self) -> Duration {
        match self {
            Self::Duration { tolerance_seconds, .. } => Duration::seconds(*tolerance_seconds),
            Self::Count { .. } => Duration::zero(),
        }
    }

    pub fn max_gap_offset(&self) -> Duration {
        match self {
            Self::Duration {
                max_gap_offset_seconds,
                ..
            } => Duration::seconds(*max_gap_offset_seconds),
            Self::Count { .. } => Duration::zero(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubTypeRule {
    pub strategy: ExpectedValueStrategy,
    /// Sub-types sharing a group are summed into the same global subtotal;
    /// `None` keeps the sub-type out of the global record
    pub global_group: Option<String>,
    /// Instrument mode of the datatakes this sub-type is produced for;
    /// `None` applies to every datatake of the mission
    #[serde(default)]
    pub instrument_mode: Option<String>,
}

impl SubTypeRule {
    pub fn applies_to(&self, modes: &BTreeSet<&str>) -> bool {
        self.instrument_mode
            .as_deref()
            .map_or(true, |mode| modes.contains(mode))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionTable {
    pub mission: String,
    pub orbits_per_cycle: u32,
    pub sub_types: BTreeMap<String, SubTypeRule>,
}

impl MissionTable {
    pub fn new(mission: impl Into<String>, orbits_per_cycle: u32) -> Self {
        Self {
            mission: mission.into(),
            orbits_per_cycle,
            sub_types: BTreeMap::new(),
        }
    }

    pub fn with_sub_type(
        mut self,
        sub_type: impl Into<String>,
        strategy: ExpectedValueStrategy,
        global_group: Option<&str>,
    ) -> Self {
        self.sub_types.insert(
            sub_type.into(),
            SubTypeRule {
                strategy,
                global_group: global_group.map(str::to_string),
                instrument_mode: None,
            },
        );
        self
    }

    /// Restrict `sub_type` to datatakes acquired in `mode`
    pub fn for_mode(mut self, sub_type: &str, mode: &str) -> Self {
        if let Some(rule) = self.sub_types.get_mut(sub_type) {
            rule.instrument_mode = Some(mode.to_string());
        }
        self
    }

    pub fn rule(&self, sub_type: &str) -> Option<&SubTypeRule> {
        self.sub_types.get(sub_type)
    }

    pub fn global_group(&self, sub_type: &str) -> Option<&str> {
        self.rule(sub_type).and_then(|rule| rule.global_group.as_deref())
    }

    /// Instrument modes a datatake is acquired in
    ///
    /// The datatake's own `instrument_mode` wins. Without it the modes are
    /// inferred from the mode-restricted sub-types among `observed`.
    pub fn acquisition_modes<'a>(
        &'a self,
        datatake_mode: Option<&'a str>,
        observed: impl IntoIterator<Item = &'a str>,
    ) -> BTreeSet<&'a str> {
        if let Some(mode) = datatake_mode {
            return BTreeSet::from([mode]);
        }
        observed
            .into_iter()
            .filter_map(|sub_type| self.rule(sub_type)?.instrument_mode.as_deref())
            .collect()
    }

    /// Built-in tables for the Sentinel missions
    pub fn defaults() -> Vec<MissionTable> {
        vec![
            MissionTable::new("S1", 175)
                .with_sub_type("IW_RAW__0S", ExpectedValueStrategy::duration(2), Some("L0"))
                .for_mode("IW_RAW__0S", "IW")
                .with_sub_type("EW_RAW__0S", ExpectedValueStrategy::duration(2), Some("L0"))
                .for_mode("EW_RAW__0S", "EW")
                .with_sub_type("IW_SLC__1S", ExpectedValueStrategy::duration(2), Some("L1"))
                .for_mode("IW_SLC__1S", "IW")
                .with_sub_type("IW_GRDH_1S", ExpectedValueStrategy::duration(2), Some("L1"))
                .for_mode("IW_GRDH_1S", "IW")
                .with_sub_type("EW_GRDM_1S", ExpectedValueStrategy::duration(2), Some("L1"))
                .for_mode("EW_GRDM_1S", "EW")
                .with_sub_type("IW_OCN__2S", ExpectedValueStrategy::duration(2), None)
                .for_mode("IW_OCN__2S", "IW"),
            MissionTable::new("S2", 143)
                .with_sub_type("MSI_L0__DS", ExpectedValueStrategy::duration(4), Some("L0"))
                .with_sub_type("MSI_L1B_DS", ExpectedValueStrategy::duration(4), Some("L1"))
                .with_sub_type("MSI_L1C_DS", ExpectedValueStrategy::duration(4), Some("L1"))
                .with_sub_type("MSI_L2A_DS", ExpectedValueStrategy::duration(4), Some("L2"))
                .with_sub_type("MSIL1C", ExpectedValueStrategy::Count { expected: 1 }, None),
            MissionTable::new("S3", 385)
                .with_sub_type("OL_0_EFR___", ExpectedValueStrategy::duration(1), Some("OLCI"))
                .with_sub_type("OL_1_EFR___", ExpectedValueStrategy::duration(1), Some("OLCI"))
                .with_sub_type("SL_1_RBT___", ExpectedValueStrategy::duration(1), Some("SLSTR"))
                .with_sub_type("SR_1_SRA___", ExpectedValueStrategy::duration(1), Some("SRAL")),
            MissionTable::new("S5P", 227)
                .with_sub_type("L1B_RA_BD1", ExpectedValueStrategy::duration(10), Some("L1B"))
                .with_sub_type("L1B_RA_BD3", ExpectedValueStrategy::duration(10), Some("L1B"))
                .with_sub_type("L2__O3____", ExpectedValueStrategy::Count { expected: 1 }, Some("L2"))
                .with_sub_type("L2__NO2___", ExpectedValueStrategy::Count { expected: 1 }, Some("L2")),
        ]
    }
}

/// Injected read-only view on the mission tables
///
/// `refresh` swaps the whole snapshot at once; readers holding an earlier
/// snapshot keep a consistent view until they ask again.
#[derive(Debug)]
pub struct ExpectedValueLookup {
    tables: RwLock<Arc<HashMap<String, MissionTable>>>,
    generation: AtomicU64,
}

impl Default for ExpectedValueLookup {
    fn default() -> Self {
        Self::new(MissionTable::defaults())
    }
}

impl ExpectedValueLookup {
    pub fn new(tables: Vec<MissionTable>) -> Self {
        Self {
            tables: RwLock::new(Arc::new(index(tables))),
            generation: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> Arc<HashMap<String, MissionTable>> {
        self.tables.read().clone()
    }

    pub fn table(&self, mission: &str) -> Option<MissionTable> {
        self.tables.read().get(mission).cloned()
    }

    pub fn refresh(&self, tables: Vec<MissionTable>) {
        let fresh = Arc::new(index(tables));
        *self.tables.write() = fresh;
        self.generation.fetch_add(1, Ordering::Relaxed);
    }

    /// Incremented by every `refresh`
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Relaxed)
    }
}

fn index(tables: Vec<MissionTable>) -> HashMap<String, MissionTable> {
    tables
        .into_iter()
        .map(|table| (table.mission.clone(), table))
        .collect()
}
