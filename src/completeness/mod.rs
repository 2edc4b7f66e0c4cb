//! # Completeness
//!
//! Interval algebra and completeness computation hosted by the consolidation
//! engines.
//!
//! ## Features
//!
//! - **Period algebra**: reduction, missing-period and overlap detection
//! - **Status**: tri-state status as a pure function of the percentage
//! - **Expected values**: per-mission sub-type tables behind an injected lookup
//! - **Roll-up**: local records summed into one global record per aggregate
//! - **Orbits**: enumeration of skipped orbits between two datatakes
//! - **Datatakes**: nearest covering datatake for a product

pub mod datatake;
pub mod expected;
pub mod orbit;
pub mod period;
pub mod rollup;
pub mod status;

pub use datatake::{attach_nearest, temporal_distance, DatatakeCandidate};
pub use expected::{ExpectedValueLookup, ExpectedValueStrategy, MissionTable, SubTypeRule};
pub use orbit::{missing_orbits, OrbitId};
pub use period::{
    compute_duplicated_indicator, compute_missing_periods, covered_duration, reduce_periods,
    DuplicatedIndicator, Period,
};
pub use rollup::{
    compute_local, compute_set, roll_up, CompletenessSet, GlobalCompleteness, LocalCompleteness,
    ObservedProduct,
};
pub use status::{evaluate_status, CompletenessRecord, CompletenessStatus};
