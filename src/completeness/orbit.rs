//! Orbit identifiers and enumeration of skipped orbits.
//!
//! An orbit id is `"{satellite}-{cycle:03}-{relative_orbit:03}"`, so ids of
//! one satellite sort the same way as the orbits they name.

use std::fmt;
use std::str::FromStr;

use crate::error::ConsolidationError;

/// Safety bound on enumeration between two far-apart orbits
pub const MAX_MISSING_ORBITS: usize = 10_000;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OrbitId {
    pub satellite: String,
    pub cycle: u32,
    pub relative_orbit: u32,
}

impl OrbitId {
    pub fn new(satellite: impl Into<String>, cycle: u32, relative_orbit: u32) -> Self {
        Self {
            satellite: satellite.into(),
            cycle,
            relative_orbit,
        }
    }

    /// The orbit before this one, wrapping to the last orbit of the previous
    /// cycle. `None` before the very first orbit.
    pub fn previous(&self, orbits_per_cycle: u32) -> Option<Self> {
        if self.relative_orbit > 1 {
            return Some(Self::new(self.satellite.clone(), self.cycle, self.relative_orbit - 1));
        }
        if self.cycle == 0 || orbits_per_cycle == 0 {
            return None;
        }
        Some(Self::new(self.satellite.clone(), self.cycle - 1, orbits_per_cycle - 1))
    }
}

impl fmt::Display for OrbitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:03}-{:03}", self.satellite, self.cycle, self.relative_orbit)
    }
}

impl FromStr for OrbitId {
    type Err = ConsolidationError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let invalid = || ConsolidationError::invalid_payload(format!("invalid orbit id {raw}"));

        // Satellite names may themselves contain dashes
        let mut parts = raw.rsplitn(3, '-');
        let orbit = parts.next().ok_or_else(invalid)?;
        let cycle = parts.next().ok_or_else(invalid)?;
        let satellite = parts.next().filter(|s| !s.is_empty()).ok_or_else(invalid)?;

        Ok(Self::new(
            satellite,
            cycle.parse().map_err(|_| invalid())?,
            orbit.parse().map_err(|_| invalid())?,
        ))
    }
}

/// Every orbit strictly between `previous` and `current`, newest first
///
/// Walks back from `current` one relative orbit at a time; when the relative
/// orbit reaches zero the walk continues from orbit `orbits_per_cycle - 1` of
/// the previous cycle. Returns nothing when the ids belong to different
/// satellites or `previous` is not older than `current`.
pub fn missing_orbits(previous: &OrbitId, current: &OrbitId, orbits_per_cycle: u32) -> Vec<OrbitId> {
    if previous.satellite != current.satellite || previous >= current {
        return Vec::new();
    }

    let mut missing = Vec::new();
    let mut cursor = current.previous(orbits_per_cycle);
    while let Some(orbit) = cursor {
        if &orbit <= previous || missing.len() >= MAX_MISSING_ORBITS {
            break;
        }
        cursor = orbit.previous(orbits_per_cycle);
        missing.push(orbit);
    }
    missing
}
