//! # Product Name Parsing
//!
//! Product filenames encode mission, satellite unit, product type and sensing
//! times. Engines never parse names themselves: they go through a
//! [`CachedNameParser`], which parses each distinct name once per process and
//! lets an engine warm the cache for a whole batch up front.

use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Attributes extracted from a product name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductAttributes {
    /// `S1`, `S2`, `S3` or `S5P`
    pub mission: String,
    /// Mission plus unit letter, e.g. `S1A`; `S5P` has no unit letter
    pub satellite_unit: String,
    pub product_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sensing_start: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sensing_stop: Option<DateTime<Utc>>,
}

pub trait ProductNameParser: Send + Sync {
    /// `None` when the name does not follow a known convention
    fn parse(&self, name: &str) -> Option<ProductAttributes>;
}

/// Parser for Sentinel-1/2/3/5P filenames
#[derive(Debug, Clone, Copy, Default)]
pub struct SentinelNameParser;

impl ProductNameParser for SentinelNameParser {
    fn parse(&self, name: &str) -> Option<ProductAttributes> {
        let mission = if name.starts_with("S5P") {
            "S5P"
        } else {
            match name.get(0..2)? {
                m @ ("S1" | "S2" | "S3") => m,
                _ => return None,
            }
        };
        let satellite_unit = name.get(0..3)?;
        let operational = name.get(4..8) == Some("OPER");

        let product_type = match mission {
            "S1" => name.get(4..14)?,
            "S2" if operational => name.get(9..19)?,
            "S2" => name.get(4..10)?,
            "S3" => name.get(4..15)?,
            _ => name.get(9..19)?,
        };

        let (sensing_start, sensing_stop) = sensing_times(name);
        Some(ProductAttributes {
            mission: mission.to_string(),
            satellite_unit: satellite_unit.to_string(),
            product_type: product_type.to_string(),
            sensing_start,
            sensing_stop,
        })
    }
}

/// Sensing window from `YYYYMMDDTHHMMSS` tokens
///
/// An `S`-prefixed token marks the sensing start explicitly; otherwise the
/// first two plain tokens are start and stop.
fn sensing_times(name: &str) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
    let stem = name.split('.').next().unwrap_or(name);
    let mut plain = Vec::new();
    let mut prefixed = None;
    for token in stem.split('_') {
        if let Some(at) = parse_timestamp(token) {
            plain.push(at);
        } else if let Some(rest) = token.strip_prefix('S') {
            if let Some(at) = parse_timestamp(rest) {
                prefixed.get_or_insert(at);
            }
        }
    }

    match prefixed {
        Some(start) => (Some(start), None),
        None => (plain.first().copied(), plain.get(1).copied()),
    }
}

fn parse_timestamp(token: &str) -> Option<DateTime<Utc>> {
    if token.len() != 15 {
        return None;
    }
    NaiveDateTime::parse_from_str(token, "%Y%m%dT%H%M%S")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Process-wide parse cache in front of a [`ProductNameParser`]
///
/// The cache map is shared by `Arc`, so every engine built from one
/// `CachedNameParser` (or its clones) sees the same entries.
#[derive(Clone)]
pub struct CachedNameParser {
    inner: Arc<dyn ProductNameParser>,
    cache: Arc<DashMap<String, Option<ProductAttributes>>>,
}

impl std::fmt::Debug for CachedNameParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedNameParser")
            .field("cached", &self.cache.len())
            .finish()
    }
}

impl Default for CachedNameParser {
    fn default() -> Self {
        Self::new(Arc::new(SentinelNameParser))
    }
}

impl CachedNameParser {
    pub fn new(inner: Arc<dyn ProductNameParser>) -> Self {
        Self {
            inner,
            cache: Arc::new(DashMap::new()),
        }
    }

    /// Parse every name not cached yet; returns how many were parsed
    pub fn precompute<'a, I>(&self, names: I) -> usize
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut parsed = 0;
        for name in names {
            if self.cache.contains_key(name) {
                continue;
            }
            self.cache.insert(name.to_string(), self.inner.parse(name));
            parsed += 1;
        }
        if parsed > 0 {
            debug!(parsed = parsed, cached = self.cache.len(), "Precomputed product names");
        }
        parsed
    }

    /// Cached attributes, parsing on a miss
    pub fn get(&self, name: &str) -> Option<ProductAttributes> {
        if let Some(entry) = self.cache.get(name) {
            return entry.value().clone();
        }
        let attributes = self.inner.parse(name);
        self.cache.insert(name.to_string(), attributes.clone());
        attributes
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}
