//! # Consolidation Engines
//!
//! Concrete engines of the product pipeline.
//!
//! ```text
//! new.raw-dd-product ─┐
//! new.raw-lta-product ┴─> ProductConsolidator ──> {new,update}.product
//!                                                     │
//!                          DatatakeCompletenessEngine <┘ ──> update.datatake
//! {new,update}.datatake ─> OrbitPlaceholderEngine ──> {new,delete}.orbit-placeholder
//! ```

pub mod datatake_completeness;
pub mod orbit_placeholder;
pub mod product;

use std::sync::Arc;

use crate::collaborators::{CachedNameParser, TileIntersector};
use crate::completeness::ExpectedValueLookup;
use crate::config::CompletenessConfig;
use crate::document::DocumentClass;
use crate::engine::{EngineRegistry, RawDataEngine};
use crate::error::Result;

pub use datatake_completeness::DatatakeCompletenessEngine;
pub use orbit_placeholder::OrbitPlaceholderEngine;
pub use product::{normalize_product_name, product_id, ProductConsolidator};

pub const RAW_DD_PRODUCT: &str = "raw-dd-product";
pub const RAW_LTA_PRODUCT: &str = "raw-lta-product";

pub const PRODUCT: DocumentClass = DocumentClass::monthly("product", "product", "content_date_start");
pub const DATATAKE: DocumentClass =
    DocumentClass::monthly("datatake", "datatake", "observation_time_start");
pub const ORBIT_PLACEHOLDER: DocumentClass =
    DocumentClass::fixed("orbit-placeholder", "orbit-placeholder");

/// Mission of a satellite unit: `S1A` → `S1`, `S5P` → `S5P`
pub fn mission_of(satellite_unit: &str) -> Option<&str> {
    if satellite_unit.starts_with("S5P") {
        return Some("S5P");
    }
    satellite_unit.get(0..2)
}

/// Registry holding every engine of the product pipeline
pub fn default_registry(
    lookup: Arc<ExpectedValueLookup>,
    parser: CachedNameParser,
    tiles: Arc<dyn TileIntersector>,
    config: &CompletenessConfig,
) -> Result<EngineRegistry> {
    let mut registry = EngineRegistry::new();
    registry.register(Arc::new(RawDataEngine::new(ProductConsolidator::new(
        parser,
        tiles,
        config.clone(),
    ))))?;
    registry.register(Arc::new(DatatakeCompletenessEngine::new(
        Arc::clone(&lookup),
        config.clone(),
    )))?;
    registry.register(Arc::new(OrbitPlaceholderEngine::new(lookup)))?;
    Ok(registry)
}
