//! # Collaborators
//!
//! Interfaces the engines consume from outside the consolidation core, each
//! with a default implementation.
//!
//! ## Features
//!
//! - **Name parsing**: product filename → attributes, cached process-wide
//! - **Tile intersection**: footprint → candidate tile ids

pub mod name_parser;
pub mod tiles;

pub use name_parser::{CachedNameParser, ProductAttributes, ProductNameParser, SentinelNameParser};
pub use tiles::{BoundingBoxTiles, NoTiles, Tile, TileIntersector};
