//! Geo-tile intersection of product footprints.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub trait TileIntersector: Send + Sync {
    /// Candidate tile ids for a GeoJSON footprint
    fn intersect(&self, footprint: &Value) -> Vec<String>;
}

/// Intersector for deployments without a tile grid
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTiles;

impl TileIntersector for NoTiles {
    fn intersect(&self, _footprint: &Value) -> Vec<String> {
        Vec::new()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tile {
    pub id: String,
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

/// Axis-aligned tile grid matched against the footprint's bounding box
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BoundingBoxTiles {
    tiles: Vec<Tile>,
}

impl BoundingBoxTiles {
    pub fn new(tiles: Vec<Tile>) -> Self {
        Self { tiles }
    }
}

impl TileIntersector for BoundingBoxTiles {
    fn intersect(&self, footprint: &Value) -> Vec<String> {
        let Some((min_lon, min_lat, max_lon, max_lat)) = bounding_box(footprint) else {
            return Vec::new();
        };
        self.tiles
            .iter()
            .filter(|tile| {
                tile.min_lon <= max_lon
                    && min_lon <= tile.max_lon
                    && tile.min_lat <= max_lat
                    && min_lat <= tile.max_lat
            })
            .map(|tile| tile.id.clone())
            .collect()
    }
}

/// Bounding box of every `[lon, lat]` pair nested under `coordinates`
fn bounding_box(footprint: &Value) -> Option<(f64, f64, f64, f64)> {
    let mut points = Vec::new();
    collect_points(footprint.get("coordinates")?, &mut points);

    let (first_lon, first_lat) = *points.first()?;
    Some(points.iter().fold(
        (first_lon, first_lat, first_lon, first_lat),
        |(min_lon, min_lat, max_lon, max_lat), &(lon, lat)| {
            (min_lon.min(lon), min_lat.min(lat), max_lon.max(lon), max_lat.max(lat))
        },
    ))
}

fn collect_points(value: &Value, points: &mut Vec<(f64, f64)>) {
    let Some(items) = value.as_array() else {
        return;
    };
    match (items.first().and_then(Value::as_f64), items.get(1).and_then(Value::as_f64)) {
        (Some(lon), Some(lat)) => points.push((lon, lat)),
        _ => items.iter().for_each(|item| collect_points(item, points)),
    }
}
