//! Plot geometry helpers: GeoJSON parsing, centroids, great-circle distance.
//!
//! Plot boundaries are stored as GeoJSON text (`Point`, `Polygon`,
//! `MultiPolygon`, optionally wrapped in a `Feature`). Positions follow the
//! GeoJSON `[longitude, latitude(, altitude)]` order.

use serde::Deserialize;

const EARTH_RADIUS_KM: f64 = 6371.0;

type Position = Vec<f64>;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", content = "coordinates")]
pub enum Geometry {
    Point(Position),
    Polygon(Vec<Vec<Position>>),
    MultiPolygon(Vec<Vec<Vec<Position>>>),
}

/// A latitude/longitude pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Deserialize)]
struct Feature {
    geometry: Geometry,
}

/// Parse plot geometry text. Accepts a bare geometry or a `Feature`.
pub fn parse_geometry(raw: &str) -> Option<Geometry> {
    if let Ok(geometry) = serde_json::from_str::<Geometry>(raw) {
        return Some(geometry);
    }
    serde_json::from_str::<Feature>(raw).ok().map(|f| f.geometry)
}

impl Geometry {
    /// Vertex-average centroid.
    ///
    /// For polygons the outer ring of each polygon contributes its vertices;
    /// the closing vertex of a closed ring is counted once. Returns `None`
    /// for empty or malformed coordinate lists.
    pub fn centroid(&self) -> Option<Coordinates> {
        match self {
            Geometry::Point(position) => to_coordinates(position),
            Geometry::Polygon(rings) => {
                average(rings.first().map(|r| open_ring(r)).unwrap_or_default())
            }
            Geometry::MultiPolygon(polygons) => {
                let vertices: Vec<Position> = polygons
                    .iter()
                    .filter_map(|rings| rings.first())
                    .flat_map(|ring| open_ring(ring).iter().cloned())
                    .collect();
                average(&vertices)
            }
        }
    }
}

/// Drop the repeated closing vertex of a closed ring.
fn open_ring(ring: &[Position]) -> &[Position] {
    if ring.len() > 1 && ring.first() == ring.last() {
        &ring[..ring.len() - 1]
    } else {
        ring
    }
}

fn to_coordinates(position: &Position) -> Option<Coordinates> {
    match position.as_slice() {
        [lon, lat, ..] => Some(Coordinates { lat: *lat, lon: *lon }),
        _ => None,
    }
}

fn average(vertices: &[Position]) -> Option<Coordinates> {
    let points: Vec<Coordinates> = vertices.iter().filter_map(to_coordinates).collect();
    if points.is_empty() {
        return None;
    }
    let n = points.len() as f64;
    Some(Coordinates {
        lat: points.iter().map(|p| p.lat).sum::<f64>() / n,
        lon: points.iter().map(|p| p.lon).sum::<f64>() / n,
    })
}

/// Great-circle distance in kilometres (haversine).
pub fn haversine_km(a: Coordinates, b: Coordinates) -> f64 {
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lon = (b.lon - a.lon).to_radians();
    let h = (d_lat / 2.0).sin().powi(2)
        + a.lat.to_radians().cos() * b.lat.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.min(1.0).sqrt().asin()
}
