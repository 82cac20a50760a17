//! Arena maps and the map generation collaborator

pub mod service;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::game::geometry::Point;

pub use service::HttpMapSource;

/// Source of freshly generated maps, one per round
pub trait MapSource: Send + Sync {
    fn fetch(&self) -> BoxFuture<'_, Result<GameMap, MapError>>;
}

/// Closed wall polygon; the last point connects back to the first
#[derive(Debug, Clone, PartialEq)]
pub struct Wall {
    points: Vec<Point>,
}

impl Wall {
    pub fn new(points: Vec<Point>) -> Result<Self, MapError> {
        if points.len() < 2 {
            return Err(MapError::Invalid("wall needs at least two points".into()));
        }
        Ok(Self { points })
    }

    /// Build from a flat `[x0, y0, x1, y1, ...]` coordinate list
    pub fn from_flat(coords: &[f64]) -> Result<Self, MapError> {
        if coords.len() % 2 != 0 {
            return Err(MapError::Invalid(format!(
                "wall has odd coordinate count {}",
                coords.len()
            )));
        }
        let points = coords
            .chunks_exact(2)
            .map(|pair| Point::new(pair[0], pair[1]))
            .collect();
        Self::new(points)
    }

    pub fn edge_count(&self) -> usize {
        self.points.len()
    }

    /// Edge `index` runs from point `index` to the next point, wrapping
    pub fn edge(&self, index: usize) -> (Point, Point) {
        let n = self.points.len();
        (self.points[index % n], self.points[(index + 1) % n])
    }

    pub fn edges(&self) -> impl Iterator<Item = (Point, Point)> + '_ {
        (0..self.edge_count()).map(move |i| self.edge(i))
    }

    /// The two edges sharing an endpoint with edge `index`
    pub fn neighbours(&self, index: usize) -> [(Point, Point); 2] {
        let n = self.points.len();
        [self.edge((index + n - 1) % n), self.edge((index + 1) % n)]
    }

    fn flatten(&self) -> Vec<f64> {
        self.points.iter().flat_map(|p| [p.x, p.y]).collect()
    }
}

/// Map used for one round
#[derive(Debug, Clone)]
pub struct GameMap {
    /// Render-only tile grid
    pub grid: Vec<Vec<i32>>,
    pub walls: Vec<Wall>,
    /// Never empty
    pub spawn_points: Vec<Point>,
}

/// Payload returned by the map generator
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapResponse {
    #[serde(default)]
    pub map: Option<Vec<Vec<i32>>>,
    #[serde(default)]
    pub walls: Option<Vec<Vec<f64>>>,
    #[serde(default)]
    pub spawn_points: Option<Vec<Point>>,
    #[serde(default)]
    pub error: Option<serde_json::Value>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MapPayload<'a> {
    map: &'a [Vec<i32>],
    walls: Vec<Vec<f64>>,
    spawn_points: &'a [Point],
}

impl GameMap {
    /// Validate a generator response
    pub fn from_response(response: MapResponse) -> Result<Self, MapError> {
        match response.error {
            None | Some(serde_json::Value::Null) => {}
            Some(serde_json::Value::String(msg)) => return Err(MapError::Service(msg)),
            Some(other) => return Err(MapError::Service(other.to_string())),
        }

        let walls = response
            .walls
            .unwrap_or_default()
            .iter()
            .map(|flat| Wall::from_flat(flat))
            .collect::<Result<Vec<_>, _>>()?;

        let spawn_points = response.spawn_points.unwrap_or_default();
        if spawn_points.is_empty() {
            return Err(MapError::Invalid("map has no spawn points".into()));
        }

        Ok(Self {
            grid: response.map.unwrap_or_default(),
            walls,
            spawn_points,
        })
    }

    /// Open arena without walls, used before the first round
    pub fn empty() -> Self {
        Self {
            grid: Vec::new(),
            walls: Vec::new(),
            spawn_points: vec![Point::new(0.5, 0.5)],
        }
    }

    /// JSON sent to the display with every new round
    pub fn to_json(&self) -> String {
        let payload = MapPayload {
            map: &self.grid,
            walls: self.walls.iter().map(Wall::flatten).collect(),
            spawn_points: &self.spawn_points,
        };
        // Plain data with finite floats from the generator cannot fail to encode.
        serde_json::to_string(&payload).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Map acquisition errors
#[derive(Debug, thiserror::Error)]
pub enum MapError {
    #[error("Map request failed: {0}")]
    Request(#[source] reqwest::Error),

    #[error("Map service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to parse map response: {0}")]
    Parse(#[source] reqwest::Error),

    #[error("Map service reported an error: {0}")]
    Service(String),

    #[error("Invalid map: {0}")]
    Invalid(String),
}

#[cfg(test)]
pub mod testing {
    //! In-memory map sources for tests

    use super::*;

    pub struct StaticMapSource(pub GameMap);

    impl MapSource for StaticMapSource {
        fn fetch(&self) -> BoxFuture<'_, Result<GameMap, MapError>> {
            let map = self.0.clone();
            Box::pin(async move { Ok(map) })
        }
    }

    pub struct FailingMapSource;

    impl MapSource for FailingMapSource {
        fn fetch(&self) -> BoxFuture<'_, Result<GameMap, MapError>> {
            Box::pin(async { Err(MapError::Service("generator offline".into())) })
        }
    }

    /// Wall-free map with the given spawn points
    pub fn open_map(spawns: &[(f64, f64)]) -> GameMap {
        GameMap {
            grid: vec![vec![0; 2]; 2],
            walls: Vec::new(),
            spawn_points: spawns.iter().map(|&(x, y)| Point::new(x, y)).collect(),
        }
    }
}
