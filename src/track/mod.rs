pub mod elevation;
pub mod gpx_parser;

pub use elevation::{cumulative_gain, GAIN_STEP_M};
pub use gpx_parser::parse_gpx;

use crate::error::{Result, TrailError};
use crate::types::TrailPoint;
use geo::{HaversineDistance, Point};

/// Great-circle distance in meters between two (lat, lon) pairs
pub fn great_circle_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    Point::new(lon1, lat1).haversine_distance(&Point::new(lon2, lat2))
}

/// Ordered, immutable reference course
///
/// Built once per track identifier from raw `(lat, lon, elevation)` triples;
/// cumulative distance is computed at construction and never changes.
#[derive(Clone, Debug)]
pub struct ReferenceTrack {
    points: Vec<TrailPoint>,
}

impl ReferenceTrack {
    pub fn from_coords<I>(coords: I) -> Result<Self>
    where
        I: IntoIterator<Item = (f64, f64, Option<f64>)>,
    {
        let mut points: Vec<TrailPoint> = Vec::new();
        for (index, (lat, lon, elevation)) in coords.into_iter().enumerate() {
            let cumulative_distance = match points.last() {
                Some(prev) => {
                    prev.cumulative_distance + great_circle_distance(prev.lat, prev.lon, lat, lon)
                }
                None => 0.0,
            };
            points.push(TrailPoint {
                lat,
                lon,
                elevation,
                index,
                cumulative_distance,
            });
        }

        if points.is_empty() {
            return Err(TrailError::EmptyTrack);
        }
        Ok(ReferenceTrack { points })
    }

    /// Parse a GPX document into a track
    pub fn parse(trace_text: &str) -> Result<Self> {
        parse_gpx(trace_text)
    }

    pub fn points(&self) -> &[TrailPoint] {
        &self.points
    }

    pub fn point(&self, index: usize) -> Option<&TrailPoint> {
        self.points.get(index)
    }

    /// Cumulative distance in meters at `index`
    pub fn distance_at(&self, index: usize) -> Option<f64> {
        self.points.get(index).map(|p| p.cumulative_distance)
    }

    pub fn total_distance(&self) -> f64 {
        self.points
            .last()
            .map(|p| p.cumulative_distance)
            .unwrap_or(0.0)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}
