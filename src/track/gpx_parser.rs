use super::ReferenceTrack;
use crate::error::{Result, TrailError};

/// Parse a GPX document into a [`ReferenceTrack`]
///
/// Only the first `<trk>` is used; its segments are concatenated in order.
/// Route and waypoint elements are ignored.
///
/// # Errors
/// - `Parse` when the XML is not a valid GPX document
/// - `EmptyTrack` when there is no track or the first track has no points
pub fn parse_gpx(trace_text: &str) -> Result<ReferenceTrack> {
    let gpx = gpx::read(trace_text.as_bytes()).map_err(|e| TrailError::Parse(e.to_string()))?;

    let track = gpx.tracks.into_iter().next().ok_or(TrailError::EmptyTrack)?;

    let coords: Vec<(f64, f64, Option<f64>)> = track
        .segments
        .into_iter()
        .flat_map(|segment| segment.points.into_iter())
        .map(|waypoint| {
            let point = waypoint.point();
            (point.y(), point.x(), waypoint.elevation)
        })
        .collect();

    log::debug!("Parsed GPX track with {} points", coords.len());
    ReferenceTrack::from_coords(coords)
}
