use crate::error::{Result, TrailError};
use crate::track::{great_circle_distance, ReferenceTrack};
use serde::{Deserialize, Serialize};

/// Tuning of the candidate search
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchParams {
    /// Multiplier applied to the nearest-point distance
    pub factor: f64,
    /// GPS noise allowance in meters, added to the scaled distance
    pub noise_floor_m: f64,
}

impl Default for MatchParams {
    fn default() -> Self {
        MatchParams {
            factor: 1.5,
            noise_floor_m: 30.0,
        }
    }
}

impl MatchParams {
    /// The nearest point must always fall inside the search radius, which
    /// needs `factor >= 1` and a positive noise floor
    pub fn validate(&self) -> Result<()> {
        if !(self.factor.is_finite() && self.factor >= 1.0) {
            return Err(TrailError::validation(format!(
                "matching factor must be >= 1, got {}",
                self.factor
            )));
        }
        if !(self.noise_floor_m.is_finite() && self.noise_floor_m > 0.0) {
            return Err(TrailError::validation(format!(
                "matching noise floor must be > 0 m, got {}",
                self.noise_floor_m
            )));
        }
        Ok(())
    }
}

/// Candidate trail indices for one fix, ascending
///
/// Reconciliation only ever removes candidates.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Hypothesis {
    candidates: Vec<usize>,
}

impl Hypothesis {
    /// Hypothesis pinned to a single trail index
    pub fn single(index: usize) -> Self {
        Hypothesis {
            candidates: vec![index],
        }
    }

    /// Hypothesis from arbitrary indices, sorted and deduplicated
    pub fn from_candidates(mut candidates: Vec<usize>) -> Self {
        candidates.sort_unstable();
        candidates.dedup();
        Hypothesis { candidates }
    }

    pub fn candidates(&self) -> &[usize] {
        &self.candidates
    }

    pub fn min(&self) -> Option<usize> {
        self.candidates.first().copied()
    }

    pub fn max(&self) -> Option<usize> {
        self.candidates.last().copied()
    }

    pub fn contains(&self, index: usize) -> bool {
        self.candidates.binary_search(&index).is_ok()
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn retain<F: FnMut(usize) -> bool>(&mut self, mut keep: F) {
        self.candidates.retain(|i| keep(*i));
    }
}

/// Index of the trail point nearest to (lat, lon); first one wins ties
pub fn nearest_index(lat: f64, lon: f64, track: &ReferenceTrack) -> Result<usize> {
    nearest_in(lat, lon, track, 0, track.len())
}

fn nearest_in(lat: f64, lon: f64, track: &ReferenceTrack, start: usize, end: usize) -> Result<usize> {
    let mut best: Option<(usize, f64)> = None;
    for point in &track.points()[start..end] {
        let d = great_circle_distance(lat, lon, point.lat, point.lon);
        match best {
            Some((_, best_d)) if d >= best_d => {}
            _ => best = Some((point.index, d)),
        }
    }
    best.map(|(i, _)| i).ok_or(TrailError::EmptyTrack)
}

/// Build the hypothesis for one position
///
/// # Algorithm
/// 1. Exhaustive nearest-point search
/// 2. `threshold = noise_floor_m + factor * nearest_distance`
/// 3. Every maximal run of consecutive points closer than the threshold
///    contributes its locally nearest index
///
/// A course passing twice near the same spot (loop, switchback) yields one
/// candidate per pass.
pub fn match_position(
    lat: f64,
    lon: f64,
    track: &ReferenceTrack,
    params: &MatchParams,
) -> Result<Hypothesis> {
    params.validate()?;
    let nearest = nearest_index(lat, lon, track)?;
    let nearest_point = &track.points()[nearest];
    let threshold = params.noise_floor_m
        + params.factor * great_circle_distance(lat, lon, nearest_point.lat, nearest_point.lon);

    let mut candidates = Vec::new();
    let mut run_start: Option<usize> = None;
    for (i, point) in track.points().iter().enumerate() {
        let close = great_circle_distance(lat, lon, point.lat, point.lon) < threshold;
        match (close, run_start) {
            (true, None) => run_start = Some(i),
            (false, Some(start)) => {
                candidates.push(nearest_in(lat, lon, track, start, i)?);
                run_start = None;
            }
            _ => {}
        }
    }
    if let Some(start) = run_start {
        candidates.push(nearest_in(lat, lon, track, start, track.len())?);
    }

    Ok(Hypothesis { candidates })
}
