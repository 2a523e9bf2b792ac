use super::matcher::{match_position, Hypothesis, MatchParams};
use crate::error::Result;
use crate::track::ReferenceTrack;
use crate::types::Fix;
use serde::{Deserialize, Serialize};

/// Lower speed bound is waived during this window after the start (late start)
pub const LATE_START_TOLERANCE_MS: i64 = 30 * 60 * 1000;

/// Plausible speed range in km/h
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpeedBounds {
    pub min_kmh: f64,
    pub max_kmh: f64,
}

/// Position of a row relative to the start
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RowKind {
    /// Fix captured at or before the start time
    PreStart,
    /// Synthetic row at the start time
    Start,
    Running,
}

/// One line of the progress table
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResolvedRow {
    pub timestamp: i64,
    pub lat: f64,
    pub lon: f64,
    pub elapsed_ms: i64,
    pub trail_index: usize,
    pub distance_km: f64,
    pub elevation_gain_m: f64,
    pub velocity_kmh: f64,
    pub alternate: Option<AlternateEstimate>,
    pub kind: RowKind,
}

/// Estimate from the earliest surviving candidate when the match stays ambiguous
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlternateEstimate {
    pub trail_index: usize,
    pub distance_km: f64,
    pub elevation_gain_m: f64,
    pub velocity_kmh: f64,
}

impl ResolvedRow {
    pub fn is_start_marker(&self) -> bool {
        self.kind != RowKind::Running
    }
}

/// Average speed from the start, 0 when no time has elapsed yet
fn velocity_kmh(distance_km: f64, elapsed_ms: i64) -> f64 {
    if elapsed_ms <= 0 {
        return 0.0;
    }
    distance_km / (elapsed_ms as f64 / 3_600_000.0)
}

/// Multi-pass reconciliation of per-fix hypotheses
///
/// # Passes
/// 1. Speed plausibility (fixes at/after start only, lower bound waived for 30 min)
/// 2. Fixes before the start are pinned to trail index 0
/// 3. Monotonic order: no candidate may lie beyond the earliest candidate
///    of the next fix in time
///
/// After each pass the state is recorded as fallback if no hypothesis is
/// empty. Rows are rendered from the last recorded state, so a pass that
/// empties any hypothesis is discarded as a whole.
pub struct Reconciler<'a> {
    track: &'a ReferenceTrack,
    gain: &'a [f64],
    start_time: i64,
    speed: SpeedBounds,
    hypotheses: Vec<Hypothesis>,
    fallback: Vec<Hypothesis>,
}

impl<'a> Reconciler<'a> {
    /// `fixes` must be ascending by timestamp, `gain` one entry per trail point
    pub fn new(
        track: &'a ReferenceTrack,
        gain: &'a [f64],
        fixes: &[Fix],
        params: &MatchParams,
        start_time: i64,
        speed: SpeedBounds,
    ) -> Result<Self> {
        let hypotheses = fixes
            .iter()
            .map(|fix| match_position(fix.lat, fix.lon, track, params))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::from_hypotheses(track, gain, hypotheses, start_time, speed))
    }

    pub fn from_hypotheses(
        track: &'a ReferenceTrack,
        gain: &'a [f64],
        hypotheses: Vec<Hypothesis>,
        start_time: i64,
        speed: SpeedBounds,
    ) -> Self {
        let fallback = hypotheses.clone();
        Reconciler {
            track,
            gain,
            start_time,
            speed,
            hypotheses,
            fallback,
        }
    }

    fn snapshot_if_complete(&mut self) {
        if self.hypotheses.iter().all(|h| !h.is_empty()) {
            self.fallback = self.hypotheses.clone();
        } else {
            log::debug!("Reconciliation pass emptied a hypothesis, keeping previous state");
        }
    }

    fn distance_km(&self, index: usize) -> f64 {
        self.track.distance_at(index).unwrap_or(0.0) / 1000.0
    }

    fn filter_speed(&mut self, fixes: &[Fix]) {
        let start = self.start_time;
        let SpeedBounds { min_kmh, max_kmh } = self.speed;
        let track = self.track;

        for (fix, h) in fixes.iter().zip(self.hypotheses.iter_mut()) {
            let elapsed = fix.timestamp.saturating_sub(start);
            if elapsed < 0 {
                continue;
            }
            h.retain(|ind| {
                let v = velocity_kmh(track.distance_at(ind).unwrap_or(0.0) / 1000.0, elapsed);
                // Bounds are inclusive
                if elapsed < LATE_START_TOLERANCE_MS {
                    v <= max_kmh
                } else {
                    (min_kmh..=max_kmh).contains(&v)
                }
            });
        }
    }

    fn pin_pre_start(&mut self, fixes: &[Fix]) {
        for (fix, h) in fixes.iter().zip(self.hypotheses.iter_mut()) {
            if fix.timestamp < self.start_time {
                *h = Hypothesis::single(0);
            }
        }
    }

    fn enforce_order(&mut self) {
        let mut bound: Option<usize> = None;
        for h in self.hypotheses.iter_mut().rev() {
            if let Some(limit) = bound {
                h.retain(|ind| ind <= limit);
            }
            // An emptied successor imposes no constraint
            bound = h.min();
        }
    }

    fn run_passes(&mut self, fixes: &[Fix]) {
        debug_assert_eq!(fixes.len(), self.hypotheses.len());

        self.filter_speed(fixes);
        self.snapshot_if_complete();

        self.pin_pre_start(fixes);
        self.snapshot_if_complete();

        self.enforce_order();
        self.snapshot_if_complete();
    }

    /// Run all passes and render the rows, newest first
    pub fn resolve(mut self, fixes: &[Fix]) -> Vec<ResolvedRow> {
        self.run_passes(fixes);
        self.materialize(fixes)
    }

    /// Hypotheses after the last pass that left none empty
    pub fn settled(mut self, fixes: &[Fix]) -> Vec<Hypothesis> {
        self.run_passes(fixes);
        self.fallback
    }

    fn materialize(&self, fixes: &[Fix]) -> Vec<ResolvedRow> {
        let mut pre_start = Vec::new();
        let mut running = Vec::new();

        for (fix, h) in fixes.iter().zip(self.fallback.iter()) {
            let elapsed_ms = fix.timestamp.saturating_sub(self.start_time);
            let (Some(first), Some(last)) = (h.min(), h.max()) else {
                continue;
            };

            let distance_km = self.distance_km(last);
            let alternate = if h.len() > 1 {
                let alt_km = self.distance_km(first);
                Some(AlternateEstimate {
                    trail_index: first,
                    distance_km: alt_km,
                    elevation_gain_m: self.gain.get(first).copied().unwrap_or(0.0),
                    velocity_kmh: velocity_kmh(alt_km, elapsed_ms),
                })
            } else {
                None
            };

            let kind = if elapsed_ms <= 0 {
                RowKind::PreStart
            } else {
                RowKind::Running
            };
            let row = ResolvedRow {
                timestamp: fix.timestamp,
                lat: fix.lat,
                lon: fix.lon,
                elapsed_ms,
                trail_index: last,
                distance_km,
                elevation_gain_m: self.gain.get(last).copied().unwrap_or(0.0),
                velocity_kmh: velocity_kmh(distance_km, elapsed_ms),
                alternate,
                kind,
            };
            match kind {
                RowKind::PreStart => pre_start.push(row),
                _ => running.push(row),
            }
        }

        let origin = &self.track.points()[0];
        let start_row = ResolvedRow {
            timestamp: self.start_time,
            lat: origin.lat,
            lon: origin.lon,
            elapsed_ms: 0,
            trail_index: 0,
            distance_km: 0.0,
            elevation_gain_m: 0.0,
            velocity_kmh: 0.0,
            alternate: None,
            kind: RowKind::Start,
        };

        let mut rows = pre_start;
        rows.push(start_row);
        rows.extend(running);
        // Stable: equal timestamps keep pre-start, start, running order
        rows.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        rows
    }
}

/// Match and reconcile a whole fix sequence in one call
pub fn reconcile(
    track: &ReferenceTrack,
    gain: &[f64],
    fixes: &[Fix],
    params: &MatchParams,
    start_time: i64,
    speed: SpeedBounds,
) -> Result<Vec<ResolvedRow>> {
    let reconciler = Reconciler::new(track, gain, fixes, params, start_time, speed)?;
    Ok(reconciler.resolve(fixes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::cumulative_gain;
    use approx::assert_relative_eq;

    const START: i64 = 1_700_000_000_000;
    const MINUTE: i64 = 60_000;

    fn bounds() -> SpeedBounds {
        SpeedBounds {
            min_kmh: 2.0,
            max_kmh: 20.0,
        }
    }

    /// 41 points due east, ~78.6 m apart (~3.1 km), climbing 10 m per point
    fn course() -> ReferenceTrack {
        ReferenceTrack::from_coords(
            (0..41).map(|i| (45.0, 5.0 + i as f64 * 0.001, Some(100.0 + 10.0 * i as f64))),
        )
        .unwrap()
    }

    fn fix_at_index(track: &ReferenceTrack, index: usize, ts: i64) -> Fix {
        let p = track.point(index).unwrap();
        Fix::new(ts, p.lat, p.lon)
    }

    #[test]
    fn test_pre_start_fixes_resolve_to_origin() {
        let track = course();
        let gain = cumulative_gain(&track);
        let fixes = vec![
            fix_at_index(&track, 3, START - 10 * MINUTE),
            fix_at_index(&track, 5, START - 5 * MINUTE),
            fix_at_index(&track, 10, START + 20 * MINUTE),
        ];

        let rows = reconcile(&track, &gain, &fixes, &MatchParams::default(), START, bounds()).unwrap();
        assert_eq!(rows.len(), 4);

        let starts: Vec<&ResolvedRow> = rows.iter().filter(|r| r.kind == RowKind::Start).collect();
        assert_eq!(starts.len(), 1);
        assert_eq!(starts[0].elapsed_ms, 0);
        assert_eq!(starts[0].distance_km, 0.0);
        assert_eq!(starts[0].elevation_gain_m, 0.0);

        let pre: Vec<&ResolvedRow> = rows.iter().filter(|r| r.kind == RowKind::PreStart).collect();
        assert_eq!(pre.len(), 2);
        assert!(pre.iter().all(|r| r.trail_index == 0 && r.is_start_marker()));

        // Newest first
        assert_eq!(rows[0].timestamp, START + 20 * MINUTE);
        assert_eq!(rows[0].trail_index, 10);
        assert_eq!(rows[1].kind, RowKind::Start);
        assert_eq!(rows[3].timestamp, START - 10 * MINUTE);
    }

    #[test]
    fn test_row_values() {
        let track = course();
        let gain = cumulative_gain(&track);
        let fixes = vec![fix_at_index(&track, 20, START + 30 * MINUTE)];

        let rows = reconcile(&track, &gain, &fixes, &MatchParams::default(), START, bounds()).unwrap();
        let row = &rows[0];
        assert_eq!(row.trail_index, 20);
        assert_relative_eq!(row.distance_km, track.distance_at(20).unwrap() / 1000.0);
        assert_relative_eq!(row.velocity_kmh, row.distance_km * 2.0);
        assert_eq!(row.elevation_gain_m, 200.0);
        assert!(row.alternate.is_none());
        assert!(!row.is_start_marker());
    }

    #[test]
    fn test_speed_filter_drops_implausible_candidate() {
        let track = course();
        let gain = cumulative_gain(&track);
        // After one hour index 2 (~0.16 km) is below the minimum speed,
        // index 30 (~2.36 km) is plausible
        let fixes = vec![Fix::new(START + 60 * MINUTE, 45.0, 5.0)];
        let rows = Reconciler::from_hypotheses(&track, &gain, vec![hypothesis(&[2, 30])], START, bounds())
            .resolve(&fixes);
        let row = rows.iter().find(|r| r.kind == RowKind::Running).unwrap();
        assert_eq!(row.trail_index, 30);
        assert!(row.alternate.is_none());
    }

    #[test]
    fn test_late_start_waives_lower_bound() {
        let track = course();
        let gain = cumulative_gain(&track);

        // Still at the origin after 10 minutes: kept
        let early = vec![Fix::new(START + 10 * MINUTE, 45.0, 5.0)];
        let settled = Reconciler::from_hypotheses(&track, &gain, vec![hypothesis(&[0])], START, bounds())
            .settled(&early);
        assert_eq!(settled[0].candidates(), &[0]);

        // After 40 minutes the origin is too slow, index 20 is plausible
        let late = vec![Fix::new(START + 40 * MINUTE, 45.0, 5.0)];
        let settled =
            Reconciler::from_hypotheses(&track, &gain, vec![hypothesis(&[0, 20])], START, bounds())
                .settled(&late);
        assert_eq!(settled[0].candidates(), &[20]);

        // Nothing plausible left: the pass is discarded
        let settled = Reconciler::from_hypotheses(&track, &gain, vec![hypothesis(&[0])], START, bounds())
            .settled(&late);
        assert_eq!(settled[0].candidates(), &[0]);
    }

    #[test]
    fn test_emptying_pass_falls_back() {
        let track = course();
        let gain = cumulative_gain(&track);
        // 3 km in 5 minutes: too fast for every candidate
        let fixes = vec![Fix::new(START + 5 * MINUTE, 45.0, 5.04)];
        let rows = Reconciler::from_hypotheses(&track, &gain, vec![hypothesis(&[40])], START, bounds())
            .resolve(&fixes);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].kind, RowKind::Running);
        assert_eq!(rows[0].trail_index, 40);
    }

    #[test]
    fn test_order_enforcement() {
        let track = course();
        let gain = cumulative_gain(&track);
        let fixes = vec![
            Fix::new(START + 20 * MINUTE, 45.0, 5.0),
            Fix::new(START + 25 * MINUTE, 45.0, 5.0),
        ];
        // The earlier fix may be at 10 or 35, the later one is surely at 30
        let hypotheses = vec![hypothesis(&[10, 35]), hypothesis(&[30])];
        let settled = Reconciler::from_hypotheses(&track, &gain, hypotheses, START, bounds()).settled(&fixes);
        assert_eq!(settled[0].candidates(), &[10]);
        assert_eq!(settled[1].candidates(), &[30]);
    }

    #[test]
    fn test_alternate_estimate_for_ambiguous_fix() {
        let track = course();
        let gain = cumulative_gain(&track);
        let fixes = vec![Fix::new(START + 20 * MINUTE, 45.0, 5.0)];
        let rows =
            Reconciler::from_hypotheses(&track, &gain, vec![hypothesis(&[15, 30])], START, bounds())
                .resolve(&fixes);
        let row = rows.iter().find(|r| r.kind == RowKind::Running).unwrap();
        assert_eq!(row.trail_index, 30);
        let alt = row.alternate.as_ref().unwrap();
        assert_eq!(alt.trail_index, 15);
        assert_eq!(alt.elevation_gain_m, 150.0);
        assert_relative_eq!(alt.velocity_kmh, alt.distance_km * 3.0, epsilon = 1e-9);
    }

    #[test]
    fn test_matched_indices_non_decreasing() {
        let track = course();
        let gain = cumulative_gain(&track);
        // ~2.2 km/h, slightly north of the course
        let fixes: Vec<Fix> = (1..=5)
            .map(|k| {
                let p = track.point(7 * k).unwrap();
                Fix::new(START + k as i64 * 15 * MINUTE, p.lat + 0.0001, p.lon)
            })
            .collect();

        let rows = reconcile(&track, &gain, &fixes, &MatchParams::default(), START, bounds()).unwrap();
        let mut chronological: Vec<&ResolvedRow> =
            rows.iter().filter(|r| r.kind == RowKind::Running).collect();
        chronological.reverse();
        assert_eq!(chronological.len(), 5);
        for pair in chronological.windows(2) {
            assert!(pair[0].trail_index <= pair[1].trail_index);
        }
        assert_eq!(chronological[4].trail_index, 35);
    }

    #[test]
    fn test_start_row_without_fixes() {
        let track = course();
        let gain = cumulative_gain(&track);
        let rows = reconcile(&track, &gain, &[], &MatchParams::default(), START, bounds()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].kind, RowKind::Start);
        assert_eq!(rows[0].lat, 45.0);
    }

    #[test]
    fn test_speed_bounds_are_inclusive() {
        let track = course();
        let gain = cumulative_gain(&track);
        let fixes = vec![fix_at_index(&track, 20, START + 60 * MINUTE)];
        let v = velocity_kmh(track.distance_at(20).unwrap() / 1000.0, 60 * MINUTE);
        let exact = SpeedBounds {
            min_kmh: v,
            max_kmh: v,
        };

        let settled = Reconciler::from_hypotheses(&track, &gain, vec![hypothesis(&[20])], START, exact)
            .settled(&fixes);
        assert_eq!(settled[0].candidates(), &[20]);

        // Inside the late-start window only the upper bound applies
        let early = vec![fix_at_index(&track, 20, START + 10 * MINUTE)];
        let v_early = velocity_kmh(track.distance_at(20).unwrap() / 1000.0, 10 * MINUTE);
        let upper = SpeedBounds {
            min_kmh: 1_000.0,
            max_kmh: v_early,
        };
        let mut reconciler = Reconciler::from_hypotheses(&track, &gain, vec![hypothesis(&[20])], START, upper);
        reconciler.filter_speed(&early);
        assert_eq!(reconciler.hypotheses[0].candidates(), &[20]);
    }

    #[test]
    fn test_order_pass_emptying_keeps_previous_snapshot() {
        let track = course();
        let gain = cumulative_gain(&track);
        // Second fix lies behind the first: ordering would empty the first hypothesis
        let fixes = vec![
            fix_at_index(&track, 30, START + 20 * MINUTE),
            fix_at_index(&track, 10, START + 25 * MINUTE),
        ];

        let reconciler =
            Reconciler::new(&track, &gain, &fixes, &MatchParams::default(), START, bounds()).unwrap();
        let settled = reconciler.settled(&fixes);
        assert_eq!(settled[0].candidates(), &[30]);
        assert_eq!(settled[1].candidates(), &[10]);

        let rows = reconcile(&track, &gain, &fixes, &MatchParams::default(), START, bounds()).unwrap();
        let running: Vec<usize> = rows
            .iter()
            .filter(|r| r.kind == RowKind::Running)
            .map(|r| r.trail_index)
            .collect();
        assert_eq!(running, vec![10, 30]);
    }

    #[test]
    fn test_extreme_start_time_does_not_overflow() {
        let track = course();
        let gain = cumulative_gain(&track);
        let fixes = vec![fix_at_index(&track, 5, START)];

        for start in [i64::MIN, i64::MAX] {
            let rows = reconcile(&track, &gain, &fixes, &MatchParams::default(), start, bounds()).unwrap();
            assert_eq!(rows.len(), 2);
            assert!(rows.iter().any(|r| r.kind == RowKind::Start));
        }
    }

    fn hypothesis(indices: &[usize]) -> Hypothesis {
        Hypothesis::from_candidates(indices.to_vec())
    }
}
