use super::ReferenceTrack;

/// Hysteresis band (m): the profile is flat until it leaves the current plateau by more than this
pub const GAIN_STEP_M: f64 = 9.0;

/// Noise-tolerant cumulative climb, one entry per trail point
///
/// Single forward pass, no lookahead:
/// - a climb of more than `GAIN_STEP_M` above the baseline is credited in full
///   and becomes the new baseline
/// - a drop of more than `GAIN_STEP_M` moves the baseline down without credit
/// - anything inside the band is ignored
///
/// Points without elevation repeat the previous value, a leading run of them
/// stays at zero.
pub fn cumulative_gain(track: &ReferenceTrack) -> Vec<f64> {
    let mut gain = Vec::with_capacity(track.len());
    let mut total = 0.0;
    let mut baseline: Option<f64> = None;

    for point in track.points() {
        if let Some(ele) = point.elevation {
            match baseline {
                None => baseline = Some(ele),
                Some(base) if ele > base + GAIN_STEP_M => {
                    total += ele - base;
                    baseline = Some(ele);
                }
                Some(base) if ele < base - GAIN_STEP_M => {
                    baseline = Some(ele);
                }
                Some(_) => {}
            }
        }
        gain.push(total);
    }

    gain
}
