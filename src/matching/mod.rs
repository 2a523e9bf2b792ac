pub mod matcher;
pub mod reconciler;

pub use matcher::{match_position, nearest_index, Hypothesis, MatchParams};
pub use reconciler::{
    reconcile, AlternateEstimate, Reconciler, ResolvedRow, RowKind, SpeedBounds,
    LATE_START_TOLERANCE_MS,
};
