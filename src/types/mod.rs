use serde::{Deserialize, Serialize};

/// One timestamped position observation, device-sourced or imported
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Fix {
    pub timestamp: i64, // epoch milliseconds
    pub lat: f64,
    pub lon: f64,
}

impl Fix {
    pub fn new(timestamp: i64, lat: f64, lon: f64) -> Self {
        Fix { timestamp, lat, lon }
    }

    /// Fix as stored after a device request: whole seconds, 4 decimals
    pub fn rounded(timestamp: i64, lat: f64, lon: f64) -> Self {
        let round4 = |v: f64| (v * 10_000.0).round() / 10_000.0;
        let seconds = (timestamp as f64 / 1000.0).round() as i64;
        Fix {
            timestamp: seconds * 1000,
            lat: round4(lat),
            lon: round4(lon),
        }
    }
}

/// One point of the reference track
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrailPoint {
    pub lat: f64,
    pub lon: f64,
    pub elevation: Option<f64>,
    pub index: usize,
    pub cumulative_distance: f64, // meters from start
}

/// Fixes of one session key, ascending by timestamp, unique timestamps
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FixLog {
    fixes: Vec<Fix>,
}

impl FixLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert keeping chronological order. Returns false if a fix with the
    /// same timestamp is already present.
    pub fn insert(&mut self, fix: Fix) -> bool {
        match self
            .fixes
            .binary_search_by_key(&fix.timestamp, |f| f.timestamp)
        {
            Ok(_) => false,
            Err(pos) => {
                self.fixes.insert(pos, fix);
                true
            }
        }
    }

    /// Merge several fixes, returns how many were new
    pub fn extend<I: IntoIterator<Item = Fix>>(&mut self, fixes: I) -> usize {
        fixes.into_iter().filter(|f| self.insert(*f)).count()
    }

    pub fn as_slice(&self) -> &[Fix] {
        &self.fixes
    }

    pub fn len(&self) -> usize {
        self.fixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fixes.is_empty()
    }
}

impl FromIterator<Fix> for FixLog {
    fn from_iter<I: IntoIterator<Item = Fix>>(iter: I) -> Self {
        let mut log = FixLog::new();
        log.extend(iter);
        log
    }
}
