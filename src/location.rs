//! Device position acquisition.

use crate::error::{Result, TrailError};
use crate::types::Fix;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Mutex;
use std::time::Duration;

pub const LOCATION_TIMEOUT: Duration = Duration::from_secs(15);
pub const LOCATION_MAX_AGE: Duration = Duration::from_secs(10);

#[async_trait]
pub trait LocationProvider: Send + Sync {
    /// Current position; a cached one is acceptable when younger than `max_age`
    async fn current_position(&self, max_age: Duration) -> Result<Fix>;
}

/// Ask `provider` for a position, giving up after `timeout`
pub async fn request_current_position(
    provider: &dyn LocationProvider,
    timeout: Duration,
    max_age: Duration,
) -> Result<Fix> {
    match tokio::time::timeout(timeout, provider.current_position(max_age)).await {
        Ok(result) => result,
        Err(_) => Err(TrailError::Location(format!(
            "no position within {}s",
            timeout.as_secs()
        ))),
    }
}

/// Position typed by the user
#[derive(Clone, Copy, Debug)]
pub struct FixedLocation {
    pub lat: f64,
    pub lon: f64,
    /// Observation time in epoch ms; now when absent
    pub timestamp: Option<i64>,
}

#[async_trait]
impl LocationProvider for FixedLocation {
    async fn current_position(&self, _max_age: Duration) -> Result<Fix> {
        if !(-90.0..=90.0).contains(&self.lat) || !(-180.0..=180.0).contains(&self.lon) {
            return Err(TrailError::Location(format!(
                "position out of range {},{}",
                self.lat, self.lon
            )));
        }
        let timestamp = self.timestamp.unwrap_or_else(|| Utc::now().timestamp_millis());
        Ok(Fix::new(timestamp, self.lat, self.lon))
    }
}

/// Wraps a provider and answers from its last fix while fresh enough
pub struct CachedLocator<P> {
    inner: P,
    last: Mutex<Option<Fix>>,
}

impl<P: LocationProvider> CachedLocator<P> {
    pub fn new(inner: P) -> Self {
        CachedLocator {
            inner,
            last: Mutex::new(None),
        }
    }

    fn cached(&self, max_age: Duration) -> Option<Fix> {
        let last = (*self.last.lock().ok()?)?;
        let age_ms = Utc::now().timestamp_millis().saturating_sub(last.timestamp);
        (age_ms >= 0 && age_ms as u128 <= max_age.as_millis()).then_some(last)
    }
}

#[async_trait]
impl<P: LocationProvider> LocationProvider for CachedLocator<P> {
    async fn current_position(&self, max_age: Duration) -> Result<Fix> {
        if let Some(fix) = self.cached(max_age) {
            return Ok(fix);
        }
        let fix = self.inner.current_position(max_age).await?;
        if let Ok(mut last) = self.last.lock() {
            *last = Some(fix);
        }
        Ok(fix)
    }
}
