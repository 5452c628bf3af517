//! Content-addressed cache for ingested series and forecasts
//!
//! Keys are SHA-256 digests. A series is keyed by the uploaded bytes plus the
//! chosen columns; a forecast by the series contents plus the request. Nothing
//! expires on its own: callers invalidate explicitly.

use crate::data::TimeSeries;
use crate::engine::ForecastRequest;
use crate::error::Result;
use crate::models::ForecastResult;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Hex-encoded SHA-256 digest
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ContentHash(String);

impl ContentHash {
    fn from_hasher(hasher: Sha256) -> Self {
        let digest = hasher.finalize();
        let mut hex = String::with_capacity(digest.len() * 2);
        for byte in digest {
            let _ = write!(hex, "{byte:02x}");
        }
        ContentHash(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Key of an ingested series: the raw upload and the columns read from it
pub fn upload_key(bytes: &[u8], date_column: &str, target_column: &str) -> ContentHash {
    let mut hasher = Sha256::new();
    for part in [bytes, date_column.as_bytes(), target_column.as_bytes()] {
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part);
    }
    ContentHash::from_hasher(hasher)
}

/// Fingerprint of a series' timestamps, values and frequency
pub fn series_hash(series: &TimeSeries) -> ContentHash {
    let mut hasher = Sha256::new();
    hasher.update(series.frequency().to_string().as_bytes());
    hasher.update((series.len() as u64).to_le_bytes());
    for (timestamp, value) in series.timestamps().iter().zip(series.values()) {
        hasher.update(timestamp.and_utc().timestamp().to_le_bytes());
        hasher.update(timestamp.and_utc().timestamp_subsec_nanos().to_le_bytes());
        hasher.update(value.to_bits().to_le_bytes());
    }
    ContentHash::from_hasher(hasher)
}

/// Key of a request; the timeout does not change the forecast and is ignored
fn request_hash(request: &ForecastRequest) -> Result<ContentHash> {
    let mut hasher = Sha256::new();
    hasher.update((request.horizon as u64).to_le_bytes());
    hasher.update(serde_json::to_vec(&request.params)?);
    Ok(ContentHash::from_hasher(hasher))
}

/// Hit and miss counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub series_hits: u64,
    pub series_misses: u64,
    pub forecast_hits: u64,
    pub forecast_misses: u64,
}

#[derive(Debug, Default)]
struct CacheState {
    series: HashMap<ContentHash, TimeSeries>,
    forecasts: HashMap<(ContentHash, ContentHash), ForecastResult>,
    stats: CacheStats,
}

/// Explicit, caller-owned cache shared across threads
#[derive(Debug, Default)]
pub struct ForecastCache {
    state: Mutex<CacheState>,
}

impl ForecastCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the cached series for this upload or build it with `ingest`
    pub fn get_or_ingest<F>(
        &self,
        bytes: &[u8],
        date_column: &str,
        target_column: &str,
        ingest: F,
    ) -> Result<TimeSeries>
    where
        F: FnOnce() -> Result<TimeSeries>,
    {
        let key = upload_key(bytes, date_column, target_column);
        {
            let mut state = self.state();
            if let Some(series) = state.series.get(&key).cloned() {
                state.stats.series_hits += 1;
                debug!(key = key.as_str(), "Series cache hit");
                return Ok(series);
            }
            state.stats.series_misses += 1;
        }

        // the lock is not held while ingesting
        let series = ingest()?;
        self.state().series.insert(key, series.clone());
        Ok(series)
    }

    /// Return the cached forecast for this series and request or compute it with `forecast`
    ///
    /// Failed forecasts are not cached.
    pub fn get_or_forecast<F>(
        &self,
        series: &TimeSeries,
        request: &ForecastRequest,
        forecast: F,
    ) -> Result<ForecastResult>
    where
        F: FnOnce() -> Result<ForecastResult>,
    {
        let key = (series_hash(series), request_hash(request)?);
        {
            let mut state = self.state();
            if let Some(result) = state.forecasts.get(&key).cloned() {
                state.stats.forecast_hits += 1;
                debug!(strategy = %result.strategy(), "Forecast cache hit");
                return Ok(result);
            }
            state.stats.forecast_misses += 1;
        }

        let result = forecast()?;
        self.state().forecasts.insert(key, result.clone());
        Ok(result)
    }

    /// Drop the series and every forecast made from it
    ///
    /// Returns the number of entries removed.
    pub fn invalidate_series(&self, series: &TimeSeries) -> usize {
        let hash = series_hash(series);
        let mut state = self.state();
        let before = state.series.len() + state.forecasts.len();
        state.series.retain(|_, cached| series_hash(cached) != hash);
        state.forecasts.retain(|(series_key, _), _| *series_key != hash);
        before - (state.series.len() + state.forecasts.len())
    }

    /// Drop everything; counters are kept
    pub fn clear(&self) {
        let mut state = self.state();
        state.series.clear();
        state.forecasts.clear();
    }

    pub fn stats(&self) -> CacheStats {
        self.state().stats
    }

    /// Number of cached series and cached forecasts
    pub fn len(&self) -> (usize, usize) {
        let state = self.state();
        (state.series.len(), state.forecasts.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == (0, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::StrategyParams;
    use crate::models::{ArimaParams, StrategyKind};
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    fn series(values: Vec<f64>) -> TimeSeries {
        let timestamps = (1..=values.len() as u32)
            .map(|d| {
                NaiveDate::from_ymd_opt(2024, 1, d)
                    .unwrap()
                    .and_hms_opt(0, 0, 0)
                    .unwrap()
            })
            .collect();
        TimeSeries::new(timestamps, values).unwrap()
    }

    fn result_for(series: &TimeSeries, value: f64) -> Result<ForecastResult> {
        ForecastResult::new(StrategyKind::Arima, series.future_index(1)?, vec![value])
    }

    #[test]
    fn test_upload_key_depends_on_columns() {
        assert_eq!(upload_key(b"a,b", "a", "b"), upload_key(b"a,b", "a", "b"));
        assert_ne!(upload_key(b"a,b", "a", "b"), upload_key(b"a,b", "b", "a"));
        assert_eq!(upload_key(b"", "", "").as_str().len(), 64);
    }

    #[test]
    fn test_forecast_hit_skips_computation() {
        let cache = ForecastCache::new();
        let s = series(vec![1.0, 2.0, 3.0]);
        let request = ForecastRequest::new(1, StrategyParams::Arima(ArimaParams::default()));

        let first = cache.get_or_forecast(&s, &request, || result_for(&s, 4.0)).unwrap();
        let second = cache
            .get_or_forecast(&s, &request, || panic!("should be cached"))
            .unwrap();
        assert_eq!(first, second);

        let stats = cache.stats();
        assert_eq!((stats.forecast_hits, stats.forecast_misses), (1, 1));
    }

    #[test]
    fn test_timeout_is_not_part_of_the_key() {
        let cache = ForecastCache::new();
        let s = series(vec![1.0, 2.0, 3.0]);
        let request = ForecastRequest::new(1, StrategyParams::Arima(ArimaParams::default()));
        cache.get_or_forecast(&s, &request, || result_for(&s, 4.0)).unwrap();

        let with_timeout = request.clone().with_timeout_secs(30);
        let cached = cache
            .get_or_forecast(&s, &with_timeout, || result_for(&s, 9.0))
            .unwrap();
        assert_eq!(cached.values(), &[4.0]);
    }

    #[test]
    fn test_invalidate_series_removes_its_forecasts_only() {
        let cache = ForecastCache::new();
        let a = series(vec![1.0, 2.0, 3.0]);
        let b = series(vec![3.0, 2.0, 1.0]);
        let request = ForecastRequest::new(1, StrategyParams::Arima(ArimaParams::default()));
        cache.get_or_forecast(&a, &request, || result_for(&a, 4.0)).unwrap();
        cache.get_or_forecast(&b, &request, || result_for(&b, 0.0)).unwrap();

        assert_eq!(cache.invalidate_series(&a), 1);
        assert_eq!(cache.len(), (0, 1));

        let recomputed = cache
            .get_or_forecast(&a, &request, || result_for(&a, 5.0))
            .unwrap();
        assert_eq!(recomputed.values(), &[5.0]);
    }

    #[test]
    fn test_errors_are_not_cached() {
        let cache = ForecastCache::new();
        let s = series(vec![1.0, 2.0, 3.0]);
        let request = ForecastRequest::new(1, StrategyParams::Arima(ArimaParams::default()));
        assert!(cache
            .get_or_forecast(&s, &request, || Err(crate::error::ForecastError::Forecasting(
                "boom".to_string()
            )))
            .is_err());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_clear() {
        let cache = ForecastCache::new();
        let s = series(vec![1.0, 2.0]);
        cache.get_or_ingest(b"x", "d", "v", || Ok(s.clone())).unwrap();
        assert_eq!(cache.len(), (1, 0));
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.stats().series_misses, 1);
    }
}
