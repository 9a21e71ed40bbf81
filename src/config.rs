//! Pipeline configuration
//!
//! Every field has a default, so an empty JSON object is a valid config.
//! Environment variables override individual fields.

use crate::aggregator::DEFAULT_RECENT_CAPACITY;
use crate::broadcaster::DEFAULT_OBSERVER_QUEUE_CAPACITY;
use crate::classifier::ClassifierThresholds;
use crate::detector::DetectorConfig;
use crate::error::AnalyticsError;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;

/// Default broadcast tick interval (ms)
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 1000;

/// Elapsed minutes below which combined rates stay at zero
pub const DEFAULT_RATE_GUARD_MINUTES: f64 = 0.1;

/// Analytics configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    pub detector: DetectorConfig,
    pub classifier: ClassifierThresholds,
    /// Punches kept per source in `recent_punches`
    pub recent_capacity: usize,
    /// Frames buffered per observer before drops start
    pub observer_queue_capacity: usize,
    /// Period of the elapsed-time broadcast (ms)
    pub tick_interval_ms: u64,
    /// Combined rates stay zero until this much time has elapsed
    pub rate_guard_minutes: f64,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            detector: DetectorConfig::default(),
            classifier: ClassifierThresholds::default(),
            recent_capacity: DEFAULT_RECENT_CAPACITY,
            observer_queue_capacity: DEFAULT_OBSERVER_QUEUE_CAPACITY,
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            rate_guard_minutes: DEFAULT_RATE_GUARD_MINUTES,
        }
    }
}

impl AnalyticsConfig {
    /// Load configuration from JSON
    pub fn from_json(json: &str) -> Result<Self, AnalyticsError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to JSON
    pub fn to_json(&self) -> Result<String, AnalyticsError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Defaults overlaid with environment variables
    pub fn from_env() -> Result<Self, AnalyticsError> {
        Self::default().with_env_overrides()
    }

    /// Apply `STRIKE_*` environment overrides on top of this config
    pub fn with_env_overrides(self) -> Result<Self, AnalyticsError> {
        self.with_overrides(|key| env::var(key).ok())
    }

    fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, AnalyticsError> {
        if let Some(v) = parse_var(&lookup, "STRIKE_THRESHOLD")? {
            self.detector.threshold = v;
        }
        if let Some(v) = parse_var(&lookup, "STRIKE_DEBOUNCE_MS")? {
            self.detector.debounce_ms = v;
        }
        if let Some(v) = parse_var(&lookup, "STRIKE_RECENT_CAPACITY")? {
            self.recent_capacity = v;
        }
        if let Some(v) = parse_var(&lookup, "STRIKE_OBSERVER_QUEUE")? {
            self.observer_queue_capacity = v;
        }
        if let Some(v) = parse_var(&lookup, "STRIKE_TICK_MS")? {
            self.tick_interval_ms = v;
        }
        self.validate()?;
        Ok(self)
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<(), AnalyticsError> {
        if !self.detector.threshold.is_finite() || self.detector.threshold <= 0.0 {
            return Err(AnalyticsError::InvalidConfig(format!(
                "detector threshold must be positive, got {}",
                self.detector.threshold
            )));
        }
        if self.recent_capacity == 0 {
            return Err(AnalyticsError::InvalidConfig(
                "recent_capacity must be at least 1".to_string(),
            ));
        }
        if self.observer_queue_capacity == 0 {
            return Err(AnalyticsError::InvalidConfig(
                "observer_queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.tick_interval_ms == 0 {
            return Err(AnalyticsError::InvalidConfig(
                "tick_interval_ms must be at least 1".to_string(),
            ));
        }
        if !self.rate_guard_minutes.is_finite() || self.rate_guard_minutes < 0.0 {
            return Err(AnalyticsError::InvalidConfig(format!(
                "rate_guard_minutes must be non-negative, got {}",
                self.rate_guard_minutes
            )));
        }
        Ok(())
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, AnalyticsError> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| AnalyticsError::InvalidConfig(format!("{key}: cannot parse {raw:?}"))),
    }
}
