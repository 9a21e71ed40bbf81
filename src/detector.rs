//! Punch detection
//!
//! A punch is an acceleration spike above a fixed threshold. Samples arrive at
//! ~100 Hz, so a single physical strike stays above the threshold for several
//! consecutive samples; the debounce window folds those into one detection.

use crate::types::{DetectionSignature, Sample};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Default minimum acceleration magnitude for a punch (m/s²)
pub const DEFAULT_THRESHOLD: f64 = 35.0;

/// Default minimum device-time gap between two punches (ms)
pub const DEFAULT_DEBOUNCE_MS: u32 = 300;

/// Detection parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Magnitude must be strictly above this to fire (m/s²)
    pub threshold: f64,
    /// Gaps up to and including this are suppressed (ms)
    pub debounce_ms: u32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            debounce_ms: DEFAULT_DEBOUNCE_MS,
        }
    }
}

/// Threshold + debounce detector for one source
#[derive(Debug, Clone)]
pub struct EventDetector {
    config: DetectorConfig,
    last_event_ts: Option<u32>,
}

impl Default for EventDetector {
    fn default() -> Self {
        Self::new(DetectorConfig::default())
    }
}

impl EventDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            config,
            last_event_ts: None,
        }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Forget the previous detection (called on session start)
    pub fn reset(&mut self) {
        self.last_event_ts = None;
    }

    /// Feed one sample; returns a signature when a new punch is detected
    pub fn observe(&mut self, sample: &Sample) -> Option<DetectionSignature> {
        let magnitude = sample.magnitude();
        // A resting sensor never fires, whatever the configured threshold
        if magnitude <= self.config.threshold.max(0.0) {
            return None;
        }

        if let Some(last) = self.last_event_ts {
            // Wrapping: a reboot or u32 rollover reads as a huge gap, not a negative one
            let gap = sample.timestamp_ms.wrapping_sub(last);
            if gap <= self.config.debounce_ms {
                return None;
            }
            if sample.timestamp_ms < last {
                debug!(
                    last_ts = last,
                    ts = sample.timestamp_ms,
                    "device clock went backwards, treating as new strike"
                );
            }
        }

        self.last_event_ts = Some(sample.timestamp_ms);

        let [gyro_x, gyro_y, gyro_z] = sample.gyro;
        Some(DetectionSignature {
            magnitude,
            gyro_x,
            gyro_y,
            gyro_z,
            timestamp_ms: sample.timestamp_ms,
        })
    }
}
