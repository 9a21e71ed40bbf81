//! Punch classification
//!
//! Classification uses only the angular rate at detection time:
//! - Hook: strong rotation around Z (horizontal arc)
//! - Uppercut: strong rotation around X (vertical arc)
//! - Straight: low rotation on every axis
//!
//! Anything else is `unknown`. Checks run in that order.

use crate::types::{Category, DetectionSignature};
use serde::{Deserialize, Serialize};

/// Angular-rate thresholds (°/s)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierThresholds {
    /// |gz| above this is a hook
    pub hook_gyro_z: f64,
    /// |gx| above this is an uppercut
    pub uppercut_gyro_x: f64,
    /// Every axis below this is a straight
    pub straight_gyro_max: f64,
}

impl Default for ClassifierThresholds {
    fn default() -> Self {
        Self {
            hook_gyro_z: 200.0,
            uppercut_gyro_x: 150.0,
            straight_gyro_max: 150.0,
        }
    }
}

/// Pure classifier over detection signatures
#[derive(Debug, Clone, Copy, Default)]
pub struct EventClassifier {
    thresholds: ClassifierThresholds,
}

impl EventClassifier {
    pub fn new(thresholds: ClassifierThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &ClassifierThresholds {
        &self.thresholds
    }

    pub fn classify(&self, signature: &DetectionSignature) -> Category {
        let abs_gx = signature.gyro_x.abs();
        let abs_gy = signature.gyro_y.abs();
        let abs_gz = signature.gyro_z.abs();

        if abs_gz > self.thresholds.hook_gyro_z {
            return Category::Hook;
        }

        if abs_gx > self.thresholds.uppercut_gyro_x {
            return Category::Uppercut;
        }

        let max_rotation = abs_gx.max(abs_gy).max(abs_gz);
        if max_rotation < self.thresholds.straight_gyro_max {
            return Category::Straight;
        }

        Category::Unknown
    }
}

/// Classify with the default thresholds
pub fn classify(signature: &DetectionSignature) -> Category {
    EventClassifier::default().classify(signature)
}
