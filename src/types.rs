//! Core types for the Strike Flux pipeline
//!
//! This module defines the data structures that flow through each stage of the
//! pipeline: decoded samples, detection signatures, classified strike events,
//! per-source state and the full session snapshot published to observers.

use crate::error::AnalyticsError;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

/// Telemetry source (one glove per hand)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Left,
    Right,
}

impl Source {
    /// Both sources, in slot order
    pub const ALL: [Source; 2] = [Source::Left, Source::Right];

    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Left => "left",
            Source::Right => "right",
        }
    }

    /// Slot index used by the coordinator's per-source arrays
    pub fn index(&self) -> usize {
        match self {
            Source::Left => 0,
            Source::Right => 1,
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = AnalyticsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "left" | "l" => Ok(Source::Left),
            "right" | "r" => Ok(Source::Right),
            other => Err(AnalyticsError::UnknownSource(other.to_string())),
        }
    }
}

/// One decoded telemetry reading in engineering units
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Linear acceleration X, Y, Z (m/s²)
    pub accel: [f64; 3],
    /// Angular rate X, Y, Z (°/s)
    pub gyro: [f64; 3],
    /// Milliseconds since device boot; not comparable across sources
    pub timestamp_ms: u32,
    /// Frame sequence counter, wraps at 65536
    pub sequence: u16,
    /// Battery percentage (0-100)
    pub battery: u8,
    /// Device is on external power
    pub charging: bool,
    /// Device finished its offset calibration
    pub calibrated: bool,
}

impl Sample {
    /// Euclidean norm of the acceleration vector
    pub fn magnitude(&self) -> f64 {
        let [ax, ay, az] = self.accel;
        (ax * ax + ay * ay + az * az).sqrt()
    }
}

impl fmt::Display for Sample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [ax, ay, az] = self.accel;
        let [gx, gy, gz] = self.gyro;
        write!(
            f,
            "Accel({ax:.2}, {ay:.2}, {az:.2}) m/s² | Gyro({gx:.1}, {gy:.1}, {gz:.1}) °/s | ts={} seq={} bat={}%",
            self.timestamp_ms, self.sequence, self.battery
        )
    }
}

/// Motion signature captured when the detector fires
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectionSignature {
    /// Acceleration magnitude (m/s²)
    pub magnitude: f64,
    pub gyro_x: f64,
    pub gyro_y: f64,
    pub gyro_z: f64,
    /// Device timestamp of the triggering sample
    pub timestamp_ms: u32,
}

/// Strike category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Straight,
    Hook,
    Uppercut,
    Unknown,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Straight,
        Category::Hook,
        Category::Uppercut,
        Category::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Straight => "straight",
            Category::Hook => "hook",
            Category::Uppercut => "uppercut",
            Category::Unknown => "unknown",
        }
    }
}

/// Per-category strike histogram; every category is always present
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryCounts {
    pub straight: u32,
    pub hook: u32,
    pub uppercut: u32,
    pub unknown: u32,
}

impl CategoryCounts {
    pub fn get(&self, category: Category) -> u32 {
        match category {
            Category::Straight => self.straight,
            Category::Hook => self.hook,
            Category::Uppercut => self.uppercut,
            Category::Unknown => self.unknown,
        }
    }

    pub fn increment(&mut self, category: Category) {
        let slot = match category {
            Category::Straight => &mut self.straight,
            Category::Hook => &mut self.hook,
            Category::Uppercut => &mut self.uppercut,
            Category::Unknown => &mut self.unknown,
        };
        *slot += 1;
    }

    pub fn total(&self) -> u32 {
        self.straight + self.hook + self.uppercut + self.unknown
    }
}

/// A detected, classified strike
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrikeEvent {
    #[serde(rename = "hand")]
    pub source: Source,
    #[serde(rename = "type")]
    pub category: Category,
    /// Peak acceleration magnitude (m/s², 2 decimals)
    pub force: f64,
    /// |gz| at detection time (°/s)
    pub rotation_z: f64,
    /// Device timestamp of the triggering sample
    #[serde(rename = "ts")]
    pub timestamp_ms: u32,
    /// 1-based ordinal within the source's current session
    pub count: u32,
}

/// Per-source analytics and live readings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceState {
    pub connected: bool,
    pub calibrated: bool,
    pub battery: u8,
    /// Estimated frame loss (percent)
    pub packet_loss: f64,
    pub punch_count: u32,
    pub punch_breakdown: CategoryCounts,
    pub max_force: f64,
    pub avg_force: f64,
    /// Punches per minute over the session's elapsed time
    #[serde(rename = "ppm")]
    pub punches_per_min: f64,
    pub recent_punches: VecDeque<StrikeEvent>,
    /// Latest raw acceleration (m/s²), for live display only
    pub current_accel: [f64; 3],
    /// Latest raw angular rate (°/s), for live display only
    pub current_gyro: [f64; 3],
}

impl Default for SourceState {
    fn default() -> Self {
        Self {
            connected: false,
            calibrated: false,
            battery: 0,
            packet_loss: 0.0,
            punch_count: 0,
            punch_breakdown: CategoryCounts::default(),
            max_force: 0.0,
            avg_force: 0.0,
            punches_per_min: 0.0,
            recent_punches: VecDeque::new(),
            current_accel: [0.0; 3],
            current_gyro: [0.0; 3],
        }
    }
}

/// Statistics derived from both sources; never mutated directly
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CombinedStats {
    pub total_punches: u32,
    pub avg_force: f64,
    pub max_force: f64,
    #[serde(rename = "ppm")]
    pub punches_per_min: f64,
    #[serde(rename = "pps")]
    pub punches_per_sec: f64,
    /// floor(total * avg_force / elapsed_minutes)
    pub intensity_score: u64,
}

/// Session lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Inactive,
    Active,
    Paused,
}

/// Full session snapshot, the wire contract toward observers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    /// True while a session is running, paused or not
    pub active: bool,
    pub paused: bool,
    pub elapsed_sec: f64,
    pub left: SourceState,
    pub right: SourceState,
    pub combined: CombinedStats,
}

impl SessionState {
    pub fn source(&self, source: Source) -> &SourceState {
        match source {
            Source::Left => &self.left,
            Source::Right => &self.right,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        match (self.active, self.paused) {
            (false, _) => SessionPhase::Inactive,
            (true, false) => SessionPhase::Active,
            (true, true) => SessionPhase::Paused,
        }
    }
}
