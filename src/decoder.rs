//! Telemetry frame codec
//!
//! Each notification from a glove carries one fixed 20-byte little-endian frame:
//!
//! | Field     | Offset | Type | Scale |
//! |-----------|--------|------|-------|
//! | accX..Z   | 0..6   | i16  | ÷100 (m/s²) |
//! | gyroX..Z  | 6..12  | i16  | ÷10 (°/s)   |
//! | timestamp | 12     | u32  | ms since boot |
//! | sequence  | 16     | u16  | counter |
//! | battery   | 18     | u8   | percent |
//! | flags     | 19     | u8   | bit 0 charging, bit 1 calibrated |

use crate::error::AnalyticsError;
use crate::types::Sample;

/// Exact size of a telemetry frame in bytes
pub const FRAME_SIZE: usize = 20;

/// Raw acceleration units per m/s²
pub const ACCEL_SCALE: f64 = 100.0;

/// Raw angular-rate units per °/s
pub const GYRO_SCALE: f64 = 10.0;

pub const FLAG_CHARGING: u8 = 1 << 0;
pub const FLAG_CALIBRATED: u8 = 1 << 1;

/// Stateless frame decoder
pub struct SampleDecoder;

impl SampleDecoder {
    /// Decode one frame into engineering units
    pub fn decode(data: &[u8]) -> Result<Sample, AnalyticsError> {
        if data.len() != FRAME_SIZE {
            return Err(AnalyticsError::MalformedFrame {
                expected: FRAME_SIZE,
                actual: data.len(),
            });
        }

        let i16_at = |offset: usize| i16::from_le_bytes([data[offset], data[offset + 1]]);
        let flags = data[19];

        Ok(Sample {
            accel: [
                f64::from(i16_at(0)) / ACCEL_SCALE,
                f64::from(i16_at(2)) / ACCEL_SCALE,
                f64::from(i16_at(4)) / ACCEL_SCALE,
            ],
            gyro: [
                f64::from(i16_at(6)) / GYRO_SCALE,
                f64::from(i16_at(8)) / GYRO_SCALE,
                f64::from(i16_at(10)) / GYRO_SCALE,
            ],
            timestamp_ms: u32::from_le_bytes([data[12], data[13], data[14], data[15]]),
            sequence: u16::from_le_bytes([data[16], data[17]]),
            battery: data[18],
            charging: flags & FLAG_CHARGING != 0,
            calibrated: flags & FLAG_CALIBRATED != 0,
        })
    }

    /// Encode a sample back into a frame.
    ///
    /// Scaled values are rounded half away from zero and saturate at the
    /// i16 range.
    pub fn encode(sample: &Sample) -> [u8; FRAME_SIZE] {
        let mut frame = [0u8; FRAME_SIZE];

        for (axis, value) in sample.accel.iter().enumerate() {
            let raw = to_raw(*value, ACCEL_SCALE);
            frame[axis * 2..axis * 2 + 2].copy_from_slice(&raw.to_le_bytes());
        }
        for (axis, value) in sample.gyro.iter().enumerate() {
            let raw = to_raw(*value, GYRO_SCALE);
            let offset = 6 + axis * 2;
            frame[offset..offset + 2].copy_from_slice(&raw.to_le_bytes());
        }

        frame[12..16].copy_from_slice(&sample.timestamp_ms.to_le_bytes());
        frame[16..18].copy_from_slice(&sample.sequence.to_le_bytes());
        frame[18] = sample.battery;

        let mut flags = 0u8;
        if sample.charging {
            flags |= FLAG_CHARGING;
        }
        if sample.calibrated {
            flags |= FLAG_CALIBRATED;
        }
        frame[19] = flags;

        frame
    }

    /// Decode a frame given as a hex string (whitespace ignored)
    pub fn decode_hex(text: &str) -> Result<Sample, AnalyticsError> {
        let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
        let bytes = hex::decode(&compact).map_err(|e| AnalyticsError::InvalidHex(e.to_string()))?;
        Self::decode(&bytes)
    }

    /// Encode a sample as a lowercase hex frame
    pub fn encode_hex(sample: &Sample) -> String {
        hex::encode(Self::encode(sample))
    }
}

fn to_raw(value: f64, scale: f64) -> i16 {
    // f64::round is half-away-from-zero; the `as` cast saturates
    (value * scale).round() as i16
}
