//! Per-source aggregation
//!
//! Each glove owns one aggregator: punch counters, the category histogram,
//! running force statistics, a bounded history of recent punches and the
//! latest live readings.

use crate::types::{Category, DetectionSignature, Sample, Source, SourceState, StrikeEvent};

/// Default number of punches kept in the recent history
pub const DEFAULT_RECENT_CAPACITY: usize = 50;

/// Sequence-gap based frame loss estimate
#[derive(Debug, Clone, Default)]
struct LossEstimator {
    last_sequence: Option<u16>,
    expected: u64,
    received: u64,
}

impl LossEstimator {
    fn observe(&mut self, sequence: u16) {
        match self.last_sequence {
            None => {
                self.expected = 1;
                self.received = 1;
            }
            Some(last) => {
                let gap = sequence.wrapping_sub(last);
                if gap == 0 {
                    // Duplicate notification
                    return;
                }
                // Forward gaps count every skipped frame; a large jump is a reboot or reorder
                self.expected += if gap < 0x8000 { u64::from(gap) } else { 1 };
                self.received += 1;
            }
        }
        self.last_sequence = Some(sequence);
    }

    fn loss_percent(&self) -> f64 {
        if self.expected == 0 {
            return 0.0;
        }
        (self.expected - self.received) as f64 / self.expected as f64 * 100.0
    }
}

/// Aggregated analytics for one source
#[derive(Debug, Clone)]
pub struct SourceAggregator {
    source: Source,
    state: SourceState,
    /// Sum of every recorded force this session; the recent list is lossy
    force_sum: f64,
    recent_capacity: usize,
    loss: LossEstimator,
}

impl SourceAggregator {
    pub fn new(source: Source) -> Self {
        Self::with_recent_capacity(source, DEFAULT_RECENT_CAPACITY)
    }

    pub fn with_recent_capacity(source: Source, recent_capacity: usize) -> Self {
        Self {
            source,
            state: SourceState::default(),
            force_sum: 0.0,
            recent_capacity,
            loss: LossEstimator::default(),
        }
    }

    pub fn source(&self) -> Source {
        self.source
    }

    /// Clear session analytics. Device facts (connectivity, calibration,
    /// battery, live readings) are kept.
    pub fn reset(&mut self) {
        let previous = std::mem::take(&mut self.state);
        self.state.connected = previous.connected;
        self.state.calibrated = previous.calibrated;
        self.state.battery = previous.battery;
        self.state.current_accel = previous.current_accel;
        self.state.current_gyro = previous.current_gyro;
        self.force_sum = 0.0;
        self.loss = LossEstimator::default();
    }

    /// Record a detected punch.
    ///
    /// `elapsed_minutes` is the session's elapsed time, used for the rate.
    pub fn record_event(
        &mut self,
        signature: &DetectionSignature,
        category: Category,
        elapsed_minutes: f64,
    ) -> StrikeEvent {
        let force = signature.magnitude;
        let state = &mut self.state;

        state.punch_count += 1;
        state.punch_breakdown.increment(category);

        if force > state.max_force {
            state.max_force = force;
        }
        self.force_sum += force;
        state.avg_force = self.force_sum / f64::from(state.punch_count);

        if elapsed_minutes > 0.0 {
            state.punches_per_min = f64::from(state.punch_count) / elapsed_minutes;
        }

        let event = StrikeEvent {
            source: self.source,
            category,
            force: (force * 100.0).round() / 100.0,
            rotation_z: signature.gyro_z.abs(),
            timestamp_ms: signature.timestamp_ms,
            count: state.punch_count,
        };

        state.recent_punches.push_back(event.clone());
        while state.recent_punches.len() > self.recent_capacity {
            state.recent_punches.pop_front();
        }

        event
    }

    /// Update the connectivity flag; returns the previous value
    pub fn set_connectivity(&mut self, connected: bool) -> bool {
        std::mem::replace(&mut self.state.connected, connected)
    }

    /// Update the calibration flag; returns the previous value
    pub fn set_calibration(&mut self, calibrated: bool) -> bool {
        std::mem::replace(&mut self.state.calibrated, calibrated)
    }

    pub fn set_live_reading(&mut self, accel: [f64; 3], gyro: [f64; 3]) {
        self.state.current_accel = accel;
        self.state.current_gyro = gyro;
    }

    /// Apply the non-analytic parts of a sample: battery, calibration, live
    /// readings and the loss estimate. Returns true when calibration just
    /// completed.
    pub fn observe_telemetry(&mut self, sample: &Sample) -> bool {
        self.state.battery = sample.battery;
        let was_calibrated = self.set_calibration(sample.calibrated);
        self.set_live_reading(sample.accel, sample.gyro);

        self.loss.observe(sample.sequence);
        self.state.packet_loss = self.loss.loss_percent();

        !was_calibrated && sample.calibrated
    }

    pub fn state(&self) -> &SourceState {
        &self.state
    }

    pub fn snapshot(&self) -> SourceState {
        self.state.clone()
    }

    pub fn force_sum(&self) -> f64 {
        self.force_sum
    }

    pub fn punch_count(&self) -> u32 {
        self.state.punch_count
    }

    pub fn max_force(&self) -> f64 {
        self.state.max_force
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CategoryCounts;
    use pretty_assertions::assert_eq;

    fn signature(magnitude: f64, gz: f64, ts: u32) -> DetectionSignature {
        DetectionSignature {
            magnitude,
            gyro_x: 0.0,
            gyro_y: 0.0,
            gyro_z: gz,
            timestamp_ms: ts,
        }
    }

    fn telemetry(sequence: u16) -> Sample {
        Sample {
            accel: [0.1, 0.2, 9.8],
            gyro: [1.0, 2.0, 3.0],
            timestamp_ms: u32::from(sequence) * 10,
            sequence,
            battery: 64,
            charging: false,
            calibrated: true,
        }
    }

    #[test]
    fn test_average_and_max_follow_full_history() {
        let mut aggregator = SourceAggregator::with_recent_capacity(Source::Left, 2);
        let forces = [40.0, 55.5, 36.25, 71.0, 38.0];

        for (i, force) in forces.iter().enumerate() {
            aggregator.record_event(&signature(*force, 0.0, i as u32 * 400), Category::Straight, 1.0);
        }

        let state = aggregator.state();
        let sum: f64 = forces.iter().sum();
        assert_eq!(state.punch_count, 5);
        assert!((state.avg_force - sum / 5.0).abs() < 1e-9);
        assert!((aggregator.force_sum() - sum).abs() < 1e-9);
        assert_eq!(state.max_force, 71.0);
        // History is bounded but the average is not derived from it
        assert_eq!(state.recent_punches.len(), 2);
    }

    #[test]
    fn test_event_fields() {
        let mut aggregator = SourceAggregator::new(Source::Right);
        let event = aggregator.record_event(&signature(40.126, -250.0, 1234), Category::Hook, 0.5);

        assert_eq!(event.source, Source::Right);
        assert_eq!(event.category, Category::Hook);
        assert_eq!(event.force, 40.13);
        assert_eq!(event.rotation_z, 250.0);
        assert_eq!(event.timestamp_ms, 1234);
        assert_eq!(event.count, 1);
        assert_eq!(aggregator.state().punches_per_min, 2.0);
    }

    #[test]
    fn test_histogram() {
        let mut aggregator = SourceAggregator::new(Source::Left);
        for category in [Category::Hook, Category::Hook, Category::Uppercut] {
            aggregator.record_event(&signature(40.0, 0.0, 0), category, 0.0);
        }
        assert_eq!(
            aggregator.state().punch_breakdown,
            CategoryCounts {
                straight: 0,
                hook: 2,
                uppercut: 1,
                unknown: 0,
            }
        );
        // Zero elapsed time leaves the rate untouched
        assert_eq!(aggregator.state().punches_per_min, 0.0);
    }

    #[test]
    fn test_recent_history_evicts_oldest_at_capacity() {
        let mut aggregator = SourceAggregator::new(Source::Left);
        for i in 0..(DEFAULT_RECENT_CAPACITY as u32 + 3) {
            aggregator.record_event(&signature(40.0, 0.0, i * 400), Category::Straight, 1.0);
        }

        let recent = &aggregator.state().recent_punches;
        assert_eq!(recent.len(), DEFAULT_RECENT_CAPACITY);
        assert_eq!(recent.front().unwrap().count, 4);
        assert_eq!(recent.back().unwrap().count, DEFAULT_RECENT_CAPACITY as u32 + 3);
    }

    #[test]
    fn test_reset_keeps_device_facts() {
        let mut aggregator = SourceAggregator::new(Source::Left);
        aggregator.set_connectivity(true);
        aggregator.observe_telemetry(&telemetry(1));
        aggregator.record_event(&signature(50.0, 0.0, 0), Category::Straight, 1.0);

        aggregator.reset();

        let state = aggregator.state();
        assert!(state.connected);
        assert!(state.calibrated);
        assert_eq!(state.battery, 64);
        assert_eq!(state.current_gyro, [1.0, 2.0, 3.0]);
        assert_eq!(state.punch_count, 0);
        assert_eq!(state.punch_breakdown, CategoryCounts::default());
        assert_eq!(state.max_force, 0.0);
        assert_eq!(state.avg_force, 0.0);
        assert!(state.recent_punches.is_empty());
        assert_eq!(aggregator.force_sum(), 0.0);
    }

    #[test]
    fn test_connectivity_returns_previous() {
        let mut aggregator = SourceAggregator::new(Source::Left);
        assert!(!aggregator.set_connectivity(true));
        assert!(aggregator.set_connectivity(false));
        assert!(!aggregator.state().connected);
    }

    #[test]
    fn test_calibration_completion_reported_once() {
        let mut aggregator = SourceAggregator::new(Source::Left);
        let mut sample = telemetry(1);
        sample.calibrated = false;
        assert!(!aggregator.observe_telemetry(&sample));

        sample.calibrated = true;
        sample.sequence = 2;
        assert!(aggregator.observe_telemetry(&sample));
        sample.sequence = 3;
        assert!(!aggregator.observe_telemetry(&sample));
    }

    #[test]
    fn test_packet_loss_estimate() {
        let mut aggregator = SourceAggregator::new(Source::Left);
        for sequence in [10u16, 11, 12, 15, 16] {
            aggregator.observe_telemetry(&telemetry(sequence));
        }
        // 7 frames expected (10..=16), 5 received
        let expected = 2.0 / 7.0 * 100.0;
        assert!((aggregator.state().packet_loss - expected).abs() < 1e-9);
    }

    #[test]
    fn test_packet_loss_handles_wrap_and_duplicates() {
        let mut aggregator = SourceAggregator::new(Source::Left);
        for sequence in [65534u16, 65535, 65535, 0, 1] {
            aggregator.observe_telemetry(&telemetry(sequence));
        }
        assert_eq!(aggregator.state().packet_loss, 0.0);

        // Device reboot: sequence jumps backwards, counted as a single frame
        aggregator.observe_telemetry(&telemetry(100));
        aggregator.observe_telemetry(&telemetry(5));
        assert!(aggregator.state().packet_loss > 0.0);
        assert!(aggregator.state().packet_loss < 100.0);
    }
}
