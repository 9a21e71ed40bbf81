//! Session coordination
//!
//! The coordinator owns everything mutable: both per-source aggregators and
//! detectors, the session phase and the combined statistics. All of it sits
//! behind a single mutex so interleaved left/right samples and lifecycle
//! commands never observe a torn state.
//!
//! Pipeline stages per sample:
//! 1. SampleDecoder - Decode the 20-byte frame
//! 2. SourceAggregator - Refresh live readings, battery and calibration
//! 3. EventDetector - Threshold + debounce (active sessions only)
//! 4. EventClassifier - Straight / hook / uppercut / unknown
//! 5. SourceAggregator - Record the punch
//! 6. StateBroadcaster - Publish the new snapshot

use crate::aggregator::SourceAggregator;
use crate::broadcaster::{ObserverHandle, StateBroadcaster};
use crate::classifier::EventClassifier;
use crate::clock::{Clock, SystemClock};
use crate::config::AnalyticsConfig;
use crate::decoder::SampleDecoder;
use crate::detector::EventDetector;
use crate::error::AnalyticsError;
use crate::transport::{CommandSink, NoopCommandSink, SourceCommand};
use crate::types::{
    CombinedStats, Sample, SessionPhase, SessionState, Source, SourceState, StrikeEvent,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PauseReason {
    Requested,
    Disconnected,
}

struct SourceSlot {
    aggregator: SourceAggregator,
    detector: EventDetector,
    /// Connected -> disconnected during the running session, not back yet
    dropped: bool,
}

impl SourceSlot {
    fn new(source: Source, config: &AnalyticsConfig) -> Self {
        Self {
            aggregator: SourceAggregator::with_recent_capacity(source, config.recent_capacity),
            detector: EventDetector::new(config.detector),
            dropped: false,
        }
    }

    fn reset(&mut self) {
        self.aggregator.reset();
        self.detector.reset();
        self.dropped = false;
    }
}

struct SessionInner {
    phase: SessionPhase,
    pause_reason: Option<PauseReason>,
    started_at: Option<DateTime<Utc>>,
    slots: [SourceSlot; 2],
    elapsed_sec: f64,
    combined: CombinedStats,
    rate_guard_minutes: f64,
}

impl SessionInner {
    fn slot_mut(&mut self, source: Source) -> &mut SourceSlot {
        &mut self.slots[source.index()]
    }

    fn elapsed_minutes(&self) -> f64 {
        self.elapsed_sec / 60.0
    }

    fn update_elapsed(&mut self, now: DateTime<Utc>) {
        self.elapsed_sec = match (self.phase, self.started_at) {
            (SessionPhase::Inactive, _) | (_, None) => 0.0,
            // Paused time still counts
            (_, Some(started_at)) => {
                ((now - started_at).num_milliseconds() as f64 / 1000.0).max(0.0)
            }
        };
    }

    fn rebuild_combined_stats(&mut self) {
        let [left, right] = &self.slots;
        let (left, right) = (&left.aggregator, &right.aggregator);

        let total = left.punch_count() + right.punch_count();
        let mut combined = CombinedStats {
            total_punches: total,
            ..Default::default()
        };

        if total > 0 {
            combined.avg_force = (left.force_sum() + right.force_sum()) / f64::from(total);
            combined.max_force = left.max_force().max(right.max_force());
        }

        let minutes = self.elapsed_minutes();
        if minutes > self.rate_guard_minutes {
            combined.punches_per_min = f64::from(total) / minutes;
            combined.punches_per_sec = f64::from(total) / self.elapsed_sec;
            combined.intensity_score =
                (f64::from(total) * combined.avg_force / minutes).floor() as u64;
        }

        self.combined = combined;
    }

    fn refresh(&mut self, now: DateTime<Utc>) {
        self.update_elapsed(now);
        self.rebuild_combined_stats();
    }

    fn clear(&mut self) {
        for slot in &mut self.slots {
            slot.reset();
        }
        self.phase = SessionPhase::Inactive;
        self.pause_reason = None;
        self.started_at = None;
        self.elapsed_sec = 0.0;
        self.combined = CombinedStats::default();
    }

    fn connected_sources(&self) -> Vec<Source> {
        Source::ALL
            .into_iter()
            .filter(|s| self.slots[s.index()].aggregator.state().connected)
            .collect()
    }

    fn snapshot(&self) -> SessionState {
        let [left, right] = &self.slots;
        SessionState {
            active: self.phase != SessionPhase::Inactive,
            paused: self.phase == SessionPhase::Paused,
            elapsed_sec: self.elapsed_sec,
            left: left.aggregator.snapshot(),
            right: right.aggregator.snapshot(),
            combined: self.combined.clone(),
        }
    }
}

/// Owner of the session state machine and both sources' analytics
pub struct SessionCoordinator {
    inner: Mutex<SessionInner>,
    classifier: EventClassifier,
    config: AnalyticsConfig,
    broadcaster: StateBroadcaster,
    clock: Arc<dyn Clock>,
    commands: Arc<dyn CommandSink>,
}

impl Default for SessionCoordinator {
    fn default() -> Self {
        Self::new(AnalyticsConfig::default())
    }
}

impl SessionCoordinator {
    /// Create a coordinator on the system clock with no command channel.
    ///
    /// The config is taken as is; use [`SessionCoordinator::try_new`] for
    /// configs that did not come through [`AnalyticsConfig::validate`].
    pub fn new(config: AnalyticsConfig) -> Self {
        let inner = SessionInner {
            phase: SessionPhase::Inactive,
            pause_reason: None,
            started_at: None,
            slots: [
                SourceSlot::new(Source::Left, &config),
                SourceSlot::new(Source::Right, &config),
            ],
            elapsed_sec: 0.0,
            combined: CombinedStats::default(),
            rate_guard_minutes: config.rate_guard_minutes,
        };

        Self {
            inner: Mutex::new(inner),
            classifier: EventClassifier::new(config.classifier),
            broadcaster: StateBroadcaster::new(config.observer_queue_capacity),
            clock: Arc::new(SystemClock),
            commands: Arc::new(NoopCommandSink),
            config,
        }
    }

    /// Validate the config, then create the coordinator
    pub fn try_new(config: AnalyticsConfig) -> Result<Self, AnalyticsError> {
        config.validate()?;
        Ok(Self::new(config))
    }

    /// Use a specific time source
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Route start/reset commands to the transport layer
    pub fn with_command_sink(mut self, commands: Arc<dyn CommandSink>) -> Self {
        self.commands = commands;
        self
    }

    pub fn config(&self) -> &AnalyticsConfig {
        &self.config
    }

    pub fn broadcaster(&self) -> &StateBroadcaster {
        &self.broadcaster
    }

    pub fn phase(&self) -> SessionPhase {
        self.inner.lock().phase
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Start a fresh session from any state
    pub fn start(&self) {
        let targets = {
            let mut inner = self.inner.lock();
            let now = self.clock.now();
            inner.clear();
            inner.phase = SessionPhase::Active;
            inner.started_at = Some(now);
            self.publish_locked(&mut inner, now);
            inner.connected_sources()
        };
        info!("Session started");
        self.dispatch(&targets, SourceCommand::Start);
    }

    /// End the session and clear statistics.
    ///
    /// Behaves like [`reset`](Self::reset) but hands back the final
    /// snapshot, captured under the same lock just before clearing, so a
    /// results view does not depend on a client-side copy.
    pub fn stop(&self) -> SessionState {
        let (final_state, targets) = {
            let mut inner = self.inner.lock();
            let now = self.clock.now();
            inner.refresh(now);
            let final_state = inner.snapshot();
            inner.clear();
            self.publish_locked(&mut inner, now);
            (final_state, inner.connected_sources())
        };
        info!(
            total_punches = final_state.combined.total_punches,
            elapsed_sec = final_state.elapsed_sec,
            "Session stopped"
        );
        self.dispatch(&targets, SourceCommand::Reset);
        final_state
    }

    /// Clear all statistics and return to inactive from any state
    pub fn reset(&self) {
        let targets = {
            let mut inner = self.inner.lock();
            let now = self.clock.now();
            inner.clear();
            self.publish_locked(&mut inner, now);
            inner.connected_sources()
        };
        info!("Session reset");
        self.dispatch(&targets, SourceCommand::Reset);
    }

    /// Pause an active session; no-op otherwise
    pub fn pause(&self) {
        let mut inner = self.inner.lock();
        if inner.phase != SessionPhase::Active {
            return;
        }
        inner.phase = SessionPhase::Paused;
        inner.pause_reason = Some(PauseReason::Requested);
        let now = self.clock.now();
        self.publish_locked(&mut inner, now);
        info!("Session paused");
    }

    /// Resume a paused session; no-op otherwise
    pub fn resume(&self) {
        let mut inner = self.inner.lock();
        if inner.phase != SessionPhase::Paused {
            return;
        }
        inner.phase = SessionPhase::Active;
        inner.pause_reason = None;
        for slot in &mut inner.slots {
            slot.dropped = false;
        }
        let now = self.clock.now();
        self.publish_locked(&mut inner, now);
        info!("Session resumed");
    }

    // ------------------------------------------------------------------
    // Transport input
    // ------------------------------------------------------------------

    /// Record a source attaching or detaching.
    ///
    /// A connected source dropping pauses an active session; any source that
    /// dropped coming back resumes it, unless the pause was requested.
    /// A source connecting for the first time changes nothing.
    pub fn on_connectivity_change(&self, source: Source, connected: bool) {
        let mut inner = self.inner.lock();
        let was_connected = inner.slot_mut(source).aggregator.set_connectivity(connected);
        if was_connected == connected {
            return;
        }

        if connected {
            info!(%source, "Source connected");
        } else {
            info!(%source, "Source disconnected");
        }

        let running = inner.phase != SessionPhase::Inactive;

        if !connected && running {
            inner.slot_mut(source).dropped = true;
            if inner.phase == SessionPhase::Active {
                inner.phase = SessionPhase::Paused;
                inner.pause_reason = Some(PauseReason::Disconnected);
                info!(%source, "Session paused: source dropped");
            }
        }

        if connected && inner.slot_mut(source).dropped {
            inner.slot_mut(source).dropped = false;
            if inner.phase == SessionPhase::Paused
                && inner.pause_reason == Some(PauseReason::Disconnected)
            {
                inner.phase = SessionPhase::Active;
                inner.pause_reason = None;
                info!(%source, "Session resumed: source reconnected");
            }
        }

        let now = self.clock.now();
        self.publish_locked(&mut inner, now);
    }

    /// Decode a raw frame and process it.
    ///
    /// Malformed frames are logged and dropped without touching any state.
    pub fn on_frame(&self, source: Source, data: &[u8]) -> Result<Option<StrikeEvent>, AnalyticsError> {
        match SampleDecoder::decode(data) {
            Ok(sample) => Ok(self.on_sample(source, &sample)),
            Err(e) => {
                warn!(%source, error = %e, "Dropping malformed frame");
                Err(e)
            }
        }
    }

    /// Process one decoded sample; returns the punch it produced, if any
    pub fn on_sample(&self, source: Source, sample: &Sample) -> Option<StrikeEvent> {
        let mut inner = self.inner.lock();

        // Live readings update regardless of session state
        if inner.slot_mut(source).aggregator.observe_telemetry(sample) {
            info!(%source, "Sensor calibration complete");
        }

        if inner.phase != SessionPhase::Active {
            return None;
        }

        let signature = inner.slot_mut(source).detector.observe(sample)?;
        let category = self.classifier.classify(&signature);

        let now = self.clock.now();
        inner.update_elapsed(now);
        let elapsed_minutes = inner.elapsed_minutes();
        let event = inner
            .slot_mut(source)
            .aggregator
            .record_event(&signature, category, elapsed_minutes);

        debug!(
            %source,
            category = category.as_str(),
            force = event.force,
            count = event.count,
            "Punch detected"
        );

        self.publish_locked(&mut inner, now);
        Some(event)
    }

    /// Periodic refresh of elapsed time; broadcasts while a session runs
    pub fn tick(&self) {
        let mut inner = self.inner.lock();
        if inner.phase == SessionPhase::Inactive {
            return;
        }
        let now = self.clock.now();
        self.publish_locked(&mut inner, now);
    }

    // ------------------------------------------------------------------
    // Observers
    // ------------------------------------------------------------------

    /// Point-in-time copy of the full session state
    pub fn snapshot(&self) -> SessionState {
        let mut inner = self.inner.lock();
        let now = self.clock.now();
        inner.refresh(now);
        inner.snapshot()
    }

    /// Copy of one source's state
    pub fn source_state(&self, source: Source) -> SourceState {
        self.inner.lock().slots[source.index()].aggregator.snapshot()
    }

    /// Register an observer; its queue starts with the current snapshot
    pub fn subscribe(&self) -> Result<ObserverHandle, AnalyticsError> {
        let mut inner = self.inner.lock();
        let now = self.clock.now();
        inner.refresh(now);
        // Registered under the session lock so no publish slips in between
        self.broadcaster.register_with(&inner.snapshot())
    }

    /// Remove an observer; returns the number of frames it never read
    pub fn unsubscribe(&self, handle: ObserverHandle) -> usize {
        self.broadcaster.unregister(handle)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn publish_locked(&self, inner: &mut SessionInner, now: DateTime<Utc>) {
        inner.refresh(now);
        if let Err(e) = self.broadcaster.publish(&inner.snapshot()) {
            warn!(error = %e, "Failed to publish session state");
        }
    }

    /// Best-effort command delivery, called with the session lock released
    fn dispatch(&self, targets: &[Source], command: SourceCommand) {
        for &source in targets {
            if let Err(e) = self.commands.send_command(source, command) {
                warn!(%source, command = command.as_str(), error = %e, "Command not delivered");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::decoder::FRAME_SIZE;
    use crate::transport::{ChannelCommandSink, OutboundCommand};
    use crate::types::{Category, CategoryCounts};
    use pretty_assertions::assert_eq;

    fn sample(accel: [f64; 3], gyro: [f64; 3], ts: u32) -> Sample {
        Sample {
            accel,
            gyro,
            timestamp_ms: ts,
            sequence: (ts / 10) as u16,
            battery: 80,
            charging: false,
            calibrated: true,
        }
    }

    fn punch(magnitude: f64, gyro: [f64; 3], ts: u32) -> Sample {
        sample([magnitude, 0.0, 0.0], gyro, ts)
    }

    fn coordinator() -> (SessionCoordinator, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let coordinator = SessionCoordinator::default().with_clock(clock.clone());
        (coordinator, clock)
    }

    #[test]
    fn test_punch_scenario() {
        let (coordinator, _clock) = coordinator();
        coordinator.start();

        let event = coordinator
            .on_sample(Source::Left, &punch(40.0, [0.0, 0.0, 250.0], 0))
            .unwrap();
        assert_eq!(event.category, Category::Hook);
        assert_eq!(event.count, 1);

        let state = coordinator.snapshot();
        assert_eq!(state.left.punch_count, 1);
        assert_eq!(state.left.max_force, 40.0);
        assert_eq!(state.combined.total_punches, 1);

        // Same physical strike, inside the debounce window
        assert!(coordinator
            .on_sample(Source::Left, &punch(42.0, [0.0, 0.0, 250.0], 100))
            .is_none());

        let event = coordinator
            .on_sample(Source::Left, &punch(36.0, [160.0, 0.0, 10.0], 400))
            .unwrap();
        assert_eq!(event.category, Category::Uppercut);
        assert_eq!(coordinator.snapshot().left.punch_count, 2);
    }

    #[test]
    fn test_inactive_updates_live_readings_only() {
        let (coordinator, _clock) = coordinator();
        let reading = punch(50.0, [1.0, 2.0, 3.0], 0);

        assert!(coordinator.on_sample(Source::Right, &reading).is_none());

        let right = coordinator.source_state(Source::Right);
        assert_eq!(right.current_accel, [50.0, 0.0, 0.0]);
        assert_eq!(right.current_gyro, [1.0, 2.0, 3.0]);
        assert_eq!(right.battery, 80);
        assert!(right.calibrated);
        assert_eq!(right.punch_count, 0);
    }

    #[test]
    fn test_paused_session_ignores_punches() {
        let (coordinator, _clock) = coordinator();
        coordinator.start();
        coordinator.pause();
        assert_eq!(coordinator.phase(), SessionPhase::Paused);

        assert!(coordinator
            .on_sample(Source::Left, &punch(60.0, [0.0; 3], 0))
            .is_none());
        assert_eq!(coordinator.snapshot().left.current_accel[0], 60.0);

        coordinator.resume();
        assert!(coordinator
            .on_sample(Source::Left, &punch(60.0, [0.0; 3], 1000))
            .is_some());
    }

    #[test]
    fn test_lifecycle_commands_are_total() {
        let (coordinator, _clock) = coordinator();

        coordinator.resume();
        assert_eq!(coordinator.phase(), SessionPhase::Inactive);
        coordinator.pause();
        assert_eq!(coordinator.phase(), SessionPhase::Inactive);

        coordinator.start();
        coordinator.resume();
        assert_eq!(coordinator.phase(), SessionPhase::Active);
        coordinator.pause();
        coordinator.pause();
        assert_eq!(coordinator.phase(), SessionPhase::Paused);

        coordinator.start();
        assert_eq!(coordinator.phase(), SessionPhase::Active);
        coordinator.reset();
        coordinator.reset();
        assert_eq!(coordinator.phase(), SessionPhase::Inactive);
        coordinator.stop();
        assert_eq!(coordinator.phase(), SessionPhase::Inactive);
    }

    #[test]
    fn test_try_new_rejects_invalid_config() {
        let config = AnalyticsConfig {
            recent_capacity: 0,
            ..AnalyticsConfig::default()
        };
        assert!(matches!(
            SessionCoordinator::try_new(config),
            Err(AnalyticsError::InvalidConfig(_))
        ));
        assert!(SessionCoordinator::try_new(AnalyticsConfig::default()).is_ok());
    }

    #[test]
    fn test_first_connection_never_pauses() {
        let (coordinator, _clock) = coordinator();
        coordinator.on_connectivity_change(Source::Left, true);
        coordinator.start();

        coordinator.on_connectivity_change(Source::Right, true);
        assert_eq!(coordinator.phase(), SessionPhase::Active);
    }

    #[test]
    fn test_drop_pauses_and_return_resumes() {
        let (coordinator, _clock) = coordinator();
        coordinator.on_connectivity_change(Source::Left, true);
        coordinator.start();

        coordinator.on_connectivity_change(Source::Left, false);
        let state = coordinator.snapshot();
        assert!(state.active);
        assert!(state.paused);
        assert!(!state.left.connected);

        coordinator.on_connectivity_change(Source::Left, true);
        assert_eq!(coordinator.phase(), SessionPhase::Active);
    }

    #[test]
    fn test_repeated_connectivity_reports_are_idempotent() {
        let (coordinator, _clock) = coordinator();
        coordinator.on_connectivity_change(Source::Left, true);
        coordinator.start();
        coordinator.on_connectivity_change(Source::Left, true);
        coordinator.on_connectivity_change(Source::Right, false);
        assert_eq!(coordinator.phase(), SessionPhase::Active);
    }

    #[test]
    fn test_any_dropped_source_returning_resumes() {
        let (coordinator, _clock) = coordinator();
        coordinator.on_connectivity_change(Source::Left, true);
        coordinator.on_connectivity_change(Source::Right, true);
        coordinator.start();

        coordinator.on_connectivity_change(Source::Left, false);
        coordinator.on_connectivity_change(Source::Right, false);
        assert_eq!(coordinator.phase(), SessionPhase::Paused);

        coordinator.on_connectivity_change(Source::Left, true);
        assert_eq!(coordinator.phase(), SessionPhase::Active);
        assert!(!coordinator.snapshot().right.connected);

        // The other glove returning later leaves the session running
        coordinator.on_connectivity_change(Source::Right, true);
        assert_eq!(coordinator.phase(), SessionPhase::Active);

        // and a fresh drop pauses again
        coordinator.on_connectivity_change(Source::Right, false);
        assert_eq!(coordinator.phase(), SessionPhase::Paused);
        coordinator.on_connectivity_change(Source::Right, true);
        assert_eq!(coordinator.phase(), SessionPhase::Active);
    }

    #[test]
    fn test_requested_pause_not_lifted_by_reconnect() {
        let (coordinator, _clock) = coordinator();
        coordinator.on_connectivity_change(Source::Left, true);
        coordinator.start();
        coordinator.pause();

        coordinator.on_connectivity_change(Source::Left, false);
        coordinator.on_connectivity_change(Source::Left, true);
        assert_eq!(coordinator.phase(), SessionPhase::Paused);
    }

    #[test]
    fn test_disconnect_while_inactive_only_updates_flag() {
        let (coordinator, _clock) = coordinator();
        coordinator.on_connectivity_change(Source::Left, true);
        coordinator.on_connectivity_change(Source::Left, false);
        assert_eq!(coordinator.phase(), SessionPhase::Inactive);

        coordinator.start();
        // The earlier drop does not count toward this session
        coordinator.on_connectivity_change(Source::Left, true);
        assert_eq!(coordinator.phase(), SessionPhase::Active);
    }

    #[test]
    fn test_disconnect_keeps_counters() {
        let (coordinator, _clock) = coordinator();
        coordinator.on_connectivity_change(Source::Left, true);
        coordinator.start();
        coordinator.on_sample(Source::Left, &punch(45.0, [0.0; 3], 0));

        coordinator.on_connectivity_change(Source::Left, false);
        coordinator.on_connectivity_change(Source::Left, true);

        let state = coordinator.snapshot();
        assert_eq!(state.left.punch_count, 1);
        assert_eq!(state.left.max_force, 45.0);
    }

    #[test]
    fn test_reset_clears_everything() {
        let (coordinator, clock) = coordinator();
        coordinator.start();
        clock.advance_ms(30_000);
        coordinator.on_sample(Source::Left, &punch(40.0, [0.0, 0.0, 250.0], 0));
        coordinator.on_sample(Source::Right, &punch(50.0, [0.0; 3], 0));

        coordinator.reset();

        let state = coordinator.snapshot();
        assert!(!state.active);
        assert!(!state.paused);
        assert_eq!(state.elapsed_sec, 0.0);
        for source in Source::ALL {
            let s = state.source(source);
            assert_eq!(s.punch_count, 0);
            assert_eq!(s.punch_breakdown, CategoryCounts::default());
            assert!(s.recent_punches.is_empty());
        }
        assert_eq!(state.combined, CombinedStats::default());
    }

    #[test]
    fn test_stop_returns_final_state_then_clears() {
        let (coordinator, clock) = coordinator();
        coordinator.start();
        clock.advance_ms(60_000);
        coordinator.on_sample(Source::Left, &punch(40.0, [0.0; 3], 0));

        let final_state = coordinator.stop();
        assert!(final_state.active);
        assert_eq!(final_state.elapsed_sec, 60.0);
        assert_eq!(final_state.combined.total_punches, 1);

        let state = coordinator.snapshot();
        assert!(!state.active);
        assert_eq!(state.combined.total_punches, 0);
    }

    #[test]
    fn test_start_resets_debounce() {
        let (coordinator, _clock) = coordinator();
        coordinator.start();
        assert!(coordinator.on_sample(Source::Left, &punch(40.0, [0.0; 3], 1000)).is_some());
        coordinator.start();
        assert!(coordinator.on_sample(Source::Left, &punch(40.0, [0.0; 3], 1100)).is_some());
    }

    #[test]
    fn test_combined_rates_guarded_for_first_six_seconds() {
        let (coordinator, clock) = coordinator();
        coordinator.start();
        clock.advance_ms(5_000);
        coordinator.on_sample(Source::Left, &punch(40.0, [0.0; 3], 0));

        let combined = coordinator.snapshot().combined;
        assert_eq!(combined.total_punches, 1);
        assert_eq!(combined.avg_force, 40.0);
        assert_eq!(combined.punches_per_min, 0.0);
        assert_eq!(combined.punches_per_sec, 0.0);
        assert_eq!(combined.intensity_score, 0);
    }

    #[test]
    fn test_combined_rates_after_guard() {
        let (coordinator, clock) = coordinator();
        coordinator.start();
        clock.advance_ms(30_000);
        coordinator.on_sample(Source::Left, &punch(40.0, [0.0; 3], 0));
        coordinator.on_sample(Source::Right, &punch(50.0, [0.0; 3], 0));
        clock.advance_ms(30_000);

        let state = coordinator.snapshot();
        assert_eq!(state.elapsed_sec, 60.0);
        assert_eq!(state.combined.total_punches, 2);
        assert_eq!(state.combined.avg_force, 45.0);
        assert_eq!(state.combined.max_force, 50.0);
        assert_eq!(state.combined.punches_per_min, 2.0);
        assert!((state.combined.punches_per_sec - 2.0 / 60.0).abs() < 1e-12);
        assert_eq!(state.combined.intensity_score, 90);
        // Per-source rate uses elapsed time at the moment of the punch
        assert_eq!(state.left.punches_per_min, 2.0);
    }

    #[test]
    fn test_elapsed_keeps_running_while_paused() {
        let (coordinator, clock) = coordinator();
        coordinator.start();
        coordinator.pause();
        clock.advance_ms(10_000);
        assert_eq!(coordinator.snapshot().elapsed_sec, 10.0);
    }

    #[test]
    fn test_combined_commutative() {
        let left = punch(40.0, [0.0, 0.0, 250.0], 0);
        let right = punch(55.0, [160.0, 0.0, 0.0], 0);

        let run = |order: [(Source, &Sample); 2]| {
            let (coordinator, clock) = coordinator();
            coordinator.start();
            clock.advance_ms(20_000);
            for (source, sample) in order {
                coordinator.on_sample(source, sample);
            }
            coordinator.snapshot().combined
        };

        assert_eq!(
            run([(Source::Left, &left), (Source::Right, &right)]),
            run([(Source::Right, &right), (Source::Left, &left)])
        );
    }

    #[test]
    fn test_malformed_frame_leaves_state_untouched() {
        let (coordinator, _clock) = coordinator();
        coordinator.start();
        let before = coordinator.snapshot();

        let err = coordinator.on_frame(Source::Left, &[0u8; FRAME_SIZE - 1]).unwrap_err();
        assert!(err.is_malformed_frame());
        assert_eq!(coordinator.snapshot(), before);
    }

    #[test]
    fn test_frame_path_detects() {
        let (coordinator, _clock) = coordinator();
        coordinator.start();
        let frame = SampleDecoder::encode(&punch(40.0, [0.0, 0.0, 250.0], 0));
        let event = coordinator.on_frame(Source::Right, &frame).unwrap().unwrap();
        assert_eq!(event.source, Source::Right);
        assert_eq!(event.category, Category::Hook);
    }

    #[test]
    fn test_subscribe_receives_current_state() {
        let (coordinator, clock) = coordinator();
        coordinator.start();
        clock.advance_ms(12_000);
        coordinator.on_sample(Source::Left, &punch(40.0, [0.0; 3], 0));

        let mut observer = coordinator.subscribe().unwrap();
        let frame = observer.try_recv().unwrap();
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["active"], true);
        assert_eq!(value["elapsed_sec"], 12.0);
        assert_eq!(value["left"]["punch_count"], 1);
        assert_eq!(value["combined"]["total_punches"], 1);
    }

    #[test]
    fn test_broadcast_triggers() {
        let (coordinator, clock) = coordinator();
        let mut observer = coordinator.subscribe().unwrap();
        observer.drain();

        // Inactive: tick and live samples stay quiet
        coordinator.tick();
        coordinator.on_sample(Source::Left, &punch(10.0, [0.0; 3], 0));
        assert!(observer.try_recv().is_none());

        coordinator.start();
        assert_eq!(observer.drain().len(), 1);

        clock.advance_ms(1000);
        coordinator.tick();
        let frames = observer.drain();
        assert_eq!(frames.len(), 1);
        let value: serde_json::Value = serde_json::from_str(&frames[0]).unwrap();
        assert_eq!(value["elapsed_sec"], 1.0);

        // A punch publishes, a below-threshold sample does not
        coordinator.on_sample(Source::Left, &punch(40.0, [0.0; 3], 10));
        coordinator.on_sample(Source::Left, &punch(10.0, [0.0; 3], 20));
        assert_eq!(observer.drain().len(), 1);

        // Ticks continue while paused
        coordinator.pause();
        coordinator.tick();
        assert_eq!(observer.drain().len(), 2);

        assert_eq!(coordinator.unsubscribe(observer), 0);
        assert_eq!(coordinator.broadcaster().observer_count(), 0);
    }

    #[test]
    fn test_commands_sent_to_connected_sources() {
        let (sink, mut rx) = ChannelCommandSink::new(8);
        let coordinator = SessionCoordinator::default()
            .with_clock(Arc::new(ManualClock::default()))
            .with_command_sink(Arc::new(sink));

        coordinator.on_connectivity_change(Source::Right, true);
        coordinator.start();
        coordinator.reset();

        assert_eq!(
            rx.try_recv().unwrap(),
            OutboundCommand {
                source: Source::Right,
                command: SourceCommand::Start
            }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            OutboundCommand {
                source: Source::Right,
                command: SourceCommand::Reset
            }
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_command_failure_does_not_block_lifecycle() {
        let (sink, rx) = ChannelCommandSink::new(1);
        drop(rx);
        let coordinator = SessionCoordinator::default().with_command_sink(Arc::new(sink));
        coordinator.on_connectivity_change(Source::Left, true);

        coordinator.start();
        assert_eq!(coordinator.phase(), SessionPhase::Active);
        coordinator.stop();
        assert_eq!(coordinator.phase(), SessionPhase::Inactive);
    }

    #[test]
    fn test_concurrent_sources() {
        let coordinator = Arc::new(SessionCoordinator::default());
        coordinator.start();

        let workers: Vec<_> = Source::ALL
            .into_iter()
            .map(|source| {
                let coordinator = Arc::clone(&coordinator);
                std::thread::spawn(move || {
                    for i in 0..100u32 {
                        coordinator.on_sample(source, &punch(40.0, [0.0; 3], i * 400));
                        coordinator.on_sample(source, &punch(5.0, [0.0; 3], i * 400 + 10));
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        let state = coordinator.snapshot();
        assert_eq!(state.left.punch_count, 100);
        assert_eq!(state.right.punch_count, 100);
        assert_eq!(state.combined.total_punches, 200);
        assert_eq!(state.combined.avg_force, 40.0);
    }
}
