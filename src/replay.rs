//! Deterministic session replay
//!
//! A replay file is NDJSON, one record per line, tagged by `type`:
//!
//! ```text
//! {"type":"connect","source":"left","connected":true}
//! {"type":"command","command":"start"}
//! {"type":"advance","ms":1500}
//! {"type":"frame","source":"left","hex":"a00f0000..."}
//! {"type":"sample","source":"right","accel":[40,0,0],"gyro":[0,0,250],"ts":1200}
//! {"type":"tick"}
//! ```
//!
//! Time only moves on `advance`, so the same file always produces the same
//! broadcast stream.

use crate::broadcaster::{Frame, ObserverHandle};
use crate::clock::ManualClock;
use crate::config::AnalyticsConfig;
use crate::coordinator::SessionCoordinator;
use crate::decoder::SampleDecoder;
use crate::error::AnalyticsError;
use crate::types::{Sample, SessionPhase, SessionState, Source, StrikeEvent};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Session command carried by a replay record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionCommand {
    Start,
    Stop,
    Reset,
    Pause,
    Resume,
}

/// One line of a replay file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReplayRecord {
    /// Raw frame as the transport delivered it
    Frame { source: Source, hex: String },
    /// Reading in engineering units; encoded to a frame before ingestion
    Sample {
        source: Source,
        accel: [f64; 3],
        gyro: [f64; 3],
        ts: u32,
        #[serde(default)]
        seq: u16,
        #[serde(default = "default_battery")]
        battery: u8,
        #[serde(default = "default_calibrated")]
        calibrated: bool,
    },
    Connect { source: Source, connected: bool },
    Command { command: SessionCommand },
    /// Move the session clock forward, ticking at every tick boundary crossed
    Advance { ms: u64 },
    /// Force one tick without moving the clock
    Tick,
}

/// Longest clock jump a single `advance` record may ask for (one day)
pub const MAX_ADVANCE_MS: u64 = 24 * 60 * 60 * 1000;

fn default_battery() -> u8 {
    100
}

fn default_calibrated() -> bool {
    true
}

impl ReplayRecord {
    /// Parse NDJSON, skipping blank lines
    pub fn parse_ndjson(ndjson: &str) -> Result<Vec<ReplayRecord>, AnalyticsError> {
        let mut records = Vec::new();
        for (line_num, line) in ndjson.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<ReplayRecord>(trimmed) {
                Ok(record) => records.push(record),
                Err(e) => {
                    return Err(AnalyticsError::ReplayParse {
                        line: line_num + 1,
                        message: e.to_string(),
                    });
                }
            }
        }
        Ok(records)
    }
}

/// Result of a replay run
#[derive(Debug, Clone, Serialize)]
pub struct ReplayReport {
    pub records: usize,
    pub events: Vec<StrikeEvent>,
    pub malformed_frames: usize,
    /// Snapshots returned by each `stop` command
    pub sessions: Vec<SessionState>,
    pub final_state: SessionState,
}

/// Drives a coordinator from replay records on a manual clock
pub struct ReplayDriver {
    clock: Arc<ManualClock>,
    coordinator: SessionCoordinator,
    observer: ObserverHandle,
    frames: Vec<Frame>,
    tick_interval_ms: u64,
    since_tick_ms: u64,
    records: usize,
    events: Vec<StrikeEvent>,
    malformed_frames: usize,
    sessions: Vec<SessionState>,
}

impl ReplayDriver {
    pub fn new(config: AnalyticsConfig) -> Result<Self, AnalyticsError> {
        let clock = Arc::new(ManualClock::default());
        let tick_interval_ms = config.tick_interval_ms;
        let coordinator = SessionCoordinator::try_new(config)?.with_clock(clock.clone());
        let observer = coordinator.subscribe()?;

        Ok(Self {
            clock,
            coordinator,
            observer,
            frames: Vec::new(),
            tick_interval_ms,
            since_tick_ms: 0,
            records: 0,
            events: Vec::new(),
            malformed_frames: 0,
            sessions: Vec::new(),
        })
    }

    pub fn coordinator(&self) -> &SessionCoordinator {
        &self.coordinator
    }

    /// Apply one record. `line` is only used for error reporting.
    pub fn apply(&mut self, line: usize, record: &ReplayRecord) -> Result<(), AnalyticsError> {
        self.records += 1;

        match record {
            ReplayRecord::Frame { source, hex } => {
                let compact: String = hex.chars().filter(|c| !c.is_whitespace()).collect();
                let bytes = hex::decode(&compact).map_err(|e| AnalyticsError::ReplayParse {
                    line,
                    message: AnalyticsError::InvalidHex(e.to_string()).to_string(),
                })?;
                match self.coordinator.on_frame(*source, &bytes) {
                    Ok(event) => self.events.extend(event),
                    Err(e) if e.is_malformed_frame() => self.malformed_frames += 1,
                    Err(e) => return Err(e),
                }
            }
            ReplayRecord::Sample {
                source,
                accel,
                gyro,
                ts,
                seq,
                battery,
                calibrated,
            } => {
                let sample = Sample {
                    accel: *accel,
                    gyro: *gyro,
                    timestamp_ms: *ts,
                    sequence: *seq,
                    battery: *battery,
                    charging: false,
                    calibrated: *calibrated,
                };
                // Through the wire format, so replays see the same quantization as live frames
                let frame = SampleDecoder::encode(&sample);
                self.events.extend(self.coordinator.on_frame(*source, &frame)?);
            }
            ReplayRecord::Connect { source, connected } => {
                self.coordinator.on_connectivity_change(*source, *connected);
            }
            ReplayRecord::Command { command } => self.command(*command),
            ReplayRecord::Advance { ms } => self.advance(line, *ms)?,
            ReplayRecord::Tick => self.coordinator.tick(),
        }

        self.collect();
        Ok(())
    }

    fn command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Start => {
                self.since_tick_ms = 0;
                self.coordinator.start();
            }
            SessionCommand::Stop => self.sessions.push(self.coordinator.stop()),
            SessionCommand::Reset => self.coordinator.reset(),
            SessionCommand::Pause => self.coordinator.pause(),
            SessionCommand::Resume => self.coordinator.resume(),
        }
    }

    fn advance(&mut self, line: usize, ms: u64) -> Result<(), AnalyticsError> {
        if ms > MAX_ADVANCE_MS {
            return Err(AnalyticsError::ReplayParse {
                line,
                message: format!("advance of {ms} ms exceeds the {MAX_ADVANCE_MS} ms limit"),
            });
        }

        // Nothing is broadcast on ticks without a session
        if self.coordinator.phase() == SessionPhase::Inactive {
            self.clock.advance_ms(ms as i64);
            self.since_tick_ms = (self.since_tick_ms + ms) % self.tick_interval_ms;
            return Ok(());
        }

        let mut remaining = ms;
        while self.since_tick_ms + remaining >= self.tick_interval_ms {
            let step = self.tick_interval_ms - self.since_tick_ms;
            self.clock.advance_ms(step as i64);
            remaining -= step;
            self.since_tick_ms = 0;
            self.coordinator.tick();
            // Long advances would overflow the observer queue
            self.collect();
        }
        self.clock.advance_ms(remaining as i64);
        self.since_tick_ms += remaining;
        Ok(())
    }

    fn collect(&mut self) {
        self.frames.extend(self.observer.drain());
    }

    /// Frames broadcast since the last call
    pub fn take_frames(&mut self) -> Vec<Frame> {
        self.collect();
        std::mem::take(&mut self.frames)
    }

    /// Apply every record in order
    pub fn run(&mut self, records: &[ReplayRecord]) -> Result<(), AnalyticsError> {
        for (i, record) in records.iter().enumerate() {
            self.apply(i + 1, record)?;
        }
        debug!(records = records.len(), "replay applied");
        Ok(())
    }

    /// Finish the replay and summarize it
    pub fn finish(self) -> ReplayReport {
        let final_state = self.coordinator.snapshot();
        info!(
            records = self.records,
            events = self.events.len(),
            malformed = self.malformed_frames,
            "Replay finished"
        );
        ReplayReport {
            records: self.records,
            events: self.events,
            malformed_frames: self.malformed_frames,
            sessions: self.sessions,
            final_state,
        }
    }
}

/// Parse and run an NDJSON replay in one go
pub fn replay_ndjson(
    ndjson: &str,
    config: AnalyticsConfig,
) -> Result<(ReplayReport, Vec<Frame>), AnalyticsError> {
    let records = ReplayRecord::parse_ndjson(ndjson)?;
    let mut driver = ReplayDriver::new(config)?;
    let mut frames = driver.take_frames();
    driver.run(&records)?;
    frames.extend(driver.take_frames());
    Ok((driver.finish(), frames))
}
