//! Strike Flux - real-time punch analytics for a pair of boxing gloves
//!
//! Each glove streams 20-byte IMU frames at ~100 Hz. Flux turns them into
//! session analytics through a deterministic pipeline: frame decoding →
//! threshold/debounce detection → rotation-based classification → per-glove
//! aggregation → combined statistics → snapshot broadcast.
//!
//! ## Modules
//!
//! - **Pipeline stages**: `decoder`, `detector`, `classifier`, `aggregator`
//! - **Session**: `coordinator` owns the state machine, `broadcaster` fans
//!   snapshots out to observers, `ticker` keeps elapsed time moving
//! - **Tooling**: `replay` for deterministic NDJSON sessions, `ffi` for C hosts

pub mod aggregator;
pub mod broadcaster;
pub mod classifier;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod decoder;
pub mod detector;
pub mod error;
pub mod replay;
pub mod ticker;
pub mod transport;
pub mod types;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use broadcaster::{ObserverHandle, StateBroadcaster};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::AnalyticsConfig;
pub use coordinator::SessionCoordinator;
pub use decoder::SampleDecoder;
pub use error::AnalyticsError;
pub use replay::{ReplayDriver, ReplayRecord};
pub use ticker::{spawn_ticker, TickerHandle};
pub use transport::{ChannelCommandSink, CommandSink, SourceCommand};
pub use types::{Category, Sample, SessionPhase, SessionState, Source, StrikeEvent};

/// Library version, reported by the CLI and FFI
pub const STRIKE_FLUX_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for reports
pub const PRODUCER_NAME: &str = "strike-flux";
