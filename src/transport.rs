//! Outbound command hook toward the glove transport
//!
//! The radio stack lives outside this crate. The coordinator only needs a way
//! to ask a glove to start or reset; delivery is best effort and must never
//! block the caller.

use crate::error::AnalyticsError;
use crate::types::Source;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TrySendError};

/// Default depth of the outbound command queue
pub const DEFAULT_COMMAND_QUEUE_CAPACITY: usize = 16;

/// Command written to a glove's control characteristic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceCommand {
    Start,
    Reset,
}

impl SourceCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceCommand::Start => "start",
            SourceCommand::Reset => "reset",
        }
    }
}

/// A command addressed to one source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutboundCommand {
    pub source: Source,
    pub command: SourceCommand,
}

/// Delivery hook implemented by the transport layer.
///
/// Implementations must return promptly; the coordinator calls this on the
/// caller's thread after releasing its lock.
pub trait CommandSink: Send + Sync {
    fn send_command(&self, source: Source, command: SourceCommand) -> Result<(), AnalyticsError>;
}

/// Sink for deployments without a command channel
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCommandSink;

impl CommandSink for NoopCommandSink {
    fn send_command(&self, _source: Source, _command: SourceCommand) -> Result<(), AnalyticsError> {
        Ok(())
    }
}

/// Sink that queues commands for an async transport task
#[derive(Debug, Clone)]
pub struct ChannelCommandSink {
    tx: mpsc::Sender<OutboundCommand>,
}

impl ChannelCommandSink {
    /// Create the sink and the receiver the transport task drains
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<OutboundCommand>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl CommandSink for ChannelCommandSink {
    fn send_command(&self, source: Source, command: SourceCommand) -> Result<(), AnalyticsError> {
        self.tx
            .try_send(OutboundCommand { source, command })
            .map_err(|e| match e {
                TrySendError::Full(_) => {
                    AnalyticsError::CommandDelivery(format!("{source}: command queue full"))
                }
                TrySendError::Closed(_) => {
                    AnalyticsError::CommandDelivery(format!("{source}: transport not running"))
                }
            })
    }
}
