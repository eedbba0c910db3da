//! Streaming sessions
//!
//! A session is one bounded producer/consumer lifetime. Every `start`
//! builds a fresh value with its own sockets, sequence counter and stats;
//! nothing is reused across sessions.

pub mod connection;
pub mod receiver;
pub mod sender;
pub mod stats;

use std::fmt;
use uuid::Uuid;

pub use connection::{ConnectionMachine, ConnectionState, DisconnectReason, Effect};
pub use receiver::{ReceiverSession, ReceiverSettings};
pub use sender::{SenderHandle, SenderSession};
pub use stats::{LossTracker, ReceiveStats, SenderStats, SenderStatsSnapshot, StatsSnapshot};

/// Identifier attached to a session's log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
