//! Bridge types.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use clawterm_core::config::SessionConfig;
use clawterm_core::{Geometry, ServerMessage};

/// Configuration for the bridge controller.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Geometry used to create the session and for the first attach.
    pub default_geometry: Geometry,
    /// Scrollback cap in bytes.
    pub scrollback_bytes: usize,
    /// Fixed delay between a process exit and the next attach.
    pub respawn_delay: Duration,
    /// Capacity of the raw output broadcast channel.
    pub output_capacity: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self::from(&SessionConfig::default())
    }
}

impl From<&SessionConfig> for BridgeConfig {
    fn from(config: &SessionConfig) -> Self {
        Self {
            default_geometry: config.default_geometry(),
            scrollback_bytes: config.scrollback_bytes,
            respawn_delay: Duration::from_millis(config.respawn_delay_ms),
            output_capacity: 1024,
        }
    }
}

/// Opaque identifier of a connected viewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(Uuid);

impl ClientId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Event delivered to a single viewer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// Raw terminal output, from replay or live broadcast.
    Output(Bytes),
    /// A control message.
    Message(ServerMessage),
}

/// Events a viewer may have queued before it is considered stalled.
pub const CLIENT_QUEUE_CAPACITY: usize = 256;

/// Sending half of a viewer's bounded outbound queue. The transport owns the
/// receiving half; a full or closed queue gets the viewer dropped from the
/// registry, which closes the queue once drained.
pub type ClientChannel = mpsc::Sender<ClientEvent>;

/// Outcome of a resize request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeOutcome {
    /// Geometry changed to the contained value.
    Applied(Geometry),
    /// Denied by arbitration; the requester was sent the contained geometry.
    Rejected(Geometry),
    /// Unknown client, zero dimensions, or a failed pty resize.
    Ignored,
}

/// Point-in-time bridge status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeStatus {
    pub session_name: String,
    pub session_alive: bool,
    pub process_alive: bool,
    pub client_count: usize,
}
