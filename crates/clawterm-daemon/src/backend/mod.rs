//! Backing terminal session.
//!
//! A [`SessionBackend`] owns the session multiplexer side of the bridge: it
//! can probe for and create the long-lived session, and attach a process to
//! it inside a pseudo-terminal. The attached process is handed to the bridge
//! as an [`AttachedProcess`]: a stream of output chunks, an exit signal, and
//! a [`ProcessControl`] for input, resize and termination.

#[cfg(any(test, feature = "test-utils"))]
pub mod fake;
pub mod tmux;

use tokio::sync::{mpsc, oneshot};

use clawterm_core::Geometry;

pub use tmux::TmuxBackend;

/// Output chunks buffered between the pty reader and the bridge.
pub const OUTPUT_CHANNEL_CAPACITY: usize = 256;

/// Access to the session multiplexer and its pseudo-terminal facility.
///
/// Methods may block on external commands; the bridge calls them from
/// blocking tasks.
pub trait SessionBackend: Send + Sync + 'static {
    /// Name of the backing session.
    fn session_name(&self) -> &str;

    /// Liveness probe. Any failure to run the probe counts as "absent".
    fn has_session(&self) -> bool;

    /// Create the detached session at `geometry`.
    fn create_session(&self, geometry: Geometry) -> Result<(), BackendError>;

    /// Attach a new process to the session at `geometry`.
    fn attach(&self, geometry: Geometry) -> Result<AttachedProcess, BackendError>;
}

/// Write/resize/kill access to an attached process.
pub trait ProcessControl: Send {
    /// Queue bytes for the process's input.
    fn write(&mut self, data: &[u8]) -> Result<(), BackendError>;

    /// Resize the pseudo-terminal.
    fn resize(&mut self, geometry: Geometry) -> Result<(), BackendError>;

    /// Force-terminate the process.
    fn kill(&mut self) -> Result<(), BackendError>;
}

/// A process attached to the backing session.
pub struct AttachedProcess {
    /// OS process id, when the platform reports one.
    pub pid: Option<u32>,
    /// Raw output chunks in arrival order. Closed when the pty reaches EOF.
    pub output: mpsc::Receiver<Vec<u8>>,
    /// Resolves with the exit code once the process has been reaped.
    pub exit: oneshot::Receiver<Option<u32>>,
    pub control: Box<dyn ProcessControl>,
}

impl std::fmt::Debug for AttachedProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttachedProcess")
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}

/// Errors from backend operations.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("Failed to create session {session}: {reason}")]
    CreateFailed { session: String, reason: String },

    #[error("Failed to attach to session {session}: {reason}")]
    AttachFailed { session: String, reason: String },

    #[error("Process input closed")]
    InputClosed,

    #[error("Pty error: {0}")]
    Pty(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
