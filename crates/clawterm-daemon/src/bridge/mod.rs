//! Terminal bridge.
//!
//! Shares a single backing process between any number of viewers: output
//! fan-out with scrollback replay for late joiners, arbitrated resizing, and
//! automatic re-attach when the process exits.

mod controller;
mod registry;
mod scrollback;
mod types;

pub use controller::BridgeController;
pub use registry::ClientRegistry;
pub use scrollback::ScrollbackBuffer;
pub use types::{
    BridgeConfig, BridgeStatus, CLIENT_QUEUE_CAPACITY, ClientChannel, ClientEvent, ClientId,
    ResizeOutcome,
};
