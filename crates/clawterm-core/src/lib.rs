//! `clawterm` Core Library
//!
//! Shared functionality for `clawterm` components:
//! - Configuration resolution and hierarchy
//! - Wire protocol spoken with terminal viewers
//! - ANSI escape stripping for plain-text consumers
//! - Common error types

pub mod ansi;
pub mod config;
pub mod error;
pub mod protocol;
pub mod tracing_init;

pub use config::Config;
pub use error::{Error, Result};
pub use protocol::{Alert, AlertCategory, ClientMessage, DeviceClass, Geometry, ServerMessage};
