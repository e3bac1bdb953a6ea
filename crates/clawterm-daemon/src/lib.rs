//! clawterm Daemon Library
//!
//! Core functionality for the clawterm daemon:
//! - Backing tmux session attached through a pseudo-terminal
//! - Terminal bridge shared by many viewers, with scrollback replay and
//!   arbitrated resizing
//! - Output pattern watcher and alert notification
//! - Daily transcripts, LLM summaries and host monitoring
//! - HTTP and WebSocket server

pub mod archive;
pub mod backend;
pub mod bridge;
pub mod monitor;
pub mod notify;
pub mod server;
pub mod summarizer;
pub mod transcript;
pub mod watcher;
