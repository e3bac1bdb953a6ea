//! Alert notification delivery.
//!
//! Accepted alerts of notifying categories are rendered as
//! `[CATEGORY] matched text` and handed to a [`NotificationSink`]. Delivery
//! is best effort: failures are logged and never reach the bridge.

mod command;
mod fanout;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use clawterm_core::config::NotifierConfig;

pub use command::CommandNotifier;
pub use fanout::run_alert_fanout;

/// Destination for alert notifications.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Whether messages actually leave the process.
    fn is_enabled(&self) -> bool;

    /// Deliver `message`. `Ok(false)` means the sink chose not to send it.
    async fn send(&self, message: &str) -> Result<bool, NotifyError>;
}

/// Sink used when no delivery channel is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledNotifier;

#[async_trait]
impl NotificationSink for DisabledNotifier {
    fn is_enabled(&self) -> bool {
        false
    }

    async fn send(&self, message: &str) -> Result<bool, NotifyError> {
        info!(message, "Notification (delivery disabled)");
        Ok(false)
    }
}

/// Errors from notification delivery.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Failed to run notifier: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Notifier timed out after {0:?}")]
    Timeout(Duration),

    #[error("Notifier exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },
}

/// Build the sink described by `config`.
///
/// Delivery needs both a chat id and an executable notifier, given as a
/// path or found on `PATH`; otherwise alerts are only logged.
pub fn from_config(config: &NotifierConfig) -> Arc<dyn NotificationSink> {
    let Some(chat_id) = config.chat_id.clone() else {
        info!("No chat id configured, notifications disabled");
        return Arc::new(DisabledNotifier);
    };
    let command = match which::which(&config.command) {
        Ok(command) => command,
        Err(e) => {
            warn!(command = %config.command.display(), error = %e, "Notifier not found, notifications disabled");
            return Arc::new(DisabledNotifier);
        }
    };
    info!(command = %command.display(), "Notifications enabled");
    Arc::new(CommandNotifier::new(
        command,
        chat_id,
        Duration::from_secs(config.timeout_secs),
    ))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[tokio::test]
    async fn disabled_notifier_reports_not_sent() {
        let sink = DisabledNotifier;
        assert!(!sink.is_enabled());
        assert!(!sink.send("[ERROR] boom").await.unwrap());
    }

    #[test]
    fn missing_chat_id_disables_delivery() {
        let config = NotifierConfig {
            command: PathBuf::from("sh"),
            chat_id: None,
            ..NotifierConfig::default()
        };
        assert!(!from_config(&config).is_enabled());
    }

    #[test]
    fn missing_binary_disables_delivery() {
        let config = NotifierConfig {
            command: PathBuf::from("clawterm-no-such-notifier"),
            chat_id: Some("42".to_string()),
            ..NotifierConfig::default()
        };
        assert!(!from_config(&config).is_enabled());
    }

    #[cfg(unix)]
    #[test]
    fn notifier_must_be_executable() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("openclaw");
        std::fs::write(&path, "#!/bin/sh\ntrue\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();

        let config = NotifierConfig {
            command: path.clone(),
            chat_id: Some("42".to_string()),
            ..NotifierConfig::default()
        };
        assert!(!from_config(&config).is_enabled());

        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        assert!(from_config(&config).is_enabled());
    }
}
