//! Notifier that shells out to a messaging CLI.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::{NotificationSink, NotifyError};

/// Runs `<command> message send --to <chat id> --message <text>`.
#[derive(Debug, Clone)]
pub struct CommandNotifier {
    command: PathBuf,
    chat_id: String,
    timeout: Duration,
}

impl CommandNotifier {
    pub const fn new(command: PathBuf, chat_id: String, timeout: Duration) -> Self {
        Self {
            command,
            chat_id,
            timeout,
        }
    }
}

#[async_trait]
impl NotificationSink for CommandNotifier {
    fn is_enabled(&self) -> bool {
        true
    }

    async fn send(&self, message: &str) -> Result<bool, NotifyError> {
        let output = Command::new(&self.command)
            .args(["message", "send", "--to", self.chat_id.as_str(), "--message", message])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, output)
            .await
            .map_err(|_| NotifyError::Timeout(self.timeout))??;

        if !output.status.success() {
            return Err(NotifyError::Failed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        debug!(chat_id = %self.chat_id, "Notification sent");
        Ok(true)
    }
}

#[cfg(all(test, unix))]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    use super::*;

    fn script(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("notifier.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[tokio::test]
    async fn passes_chat_and_message_as_arguments() {
        let dir = tempfile::tempdir().unwrap();
        let record = dir.path().join("args");
        let cmd = script(
            dir.path(),
            &format!("printf '%s|' \"$@\" > '{}'", record.display()),
        );

        let notifier = CommandNotifier::new(cmd, "42".to_string(), Duration::from_secs(5));
        assert!(notifier.send("[ERROR] fatal: bad ref").await.unwrap());

        let args = std::fs::read_to_string(&record).unwrap();
        assert_eq!(args, "message|send|--to|42|--message|[ERROR] fatal: bad ref|");
    }

    #[tokio::test]
    async fn non_zero_exit_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = script(dir.path(), "echo 'chat not found' >&2; exit 3");

        let notifier = CommandNotifier::new(cmd, "42".to_string(), Duration::from_secs(5));
        let err = notifier.send("[ERROR] x").await.unwrap_err();
        assert!(
            matches!(&err, NotifyError::Failed { stderr, .. } if stderr == "chat not found"),
            "{err}"
        );
    }

    #[tokio::test]
    async fn slow_notifier_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = script(dir.path(), "sleep 5");

        let notifier = CommandNotifier::new(cmd, "42".to_string(), Duration::from_millis(100));
        assert!(matches!(
            notifier.send("[ERROR] x").await,
            Err(NotifyError::Timeout(_))
        ));
    }
}
