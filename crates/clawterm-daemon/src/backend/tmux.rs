//! tmux-backed session with a `portable-pty` attach process.
//!
//! The tmux session outlives every viewer and every attach process. The
//! bridge only ever runs `tmux attach-session` inside a pty; when that
//! process dies the session keeps running and a fresh attach picks it up.

use std::io::{ErrorKind, Read, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::mpsc as std_mpsc;

use portable_pty::{ChildKiller, CommandBuilder, MasterPty, PtySize, native_pty_system};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use clawterm_core::Geometry;
use clawterm_core::config::SessionConfig;

use super::{AttachedProcess, BackendError, OUTPUT_CHANNEL_CAPACITY, ProcessControl, SessionBackend};

const READ_BUFFER_SIZE: usize = 8192;

/// Session backend driving the `tmux` CLI.
#[derive(Debug, Clone)]
pub struct TmuxBackend {
    tmux_bin: PathBuf,
    session_name: String,
    term: String,
    working_directory: PathBuf,
}

impl TmuxBackend {
    pub fn new(config: &SessionConfig) -> Self {
        let working_directory = dirs::home_dir().unwrap_or_else(|| {
            warn!("dirs::home_dir() returned None; attaching from temp_dir");
            std::env::temp_dir()
        });
        Self {
            tmux_bin: config.tmux_bin.clone(),
            session_name: config.session_name.clone(),
            term: config.term.clone(),
            working_directory,
        }
    }

    fn tmux(&self) -> Command {
        let mut cmd = Command::new(&self.tmux_bin);
        cmd.stdin(Stdio::null());
        cmd
    }

    fn attach_failed(&self, reason: impl ToString) -> BackendError {
        BackendError::AttachFailed {
            session: self.session_name.clone(),
            reason: reason.to_string(),
        }
    }
}

impl SessionBackend for TmuxBackend {
    fn session_name(&self) -> &str {
        &self.session_name
    }

    fn has_session(&self) -> bool {
        self.tmux()
            .args(["has-session", "-t", self.session_name.as_str()])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .is_ok_and(|status| status.success())
    }

    fn create_session(&self, geometry: Geometry) -> Result<(), BackendError> {
        let cols = geometry.cols.to_string();
        let rows = geometry.rows.to_string();
        let output = self
            .tmux()
            .args(["new-session", "-d", "-s", self.session_name.as_str()])
            .args(["-x", cols.as_str(), "-y", rows.as_str()])
            .current_dir(&self.working_directory)
            .output()
            .map_err(|e| BackendError::CreateFailed {
                session: self.session_name.clone(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(BackendError::CreateFailed {
                session: self.session_name.clone(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        info!(session = %self.session_name, %geometry, "Created tmux session");
        Ok(())
    }

    fn attach(&self, geometry: Geometry) -> Result<AttachedProcess, BackendError> {
        let pair = native_pty_system()
            .openpty(pty_size(geometry))
            .map_err(|e| self.attach_failed(e))?;

        // CommandBuilder starts from the daemon's own environment.
        let mut cmd = CommandBuilder::new(&self.tmux_bin);
        cmd.args(["attach-session", "-t", self.session_name.as_str()]);
        cmd.env("TERM", &self.term);
        cmd.cwd(&self.working_directory);

        let mut child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| self.attach_failed(e))?;
        // The reader only sees EOF once every slave handle is closed.
        drop(pair.slave);

        let pid = child.process_id();
        let killer = child.clone_killer();
        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| self.attach_failed(e))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| self.attach_failed(e))?;

        let (output_tx, output_rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
        spawn_named("pty-reader", move || read_loop(reader, &output_tx))?;

        let (input_tx, input_rx) = std_mpsc::channel::<Vec<u8>>();
        spawn_named("pty-writer", move || write_loop(writer, &input_rx))?;

        let (exit_tx, exit_rx) = oneshot::channel();
        spawn_named("pty-wait", move || {
            let code = match child.wait() {
                Ok(status) => Some(status.exit_code()),
                Err(e) => {
                    warn!(error = %e, "Failed to reap attach process");
                    None
                }
            };
            let _ = exit_tx.send(code);
        })?;

        info!(session = %self.session_name, ?pid, %geometry, "Attached to tmux session");

        Ok(AttachedProcess {
            pid,
            output: output_rx,
            exit: exit_rx,
            control: Box::new(PtyControl {
                master: pair.master,
                input_tx,
                killer,
            }),
        })
    }
}

/// Control handle for a pty-attached process.
struct PtyControl {
    master: Box<dyn MasterPty + Send>,
    input_tx: std_mpsc::Sender<Vec<u8>>,
    killer: Box<dyn ChildKiller + Send + Sync>,
}

impl ProcessControl for PtyControl {
    fn write(&mut self, data: &[u8]) -> Result<(), BackendError> {
        self.input_tx
            .send(data.to_vec())
            .map_err(|_| BackendError::InputClosed)
    }

    fn resize(&mut self, geometry: Geometry) -> Result<(), BackendError> {
        self.master
            .resize(pty_size(geometry))
            .map_err(|e| BackendError::Pty(e.to_string()))
    }

    fn kill(&mut self) -> Result<(), BackendError> {
        self.killer.kill().map_err(BackendError::Io)
    }
}

const fn pty_size(geometry: Geometry) -> PtySize {
    PtySize {
        rows: geometry.rows,
        cols: geometry.cols,
        pixel_width: 0,
        pixel_height: 0,
    }
}

fn spawn_named<F>(name: &str, f: F) -> Result<(), BackendError>
where
    F: FnOnce() + Send + 'static,
{
    std::thread::Builder::new()
        .name(name.to_string())
        .spawn(f)
        .map(|_| ())
        .map_err(BackendError::Io)
}

fn read_loop(mut reader: Box<dyn Read + Send>, output_tx: &mpsc::Sender<Vec<u8>>) {
    let mut buf = [0u8; READ_BUFFER_SIZE];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if output_tx.blocking_send(buf[..n].to_vec()).is_err() {
                    debug!("Output receiver dropped, stopping pty reader");
                    break;
                }
            }
            Err(ref e) if e.kind() == ErrorKind::Interrupted => {}
            // EIO once the attach process has exited
            Err(e) => {
                debug!(error = %e, "Pty read finished");
                break;
            }
        }
    }
}

fn write_loop(mut writer: Box<dyn Write + Send>, input_rx: &std_mpsc::Receiver<Vec<u8>>) {
    while let Ok(bytes) = input_rx.recv() {
        if let Err(e) = writer.write_all(&bytes).and_then(|()| writer.flush()) {
            warn!(error = %e, "Failed to write to pty, dropping input");
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pty_size_maps_geometry() {
        let size = pty_size(Geometry { cols: 132, rows: 43 });
        assert_eq!(size.cols, 132);
        assert_eq!(size.rows, 43);
        assert_eq!(size.pixel_width, 0);
    }

    #[test]
    fn missing_tmux_binary_means_no_session() {
        let config = SessionConfig {
            tmux_bin: PathBuf::from("/nonexistent/tmux"),
            ..SessionConfig::default()
        };
        let backend = TmuxBackend::new(&config);
        assert!(!backend.has_session());
        assert!(matches!(
            backend.create_session(Geometry::DEFAULT),
            Err(BackendError::CreateFailed { .. })
        ));
    }

    #[test]
    fn session_name_comes_from_config() {
        let config = SessionConfig {
            session_name: "pairing".to_string(),
            ..SessionConfig::default()
        };
        assert_eq!(TmuxBackend::new(&config).session_name(), "pairing");
    }
}
