//! In-memory [`SessionBackend`] for tests.
//!
//! Every attach hands out channels whose sending halves stay with the fake,
//! so a test can push output with [`FakeBackend::emit`] and end the process
//! with [`FakeBackend::exit`].

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use clawterm_core::Geometry;

use super::{AttachedProcess, BackendError, OUTPUT_CHANNEL_CAPACITY, ProcessControl, SessionBackend};

#[derive(Debug, Clone)]
pub struct FakeBackend {
    session_name: String,
    state: Arc<Mutex<FakeState>>,
}

#[derive(Debug, Default)]
struct FakeState {
    session_exists: bool,
    fail_create: bool,
    fail_attach: bool,
    fail_resize: bool,
    attach_delay: Option<Duration>,
    created: Vec<Geometry>,
    attaches: Vec<Geometry>,
    writes: Vec<u8>,
    resizes: Vec<Geometry>,
    kills: usize,
    current: Option<LiveFake>,
}

#[derive(Debug)]
struct LiveFake {
    id: usize,
    output_tx: mpsc::Sender<Vec<u8>>,
    exit_tx: oneshot::Sender<Option<u32>>,
}

impl FakeBackend {
    /// A backend whose session already exists.
    pub fn new(session_name: &str) -> Self {
        let backend = Self::without_session(session_name);
        backend.lock().session_exists = true;
        backend
    }

    /// A backend whose session must be created first.
    pub fn without_session(session_name: &str) -> Self {
        Self {
            session_name: session_name.to_string(),
            state: Arc::new(Mutex::new(FakeState::default())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_session_exists(&self, exists: bool) {
        self.lock().session_exists = exists;
    }

    pub fn set_fail_create(&self, fail: bool) {
        self.lock().fail_create = fail;
    }

    pub fn set_fail_attach(&self, fail: bool) {
        self.lock().fail_attach = fail;
    }

    pub fn set_fail_resize(&self, fail: bool) {
        self.lock().fail_resize = fail;
    }

    /// Make every attach block for `delay`, like a slow tmux start.
    pub fn set_attach_delay(&self, delay: Duration) {
        self.lock().attach_delay = Some(delay);
    }

    /// Push output from the live process. Returns false when nothing is attached.
    pub fn emit(&self, bytes: &[u8]) -> bool {
        self.lock()
            .current
            .as_ref()
            .is_some_and(|live| live.output_tx.try_send(bytes.to_vec()).is_ok())
    }

    /// End the live process with `code`. Returns false when nothing is attached.
    pub fn exit(&self, code: Option<u32>) -> bool {
        self.lock().current.take().is_some_and(|live| live.exit_tx.send(code).is_ok())
    }

    pub fn is_attached(&self) -> bool {
        self.lock().current.is_some()
    }

    pub fn attach_count(&self) -> usize {
        self.lock().attaches.len()
    }

    pub fn attach_geometries(&self) -> Vec<Geometry> {
        self.lock().attaches.clone()
    }

    pub fn created_sessions(&self) -> Vec<Geometry> {
        self.lock().created.clone()
    }

    /// All bytes written to any attached process, concatenated.
    pub fn written(&self) -> Vec<u8> {
        self.lock().writes.clone()
    }

    pub fn resizes(&self) -> Vec<Geometry> {
        self.lock().resizes.clone()
    }

    pub fn kill_count(&self) -> usize {
        self.lock().kills
    }
}

impl SessionBackend for FakeBackend {
    fn session_name(&self) -> &str {
        &self.session_name
    }

    fn has_session(&self) -> bool {
        self.lock().session_exists
    }

    fn create_session(&self, geometry: Geometry) -> Result<(), BackendError> {
        let mut state = self.lock();
        if state.fail_create {
            return Err(BackendError::CreateFailed {
                session: self.session_name.clone(),
                reason: "injected failure".to_string(),
            });
        }
        state.created.push(geometry);
        state.session_exists = true;
        Ok(())
    }

    fn attach(&self, geometry: Geometry) -> Result<AttachedProcess, BackendError> {
        let delay = self.lock().attach_delay;
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        let mut state = self.lock();
        if state.fail_attach {
            return Err(BackendError::AttachFailed {
                session: self.session_name.clone(),
                reason: "injected failure".to_string(),
            });
        }
        state.attaches.push(geometry);
        let id = state.attaches.len();

        let (output_tx, output_rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
        let (exit_tx, exit_rx) = oneshot::channel();
        state.current = Some(LiveFake {
            id,
            output_tx,
            exit_tx,
        });

        Ok(AttachedProcess {
            pid: u32::try_from(1000 + id).ok(),
            output: output_rx,
            exit: exit_rx,
            control: Box::new(FakeControl {
                id,
                state: Arc::clone(&self.state),
            }),
        })
    }
}

struct FakeControl {
    id: usize,
    state: Arc<Mutex<FakeState>>,
}

impl FakeControl {
    fn live_state(&self) -> Result<MutexGuard<'_, FakeState>, BackendError> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.current.as_ref().is_some_and(|live| live.id == self.id) {
            Ok(state)
        } else {
            Err(BackendError::InputClosed)
        }
    }
}

impl ProcessControl for FakeControl {
    fn write(&mut self, data: &[u8]) -> Result<(), BackendError> {
        self.live_state()?.writes.extend_from_slice(data);
        Ok(())
    }

    fn resize(&mut self, geometry: Geometry) -> Result<(), BackendError> {
        let mut state = self.live_state()?;
        if state.fail_resize {
            return Err(BackendError::Pty("injected resize failure".to_string()));
        }
        state.resizes.push(geometry);
        Ok(())
    }

    // A killed process exits like a real one, with no exit code.
    fn kill(&mut self) -> Result<(), BackendError> {
        let mut state = self.live_state()?;
        state.kills += 1;
        if let Some(live) = state.current.take() {
            let _ = live.exit_tx.send(None);
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emitted_output_reaches_attached_process() {
        let backend = FakeBackend::new("test");
        let mut process = backend.attach(Geometry::DEFAULT).unwrap();

        assert!(backend.emit(b"hello"));
        assert_eq!(process.output.recv().await.unwrap(), b"hello");

        assert!(backend.exit(Some(0)));
        assert_eq!(process.exit.await.unwrap(), Some(0));
        assert!(!backend.emit(b"late"));
    }

    #[tokio::test]
    async fn control_of_exited_process_reports_closed() {
        let backend = FakeBackend::new("test");
        let mut process = backend.attach(Geometry::DEFAULT).unwrap();
        process.control.write(b"ls\r").unwrap();
        backend.exit(None);

        assert!(matches!(
            process.control.write(b"more"),
            Err(BackendError::InputClosed)
        ));
        assert_eq!(backend.written(), b"ls\r");
    }

    #[test]
    fn create_marks_session_present() {
        let backend = FakeBackend::without_session("test");
        assert!(!backend.has_session());
        backend.create_session(Geometry::DEFAULT).unwrap();
        assert!(backend.has_session());
        assert_eq!(backend.created_sessions(), vec![Geometry::DEFAULT]);
    }
}
