//! Bridge controller: one backing process, many viewers.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{Mutex, broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use clawterm_core::{Alert, DeviceClass, Geometry, ServerMessage};

use super::registry::ClientRegistry;
use super::scrollback::ScrollbackBuffer;
use super::types::{
    BridgeConfig, BridgeStatus, ClientChannel, ClientEvent, ClientId, ResizeOutcome,
};
use crate::backend::{AttachedProcess, BackendError, ProcessControl, SessionBackend};

/// Output still buffered when the process exits is drained for at most this long.
const EXIT_DRAIN_TIMEOUT: Duration = Duration::from_millis(250);

/// Shares one backing terminal process between many viewers.
///
/// Cloning is cheap; clones share the same state. Every mutation of the
/// process handle, geometry, scrollback and client registry happens under a
/// single lock, so output broadcast, client joins and resizes never
/// interleave: a joiner sees each output byte exactly once, either in the
/// scrollback replay or in the live broadcast.
#[derive(Clone)]
pub struct BridgeController {
    inner: Arc<BridgeInner>,
}

struct BridgeInner {
    backend: Arc<dyn SessionBackend>,
    config: BridgeConfig,
    state: Mutex<BridgeState>,
    output_tx: broadcast::Sender<Bytes>,
}

struct BridgeState {
    process: Option<LiveProcess>,
    geometry: Geometry,
    scrollback: ScrollbackBuffer,
    clients: ClientRegistry,
    respawn: Option<JoinHandle<()>>,
    /// An attach is in progress outside the lock.
    spawning: bool,
    /// Bumped on every attach; output and exits of older attaches are dropped.
    generation: u64,
    destroyed: bool,
}

struct LiveProcess {
    generation: u64,
    pid: Option<u32>,
    control: Box<dyn ProcessControl>,
}

impl BridgeState {
    fn is_current(&self, generation: u64) -> bool {
        self.process
            .as_ref()
            .is_some_and(|p| p.generation == generation)
    }
}

impl BridgeController {
    pub fn new(backend: Arc<dyn SessionBackend>, config: BridgeConfig) -> Self {
        let (output_tx, _) = broadcast::channel(config.output_capacity.max(1));
        let state = BridgeState {
            process: None,
            geometry: config.default_geometry,
            scrollback: ScrollbackBuffer::new(config.scrollback_bytes),
            clients: ClientRegistry::new(),
            respawn: None,
            spawning: false,
            generation: 0,
            destroyed: false,
        };
        Self {
            inner: Arc::new(BridgeInner {
                backend,
                config,
                state: Mutex::new(state),
                output_tx,
            }),
        }
    }

    pub fn session_name(&self) -> &str {
        self.inner.backend.session_name()
    }

    /// Make sure the backing session exists, creating it at the default
    /// geometry when the probe says it is absent.
    ///
    /// Returns whether the session exists afterwards. Never fails.
    pub async fn ensure_session(&self) -> bool {
        let backend = Arc::clone(&self.inner.backend);
        let geometry = self.inner.config.default_geometry;
        tokio::task::spawn_blocking(move || ensure_session_blocking(backend.as_ref(), geometry))
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "Session probe task failed");
                false
            })
    }

    /// Attach a process to the backing session unless one is already live.
    ///
    /// On success the process is pumped until it exits. An attach failure is
    /// handled like an exit: viewers get `pty-exit` and a respawn is
    /// scheduled. After [`destroy`](Self::destroy) this does nothing.
    ///
    /// The state lock is released while the backend attaches, so viewers
    /// keep joining, typing and resizing during a slow attach.
    pub async fn spawn(&self) {
        let geometry = {
            let mut state = self.inner.state.lock().await;
            if state.destroyed || state.spawning || state.process.is_some() {
                return;
            }
            state.spawning = true;
            state.geometry
        };

        let backend = Arc::clone(&self.inner.backend);
        let default_geometry = self.inner.config.default_geometry;
        let session = self.session_name().to_string();
        let attached = tokio::task::spawn_blocking(move || {
            ensure_session_blocking(backend.as_ref(), default_geometry);
            backend.attach(geometry)
        })
        .await
        .unwrap_or_else(|e| {
            Err(BackendError::AttachFailed {
                session,
                reason: e.to_string(),
            })
        });

        let mut state = self.inner.state.lock().await;
        state.spawning = false;
        match attached {
            Ok(AttachedProcess {
                pid,
                output,
                exit,
                mut control,
            }) => {
                if state.destroyed || state.process.is_some() {
                    drop(state);
                    debug!(?pid, "Bridge changed during attach, discarding process");
                    if let Err(e) = control.kill() {
                        warn!(error = %e, ?pid, "Failed to kill discarded process");
                    }
                    return;
                }
                // A resize accepted during the attach only updated the geometry.
                if state.geometry != geometry
                    && let Err(e) = control.resize(state.geometry)
                {
                    warn!(error = %e, requested = %state.geometry, "Failed to resize new pty");
                    state.geometry = geometry;
                }
                state.generation += 1;
                let generation = state.generation;
                let current = state.geometry;
                state.process = Some(LiveProcess {
                    generation,
                    pid,
                    control,
                });
                drop(state);
                info!(?pid, generation, geometry = %current, "Backing process attached");
                tokio::spawn(self.clone().pump(generation, output, exit));
            }
            Err(e) => {
                warn!(error = %e, "Failed to attach backing process");
                self.after_exit(&mut state);
            }
        }
    }

    fn spawn_boxed(self) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(async move { self.spawn().await })
    }

    /// Forward raw input to the live process; dropped when none is attached.
    pub async fn write(&self, data: &[u8]) {
        let mut state = self.inner.state.lock().await;
        let Some(process) = state.process.as_mut() else {
            debug!(bytes = data.len(), "No backing process, dropping input");
            return;
        };
        if let Err(e) = process.control.write(data) {
            warn!(error = %e, pid = ?process.pid, "Failed to forward input");
        }
    }

    /// Apply a viewer's resize request, subject to arbitration.
    ///
    /// A secondary viewer may only resize while no primary viewer is
    /// connected; a rejected requester is sent the unchanged geometry. An
    /// accepted request updates the authoritative geometry even when no
    /// process is attached, so the next attach uses it.
    pub async fn resize_if_allowed(&self, client: ClientId, cols: u16, rows: u16) -> ResizeOutcome {
        let Some(requested) = Geometry::new(cols, rows) else {
            debug!(client_id = %client, cols, rows, "Ignoring zero-sized resize");
            return ResizeOutcome::Ignored;
        };

        let mut state = self.inner.state.lock().await;
        let Some(class) = state.clients.device_class(client) else {
            debug!(client_id = %client, "Ignoring resize from unregistered client");
            return ResizeOutcome::Ignored;
        };

        if class == DeviceClass::Secondary && state.clients.has_primary() {
            let current = state.geometry;
            state.clients.send(
                client,
                ClientEvent::Message(ServerMessage::dimensions(current)),
            );
            debug!(client_id = %client, %requested, %current, "Secondary resize rejected");
            return ResizeOutcome::Rejected(current);
        }

        if let Some(process) = state.process.as_mut()
            && let Err(e) = process.control.resize(requested)
        {
            warn!(error = %e, %requested, "Failed to resize pty");
            return ResizeOutcome::Ignored;
        }
        state.geometry = requested;
        drop(state);

        debug!(client_id = %client, device_class = %class, %requested, "Resize applied");
        ResizeOutcome::Applied(requested)
    }

    /// Register a viewer. The scrollback (if any) and the current geometry are
    /// queued on `channel` before any live output.
    pub async fn add_client(&self, channel: ClientChannel, device_class: DeviceClass) -> ClientId {
        let id = ClientId::new();
        let mut state = self.inner.state.lock().await;

        if !state.scrollback.is_empty() {
            let _ = channel.try_send(ClientEvent::Output(state.scrollback.snapshot()));
        }
        let _ = channel.try_send(ClientEvent::Message(ServerMessage::dimensions(
            state.geometry,
        )));
        state.clients.register(id, channel, device_class);
        let clients = state.clients.len();
        drop(state);

        info!(client_id = %id, %device_class, clients, "Client connected");
        id
    }

    pub async fn remove_client(&self, client: ClientId) -> bool {
        let mut state = self.inner.state.lock().await;
        let removed = state.clients.unregister(client);
        let clients = state.clients.len();
        drop(state);

        if removed {
            info!(client_id = %client, clients, "Client disconnected");
        }
        removed
    }

    /// Late device-class registration.
    pub async fn register_device(&self, client: ClientId, device_class: DeviceClass) -> bool {
        let updated = self
            .inner
            .state
            .lock()
            .await
            .clients
            .set_device_class(client, device_class);
        if updated {
            debug!(client_id = %client, %device_class, "Device class registered");
        }
        updated
    }

    pub async fn status(&self) -> BridgeStatus {
        let (process_alive, client_count) = {
            let state = self.inner.state.lock().await;
            (state.process.is_some(), state.clients.len())
        };
        let backend = Arc::clone(&self.inner.backend);
        let session_alive = tokio::task::spawn_blocking(move || backend.has_session())
            .await
            .unwrap_or(false);

        BridgeStatus {
            session_name: self.session_name().to_string(),
            session_alive,
            process_alive,
            client_count,
        }
    }

    /// Cancel any pending respawn and kill the live process. Idempotent.
    #[allow(clippy::significant_drop_tightening)]
    pub async fn destroy(&self) {
        let mut state = self.inner.state.lock().await;
        if state.destroyed {
            return;
        }
        state.destroyed = true;

        if let Some(respawn) = state.respawn.take() {
            respawn.abort();
        }
        if let Some(mut process) = state.process.take() {
            match process.control.kill() {
                Ok(()) => info!(pid = ?process.pid, "Backing process killed"),
                Err(e) => warn!(error = %e, pid = ?process.pid, "Failed to kill backing process"),
            }
        }
    }

    /// Raw output chunks in process order.
    pub fn subscribe_output(&self) -> broadcast::Receiver<Bytes> {
        self.inner.output_tx.subscribe()
    }

    /// Send an accepted alert to every viewer.
    pub async fn broadcast_alert(&self, alert: Alert) -> usize {
        let event = ClientEvent::Message(ServerMessage::Alert(alert));
        self.inner.state.lock().await.clients.broadcast(&event)
    }

    pub async fn geometry(&self) -> Geometry {
        self.inner.state.lock().await.geometry
    }

    pub async fn process_alive(&self) -> bool {
        self.inner.state.lock().await.process.is_some()
    }

    pub async fn client_count(&self) -> usize {
        self.inner.state.lock().await.clients.len()
    }

    async fn pump(
        self,
        generation: u64,
        mut output: mpsc::Receiver<Vec<u8>>,
        mut exit: oneshot::Receiver<Option<u32>>,
    ) {
        let code = loop {
            tokio::select! {
                biased;
                chunk = output.recv() => match chunk {
                    Some(chunk) => self.handle_output(generation, chunk).await,
                    None => break (&mut exit).await.ok().flatten(),
                },
                code = &mut exit => {
                    let drain = async {
                        while let Some(chunk) = output.recv().await {
                            self.handle_output(generation, chunk).await;
                        }
                    };
                    if tokio::time::timeout(EXIT_DRAIN_TIMEOUT, drain).await.is_err() {
                        debug!(generation, "Output still open after exit, stopped draining");
                    }
                    break code.ok().flatten();
                }
            }
        };
        self.handle_exit(generation, code).await;
    }

    async fn handle_output(&self, generation: u64, chunk: Vec<u8>) {
        let chunk = Bytes::from(chunk);
        let mut state = self.inner.state.lock().await;
        if !state.is_current(generation) {
            return;
        }
        state.scrollback.append(&chunk);
        state.clients.broadcast(&ClientEvent::Output(chunk.clone()));
        // Sent under the lock so subscribers see the same order as viewers.
        let _ = self.inner.output_tx.send(chunk);
    }

    async fn handle_exit(&self, generation: u64, code: Option<u32>) {
        let mut state = self.inner.state.lock().await;
        if !state.is_current(generation) {
            debug!(generation, "Ignoring exit of a replaced process");
            return;
        }
        let pid = state.process.take().and_then(|p| p.pid);
        info!(?pid, ?code, generation, "Backing process exited");
        self.after_exit(&mut state);
    }

    fn after_exit(&self, state: &mut BridgeState) {
        state
            .clients
            .broadcast(&ClientEvent::Message(ServerMessage::PtyExit));
        if state.destroyed {
            return;
        }

        let delay = self.inner.config.respawn_delay;
        let bridge = self.clone();
        // May run inside the previous respawn task, so the old handle is
        // detached rather than aborted.
        state.respawn = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            bridge.spawn_boxed().await;
        }));
        info!(delay_ms = delay.as_millis(), "Respawn scheduled");
    }
}

fn ensure_session_blocking(backend: &dyn SessionBackend, geometry: Geometry) -> bool {
    if backend.has_session() {
        return true;
    }
    info!(session = backend.session_name(), %geometry, "Session absent, creating");
    match backend.create_session(geometry) {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "Failed to create session");
            false
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::backend::fake::FakeBackend;
    use crate::bridge::CLIENT_QUEUE_CAPACITY;

    fn bridge(backend: &FakeBackend) -> BridgeController {
        let config = BridgeConfig {
            respawn_delay: Duration::from_millis(20),
            ..BridgeConfig::default()
        };
        BridgeController::new(Arc::new(backend.clone()), config)
    }

    #[tokio::test]
    async fn spawn_is_noop_while_attached() {
        let backend = FakeBackend::new("test");
        let bridge = bridge(&backend);
        bridge.spawn().await;
        bridge.spawn().await;
        assert_eq!(backend.attach_count(), 1);
        assert!(bridge.process_alive().await);
    }

    #[tokio::test]
    async fn spawn_after_destroy_does_nothing() {
        let backend = FakeBackend::new("test");
        let bridge = bridge(&backend);
        bridge.destroy().await;
        bridge.spawn().await;
        assert_eq!(backend.attach_count(), 0);
    }

    #[tokio::test]
    async fn zero_sized_resize_is_ignored() {
        let backend = FakeBackend::new("test");
        let bridge = bridge(&backend);
        let (tx, _rx) = mpsc::channel(CLIENT_QUEUE_CAPACITY);
        let id = bridge.add_client(tx, DeviceClass::Primary).await;

        assert_eq!(bridge.resize_if_allowed(id, 0, 30).await, ResizeOutcome::Ignored);
        assert_eq!(bridge.geometry().await, Geometry::DEFAULT);
    }

    #[tokio::test]
    async fn resize_from_unknown_client_is_ignored() {
        let backend = FakeBackend::new("test");
        let bridge = bridge(&backend);
        assert_eq!(
            bridge.resize_if_allowed(ClientId::new(), 80, 24).await,
            ResizeOutcome::Ignored
        );
    }

    #[tokio::test]
    async fn accepted_resize_without_process_sets_next_attach_geometry() {
        let backend = FakeBackend::new("test");
        let bridge = bridge(&backend);
        let (tx, _rx) = mpsc::channel(CLIENT_QUEUE_CAPACITY);
        let id = bridge.add_client(tx, DeviceClass::Primary).await;

        let outcome = bridge.resize_if_allowed(id, 100, 30).await;
        assert_eq!(outcome, ResizeOutcome::Applied(Geometry { cols: 100, rows: 30 }));

        bridge.spawn().await;
        assert_eq!(
            backend.attach_geometries(),
            vec![Geometry { cols: 100, rows: 30 }]
        );
    }

    #[tokio::test]
    async fn failed_pty_resize_keeps_geometry() {
        let backend = FakeBackend::new("test");
        let bridge = bridge(&backend);
        bridge.spawn().await;
        let (tx, _rx) = mpsc::channel(CLIENT_QUEUE_CAPACITY);
        let id = bridge.add_client(tx, DeviceClass::Primary).await;

        backend.set_fail_resize(true);
        assert_eq!(bridge.resize_if_allowed(id, 90, 20).await, ResizeOutcome::Ignored);
        assert_eq!(bridge.geometry().await, Geometry::DEFAULT);
    }

    #[tokio::test]
    async fn output_is_published_to_subscribers() {
        let backend = FakeBackend::new("test");
        let bridge = bridge(&backend);
        let mut output = bridge.subscribe_output();
        bridge.spawn().await;

        backend.emit(b"one");
        backend.emit(b"two");
        assert_eq!(&output.recv().await.unwrap()[..], b"one");
        assert_eq!(&output.recv().await.unwrap()[..], b"two");
    }

    #[tokio::test]
    async fn slow_attach_does_not_block_viewers() {
        let backend = FakeBackend::new("test");
        backend.set_attach_delay(Duration::from_millis(400));
        let bridge = bridge(&backend);
        let spawning = tokio::spawn({
            let bridge = bridge.clone();
            async move { bridge.spawn().await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let (tx, _rx) = mpsc::channel(CLIENT_QUEUE_CAPACITY);
        let id = tokio::time::timeout(
            Duration::from_millis(200),
            bridge.add_client(tx, DeviceClass::Primary),
        )
        .await
        .unwrap();
        // A second spawn during the attach is a no-op.
        bridge.spawn().await;
        let outcome = tokio::time::timeout(
            Duration::from_millis(200),
            bridge.resize_if_allowed(id, 100, 30),
        )
        .await
        .unwrap();
        assert_eq!(outcome, ResizeOutcome::Applied(Geometry { cols: 100, rows: 30 }));

        spawning.await.unwrap();
        assert!(bridge.process_alive().await);
        assert_eq!(backend.attach_count(), 1);
        // The attach started at the old size and caught up afterwards.
        assert_eq!(backend.attach_geometries(), vec![Geometry::DEFAULT]);
        assert_eq!(backend.resizes(), vec![Geometry { cols: 100, rows: 30 }]);
    }

    #[tokio::test]
    async fn destroy_during_attach_kills_the_new_process() {
        let backend = FakeBackend::new("test");
        backend.set_attach_delay(Duration::from_millis(200));
        let bridge = bridge(&backend);
        let spawning = tokio::spawn({
            let bridge = bridge.clone();
            async move { bridge.spawn().await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        bridge.destroy().await;
        spawning.await.unwrap();
        assert!(!bridge.process_alive().await);
        assert_eq!(backend.attach_count(), 1);
        assert_eq!(backend.kill_count(), 1);
        assert!(!backend.is_attached());
    }
}
