//! Connected viewers and their device classes.

use std::collections::HashMap;

use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use clawterm_core::DeviceClass;

use super::types::{ClientChannel, ClientEvent, ClientId};

struct ClientEntry {
    channel: ClientChannel,
    device_class: DeviceClass,
}

/// Registry of viewer channels.
///
/// The registry holds sending halves only. A viewer whose queue is full or
/// closed is dropped on the next send; its transport sees the queue close
/// after draining what was already queued.
#[derive(Default)]
pub struct ClientRegistry {
    clients: HashMap<ClientId, ClientEntry>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, id: ClientId, channel: ClientChannel, device_class: DeviceClass) {
        self.clients.insert(
            id,
            ClientEntry {
                channel,
                device_class,
            },
        );
    }

    pub fn unregister(&mut self, id: ClientId) -> bool {
        self.clients.remove(&id).is_some()
    }

    /// Update a client's class. Returns false for unknown clients.
    pub fn set_device_class(&mut self, id: ClientId, device_class: DeviceClass) -> bool {
        self.clients.get_mut(&id).is_some_and(|entry| {
            entry.device_class = device_class;
            true
        })
    }

    pub fn device_class(&self, id: ClientId) -> Option<DeviceClass> {
        self.clients.get(&id).map(|entry| entry.device_class)
    }

    pub fn has_primary(&self) -> bool {
        self.clients
            .values()
            .any(|entry| entry.device_class == DeviceClass::Primary)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Send to one client. Returns false if unknown or dropped.
    pub fn send(&mut self, id: ClientId, event: ClientEvent) -> bool {
        let Some(entry) = self.clients.get(&id) else {
            return false;
        };
        match entry.channel.try_send(event) {
            Ok(()) => true,
            Err(e) => {
                log_dropped(id, &e, entry.channel.max_capacity());
                self.clients.remove(&id);
                false
            }
        }
    }

    /// Send to every client, returning how many accepted the event.
    pub fn broadcast(&mut self, event: &ClientEvent) -> usize {
        let mut delivered = 0;
        let mut dropped = Vec::new();
        for (id, entry) in &self.clients {
            match entry.channel.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    log_dropped(*id, &e, entry.channel.max_capacity());
                    dropped.push(*id);
                }
            }
        }
        for id in dropped {
            self.clients.remove(&id);
        }
        delivered
    }
}

fn log_dropped(id: ClientId, error: &TrySendError<ClientEvent>, capacity: usize) {
    match error {
        TrySendError::Full(_) => {
            warn!(client_id = %id, capacity, "Client queue full, disconnecting stalled viewer");
        }
        TrySendError::Closed(_) => debug!(client_id = %id, "Client channel closed, dropping"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use bytes::Bytes;
    use tokio::sync::mpsc;

    use super::*;
    use crate::bridge::CLIENT_QUEUE_CAPACITY;

    #[test]
    fn primary_presence_follows_registration() {
        let mut registry = ClientRegistry::new();
        let (tx, _rx) = mpsc::channel(CLIENT_QUEUE_CAPACITY);
        let secondary = ClientId::new();
        registry.register(secondary, tx.clone(), DeviceClass::Secondary);
        assert!(!registry.has_primary());

        let primary = ClientId::new();
        registry.register(primary, tx, DeviceClass::Primary);
        assert!(registry.has_primary());

        assert!(registry.set_device_class(primary, DeviceClass::Secondary));
        assert!(!registry.has_primary());

        assert!(registry.unregister(primary));
        assert!(!registry.unregister(primary));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn set_device_class_of_unknown_client_fails() {
        let mut registry = ClientRegistry::new();
        assert!(!registry.set_device_class(ClientId::new(), DeviceClass::Primary));
    }

    #[test]
    fn broadcast_drops_closed_channels() {
        let mut registry = ClientRegistry::new();
        let (open_tx, mut open_rx) = mpsc::channel(CLIENT_QUEUE_CAPACITY);
        let (closed_tx, closed_rx) = mpsc::channel(CLIENT_QUEUE_CAPACITY);
        drop(closed_rx);
        registry.register(ClientId::new(), open_tx, DeviceClass::Primary);
        registry.register(ClientId::new(), closed_tx, DeviceClass::Primary);

        let event = ClientEvent::Output(Bytes::from_static(b"hi"));
        assert_eq!(registry.broadcast(&event), 1);
        assert_eq!(open_rx.try_recv().unwrap(), event);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn full_queue_drops_the_stalled_client() {
        let mut registry = ClientRegistry::new();
        let (stalled_tx, mut stalled_rx) = mpsc::channel(2);
        let (reader_tx, mut reader_rx) = mpsc::channel(CLIENT_QUEUE_CAPACITY);
        let stalled = ClientId::new();
        registry.register(stalled, stalled_tx, DeviceClass::Primary);
        registry.register(ClientId::new(), reader_tx, DeviceClass::Secondary);

        for i in 0..3u8 {
            registry.broadcast(&ClientEvent::Output(Bytes::from(vec![i])));
            assert!(reader_rx.try_recv().is_ok());
        }
        assert_eq!(registry.device_class(stalled), None);
        assert!(!registry.has_primary());
        assert!(!registry.send(stalled, ClientEvent::Output(Bytes::new())));

        // Already queued events are still delivered, then the queue closes.
        assert_eq!(stalled_rx.try_recv().unwrap(), ClientEvent::Output(Bytes::from(vec![0])));
        assert_eq!(stalled_rx.try_recv().unwrap(), ClientEvent::Output(Bytes::from(vec![1])));
        assert!(matches!(
            stalled_rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }
}
