use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::connection::Outbound;
use crate::error::TransportError;

/// The single active connection for one device id.
pub struct DeviceConnection {
    device_id: String,
    connection_id: Uuid,
    outbound: Arc<dyn Outbound>,
    /// Held for exactly one frame so concurrent commands never interleave.
    send_guard: Mutex<()>,
}

impl DeviceConnection {
    fn new(device_id: String, outbound: Arc<dyn Outbound>) -> Self {
        Self {
            device_id,
            connection_id: Uuid::new_v4(),
            outbound,
            send_guard: Mutex::new(()),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn connection_id(&self) -> Uuid {
        self.connection_id
    }

    pub async fn send_serialized(&self, text: String) -> Result<(), TransportError> {
        let _guard = self.send_guard.lock().await;
        self.outbound.send_text(text).await
    }

    pub async fn close(&self) {
        self.outbound.close().await;
    }
}

/// Device id -> active connection. At most one entry per id.
#[derive(Default)]
pub struct DeviceRegistry {
    devices: DashMap<String, Arc<DeviceConnection>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a connection for `device_id`. Any previous connection is
    /// closed before the new one replaces it in the map; one displaced by a
    /// concurrent register in between is closed after the swap.
    pub async fn register(
        &self,
        device_id: &str,
        outbound: Arc<dyn Outbound>,
    ) -> Arc<DeviceConnection> {
        let connection = Arc::new(DeviceConnection::new(device_id.to_string(), outbound));

        let previous = self.lookup(device_id);
        if let Some(previous) = &previous {
            info!(
                tank_id = %device_id,
                old = %previous.connection_id,
                new = %connection.connection_id,
                "tank reconnected, closing previous connection"
            );
            previous.close().await;
        }

        let displaced = self
            .devices
            .insert(device_id.to_string(), connection.clone());
        if let Some(displaced) = displaced {
            let already_closed = previous
                .as_ref()
                .is_some_and(|previous| Arc::ptr_eq(previous, &displaced));
            if !already_closed {
                debug!(
                    tank_id = %device_id,
                    old = %displaced.connection_id,
                    "closing connection displaced by concurrent register"
                );
                displaced.close().await;
            }
        }

        connection
    }

    pub fn lookup(&self, device_id: &str) -> Option<Arc<DeviceConnection>> {
        self.devices
            .get(device_id)
            .map(|entry| entry.value().clone())
    }

    /// Remove the entry for `device_id` only if it still holds `connection`.
    /// Returns whether anything was removed.
    pub fn deregister(&self, device_id: &str, connection: &Arc<DeviceConnection>) -> bool {
        let removed = self
            .devices
            .remove_if(device_id, |_, current| Arc::ptr_eq(current, connection))
            .is_some();
        if !removed {
            debug!(
                tank_id = %device_id,
                connection = %connection.connection_id,
                "skip deregister, connection already displaced"
            );
        }
        removed
    }

    pub fn is_online(&self, device_id: &str) -> bool {
        self.devices.contains_key(device_id)
    }

    /// Currently registered device ids, sorted.
    pub fn online_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .devices
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::memory;
    use std::sync::Weak;

    #[test_timeout::tokio_timeout_test]
    async fn reregistering_closes_previous_and_keeps_one_entry() {
        let registry = DeviceRegistry::new();
        let (first_out, _first_in, first_peer) = memory::pair();
        let (second_out, _second_in, second_peer) = memory::pair();

        let first = registry.register("tank1", first_out).await;
        let second = registry.register("tank1", second_out).await;

        assert!(first_peer.is_closed());
        assert!(!second_peer.is_closed());
        assert_eq!(registry.len(), 1);
        let current = registry.lookup("tank1").expect("tank1 registered");
        assert!(Arc::ptr_eq(&current, &second));
        assert_ne!(first.connection_id(), second.connection_id());
    }

    /// Records which connection the registry held when it was closed.
    struct RecordingOutbound {
        registry: Weak<DeviceRegistry>,
        current_at_close: parking_lot::Mutex<Option<Uuid>>,
    }

    #[async_trait::async_trait]
    impl Outbound for RecordingOutbound {
        async fn send_text(&self, _text: String) -> Result<(), TransportError> {
            Ok(())
        }

        async fn close(&self) {
            let current = self
                .registry
                .upgrade()
                .and_then(|registry| registry.lookup("tank1"))
                .map(|connection| connection.connection_id());
            *self.current_at_close.lock() = current;
        }
    }

    #[test_timeout::tokio_timeout_test]
    async fn previous_connection_is_closed_before_replacement() {
        let registry = Arc::new(DeviceRegistry::new());
        let recorder = Arc::new(RecordingOutbound {
            registry: Arc::downgrade(&registry),
            current_at_close: parking_lot::Mutex::new(None),
        });
        let first = registry.register("tank1", recorder.clone()).await;

        let (second_out, _second_in, _second_peer) = memory::pair();
        let second = registry.register("tank1", second_out).await;

        assert_eq!(*recorder.current_at_close.lock(), Some(first.connection_id()));
        let current = registry.lookup("tank1").expect("tank1 registered");
        assert!(Arc::ptr_eq(&current, &second));
    }

    #[test_timeout::tokio_timeout_test]
    async fn deregister_ignores_displaced_connection() {
        let registry = DeviceRegistry::new();
        let (first_out, _first_in, _first_peer) = memory::pair();
        let (second_out, _second_in, _second_peer) = memory::pair();

        let first = registry.register("tank1", first_out).await;
        let second = registry.register("tank1", second_out).await;

        assert!(!registry.deregister("tank1", &first));
        assert!(registry.is_online("tank1"));
        assert!(registry.deregister("tank1", &second));
        assert!(registry.lookup("tank1").is_none());
        assert!(registry.is_empty());
    }

    #[test_timeout::tokio_timeout_test]
    async fn online_ids_are_sorted() {
        let registry = DeviceRegistry::new();
        for id in ["tank_b", "tank_a", "tank_c"] {
            let (out, _in, _peer) = memory::pair();
            registry.register(id, out).await;
        }
        assert_eq!(registry.online_ids(), vec!["tank_a", "tank_b", "tank_c"]);
    }

    #[test_timeout::tokio_timeout_test]
    async fn concurrent_sends_arrive_as_whole_frames() {
        let registry = Arc::new(DeviceRegistry::new());
        let (out, _in, mut peer) = memory::pair();
        let connection = registry.register("tank1", out).await;

        let mut tasks = Vec::new();
        for i in 0..16 {
            let connection = connection.clone();
            tasks.push(tokio::spawn(async move {
                connection
                    .send_serialized(format!("{{\"command\":\"stop\",\"leftSpeed\":{i}}}"))
                    .await
            }));
        }
        for task in tasks {
            task.await.expect("join").expect("send");
        }

        let mut seen = Vec::new();
        for _ in 0..16 {
            let frame = peer.next_json().await;
            seen.push(frame["leftSpeed"].as_i64().expect("speed"));
        }
        seen.sort();
        assert_eq!(seen, (0..16).collect::<Vec<_>>());
    }
}
