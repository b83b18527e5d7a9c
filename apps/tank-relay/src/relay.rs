use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::connection::Outbound;
use crate::controllers::ControllerSet;
use crate::error::RelayError;
use crate::normalize::Command;
use crate::protocol::ServerMessage;
use crate::registry::{DeviceConnection, DeviceRegistry};

/// Outcome of one fan-out.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub pruned: usize,
}

/// Shared relay state handed to every session task.
#[derive(Clone, Default)]
pub struct Relay {
    devices: Arc<DeviceRegistry>,
    controllers: Arc<ControllerSet>,
}

impl Relay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn devices(&self) -> &DeviceRegistry {
        &self.devices
    }

    pub fn controllers(&self) -> &ControllerSet {
        &self.controllers
    }

    pub fn list_online_device_ids(&self) -> Vec<String> {
        self.devices.online_ids()
    }

    /// Deliver `message` to every controller watching `device_id`.
    ///
    /// Subscribers are snapshotted first, then delivered to concurrently;
    /// any session whose delivery fails is treated as gone and removed from
    /// the controller set once delivery has finished.
    pub async fn broadcast<M: Serialize>(&self, device_id: &str, message: &M) -> BroadcastReport {
        let text = match serde_json::to_string(message) {
            Ok(text) => text,
            Err(e) => {
                warn!(tank_id = %device_id, "failed to encode broadcast: {}", e);
                return BroadcastReport::default();
            }
        };

        let subscribers = self.controllers.snapshot_subscribed(device_id);
        if subscribers.is_empty() {
            return BroadcastReport::default();
        }

        let outcomes = join_all(subscribers.iter().map(|session| {
            let text = text.clone();
            async move { (session.id(), session.deliver(text).await) }
        }))
        .await;

        let mut report = BroadcastReport::default();
        for (session_id, outcome) in outcomes {
            match outcome {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(
                        tank_id = %device_id,
                        session = %session_id,
                        "dropping controller after failed delivery: {}",
                        e
                    );
                    if self.controllers.remove(session_id) {
                        report.pruned += 1;
                    }
                }
            }
        }
        debug!(
            tank_id = %device_id,
            delivered = report.delivered,
            pruned = report.pruned,
            "broadcast complete"
        );
        report
    }

    /// Forward one command to the device's socket, serialized against any
    /// other sender targeting the same device.
    pub async fn send_to_device(&self, device_id: &str, command: &Command) -> Result<(), RelayError> {
        let connection = self
            .devices
            .lookup(device_id)
            .ok_or_else(|| RelayError::DeviceOffline(device_id.to_string()))?;
        let text =
            serde_json::to_string(command).map_err(|e| RelayError::SendFailed(e.to_string()))?;
        connection
            .send_serialized(text)
            .await
            .map_err(|e| RelayError::SendFailed(e.to_string()))
    }

    /// Register a device connection and announce it to watchers.
    pub async fn connect_device(
        &self,
        device_id: &str,
        outbound: Arc<dyn Outbound>,
    ) -> Arc<DeviceConnection> {
        let connection = self.devices.register(device_id, outbound).await;
        info!(
            tank_id = %device_id,
            connection = %connection.connection_id(),
            online = self.devices.len(),
            "tank online"
        );
        self.broadcast(
            device_id,
            &ServerMessage::TankOnline {
                tank_id: device_id.to_string(),
            },
        )
        .await;
        connection
    }

    /// Drop a device connection. Watchers hear `tank_offline` only when this
    /// connection was still the registered one; a connection displaced by a
    /// reconnect leaves quietly.
    pub async fn disconnect_device(&self, connection: &Arc<DeviceConnection>) {
        let device_id = connection.device_id();
        if self.devices.deregister(device_id, connection) {
            info!(
                tank_id = %device_id,
                connection = %connection.connection_id(),
                "tank offline"
            );
            self.announce_offline(device_id).await;
        }
        connection.close().await;
    }

    /// Broadcast `tank_offline` unless a newer connection registered since
    /// the deregister, in which case its `tank_online` is the latest word.
    async fn announce_offline(&self, device_id: &str) {
        if self.devices.is_online(device_id) {
            debug!(tank_id = %device_id, "tank back online, skipping offline notice");
            return;
        }
        self.broadcast(
            device_id,
            &ServerMessage::TankOffline {
                tank_id: device_id.to_string(),
            },
        )
        .await;
    }
}
