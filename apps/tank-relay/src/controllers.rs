use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::connection::Outbound;
use crate::error::TransportError;

/// One connected controller UI and the tank it is watching.
pub struct ControllerSession {
    id: Uuid,
    outbound: Arc<dyn Outbound>,
    selected: RwLock<Option<String>>,
}

impl ControllerSession {
    pub fn new(outbound: Arc<dyn Outbound>) -> Self {
        Self {
            id: Uuid::new_v4(),
            outbound,
            selected: RwLock::new(None),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn selected_device_id(&self) -> Option<String> {
        self.selected.read().clone()
    }

    pub fn is_watching(&self, device_id: &str) -> bool {
        self.selected.read().as_deref() == Some(device_id)
    }

    pub async fn deliver(&self, text: String) -> Result<(), TransportError> {
        self.outbound.send_text(text).await
    }

    pub async fn close(&self) {
        self.outbound.close().await;
    }
}

/// All connected controller sessions, keyed by session id.
#[derive(Default)]
pub struct ControllerSet {
    sessions: RwLock<HashMap<Uuid, Arc<ControllerSession>>>,
}

impl ControllerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, session: Arc<ControllerSession>) {
        self.sessions.write().insert(session.id, session);
    }

    pub fn remove(&self, session_id: Uuid) -> bool {
        self.sessions.write().remove(&session_id).is_some()
    }

    pub fn contains(&self, session_id: Uuid) -> bool {
        self.sessions.read().contains_key(&session_id)
    }

    /// Point `session` at `device_id`. Touches no other session.
    pub fn select(&self, session: &ControllerSession, device_id: Option<String>) {
        *session.selected.write() = device_id;
    }

    /// Sessions currently watching `device_id`, cloned out from under the
    /// set lock so delivery can proceed without holding it.
    pub fn snapshot_subscribed(&self, device_id: &str) -> Vec<Arc<ControllerSession>> {
        self.sessions
            .read()
            .values()
            .filter(|session| session.is_watching(device_id))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}
