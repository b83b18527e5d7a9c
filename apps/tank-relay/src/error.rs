use thiserror::Error;

/// Failure on a single connection's transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection closed")]
    Closed,
    #[error("websocket error: {0}")]
    WebSocket(String),
}

/// Everything that can go wrong while relaying one message.
///
/// None of these are fatal to the process: each is either reported back to
/// the peer that caused it or resolved by ending that peer's session.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("invalid json: {0}")]
    InvalidJson(String),
    #[error("malformed message: {0}")]
    MalformedMessage(String),
    #[error("no tank selected")]
    NoDeviceSelected,
    #[error("tank {0} is offline")]
    DeviceOffline(String),
    #[error("send failed: {0}")]
    SendFailed(String),
    #[error("peer disconnected")]
    PeerDisconnected,
}

impl RelayError {
    /// Error code carried in the `error` field of controller replies.
    pub fn code(&self) -> &'static str {
        match self {
            RelayError::InvalidJson(_) => "invalid_json",
            RelayError::MalformedMessage(_) => "invalid_message",
            RelayError::NoDeviceSelected => "no_tank_selected",
            RelayError::DeviceOffline(_) => "tank_offline",
            RelayError::SendFailed(_) => "send_failed",
            RelayError::PeerDisconnected => "peer_disconnected",
        }
    }
}
