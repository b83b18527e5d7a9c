use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::connection::{Inbound, Outbound};
use crate::controllers::ControllerSession;
use crate::error::RelayError;
use crate::normalize::normalize;
use crate::protocol::{ControllerRequest, ServerMessage};
use crate::relay::Relay;

/// Drive one controller UI connection until it closes. Malformed input is
/// answered with an error frame and never ends the session.
pub async fn run_controller_session<I: Inbound>(
    relay: Relay,
    outbound: Arc<dyn Outbound>,
    mut inbound: I,
) {
    let session = Arc::new(ControllerSession::new(outbound));
    relay.controllers().add(session.clone());
    info!(
        session = %session.id(),
        controllers = relay.controllers().len(),
        "controller connected"
    );

    let hello = ServerMessage::Hello {
        tanks_online: relay.list_online_device_ids(),
    };
    if let Err(e) = reply(&session, &hello).await {
        debug!(session = %session.id(), "greeting not delivered: {}", e);
    }

    loop {
        let text = match inbound.recv().await {
            Ok(Some(text)) => text,
            Ok(None) => break,
            Err(e) => {
                warn!(session = %session.id(), "controller read failed: {}", e);
                break;
            }
        };

        debug!(session = %session.id(), "frame from controller: {}", text);
        let response = handle_controller_frame(&relay, &session, &text).await;
        if let Err(e) = reply(&session, &response).await {
            debug!(session = %session.id(), "reply not delivered: {}", e);
            break;
        }
    }

    relay.controllers().remove(session.id());
    session.close().await;
    info!(session = %session.id(), "controller disconnected");
}

/// Work out the reply for one controller frame, forwarding commands to their
/// tank on the way.
pub async fn handle_controller_frame(
    relay: &Relay,
    session: &ControllerSession,
    text: &str,
) -> ServerMessage {
    let request = match ControllerRequest::parse(text) {
        Ok(request) => request,
        Err(e) => {
            debug!(session = %session.id(), "rejecting frame: {}", e);
            return ServerMessage::error(&e);
        }
    };

    match request {
        ControllerRequest::Select { tank_id } => {
            let online = tank_id
                .as_deref()
                .is_some_and(|id| relay.devices().is_online(id));
            relay.controllers().select(session, tank_id.clone());
            debug!(session = %session.id(), tank_id = ?tank_id, online, "controller selected tank");
            ServerMessage::Selected { tank_id, online }
        }
        ControllerRequest::Command {
            tank_id,
            action,
            left_speed,
            right_speed,
        } => match forward_command(
            relay,
            session,
            tank_id,
            &action,
            left_speed.as_ref(),
            right_speed.as_ref(),
        )
        .await
        {
            Ok(message) => message,
            Err(e) => {
                if matches!(e, RelayError::SendFailed(_)) {
                    warn!(session = %session.id(), "command not delivered: {}", e);
                }
                ServerMessage::error(&e)
            }
        },
        ControllerRequest::Unknown { received } => ServerMessage::unknown_type(received),
    }
}

async fn forward_command(
    relay: &Relay,
    session: &ControllerSession,
    tank_id: Option<String>,
    action: &str,
    left_speed: Option<&serde_json::Value>,
    right_speed: Option<&serde_json::Value>,
) -> Result<ServerMessage, RelayError> {
    let tank_id = tank_id
        .or_else(|| session.selected_device_id())
        .filter(|id| !id.is_empty())
        .ok_or(RelayError::NoDeviceSelected)?;
    if !relay.devices().is_online(&tank_id) {
        return Err(RelayError::DeviceOffline(tank_id));
    }

    let command = normalize(action, left_speed, right_speed)?;
    relay.send_to_device(&tank_id, &command).await?;
    debug!(
        session = %session.id(),
        tank_id = %tank_id,
        command = command.command.as_str(),
        "command forwarded"
    );
    Ok(ServerMessage::Ack {
        tank_id,
        command: command.command,
    })
}

async fn reply(session: &ControllerSession, message: &ServerMessage) -> Result<(), RelayError> {
    let text = serde_json::to_string(message)
        .map_err(|e| RelayError::MalformedMessage(e.to_string()))?;
    session
        .deliver(text)
        .await
        .map_err(|_| RelayError::PeerDisconnected)
}
