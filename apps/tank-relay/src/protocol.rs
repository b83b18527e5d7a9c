use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::RelayError;
use crate::normalize::CommandKind;

/// Frames sent from the relay to controller UIs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// Greeting with the tanks online at connect time
    Hello { tanks_online: Vec<String> },
    /// Reply to `select`
    Selected { tank_id: Option<String>, online: bool },
    /// A command reached the tank socket
    Ack { tank_id: String, command: CommandKind },
    Error {
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tank_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        received: Option<Value>,
    },
    TankOnline { tank_id: String },
    TankOffline { tank_id: String },
    /// Device output relayed to watchers
    Status {
        tank_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        raw: Option<String>,
    },
}

impl ServerMessage {
    pub fn error(error: &RelayError) -> Self {
        let (tank_id, detail) = match error {
            RelayError::DeviceOffline(tank_id) => (Some(tank_id.clone()), None),
            RelayError::SendFailed(detail) | RelayError::MalformedMessage(detail) => {
                (None, Some(detail.clone()))
            }
            RelayError::InvalidJson(_)
            | RelayError::NoDeviceSelected
            | RelayError::PeerDisconnected => (None, None),
        };
        ServerMessage::Error {
            error: error.code().to_string(),
            tank_id,
            detail,
            received: None,
        }
    }

    pub fn unknown_type(received: Value) -> Self {
        ServerMessage::Error {
            error: "unknown_type".to_string(),
            tank_id: None,
            detail: None,
            received: Some(received),
        }
    }
}

/// A parsed controller frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerRequest {
    Select {
        tank_id: Option<String>,
    },
    Command {
        tank_id: Option<String>,
        action: String,
        left_speed: Option<Value>,
        right_speed: Option<Value>,
    },
    /// Any frame whose `type` is missing or not understood; carries the
    /// offending `type` value (or null).
    Unknown {
        received: Value,
    },
}

impl ControllerRequest {
    pub fn parse(text: &str) -> Result<Self, RelayError> {
        let payload: Value =
            serde_json::from_str(text).map_err(|e| RelayError::InvalidJson(e.to_string()))?;
        let Some(object) = payload.as_object() else {
            return Ok(ControllerRequest::Unknown {
                received: Value::Null,
            });
        };

        match object.get("type").and_then(Value::as_str) {
            Some("select") => Ok(ControllerRequest::Select {
                tank_id: tank_id_field(object)?,
            }),
            Some("cmd") => Ok(ControllerRequest::Command {
                tank_id: tank_id_field(object)?.filter(|id| !id.is_empty()),
                action: object
                    .get("action")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                left_speed: object.get("leftSpeed").cloned(),
                right_speed: object.get("rightSpeed").cloned(),
            }),
            _ => Ok(ControllerRequest::Unknown {
                received: object.get("type").cloned().unwrap_or(Value::Null),
            }),
        }
    }
}

fn tank_id_field(object: &Map<String, Value>) -> Result<Option<String>, RelayError> {
    match object.get("tankId") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(id)) => Ok(Some(id.clone())),
        Some(other) => Err(RelayError::MalformedMessage(format!(
            "tankId must be a string, got {other}"
        ))),
    }
}

/// Shape one device frame for controllers watching `tank_id`.
///
/// A JSON object already typed `status` is relayed as-is with `tankId`
/// stamped on; other JSON is wrapped under `data`, and anything that is not
/// JSON at all is wrapped under `raw`.
pub fn device_status_frame(tank_id: &str, text: &str) -> Value {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(mut object))
            if object.get("type").and_then(Value::as_str) == Some("status") =>
        {
            object.insert("tankId".to_string(), Value::String(tank_id.to_string()));
            Value::Object(object)
        }
        Ok(data) => json!({"type": "status", "tankId": tank_id, "data": data}),
        Err(_) => json!({"type": "status", "tankId": tank_id, "raw": text}),
    }
}
