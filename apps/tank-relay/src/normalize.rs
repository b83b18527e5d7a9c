use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RelayError;

/// Command vocabulary understood by the tank firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandKind {
    Forward,
    Backward,
    Left,
    Right,
    Stop,
    SetSpeed,
}

impl CommandKind {
    /// Map a controller action onto the device vocabulary. Unknown actions
    /// degrade to `Stop` so an unrecognized intent never moves a tank.
    pub fn from_action(action: &str) -> Self {
        match action.to_ascii_lowercase().as_str() {
            "forward" => CommandKind::Forward,
            "backward" => CommandKind::Backward,
            "left" => CommandKind::Left,
            "right" => CommandKind::Right,
            "speed" | "setspeed" => CommandKind::SetSpeed,
            _ => CommandKind::Stop,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::Forward => "forward",
            CommandKind::Backward => "backward",
            CommandKind::Left => "left",
            CommandKind::Right => "right",
            CommandKind::Stop => "stop",
            CommandKind::SetSpeed => "setspeed",
        }
    }
}

/// A command as it goes out on the device socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    pub command: CommandKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub left_speed: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub right_speed: Option<i64>,
}

impl Command {
    pub fn new(command: CommandKind) -> Self {
        Self {
            command,
            left_speed: None,
            right_speed: None,
        }
    }
}

/// Build the outbound command for a controller action and its optional
/// speed values.
///
/// `setspeed` always carries both speeds, falling back to 0 so a tank never
/// keeps a stale speed. Other commands carry a speed only when one was
/// given; a given speed that is not an integer rejects the command.
pub fn normalize(
    action: &str,
    left_speed: Option<&Value>,
    right_speed: Option<&Value>,
) -> Result<Command, RelayError> {
    let kind = CommandKind::from_action(action);
    let left_speed = left_speed.filter(|value| !value.is_null());
    let right_speed = right_speed.filter(|value| !value.is_null());

    let mut command = Command::new(kind);
    if kind == CommandKind::SetSpeed {
        command.left_speed = Some(left_speed.and_then(coerce_speed).unwrap_or(0));
        command.right_speed = Some(right_speed.and_then(coerce_speed).unwrap_or(0));
    } else {
        command.left_speed = left_speed.map(|v| required_speed("leftSpeed", v)).transpose()?;
        command.right_speed = right_speed
            .map(|v| required_speed("rightSpeed", v))
            .transpose()?;
    }
    Ok(command)
}

fn required_speed(field: &str, value: &Value) -> Result<i64, RelayError> {
    coerce_speed(value).ok_or_else(|| {
        RelayError::MalformedMessage(format!("{field} is not an integer: {value}"))
    })
}

/// Integer coercion for loosely typed UI values: integers pass through,
/// finite floats truncate toward zero, booleans become 1/0, and numeric
/// strings are parsed after trimming.
fn coerce_speed(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number.as_i64().or_else(|| {
            number
                .as_f64()
                .filter(|f| f.is_finite() && *f >= i64::MIN as f64 && *f < i64::MAX as f64)
                .map(|f| f.trunc() as i64)
        }),
        Value::Bool(flag) => Some(i64::from(*flag)),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}
