//! Device command protocol types
//!
//! Requests are published on a host's command topic; devices answer on the
//! response (or ping) topic with the same `req_id`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::fleet::ConfigVersion;

/// Protocol version spoken by devices
pub const COMMAND_VERSION_HIGH: i32 = 1;
pub const COMMAND_VERSION_LOW: i32 = 4;

/// Command identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum CommandId {
    No = 0,
    /// Restart the device service
    Restart = 1,
    /// Reboot the device
    Reboot = 2,
    /// Set individual values by path
    SetSettings = 3,
    /// Return the whole configuration (secrets masked)
    GetSettings = 4,
    SetConfiguration = 5,
    Remove = 6,
    GetBackupsList = 7,
    RestoreFromBackup = 8,
    Ping = 9,
    SetLlmPrompt = 10,
    MqttRequest = 11,
}

impl TryFrom<i32> for CommandId {
    type Error = String;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::No,
            1 => Self::Restart,
            2 => Self::Reboot,
            3 => Self::SetSettings,
            4 => Self::GetSettings,
            5 => Self::SetConfiguration,
            6 => Self::Remove,
            7 => Self::GetBackupsList,
            8 => Self::RestoreFromBackup,
            9 => Self::Ping,
            10 => Self::SetLlmPrompt,
            11 => Self::MqttRequest,
            other => return Err(format!("unknown command id {}", other)),
        })
    }
}

impl From<CommandId> for i32 {
    fn from(id: CommandId) -> Self {
        id as i32
    }
}

/// Error codes carried in responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "i32", into = "i32")]
pub enum DeviceErrorCode {
    NoError,
    InternalError,
    NotEnoughMemory,
    InvalidSettingsVersion,
    InvalidCommandVersion,
    BadCommandId,
    CanNotRestoreFromBackup,
    Unknown(i32),
}

impl From<i32> for DeviceErrorCode {
    fn from(code: i32) -> Self {
        match code {
            0 => Self::NoError,
            1 => Self::InternalError,
            2 => Self::NotEnoughMemory,
            3 => Self::InvalidSettingsVersion,
            4 => Self::InvalidCommandVersion,
            5 => Self::BadCommandId,
            6 => Self::CanNotRestoreFromBackup,
            other => Self::Unknown(other),
        }
    }
}

impl From<DeviceErrorCode> for i32 {
    fn from(code: DeviceErrorCode) -> Self {
        match code {
            DeviceErrorCode::NoError => 0,
            DeviceErrorCode::InternalError => 1,
            DeviceErrorCode::NotEnoughMemory => 2,
            DeviceErrorCode::InvalidSettingsVersion => 3,
            DeviceErrorCode::InvalidCommandVersion => 4,
            DeviceErrorCode::BadCommandId => 5,
            DeviceErrorCode::CanNotRestoreFromBackup => 6,
            DeviceErrorCode::Unknown(other) => other,
        }
    }
}

impl fmt::Display for DeviceErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::NoError => "no error",
            Self::InternalError => "internal error",
            Self::NotEnoughMemory => "not enough memory",
            Self::InvalidSettingsVersion => "invalid settings version",
            Self::InvalidCommandVersion => "invalid command version",
            Self::BadCommandId => "bad command id",
            Self::CanNotRestoreFromBackup => "can not restore from backup",
            Self::Unknown(code) => return write!(f, "unknown error {}", code),
        };
        f.write_str(text)
    }
}

/// One `path = value` edit for SetSettings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemValue {
    pub path: String,
    pub value: Value,
}

impl ItemValue {
    pub fn new(path: impl Into<String>, value: Value) -> Self {
        Self {
            path: path.into(),
            value,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandHeader {
    pub command_id: CommandId,
    pub device_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandPayload {
    pub values: Vec<ItemValue>,
}

/// Request envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandRequest {
    pub command_version_high: i32,
    pub command_version_low: i32,
    pub req_id: u64,
    /// Milliseconds since the Unix epoch
    pub timestamp: u64,
    pub command: CommandHeader,
    pub payload: CommandPayload,
}

impl CommandRequest {
    pub fn new(req_id: u64, command_id: CommandId, device_id: &str, values: Vec<ItemValue>) -> Self {
        Self {
            command_version_high: COMMAND_VERSION_HIGH,
            command_version_low: COMMAND_VERSION_LOW,
            req_id,
            timestamp: u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0),
            command: CommandHeader {
                command_id,
                device_id: device_id.to_string(),
            },
            payload: CommandPayload { values },
        }
    }
}

/// Response as received from a device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResponse {
    /// Device timestamp, milliseconds since the Unix epoch
    pub ts: i64,
    pub req_id: u64,
    pub command_id: i32,
    pub device_id: String,
    pub error_code: DeviceErrorCode,
    pub error_string: String,
}

impl CommandResponse {
    pub fn is_ok(&self) -> bool {
        self.error_code == DeviceErrorCode::NoError
    }
}

/// Last configuration a host published on its settings topic
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportedSettings {
    pub host_id: String,
    pub version: ConfigVersion,
    pub received_at: DateTime<Utc>,
    pub document: Value,
    /// Set when the document could not be read as a host
    pub parse_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_command_id_wire_form() {
        assert_eq!(serde_json::to_value(CommandId::Ping).unwrap(), json!(9));
        let id: CommandId = serde_json::from_value(json!(4)).unwrap();
        assert_eq!(id, CommandId::GetSettings);
        assert!(serde_json::from_value::<CommandId>(json!(42)).is_err());
    }

    #[test]
    fn test_error_code_unknown_kept() {
        assert_eq!(DeviceErrorCode::from(6), DeviceErrorCode::CanNotRestoreFromBackup);
        assert_eq!(i32::from(DeviceErrorCode::from(77)), 77);
        assert_eq!(DeviceErrorCode::from(77).to_string(), "unknown error 77");
    }

    #[test]
    fn test_request_envelope_layout() {
        let req = CommandRequest::new(
            17,
            CommandId::SetSettings,
            "orin-01",
            vec![ItemValue::new("settings/name", json!("Line 2"))],
        );
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["command_version_high"], 1);
        assert_eq!(value["command_version_low"], 4);
        assert_eq!(value["req_id"], 17);
        assert_eq!(value["command"]["command_id"], 3);
        assert_eq!(value["command"]["device_id"], "orin-01");
        assert_eq!(value["payload"]["values"][0]["path"], "settings/name");
    }
}
