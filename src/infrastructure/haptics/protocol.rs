//! Endpoint wire messages
//!
//! Newline-delimited JSON over a local socket. Every client request carries an
//! `id`; the endpoint answers with `Ok`, `Error` or `ServerInfo` echoing it.
//! Device notifications are unsolicited and carry no id.

use crate::domain::error::TransportError;
use crate::domain::models::RemoteDevice;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Bumped when message shapes change incompatibly
pub const PROTOCOL_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    RequestServerInfo {
        id: u32,
        client_name: String,
        protocol_version: u32,
    },
    StartScanning {
        id: u32,
    },
    StopScanning {
        id: u32,
    },
    Vibrate {
        id: u32,
        device_index: u32,
        intensity: f64,
    },
    Stop {
        id: u32,
        device_index: u32,
    },
    Disconnect {
        id: u32,
    },
}

impl ClientMessage {
    pub fn id(&self) -> u32 {
        match self {
            Self::RequestServerInfo { id, .. }
            | Self::StartScanning { id }
            | Self::StopScanning { id }
            | Self::Vibrate { id, .. }
            | Self::Stop { id, .. }
            | Self::Disconnect { id } => *id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    ServerInfo { id: u32, server_name: String },
    Ok { id: u32 },
    Error { id: u32, message: String },
    DeviceAdded { device: RemoteDevice },
    DeviceRemoved { device_index: u32 },
    ScanningFinished,
}

impl ServerMessage {
    /// Request id this message answers, if any
    pub fn reply_to(&self) -> Option<u32> {
        match self {
            Self::ServerInfo { id, .. } | Self::Ok { id } | Self::Error { id, .. } => Some(*id),
            _ => None,
        }
    }
}

/// Serialize a message as one line, including the trailing newline.
pub fn encode_line<T: Serialize>(message: &T) -> Result<String, TransportError> {
    Ok(serde_json::to_string(message)? + "\n")
}

pub fn decode_line<T: DeserializeOwned>(line: &str) -> Result<T, TransportError> {
    Ok(serde_json::from_str(line.trim_end())?)
}
