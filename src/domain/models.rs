use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle of the link to the haptic control endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// Which transport the controller instantiates on `connect`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectorChoice {
    /// In-process simulated endpoint
    Embedded,
    /// Remote endpoint reached over a local socket
    #[default]
    External,
}

impl fmt::Display for ConnectorChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Embedded => write!(f, "embedded"),
            Self::External => write!(f, "external"),
        }
    }
}

impl FromStr for ConnectorChoice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "embedded" => Ok(Self::Embedded),
            "external" => Ok(Self::External),
            other => Err(format!(
                "unknown connector '{}' (expected 'embedded' or 'external')",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeviceCapabilities {
    #[serde(default)]
    pub vibrate: bool,
    #[serde(default)]
    pub rotate: bool,
    #[serde(default)]
    pub linear: bool,
}

impl DeviceCapabilities {
    pub fn vibrator() -> Self {
        Self {
            vibrate: true,
            ..Default::default()
        }
    }
}

/// A device announced by the endpoint. `index` is stable for the session lifetime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteDevice {
    pub index: u32,
    pub name: String,
    #[serde(default)]
    pub capabilities: DeviceCapabilities,
}

impl RemoteDevice {
    pub fn new(index: u32, name: impl Into<String>, capabilities: DeviceCapabilities) -> Self {
        Self {
            index,
            name: name.into(),
            capabilities,
        }
    }

    pub fn supports_vibration(&self) -> bool {
        self.capabilities.vibrate
    }
}

/// Requests handled by the haptic service worker, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum HapticCommand {
    /// Connect with the connector stored in settings
    Connect,
    Disconnect,
    StartScan,
    StopScan,
    SelectDevice(Option<u32>),
    Vibrate(Option<f64>),
    StopVibration,
    SetEnabled { enabled: bool, start_now: bool },
    SetModifier(f64),
    SetConnector(ConnectorChoice),
}

/// Notifications published to the host application.
#[derive(Debug, Clone)]
pub enum AppEvent {
    ConnectionStatus(ConnectionState),
    DevicesChanged,
    ScanningChanged(bool),
    LogMessage(StatusMessage),
}

#[derive(Debug, Clone)]
pub struct StatusMessage {
    pub message: String,
    pub severity: MessageSeverity,
}

impl StatusMessage {
    pub fn new(message: impl Into<String>, severity: MessageSeverity) -> Self {
        Self {
            message: message.into(),
            severity,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSeverity {
    Info,
    Success,
    Warning,
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connector_choice_parses_case_insensitively() {
        assert_eq!(
            "Embedded".parse::<ConnectorChoice>(),
            Ok(ConnectorChoice::Embedded)
        );
        assert_eq!(
            "EXTERNAL".parse::<ConnectorChoice>(),
            Ok(ConnectorChoice::External)
        );
        assert!("websocket".parse::<ConnectorChoice>().is_err());
    }

    #[test]
    fn connector_choice_round_trips_through_display() {
        for choice in [ConnectorChoice::Embedded, ConnectorChoice::External] {
            assert_eq!(choice.to_string().parse::<ConnectorChoice>(), Ok(choice));
        }
        assert_eq!(ConnectorChoice::default(), ConnectorChoice::External);
    }
}
