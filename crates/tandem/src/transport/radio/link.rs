use serde::{Deserialize, Serialize};

/// Discovery payload a host publishes while advertising.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub game_id: String,
    pub session_id: String,
    pub host_name: String,
    pub host_peer_id: String,
}

impl SessionInfo {
    pub fn matches(&self, game_id: &str, session_id: Option<&str>) -> bool {
        self.game_id == game_id && session_id.is_none_or(|id| id == self.session_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct LinkError(pub String);

impl LinkError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Completion and notification events raised by a radio driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// A scan result. Drivers may report the same host more than once.
    DeviceDiscovered { device_id: String, info: SessionInfo },
    /// Our outbound connect finished.
    Connected { device_id: String },
    ConnectFailed { device_id: String, reason: String },
    /// A remote central connected to our advertisement.
    CentralConnected { device_id: String },
    MtuChanged { device_id: String, mtu: usize },
    Disconnected { device_id: String },
    Data { device_id: String, bytes: Vec<u8> },
}

/// Driver boundary for a short-range radio.
///
/// Every call returns immediately. Anything that completes later (connects,
/// MTU negotiation, inbound data) is reported through [`RadioLink::poll_event`].
pub trait RadioLink {
    fn is_powered_on(&self) -> bool;

    fn start_advertising(&mut self, info: &SessionInfo) -> Result<(), LinkError>;

    fn stop_advertising(&mut self);

    fn start_scan(&mut self) -> Result<(), LinkError>;

    fn stop_scan(&mut self);

    fn connect(&mut self, device_id: &str) -> Result<(), LinkError>;

    fn request_mtu(&mut self, device_id: &str, mtu: usize);

    /// Writes one framed chunk. Must not exceed the negotiated MTU payload.
    fn write(&mut self, device_id: &str, chunk: &[u8]) -> Result<(), LinkError>;

    fn disconnect(&mut self, device_id: &str);

    fn poll_event(&mut self) -> Option<LinkEvent>;
}
