//! Transport-side types for the trainer link.

use serde::{Deserialize, Serialize};
use std::time::Instant;
use thiserror::Error;

/// Connection state of the trainer link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    /// Not connected
    #[default]
    Disconnected,
    /// Connection in progress
    Connecting,
    /// Active connection
    Connected,
    /// Connection attempt failed; re-enterable via connect()
    Error,
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkState::Disconnected => write!(f, "Disconnected"),
            LinkState::Connecting => write!(f, "Connecting..."),
            LinkState::Connected => write!(f, "Connected"),
            LinkState::Error => write!(f, "Error"),
        }
    }
}

/// Control protocol chosen at connection time.
///
/// Selection happens once per connection and never changes mid-session, even
/// on write failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlProtocol {
    /// No control characteristic found; metrics only, no ERG capability
    #[default]
    None,
    /// Standard trainer-control profile (FTMS control point)
    Standard,
    /// Manufacturer extension characteristic
    Vendor,
}

impl std::fmt::Display for ControlProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControlProtocol::None => write!(f, "none"),
            ControlProtocol::Standard => write!(f, "standard"),
            ControlProtocol::Vendor => write!(f, "vendor"),
        }
    }
}

/// Capability profile derived during connection. Immutable until reconnect.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrainerCapabilities {
    /// Standard power-control service with a control point characteristic
    pub has_control_point: bool,
    /// Vendor control characteristic
    pub has_vendor_control: bool,
    /// Standalone power-measurement service
    pub has_power_meter: bool,
    /// Heart-rate service
    pub has_heart_rate: bool,
    /// Chosen control protocol
    pub protocol: ControlProtocol,
}

impl TrainerCapabilities {
    /// Whether the trainer can be driven in ERG mode at all.
    pub fn supports_erg(&self) -> bool {
        self.protocol != ControlProtocol::None
    }
}

/// Live metric snapshot, written only by the notification decode path.
///
/// Every field is independently optional: absence means "not reported by
/// this device", never zero.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrainerMetrics {
    /// Instantaneous power in watts
    pub power_watts: Option<u16>,
    /// Cadence in RPM
    pub cadence_rpm: Option<u8>,
    /// Speed in km/h
    pub speed_kmh: Option<f32>,
    /// Heart rate in BPM
    pub heart_rate_bpm: Option<u8>,
    /// When any field was last updated
    pub updated_at: Option<Instant>,
}

impl TrainerMetrics {
    /// Whether a real sensor is reporting power or cadence right now.
    ///
    /// This is the gate for autopause: a session with neither field ever
    /// reported must not autopause.
    pub fn reports_effort(&self) -> bool {
        self.power_watts.is_some() || self.cadence_rpm.is_some()
    }
}

/// A trainer or sensor found during discovery.
#[derive(Debug, Clone)]
pub struct DiscoveredTrainer {
    /// BLE device address/identifier
    pub device_id: String,
    /// Advertised name
    pub name: String,
    /// Signal strength (RSSI)
    pub signal_strength: Option<i16>,
    /// Whether the advertisement carried a trainer-control service
    pub controllable: bool,
}

/// Events from the trainer link.
#[derive(Debug, Clone)]
pub enum TrainerEvent {
    /// A candidate device was discovered during scanning
    Discovered(DiscoveredTrainer),
    /// Link state changed
    StateChanged(LinkState),
    /// Capability profile computed after service discovery
    CapabilitiesResolved(TrainerCapabilities),
    /// Metrics snapshot updated from a notification
    MetricsUpdated(TrainerMetrics),
}

/// Configuration for the trainer link.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Discovery scan duration in seconds
    pub discovery_timeout_secs: u64,
    /// Connection attempt timeout in seconds
    pub connection_timeout_secs: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            discovery_timeout_secs: 10,
            connection_timeout_secs: 10,
        }
    }
}

/// Errors from the trainer link.
///
/// Every wire write can fail; callers treat a failure as "command not
/// applied" and may retry at the next scheduler tick.
#[derive(Debug, Error)]
pub enum TrainerError {
    /// BLE adapter not found or unavailable
    #[error("Bluetooth adapter not found")]
    AdapterNotFound,

    /// Failed to start BLE scanning
    #[error("Failed to start scanning: {0}")]
    ScanFailed(String),

    /// Device not found with given ID
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// Connection to the device failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// No active connection for the requested operation
    #[error("Not connected")]
    NotConnected,

    /// Failed to subscribe to notifications
    #[error("Failed to subscribe to notifications: {0}")]
    SubscriptionFailed(String),

    /// Control characteristic write rejected
    #[error("Write failed: {0}")]
    WriteFailed(String),

    /// No control protocol available on this trainer
    #[error("Trainer has no control capability")]
    Unsupported,

    /// Generic BLE error
    #[error("BLE error: {0}")]
    BleError(String),
}
