//! Sensor connectivity: wire codec and BLE trainer link.

pub mod codec;
pub mod trainer;
pub mod types;

pub use trainer::TrainerLink;
pub use types::{
    ControlProtocol, DiscoveredTrainer, LinkConfig, LinkState, TrainerCapabilities, TrainerError,
    TrainerEvent, TrainerMetrics,
};
