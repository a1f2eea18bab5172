pub mod config;
pub mod endpoints;
pub mod monitor;
pub mod pacing;
pub mod thresholds;
pub mod types;
pub mod uplink;

pub use config::{parse_flag, MonitorConfig, NetworkConfig, RuntimeConfig};
pub use endpoints::*;
pub use monitor::{CheckOutcome, MonitorAction, MonitorEngine, MonitorStats};
pub use pacing::{ReadCache, DHT22_MIN_READ_INTERVAL_MS};
pub use thresholds::{Channel, ThresholdSet, Violation};
pub use types::{DeviceRecord, Reading, StorageConditionPayload};
pub use uplink::{bearer_header, interpret_send_response, parse_device_config, UplinkError};
