//! Bridge configuration types.
//!
//! The bridge consumes a parsed configuration object: connection parameters
//! plus an ordered device list with per-slot entity metadata. Validation
//! failures here are fatal: a half-configured bridge would publish wrong
//! discovery documents or alias outputs.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::core::error::{BridgeError, Result};

/// Number of outputs on a Bloc9 (S1..S6).
pub const SLOT_COUNT: usize = 6;

/// Valid Bloc9 DIP-switch device ID range.
pub const DEVICE_ID_RANGE: std::ops::RangeInclusive<u8> = 1..=10;

/// Top-level bridge configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BridgeConfig {
    /// CAN interface name (e.g. "can0").
    #[serde(default = "default_can_interface")]
    pub can_interface: String,

    /// Read-only mode: never send CAN frames or execute MQTT commands.
    #[serde(default)]
    pub read_only: bool,

    /// Path to the state persistence file (optional).
    #[serde(default)]
    pub state_file: Option<String>,

    /// MQTT connection settings.
    pub mqtt: MqttConfig,

    /// Configured devices, in order.
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

/// MQTT broker connection settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MqttConfig {
    /// Broker hostname.
    pub host: String,

    /// Broker port.
    #[serde(default = "default_mqtt_port")]
    pub port: u16,

    /// Username (optional).
    #[serde(default)]
    pub username: Option<String>,

    /// Password (optional).
    #[serde(default)]
    pub password: Option<String>,

    /// Topic prefix for discovery and state topics.
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,

    /// Client identifier presented to the broker.
    #[serde(default = "default_client_id")]
    pub client_id: String,
}

fn default_can_interface() -> String {
    "can0".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_topic_prefix() -> String {
    "homeassistant".to_string()
}

fn default_client_id() -> String {
    "scheiber-bridge".to_string()
}

/// One configured physical device.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeviceConfig {
    /// Device family name. Only "bloc9" is supported.
    pub device_type: String,

    /// DIP-switch bus ID (1..=10).
    pub device_id: u8,

    /// Slot label ("s1".."s6") to output mapping. Unconfigured slots stay
    /// silent.
    #[serde(default)]
    pub outputs: BTreeMap<String, OutputConfig>,
}

/// Kind of entity an output is exposed as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    /// Dimmable light (JSON schema, brightness, effects, flash).
    Light,
    /// Plain ON/OFF switch.
    Switch,
}

/// One configured output slot.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutputConfig {
    /// Entity kind.
    pub kind: OutputKind,

    /// Home Assistant entity ID (no domain prefix). Must be unique across the
    /// whole bridge; it also keys persisted state.
    pub entity_id: String,

    /// Human-readable display name.
    pub name: String,
}

/// Parse a slot label ("s1".."s6") into a zero-based switch number.
pub fn parse_slot(label: &str) -> Result<u8> {
    match label {
        "s1" => Ok(0),
        "s2" => Ok(1),
        "s3" => Ok(2),
        "s4" => Ok(3),
        "s5" => Ok(4),
        "s6" => Ok(5),
        other => Err(BridgeError::Config(format!(
            "invalid output slot '{}' (expected s1..s6)",
            other
        ))),
    }
}

impl BridgeConfig {
    /// Validate the whole configuration. Any failure here is fatal.
    pub fn validate(&self) -> Result<()> {
        let mut entity_ids: HashSet<&str> = HashSet::new();
        let mut device_keys: HashSet<(String, u8)> = HashSet::new();

        for device in &self.devices {
            if !device.device_type.eq_ignore_ascii_case("bloc9") {
                return Err(BridgeError::Config(format!(
                    "unknown device type '{}'",
                    device.device_type
                )));
            }

            if !DEVICE_ID_RANGE.contains(&device.device_id) {
                return Err(BridgeError::Config(format!(
                    "device_id {} out of range 1..=10",
                    device.device_id
                )));
            }

            let key = (device.device_type.to_ascii_lowercase(), device.device_id);
            if !device_keys.insert(key) {
                return Err(BridgeError::Config(format!(
                    "duplicate device {} id={}",
                    device.device_type, device.device_id
                )));
            }

            for (slot, output) in &device.outputs {
                parse_slot(slot)?;

                if output.entity_id.is_empty() {
                    return Err(BridgeError::Config(format!(
                        "empty entity_id on {} {} slot {}",
                        device.device_type, device.device_id, slot
                    )));
                }

                if !entity_ids.insert(output.entity_id.as_str()) {
                    return Err(BridgeError::Config(format!(
                        "duplicate entity_id '{}'",
                        output.entity_id
                    )));
                }
            }
        }

        Ok(())
    }
}
