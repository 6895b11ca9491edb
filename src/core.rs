//! Core types: errors, configuration, easing curves.

pub mod config;
pub mod easing;
pub mod error;

pub use config::{BridgeConfig, DeviceConfig, MqttConfig, OutputConfig, OutputKind};
pub use easing::EasingKind;
pub use error::{BridgeError, Result};
