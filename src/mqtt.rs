//! MQTT layer: Home Assistant command grammar, per-entity bridges, and the
//! connection runtime.

pub mod bridge;
pub mod command;
pub mod light;
pub mod publisher;
pub mod switch;

pub use bridge::{Entity, MqttBridge};
pub use command::LightCommand;
pub use light::{MqttLight, RETAINED_MAX_AGE};
pub use publisher::{MqttPublisher, RumqttcPublisher};
pub use switch::MqttSwitch;
