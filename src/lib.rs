//! # scheiber-bridge
//!
//! Bridges a Scheiber marine lighting CAN bus to MQTT with Home Assistant
//! discovery.
//!
//! The core is the device-and-transition engine: pattern-masked
//! arbitration-ID dispatch identifies which logical output an inbound frame
//! belongs to, the Bloc9 state encoding is decoded (including the
//! full-brightness quirk), outbound command frames are synthesized, and
//! concurrent cancellable brightness transitions run against the shared bus
//! without corrupting per-light state. State changes fan out to observers,
//! and echoes of self-issued commands are recognized and dropped.
//!
//! ## Layering
//!
//! ```text
//! CanBus → System::dispatch → Bloc9::route → outputs → observers → MQTT entities
//! MQTT command → entity → output method → (transition task) → CanBus
//! ```
//!
//! The entity layer subscribes to hardware outputs and never writes CAN
//! frames directly; that layering is what keeps echo handling and state
//! reconciliation in one place.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use scheiber_bridge::prelude::*;
//!
//! let config: BridgeConfig = toml::from_str(&std::fs::read_to_string("bridge.toml")?)?;
//! config.validate()?;
//!
//! let bus = Arc::new(CanBus::new(&config.can_interface, config.read_only));
//! let system = Arc::new(System::from_config(&config, Arc::clone(&bus))?);
//! let (bridge, eventloop) = MqttBridge::new(&config, &system)?;
//!
//! system.start()?;
//! bridge.announce();
//! bridge.run(eventloop).await?;
//! ```

pub mod can;
pub mod core;
pub mod device;
pub mod mqtt;
pub mod store;
pub mod system;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::can::{CanBus, CanSink, Frame, Matcher};
    pub use crate::core::{BridgeConfig, BridgeError, EasingKind, Result};
    pub use crate::device::{Bloc9, DimmableLight, SetRequest, Snapshot, Switch};
    pub use crate::mqtt::MqttBridge;
    pub use crate::system::System;
}

// Re-export core types at crate root for convenience.
pub use crate::core::error::{BridgeError, Result};
pub use crate::core::{BridgeConfig, EasingKind};
pub use crate::system::System;
