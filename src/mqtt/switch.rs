//! MQTT switch entity.
//!
//! The switch surface is deliberately plain: `ON`/`OFF` payloads in both
//! directions, no JSON schema. State publishes happen only when a matched
//! CAN frame confirms the change; the hardware is the source of truth.

use std::sync::Arc;
use std::time::SystemTime;

use serde_json::json;

use crate::core::error::BridgeError;
use crate::device::Switch;
use crate::mqtt::command::parse_switch_command;
use crate::mqtt::light::{retained_age, RETAINED_MAX_AGE};
use crate::mqtt::publisher::MqttPublisher;

/// Home Assistant switch entity bridging one [`Switch`].
pub struct MqttSwitch {
    switch: Arc<Switch>,
    publisher: Arc<dyn MqttPublisher>,
    read_only: bool,

    unique_id: String,
    config_topic: String,
    state_topic: String,
    availability_topic: String,
    command_topic: String,
}

impl MqttSwitch {
    /// Create the entity and hook it onto the switch's observer list.
    pub fn new(
        switch: Arc<Switch>,
        device_type: &str,
        prefix: &str,
        publisher: Arc<dyn MqttPublisher>,
        read_only: bool,
    ) -> Self {
        let core = switch.core();
        let slot = core.slot_label();
        let base = format!(
            "{}/scheiber/{}/{}/{}",
            prefix, device_type, core.device_id, slot
        );

        let entity = Self {
            unique_id: format!("scheiber_{}_{}_{}", device_type, core.device_id, slot),
            config_topic: format!("{}/switch/{}/config", prefix, core.entity_id),
            state_topic: format!("{}/state", base),
            availability_topic: format!("{}/availability", base),
            command_topic: format!("{}/set", base),
            switch: Arc::clone(&switch),
            publisher: Arc::clone(&publisher),
            read_only,
        };

        let state_topic = entity.state_topic.clone();
        let entity_publisher = Arc::clone(&publisher);
        switch.subscribe(move |state| {
            let payload = if state { "ON" } else { "OFF" };
            if let Err(e) = entity_publisher.publish(&state_topic, payload.as_bytes(), true) {
                tracing::warn!(topic = %state_topic, error = %e, "state publish failed");
            }
        });

        entity
    }

    /// Command topic this entity answers to.
    pub fn command_topic(&self) -> &str {
        &self.command_topic
    }

    /// Availability topic.
    pub fn availability_topic(&self) -> &str {
        &self.availability_topic
    }

    /// Entity ID of the underlying output.
    pub fn entity_id(&self) -> &str {
        &self.switch.core().entity_id
    }

    /// Publish the retained discovery document.
    pub fn publish_discovery(&self) {
        let config = json!({
            "name": self.switch.core().display_name,
            "unique_id": self.unique_id,
            "state_topic": self.state_topic,
            "command_topic": self.command_topic,
            "availability_topic": self.availability_topic,
            "payload_on": "ON",
            "payload_off": "OFF",
            "optimistic": false,
            "device": {
                "identifiers": ["scheiber_system"],
                "name": "Scheiber",
                "manufacturer": "Scheiber",
                "model": "Marine Lighting Control System",
            },
        });

        if let Err(e) =
            self.publisher
                .publish(&self.config_topic, config.to_string().as_bytes(), true)
        {
            tracing::warn!(topic = %self.config_topic, error = %e, "discovery publish failed");
        }
    }

    /// Publish availability.
    pub fn publish_availability(&self, online: bool) {
        let payload = if online { "online" } else { "offline" };
        if let Err(e) = self
            .publisher
            .publish(&self.availability_topic, payload.as_bytes(), true)
        {
            tracing::warn!(topic = %self.availability_topic, error = %e, "availability publish failed");
        }
    }

    /// Publish the current confirmed state.
    pub fn publish_initial_state(&self) {
        let payload = if self.switch.state() { "ON" } else { "OFF" };
        if let Err(e) = self
            .publisher
            .publish(&self.state_topic, payload.as_bytes(), true)
        {
            tracing::warn!(topic = %self.state_topic, error = %e, "state publish failed");
        }
    }

    /// Execute a command payload received on the command topic.
    pub fn handle_command(&self, payload: &str, retained: bool, received_at: SystemTime) {
        if self.read_only {
            tracing::debug!(entity = %self.entity_id(), "command ignored (read-only)");
            return;
        }

        if payload.trim().is_empty() {
            return;
        }

        let (state, timestamp) = match parse_switch_command(payload) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!(entity = %self.entity_id(), error = %e, "command discarded");
                return;
            }
        };

        if retained {
            if let Some(age) = retained_age(timestamp, received_at) {
                if age > RETAINED_MAX_AGE {
                    let e = BridgeError::StaleRetainedCommand {
                        age_secs: age.as_secs(),
                    };
                    tracing::warn!(entity = %self.entity_id(), error = %e, "retained command dropped");
                    let _ = self.publisher.clear_retained(&self.command_topic);
                    return;
                }
            }
        }

        tracing::info!(entity = %self.entity_id(), state, retained, "switch command");
        self.switch.set(state);

        if retained {
            let _ = self.publisher.clear_retained(&self.command_topic);
        }
    }
}
