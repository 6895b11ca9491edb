//! MQTT light entity.
//!
//! One instance per configured dimmable output. Owns its topic set, publishes
//! the Home Assistant discovery document and every state change, and executes
//! commands arriving on its command topic.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde_json::json;

use crate::core::easing::EasingKind;
use crate::core::error::BridgeError;
use crate::device::DimmableLight;
use crate::mqtt::command::LightCommand;
use crate::mqtt::publisher::MqttPublisher;

/// Retained commands older than this are discarded and cleared instead of
/// replayed.
pub const RETAINED_MAX_AGE: Duration = Duration::from_secs(300);

/// Age of a message carrying `timestamp` (epoch seconds) at `received_at`.
/// Messages without a timestamp are treated as fresh.
pub(crate) fn retained_age(timestamp: Option<f64>, received_at: SystemTime) -> Option<Duration> {
    let ts = timestamp?;
    let now = received_at.duration_since(UNIX_EPOCH).ok()?.as_secs_f64();
    let age = now - ts;
    (age > 0.0).then(|| Duration::from_secs_f64(age))
}

/// Home Assistant light entity bridging one [`DimmableLight`].
pub struct MqttLight {
    light: Arc<DimmableLight>,
    publisher: Arc<dyn MqttPublisher>,
    read_only: bool,

    unique_id: String,
    config_topic: String,
    state_topic: String,
    availability_topic: String,
    command_topic: String,
}

impl MqttLight {
    /// Create the entity and hook it onto the light's observer list.
    pub fn new(
        light: Arc<DimmableLight>,
        device_type: &str,
        prefix: &str,
        publisher: Arc<dyn MqttPublisher>,
        read_only: bool,
    ) -> Self {
        let core = light.core();
        let slot = core.slot_label();
        let base = format!(
            "{}/scheiber/{}/{}/{}",
            prefix, device_type, core.device_id, slot
        );

        let entity = Self {
            unique_id: format!("scheiber_{}_{}_{}", device_type, core.device_id, slot),
            config_topic: format!("{}/light/{}/config", prefix, core.entity_id),
            state_topic: format!("{}/state", base),
            availability_topic: format!("{}/availability", base),
            command_topic: format!("{}/set", base),
            light: Arc::clone(&light),
            publisher: Arc::clone(&publisher),
            read_only,
        };

        // Every hardware state change goes straight out as retained state.
        let state_topic = entity.state_topic.clone();
        let entity_publisher = Arc::clone(&publisher);
        light.subscribe(move |snap| {
            let payload = json!({
                "state": if snap.state { "ON" } else { "OFF" },
                "brightness": snap.brightness,
            });
            if let Err(e) =
                entity_publisher.publish(&state_topic, payload.to_string().as_bytes(), true)
            {
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
        &self.light.core().entity_id
    }

    /// Publish the retained discovery document.
    pub fn publish_discovery(&self) {
        let effect_list: Vec<&str> = EasingKind::ALL.iter().map(|e| e.as_str()).collect();
        let config = json!({
            "name": self.light.core().display_name,
            "unique_id": self.unique_id,
            "state_topic": self.state_topic,
            "command_topic": self.command_topic,
            "availability_topic": self.availability_topic,
            "optimistic": false,
            "device": {
                "identifiers": ["scheiber_system"],
                "name": "Scheiber",
                "manufacturer": "Scheiber",
                "model": "Marine Lighting Control System",
            },
            "schema": "json",
            "brightness": true,
            "supported_color_modes": ["brightness"],
            "brightness_scale": 255,
            "flash": true,
            "flash_time_short": 2,
            "flash_time_long": 10,
            "effect": true,
            "effect_list": effect_list,
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

    /// Publish the current hardware state.
    pub fn publish_initial_state(&self) {
        let snap = self.light.snapshot();
        let payload = json!({
            "state": if snap.state { "ON" } else { "OFF" },
            "brightness": snap.brightness,
        });
        if let Err(e) = self
            .publisher
            .publish(&self.state_topic, payload.to_string().as_bytes(), true)
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

        // Zero-length payloads are the echo of our own retained-clear.
        if payload.trim().is_empty() {
            return;
        }

        let command = match LightCommand::parse(payload) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(entity = %self.entity_id(), error = %e, "command discarded");
                return;
            }
        };

        if retained {
            if let Some(age) = retained_age(command.timestamp, received_at) {
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

        tracing::info!(entity = %self.entity_id(), payload = %payload, retained, "light command");
        self.light.set(&command.to_request());

        // A replayed retained command must not fire again on the next
        // (re)subscribe.
        if retained {
            let _ = self.publisher.clear_retained(&self.command_topic);
        }
    }
}
