//! MQTT bridge runtime.
//!
//! Owns the client and event loop, builds one entity per configured output,
//! and dispatches inbound publishes to the owning entity by exact topic
//! match. Reconnection is the poll loop's job; subscriptions and
//! availability are re-established on every successful `ConnAck`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use rumqttc::{AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Packet, QoS};

use crate::core::config::BridgeConfig;
use crate::core::error::{BridgeError, Result};
use crate::device::{Bloc9, DeviceEvent, Output};
use crate::mqtt::light::MqttLight;
use crate::mqtt::publisher::{MqttPublisher, RumqttcPublisher};
use crate::mqtt::switch::MqttSwitch;
use crate::system::System;

/// Request channel capacity: large enough to queue a full announce (discovery
/// plus initial state for every entity) before the first connection.
const REQUEST_CAP: usize = 512;

/// One Home Assistant entity.
pub enum Entity {
    /// JSON-schema light.
    Light(MqttLight),
    /// Plain switch.
    Switch(MqttSwitch),
}

impl Entity {
    /// Command topic this entity answers to.
    pub fn command_topic(&self) -> &str {
        match self {
            Self::Light(light) => light.command_topic(),
            Self::Switch(switch) => switch.command_topic(),
        }
    }

    /// Availability topic.
    pub fn availability_topic(&self) -> &str {
        match self {
            Self::Light(light) => light.availability_topic(),
            Self::Switch(switch) => switch.availability_topic(),
        }
    }

    /// Entity ID of the underlying output.
    pub fn entity_id(&self) -> &str {
        match self {
            Self::Light(light) => light.entity_id(),
            Self::Switch(switch) => switch.entity_id(),
        }
    }

    fn publish_discovery(&self) {
        match self {
            Self::Light(light) => light.publish_discovery(),
            Self::Switch(switch) => switch.publish_discovery(),
        }
    }

    fn publish_availability(&self, online: bool) {
        match self {
            Self::Light(light) => light.publish_availability(online),
            Self::Switch(switch) => switch.publish_availability(online),
        }
    }

    fn publish_initial_state(&self) {
        match self {
            Self::Light(light) => light.publish_initial_state(),
            Self::Switch(switch) => switch.publish_initial_state(),
        }
    }

    fn handle_command(&self, payload: &str, retained: bool, received_at: SystemTime) {
        match self {
            Self::Light(light) => light.handle_command(payload, retained, received_at),
            Self::Switch(switch) => switch.handle_command(payload, retained, received_at),
        }
    }
}

/// Build one entity per configured output of every device.
pub(crate) fn build_entities(
    devices: &[Arc<Bloc9>],
    prefix: &str,
    publisher: &Arc<dyn MqttPublisher>,
    read_only: bool,
) -> Vec<Entity> {
    let mut entities = Vec::new();
    for device in devices {
        for output in device.outputs() {
            let entity = match output {
                Output::Light(light) => Entity::Light(MqttLight::new(
                    Arc::clone(light),
                    device.device_type(),
                    prefix,
                    Arc::clone(publisher),
                    read_only,
                )),
                Output::Switch(switch) => Entity::Switch(MqttSwitch::new(
                    Arc::clone(switch),
                    device.device_type(),
                    prefix,
                    Arc::clone(publisher),
                    read_only,
                )),
            };
            entities.push(entity);
        }
    }
    entities
}

/// Re-publish availability when a device's heartbeat brings it online.
pub(crate) fn wire_availability(
    devices: &[Arc<Bloc9>],
    entities: &[Entity],
    publisher: &Arc<dyn MqttPublisher>,
) {
    for device in devices {
        let device_id = device.device_id();
        let topics: Vec<String> = entities
            .iter()
            .filter(|e| {
                e.availability_topic()
                    .contains(&format!("/{}/{}/", device.device_type(), device_id))
            })
            .map(|e| e.availability_topic().to_string())
            .collect();

        if topics.is_empty() {
            continue;
        }

        let publisher = Arc::clone(publisher);
        device.subscribe(move |event| {
            let DeviceEvent::Online = event;
            for topic in &topics {
                if let Err(e) = publisher.publish(topic, b"online", true) {
                    tracing::warn!(topic = %topic, error = %e, "availability publish failed");
                }
            }
        });
    }
}

/// The MQTT side of the bridge.
pub struct MqttBridge {
    client: AsyncClient,
    entities: Vec<Entity>,
    by_command_topic: HashMap<String, usize>,
}

impl MqttBridge {
    /// Build the client and all entities. Nothing touches the network until
    /// the returned [`EventLoop`] is polled by [`MqttBridge::run`].
    pub fn new(config: &BridgeConfig, system: &System) -> Result<(Self, EventLoop)> {
        let mqtt = &config.mqtt;

        let mut options = MqttOptions::new(&mqtt.client_id, &mqtt.host, mqtt.port);
        options.set_keep_alive(Duration::from_secs(30));
        if let (Some(user), Some(pass)) = (&mqtt.username, &mqtt.password) {
            options.set_credentials(user, pass);
        }

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAP);
        let publisher: Arc<dyn MqttPublisher> = RumqttcPublisher::new(client.clone());

        let entities = build_entities(
            system.devices(),
            &mqtt.topic_prefix,
            &publisher,
            config.read_only,
        );
        wire_availability(system.devices(), &entities, &publisher);

        let by_command_topic = entities
            .iter()
            .enumerate()
            .map(|(i, e)| (e.command_topic().to_string(), i))
            .collect();

        tracing::info!(entities = entities.len(), "MQTT bridge assembled");

        Ok((
            Self {
                client,
                entities,
                by_command_topic,
            },
            eventloop,
        ))
    }

    /// Entities, in device/slot order.
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    pub(crate) fn entity_for_topic(&self, topic: &str) -> Option<&Entity> {
        self.by_command_topic
            .get(topic)
            .map(|&i| &self.entities[i])
    }

    /// Queue the retained discovery documents and initial states. They are
    /// flushed once the event loop connects.
    pub fn announce(&self) {
        for entity in &self.entities {
            entity.publish_discovery();
            entity.publish_initial_state();
        }
    }

    /// Drive the event loop. Returns only on a fatal error; transient
    /// connection failures are logged and retried.
    pub async fn run(&self, mut eventloop: EventLoop) -> Result<()> {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    match ack.code {
                        ConnectReturnCode::Success => {
                            tracing::info!("connected to MQTT broker");
                            self.on_connected().await;
                        }
                        ConnectReturnCode::BadUserNamePassword
                        | ConnectReturnCode::NotAuthorized => {
                            return Err(BridgeError::MqttAuth(format!("{:?}", ack.code)));
                        }
                        other => {
                            tracing::error!(code = ?other, "MQTT connection rejected");
                        }
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let payload = String::from_utf8_lossy(&publish.payload);
                    match self.entity_for_topic(&publish.topic) {
                        Some(entity) => {
                            entity.handle_command(&payload, publish.retain, SystemTime::now());
                        }
                        None => {
                            tracing::warn!(topic = %publish.topic, "message on unknown topic");
                        }
                    }
                }
                Ok(_) => {}
                Err(ConnectionError::ConnectionRefused(code)) => match code {
                    ConnectReturnCode::BadUserNamePassword | ConnectReturnCode::NotAuthorized => {
                        return Err(BridgeError::MqttAuth(format!("{:?}", code)));
                    }
                    other => {
                        tracing::warn!(code = ?other, "MQTT connection refused, retrying");
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                },
                Err(e) => {
                    tracing::warn!(error = %e, "MQTT connection error, retrying");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    /// Subscribe every command topic and publish availability. Runs on every
    /// (re)connect.
    async fn on_connected(&self) {
        for entity in &self.entities {
            if let Err(e) = self
                .client
                .subscribe(entity.command_topic(), QoS::AtLeastOnce)
                .await
            {
                tracing::warn!(
                    topic = %entity.command_topic(),
                    error = %e,
                    "subscribe failed"
                );
            }
            entity.publish_availability(true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::can::CanSink;
    use crate::core::config::{DeviceConfig, OutputConfig, OutputKind};
    use crate::device::testutil::MockSink;
    use crate::device::Snapshot;
    use crate::mqtt::publisher::testutil::MockPublisher;
    use std::collections::BTreeMap;

    fn two_output_device(sink: Arc<dyn CanSink>) -> Arc<Bloc9> {
        let config = DeviceConfig {
            device_type: "bloc9".to_string(),
            device_id: 7,
            outputs: BTreeMap::from([
                (
                    "s1".to_string(),
                    OutputConfig {
                        kind: OutputKind::Light,
                        entity_id: "galley".to_string(),
                        name: "Galley".to_string(),
                    },
                ),
                (
                    "s4".to_string(),
                    OutputConfig {
                        kind: OutputKind::Switch,
                        entity_id: "nav_light".to_string(),
                        name: "Navigation Light".to_string(),
                    },
                ),
            ]),
        };
        Arc::new(Bloc9::from_config(&config, sink).unwrap())
    }

    #[tokio::test]
    async fn test_build_entities_per_output() {
        let devices = vec![two_output_device(MockSink::new())];
        let publisher: Arc<dyn MqttPublisher> = MockPublisher::new();
        let entities = build_entities(&devices, "homeassistant", &publisher, false);

        assert_eq!(entities.len(), 2);
        assert!(matches!(entities[0], Entity::Light(_)));
        assert!(matches!(entities[1], Entity::Switch(_)));
        assert_eq!(entities[0].command_topic(), "homeassistant/scheiber/bloc9/7/s1/set");
        assert_eq!(entities[1].command_topic(), "homeassistant/scheiber/bloc9/7/s4/set");
    }

    #[tokio::test]
    async fn test_announce_publishes_discovery_and_state() {
        let devices = vec![two_output_device(MockSink::new())];
        let mock = MockPublisher::new();
        let publisher: Arc<dyn MqttPublisher> = mock.clone();
        let entities = build_entities(&devices, "homeassistant", &publisher, false);

        for entity in &entities {
            entity.publish_discovery();
            entity.publish_initial_state();
        }

        let topics: Vec<String> = mock.published().iter().map(|p| p.topic.clone()).collect();
        assert!(topics.contains(&"homeassistant/light/galley/config".to_string()));
        assert!(topics.contains(&"homeassistant/switch/nav_light/config".to_string()));
        assert!(topics.contains(&"homeassistant/scheiber/bloc9/7/s1/state".to_string()));
        assert!(topics.contains(&"homeassistant/scheiber/bloc9/7/s4/state".to_string()));
        // Everything announced is retained.
        assert!(mock.published().iter().all(|p| p.retain));
    }

    #[tokio::test]
    async fn test_heartbeat_republishes_availability() {
        let sink = MockSink::new();
        let device = two_output_device(sink);
        let devices = vec![Arc::clone(&device)];
        let mock = MockPublisher::new();
        let publisher: Arc<dyn MqttPublisher> = mock.clone();
        let entities = build_entities(&devices, "homeassistant", &publisher, false);
        wire_availability(&devices, &entities, &publisher);

        device.route(&crate::can::Frame::extended(0x000006B8, &[]));

        assert_eq!(
            mock.payloads_for("homeassistant/scheiber/bloc9/7/s1/availability"),
            vec!["online".to_string()]
        );
        assert_eq!(
            mock.payloads_for("homeassistant/scheiber/bloc9/7/s4/availability"),
            vec!["online".to_string()]
        );
    }

    #[tokio::test]
    async fn test_command_dispatch_by_topic() {
        let sink = MockSink::new();
        let device = two_output_device(Arc::clone(&sink) as Arc<dyn CanSink>);
        let devices = vec![Arc::clone(&device)];
        let publisher: Arc<dyn MqttPublisher> = MockPublisher::new();
        let entities = build_entities(&devices, "homeassistant", &publisher, false);

        let light_entity = &entities[0];
        light_entity.handle_command(r#"{"state":"ON","brightness":99}"#, false, SystemTime::now());

        assert_eq!(sink.sent_count(), 1);
        assert_eq!(sink.sent()[0].data(), &[0, 0x11, 0, 99]);

        let mut outputs = device.outputs();
        match outputs.next().unwrap() {
            Output::Light(light) => assert_eq!(
                light.snapshot(),
                Snapshot {
                    state: true,
                    brightness: 99
                }
            ),
            Output::Switch(_) => panic!("expected light"),
        }
    }
}
