//! Abstract MQTT publish seam.
//!
//! Entities publish through this trait so the entity logic stays independent
//! of the client library (and testable against a recording mock).

use std::sync::Arc;

use rumqttc::{AsyncClient, QoS};

use crate::core::error::{BridgeError, Result};

/// Publisher for entity traffic. Everything the bridge publishes is QoS 1;
/// discovery, state and availability are retained.
pub trait MqttPublisher: Send + Sync {
    /// Publish a payload.
    fn publish(&self, topic: &str, payload: &[u8], retain: bool) -> Result<()>;

    /// Clear a retained message (zero-length retained publish).
    fn clear_retained(&self, topic: &str) -> Result<()> {
        self.publish(topic, &[], true)
    }
}

/// rumqttc-backed publisher.
pub struct RumqttcPublisher {
    client: AsyncClient,
}

impl RumqttcPublisher {
    /// Wrap an async client.
    pub fn new(client: AsyncClient) -> Arc<Self> {
        Arc::new(Self { client })
    }
}

impl MqttPublisher for RumqttcPublisher {
    fn publish(&self, topic: &str, payload: &[u8], retain: bool) -> Result<()> {
        self.client
            .try_publish(topic, QoS::AtLeastOnce, retain, payload)
            .map_err(|e| BridgeError::Connection(format!("mqtt publish failed: {}", e)))
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use std::sync::Mutex;

    /// A recorded publish.
    #[derive(Debug, Clone, PartialEq)]
    pub(crate) struct Published {
        pub topic: String,
        pub payload: Vec<u8>,
        pub retain: bool,
    }

    /// Publisher that records every publish.
    pub(crate) struct MockPublisher {
        records: Mutex<Vec<Published>>,
    }

    impl MockPublisher {
        pub(crate) fn new() -> Arc<Self> {
            Arc::new(Self {
                records: Mutex::new(Vec::new()),
            })
        }

        pub(crate) fn published(&self) -> Vec<Published> {
            self.records.lock().unwrap().clone()
        }

        /// Publishes to one topic, as UTF-8 payloads.
        pub(crate) fn payloads_for(&self, topic: &str) -> Vec<String> {
            self.records
                .lock()
                .unwrap()
                .iter()
                .filter(|p| p.topic == topic)
                .map(|p| String::from_utf8_lossy(&p.payload).into_owned())
                .collect()
        }
    }

    impl MqttPublisher for MockPublisher {
        fn publish(&self, topic: &str, payload: &[u8], retain: bool) -> Result<()> {
            self.records.lock().unwrap().push(Published {
                topic: topic.to_string(),
                payload: payload.to_vec(),
                retain,
            });
            Ok(())
        }
    }
}
