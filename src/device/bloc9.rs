//! Bloc9 device: six outputs behind one DIP-configured bus ID.
//!
//! The device owns a route table built once at construction, mapping every
//! arbitration ID it cares about to a target: a pair of output slots, the
//! heartbeat handler, or the command-echo drop. All matchers use the full
//! 32-bit mask: the low byte of each pattern carries the device ID, and
//! masking it out aliases outputs across devices.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::can::{CanSink, Frame, Matcher};
use crate::core::config::{parse_slot, DeviceConfig, OutputKind, SLOT_COUNT};
use crate::core::error::Result;
use crate::device::light::DimmableLight;
use crate::device::output::{ObserverList, OutputCore, Snapshot, Switch};
use crate::device::protocol;
use crate::store::EntityState;

/// One configured output slot.
pub enum Output {
    /// Dimmable light.
    Light(Arc<DimmableLight>),
    /// Plain switch.
    Switch(Arc<Switch>),
}

impl Output {
    /// Output identity.
    pub fn core(&self) -> &OutputCore {
        match self {
            Self::Light(light) => light.core(),
            Self::Switch(switch) => switch.core(),
        }
    }

    /// Entity ID (persistence key).
    pub fn entity_id(&self) -> &str {
        &self.core().entity_id
    }
}

/// Device-level event delivered to device observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceEvent {
    /// The device's heartbeat brought it online.
    Online,
}

/// What a frame routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RouteTarget {
    /// Pair-state frame for slots `2 * pair` and `2 * pair + 1`.
    Pair(usize),
    /// Low-priority status frame: availability only.
    Heartbeat,
    /// Echo of our own command frame: recognized and dropped.
    CommandEcho,
}

/// Result of offering a frame to a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// No matcher of this device claimed the frame.
    NotMatched,
    /// The frame was claimed; `changed` reports whether any output state
    /// actually moved.
    Matched {
        /// Whether a stored output state changed.
        changed: bool,
    },
}

struct HeartbeatState {
    last_seen: Option<Instant>,
    online: bool,
}

/// A Bloc9 lighting controller.
pub struct Bloc9 {
    device_id: u8,
    slots: [Option<Output>; SLOT_COUNT],
    route: HashMap<u32, RouteTarget>,

    heartbeat: Mutex<HeartbeatState>,
    observers: ObserverList<DeviceEvent>,

    // Arb IDs whose malformed payloads were already reported.
    malformed_logged: Mutex<HashSet<u32>>,
}

impl Bloc9 {
    /// Device family name.
    pub const DEVICE_TYPE: &'static str = "bloc9";

    /// Build a device and its outputs from configuration. The caller has
    /// already validated the configuration.
    pub fn from_config(config: &DeviceConfig, sink: Arc<dyn CanSink>) -> Result<Self> {
        let device_id = config.device_id;
        let mut slots: [Option<Output>; SLOT_COUNT] = Default::default();

        for (label, output) in &config.outputs {
            let switch_nr = parse_slot(label)?;
            let core = OutputCore::new(
                device_id,
                switch_nr,
                output.entity_id.clone(),
                output.name.clone(),
                Arc::clone(&sink),
            );
            slots[switch_nr as usize] = Some(match output.kind {
                OutputKind::Light => Output::Light(DimmableLight::new(core)),
                OutputKind::Switch => Output::Switch(Arc::new(Switch::new(core))),
            });
        }

        // Route table, built once: three pair-state patterns, the heartbeat,
        // and the command echo so our own frames are known rather than
        // "unknown".
        let mut route = HashMap::new();
        for pair in 0..3 {
            route.insert(
                protocol::pair_state_id(device_id, pair),
                RouteTarget::Pair(pair),
            );
        }
        route.insert(protocol::heartbeat_id(device_id), RouteTarget::Heartbeat);
        route.insert(protocol::command_id(device_id), RouteTarget::CommandEcho);

        Ok(Self {
            device_id,
            slots,
            route,
            heartbeat: Mutex::new(HeartbeatState {
                last_seen: None,
                online: false,
            }),
            observers: ObserverList::new(),
            malformed_logged: Mutex::new(HashSet::new()),
        })
    }

    /// Bus ID of this device.
    pub fn device_id(&self) -> u8 {
        self.device_id
    }

    /// Device family name.
    pub fn device_type(&self) -> &'static str {
        Self::DEVICE_TYPE
    }

    /// Persistence key, e.g. `bloc9_7`.
    pub fn state_key(&self) -> String {
        format!("{}_{}", Self::DEVICE_TYPE, self.device_id)
    }

    /// Configured outputs, in slot order.
    pub fn outputs(&self) -> impl Iterator<Item = &Output> {
        self.slots.iter().flatten()
    }

    /// All matchers this device answers to (full 32-bit masks).
    pub fn matchers(&self) -> Vec<Matcher> {
        let mut matchers: Vec<Matcher> = self.route.keys().map(|&p| Matcher::exact(p)).collect();
        matchers.sort_by_key(|m| m.pattern);
        matchers
    }

    /// Whether a heartbeat has been seen.
    pub fn is_online(&self) -> bool {
        self.heartbeat.lock().expect("heartbeat lock poisoned").online
    }

    /// Instant of the last heartbeat, if any.
    pub fn last_heartbeat(&self) -> Option<Instant> {
        self.heartbeat
            .lock()
            .expect("heartbeat lock poisoned")
            .last_seen
    }

    /// Register a device-level observer (availability events only; output
    /// state flows through the outputs' own observers).
    pub fn subscribe(&self, callback: impl Fn(DeviceEvent) + Send + Sync + 'static) {
        self.observers.subscribe(callback);
    }

    /// Offer an inbound frame to this device.
    pub fn route(&self, frame: &Frame) -> RouteOutcome {
        let Some(&target) = self.route.get(&frame.arb_id()) else {
            return RouteOutcome::NotMatched;
        };

        match target {
            RouteTarget::Heartbeat => {
                self.on_heartbeat();
                RouteOutcome::Matched { changed: false }
            }
            RouteTarget::CommandEcho => {
                tracing::trace!(
                    device_id = self.device_id,
                    frame = %frame,
                    "command echo dropped"
                );
                RouteOutcome::Matched { changed: false }
            }
            RouteTarget::Pair(pair) => RouteOutcome::Matched {
                changed: self.process_pair_frame(pair, frame),
            },
        }
    }

    /// Heartbeats only touch device-level availability; outputs are never
    /// mutated here.
    fn on_heartbeat(&self) {
        let came_online = {
            let mut hb = self.heartbeat.lock().expect("heartbeat lock poisoned");
            hb.last_seen = Some(Instant::now());
            if !hb.online {
                hb.online = true;
                true
            } else {
                false
            }
        };

        if came_online {
            tracing::info!(device_id = self.device_id, "device online");
            self.observers.notify(DeviceEvent::Online);
        }
    }

    fn process_pair_frame(&self, pair: usize, frame: &Frame) -> bool {
        let mut changed = false;

        for switch_nr in [pair as u8 * 2, pair as u8 * 2 + 1] {
            let Some(output) = &self.slots[switch_nr as usize] else {
                continue;
            };

            let (state_bit, brightness) =
                match protocol::decode_half(frame.data(), switch_nr, frame.arb_id()) {
                    Ok(half) => half,
                    Err(e) => {
                        // One log line per distinct arbitration ID.
                        let mut logged =
                            self.malformed_logged.lock().expect("malformed lock poisoned");
                        if logged.insert(frame.arb_id()) {
                            tracing::warn!(
                                device_id = self.device_id,
                                frame = %frame,
                                error = %e,
                                "malformed pair-state frame dropped"
                            );
                        }
                        return false;
                    }
                };

            match output {
                Output::Light(light) => {
                    changed |= light.update_from_frame(state_bit, brightness);
                }
                Output::Switch(switch) => {
                    let (state, _) = protocol::derive_state(state_bit, brightness);
                    changed |= switch.update_from_frame(state);
                }
            }
        }

        changed
    }

    /// Collect per-entity state for persistence, keyed by `entity_id`.
    pub fn store_state(&self) -> BTreeMap<String, EntityState> {
        let mut state = BTreeMap::new();
        for output in self.outputs() {
            let entry = match output {
                Output::Light(light) => {
                    let snap = light.snapshot();
                    EntityState {
                        state: snap.state,
                        brightness: Some(snap.brightness),
                    }
                }
                Output::Switch(switch) => EntityState {
                    state: switch.state(),
                    brightness: None,
                },
            };
            state.insert(output.entity_id().to_string(), entry);
        }
        state
    }

    /// Restore per-entity state. Silent: no commands are sent and no
    /// observers fire; the bus reconciles on the first matched frame.
    /// Entries keyed by anything other than a configured `entity_id` are
    /// ignored (the legacy slot-keyed shape is not read).
    pub fn restore_state(&self, state: &BTreeMap<String, EntityState>) {
        for output in self.outputs() {
            let Some(entry) = state.get(output.entity_id()) else {
                continue;
            };
            match output {
                Output::Light(light) => {
                    light.restore(Snapshot {
                        state: entry.state,
                        brightness: entry.brightness.unwrap_or(0),
                    });
                }
                Output::Switch(switch) => {
                    switch.restore(entry.state);
                }
            }
        }
    }
}
