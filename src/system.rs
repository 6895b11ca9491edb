//! Device manager: routes inbound frames, coordinates state persistence.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::can::{CanBus, CanSink, Frame};
use crate::core::config::BridgeConfig;
use crate::core::error::{BridgeError, Result};
use crate::device::{Bloc9, RouteOutcome};
use crate::store::{StateDocument, StateStore};

/// How often dirty state is flushed to disk.
const PERSIST_INTERVAL: Duration = Duration::from_secs(30);

/// Owns the devices and the CAN bus; dispatches every inbound frame and
/// schedules state persistence.
pub struct System {
    bus: Arc<CanBus>,
    devices: Vec<Arc<Bloc9>>,
    store: Option<StateStore>,

    running: Arc<AtomicBool>,
    dirty: Arc<AtomicBool>,
    unknown_ids: Mutex<HashSet<u32>>,
    persist_handle: Mutex<Option<JoinHandle<()>>>,
}

impl System {
    /// Assemble a system from already-built devices.
    pub fn new(
        bus: Arc<CanBus>,
        devices: Vec<Arc<Bloc9>>,
        state_file: Option<String>,
    ) -> Result<Self> {
        // Guard against double registration even when the configuration
        // layer was bypassed.
        let mut keys = HashSet::new();
        for device in &devices {
            if !keys.insert((device.device_type(), device.device_id())) {
                return Err(BridgeError::Config(format!(
                    "duplicate device {} id={}",
                    device.device_type(),
                    device.device_id()
                )));
            }
        }

        Ok(Self {
            bus,
            devices,
            store: state_file.map(StateStore::new),
            running: Arc::new(AtomicBool::new(false)),
            dirty: Arc::new(AtomicBool::new(false)),
            unknown_ids: Mutex::new(HashSet::new()),
            persist_handle: Mutex::new(None),
        })
    }

    /// Build devices and system from a validated configuration.
    pub fn from_config(config: &BridgeConfig, bus: Arc<CanBus>) -> Result<Self> {
        let sink: Arc<dyn CanSink> = Arc::clone(&bus) as Arc<dyn CanSink>;
        let devices = config
            .devices
            .iter()
            .map(|device| Bloc9::from_config(device, Arc::clone(&sink)).map(Arc::new))
            .collect::<Result<Vec<_>>>()?;

        Self::new(bus, devices, config.state_file.clone())
    }

    /// Registered devices.
    pub fn devices(&self) -> &[Arc<Bloc9>] {
        &self.devices
    }

    /// The CAN bus.
    pub fn bus(&self) -> &Arc<CanBus> {
        &self.bus
    }

    /// Number of distinct unmatched arbitration IDs seen so far.
    pub fn unknown_id_count(&self) -> usize {
        self.unknown_ids.lock().expect("unknown ids lock poisoned").len()
    }

    /// Load persisted state, start the CAN read loop, and schedule periodic
    /// persistence.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(BridgeError::Connection("system already started".to_string()));
        }

        self.load_state();

        let system = Arc::clone(self);
        self.bus.start(Arc::new(move |frame| system.dispatch(frame)))?;

        if self.store.is_some() {
            let system = Arc::clone(self);
            let handle = tokio::spawn(async move {
                let mut interval = tokio::time::interval(PERSIST_INTERVAL);
                // The first tick fires immediately; skip it.
                interval.tick().await;
                loop {
                    interval.tick().await;
                    if !system.running.load(Ordering::SeqCst) {
                        break;
                    }
                    system.save_if_dirty();
                }
            });
            *self
                .persist_handle
                .lock()
                .expect("persist handle lock poisoned") = Some(handle);
        }

        tracing::info!(devices = self.devices.len(), "system started");
        Ok(())
    }

    /// Stop dispatching, flush state one last time, close the bus.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self
            .persist_handle
            .lock()
            .expect("persist handle lock poisoned")
            .take()
        {
            handle.abort();
        }

        if self.dirty.load(Ordering::SeqCst) {
            self.save_if_dirty();
        }

        self.bus.stop();
        tracing::info!("system stopped");
    }

    /// Offer an inbound frame to every device. Unmatched arbitration IDs are
    /// counted and logged once each.
    pub fn dispatch(&self, frame: Frame) {
        let mut matched = false;

        for device in &self.devices {
            match device.route(&frame) {
                RouteOutcome::Matched { changed } => {
                    matched = true;
                    if changed {
                        self.dirty.store(true, Ordering::SeqCst);
                    }
                }
                RouteOutcome::NotMatched => {}
            }
        }

        if !matched {
            let mut unknown = self.unknown_ids.lock().expect("unknown ids lock poisoned");
            if unknown.insert(frame.arb_id()) {
                tracing::warn!(frame = %frame, "unknown arbitration id");
            }
        }
    }

    fn load_state(&self) {
        let Some(store) = &self.store else {
            return;
        };

        let document = match store.load() {
            Ok(doc) => doc,
            Err(e) => {
                tracing::warn!(error = %e, "failed to load state, starting empty");
                return;
            }
        };

        for device in &self.devices {
            if let Some(state) = document.devices.get(&device.state_key()) {
                device.restore_state(state);
                tracing::info!(
                    device_id = device.device_id(),
                    entities = state.len(),
                    "restored state"
                );
            }
        }
    }

    fn save_if_dirty(&self) {
        let Some(store) = &self.store else {
            return;
        };

        if !self.dirty.swap(false, Ordering::SeqCst) {
            return;
        }

        let mut document = StateDocument::default();
        for device in &self.devices {
            document
                .devices
                .insert(device.state_key(), device.store_state());
        }

        if let Err(e) = store.save(document) {
            // In-memory state is untouched; the next tick retries.
            tracing::warn!(error = %e, "state save failed");
            self.dirty.store(true, Ordering::SeqCst);
        }
    }
}
