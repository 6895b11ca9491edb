//! Output primitives shared by lights and switches.
//!
//! Each output is one physical channel (S1..S6) on a Bloc9. The identity and
//! command path live in [`OutputCore`]; `Switch` and `DimmableLight` compose
//! it instead of inheriting from a base class.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use crate::can::{CanSink, Frame};
use crate::device::protocol;

/// Externally visible state of a dimmable output.
///
/// Invariant: `brightness == 0 ⇔ state == false`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    /// ON/OFF state.
    pub state: bool,
    /// Brightness, 0..=255.
    pub brightness: u8,
}

impl Snapshot {
    /// An OFF snapshot.
    pub const OFF: Snapshot = Snapshot {
        state: false,
        brightness: 0,
    };
}

/// Registered observers for one output.
///
/// Observers live as long as the process; there is no unsubscribe. Callbacks
/// run behind a panic-catch boundary so one misbehaving subscriber cannot
/// poison the dispatch path.
pub struct ObserverList<T: Copy> {
    observers: Mutex<Vec<Arc<dyn Fn(T) + Send + Sync>>>,
}

impl<T: Copy> ObserverList<T> {
    /// Empty list.
    pub fn new() -> Self {
        Self {
            observers: Mutex::new(Vec::new()),
        }
    }

    /// Register an observer.
    pub fn subscribe(&self, callback: impl Fn(T) + Send + Sync + 'static) {
        self.observers
            .lock()
            .expect("observer lock poisoned")
            .push(Arc::new(callback));
    }

    /// Number of registered observers.
    pub fn len(&self) -> usize {
        self.observers.lock().expect("observer lock poisoned").len()
    }

    /// Whether no observers are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invoke every observer with `value`. Panicking observers are logged and
    /// skipped; the remaining observers still run.
    pub fn notify(&self, value: T) {
        let observers: Vec<_> = self
            .observers
            .lock()
            .expect("observer lock poisoned")
            .clone();

        for observer in observers {
            if catch_unwind(AssertUnwindSafe(|| observer(value))).is_err() {
                tracing::error!("observer callback panicked");
            }
        }
    }
}

impl<T: Copy> Default for ObserverList<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Identity and command path of one output channel.
pub struct OutputCore {
    /// Owning device bus ID.
    pub device_id: u8,
    /// Zero-based switch number (0..=5 for S1..S6).
    pub switch_nr: u8,
    /// Home Assistant entity ID; also the persistence key.
    pub entity_id: String,
    /// Human-readable name.
    pub display_name: String,

    sink: Arc<dyn CanSink>,
}

impl OutputCore {
    /// Create an output identity bound to a CAN sink.
    pub fn new(
        device_id: u8,
        switch_nr: u8,
        entity_id: impl Into<String>,
        display_name: impl Into<String>,
        sink: Arc<dyn CanSink>,
    ) -> Self {
        Self {
            device_id,
            switch_nr,
            entity_id: entity_id.into(),
            display_name: display_name.into(),
            sink,
        }
    }

    /// One-based UI label ("s1".."s6").
    pub fn slot_label(&self) -> String {
        format!("s{}", self.switch_nr + 1)
    }

    /// Synthesize and send the command frame for a target pair. Send failures
    /// are transient by contract: logged at warn and swallowed, the next tick
    /// or user command re-emits.
    pub fn send_command(&self, state: bool, brightness: u8) {
        let payload = protocol::encode_command(self.switch_nr, state, brightness);
        let frame = Frame::extended(protocol::command_id(self.device_id), &payload);

        if let Err(e) = self.sink.send(&frame) {
            tracing::warn!(
                device_id = self.device_id,
                switch_nr = self.switch_nr,
                error = %e,
                "command send failed"
            );
        }
    }
}

/// Plain ON/OFF switch output.
///
/// Commands are never applied optimistically: the stored bit only changes
/// when a matched pair-state frame confirms it, so a rejected command never
/// produces a ghost update.
pub struct Switch {
    core: OutputCore,
    state: Mutex<bool>,
    observers: ObserverList<bool>,
}

impl Switch {
    /// Create a switch output.
    pub fn new(core: OutputCore) -> Self {
        Self {
            core,
            state: Mutex::new(false),
            observers: ObserverList::new(),
        }
    }

    /// Output identity.
    pub fn core(&self) -> &OutputCore {
        &self.core
    }

    /// Current confirmed state.
    pub fn state(&self) -> bool {
        *self.state.lock().expect("switch state lock poisoned")
    }

    /// Register a state observer. Observers fire exactly when a matched frame
    /// changes the stored bit, never on heartbeat and never on command send.
    pub fn subscribe(&self, callback: impl Fn(bool) + Send + Sync + 'static) {
        self.observers.subscribe(callback);
    }

    /// Send the command frame for the requested state. The stored bit is left
    /// untouched until the hardware confirms.
    pub fn set(&self, state: bool) {
        tracing::debug!(
            device_id = self.core.device_id,
            slot = %self.core.slot_label(),
            state,
            "switch command"
        );
        self.core
            .send_command(state, if state { 255 } else { 0 });
    }

    /// Apply a confirmed state from a matched frame; notifies only on change.
    pub(crate) fn update_from_frame(&self, state: bool) -> bool {
        let changed = {
            let mut stored = self.state.lock().expect("switch state lock poisoned");
            if *stored != state {
                *stored = state;
                true
            } else {
                false
            }
        };

        if changed {
            tracing::debug!(
                device_id = self.core.device_id,
                slot = %self.core.slot_label(),
                state,
                "switch state confirmed"
            );
            self.observers.notify(state);
        }
        changed
    }

    /// Restore persisted state without sending a command or notifying; the
    /// bus will reconcile on the first matched frame.
    pub(crate) fn restore(&self, state: bool) {
        *self.state.lock().expect("switch state lock poisoned") = state;
    }
}
