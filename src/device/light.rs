//! Dimmable light output with transitions and flash effects.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use crate::core::easing::EasingKind;
use crate::device::output::{ObserverList, OutputCore, Snapshot};
use crate::device::protocol::{self, DIMMING_THRESHOLD};
use crate::device::transitions::{self, TransitionHandle};

/// Home-Assistant-style composite request for [`DimmableLight::set`].
///
/// Precedence: flash > transition > brightness > state. An `effect` is stored
/// as the default easing for subsequent fades; an effect alone with
/// `state: true` changes nothing else.
#[derive(Debug, Clone, Copy, Default)]
pub struct SetRequest {
    /// Target state.
    pub state: bool,
    /// Target brightness, if given.
    pub brightness: Option<u8>,
    /// Fade duration, if given.
    pub transition: Option<Duration>,
    /// Easing to store and use.
    pub effect: Option<EasingKind>,
    /// Flash duration; overrides everything else.
    pub flash: Option<Duration>,
}

struct LightInner {
    state: bool,
    brightness: u8,
    default_easing: Option<EasingKind>,
    active: Option<TransitionHandle>,
}

/// Dimmable light on one Bloc9 output.
///
/// All mutating entry points serialize on one internal lock; at most one
/// transition or flash is in flight, and starting anything new cancels the
/// predecessor before the new command's frame goes out.
pub struct DimmableLight {
    core: OutputCore,
    inner: Mutex<LightInner>,
    observers: ObserverList<Snapshot>,
    // Back-reference handed to spawned transition tasks.
    me: Weak<DimmableLight>,
}

/// Normalize a requested brightness level into the externally visible pair.
/// Levels at or below the dimming threshold are OFF with brightness 0, so
/// `brightness == 0 ⇔ state == false` holds for everything we expose.
fn normalize_level(brightness: u8) -> Snapshot {
    if brightness > DIMMING_THRESHOLD {
        Snapshot {
            state: true,
            brightness,
        }
    } else {
        Snapshot::OFF
    }
}

impl DimmableLight {
    /// Create a light output. Lights always live behind an `Arc` so
    /// transition tasks can hold a reference to their target.
    pub fn new(core: OutputCore) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            core,
            inner: Mutex::new(LightInner {
                state: false,
                brightness: 0,
                default_easing: None,
                active: None,
            }),
            observers: ObserverList::new(),
            me: me.clone(),
        })
    }

    fn arc(&self) -> Arc<Self> {
        self.me.upgrade().expect("light always lives behind an Arc")
    }

    /// Output identity.
    pub fn core(&self) -> &OutputCore {
        &self.core
    }

    /// Current externally visible state.
    pub fn snapshot(&self) -> Snapshot {
        let inner = self.inner.lock().expect("light lock poisoned");
        Snapshot {
            state: inner.state,
            brightness: inner.brightness,
        }
    }

    /// Register a state observer.
    pub fn subscribe(&self, callback: impl Fn(Snapshot) + Send + Sync + 'static) {
        self.observers.subscribe(callback);
    }

    /// Easing stored by a previous `effect` command, if any.
    pub fn default_easing(&self) -> Option<EasingKind> {
        self.inner.lock().expect("light lock poisoned").default_easing
    }

    /// Set brightness immediately. Cancels any running transition or flash,
    /// sends the command frame, and notifies observers with the new snapshot.
    pub fn set_brightness(&self, brightness: u8) {
        let snap = normalize_level(brightness);
        {
            let mut inner = self.inner.lock().expect("light lock poisoned");
            cancel_active(&mut inner);
            // Frame first, then state: the cancel flag is already set, so no
            // tick can slip a stale dimming frame in after this one.
            self.core.send_command(snap.state, snap.brightness);
            inner.state = snap.state;
            inner.brightness = snap.brightness;
        }
        self.observers.notify(snap);
    }

    /// Fade to a target brightness. Cancels any running transition; a fade to
    /// the current brightness is a no-op. With `easing` unset the stored
    /// default applies, or the endpoint-based automatic choice if none was
    /// ever stored.
    pub fn fade_to(&self, target: u8, duration: Duration, easing: Option<EasingKind>) {
        let mut inner = self.inner.lock().expect("light lock poisoned");
        cancel_active(&mut inner);

        let start = inner.brightness;
        if start == target {
            return;
        }

        let easing = easing
            .or(inner.default_easing)
            .unwrap_or_else(|| EasingKind::auto_for(start, target));

        inner.active = Some(transitions::start_transition(
            self.arc(),
            start,
            target,
            duration,
            easing,
        ));
    }

    /// Flash: full brightness for `duration`, then restore the state held
    /// when the flash started. Cancels any running transition.
    pub fn flash(&self, duration: Duration) {
        let mut inner = self.inner.lock().expect("light lock poisoned");
        cancel_active(&mut inner);

        let previous = Snapshot {
            state: inner.state,
            brightness: inner.brightness,
        };
        inner.active = Some(transitions::start_flash(self.arc(), duration, previous));
    }

    /// Execute a composite request (the MQTT command surface).
    pub fn set(&self, request: &SetRequest) {
        if let Some(effect) = request.effect {
            let mut inner = self.inner.lock().expect("light lock poisoned");
            inner.default_easing = Some(effect);
        }

        if let Some(duration) = request.flash {
            self.flash(duration);
            return;
        }

        if let Some(duration) = request.transition {
            let target = request
                .brightness
                .unwrap_or(if request.state { 255 } else { 0 });
            self.fade_to(target, duration, request.effect);
            return;
        }

        if let Some(brightness) = request.brightness {
            self.set_brightness(brightness);
            return;
        }

        if request.effect.is_some() && request.state {
            // Easing-only command: remember it, leave the light alone.
            tracing::debug!(
                slot = %self.core.slot_label(),
                "stored easing without state change"
            );
            return;
        }

        if request.state {
            // Turn on at the previous brightness, or full if never lit.
            let previous = {
                let inner = self.inner.lock().expect("light lock poisoned");
                inner.brightness
            };
            self.set_brightness(if previous > 0 { previous } else { 255 });
        } else {
            self.set_brightness(0);
        }
    }

    /// Apply a decoded pair-state report from a matched frame. Updates the
    /// stored pair and notifies observers only when something changed.
    pub(crate) fn update_from_frame(&self, state_bit: bool, brightness: u8) -> bool {
        let (state, brightness) = protocol::derive_state(state_bit, brightness);
        let snap = Snapshot { state, brightness };

        let changed = {
            let mut inner = self.inner.lock().expect("light lock poisoned");
            if inner.state != snap.state || inner.brightness != snap.brightness {
                inner.state = snap.state;
                inner.brightness = snap.brightness;
                true
            } else {
                false
            }
        };

        if changed {
            tracing::debug!(
                device_id = self.core.device_id,
                slot = %self.core.slot_label(),
                state = snap.state,
                brightness = snap.brightness,
                "light state updated from bus"
            );
            self.observers.notify(snap);
        }
        changed
    }

    /// Restore persisted state without sending a command or notifying; the
    /// bus will reconcile on the first matched frame.
    pub(crate) fn restore(&self, snapshot: Snapshot) {
        let mut inner = self.inner.lock().expect("light lock poisoned");
        inner.state = snapshot.state && snapshot.brightness > 0;
        inner.brightness = if inner.state { snapshot.brightness } else { 0 };
    }

    /// Silent interpolation write from a transition tick. Returns `false`
    /// when the run was cancelled; the flag is re-checked under the lock so a
    /// cancelling command's frame is always the last one sent.
    pub(crate) fn transition_write(&self, cancel: &AtomicBool, brightness: u8) -> bool {
        let mut inner = self.inner.lock().expect("light lock poisoned");
        if cancel.load(Ordering::Acquire) {
            return false;
        }
        inner.state = brightness > 0;
        inner.brightness = brightness;
        self.core.send_command(inner.state, brightness);
        true
    }

    /// Final transition tick: write the exact target, drop the handle, and
    /// notify once.
    pub(crate) fn finish_transition(&self, cancel: &AtomicBool, target: u8) {
        let snap = normalize_level(target);
        {
            let mut inner = self.inner.lock().expect("light lock poisoned");
            if cancel.load(Ordering::Acquire) {
                return;
            }
            inner.state = snap.state;
            inner.brightness = snap.brightness;
            inner.active = None;
            self.core.send_command(snap.state, snap.brightness);
        }
        self.observers.notify(snap);
    }

    /// Flash phase write: apply and notify (flash phases are visible, unlike
    /// transition ramps). Returns `false` when cancelled.
    pub(crate) fn flash_apply(&self, cancel: &AtomicBool, snap: Snapshot) -> bool {
        {
            let mut inner = self.inner.lock().expect("light lock poisoned");
            if cancel.load(Ordering::Acquire) {
                return false;
            }
            inner.state = snap.state;
            inner.brightness = snap.brightness;
            self.core.send_command(snap.state, snap.brightness);
        }
        self.observers.notify(snap);
        true
    }

    /// Natural flash completion: restore the snapshot and drop the handle.
    pub(crate) fn finish_flash(&self, cancel: &AtomicBool, previous: Snapshot) {
        {
            let mut inner = self.inner.lock().expect("light lock poisoned");
            if cancel.load(Ordering::Acquire) {
                return;
            }
            inner.state = previous.state;
            inner.brightness = previous.brightness;
            inner.active = None;
            self.core.send_command(previous.state, previous.brightness);
        }
        self.observers.notify(previous);
    }
}

fn cancel_active(inner: &mut LightInner) {
    if let Some(handle) = inner.active.take() {
        handle.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::testutil::MockSink;
    use std::sync::atomic::AtomicUsize;

    fn light_s5_device8(sink: Arc<MockSink>) -> Arc<DimmableLight> {
        DimmableLight::new(OutputCore::new(8, 4, "deck_light", "Deck Light", sink))
    }

    #[tokio::test]
    async fn test_set_brightness_command_boundaries() {
        let sink = MockSink::new();
        let light = light_s5_device8(sink.clone());

        light.set_brightness(0);
        light.set_brightness(150);
        light.set_brightness(254);

        let frames = sink.sent();
        assert_eq!(frames.len(), 3);
        for frame in &frames {
            assert_eq!(frame.arb_id(), 0x023606C0);
            assert!(frame.is_extended());
        }
        assert_eq!(frames[0].data(), &[4, 0x00, 0, 0]);
        assert_eq!(frames[1].data(), &[4, 0x11, 0, 150]);
        assert_eq!(frames[2].data(), &[4, 0x01, 0, 0]);
    }

    #[tokio::test]
    async fn test_set_brightness_notifies_normalized_snapshot() {
        let sink = MockSink::new();
        let light = light_s5_device8(sink);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        light.subscribe(move |snap| log.lock().unwrap().push(snap));

        light.set_brightness(150);
        light.set_brightness(1);

        let snaps = seen.lock().unwrap().clone();
        assert_eq!(snaps.len(), 2);
        assert_eq!(
            snaps[0],
            Snapshot {
                state: true,
                brightness: 150
            }
        );
        // Sub-threshold request is exposed as plain OFF.
        assert_eq!(snaps[1], Snapshot::OFF);
    }

    #[tokio::test]
    async fn test_fade_completes_at_target() {
        let sink = MockSink::new();
        let light = light_s5_device8(sink.clone());

        let notifications = Arc::new(AtomicUsize::new(0));
        let seen = notifications.clone();
        light.subscribe(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        light.fade_to(200, Duration::from_millis(300), Some(EasingKind::Linear));
        tokio::time::sleep(Duration::from_millis(800)).await;

        assert_eq!(
            light.snapshot(),
            Snapshot {
                state: true,
                brightness: 200
            }
        );
        // Silent ramp, exactly one completion notify.
        assert_eq!(notifications.load(Ordering::SeqCst), 1);
        // The ramp produced intermediate frames plus the final one.
        assert!(sink.sent_count() >= 2);
        let last = *sink.sent().last().unwrap();
        assert_eq!(last.data(), &[4, 0x11, 0, 200]);
    }

    #[tokio::test]
    async fn test_fade_to_current_brightness_is_noop() {
        let sink = MockSink::new();
        let light = light_s5_device8(sink.clone());

        light.set_brightness(100);
        let before = sink.sent_count();

        light.fade_to(100, Duration::from_millis(200), None);
        tokio::time::sleep(Duration::from_millis(400)).await;

        assert_eq!(sink.sent_count(), before);
    }

    #[tokio::test]
    async fn test_off_cancels_fade_with_no_trailing_frames() {
        let sink = MockSink::new();
        let light = light_s5_device8(sink.clone());

        light.fade_to(255, Duration::from_secs(5), Some(EasingKind::Linear));
        tokio::time::sleep(Duration::from_millis(450)).await;

        light.set_brightness(0);
        let count_after_off = sink.sent_count();
        let off_frame = *sink.sent().last().unwrap();
        assert_eq!(off_frame.data(), &[4, 0x00, 0, 0]);

        // One full cadence later, nothing new was sent.
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(sink.sent_count(), count_after_off);
        assert_eq!(light.snapshot(), Snapshot::OFF);
    }

    #[tokio::test]
    async fn test_flash_restores_previous_state() {
        let sink = MockSink::new();
        let light = light_s5_device8(sink.clone());

        light.set_brightness(80);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        light.subscribe(move |snap| log.lock().unwrap().push(snap));

        light.flash(Duration::from_millis(200));
        tokio::time::sleep(Duration::from_millis(600)).await;

        let snaps = seen.lock().unwrap().clone();
        assert_eq!(snaps.len(), 2);
        assert_eq!(
            snaps[0],
            Snapshot {
                state: true,
                brightness: 255
            }
        );
        assert_eq!(
            snaps[1],
            Snapshot {
                state: true,
                brightness: 80
            }
        );
        assert_eq!(
            light.snapshot(),
            Snapshot {
                state: true,
                brightness: 80
            }
        );
    }

    #[tokio::test]
    async fn test_set_precedence_flash_over_transition() {
        let sink = MockSink::new();
        let light = light_s5_device8(sink.clone());

        light.set(&SetRequest {
            state: true,
            brightness: Some(40),
            transition: Some(Duration::from_secs(3)),
            effect: None,
            flash: Some(Duration::from_millis(150)),
        });
        tokio::time::sleep(Duration::from_millis(500)).await;

        // Flash won: ON@255 then restore, never a fade toward 40.
        assert_eq!(light.snapshot(), Snapshot::OFF);
        let first = sink.sent()[0];
        assert_eq!(first.data(), &[4, 0x01, 0, 0]);
    }

    #[tokio::test]
    async fn test_set_effect_only_stores_easing_without_command() {
        let sink = MockSink::new();
        let light = light_s5_device8(sink.clone());

        light.set(&SetRequest {
            state: true,
            effect: Some(EasingKind::EaseInCubic),
            ..Default::default()
        });

        assert_eq!(light.default_easing(), Some(EasingKind::EaseInCubic));
        assert_eq!(sink.sent_count(), 0);
        assert_eq!(light.snapshot(), Snapshot::OFF);
    }

    #[tokio::test]
    async fn test_set_state_on_restores_previous_brightness() {
        let sink = MockSink::new();
        let light = light_s5_device8(sink.clone());

        light.set_brightness(120);
        light.set_brightness(0);

        light.set(&SetRequest {
            state: true,
            ..Default::default()
        });

        // Brightness 0 was stored on OFF, so ON falls back to full.
        assert_eq!(
            light.snapshot(),
            Snapshot {
                state: true,
                brightness: 255
            }
        );
    }

    #[tokio::test]
    async fn test_update_from_frame_quirk_and_change_detection() {
        let sink = MockSink::new();
        let light = light_s5_device8(sink);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        light.subscribe(move |snap| log.lock().unwrap().push(snap));

        // Hardware-ON without PWM: surfaced as full brightness.
        assert!(light.update_from_frame(true, 0));
        // Same report again: no change, no notify.
        assert!(!light.update_from_frame(true, 0));

        let snaps = seen.lock().unwrap().clone();
        assert_eq!(snaps.len(), 1);
        assert_eq!(
            snaps[0],
            Snapshot {
                state: true,
                brightness: 255
            }
        );
    }

    #[tokio::test]
    async fn test_restore_is_silent_and_normalized() {
        let sink = MockSink::new();
        let light = light_s5_device8(sink.clone());

        light.restore(Snapshot {
            state: true,
            brightness: 90,
        });
        assert_eq!(
            light.snapshot(),
            Snapshot {
                state: true,
                brightness: 90
            }
        );

        // An inconsistent persisted pair collapses to OFF.
        light.restore(Snapshot {
            state: true,
            brightness: 0,
        });
        assert_eq!(light.snapshot(), Snapshot::OFF);
        assert_eq!(sink.sent_count(), 0);
    }
}
