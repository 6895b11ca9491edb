//! Time-driven brightness transitions and flash effects.
//!
//! A transition is a finite producer of brightness samples at a fixed 10 Hz
//! cadence. Intermediate writes are silent (no observer traffic); the final
//! tick notifies once with the final snapshot. Each run carries a shared
//! cancellation flag checked under the light's lock before every send, so a
//! cancelling command's frame is always the last one on the wire.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::core::easing::EasingKind;
use crate::device::light::DimmableLight;
use crate::device::output::Snapshot;

/// Tick cadence: 100 ms per frame, at most ~60 frames/s across six lights.
pub const TICK: Duration = Duration::from_millis(100);

/// Handle to a running transition or flash.
pub(crate) struct TransitionHandle {
    cancel: Arc<AtomicBool>,
    #[allow(dead_code)]
    task: JoinHandle<()>,
}

impl TransitionHandle {
    /// Request cancellation. The run observes the flag at its next tick
    /// (within one cadence) and terminates without emitting further frames.
    pub(crate) fn cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }
}

/// Interpolated brightness at normalized progress `t`.
fn sample(start: u8, target: u8, easing: EasingKind, t: f64) -> u8 {
    let eased = easing.apply(t);
    let value = start as f64 + (target as f64 - start as f64) * eased;
    value.round().clamp(0.0, 255.0) as u8
}

/// Start a brightness transition on `light`.
pub(crate) fn start_transition(
    light: Arc<DimmableLight>,
    start: u8,
    target: u8,
    duration: Duration,
    easing: EasingKind,
) -> TransitionHandle {
    let cancel = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&cancel);

    let task = tokio::spawn(async move {
        tracing::debug!(
            device_id = light.core().device_id,
            slot = %light.core().slot_label(),
            start,
            target,
            duration_ms = duration.as_millis() as u64,
            easing = %easing,
            "transition started"
        );

        let begun = Instant::now();
        loop {
            tokio::time::sleep(TICK).await;

            if flag.load(Ordering::Acquire) {
                tracing::debug!(
                    slot = %light.core().slot_label(),
                    "transition cancelled"
                );
                return;
            }

            let t = if duration.is_zero() {
                1.0
            } else {
                (begun.elapsed().as_secs_f64() / duration.as_secs_f64()).clamp(0.0, 1.0)
            };

            if t >= 1.0 {
                light.finish_transition(&flag, target);
                tracing::debug!(
                    slot = %light.core().slot_label(),
                    target,
                    "transition completed"
                );
                return;
            }

            let brightness = sample(start, target, easing, t);
            if !light.transition_write(&flag, brightness) {
                return;
            }
        }
    });

    TransitionHandle { cancel, task }
}

/// Start a flash on `light`: full brightness, hold, restore `previous`.
///
/// The restore happens only on natural completion; a cancelling command wins
/// and no restore frame is emitted.
pub(crate) fn start_flash(
    light: Arc<DimmableLight>,
    duration: Duration,
    previous: Snapshot,
) -> TransitionHandle {
    let cancel = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&cancel);

    let task = tokio::spawn(async move {
        tracing::debug!(
            device_id = light.core().device_id,
            slot = %light.core().slot_label(),
            duration_ms = duration.as_millis() as u64,
            "flash started"
        );

        if !light.flash_apply(
            &flag,
            Snapshot {
                state: true,
                brightness: 255,
            },
        ) {
            return;
        }

        let begun = Instant::now();
        loop {
            let remaining = duration.saturating_sub(begun.elapsed());
            if remaining.is_zero() {
                break;
            }
            tokio::time::sleep(remaining.min(TICK)).await;

            if flag.load(Ordering::Acquire) {
                tracing::debug!(slot = %light.core().slot_label(), "flash cancelled");
                return;
            }
        }

        light.finish_flash(&flag, previous);
        tracing::debug!(
            slot = %light.core().slot_label(),
            "flash completed, state restored"
        );
    });

    TransitionHandle { cancel, task }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_endpoints() {
        assert_eq!(sample(0, 255, EasingKind::Linear, 0.0), 0);
        assert_eq!(sample(0, 255, EasingKind::Linear, 1.0), 255);
        assert_eq!(sample(255, 0, EasingKind::Linear, 1.0), 0);
    }

    #[test]
    fn test_sample_midpoint_linear() {
        assert_eq!(sample(0, 200, EasingKind::Linear, 0.5), 100);
        // Downward fade interpolates the same way.
        assert_eq!(sample(200, 0, EasingKind::Linear, 0.5), 100);
    }

    #[test]
    fn test_sample_never_overshoots() {
        for i in 0..=100 {
            let t = i as f64 / 100.0;
            let v = sample(10, 240, EasingKind::EaseInOutQuart, t);
            assert!((10..=240).contains(&v));
        }
    }
}
