//! Easing functions for brightness transitions.
//!
//! All easings map progress `t ∈ [0, 1]` to an eased value in `[0, 1]` with
//! `f(0) = 0` and `f(1) = 1`. The set matches the curves advertised in the
//! Home Assistant effect list.

use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

use crate::core::error::BridgeError;

/// Easing curve for a brightness transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EasingKind {
    Linear,
    EaseInSine,
    EaseOutSine,
    EaseInOutSine,
    EaseInQuad,
    EaseOutQuad,
    EaseInOutQuad,
    EaseInCubic,
    EaseOutCubic,
    EaseInOutCubic,
    EaseInQuart,
    EaseOutQuart,
    EaseInOutQuart,
}

impl EasingKind {
    /// All easings, in the order advertised to Home Assistant.
    pub const ALL: [EasingKind; 13] = [
        Self::Linear,
        Self::EaseInSine,
        Self::EaseOutSine,
        Self::EaseInOutSine,
        Self::EaseInQuad,
        Self::EaseOutQuad,
        Self::EaseInOutQuad,
        Self::EaseInCubic,
        Self::EaseOutCubic,
        Self::EaseInOutCubic,
        Self::EaseInQuart,
        Self::EaseOutQuart,
        Self::EaseInOutQuart,
    ];

    /// Default easing for natural-looking transitions.
    pub const DEFAULT: EasingKind = Self::EaseInOutSine;

    /// Wire/config name of this easing.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Linear => "linear",
            Self::EaseInSine => "ease_in_sine",
            Self::EaseOutSine => "ease_out_sine",
            Self::EaseInOutSine => "ease_in_out_sine",
            Self::EaseInQuad => "ease_in_quad",
            Self::EaseOutQuad => "ease_out_quad",
            Self::EaseInOutQuad => "ease_in_out_quad",
            Self::EaseInCubic => "ease_in_cubic",
            Self::EaseOutCubic => "ease_out_cubic",
            Self::EaseInOutCubic => "ease_in_out_cubic",
            Self::EaseInQuart => "ease_in_quart",
            Self::EaseOutQuart => "ease_out_quart",
            Self::EaseInOutQuart => "ease_in_out_quart",
        }
    }

    /// Pick an easing for a fade when the caller specified none and no
    /// default has been stored: fading up from dark accelerates out, fading
    /// down to dark decelerates in, everything else is symmetric.
    pub fn auto_for(start_brightness: u8, target_brightness: u8) -> EasingKind {
        if start_brightness == 0 && target_brightness > 0 {
            Self::EaseOutCubic
        } else if target_brightness == 0 && start_brightness > 0 {
            Self::EaseInCubic
        } else {
            Self::EaseInOutSine
        }
    }

    /// Apply the easing to a progress value. `t` is clamped to `[0, 1]`.
    pub fn apply(&self, t: f64) -> f64 {
        let t = t.clamp(0.0, 1.0);
        match self {
            Self::Linear => t,
            Self::EaseInSine => 1.0 - ((t * PI) / 2.0).cos(),
            Self::EaseOutSine => ((t * PI) / 2.0).sin(),
            Self::EaseInOutSine => -((PI * t).cos() - 1.0) / 2.0,
            Self::EaseInQuad => t * t,
            Self::EaseOutQuad => 1.0 - (1.0 - t) * (1.0 - t),
            Self::EaseInOutQuad => {
                if t < 0.5 {
                    2.0 * t * t
                } else {
                    1.0 - (-2.0 * t + 2.0).powi(2) / 2.0
                }
            }
            Self::EaseInCubic => t * t * t,
            Self::EaseOutCubic => 1.0 - (1.0 - t).powi(3),
            Self::EaseInOutCubic => {
                if t < 0.5 {
                    4.0 * t * t * t
                } else {
                    1.0 - (-2.0 * t + 2.0).powi(3) / 2.0
                }
            }
            Self::EaseInQuart => t * t * t * t,
            Self::EaseOutQuart => 1.0 - (1.0 - t).powi(4),
            Self::EaseInOutQuart => {
                if t < 0.5 {
                    8.0 * t * t * t * t
                } else {
                    1.0 - (-2.0 * t + 2.0).powi(4) / 2.0
                }
            }
        }
    }
}

impl Default for EasingKind {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for EasingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EasingKind {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|e| e.as_str() == s)
            .ok_or_else(|| BridgeError::MqttParse(format!("unknown easing: {}", s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoints() {
        for easing in EasingKind::ALL {
            assert!(
                easing.apply(0.0).abs() < 1e-9,
                "{} f(0) != 0",
                easing.as_str()
            );
            assert!(
                (easing.apply(1.0) - 1.0).abs() < 1e-9,
                "{} f(1) != 1",
                easing.as_str()
            );
        }
    }

    #[test]
    fn test_monotone() {
        // Sampled monotonicity; every curve in the set is non-decreasing.
        for easing in EasingKind::ALL {
            let mut prev = 0.0;
            for i in 0..=100 {
                let v = easing.apply(i as f64 / 100.0);
                assert!(
                    v >= prev - 1e-9,
                    "{} not monotone at t={}",
                    easing.as_str(),
                    i
                );
                prev = v;
            }
        }
    }

    #[test]
    fn test_clamps_out_of_range() {
        assert_eq!(EasingKind::Linear.apply(-0.5), 0.0);
        assert_eq!(EasingKind::Linear.apply(1.5), 1.0);
    }

    #[test]
    fn test_name_round_trip() {
        for easing in EasingKind::ALL {
            assert_eq!(easing.as_str().parse::<EasingKind>().unwrap(), easing);
        }
        assert!("ease_in_bounce".parse::<EasingKind>().is_err());
    }

    #[test]
    fn test_auto_selection() {
        assert_eq!(EasingKind::auto_for(0, 255), EasingKind::EaseOutCubic);
        assert_eq!(EasingKind::auto_for(200, 0), EasingKind::EaseInCubic);
        assert_eq!(EasingKind::auto_for(40, 200), EasingKind::EaseInOutSine);
        assert_eq!(EasingKind::auto_for(0, 0), EasingKind::EaseInOutSine);
    }

    #[test]
    fn test_in_out_sine_midpoint() {
        assert!((EasingKind::EaseInOutSine.apply(0.5) - 0.5).abs() < 1e-9);
    }
}
