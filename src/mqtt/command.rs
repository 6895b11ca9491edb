//! Home-Assistant light command grammar.
//!
//! Commands arrive either as a JSON document or as a plain `ON`/`OFF`
//! string:
//!
//! ```json
//! { "state": "ON"|"OFF",
//!   "brightness": 0..255,
//!   "transition": <seconds, float>,
//!   "effect": "<easing name>",
//!   "flash": "short"|"long"|<seconds>,
//!   "timestamp": <epoch seconds> }
//! ```
//!
//! The optional `timestamp` feeds the retained-command age gate.

use std::time::Duration;

use serde::Deserialize;

use crate::core::easing::EasingKind;
use crate::core::error::{BridgeError, Result};
use crate::device::SetRequest;

/// Flash duration published as "short" in discovery.
pub const FLASH_SHORT: Duration = Duration::from_secs(2);

/// Flash duration published as "long" in discovery.
pub const FLASH_LONG: Duration = Duration::from_secs(10);

/// A parsed light command.
#[derive(Debug, Clone, PartialEq)]
pub struct LightCommand {
    /// Target state.
    pub state: bool,
    /// Target brightness.
    pub brightness: Option<u8>,
    /// Fade duration.
    pub transition: Option<Duration>,
    /// Easing to store/use.
    pub effect: Option<EasingKind>,
    /// Flash duration.
    pub flash: Option<Duration>,
    /// Message creation time, seconds since the Unix epoch.
    pub timestamp: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FlashArg {
    Named(String),
    Seconds(f64),
}

#[derive(Debug, Deserialize)]
struct RawCommand {
    state: Option<String>,
    brightness: Option<u8>,
    transition: Option<f64>,
    effect: Option<String>,
    flash: Option<FlashArg>,
    timestamp: Option<f64>,
}

fn parse_state(s: &str) -> Result<bool> {
    match s {
        "ON" => Ok(true),
        "OFF" => Ok(false),
        other => Err(BridgeError::MqttParse(format!(
            "invalid state '{}' (expected ON or OFF)",
            other
        ))),
    }
}

fn parse_seconds(value: f64, what: &str) -> Result<Duration> {
    if !value.is_finite() || value < 0.0 {
        return Err(BridgeError::MqttParse(format!(
            "invalid {} duration: {}",
            what, value
        )));
    }
    Ok(Duration::from_secs_f64(value))
}

impl LightCommand {
    /// Parse a command payload: JSON document or plain `ON`/`OFF`.
    pub fn parse(payload: &str) -> Result<Self> {
        let trimmed = payload.trim();

        if trimmed == "ON" || trimmed == "OFF" {
            return Ok(Self {
                state: trimmed == "ON",
                brightness: None,
                transition: None,
                effect: None,
                flash: None,
                timestamp: None,
            });
        }

        let raw: RawCommand = serde_json::from_str(trimmed)
            .map_err(|e| BridgeError::MqttParse(format!("invalid command payload: {}", e)))?;

        let state = match raw.state.as_deref() {
            Some(s) => parse_state(s)?,
            None => true,
        };

        let transition = raw
            .transition
            .map(|secs| parse_seconds(secs, "transition"))
            .transpose()?;

        let effect = raw
            .effect
            .as_deref()
            .map(str::parse::<EasingKind>)
            .transpose()?;

        let flash = match raw.flash {
            None => None,
            Some(FlashArg::Named(name)) => match name.as_str() {
                "short" => Some(FLASH_SHORT),
                "long" => Some(FLASH_LONG),
                other => {
                    return Err(BridgeError::MqttParse(format!(
                        "invalid flash '{}' (expected short, long or seconds)",
                        other
                    )));
                }
            },
            Some(FlashArg::Seconds(secs)) => Some(parse_seconds(secs, "flash")?),
        };

        Ok(Self {
            state,
            brightness: raw.brightness,
            transition,
            effect,
            flash,
            timestamp: raw.timestamp,
        })
    }

    /// Convert to the light's composite request.
    pub fn to_request(&self) -> SetRequest {
        SetRequest {
            state: self.state,
            brightness: self.brightness,
            transition: self.transition,
            effect: self.effect,
            flash: self.flash,
        }
    }
}

/// Parse a switch command payload: plain `ON`/`OFF`, or a JSON document
/// whose `state` field is used (the `timestamp` still feeds the age gate).
pub fn parse_switch_command(payload: &str) -> Result<(bool, Option<f64>)> {
    let command = LightCommand::parse(payload)?;
    Ok((command.state, command.timestamp))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_on_off() {
        let cmd = LightCommand::parse("ON").unwrap();
        assert!(cmd.state);
        assert_eq!(cmd.brightness, None);

        let cmd = LightCommand::parse(" OFF ").unwrap();
        assert!(!cmd.state);
    }

    #[test]
    fn test_json_full_command() {
        let cmd = LightCommand::parse(
            r#"{"state":"ON","brightness":128,"transition":2.5,"effect":"ease_in_cubic"}"#,
        )
        .unwrap();
        assert!(cmd.state);
        assert_eq!(cmd.brightness, Some(128));
        assert_eq!(cmd.transition, Some(Duration::from_millis(2500)));
        assert_eq!(cmd.effect, Some(EasingKind::EaseInCubic));
        assert_eq!(cmd.flash, None);
    }

    #[test]
    fn test_state_defaults_to_on() {
        let cmd = LightCommand::parse(r#"{"brightness":40}"#).unwrap();
        assert!(cmd.state);
        assert_eq!(cmd.brightness, Some(40));
    }

    #[test]
    fn test_flash_named_and_numeric() {
        let cmd = LightCommand::parse(r#"{"state":"ON","flash":"short"}"#).unwrap();
        assert_eq!(cmd.flash, Some(FLASH_SHORT));

        let cmd = LightCommand::parse(r#"{"state":"ON","flash":"long"}"#).unwrap();
        assert_eq!(cmd.flash, Some(FLASH_LONG));

        let cmd = LightCommand::parse(r#"{"state":"ON","flash":1.5}"#).unwrap();
        assert_eq!(cmd.flash, Some(Duration::from_millis(1500)));

        assert!(LightCommand::parse(r#"{"state":"ON","flash":"blink"}"#).is_err());
    }

    #[test]
    fn test_timestamp_passthrough() {
        let cmd = LightCommand::parse(r#"{"state":"ON","timestamp":1700000000.5}"#).unwrap();
        assert_eq!(cmd.timestamp, Some(1700000000.5));
    }

    #[test]
    fn test_invalid_payloads() {
        assert!(LightCommand::parse("on").is_err());
        assert!(LightCommand::parse("{not json").is_err());
        assert!(LightCommand::parse(r#"{"state":"MAYBE"}"#).is_err());
        assert!(LightCommand::parse(r#"{"state":"ON","effect":"ease_in_bounce"}"#).is_err());
        assert!(LightCommand::parse(r#"{"state":"ON","transition":-1}"#).is_err());
        assert!(LightCommand::parse(r#"{"state":"ON","brightness":300}"#).is_err());
    }

    #[test]
    fn test_switch_command() {
        assert_eq!(parse_switch_command("ON").unwrap(), (true, None));
        assert_eq!(parse_switch_command("OFF").unwrap(), (false, None));
        let (state, ts) =
            parse_switch_command(r#"{"state":"OFF","timestamp":1700000000}"#).unwrap();
        assert!(!state);
        assert_eq!(ts, Some(1700000000.0));
        assert!(parse_switch_command("TOGGLE").is_err());
    }

    #[test]
    fn test_to_request() {
        let cmd = LightCommand::parse(r#"{"state":"OFF"}"#).unwrap();
        let request = cmd.to_request();
        assert!(!request.state);
        assert!(request.brightness.is_none());
    }
}
