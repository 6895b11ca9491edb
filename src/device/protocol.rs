//! Bloc9 wire protocol.
//!
//! Every relevant extended arbitration ID carries the device's bus byte
//! `(device_id << 3) | 0x80` in its low 8 bits. Three frame kinds matter:
//!
//! - heartbeat `0x0000_0600 | B(d)`: availability only, payload ignored
//! - pair-state `0x0216/0x0218/0x021A_0600 | B(d)`: state of two consecutive
//!   outputs, 8 bytes
//! - command `0x0236_0600 | B(d)`: `[switch_nr, mode, 0x00, brightness]`,
//!   echoed back by the device
//!
//! Pair-state halves: low half bytes 0..3 (byte 0 brightness, byte 3 bit 0
//! state), high half bytes 4..7. Byte 2 of each half is a mode indicator
//! (0x11 while PWM dimming is active) and is not part of state extraction.

use crate::core::error::{BridgeError, Result};

/// Brightness at or below this level is driven as OFF; at or above
/// `255 - DIMMING_THRESHOLD` as full ON without PWM. Keeps LEDs from
/// flickering at the extremes of the PWM range.
pub const DIMMING_THRESHOLD: u8 = 2;

/// Heartbeat / low-priority status base pattern.
pub const HEARTBEAT_BASE: u32 = 0x0000_0600;

/// Pair-state base patterns for (S1,S2), (S3,S4), (S5,S6).
pub const PAIR_STATE_BASES: [u32; 3] = [0x0216_0600, 0x0218_0600, 0x021A_0600];

/// Command frame base pattern.
pub const COMMAND_BASE: u32 = 0x0236_0600;

/// Output mode byte in command frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OutputMode {
    /// Output driven off.
    Off = 0x00,
    /// Full on, no PWM.
    FullOn = 0x01,
    /// PWM dimming at the brightness byte.
    Dimming = 0x11,
}

/// The device bus byte: low 8 bits of every relevant arbitration ID.
#[inline]
pub const fn device_byte(device_id: u8) -> u32 {
    (((device_id as u32) << 3) | 0x80) & 0xFF
}

/// Heartbeat arbitration ID for a device.
#[inline]
pub const fn heartbeat_id(device_id: u8) -> u32 {
    HEARTBEAT_BASE | device_byte(device_id)
}

/// Pair-state arbitration ID for a device and pair index (0 = S1/S2,
/// 1 = S3/S4, 2 = S5/S6).
#[inline]
pub const fn pair_state_id(device_id: u8, pair: usize) -> u32 {
    PAIR_STATE_BASES[pair] | device_byte(device_id)
}

/// Command arbitration ID for a device.
#[inline]
pub const fn command_id(device_id: u8) -> u32 {
    COMMAND_BASE | device_byte(device_id)
}

/// Pair index owning a switch number (0..=5).
#[inline]
pub const fn pair_of(switch_nr: u8) -> usize {
    (switch_nr / 2) as usize
}

/// Raw half of a pair-state payload: `(state_bit, brightness_byte)`.
///
/// Even switch numbers (S1/S3/S5) live in bytes 0..3, odd ones (S2/S4/S6) in
/// bytes 4..7.
pub fn decode_half(data: &[u8], switch_nr: u8, arb_id: u32) -> Result<(bool, u8)> {
    if data.len() < 8 {
        return Err(BridgeError::FrameMalformed {
            arb_id,
            reason: format!("expected 8 bytes, got {}", data.len()),
        });
    }

    let (brightness, state_byte) = if switch_nr % 2 == 0 {
        (data[0], data[3])
    } else {
        (data[4], data[7])
    };

    Ok((state_byte & 0x01 == 0x01, brightness))
}

/// Derive the externally visible `(state, brightness)` pair from a reported
/// half.
///
/// Two rules on top of the raw bits:
/// - hardware-ON without PWM arrives as `state=1, brightness=0` and is
///   surfaced as brightness 255 (full-brightness quirk);
/// - sub-threshold brightness without the state bit is OFF, and an OFF pair
///   always exposes brightness 0 so `brightness == 0 ⇔ state == false` holds
///   everywhere downstream.
pub fn derive_state(state_bit: bool, brightness: u8) -> (bool, u8) {
    let state = state_bit || brightness > DIMMING_THRESHOLD;
    let brightness = if !state {
        0
    } else if brightness == 0 {
        255
    } else {
        brightness
    };
    (state, brightness)
}

/// Synthesize the command mode and wire brightness for a target pair.
pub fn synthesize_command(state: bool, brightness: u8) -> (OutputMode, u8) {
    if !state || brightness <= DIMMING_THRESHOLD {
        (OutputMode::Off, 0)
    } else if brightness >= 255 - DIMMING_THRESHOLD {
        (OutputMode::FullOn, 0)
    } else {
        (OutputMode::Dimming, brightness)
    }
}

/// Build the 4-byte command payload for a switch.
pub fn encode_command(switch_nr: u8, state: bool, brightness: u8) -> [u8; 4] {
    let (mode, wire_brightness) = synthesize_command(state, brightness);
    [switch_nr, mode as u8, 0x00, wire_brightness]
}
