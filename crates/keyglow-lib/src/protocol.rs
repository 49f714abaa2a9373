//! Shared constants and flag types for the keyboard engine.
//!
//! Timing values come from observed hardware behaviour: keyboards lock up
//! when sent packets back-to-back, so every device gets at most one packet
//! per tick and ticks never come closer than [`MIN_TICK_SLEEP`].

use std::time::Duration;

use bitflags::bitflags;

/// Number of device slots, including the root controller at index 0.
pub const DEV_MAX: usize = 9;

/// Index of the always-present root controller.
pub const ROOT_INDEX: usize = 0;

// ── Frame pacing ──

/// Default frame rate when neither the config file nor `--fps` sets one.
pub const DEFAULT_FPS: u32 = 30;

/// USB packets per lighting frame for ordinary firmware.
pub const PACKETS_PER_FRAME: u32 = 5;

/// USB packets per lighting frame for v1.20+ firmware.
pub const PACKETS_PER_FRAME_V120: u32 = 12;

/// First firmware version that accepts the higher packet rate.
pub const FIRMWARE_V120: u16 = 0x0120;

/// Shortest sleep between ticks. Anything shorter can freeze the keyboard.
pub const MIN_TICK_SLEEP: Duration = Duration::from_micros(100);

/// Per-lock bound used while shutting down.
pub const SHUTDOWN_LOCK_TIMEOUT: Duration = Duration::from_secs(1);

// ── USB ──

/// Corsair vendor id.
pub const CORSAIR_VID: u16 = 0x1b1c;

/// USB interface class for HID.
pub const USB_CLASS_HID: u8 = 0x03;

/// HID class request: SET_REPORT.
pub const HID_SET_REPORT: u8 = 0x09;

/// HID report type "output", placed in the high byte of `wValue`.
pub const HID_REPORT_TYPE_OUTPUT: u16 = 0x02;

/// Bound on a single blocking control transfer.
pub const USB_TIMEOUT: Duration = Duration::from_millis(500);

/// Maximum size of one report on the wire.
pub const REPORT_SIZE: usize = 64;

/// Header bytes in a lighting report: `[kind, plane, chunk, len]`.
pub const LIGHTING_HEADER_SIZE: usize = 4;

/// Report kind byte for lighting plane chunks.
pub const REPORT_LIGHTING: u8 = 0x7f;

/// Number of LEDs addressed when a model is unknown.
pub const DEFAULT_LED_COUNT: usize = 144;

// ── Command channel ──

/// Upper bound on bytes read from one command channel in one tick.
pub const MAX_INTAKE_BYTES: usize = 16 * 1024;

/// Longest layout code accepted on the command line or channel.
pub const MAX_LAYOUT_LEN: usize = 9;

bitflags! {
    /// Device capability flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Features: u32 {
        /// Per-key RGB lighting.
        const RGB = 0x01;
        /// Key press notifications to clients.
        const NOTIFY = 0x02;
        /// Key rebinding.
        const BIND = 0x04;
    }
}

impl Features {
    /// Features enabled for a freshly attached keyboard, before masking.
    pub const KEYBOARD_DEFAULT: Features = Features::RGB
        .union(Features::NOTIFY)
        .union(Features::BIND);

    /// Features of the root controller, before masking.
    pub const ROOT_DEFAULT: Features = Features::NOTIFY;
}

bitflags! {
    /// Keyboard indicator LEDs, in HID boot-protocol bit order.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Indicators: u8 {
        const NUM_LOCK = 0x01;
        const CAPS_LOCK = 0x02;
        const SCROLL_LOCK = 0x04;
    }
}
