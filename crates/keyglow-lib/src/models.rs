//! Model profiles: known keyboards and their LED counts.
//!
//! Unknown product ids get `None` from [`detect_model`]; callers fall back
//! to [`DEFAULT_LED_COUNT`](crate::protocol::DEFAULT_LED_COUNT) LEDs.

use crate::protocol::DEFAULT_LED_COUNT;

/// Static description of a supported keyboard.
#[derive(Debug)]
pub struct ModelProfile {
    pub name: &'static str,
    pub product_id: u16,
    /// Addressable LEDs, one per key plus logo/indicator zones.
    pub led_count: usize,
}

static MODELS: [ModelProfile; 3] = [
    ModelProfile {
        name: "K65 RGB",
        product_id: 0x1b17,
        led_count: DEFAULT_LED_COUNT,
    },
    ModelProfile {
        name: "K70 RGB",
        product_id: 0x1b13,
        led_count: DEFAULT_LED_COUNT,
    },
    ModelProfile {
        name: "K95 RGB",
        product_id: 0x1b11,
        led_count: DEFAULT_LED_COUNT,
    },
];

/// Look up a model profile by USB product id.
pub fn detect_model(product_id: u16) -> Option<&'static ModelProfile> {
    MODELS.iter().find(|m| m.product_id == product_id)
}

/// Whether the product id belongs to a keyboard this daemon drives.
pub fn is_supported(product_id: u16) -> bool {
    detect_model(product_id).is_some()
}

/// LED count for a product id, falling back to the default.
pub fn led_count(product_id: u16) -> usize {
    detect_model(product_id)
        .map(|m| m.led_count)
        .unwrap_or(DEFAULT_LED_COUNT)
}
