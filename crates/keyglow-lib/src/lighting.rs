//! Per-key lighting state and color parsing.
//!
//! Colors on the command channel are `rrggbb` hex, with or without `#`.

use std::fmt;

/// 24-bit key color.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const BLACK: Rgb = Rgb { r: 0, g: 0, b: 0 };
    pub const WHITE: Rgb = Rgb {
        r: 0xff,
        g: 0xff,
        b: 0xff,
    };

    pub fn new(r: u8, g: u8, b: u8) -> Self {
        Rgb { r, g, b }
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

/// Parse a color string into [`Rgb`].
///
/// Accepts `"ff0000"`, `"#FF0000"` and the names `red`, `green`, `blue`,
/// `white`, `off`/`black`.
pub fn parse_color(s: &str) -> crate::error::Result<Rgb> {
    let s = s.trim();

    match s.to_lowercase().as_str() {
        "red" => return Ok(Rgb::new(0xff, 0, 0)),
        "green" => return Ok(Rgb::new(0, 0xff, 0)),
        "blue" => return Ok(Rgb::new(0, 0, 0xff)),
        "white" => return Ok(Rgb::WHITE),
        "off" | "black" => return Ok(Rgb::BLACK),
        _ => {}
    }

    let hex = s.strip_prefix('#').unwrap_or(s);
    if hex.len() != 6 {
        return Err(crate::KeyglowError::Color(format!(
            "Invalid color: {s} (use rrggbb or a color name)"
        )));
    }
    if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(crate::KeyglowError::Color(format!("Invalid hex color: {s}")));
    }
    let val = u32::from_str_radix(hex, 16)
        .map_err(|_| crate::KeyglowError::Color(format!("Invalid hex color: {s}")))?;
    Ok(Rgb::new((val >> 16) as u8, (val >> 8) as u8, val as u8))
}

/// Lighting state of one keyboard, indexed by LED.
#[derive(Debug, Clone, PartialEq)]
pub struct Lighting {
    pub enabled: bool,
    colors: Vec<Rgb>,
    /// Changed since the last frame was queued.
    dirty: bool,
}

impl Lighting {
    /// All LEDs white, output enabled, nothing pending.
    pub fn new(led_count: usize) -> Self {
        Lighting {
            enabled: true,
            colors: vec![Rgb::WHITE; led_count],
            dirty: false,
        }
    }

    pub fn led_count(&self) -> usize {
        self.colors.len()
    }

    pub fn color(&self, index: usize) -> Option<Rgb> {
        self.colors.get(index).copied()
    }

    /// Colors as they should appear on the keyboard (black when disabled).
    pub fn effective_colors(&self) -> Vec<Rgb> {
        if self.enabled {
            self.colors.clone()
        } else {
            vec![Rgb::BLACK; self.colors.len()]
        }
    }

    pub fn fill(&mut self, color: Rgb) {
        self.colors.iter_mut().for_each(|c| *c = color);
        self.dirty = true;
    }

    /// Set a single LED. Out-of-range indices are ignored; callers validate first.
    pub fn set(&mut self, index: usize, color: Rgb) {
        if let Some(c) = self.colors.get_mut(index) {
            *c = color;
            self.dirty = true;
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        if self.enabled != enabled {
            self.enabled = enabled;
            self.dirty = true;
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }
}
