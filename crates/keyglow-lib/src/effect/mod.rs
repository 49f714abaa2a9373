//! Lighting effect plug-in contract.
//!
//! An effect describes itself with a static [`EffectDescriptor`], receives
//! parameters as text, and paints into an [`EffectContext`] once per frame.
//! The host owns timing: `delta` is the fraction of the animation duration
//! elapsed since the previous frame.

use std::fmt;

pub mod gradient;
pub mod pinwheel;

pub use gradient::{Argb, Gradient};
pub use pinwheel::Pinwheel;

// ── Error type ──

#[derive(Debug, Clone, PartialEq)]
pub enum EffectError {
    /// Gradient string could not be parsed.
    InvalidGradient(String),
    UnknownParameter(String),
    InvalidValue { name: String, reason: String },
}

impl fmt::Display for EffectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EffectError::InvalidGradient(e) => write!(f, "Invalid gradient: {e}"),
            EffectError::UnknownParameter(p) => write!(f, "Unknown parameter: {p}"),
            EffectError::InvalidValue { name, reason } => {
                write!(f, "Invalid value for {name}: {reason}")
            }
        }
    }
}

impl std::error::Error for EffectError {}

// ── Descriptor ──

/// Type and default of one effect parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamKind {
    /// Gradient with alpha, in [`Gradient::parse`] syntax.
    AGradient { default: &'static str },
    Double { default: f64, min: f64, max: f64 },
    Bool { default: bool },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamSpec {
    pub name: &'static str,
    /// Label shown before the control.
    pub prefix: &'static str,
    /// Unit shown after the control.
    pub suffix: &'static str,
    pub kind: ParamKind,
}

impl ParamSpec {
    /// Default value in the text form `on_parameter` accepts.
    pub fn default_text(&self) -> String {
        match self.kind {
            ParamKind::AGradient { default } => default.to_string(),
            ParamKind::Double { default, .. } => default.to_string(),
            ParamKind::Bool { default } => (if default { "1" } else { "0" }).to_string(),
        }
    }
}

/// Named parameter set. `duration` is consumed by the host, not the effect.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Preset {
    pub name: &'static str,
    pub params: &'static [(&'static str, &'static str)],
}

/// Which key events the effect wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPressMode {
    None,
    Name,
    Position,
}

/// How the host advances time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeMode {
    /// `delta` is a fraction of the animation duration.
    Duration,
    /// `delta` is in seconds.
    Absolute,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EffectDescriptor {
    pub name: &'static str,
    pub version: &'static str,
    pub copyright_year: &'static str,
    pub author: &'static str,
    pub license: &'static str,
    /// Stable identifier, `{XXXXXXXX-XXXX-XXXX-XXXX-XXXXXXXXXXXX}`.
    pub guid: &'static str,
    pub description: &'static str,
    pub params: &'static [ParamSpec],
    pub presets: &'static [Preset],
    pub key_press_mode: KeyPressMode,
    pub time_mode: TimeMode,
    /// Parameters may change while the effect runs.
    pub live_params: bool,
    /// Restart automatically when the duration ends.
    pub repeat: bool,
}

impl EffectDescriptor {
    pub fn param(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.name == name)
    }

    pub fn preset(&self, name: &str) -> Option<&Preset> {
        self.presets.iter().find(|p| p.name == name)
    }
}

// ── Runtime context ──

/// One key as the effect sees it. Color is ARGB, not premultiplied.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyLight {
    pub name: String,
    pub x: f64,
    pub y: f64,
    pub a: u8,
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl KeyLight {
    /// Transparent key at `(x, y)`.
    pub fn new(name: impl Into<String>, x: f64, y: f64) -> Self {
        KeyLight {
            name: name.into(),
            x,
            y,
            a: 0,
            r: 0,
            g: 0,
            b: 0,
        }
    }

    pub fn argb(&self) -> Argb {
        Argb::new(self.a, self.r, self.g, self.b)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EffectContext {
    pub width: f64,
    pub height: f64,
    pub keys: Vec<KeyLight>,
}

impl EffectContext {
    pub fn new(width: f64, height: f64, keys: Vec<KeyLight>) -> Self {
        EffectContext {
            width,
            height,
            keys,
        }
    }

    /// Make every key transparent black.
    pub fn clear(&mut self) {
        for key in &mut self.keys {
            key.a = 0;
            key.r = 0;
            key.g = 0;
            key.b = 0;
        }
    }

    pub fn key(&self, name: &str) -> Option<&KeyLight> {
        self.keys.iter().find(|k| k.name == name)
    }
}

/// Composite `color` over `key` ("over" operator, straight alpha).
pub fn alpha_blend(key: &mut KeyLight, color: Argb) {
    if color.a == 0 {
        return;
    }
    let top = f64::from(color.a) / 255.0;
    let below = f64::from(key.a) / 255.0 * (1.0 - top);
    let out = top + below;
    let mix = |under: u8, over: u8| -> u8 {
        ((f64::from(over) * top + f64::from(under) * below) / out)
            .round()
            .clamp(0.0, 255.0) as u8
    };
    key.r = mix(key.r, color.r);
    key.g = mix(key.g, color.g);
    key.b = mix(key.b, color.b);
    key.a = (out * 255.0).round().clamp(0.0, 255.0) as u8;
}

/// Result of one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    Continue,
    /// The effect has nothing more to draw.
    Finished,
}

/// A lighting effect.
pub trait Effect {
    fn descriptor(&self) -> &'static EffectDescriptor;

    /// Set parameter `name` from its text form.
    fn on_parameter(&mut self, name: &str, value: &str) -> Result<(), EffectError>;

    /// Called once before the first frame, and again whenever the host restarts.
    fn init(&mut self, ctx: &EffectContext);

    /// Key press (`pressed`) or release. Only called if the key press mode asks.
    fn on_key(&mut self, ctx: &mut EffectContext, key: &str, x: f64, y: f64, pressed: bool);

    /// Advance by `delta` and paint `ctx.keys`.
    fn frame(&mut self, ctx: &mut EffectContext, delta: f64) -> FrameStatus;
}

/// Feed every declared parameter its default value.
pub fn load_defaults(effect: &mut dyn Effect) -> Result<(), EffectError> {
    for param in effect.descriptor().params {
        effect.on_parameter(param.name, &param.default_text())?;
    }
    Ok(())
}

/// Apply the preset called `name`. Returns the preset's duration, if it has one.
pub fn apply_preset(effect: &mut dyn Effect, name: &str) -> Result<Option<f64>, EffectError> {
    let preset = effect
        .descriptor()
        .preset(name)
        .ok_or_else(|| EffectError::UnknownParameter(format!("preset {name}")))?;
    let mut duration = None;
    for &(param, value) in preset.params {
        if param == "duration" {
            let d = parse_double(param, value)?;
            duration = Some(d);
        } else {
            effect.on_parameter(param, value)?;
        }
    }
    Ok(duration)
}

pub(crate) fn parse_double(name: &str, value: &str) -> Result<f64, EffectError> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| EffectError::InvalidValue {
            name: name.to_string(),
            reason: format!("not a number: {value}"),
        })
}

pub(crate) fn parse_bool(name: &str, value: &str) -> Result<bool, EffectError> {
    match value.trim() {
        "1" | "true" => Ok(true),
        "0" | "false" => Ok(false),
        other => Err(EffectError::InvalidValue {
            name: name.to_string(),
            reason: format!("not a boolean: {other}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blend_onto_transparent_key_takes_color() {
        let mut key = KeyLight::new("a", 0.0, 0.0);
        alpha_blend(&mut key, Argb::new(0xff, 10, 20, 30));
        assert_eq!(key.argb(), Argb::new(0xff, 10, 20, 30));
    }

    #[test]
    fn blend_transparent_color_is_noop() {
        let mut key = KeyLight::new("a", 0.0, 0.0);
        key.a = 0xff;
        key.r = 50;
        alpha_blend(&mut key, Argb::new(0, 255, 255, 255));
        assert_eq!(key.argb(), Argb::new(0xff, 50, 0, 0));
    }

    #[test]
    fn blend_half_alpha_over_opaque() {
        let mut key = KeyLight::new("a", 0.0, 0.0);
        key.a = 0xff;
        alpha_blend(&mut key, Argb::new(0x80, 0xff, 0, 0));
        assert_eq!(key.a, 0xff);
        assert!((127..=129).contains(&key.r), "r = {}", key.r);
        assert_eq!(key.g, 0);
    }

    #[test]
    fn blend_half_alpha_over_transparent_keeps_color() {
        let mut key = KeyLight::new("a", 0.0, 0.0);
        alpha_blend(&mut key, Argb::new(0x80, 0xff, 0, 0));
        assert_eq!(key.a, 0x80);
        assert_eq!(key.r, 0xff);
    }

    #[test]
    fn clear_makes_keys_transparent() {
        let mut ctx = EffectContext::new(2.0, 1.0, vec![KeyLight::new("a", 0.0, 0.0)]);
        alpha_blend(&mut ctx.keys[0], Argb::new(0xff, 1, 2, 3));
        ctx.clear();
        assert_eq!(ctx.key("a").unwrap().argb(), Argb::new(0, 0, 0, 0));
    }

    #[test]
    fn param_default_text() {
        let p = ParamSpec {
            name: "x",
            prefix: "",
            suffix: "",
            kind: ParamKind::Bool { default: true },
        };
        assert_eq!(p.default_text(), "1");
    }

    #[test]
    fn parse_helpers() {
        assert_eq!(parse_double("d", " 2.5 "), Ok(2.5));
        assert!(parse_double("d", "NaN").is_err());
        assert_eq!(parse_bool("b", "1"), Ok(true));
        assert_eq!(parse_bool("b", "false"), Ok(false));
        assert!(parse_bool("b", "yes").is_err());
    }

    #[test]
    fn display_messages() {
        assert_eq!(
            EffectError::UnknownParameter("speed".into()).to_string(),
            "Unknown parameter: speed"
        );
    }
}
