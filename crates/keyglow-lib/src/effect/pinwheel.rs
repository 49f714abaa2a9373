//! Pinwheel: a colored wedge sweeping around the keyboard's center.

use std::f64::consts::{PI, TAU};

use super::{
    Effect, EffectContext, EffectDescriptor, EffectError, FrameStatus, Gradient, KeyPressMode,
    ParamKind, ParamSpec, Preset, TimeMode, alpha_blend, parse_bool, parse_double,
};

static DESCRIPTOR: EffectDescriptor = EffectDescriptor {
    name: "Pinwheel",
    version: "0.8",
    copyright_year: "2014-2015",
    author: "MSC",
    license: "GPLv2",
    guid: "{07551A90-D97A-4DD0-A770-E9E280A90891}",
    description: "A spinning pinwheel effect.",
    params: &[
        ParamSpec {
            name: "color",
            prefix: "Wheel color:",
            suffix: "",
            kind: ParamKind::AGradient {
                default: "ffffffff",
            },
        },
        ParamSpec {
            name: "length",
            prefix: "Wheel size:",
            suffix: "%",
            kind: ParamKind::Double {
                default: 100.0,
                min: 1.0,
                max: 100.0,
            },
        },
        ParamSpec {
            name: "symmetric",
            prefix: "Symmetric",
            suffix: "",
            kind: ParamKind::Bool { default: false },
        },
    ],
    presets: &[
        Preset {
            name: "Search light",
            params: &[("duration", "2.0"), ("length", "50.0"), ("symmetric", "1")],
        },
        Preset {
            name: "Rainbow",
            params: &[
                (
                    "color",
                    "0:ffff0000 17:ffffff00 33:ff00ff00 50:ff00ffff 67:ff0000ff 83:ffff00ff 100:ffff0000",
                ),
                ("duration", "2.0"),
            ],
        },
    ],
    key_press_mode: KeyPressMode::None,
    time_mode: TimeMode::Duration,
    live_params: true,
    repeat: false,
};

/// Wrap an angle into `[0, 2π)`.
pub fn wrap_angle(theta: f64) -> f64 {
    let t = theta.rem_euclid(TAU);
    // rem_euclid can round up to exactly TAU for tiny negative inputs.
    if t >= TAU { 0.0 } else { t }
}

/// Mirror angles past π so the wedge grows both ways from the hand.
pub fn fold_symmetric(theta: f64) -> f64 {
    if theta > PI { TAU - theta } else { theta }
}

/// Angle of key `(x, y)` behind the hand at `position`, as seen from `center`.
///
/// A key exactly at the center is always at angle 0.
pub fn key_angle(center: (f64, f64), x: f64, y: f64, position: f64) -> f64 {
    let (cx, cy) = center;
    if x == cx && y == cy {
        return 0.0;
    }
    wrap_angle(wrap_angle((cx - x).atan2(cy - y)) - position)
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Phase {
    Uninitialized,
    Running { frame: f64, center: (f64, f64) },
}

#[derive(Debug, Clone)]
pub struct Pinwheel {
    color: Gradient,
    /// Wedge length in radians.
    length: f64,
    symmetric: bool,
    phase: Phase,
}

impl Default for Pinwheel {
    fn default() -> Self {
        Pinwheel {
            color: Gradient::fade(super::Argb::from_u32(0xffffffff)),
            length: TAU,
            symmetric: false,
            phase: Phase::Uninitialized,
        }
    }
}

impl Pinwheel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        matches!(self.phase, Phase::Running { .. })
    }

    /// Wedge length in radians.
    pub fn length(&self) -> f64 {
        self.length
    }

    pub fn symmetric(&self) -> bool {
        self.symmetric
    }

    fn start(&mut self, ctx: &EffectContext) {
        self.phase = Phase::Running {
            frame: 0.0,
            center: (ctx.width / 2.0, ctx.height / 2.0),
        };
    }
}

impl Effect for Pinwheel {
    fn descriptor(&self) -> &'static EffectDescriptor {
        &DESCRIPTOR
    }

    fn on_parameter(&mut self, name: &str, value: &str) -> Result<(), EffectError> {
        match name {
            "color" => self.color = Gradient::parse(value)?,
            "length" => {
                let percent = parse_double(name, value)?;
                if !(1.0..=100.0).contains(&percent) {
                    return Err(EffectError::InvalidValue {
                        name: name.to_string(),
                        reason: format!("{percent} is outside 1-100"),
                    });
                }
                self.length = percent / 100.0 * TAU;
            }
            "symmetric" => self.symmetric = parse_bool(name, value)?,
            other => return Err(EffectError::UnknownParameter(other.to_string())),
        }
        Ok(())
    }

    fn init(&mut self, ctx: &EffectContext) {
        self.start(ctx);
    }

    fn on_key(&mut self, _ctx: &mut EffectContext, _key: &str, _x: f64, _y: f64, _pressed: bool) {}

    fn frame(&mut self, ctx: &mut EffectContext, delta: f64) -> FrameStatus {
        if !self.is_running() {
            self.start(ctx);
        }
        let Phase::Running { frame, center } = &mut self.phase else {
            return FrameStatus::Continue;
        };
        *frame += delta;
        if *frame > 1.0 {
            *frame -= 1.0;
        }
        let position = wrap_angle(-*frame * TAU);
        let center = *center;

        ctx.clear();
        for key in &mut ctx.keys {
            let mut theta = key_angle(center, key.x, key.y, position);
            if self.symmetric {
                theta = fold_symmetric(theta);
            }
            if theta < self.length {
                let color = self.color.sample(theta / self.length * 100.0);
                alpha_blend(key, color);
            }
        }
        FrameStatus::Continue
    }
}
