//! ARGB gradients: `"pos:aarrggbb pos:aarrggbb …"` with positions in percent.

use std::fmt;

use super::EffectError;

/// 32-bit color with straight (non-premultiplied) alpha.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Argb {
    pub a: u8,
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Argb {
    pub const fn new(a: u8, r: u8, g: u8, b: u8) -> Self {
        Argb { a, r, g, b }
    }

    /// From `0xAARRGGBB`.
    pub const fn from_u32(v: u32) -> Self {
        Argb {
            a: (v >> 24) as u8,
            r: (v >> 16) as u8,
            g: (v >> 8) as u8,
            b: v as u8,
        }
    }

    /// Parse exactly eight hex digits, `aarrggbb`.
    pub fn parse(s: &str) -> Option<Self> {
        if s.len() != 8 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        u32::from_str_radix(s, 16).ok().map(Self::from_u32)
    }

    /// Linear interpolation per channel, including alpha.
    pub fn lerp(a: Argb, b: Argb, t: f64) -> Argb {
        let t = t.clamp(0.0, 1.0);
        let ch = |x: u8, y: u8| (f64::from(x) + (f64::from(y) - f64::from(x)) * t).round() as u8;
        Argb {
            a: ch(a.a, b.a),
            r: ch(a.r, b.r),
            g: ch(a.g, b.g),
            b: ch(a.b, b.b),
        }
    }
}

impl fmt::Display for Argb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02x}{:02x}{:02x}{:02x}", self.a, self.r, self.g, self.b)
    }
}

/// Color stops sorted by strictly increasing position in `[0, 100]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Gradient {
    stops: Vec<(f64, Argb)>,
}

impl Gradient {
    /// `color` at 0 fading to fully transparent at 100.
    pub fn fade(color: Argb) -> Self {
        Gradient {
            stops: vec![(0.0, color), (100.0, Argb { a: 0, ..color })],
        }
    }

    /// Parse `"0:ffff0000 50:ff00ff00 100:ffff0000"`.
    ///
    /// A bare `aarrggbb` is shorthand for [`Gradient::fade`].
    pub fn parse(s: &str) -> Result<Self, EffectError> {
        let s = s.trim();
        if !s.contains(':')
            && let Some(color) = Argb::parse(s)
        {
            return Ok(Self::fade(color));
        }

        let mut stops: Vec<(f64, Argb)> = Vec::new();
        for token in s.split_whitespace() {
            let (pos, color) = token
                .split_once(':')
                .ok_or_else(|| EffectError::InvalidGradient(format!("expected pos:color, got {token}")))?;
            let pos: f64 = pos
                .parse()
                .ok()
                .filter(|p: &f64| (0.0..=100.0).contains(p))
                .ok_or_else(|| EffectError::InvalidGradient(format!("bad position in {token}")))?;
            let color = Argb::parse(color)
                .ok_or_else(|| EffectError::InvalidGradient(format!("bad color in {token}")))?;
            if let Some(&(last, _)) = stops.last()
                && pos <= last
            {
                return Err(EffectError::InvalidGradient(format!(
                    "positions must increase ({last} then {pos})"
                )));
            }
            stops.push((pos, color));
        }

        if stops.is_empty() {
            return Err(EffectError::InvalidGradient("no color stops".into()));
        }
        Ok(Gradient { stops })
    }

    pub fn stops(&self) -> &[(f64, Argb)] {
        &self.stops
    }

    /// Color at `percent`. Exact at stop positions, clamped outside the end stops.
    pub fn sample(&self, percent: f64) -> Argb {
        let Some(&(first_pos, first)) = self.stops.first() else {
            return Argb::default();
        };
        if percent <= first_pos {
            return first;
        }
        for pair in self.stops.windows(2) {
            let (p0, c0) = pair[0];
            let (p1, c1) = pair[1];
            if percent <= p1 {
                return Argb::lerp(c0, c1, (percent - p0) / (p1 - p0));
            }
        }
        self.stops.last().map_or(first, |&(_, c)| c)
    }
}

impl fmt::Display for Gradient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (pos, color)) in self.stops.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{pos}:{color}")?;
        }
        Ok(())
    }
}
