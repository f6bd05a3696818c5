//! Height-to-color mapping for mesh vertices.
//!
//! Full palette tables live outside the core. The mesher only needs the
//! `ColorRamp` seam; `Palette` is a small built-in set of gradients so the
//! crate renders something sensible on its own.

use serde::{Deserialize, Serialize};

/// 8-bit RGB color.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Linear blend towards `other`; `t` is clamped to [0, 1].
    pub fn lerp(self, other: Rgb, t: f32) -> Rgb {
        let t = if t.is_finite() { t.clamp(0.0, 1.0) } else { 0.0 };
        let mix = |a: u8, b: u8| (a as f32 + (b as f32 - a as f32) * t).round() as u8;
        Rgb::new(mix(self.r, other.r), mix(self.g, other.g), mix(self.b, other.b))
    }

    /// Multiply every channel by `factor`, saturating at 255.
    pub fn scaled(self, factor: f32) -> Rgb {
        let factor = if factor.is_finite() { factor.max(0.0) } else { 1.0 };
        let scale = |c: u8| (c as f32 * factor).round().min(255.0) as u8;
        Rgb::new(scale(self.r), scale(self.g), scale(self.b))
    }

    /// Rotate hue by `turns` of a full circle (0.25 = 90 degrees).
    pub fn hue_rotated(self, turns: f32) -> Rgb {
        if !turns.is_finite() || turns == 0.0 {
            return self;
        }
        let (h, s, v) = rgb_to_hsv(self);
        hsv_to_rgb((h + turns * 360.0).rem_euclid(360.0), s, v)
    }

    /// RGBA bytes with full opacity.
    pub fn to_rgba(self) -> [u8; 4] {
        [self.r, self.g, self.b, 255]
    }
}

fn rgb_to_hsv(c: Rgb) -> (f32, f32, f32) {
    let r = c.r as f32 / 255.0;
    let g = c.g as f32 / 255.0;
    let b = c.b as f32 / 255.0;
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let h = if delta == 0.0 {
        0.0
    } else if max == r {
        60.0 * ((g - b) / delta).rem_euclid(6.0)
    } else if max == g {
        60.0 * ((b - r) / delta + 2.0)
    } else {
        60.0 * ((r - g) / delta + 4.0)
    };
    let s = if max == 0.0 { 0.0 } else { delta / max };
    (h, s, max)
}

fn hsv_to_rgb(h: f32, s: f32, v: f32) -> Rgb {
    let c = v * s;
    let x = c * (1.0 - ((h / 60.0).rem_euclid(2.0) - 1.0).abs());
    let m = v - c;
    let (r, g, b) = match (h / 60.0) as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    let to_byte = |f: f32| ((f + m) * 255.0).round().clamp(0.0, 255.0) as u8;
    Rgb::new(to_byte(r), to_byte(g), to_byte(b))
}

/// Maps a normalized height and the animated color shift to a vertex color.
pub trait ColorRamp {
    fn color_at(&self, height: f32, color_shift: f32) -> Rgb;
}

/// Built-in gradients.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Palette {
    /// Water, sand, grass, rock, snow
    #[default]
    Terrain,
    /// Deep blue through cyan to foam
    Ocean,
    /// Dark red through orange to white-hot
    Ember,
}

const TERRAIN_STOPS: [Rgb; 6] = [
    Rgb::new(28, 54, 112),   // Deep water
    Rgb::new(60, 120, 180),  // Shallows
    Rgb::new(210, 196, 140), // Sand
    Rgb::new(84, 150, 70),   // Grass
    Rgb::new(120, 108, 96),  // Rock
    Rgb::new(245, 245, 250), // Snow
];

const OCEAN_STOPS: [Rgb; 4] = [
    Rgb::new(8, 20, 60),
    Rgb::new(20, 80, 150),
    Rgb::new(60, 180, 200),
    Rgb::new(220, 245, 250),
];

const EMBER_STOPS: [Rgb; 4] = [
    Rgb::new(40, 4, 8),
    Rgb::new(170, 30, 20),
    Rgb::new(250, 140, 30),
    Rgb::new(255, 245, 210),
];

impl Palette {
    pub fn all() -> &'static [Self] {
        &[Self::Terrain, Self::Ocean, Self::Ember]
    }

    fn stops(&self) -> &'static [Rgb] {
        match self {
            Self::Terrain => &TERRAIN_STOPS,
            Self::Ocean => &OCEAN_STOPS,
            Self::Ember => &EMBER_STOPS,
        }
    }

    /// Gradient lookup without any animation applied.
    pub fn gradient(&self, t: f32) -> Rgb {
        let stops = self.stops();
        let t = if t.is_finite() { t.clamp(0.0, 1.0) } else { 0.0 };
        let scaled = t * (stops.len() - 1) as f32;
        let idx = (scaled as usize).min(stops.len() - 2);
        stops[idx].lerp(stops[idx + 1], scaled - idx as f32)
    }
}

impl ColorRamp for Palette {
    fn color_at(&self, height: f32, color_shift: f32) -> Rgb {
        self.gradient(height).hue_rotated(color_shift)
    }
}

impl std::fmt::Display for Palette {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Terrain => write!(f, "terrain"),
            Self::Ocean => write!(f, "ocean"),
            Self::Ember => write!(f, "ember"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gradient_endpoints() {
        assert_eq!(Palette::Terrain.gradient(0.0), TERRAIN_STOPS[0]);
        assert_eq!(Palette::Terrain.gradient(1.0), TERRAIN_STOPS[5]);
        assert_eq!(Palette::Ember.gradient(f32::NAN), EMBER_STOPS[0]);
    }

    #[test]
    fn test_zero_shift_is_identity() {
        for &palette in Palette::all() {
            assert_eq!(palette.color_at(0.4, 0.0), palette.gradient(0.4));
        }
    }

    #[test]
    fn test_full_turn_returns_to_start() {
        let c = Rgb::new(200, 80, 30);
        let back = c.hue_rotated(1.0);
        assert!((back.r as i32 - c.r as i32).abs() <= 1);
        assert!((back.g as i32 - c.g as i32).abs() <= 1);
        assert!((back.b as i32 - c.b as i32).abs() <= 1);
    }

    #[test]
    fn test_gray_has_no_hue() {
        let gray = Rgb::new(128, 128, 128);
        assert_eq!(gray.hue_rotated(0.3), gray);
    }

    #[test]
    fn test_scaled_saturates() {
        assert_eq!(Rgb::new(200, 10, 0).scaled(2.0), Rgb::new(255, 20, 0));
    }
}
