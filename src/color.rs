//! The HSL color model: conversion to emitter levels and color-wheel lookup.
use serde::{Deserialize, Serialize};

use crate::util::lerp;

/// Conventional hue of an amber diode, in degrees.
pub const AMBER_HUE: f64 = 45.0;

/// Conventional hue of a UV diode, in degrees.
pub const UV_HUE: f64 = 270.0;

/// A color in HSL space with straight alpha.
///
/// Hue is degrees in [0, 360); saturation and lightness are percentages in
/// [0, 100]; alpha is a unit value. Constructors normalize out-of-range
/// input.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Hsl {
    hue: f64,
    sat: f64,
    lightness: f64,
    alpha: f64,
}

impl Hsl {
    pub const BLACK: Hsl = Hsl {
        hue: 0.0,
        sat: 0.0,
        lightness: 0.0,
        alpha: 1.0,
    };

    pub fn new(hue: f64, sat: f64, lightness: f64) -> Self {
        Self {
            hue: hue.rem_euclid(360.0),
            sat: sat.clamp(0.0, 100.0),
            lightness: lightness.clamp(0.0, 100.0),
            alpha: 1.0,
        }
    }

    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha.clamp(0.0, 1.0);
        self
    }

    pub fn hue(&self) -> f64 {
        self.hue
    }

    pub fn sat(&self) -> f64 {
        self.sat
    }

    pub fn lightness(&self) -> f64 {
        self.lightness
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// The same hue and saturation, fully darkened.
    ///
    /// This is the neutral endpoint for fading a color in or out: the color
    /// dims without ever desaturating to gray.
    pub fn darkened(&self) -> Self {
        Self {
            lightness: 0.0,
            ..*self
        }
    }

    /// Unit RGB components, before alpha.
    pub fn rgb(&self) -> [f64; 3] {
        let h = self.hue;
        let s = self.sat / 100.0;
        let l = self.lightness / 100.0;
        let c = (1.0 - (2.0 * l - 1.0).abs()) * s;
        let x = c * (1.0 - ((h / 60.0).rem_euclid(2.0) - 1.0).abs());
        let m = l - c / 2.0;
        let (r, g, b) = match h {
            h if h < 60.0 => (c, x, 0.0),
            h if h < 120.0 => (x, c, 0.0),
            h if h < 180.0 => (0.0, c, x),
            h if h < 240.0 => (0.0, x, c),
            h if h < 300.0 => (x, 0.0, c),
            _ => (c, 0.0, x),
        };
        [r + m, g + m, b + m]
    }

    /// Blend two colors, taking the shorter path around the hue circle.
    ///
    /// Saturation, lightness, and alpha interpolate linearly. `f` at 0 yields
    /// `self`, at 1 yields `other`.
    pub fn blend(&self, other: &Hsl, f: f64) -> Hsl {
        let f = f.clamp(0.0, 1.0);
        let delta = (other.hue - self.hue + 540.0).rem_euclid(360.0) - 180.0;
        Hsl {
            hue: (self.hue + delta * f).rem_euclid(360.0),
            sat: lerp(self.sat, other.sat, f),
            lightness: lerp(self.lightness, other.lightness, f),
            alpha: lerp(self.alpha, other.alpha, f),
        }
    }
}

/// Circular distance between two hues, in degrees.
pub fn hue_distance(a: f64, b: f64) -> f64 {
    let d = (a - b).rem_euclid(360.0);
    d.min(360.0 - d)
}

/// How a color channel responds to a target color.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorComponent {
    Red,
    Green,
    Blue,
    /// A white emitter; driven by the common component of the target color.
    White,
    /// An amber emitter at [`AMBER_HUE`].
    Amber,
    /// A UV emitter at [`UV_HUE`].
    Uv,
    /// An emitter at an arbitrary hue, in degrees.
    Hue(f64),
}

impl ColorComponent {
    fn hue(&self) -> Option<f64> {
        match self {
            Self::Amber => Some(AMBER_HUE),
            Self::Uv => Some(UV_HUE),
            Self::Hue(h) => Some(*h),
            _ => None,
        }
    }

    /// Unit drive level for this emitter to render `color`.
    ///
    /// Primaries take their RGB component directly. White takes the common
    /// (minimum) RGB component. Hue-carrying emitters project the target onto
    /// their own hue: the cosine of the hue distance, scaled by how saturated
    /// and bright the target is.
    pub fn level(&self, color: &Hsl) -> f64 {
        let [r, g, b] = color.rgb();
        let level = match self {
            Self::Red => r,
            Self::Green => g,
            Self::Blue => b,
            Self::White => r.min(g).min(b),
            _ => {
                let hue = self.hue().unwrap();
                let projection = (hue_distance(color.hue(), hue).to_radians().cos()).max(0.0);
                projection * (color.sat() / 100.0) * r.max(g).max(b)
            }
        };
        level * color.alpha()
    }
}

/// Color-wheel matching thresholds.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct WheelConfig {
    /// Maximum hue distance (degrees) for a wheel entry to be considered.
    #[serde(default = "default_hue_tolerance")]
    pub hue_tolerance: f64,
    /// Minimum target saturation (%) before the wheel engages at all.
    #[serde(default = "default_min_saturation")]
    pub min_saturation: f64,
}

fn default_hue_tolerance() -> f64 {
    60.0
}

fn default_min_saturation() -> f64 {
    40.0
}

impl Default for WheelConfig {
    fn default() -> Self {
        Self {
            hue_tolerance: default_hue_tolerance(),
            min_saturation: default_min_saturation(),
        }
    }
}

/// Select the wheel entry nearest in hue to the target color.
///
/// Entries are `(index, hue)` pairs. Desaturated targets and targets with no
/// entry within tolerance select nothing. Entries are considered in ascending
/// hue order and an equal-distance entry displaces an earlier one, so the
/// highest tied hue wins.
pub fn select_wheel_entry(
    entries: impl Iterator<Item = (usize, f64)>,
    target: &Hsl,
    cfg: &WheelConfig,
) -> Option<usize> {
    if target.sat() < cfg.min_saturation {
        return None;
    }
    let mut sorted: Vec<(usize, f64)> = entries.collect();
    sorted.sort_by(|a, b| a.1.total_cmp(&b.1));

    let mut best: Option<(usize, f64)> = None;
    for (index, hue) in sorted {
        let dist = hue_distance(target.hue(), hue);
        if dist > cfg.hue_tolerance {
            continue;
        }
        if best.is_none_or(|(_, d)| dist <= d) {
            best = Some((index, dist));
        }
    }
    best.map(|(index, _)| index)
}

#[cfg(test)]
mod test {
    use super::*;

    fn assert_rgb(color: Hsl, expected: [f64; 3]) {
        let got = color.rgb();
        for (g, e) in got.iter().zip(expected.iter()) {
            assert!((g - e).abs() < 1e-9, "expected {expected:?}, got {got:?}");
        }
    }

    #[test]
    fn test_hsl_to_rgb_primaries() {
        assert_rgb(Hsl::new(0.0, 100.0, 50.0), [1.0, 0.0, 0.0]);
        assert_rgb(Hsl::new(120.0, 100.0, 50.0), [0.0, 1.0, 0.0]);
        assert_rgb(Hsl::new(240.0, 100.0, 50.0), [0.0, 0.0, 1.0]);
        assert_rgb(Hsl::new(0.0, 0.0, 100.0), [1.0, 1.0, 1.0]);
        assert_rgb(Hsl::BLACK, [0.0, 0.0, 0.0]);
        // Desaturated mid-gray.
        assert_rgb(Hsl::new(77.0, 0.0, 50.0), [0.5, 0.5, 0.5]);
    }

    #[test]
    fn test_blend_shortest_hue_path() {
        // Red to blue goes through magenta, not through green.
        let red = Hsl::new(0.0, 100.0, 50.0);
        let blue = Hsl::new(240.0, 100.0, 50.0);
        let mid = red.blend(&blue, 0.5);
        assert!((mid.hue() - 300.0).abs() < 1e-9);
        assert_eq!(red, red.blend(&blue, 0.0));
        assert_eq!(blue, red.blend(&blue, 1.0));
    }

    #[test]
    fn test_darkened_keeps_hue() {
        let c = Hsl::new(200.0, 80.0, 60.0);
        let d = c.darkened();
        assert_eq!(200.0, d.hue());
        assert_eq!(80.0, d.sat());
        assert_eq!(0.0, d.lightness());
    }

    #[test]
    fn test_component_levels() {
        let green = Hsl::new(120.0, 100.0, 50.0);
        assert_eq!(0.0, ColorComponent::Red.level(&green));
        assert_eq!(1.0, ColorComponent::Green.level(&green));
        assert_eq!(0.0, ColorComponent::White.level(&green));

        let white = Hsl::new(0.0, 0.0, 100.0);
        assert_eq!(1.0, ColorComponent::White.level(&white));
        // Fully desaturated targets do not drive hue emitters.
        assert_eq!(0.0, ColorComponent::Amber.level(&white));

        // A saturated orange drives the amber diode hard.
        let orange = Hsl::new(45.0, 100.0, 50.0);
        assert!(ColorComponent::Amber.level(&orange) > 0.9);

        // Alpha scales everything.
        let faint = green.with_alpha(0.5);
        assert!((ColorComponent::Green.level(&faint) - 0.5).abs() < 1e-9);
    }

    const WHEEL: [(usize, f64); 4] = [(0, 0.0), (1, 60.0), (2, 120.0), (3, 240.0)];

    #[test]
    fn test_wheel_selection() {
        let cfg = WheelConfig::default();
        let pick = |hue: f64, sat: f64| {
            select_wheel_entry(WHEEL.iter().copied(), &Hsl::new(hue, sat, 50.0), &cfg)
        };
        // Nearest entry wins.
        assert_eq!(Some(1), pick(55.0, 80.0));
        // Equidistant between 0 and 60: the higher hue wins the tie.
        assert_eq!(Some(1), pick(30.0, 80.0));
        // Desaturated targets select nothing.
        assert_eq!(None, pick(55.0, 20.0));
        // With a tighter tolerance, a hue between entries selects nothing.
        let tight = WheelConfig {
            hue_tolerance: 30.0,
            ..cfg
        };
        assert_eq!(
            None,
            select_wheel_entry(WHEEL.iter().copied(), &Hsl::new(180.0, 80.0, 50.0), &tight)
        );
    }
}
