//! Built-in fixture definitions.
//!
//! A small library of common fixture shapes so show files and tests have
//! something real to patch. Hosting applications can construct their own
//! [`FixtureDef`]s; nothing here is special.
use super::{ChannelKind, ChannelSpec, FixtureDef, FunctionRange, HeadDef};
use crate::color::ColorComponent;
use crate::spatial::PanTiltCalibration;

/// A single-channel dimmer.
pub fn dimmer() -> FixtureDef {
    FixtureDef {
        name: "dimmer".to_string(),
        channels: vec![ChannelSpec::new(ChannelKind::Dimmer, 1)],
        ..Default::default()
    }
}

/// A bare RGB color mixer.
pub fn rgb() -> FixtureDef {
    FixtureDef {
        name: "rgb".to_string(),
        channels: vec![
            ChannelSpec::new(ChannelKind::Color(ColorComponent::Red), 1),
            ChannelSpec::new(ChannelKind::Color(ColorComponent::Green), 2),
            ChannelSpec::new(ChannelKind::Color(ColorComponent::Blue), 3),
        ],
        ..Default::default()
    }
}

/// An RGBW par can with a master dimmer and a strobe function channel.
pub fn rgbw_par() -> FixtureDef {
    FixtureDef {
        name: "rgbw-par".to_string(),
        channels: vec![
            ChannelSpec::new(ChannelKind::Dimmer, 1),
            ChannelSpec::new(ChannelKind::Color(ColorComponent::Red), 2),
            ChannelSpec::new(ChannelKind::Color(ColorComponent::Green), 3),
            ChannelSpec::new(ChannelKind::Color(ColorComponent::Blue), 4),
            ChannelSpec::new(ChannelKind::Color(ColorComponent::White), 5),
            ChannelSpec::new(
                ChannelKind::Function(vec![
                    FunctionRange::new("open", 0, 15),
                    FunctionRange::new("strobe", 16, 255),
                ]),
                6,
            ),
        ],
        ..Default::default()
    }
}

/// A moving head: 16-bit pan/tilt, dimmer, RGB mixing, shutter.
pub fn moving_head() -> FixtureDef {
    FixtureDef {
        name: "moving-head".to_string(),
        channels: vec![
            ChannelSpec::new(ChannelKind::Pan, 1).with_fine(2),
            ChannelSpec::new(ChannelKind::Tilt, 3).with_fine(4),
            ChannelSpec::new(ChannelKind::Dimmer, 5),
            ChannelSpec::new(ChannelKind::Color(ColorComponent::Red), 6),
            ChannelSpec::new(ChannelKind::Color(ColorComponent::Green), 7),
            ChannelSpec::new(ChannelKind::Color(ColorComponent::Blue), 8),
            ChannelSpec::new(
                ChannelKind::Function(vec![
                    FunctionRange::new("closed", 0, 7),
                    FunctionRange::new("open", 8, 255),
                ]),
                9,
            ),
        ],
        calibration: Some(PanTiltCalibration {
            pan_center: 128.0,
            pan_half_circle: 85.0,
            tilt_center: 128.0,
            tilt_half_circle: 170.0,
        }),
        ..Default::default()
    }
}

/// A spot with a dimmer and a color wheel instead of mixing diodes.
pub fn wheel_spot() -> FixtureDef {
    FixtureDef {
        name: "wheel-spot".to_string(),
        channels: vec![
            ChannelSpec::new(ChannelKind::Dimmer, 1),
            ChannelSpec::new(
                ChannelKind::Function(vec![
                    FunctionRange::new("red", 0, 63).with_hue(0.0),
                    FunctionRange::new("yellow", 64, 127).with_hue(60.0),
                    FunctionRange::new("green", 128, 191).with_hue(120.0),
                    FunctionRange::new("blue", 192, 255).with_hue(240.0),
                ]),
                2,
            ),
        ],
        ..Default::default()
    }
}

/// A four-cell RGB bar; each cell is a head spaced 0.25 m along x.
pub fn led_bar() -> FixtureDef {
    let cell = |offset: usize, x: f64| HeadDef {
        channels: vec![
            ChannelSpec::new(ChannelKind::Color(ColorComponent::Red), offset),
            ChannelSpec::new(ChannelKind::Color(ColorComponent::Green), offset + 1),
            ChannelSpec::new(ChannelKind::Color(ColorComponent::Blue), offset + 2),
        ],
        position: [x, 0.0, 0.0],
        ..Default::default()
    };
    FixtureDef {
        name: "led-bar".to_string(),
        channels: vec![ChannelSpec::new(ChannelKind::Dimmer, 1)],
        heads: (0..4)
            .map(|i| cell(2 + i * 3, (i as f64 - 1.5) * 0.25))
            .collect(),
        ..Default::default()
    }
}

/// Look up a built-in definition by name.
pub fn by_name(name: &str) -> Option<FixtureDef> {
    let def = match name {
        "dimmer" => dimmer(),
        "rgb" => rgb(),
        "rgbw-par" => rgbw_par(),
        "moving-head" => moving_head(),
        "wheel-spot" => wheel_spot(),
        "led-bar" => led_bar(),
        _ => return None,
    };
    Some(def)
}

/// Names of all built-in definitions.
pub fn names() -> &'static [&'static str] {
    &[
        "dimmer",
        "rgb",
        "rgbw-par",
        "moving-head",
        "wheel-spot",
        "led-bar",
    ]
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_all_defs_validate() {
        for name in names() {
            let def = by_name(name).unwrap();
            def.validate()
                .unwrap_or_else(|e| panic!("{name} failed validation: {e:#}"));
            assert_eq!(*name, def.name);
        }
        assert!(by_name("no-such-fixture").is_none());
    }
}
