//! Translate final typed assignments into DMX channel writes.
//!
//! This is the bottom of the pipeline: everything above deals in angles,
//! colors, and percentages; everything below is bytes on a wire.
use anyhow::{Result, bail};
use log::debug;

use crate::assign::{Assignment, Kind, Target, Value};
use crate::color::{Hsl, WheelConfig, select_wheel_entry};
use crate::dmx::DmxBuffer;
use crate::fixture::{Head, Patch, PatchedChannel};
use crate::spatial;
use crate::util::unit_to_u8;

/// Highest value a 16-bit channel can express in channel-value space.
const CHANNEL_MAX: f64 = 255.0 + 255.0 / 256.0;

/// Writes assignments into universe buffers.
///
/// Out-of-range values and unreachable orientations clamp silently and bump
/// the clamp counter; structural problems (missing channels, mismatched
/// targets) are errors for the caller to attribute to the owning effect.
pub struct Resolver<'a> {
    pub patch: &'a Patch,
    pub wheel: &'a WheelConfig,
    pub buffers: &'a mut [DmxBuffer],
    pub clamped: u64,
}

impl<'a> Resolver<'a> {
    pub fn new(patch: &'a Patch, wheel: &'a WheelConfig, buffers: &'a mut [DmxBuffer]) -> Self {
        Self {
            patch,
            wheel,
            buffers,
            clamped: 0,
        }
    }

    /// Write one assignment. Extension-kind assignments belong to their
    /// extension's resolver, never here.
    pub fn resolve(&mut self, assignment: &Assignment) -> Result<()> {
        match (&assignment.kind, &assignment.value) {
            (Kind::Channel, Value::Channel(level)) => {
                let Target::Channel { universe, addr } = &assignment.target else {
                    bail!("channel assignment targets {}", assignment.target);
                };
                match self.patch.channel_at(*universe, addr.index()) {
                    Some((head, channel)) => {
                        let universe = head.universe;
                        let channel = channel.clone();
                        self.write_channel(universe, &channel, *level)
                    }
                    // An unpatched slot still accepts a plain 8-bit write.
                    None => self.write_byte(*universe, addr.index(), *level),
                }
            }
            (Kind::Function, Value::Function { tag, percent }) => {
                let head = self.head_of(&assignment.target)?;
                let Some((channel, range)) = head.find_function(tag) else {
                    bail!("no function '{tag}' on {}", head.id);
                };
                let value = range.value_for_percent(*percent);
                let (universe, channel) = (head.universe, channel.clone());
                self.write_channel(universe, &channel, value)
            }
            (Kind::Color, Value::Color(color)) => self.resolve_color(&assignment.target, color),
            (Kind::PanTilt, Value::PanTilt { pan, tilt }) => {
                let head = self.head_of(&assignment.target)?;
                let Some(cal) = head.calibration else {
                    bail!("{} has no pan/tilt calibration", head.id);
                };
                let (dmx, clamped) = cal.angles_to_dmx(*pan, *tilt);
                if clamped {
                    self.clamped += 1;
                }
                self.write_pan_tilt(&assignment.target, dmx)
            }
            (Kind::Direction, Value::Direction(dir)) => {
                self.resolve_direction(&assignment.target, *dir)
            }
            (Kind::Aim, Value::Aim(point)) => {
                let head = self.head_of(&assignment.target)?;
                let dir = *point - head.position;
                self.resolve_direction(&assignment.target, dir)
            }
            (Kind::Extension(tag), _) => {
                bail!("extension assignment '{tag}' reached the DMX resolver");
            }
            (kind, value) => {
                bail!("assignment of kind {kind} carries mismatched value {value:?}");
            }
        }
    }

    fn head_of(&self, target: &Target) -> Result<&'a Head> {
        let Target::Head(id) = target else {
            bail!("assignment targets {target}, expected a head");
        };
        self.patch.head(*id)
    }

    fn resolve_color(&mut self, target: &Target, color: &Hsl) -> Result<()> {
        let head = self.head_of(target)?;
        let universe = head.universe;

        let mixers: Vec<(PatchedChannel, f64)> = head
            .color_channels()
            .map(|(ch, comp)| (ch.clone(), comp.level(color) * 255.0))
            .collect();
        if !mixers.is_empty() {
            for (channel, level) in mixers {
                self.write_channel(universe, &channel, level)?;
            }
            return Ok(());
        }

        // No mixable emitters; fall back to the color wheel if there is one.
        let entries: Vec<(PatchedChannel, u8, f64)> = head
            .wheel_entries()
            .map(|(ch, r)| (ch.clone(), r.midpoint(), r.hue.unwrap()))
            .collect();
        if entries.is_empty() {
            debug!("{} has no way to render color", head.id);
            return Ok(());
        }
        let selected = select_wheel_entry(
            entries.iter().enumerate().map(|(i, (_, _, hue))| (i, *hue)),
            color,
            self.wheel,
        );
        if let Some(i) = selected {
            let (channel, midpoint, _) = &entries[i];
            self.write_channel(universe, channel, *midpoint as f64)?;
        }
        Ok(())
    }

    fn resolve_direction(&mut self, target: &Target, dir: glam::DVec3) -> Result<()> {
        let head = self.head_of(target)?;
        let Some(cal) = head.calibration else {
            bail!("{} has no pan/tilt calibration", head.id);
        };
        let (dmx, clamped) = spatial::direction_to_pan_tilt(&cal, &head.rotation, dir)?;
        if clamped {
            self.clamped += 1;
        }
        self.write_pan_tilt(target, dmx)
    }

    fn write_pan_tilt(&mut self, target: &Target, (pan, tilt): (f64, f64)) -> Result<()> {
        let head = self.head_of(target)?;
        let universe = head.universe;
        let (Some(pan_ch), Some(tilt_ch)) = (head.pan(), head.tilt()) else {
            bail!("{} has no pan/tilt channels", head.id);
        };
        let (pan_ch, tilt_ch) = (pan_ch.clone(), tilt_ch.clone());
        self.write_channel(universe, &pan_ch, pan)?;
        self.write_channel(universe, &tilt_ch, tilt)
    }

    /// Write a channel value through the channel's own pathway: inversion
    /// first, then the coarse/fine split if the channel is 16-bit.
    fn write_channel(&mut self, universe: usize, channel: &PatchedChannel, value: f64) -> Result<()> {
        let value = self.clamp(value);
        let value = if channel.spec.inverted {
            (255.0 - value).max(0.0)
        } else {
            value
        };
        match channel.fine_address {
            Some(fine_slot) => {
                let full = ((value * 256.0).round() as u32).min(65535);
                self.put(universe, channel.address, (full >> 8) as u8)?;
                self.put(universe, fine_slot, (full & 0xff) as u8)
            }
            None => self.put(universe, channel.address, unit_to_u8(value / 255.0)),
        }
    }

    /// Plain 8-bit write for slots with no patched channel metadata.
    fn write_byte(&mut self, universe: usize, slot: usize, value: f64) -> Result<()> {
        let value = self.clamp(value);
        self.put(universe, slot, unit_to_u8(value / 255.0))
    }

    fn clamp(&mut self, value: f64) -> f64 {
        if !(0.0..256.0).contains(&value) {
            self.clamped += 1;
        }
        value.clamp(0.0, CHANNEL_MAX)
    }

    fn put(&mut self, universe: usize, slot: usize, byte: u8) -> Result<()> {
        let Some(buffer) = self.buffers.get_mut(universe) else {
            bail!("universe {universe} has no buffer");
        };
        buffer[slot] = byte;
        Ok(())
    }
}

/// Recover the channel value encoded in a coarse/fine byte pair.
#[cfg(test)]
pub fn read_fine(coarse: u8, fine: u8) -> f64 {
    coarse as f64 + fine as f64 / 256.0
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::assign::Kind;
    use crate::dmx::DmxAddr;
    use crate::effect::EffectId;
    use crate::fixture::{ChannelKind, ChannelSpec, FixtureDef, HeadId, defs};
    use crate::spatial::{PanTiltCalibration, Placement};

    struct Rig {
        patch: Patch,
        wheel: WheelConfig,
        buffers: Vec<DmxBuffer>,
    }

    impl Rig {
        fn new(def: &FixtureDef) -> (Self, HeadId) {
            let mut patch = Patch::new();
            let id = patch
                .patch(def, 0, DmxAddr::new(1), Placement::default())
                .unwrap();
            (
                Self {
                    patch,
                    wheel: WheelConfig::default(),
                    buffers: vec![[0u8; 512]],
                },
                HeadId {
                    fixture: id,
                    index: 0,
                },
            )
        }

        fn resolve(&mut self, kind: Kind, target: Target, value: Value) -> Result<u64> {
            let mut resolver = Resolver::new(&self.patch, &self.wheel, &mut self.buffers);
            resolver.resolve(&Assignment {
                kind,
                target,
                value,
                effect: EffectId(0),
            })?;
            Ok(resolver.clamped)
        }
    }

    #[test]
    fn test_channel_write_rounds() {
        let (mut rig, _) = Rig::new(&defs::dimmer());
        rig.resolve(
            Kind::Channel,
            Target::Channel {
                universe: 0,
                addr: DmxAddr::new(1),
            },
            Value::Channel(127.5),
        )
        .unwrap();
        assert_eq!(128, rig.buffers[0][0]);
    }

    #[test]
    fn test_out_of_range_clamps_and_counts() {
        let (mut rig, _) = Rig::new(&defs::dimmer());
        let target = Target::Channel {
            universe: 0,
            addr: DmxAddr::new(1),
        };
        let clamped = rig
            .resolve(Kind::Channel, target.clone(), Value::Channel(300.0))
            .unwrap();
        assert_eq!(1, clamped);
        assert_eq!(255, rig.buffers[0][0]);
        let clamped = rig
            .resolve(Kind::Channel, target, Value::Channel(-5.0))
            .unwrap();
        assert_eq!(1, clamped);
        assert_eq!(0, rig.buffers[0][0]);
    }

    #[test]
    fn test_inversion_involution() {
        let def = FixtureDef {
            name: "pair".to_string(),
            channels: vec![
                ChannelSpec::new(ChannelKind::Generic, 1),
                ChannelSpec::new(ChannelKind::Generic, 2).inverted(),
            ],
            ..Default::default()
        };
        let (mut rig, _) = Rig::new(&def);
        for v in [0.0, 1.0, 63.25, 127.5, 200.0, 255.0] {
            rig.resolve(
                Kind::Channel,
                Target::Channel {
                    universe: 0,
                    addr: DmxAddr::new(1),
                },
                Value::Channel(v),
            )
            .unwrap();
            rig.resolve(
                Kind::Channel,
                Target::Channel {
                    universe: 0,
                    addr: DmxAddr::new(2),
                },
                Value::Channel(255.0 - v),
            )
            .unwrap();
            assert_eq!(
                rig.buffers[0][0], rig.buffers[0][1],
                "inversion not an involution at {v}"
            );
        }
    }

    #[test]
    fn test_fine_channel_round_trip() {
        let (mut rig, head) = Rig::new(&defs::moving_head());
        let mut v = 0.0;
        while v < 256.0 {
            rig.resolve(
                Kind::PanTilt,
                Target::Head(head),
                Value::PanTilt {
                    pan: std::f64::consts::PI * (v - 128.0) / 85.0,
                    tilt: 0.0,
                },
            )
            .unwrap();
            let recovered = read_fine(rig.buffers[0][0], rig.buffers[0][1]);
            let expected = v.clamp(0.0, CHANNEL_MAX);
            assert!(
                (recovered - expected).abs() <= 1.0 / 256.0 + 1e-6,
                "fine round trip off at {v}: {recovered}"
            );
            v += 17.37;
        }
    }

    #[test]
    fn test_pan_tilt_calibration() {
        let def = FixtureDef {
            name: "scanner".to_string(),
            channels: vec![
                ChannelSpec::new(ChannelKind::Pan, 1),
                ChannelSpec::new(ChannelKind::Tilt, 2),
            ],
            calibration: Some(PanTiltCalibration {
                pan_center: 84.0,
                pan_half_circle: 84.0,
                tilt_center: 8.0,
                tilt_half_circle: -214.0,
            }),
            ..Default::default()
        };
        let (mut rig, head) = Rig::new(&def);
        let clamped = rig
            .resolve(
                Kind::PanTilt,
                Target::Head(head),
                Value::PanTilt { pan: 0.0, tilt: 0.0 },
            )
            .unwrap();
        assert_eq!(0, clamped);
        assert_eq!(84, rig.buffers[0][0]);
        assert_eq!(8, rig.buffers[0][1]);
    }

    #[test]
    fn test_unreachable_orientation_clamps() {
        let (mut rig, head) = Rig::new(&defs::moving_head());
        let clamped = rig
            .resolve(
                Kind::PanTilt,
                Target::Head(head),
                Value::PanTilt {
                    pan: 20.0,
                    tilt: 0.0,
                },
            )
            .unwrap();
        assert_eq!(1, clamped);
        assert_eq!(255, rig.buffers[0][0]);
    }

    #[test]
    fn test_color_mixes_to_emitters() {
        let (mut rig, head) = Rig::new(&defs::rgb());
        rig.resolve(
            Kind::Color,
            Target::Head(head),
            Value::Color(Hsl::new(120.0, 100.0, 50.0)),
        )
        .unwrap();
        assert_eq!(&[0u8, 255, 0], &rig.buffers[0][..3]);
    }

    #[test]
    fn test_white_emitter_takes_common_component() {
        let (mut rig, head) = Rig::new(&defs::rgbw_par());
        rig.resolve(
            Kind::Color,
            Target::Head(head),
            Value::Color(Hsl::new(0.0, 0.0, 100.0)),
        )
        .unwrap();
        // Channels: dimmer, r, g, b, w.
        assert_eq!(&[0u8, 255, 255, 255, 255], &rig.buffers[0][..5]);
    }

    #[test]
    fn test_color_wheel_selection() {
        let (mut rig, head) = Rig::new(&defs::wheel_spot());
        // Hue 55 is nearest the yellow entry at 60; write its midpoint
        // (the yellow range is 64..127).
        rig.resolve(
            Kind::Color,
            Target::Head(head),
            Value::Color(Hsl::new(55.0, 80.0, 50.0)),
        )
        .unwrap();
        assert_eq!(95, rig.buffers[0][1]);

        // Hue 30 ties between red (0) and yellow (60); the higher hue wins.
        rig.buffers[0] = [0; 512];
        rig.resolve(
            Kind::Color,
            Target::Head(head),
            Value::Color(Hsl::new(30.0, 80.0, 50.0)),
        )
        .unwrap();
        assert_eq!(95, rig.buffers[0][1]);

        // A desaturated target selects nothing.
        rig.buffers[0] = [0; 512];
        rig.resolve(
            Kind::Color,
            Target::Head(head),
            Value::Color(Hsl::new(55.0, 10.0, 50.0)),
        )
        .unwrap();
        assert_eq!(0, rig.buffers[0][1]);
    }

    #[test]
    fn test_function_percent_maps_onto_range() {
        let (mut rig, head) = Rig::new(&defs::rgbw_par());
        // Strobe range is 16..255.
        rig.resolve(
            Kind::Function,
            Target::Head(head),
            Value::Function {
                tag: "strobe".into(),
                percent: 0.0,
            },
        )
        .unwrap();
        assert_eq!(16, rig.buffers[0][5]);
        rig.resolve(
            Kind::Function,
            Target::Head(head),
            Value::Function {
                tag: "strobe".into(),
                percent: 100.0,
            },
        )
        .unwrap();
        assert_eq!(255, rig.buffers[0][5]);

        let err = rig
            .resolve(
                Kind::Function,
                Target::Head(head),
                Value::Function {
                    tag: "smoke".into(),
                    percent: 50.0,
                },
            )
            .unwrap_err();
        assert!(format!("{err:#}").contains("no function 'smoke'"));
    }

    #[test]
    fn test_aim_points_the_head() {
        let mut patch = Patch::new();
        // Head at the origin looking forward (+z).
        let id = patch
            .patch(
                &defs::moving_head(),
                0,
                DmxAddr::new(1),
                Placement::default(),
            )
            .unwrap();
        let head = HeadId {
            fixture: id,
            index: 0,
        };
        let mut rig = Rig {
            patch,
            wheel: WheelConfig::default(),
            buffers: vec![[0u8; 512]],
        };
        rig.resolve(
            Kind::Aim,
            Target::Head(head),
            Value::Aim(glam::DVec3::new(0.0, 0.0, 5.0)),
        )
        .unwrap();
        // Aiming straight ahead lands on the calibration centers.
        assert_eq!(128, rig.buffers[0][0]);
        assert_eq!(128, rig.buffers[0][2]);
    }
}
