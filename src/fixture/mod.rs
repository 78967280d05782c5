//! Fixture and channel models: what a lighting device looks like on the wire
//! and where it hangs in space.
use std::borrow::Borrow;
use std::fmt::Display;
use std::ops::Deref;

use anyhow::{Result, ensure};
use glam::{DMat3, DVec3};
use serde::{Deserialize, Serialize};
use strum_macros::Display as StrumDisplay;

use crate::color::ColorComponent;
use crate::dmx::{DmxAddr, UNIVERSE_SIZE, UniverseId};
use crate::spatial::{PanTiltCalibration, Placement};

pub mod defs;
pub mod patch;

pub use patch::Patch;

/// Name of a function selectable on a function channel.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FunctionTag(pub String);

impl FunctionTag {
    pub fn new<S: Into<String>>(v: S) -> Self {
        Self(v.into())
    }
}

impl Display for FunctionTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Deref for FunctionTag {
    type Target = str;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Borrow<str> for FunctionTag {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for FunctionTag {
    fn from(v: &str) -> Self {
        Self(v.to_string())
    }
}

/// Curve applied to a function percentage before mapping onto its DMX range.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, StrumDisplay,
)]
#[serde(rename_all = "snake_case")]
pub enum ScaleCurve {
    #[default]
    Linear,
    Quadratic,
    SquareRoot,
}

impl ScaleCurve {
    /// Apply the curve to a unit value.
    pub fn apply(&self, v: f64) -> f64 {
        let v = v.clamp(0.0, 1.0);
        match self {
            Self::Linear => v,
            Self::Quadratic => v * v,
            Self::SquareRoot => v.sqrt(),
        }
    }
}

/// One selectable function on a function channel: a byte range with a tag.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FunctionRange {
    pub tag: FunctionTag,
    pub low: u8,
    pub high: u8,
    /// Hue of this entry, for color-wheel channels.
    #[serde(default)]
    pub hue: Option<f64>,
    #[serde(default)]
    pub curve: ScaleCurve,
}

impl FunctionRange {
    pub fn new(tag: &str, low: u8, high: u8) -> Self {
        Self {
            tag: tag.into(),
            low,
            high,
            hue: None,
            curve: ScaleCurve::default(),
        }
    }

    pub fn with_hue(mut self, hue: f64) -> Self {
        self.hue = Some(hue);
        self
    }

    /// Midpoint of the range; the value written for wheel selections.
    pub fn midpoint(&self) -> u8 {
        (self.low as u16 + self.high as u16).div_euclid(2) as u8
    }

    /// Map a percentage onto this range, applying the scale curve.
    pub fn value_for_percent(&self, percent: f64) -> f64 {
        let scaled = self.curve.apply(percent.clamp(0.0, 100.0) / 100.0);
        self.low as f64 + scaled * (self.high - self.low) as f64
    }
}

/// What a channel drives on the fixture.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Pan,
    Tilt,
    Dimmer,
    Focus,
    Strobe,
    Shutter,
    Generic,
    Color(ColorComponent),
    /// A channel whose byte ranges select named functions.
    ///
    /// The ranges must partition the full byte space: sorted, contiguous,
    /// covering 0 through 255, so every byte value selects exactly one
    /// function.
    Function(Vec<FunctionRange>),
}

impl ChannelKind {
    pub fn function_ranges(&self) -> Option<&[FunctionRange]> {
        match self {
            Self::Function(ranges) => Some(ranges),
            _ => None,
        }
    }

    pub fn color_component(&self) -> Option<&ColorComponent> {
        match self {
            Self::Color(c) => Some(c),
            _ => None,
        }
    }
}

/// A single channel declared by a fixture or head.
///
/// `offset` is 1-based within the fixture's footprint; the patch combines it
/// with the base address to produce an absolute universe slot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChannelSpec {
    pub kind: ChannelKind,
    pub offset: usize,
    /// Offset of the fine byte for 16-bit channels.
    #[serde(default)]
    pub fine_offset: Option<usize>,
    /// If true, the emitted byte is flipped (255 - value).
    #[serde(default)]
    pub inverted: bool,
}

impl ChannelSpec {
    pub fn new(kind: ChannelKind, offset: usize) -> Self {
        Self {
            kind,
            offset,
            fine_offset: None,
            inverted: false,
        }
    }

    pub fn with_fine(mut self, offset: usize) -> Self {
        self.fine_offset = Some(offset);
        self
    }

    pub fn inverted(mut self) -> Self {
        self.inverted = true;
        self
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.offset >= 1, "channel offsets are 1-based");
        if let Some(fine) = self.fine_offset {
            ensure!(fine >= 1, "channel offsets are 1-based");
            ensure!(
                fine != self.offset,
                "fine offset {fine} collides with the coarse offset"
            );
        }
        if let Some(ranges) = self.kind.function_ranges() {
            ensure!(!ranges.is_empty(), "function channel declares no ranges");
            for range in ranges {
                ensure!(
                    range.low <= range.high,
                    "function range '{}' is inverted",
                    range.tag
                );
            }
            ensure!(
                ranges[0].low == 0,
                "function range '{}' starts at {}; ranges must cover the byte space from 0",
                ranges[0].tag,
                ranges[0].low
            );
            for pair in ranges.windows(2) {
                ensure!(
                    pair[1].low as u16 == pair[0].high as u16 + 1,
                    "function ranges '{}' and '{}' must be sorted and contiguous",
                    pair[0].tag,
                    pair[1].tag
                );
            }
            let last = &ranges[ranges.len() - 1];
            ensure!(
                last.high == 255,
                "function range '{}' ends at {}; ranges must cover the byte space to 255",
                last.tag,
                last.high
            );
        }
        Ok(())
    }
}

/// A sub-entity of a fixture with its own channels and placement.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HeadDef {
    #[serde(default)]
    pub channels: Vec<ChannelSpec>,
    /// Position relative to the fixture, in meters.
    #[serde(default)]
    pub position: [f64; 3],
    /// Rotation relative to the fixture: yaw, pitch, roll in degrees.
    #[serde(default)]
    pub rotation_deg: [f64; 3],
    #[serde(default)]
    pub calibration: Option<PanTiltCalibration>,
}

/// A fixture model: everything needed to patch one.
///
/// Channels declared directly on the fixture become head 0 of the patched
/// fixture; declared heads follow in order.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FixtureDef {
    pub name: String,
    #[serde(default)]
    pub channels: Vec<ChannelSpec>,
    #[serde(default)]
    pub calibration: Option<PanTiltCalibration>,
    #[serde(default)]
    pub heads: Vec<HeadDef>,
}

impl FixtureDef {
    pub fn validate(&self) -> Result<()> {
        ensure!(!self.name.is_empty(), "fixture definition has no name");
        ensure!(
            !self.channels.is_empty() || self.heads.iter().any(|h| !h.channels.is_empty()),
            "fixture '{}' declares no channels",
            self.name
        );
        for ch in self.all_channels() {
            ch.validate()?;
        }
        ensure!(
            self.footprint() <= UNIVERSE_SIZE,
            "fixture '{}' is wider than a universe",
            self.name
        );
        Ok(())
    }

    /// Number of universe slots the fixture spans from its base address.
    pub fn footprint(&self) -> usize {
        self.all_channels()
            .flat_map(|c| [Some(c.offset), c.fine_offset])
            .flatten()
            .max()
            .unwrap_or(0)
    }

    fn all_channels(&self) -> impl Iterator<Item = &ChannelSpec> {
        self.channels
            .iter()
            .chain(self.heads.iter().flat_map(|h| h.channels.iter()))
    }
}

/// Build a rotation matrix from yaw, pitch, roll in degrees.
pub fn rotation_from_deg([yaw, pitch, roll]: [f64; 3]) -> DMat3 {
    DMat3::from_rotation_y(yaw.to_radians())
        * DMat3::from_rotation_x(pitch.to_radians())
        * DMat3::from_rotation_z(roll.to_radians())
}

/// Identity of a patched fixture within the show.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct FixtureId(pub usize);

impl Display for FixtureId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "fixture {}", self.0)
    }
}

/// Identity of one head of a patched fixture.
///
/// Head 0 is the fixture's own channel list; declared heads follow.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct HeadId {
    pub fixture: FixtureId,
    pub index: usize,
}

impl Display for HeadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} head {}", self.fixture, self.index)
    }
}

/// A channel bound to an absolute slot in its universe.
#[derive(Clone, Debug)]
pub struct PatchedChannel {
    pub spec: ChannelSpec,
    /// 0-based index into the universe buffer.
    pub address: usize,
    pub fine_address: Option<usize>,
}

/// A fully addressed head: channels with absolute slots, world placement.
#[derive(Clone, Debug)]
pub struct Head {
    pub id: HeadId,
    pub universe: UniverseId,
    pub channels: Vec<PatchedChannel>,
    pub position: DVec3,
    pub rotation: DMat3,
    pub calibration: Option<PanTiltCalibration>,
}

impl Head {
    fn find(&self, pred: impl Fn(&ChannelKind) -> bool) -> Option<&PatchedChannel> {
        self.channels.iter().find(|c| pred(&c.spec.kind))
    }

    pub fn dimmer(&self) -> Option<&PatchedChannel> {
        self.find(|k| matches!(k, ChannelKind::Dimmer))
    }

    pub fn pan(&self) -> Option<&PatchedChannel> {
        self.find(|k| matches!(k, ChannelKind::Pan))
    }

    pub fn tilt(&self) -> Option<&PatchedChannel> {
        self.find(|k| matches!(k, ChannelKind::Tilt))
    }

    /// All color-mixing channels on this head.
    pub fn color_channels(
        &self,
    ) -> impl Iterator<Item = (&PatchedChannel, &ColorComponent)> {
        self.channels
            .iter()
            .filter_map(|c| c.spec.kind.color_component().map(|comp| (c, comp)))
    }

    /// All function ranges on this head, channel by channel.
    pub fn function_ranges(&self) -> impl Iterator<Item = (&PatchedChannel, &FunctionRange)> {
        self.channels.iter().flat_map(|c| {
            c.spec
                .kind
                .function_ranges()
                .unwrap_or_default()
                .iter()
                .map(move |r| (c, r))
        })
    }

    /// Locate the function range carrying the given tag.
    pub fn find_function(&self, tag: &str) -> Option<(&PatchedChannel, &FunctionRange)> {
        self.function_ranges().find(|(_, r)| &*r.tag == tag)
    }

    /// Color-wheel entries: function ranges that carry a hue.
    pub fn wheel_entries(&self) -> impl Iterator<Item = (&PatchedChannel, &FunctionRange)> {
        self.function_ranges().filter(|(_, r)| r.hue.is_some())
    }
}

/// A fixture bound to a universe, base address, and place in the world.
#[derive(Clone, Debug)]
pub struct Fixture {
    pub id: FixtureId,
    pub name: String,
    pub universe: UniverseId,
    pub addr: DmxAddr,
    pub placement: Placement,
    pub heads: Vec<Head>,
}

impl Fixture {
    pub fn head_ids(&self) -> impl Iterator<Item = HeadId> + '_ {
        self.heads.iter().map(|h| h.id)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_channel_validation() {
        assert!(ChannelSpec::new(ChannelKind::Dimmer, 1).validate().is_ok());
        assert!(ChannelSpec::new(ChannelKind::Dimmer, 0).validate().is_err());
        assert!(
            ChannelSpec::new(ChannelKind::Pan, 1)
                .with_fine(1)
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_function_ranges_must_partition_the_byte_space() {
        let function = |ranges| ChannelSpec::new(ChannelKind::Function(ranges), 1);

        let ok = function(vec![
            FunctionRange::new("closed", 0, 7),
            FunctionRange::new("open", 8, 255),
        ]);
        assert!(ok.validate().is_ok());

        // Overlapping ranges would select two functions for one byte.
        let overlapping = function(vec![
            FunctionRange::new("a", 0, 10),
            FunctionRange::new("b", 10, 255),
        ]);
        assert!(overlapping.validate().is_err());

        // A gap would leave bytes that select no function at all.
        let gapped = function(vec![
            FunctionRange::new("a", 0, 10),
            FunctionRange::new("b", 12, 255),
        ]);
        assert!(gapped.validate().is_err());

        let starts_late = function(vec![FunctionRange::new("a", 1, 255)]);
        assert!(starts_late.validate().is_err());

        let ends_early = function(vec![FunctionRange::new("a", 0, 254)]);
        assert!(ends_early.validate().is_err());

        let empty = function(vec![]);
        assert!(empty.validate().is_err());
    }

    #[test]
    fn test_footprint_includes_fine_channels() {
        let def = FixtureDef {
            name: "test".to_string(),
            channels: vec![
                ChannelSpec::new(ChannelKind::Pan, 1).with_fine(5),
                ChannelSpec::new(ChannelKind::Dimmer, 2),
            ],
            ..Default::default()
        };
        assert_eq!(5, def.footprint());
        assert!(def.validate().is_ok());
    }

    #[test]
    fn test_percent_mapping() {
        let r = FunctionRange::new("open", 0, 255);
        assert_eq!(0.0, r.value_for_percent(0.0));
        assert_eq!(255.0, r.value_for_percent(100.0));
        assert_eq!(127.5, r.value_for_percent(50.0));

        let narrow = FunctionRange::new("slow", 10, 20);
        assert_eq!(15.0, narrow.value_for_percent(50.0));
        assert_eq!(15, narrow.midpoint());
    }
}
