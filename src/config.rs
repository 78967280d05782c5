//! Engine options and the YAML show-file schema.
use std::fs::File;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, ensure};
use glam::DVec3;
use serde::Deserialize;

use crate::color::WheelConfig;
use crate::dmx::{DmxAddr, UniverseId};
use crate::fixture::{Patch, defs, rotation_from_deg};
use crate::spatial::Placement;

/// Engine configuration, all optional in the show file.
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ShowOptions {
    /// Render tick period in milliseconds. Minimum 5.
    pub refresh_interval_ms: u64,
    /// Maximum hue distance (degrees) for color-wheel selection.
    pub color_wheel_hue_tolerance: f64,
    /// Minimum saturation (%) before the color wheel engages.
    pub color_wheel_min_saturation: f64,
    /// Beats per bar.
    pub bar_length: u32,
    /// Bars per phrase.
    pub phrase_length: u32,
    /// Initial tempo.
    pub bpm: f64,
}

impl Default for ShowOptions {
    fn default() -> Self {
        Self {
            refresh_interval_ms: 25,
            color_wheel_hue_tolerance: 60.0,
            color_wheel_min_saturation: 40.0,
            bar_length: 4,
            phrase_length: 8,
            bpm: crate::metronome::DEFAULT_BPM,
        }
    }
}

impl ShowOptions {
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.refresh_interval_ms >= 5,
            "refresh interval {}ms is below the 5ms minimum",
            self.refresh_interval_ms
        );
        ensure!(
            self.bar_length >= 1 && self.phrase_length >= 1,
            "bar and phrase lengths must be at least 1"
        );
        ensure!(self.bpm > 0.0, "bpm must be positive");
        Ok(())
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    pub fn wheel(&self) -> WheelConfig {
        WheelConfig {
            hue_tolerance: self.color_wheel_hue_tolerance,
            min_saturation: self.color_wheel_min_saturation,
        }
    }
}

/// One fixture to patch from a show file.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FixtureEntry {
    /// Name of a built-in fixture definition.
    pub fixture: String,

    #[serde(default)]
    pub universe: UniverseId,

    pub addr: DmxAddr,

    /// Position in show space, meters.
    #[serde(default)]
    pub position: [f64; 3],

    /// Orientation: yaw, pitch, roll in degrees.
    #[serde(default)]
    pub rotation_deg: [f64; 3],
}

impl FixtureEntry {
    pub fn placement(&self) -> Placement {
        Placement::new(
            DVec3::from_array(self.position),
            rotation_from_deg(self.rotation_deg),
        )
    }
}

/// A whole show file: options plus the fixture patch.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShowFile {
    #[serde(default)]
    pub options: ShowOptions,
    pub fixtures: Vec<FixtureEntry>,
}

impl ShowFile {
    pub fn from_file(path: &Path) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("opening show file {}", path.display()))?;
        let show: ShowFile = serde_yaml::from_reader(file)
            .with_context(|| format!("parsing show file {}", path.display()))?;
        show.options.validate()?;
        Ok(show)
    }

    /// Patch every fixture entry into a fresh patch.
    pub fn build_patch(&self) -> Result<Patch> {
        let mut patch = Patch::new();
        for entry in &self.fixtures {
            let def = defs::by_name(&entry.fixture).ok_or_else(|| {
                anyhow!(
                    "unknown fixture '{}' (available: {})",
                    entry.fixture,
                    defs::names().join(", ")
                )
            })?;
            patch
                .patch(&def, entry.universe, entry.addr, entry.placement())
                .with_context(|| format!("patching {}", entry.fixture))?;
        }
        Ok(patch)
    }
}
