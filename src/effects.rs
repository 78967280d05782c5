//! A small library of ready-made effects.
//!
//! These are ordinary [`Effect`] implementations; hosting applications are
//! expected to bring their own. Each holds its targets and parameters, runs
//! until ended (or until its bounded duration elapses), and supports optional
//! fade-in and fade-out.
use anyhow::Result;
use glam::DVec3;

use crate::assign::{Assigner, Value};
use crate::color::Hsl;
use crate::dmx::{DmxAddr, UniverseId};
use crate::effect::{Effect, TimeSpan};
use crate::fixture::{FunctionTag, HeadId};
use crate::metronome::Snapshot;
use crate::param::{FrameCtx, Param};

/// Shared temporal shape: fades and an optional bounded duration.
#[derive(Clone, Copy, Debug, Default)]
pub struct Envelope {
    pub fade_in: Option<TimeSpan>,
    pub fade_out: Option<TimeSpan>,
    pub duration: Option<TimeSpan>,
}

impl Envelope {
    fn expired(&self, started: Option<&Snapshot>, now: &Snapshot) -> bool {
        match (self.duration, started) {
            (Some(d), Some(s)) => d.elapsed(s, now),
            _ => false,
        }
    }
}

macro_rules! envelope_hooks {
    () => {
        fn still_active(&self, ctx: &FrameCtx) -> bool {
            !self.envelope.expired(self.started.as_ref(), ctx.snapshot)
        }

        fn fade_in(&self) -> Option<TimeSpan> {
            self.envelope.fade_in
        }

        fn fade_out(&self) -> Option<TimeSpan> {
            self.envelope.fade_out
        }
    };
}

/// Hold one raw DMX channel at a parameterized level.
pub struct StaticChannel {
    universe: UniverseId,
    addr: DmxAddr,
    level: Param<f64>,
    pub envelope: Envelope,
    started: Option<Snapshot>,
}

impl StaticChannel {
    pub fn new(universe: UniverseId, addr: DmxAddr, level: impl Into<Param<f64>>) -> Self {
        Self {
            universe,
            addr,
            level: level.into(),
            envelope: Envelope::default(),
            started: None,
        }
    }

    pub fn with_envelope(mut self, envelope: Envelope) -> Self {
        self.envelope = envelope;
        self
    }
}

impl Effect for StaticChannel {
    fn generate(&mut self, ctx: &FrameCtx) -> Result<Vec<Assigner>> {
        self.started.get_or_insert(*ctx.snapshot);
        let level = self.level.clone();
        Ok(vec![Assigner::channel(
            self.universe,
            self.addr,
            move |ctx, _| Ok(Some(Value::Channel(level.resolve(ctx, None)))),
        )])
    }

    envelope_hooks!();
}

/// Hold the dimmer channel of a set of heads at a percentage.
///
/// Heads without a dimmer channel are skipped.
pub struct DimmerLevel {
    heads: Vec<HeadId>,
    percent: Param<f64>,
    pub envelope: Envelope,
    started: Option<Snapshot>,
}

impl DimmerLevel {
    pub fn new(heads: Vec<HeadId>, percent: impl Into<Param<f64>>) -> Self {
        Self {
            heads,
            percent: percent.into(),
            envelope: Envelope::default(),
            started: None,
        }
    }

    pub fn with_envelope(mut self, envelope: Envelope) -> Self {
        self.envelope = envelope;
        self
    }
}

impl Effect for DimmerLevel {
    fn generate(&mut self, ctx: &FrameCtx) -> Result<Vec<Assigner>> {
        self.started.get_or_insert(*ctx.snapshot);
        let mut assigners = Vec::with_capacity(self.heads.len());
        for &head in &self.heads {
            let Some(dimmer) = ctx.patch.head(head)?.dimmer() else {
                continue;
            };
            let universe = ctx.patch.head(head)?.universe;
            let addr = DmxAddr::new(dimmer.address + 1);
            let percent = self.percent.clone();
            assigners.push(Assigner::channel(universe, addr, move |ctx, _| {
                let pct = percent.resolve(ctx, Some(head)).clamp(0.0, 100.0);
                Ok(Some(Value::Channel(pct / 100.0 * 255.0)))
            }));
        }
        Ok(assigners)
    }

    envelope_hooks!();
}

/// Hold a parameterized color on a set of heads.
pub struct SolidColor {
    heads: Vec<HeadId>,
    color: Param<Hsl>,
    pub envelope: Envelope,
    started: Option<Snapshot>,
}

impl SolidColor {
    pub fn new(heads: Vec<HeadId>, color: impl Into<Param<Hsl>>) -> Self {
        Self {
            heads,
            color: color.into(),
            envelope: Envelope::default(),
            started: None,
        }
    }

    pub fn with_envelope(mut self, envelope: Envelope) -> Self {
        self.envelope = envelope;
        self
    }
}

impl Effect for SolidColor {
    fn generate(&mut self, ctx: &FrameCtx) -> Result<Vec<Assigner>> {
        self.started.get_or_insert(*ctx.snapshot);
        Ok(self
            .heads
            .iter()
            .map(|&head| {
                let color = self.color.clone();
                Assigner::color(head, move |ctx, _| {
                    Ok(Some(Value::Color(color.resolve(ctx, Some(head)))))
                })
            })
            .collect())
    }

    envelope_hooks!();
}

/// Hold a named function at a percentage on a set of heads.
pub struct FunctionLevel {
    heads: Vec<HeadId>,
    tag: FunctionTag,
    percent: Param<f64>,
    pub envelope: Envelope,
    started: Option<Snapshot>,
}

impl FunctionLevel {
    pub fn new(heads: Vec<HeadId>, tag: &str, percent: impl Into<Param<f64>>) -> Self {
        Self {
            heads,
            tag: tag.into(),
            percent: percent.into(),
            envelope: Envelope::default(),
            started: None,
        }
    }
}

impl Effect for FunctionLevel {
    fn generate(&mut self, ctx: &FrameCtx) -> Result<Vec<Assigner>> {
        self.started.get_or_insert(*ctx.snapshot);
        Ok(self
            .heads
            .iter()
            .map(|&head| {
                let tag = self.tag.clone();
                let percent = self.percent.clone();
                Assigner::function(head, move |ctx, _| {
                    Ok(Some(Value::Function {
                        tag,
                        percent: percent.resolve(ctx, Some(head)),
                    }))
                })
            })
            .collect())
    }

    envelope_hooks!();
}

/// Point a set of moving heads at a show-space point.
pub struct AimPoint {
    heads: Vec<HeadId>,
    point: Param<DVec3>,
    pub envelope: Envelope,
    started: Option<Snapshot>,
}

impl AimPoint {
    pub fn new(heads: Vec<HeadId>, point: impl Into<Param<DVec3>>) -> Self {
        Self {
            heads,
            point: point.into(),
            envelope: Envelope::default(),
            started: None,
        }
    }
}

impl Effect for AimPoint {
    fn generate(&mut self, ctx: &FrameCtx) -> Result<Vec<Assigner>> {
        self.started.get_or_insert(*ctx.snapshot);
        Ok(self
            .heads
            .iter()
            .map(|&head| {
                let point = self.point.clone();
                Assigner::aim(head, move |ctx, _| {
                    Ok(Some(Value::Aim(point.resolve(ctx, Some(head)))))
                })
            })
            .collect())
    }

    envelope_hooks!();
}

/// Hold a set of moving heads along a fixed world direction.
pub struct HoldDirection {
    heads: Vec<HeadId>,
    direction: Param<DVec3>,
    pub envelope: Envelope,
    started: Option<Snapshot>,
}

impl HoldDirection {
    pub fn new(heads: Vec<HeadId>, direction: impl Into<Param<DVec3>>) -> Self {
        Self {
            heads,
            direction: direction.into(),
            envelope: Envelope::default(),
            started: None,
        }
    }
}

impl Effect for HoldDirection {
    fn generate(&mut self, ctx: &FrameCtx) -> Result<Vec<Assigner>> {
        self.started.get_or_insert(*ctx.snapshot);
        Ok(self
            .heads
            .iter()
            .map(|&head| {
                let direction = self.direction.clone();
                Assigner::direction(head, move |ctx, _| {
                    Ok(Some(Value::Direction(direction.resolve(ctx, Some(head)))))
                })
            })
            .collect())
    }

    envelope_hooks!();
}

/// Beat-synced pan/tilt sweep. The pan and tilt parameters are angles in
/// radians; drive them with oscillators for motion.
pub struct Sweep {
    heads: Vec<HeadId>,
    pan: Param<f64>,
    tilt: Param<f64>,
    pub envelope: Envelope,
    started: Option<Snapshot>,
}

impl Sweep {
    pub fn new(heads: Vec<HeadId>, pan: impl Into<Param<f64>>, tilt: impl Into<Param<f64>>) -> Self {
        Self {
            heads,
            pan: pan.into(),
            tilt: tilt.into(),
            envelope: Envelope::default(),
            started: None,
        }
    }
}

impl Effect for Sweep {
    fn generate(&mut self, ctx: &FrameCtx) -> Result<Vec<Assigner>> {
        self.started.get_or_insert(*ctx.snapshot);
        Ok(self
            .heads
            .iter()
            .map(|&head| {
                let pan = self.pan.clone();
                let tilt = self.tilt.clone();
                Assigner::pan_tilt(head, move |ctx, _| {
                    Ok(Some(Value::PanTilt {
                        pan: pan.resolve(ctx, Some(head)),
                        tilt: tilt.resolve(ctx, Some(head)),
                    }))
                })
            })
            .collect())
    }

    envelope_hooks!();
}

#[cfg(test)]
mod test {
    use std::time::{Duration, Instant};

    use super::*;
    use crate::assign::Kind;
    use crate::effect::EffectId;
    use crate::fixture::{Patch, defs};
    use crate::metronome::Metronome;
    use crate::param::Variables;
    use crate::spatial::Placement;

    struct Rig {
        patch: Patch,
        variables: Variables,
        head: HeadId,
    }

    fn rig() -> Rig {
        let mut patch = Patch::new();
        let id = patch
            .patch(&defs::rgbw_par(), 0, DmxAddr::new(1), Placement::default())
            .unwrap();
        Rig {
            patch,
            variables: Variables::new(),
            head: HeadId {
                fixture: id,
                index: 0,
            },
        }
    }

    fn snapshot(secs: f64) -> Snapshot {
        let base = Instant::now();
        let mut m = Metronome::new(120.0, 4, 8);
        m.snapshot(base);
        m.snapshot(base + Duration::from_secs_f64(secs))
    }

    #[test]
    fn test_dimmer_emits_channel_value() {
        let r = rig();
        let snapshot = snapshot(0.0);
        let ctx = FrameCtx {
            patch: &r.patch,
            snapshot: &snapshot,
            variables: &r.variables,
        };
        let mut effect = DimmerLevel::new(vec![r.head], 50.0);
        let assigners = effect.generate(&ctx).unwrap();
        assert_eq!(1, assigners.len());
        let assignment = assigners
            .into_iter()
            .next()
            .unwrap()
            .produce(&ctx, None, EffectId(0))
            .unwrap()
            .unwrap();
        assert_eq!(Kind::Channel, assignment.kind);
        assert_eq!(Value::Channel(127.5), assignment.value);
    }

    #[test]
    fn test_bounded_duration_expires() {
        let r = rig();
        let start = snapshot(0.0);
        let later = snapshot(3.0);
        let mut effect = SolidColor::new(vec![r.head], Hsl::new(0.0, 100.0, 50.0)).with_envelope(
            Envelope {
                duration: Some(TimeSpan::Seconds(2.0)),
                ..Default::default()
            },
        );

        let ctx = FrameCtx {
            patch: &r.patch,
            snapshot: &start,
            variables: &r.variables,
        };
        assert!(effect.still_active(&ctx));
        effect.generate(&ctx).unwrap();
        assert!(effect.still_active(&ctx));

        let ctx = FrameCtx {
            patch: &r.patch,
            snapshot: &later,
            variables: &r.variables,
        };
        assert!(!effect.still_active(&ctx));
    }

    #[test]
    fn test_duration_in_beats() {
        let r = rig();
        // 120 bpm: 4 beats = 2 seconds.
        let start = snapshot(0.0);
        let mid = snapshot(1.0);
        let past = snapshot(2.5);
        let mut effect = DimmerLevel::new(vec![r.head], 100.0).with_envelope(Envelope {
            duration: Some(TimeSpan::Beats(4.0)),
            ..Default::default()
        });
        let ctx = FrameCtx {
            patch: &r.patch,
            snapshot: &start,
            variables: &r.variables,
        };
        effect.generate(&ctx).unwrap();
        let ctx = FrameCtx {
            patch: &r.patch,
            snapshot: &mid,
            variables: &r.variables,
        };
        assert!(effect.still_active(&ctx));
        let ctx = FrameCtx {
            patch: &r.patch,
            snapshot: &past,
            variables: &r.variables,
        };
        assert!(!effect.still_active(&ctx));
    }
}
