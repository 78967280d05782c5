//! Assigners, assignments, and the fade kernel.
//!
//! An effect emits [`Assigner`]s each frame: typed requests to set a value on
//! a target, each aware of whatever a lower-priority effect already assigned.
//! The renderer folds assigners into one final [`Assignment`] per
//! `(kind, target)` and hands those to the resolver.
use std::fmt::Display;

use anyhow::{Result, ensure};
use glam::DVec3;

use crate::color::Hsl;
use crate::dmx::{DmxAddr, UniverseId};
use crate::effect::EffectId;
use crate::fixture::{FunctionTag, HeadId};
use crate::param::FrameCtx;
use crate::spatial::{self, DOWN};
use crate::util::lerp;

/// The kind of value an assignment carries.
///
/// Built-in kinds resolve in the fixed order of [`Kind::CORE`]; extension
/// kinds registered by the hosting application resolve afterwards.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum Kind {
    Channel,
    Function,
    Color,
    PanTilt,
    Direction,
    Aim,
    Extension(String),
}

impl Kind {
    /// Built-in kinds in resolution order. Later stages translate down to
    /// channel writes, so higher-level kinds win contended channels.
    pub const CORE: [Kind; 6] = [
        Kind::Channel,
        Kind::Function,
        Kind::Color,
        Kind::PanTilt,
        Kind::Direction,
        Kind::Aim,
    ];
}

impl Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Channel => write!(f, "channel"),
            Self::Function => write!(f, "function"),
            Self::Color => write!(f, "color"),
            Self::PanTilt => write!(f, "pan-tilt"),
            Self::Direction => write!(f, "direction"),
            Self::Aim => write!(f, "aim"),
            Self::Extension(tag) => write!(f, "extension({tag})"),
        }
    }
}

/// What an assignment applies to.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum Target {
    /// A raw universe slot.
    Channel { universe: UniverseId, addr: DmxAddr },
    /// A patched head.
    Head(HeadId),
    /// An entity known only to an extension.
    Named(String),
}

impl Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Channel { universe, addr } => write!(f, "universe {universe} @ {addr}"),
            Self::Head(id) => write!(f, "{id}"),
            Self::Named(name) => write!(f, "'{name}'"),
        }
    }
}

/// A typed assignment value.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// A raw channel level in [0, 256); the fraction drives the fine byte.
    Channel(f64),
    /// A percentage applied to a named function.
    Function { tag: FunctionTag, percent: f64 },
    Color(Hsl),
    /// Pan and tilt angles in radians.
    PanTilt { pan: f64, tilt: f64 },
    /// A unit direction in show space.
    Direction(DVec3),
    /// A point in show space to aim at.
    Aim(DVec3),
    /// An extension payload.
    Number(f64),
}

impl Value {
    /// Whether this value is legal for the given kind.
    fn matches(&self, kind: &Kind) -> bool {
        matches!(
            (kind, self),
            (Kind::Channel, Value::Channel(_))
                | (Kind::Function, Value::Function { .. })
                | (Kind::Color, Value::Color(_))
                | (Kind::PanTilt, Value::PanTilt { .. })
                | (Kind::Direction, Value::Direction(_))
                | (Kind::Aim, Value::Aim(_))
                | (Kind::Extension(_), _)
        )
    }
}

/// Whether a kind may address the given target shape.
fn target_matches(kind: &Kind, target: &Target) -> bool {
    match kind {
        Kind::Channel => matches!(target, Target::Channel { .. }),
        Kind::Function | Kind::Color | Kind::PanTilt | Kind::Direction | Kind::Aim => {
            matches!(target, Target::Head(_))
        }
        Kind::Extension(_) => true,
    }
}

/// A resolved value for one target, still typed, owned by an effect.
#[derive(Clone, Debug)]
pub struct Assignment {
    pub kind: Kind,
    pub target: Target,
    pub value: Value,
    pub effect: EffectId,
}

/// Computes an assigner's value given the previous assignment for its target.
///
/// Returning `Ok(None)` vetoes: the target reverts to "no assignment".
pub type Producer = Box<dyn FnOnce(&FrameCtx, Option<&Assignment>) -> Result<Option<Value>> + Send>;

/// An effect's per-frame request to set a value of one kind on one target.
pub struct Assigner {
    pub kind: Kind,
    pub target: Target,
    producer: Producer,
}

impl Assigner {
    pub fn new(kind: Kind, target: Target, producer: Producer) -> Self {
        Self {
            kind,
            target,
            producer,
        }
    }

    pub fn channel(
        universe: UniverseId,
        addr: DmxAddr,
        producer: impl FnOnce(&FrameCtx, Option<&Assignment>) -> Result<Option<Value>> + Send + 'static,
    ) -> Self {
        Self::new(
            Kind::Channel,
            Target::Channel { universe, addr },
            Box::new(producer),
        )
    }

    pub fn function(
        head: HeadId,
        producer: impl FnOnce(&FrameCtx, Option<&Assignment>) -> Result<Option<Value>> + Send + 'static,
    ) -> Self {
        Self::new(Kind::Function, Target::Head(head), Box::new(producer))
    }

    pub fn color(
        head: HeadId,
        producer: impl FnOnce(&FrameCtx, Option<&Assignment>) -> Result<Option<Value>> + Send + 'static,
    ) -> Self {
        Self::new(Kind::Color, Target::Head(head), Box::new(producer))
    }

    pub fn pan_tilt(
        head: HeadId,
        producer: impl FnOnce(&FrameCtx, Option<&Assignment>) -> Result<Option<Value>> + Send + 'static,
    ) -> Self {
        Self::new(Kind::PanTilt, Target::Head(head), Box::new(producer))
    }

    pub fn direction(
        head: HeadId,
        producer: impl FnOnce(&FrameCtx, Option<&Assignment>) -> Result<Option<Value>> + Send + 'static,
    ) -> Self {
        Self::new(Kind::Direction, Target::Head(head), Box::new(producer))
    }

    pub fn aim(
        head: HeadId,
        producer: impl FnOnce(&FrameCtx, Option<&Assignment>) -> Result<Option<Value>> + Send + 'static,
    ) -> Self {
        Self::new(Kind::Aim, Target::Head(head), Box::new(producer))
    }

    /// Run the producer and wrap its value into an assignment.
    ///
    /// The previous assignment, if any, must share this assigner's kind and
    /// target; the produced value must be legal for the kind. Either
    /// violation fails fast.
    pub fn produce(
        self,
        ctx: &FrameCtx,
        prev: Option<&Assignment>,
        effect: EffectId,
    ) -> Result<Option<Assignment>> {
        ensure!(
            target_matches(&self.kind, &self.target),
            "assigner of kind {} cannot address {}",
            self.kind,
            self.target,
        );
        if let Some(prev) = prev {
            ensure!(
                prev.kind == self.kind && prev.target == self.target,
                "assigner for {} on {} fed a previous assignment for {} on {}",
                self.kind,
                self.target,
                prev.kind,
                prev.target,
            );
        }
        let Some(value) = (self.producer)(ctx, prev)? else {
            return Ok(None);
        };
        ensure!(
            value.matches(&self.kind),
            "assigner for {} on {} produced a {value:?}",
            self.kind,
            self.target,
        );
        Ok(Some(Assignment {
            kind: self.kind,
            target: self.target,
            value,
            effect,
        }))
    }
}

/// Blend between two optional assignments of the same kind and target.
///
/// `f` at or below 0 yields `from`, at or above 1 yields `to`. A `None` side
/// uses the kind's neutral value (see the per-kind rules). Extension kinds
/// without a registered fade step at the midpoint.
///
/// Fading across mismatched kinds or targets is a programmer error and fails
/// fast.
pub fn fade(
    ctx: &FrameCtx,
    from: Option<&Assignment>,
    to: Option<&Assignment>,
    f: f64,
) -> Result<Option<Assignment>> {
    if let (Some(a), Some(b)) = (from, to) {
        ensure!(
            a.kind == b.kind && a.target == b.target,
            "cannot fade from {} on {} to {} on {}",
            a.kind,
            a.target,
            b.kind,
            b.target,
        );
    }
    if f <= 0.0 {
        return Ok(from.cloned());
    }
    if f >= 1.0 {
        return Ok(to.cloned());
    }
    let Some(present) = to.or(from) else {
        return Ok(None);
    };

    let value = match (&present.kind, from.map(|a| &a.value), to.map(|a| &a.value)) {
        (Kind::Channel, a, b) => {
            let va = a.map_or(0.0, unwrap_channel);
            let vb = b.map_or(0.0, unwrap_channel);
            Some(Value::Channel(lerp(va, vb, f)))
        }
        (Kind::Function, a, b) => fade_function(a, b, f),
        (Kind::Color, a, b) => {
            let ca = a.map(unwrap_color);
            let cb = b.map(unwrap_color);
            // A missing side is the active side's fully darkened twin, so the
            // color dims in or out without desaturating to gray.
            let ca = ca.unwrap_or_else(|| cb.unwrap().darkened());
            let cb = cb.unwrap_or_else(|| ca.darkened());
            Some(Value::Color(ca.blend(&cb, f)))
        }
        (Kind::PanTilt, a, b) => {
            let head = ctx.patch.head(unwrap_head(&present.target))?;
            let neutral = head.rotation.transpose() * DOWN;
            let la = a.map_or(neutral, |v| {
                let (pan, tilt) = unwrap_pan_tilt(v);
                spatial::pan_tilt_to_local(pan, tilt)
            });
            let lb = b.map_or(neutral, |v| {
                let (pan, tilt) = unwrap_pan_tilt(v);
                spatial::pan_tilt_to_local(pan, tilt)
            });
            let (pan, tilt) = spatial::local_to_pan_tilt(spatial::slerp(la, lb, f))[0];
            Some(Value::PanTilt { pan, tilt })
        }
        (Kind::Direction, a, b) => {
            let head = ctx.patch.head(unwrap_head(&present.target))?;
            // Swing through the direction that looks at the origin.
            let neutral = if head.position.length_squared() > 1e-12 {
                (-head.position).normalize()
            } else {
                DOWN
            };
            let da = a.map_or(neutral, unwrap_direction);
            let db = b.map_or(neutral, unwrap_direction);
            Some(Value::Direction(spatial::slerp(da, db, f)))
        }
        (Kind::Aim, a, b) => {
            let head = ctx.patch.head(unwrap_head(&present.target))?;
            // The floor directly below the fixture.
            let neutral = DVec3::new(head.position.x, 0.0, head.position.z);
            let pa = a.map_or(neutral, unwrap_aim);
            let pb = b.map_or(neutral, unwrap_aim);
            Some(Value::Aim(pa.lerp(pb, f)))
        }
        (Kind::Extension(_), _, _) => {
            return Ok(if f < 0.5 { from.cloned() } else { to.cloned() });
        }
    };

    Ok(value.map(|value| Assignment {
        kind: present.kind.clone(),
        target: present.target.clone(),
        value,
        effect: present.effect,
    }))
}

/// Function fades interpolate only when both sides drive the same function;
/// otherwise the surviving side is scaled by its distance from the
/// transition midpoint.
fn fade_function(a: Option<&Value>, b: Option<&Value>, f: f64) -> Option<Value> {
    match (a.map(unwrap_function), b.map(unwrap_function)) {
        (Some((tag_a, pa)), Some((tag_b, pb))) => {
            if tag_a == tag_b {
                Some(Value::Function {
                    tag: tag_a.clone(),
                    percent: lerp(pa, pb, f),
                })
            } else if f < 0.5 {
                Some(Value::Function {
                    tag: tag_a.clone(),
                    percent: pa * (1.0 - f),
                })
            } else {
                Some(Value::Function {
                    tag: tag_b.clone(),
                    percent: pb * f,
                })
            }
        }
        (Some((tag, p)), None) => Some(Value::Function {
            tag: tag.clone(),
            percent: p * (1.0 - f),
        }),
        (None, Some((tag, p))) => Some(Value::Function {
            tag: tag.clone(),
            percent: p * f,
        }),
        (None, None) => None,
    }
}

fn unwrap_channel(v: &Value) -> f64 {
    match v {
        Value::Channel(c) => *c,
        _ => unreachable!("kind-checked at production"),
    }
}

fn unwrap_color(v: &Value) -> Hsl {
    match v {
        Value::Color(c) => *c,
        _ => unreachable!("kind-checked at production"),
    }
}

fn unwrap_pan_tilt(v: &Value) -> (f64, f64) {
    match v {
        Value::PanTilt { pan, tilt } => (*pan, *tilt),
        _ => unreachable!("kind-checked at production"),
    }
}

fn unwrap_direction(v: &Value) -> DVec3 {
    match v {
        Value::Direction(d) => *d,
        _ => unreachable!("kind-checked at production"),
    }
}

fn unwrap_aim(v: &Value) -> DVec3 {
    match v {
        Value::Aim(p) => *p,
        _ => unreachable!("kind-checked at production"),
    }
}

fn unwrap_function(v: &Value) -> (&FunctionTag, f64) {
    match v {
        Value::Function { tag, percent } => (tag, *percent),
        _ => unreachable!("kind-checked at production"),
    }
}

fn unwrap_head(t: &Target) -> HeadId {
    match t {
        Target::Head(h) => *h,
        _ => unreachable!("head-kind assignments always target heads"),
    }
}
