//! Dynamic parameters: values that resolve lazily against the frame context.
//!
//! Resolution is pure: for a given snapshot a parameter always produces the
//! same value, which keeps frame rendering deterministic and lets the fade
//! kernel blend parameterized effects safely.
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use strum_macros::{Display as StrumDisplay, EnumIter};

use crate::fixture::{HeadId, Patch};
use crate::metronome::Snapshot;

/// Named show-level values settable from the control plane.
pub type Variables = HashMap<String, f64>;

/// Everything a frame computation may read: the patch, the musical-time
/// snapshot, and the show variables. Immutable for the duration of a frame.
pub struct FrameCtx<'a> {
    pub patch: &'a Patch,
    pub snapshot: &'a Snapshot,
    pub variables: &'a Variables,
}

/// Resolve a dynamic parameter value against the frame context.
///
/// Implementations must be pure: no interior mutability, no side effects.
pub trait ResolveParam<T>: Send + Sync {
    fn resolve(&self, ctx: &FrameCtx, head: Option<HeadId>) -> T;
}

/// A value of `T` that is either fixed or resolved per frame.
pub enum Param<T> {
    Fixed(T),
    Dynamic(Arc<dyn ResolveParam<T>>),
}

impl<T: Clone> Param<T> {
    pub fn resolve(&self, ctx: &FrameCtx, head: Option<HeadId>) -> T {
        match self {
            Self::Fixed(v) => v.clone(),
            Self::Dynamic(r) => r.resolve(ctx, head),
        }
    }
}

impl<T> From<T> for Param<T> {
    fn from(v: T) -> Self {
        Self::Fixed(v)
    }
}

impl<T> Clone for Param<T>
where
    T: Clone,
{
    fn clone(&self) -> Self {
        match self {
            Self::Fixed(v) => Self::Fixed(v.clone()),
            Self::Dynamic(r) => Self::Dynamic(r.clone()),
        }
    }
}

impl<T: Debug> Debug for Param<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fixed(v) => write!(f, "Fixed({v:?})"),
            Self::Dynamic(_) => write!(f, "Dynamic(..)"),
        }
    }
}

/// Oscillator waveform shapes. All produce unit output in [0, 1].
#[derive(Clone, Copy, Debug, PartialEq, Eq, StrumDisplay, EnumIter)]
pub enum Waveform {
    Sine,
    Triangle,
    Square,
    Sawtooth,
}

impl Waveform {
    /// Evaluate at a phase in [0, 1).
    pub fn value(&self, phase: f64) -> f64 {
        let phase = phase.rem_euclid(1.0);
        match self {
            Self::Sine => 0.5 - 0.5 * (phase * std::f64::consts::TAU).cos(),
            Self::Triangle => {
                if phase < 0.5 {
                    phase * 2.0
                } else {
                    2.0 - phase * 2.0
                }
            }
            Self::Square => {
                if phase < 0.5 {
                    1.0
                } else {
                    0.0
                }
            }
            Self::Sawtooth => phase,
        }
    }
}

/// Which musical unit an oscillator cycles over.
#[derive(Clone, Copy, Debug, PartialEq, Eq, StrumDisplay)]
pub enum TimeBase {
    Beat,
    Bar,
    Phrase,
}

impl TimeBase {
    /// Continuous position in this unit at the given snapshot.
    pub fn position(&self, snapshot: &Snapshot) -> f64 {
        match self {
            Self::Beat => snapshot.beats(),
            Self::Bar => snapshot.bars(),
            Self::Phrase => snapshot.phrases(),
        }
    }
}

/// A musical-time oscillator producing values in [min, max].
#[derive(Clone, Debug)]
pub struct Oscillator {
    pub wave: Waveform,
    pub base: TimeBase,
    /// Cycles per unit of the time base.
    pub cycles: f64,
    /// Phase offset in cycles.
    pub phase_offset: f64,
    pub min: f64,
    pub max: f64,
}

impl Oscillator {
    pub fn new(wave: Waveform, base: TimeBase) -> Self {
        Self {
            wave,
            base,
            cycles: 1.0,
            phase_offset: 0.0,
            min: 0.0,
            max: 1.0,
        }
    }

    pub fn with_cycles(mut self, cycles: f64) -> Self {
        self.cycles = cycles;
        self
    }

    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    pub fn with_phase_offset(mut self, offset: f64) -> Self {
        self.phase_offset = offset;
        self
    }
}

impl ResolveParam<f64> for Oscillator {
    fn resolve(&self, ctx: &FrameCtx, _head: Option<HeadId>) -> f64 {
        let phase = self.base.position(ctx.snapshot) * self.cycles + self.phase_offset;
        self.min + self.wave.value(phase) * (self.max - self.min)
    }
}

/// Sum of parameters.
pub struct Sum(pub Vec<Param<f64>>);

impl ResolveParam<f64> for Sum {
    fn resolve(&self, ctx: &FrameCtx, head: Option<HeadId>) -> f64 {
        self.0.iter().map(|p| p.resolve(ctx, head)).sum()
    }
}

/// Product of parameters.
pub struct Product(pub Vec<Param<f64>>);

impl ResolveParam<f64> for Product {
    fn resolve(&self, ctx: &FrameCtx, head: Option<HeadId>) -> f64 {
        self.0.iter().map(|p| p.resolve(ctx, head)).product()
    }
}

/// A parameter transformed by an arbitrary pure function.
pub struct Mapped<T> {
    pub inner: Param<f64>,
    pub f: Arc<dyn Fn(f64) -> T + Send + Sync>,
}

impl<T: Clone> ResolveParam<T> for Mapped<T> {
    fn resolve(&self, ctx: &FrameCtx, head: Option<HeadId>) -> T {
        (self.f)(self.inner.resolve(ctx, head))
    }
}

/// A parameter read from the show variables, with a fallback.
pub struct Variable {
    pub name: String,
    pub default: f64,
}

impl Variable {
    pub fn new<S: Into<String>>(name: S, default: f64) -> Self {
        Self {
            name: name.into(),
            default,
        }
    }
}

impl ResolveParam<f64> for Variable {
    fn resolve(&self, ctx: &FrameCtx, _head: Option<HeadId>) -> f64 {
        ctx.variables
            .get(&self.name)
            .copied()
            .unwrap_or(self.default)
    }
}
