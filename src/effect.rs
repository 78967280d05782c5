//! The effect abstraction: anything that emits assigners frame by frame.
use std::fmt::Display;

use anyhow::Result;
use strum_macros::Display as StrumDisplay;

use crate::assign::Assigner;
use crate::metronome::Snapshot;
use crate::param::FrameCtx;

/// Stable identity of a submitted effect.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct EffectId(pub usize);

impl Display for EffectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "effect {}", self.0)
    }
}

/// Lifecycle of an active effect. The renderer owns every transition.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, StrumDisplay)]
pub enum EffectState {
    /// Submitted but not yet rendered.
    Building,
    Running,
    /// Gracefully shutting down; may still contribute while fading out.
    Ending,
    /// Done; removed from the active list at the end of the frame.
    Ended,
}

/// A span of musical or wall-clock time, for fades and bounded durations.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum TimeSpan {
    Seconds(f64),
    Beats(f64),
}

impl TimeSpan {
    /// Fraction of this span elapsed between two snapshots, unclamped above 1.
    ///
    /// Degenerate (non-positive) spans are complete immediately.
    pub fn progress(&self, since: &Snapshot, now: &Snapshot) -> f64 {
        match self {
            Self::Seconds(s) => {
                if *s <= 0.0 {
                    return 1.0;
                }
                (now.instant.as_secs_f64() - since.instant.as_secs_f64()) / s
            }
            Self::Beats(b) => {
                if *b <= 0.0 {
                    return 1.0;
                }
                (now.beats() - since.beats()) / b
            }
        }
    }

    pub fn elapsed(&self, since: &Snapshot, now: &Snapshot) -> bool {
        self.progress(since, now) >= 1.0
    }
}

/// A time-varying source of assigners.
///
/// Effects own their parameters and any per-effect state; the renderer owns
/// the lifecycle and calls these hooks once per frame.
pub trait Effect: Send {
    /// The assigners for this frame, in application order.
    ///
    /// An error here is treated as a bug in the effect: the renderer logs it,
    /// drops the effect, and renders the frame without it.
    fn generate(&mut self, ctx: &FrameCtx) -> Result<Vec<Assigner>>;

    /// Whether the effect has any contribution remaining.
    ///
    /// Returning false asks the renderer to begin graceful shutdown; bounded
    /// effects use this to retire themselves when their duration elapses.
    fn still_active(&self, _ctx: &FrameCtx) -> bool {
        true
    }

    /// Begin graceful shutdown. Returns true once the effect has fully ended;
    /// called repeatedly while the effect is ending, and must stay true once
    /// it has been true.
    fn end(&mut self, _ctx: &FrameCtx) -> bool {
        true
    }

    /// Fade applied while the effect enters.
    fn fade_in(&self) -> Option<TimeSpan> {
        None
    }

    /// Fade applied while the effect leaves.
    fn fade_out(&self) -> Option<TimeSpan> {
        None
    }
}

#[cfg(test)]
mod test {
    use std::time::{Duration, Instant};

    use super::*;
    use crate::metronome::Metronome;

    #[test]
    fn test_time_span_progress() {
        let base = Instant::now();
        let mut m = Metronome::new(120.0, 4, 8);
        let start = m.snapshot(base);
        let half = m.snapshot(base + Duration::from_millis(500));
        let end = m.snapshot(base + Duration::from_secs(1));

        let secs = TimeSpan::Seconds(1.0);
        assert_eq!(0.0, secs.progress(&start, &start));
        assert!((secs.progress(&start, &half) - 0.5).abs() < 1e-9);
        assert!(secs.elapsed(&start, &end));

        // 120 bpm: one beat is half a second.
        let beats = TimeSpan::Beats(2.0);
        assert!((beats.progress(&start, &half) - 0.5).abs() < 1e-9);
        assert!(beats.elapsed(&start, &end));

        assert!(TimeSpan::Seconds(0.0).elapsed(&start, &start));
    }
}
