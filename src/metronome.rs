//! The shared musical clock.
//!
//! One metronome per show. The renderer takes a [`Snapshot`] at the top of
//! every frame and every effect reads musical time from that snapshot, never
//! from the live clock, so all effects within a frame agree on the time.
use std::time::{Duration, Instant};

use log::info;

pub const DEFAULT_BPM: f64 = 120.0;

/// Taps further apart than this start a fresh tap-tempo gesture.
const TAP_RESET: Duration = Duration::from_secs(2);

/// Number of recent taps averaged into the tempo estimate.
const TAP_WINDOW: usize = 8;

/// An external tempo source that can override the internal rate.
///
/// Polled once per snapshot; returning `None` leaves the current rate alone.
pub trait SyncSource: Send {
    fn bpm(&mut self, now: Instant) -> Option<f64>;
}

/// An immutable record of musical time at the start of a frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Snapshot {
    /// Wall-clock time since the metronome started.
    pub instant: Duration,
    pub bpm: f64,
    /// Whole beats elapsed.
    pub beat: u64,
    /// Whole bars elapsed.
    pub bar: u64,
    /// Whole phrases elapsed.
    pub phrase: u64,
    /// Fractional position within the current beat, in [0, 1).
    pub beat_phase: f64,
    /// Fractional position within the current bar, in [0, 1).
    pub bar_phase: f64,
    /// Fractional position within the current phrase, in [0, 1).
    pub phrase_phase: f64,
}

impl Snapshot {
    /// Total beats elapsed, with sub-beat precision.
    pub fn beats(&self) -> f64 {
        self.beat as f64 + self.beat_phase
    }

    /// Total bars elapsed, with sub-bar precision.
    pub fn bars(&self) -> f64 {
        self.bar as f64 + self.bar_phase
    }

    /// Total phrases elapsed, with sub-phrase precision.
    pub fn phrases(&self) -> f64 {
        self.phrase as f64 + self.phrase_phase
    }
}

/// Musical clock producing ordered time snapshots.
pub struct Metronome {
    bpm: f64,
    /// Beats per bar.
    bar_length: u32,
    /// Bars per phrase.
    phrase_length: u32,
    /// Accumulated musical position in beats.
    beats: f64,
    start: Option<Instant>,
    last: Option<Instant>,
    last_instant: Duration,
    taps: Vec<Instant>,
    sync: Option<Box<dyn SyncSource>>,
}

impl Metronome {
    pub fn new(bpm: f64, bar_length: u32, phrase_length: u32) -> Self {
        assert!(bar_length > 0 && phrase_length > 0);
        Self {
            bpm: bpm.max(f64::MIN_POSITIVE),
            bar_length,
            phrase_length,
            beats: 0.0,
            start: None,
            last: None,
            last_instant: Duration::ZERO,
            taps: Vec::with_capacity(TAP_WINDOW),
            sync: None,
        }
    }

    /// Advance the clock to `now` and capture a snapshot.
    ///
    /// Snapshots are monotonically non-decreasing in `instant` even if the
    /// caller's clock jitters backwards.
    pub fn snapshot(&mut self, now: Instant) -> Snapshot {
        if let Some(bpm) = self.sync.as_mut().and_then(|s| s.bpm(now)) {
            self.bpm = bpm.max(f64::MIN_POSITIVE);
        }
        let start = *self.start.get_or_insert(now);
        if let Some(last) = self.last {
            let delta = now.saturating_duration_since(last);
            self.beats += delta.as_secs_f64() * self.bpm / 60.0;
        }
        self.last = Some(self.last.map_or(now, |l| l.max(now)));

        let instant = now
            .saturating_duration_since(start)
            .max(self.last_instant);
        self.last_instant = instant;

        let bars = self.beats / self.bar_length as f64;
        let phrases = bars / self.phrase_length as f64;
        Snapshot {
            instant,
            bpm: self.bpm,
            beat: self.beats as u64,
            bar: bars as u64,
            phrase: phrases as u64,
            beat_phase: self.beats.fract(),
            bar_phase: bars.fract(),
            phrase_phase: phrases.fract(),
        }
    }

    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    pub fn set_bpm(&mut self, bpm: f64) {
        self.bpm = bpm.max(f64::MIN_POSITIVE);
    }

    /// Attach an external sync source, replacing any existing one.
    pub fn set_sync(&mut self, source: Box<dyn SyncSource>) {
        self.sync = Some(source);
    }

    /// Register a tap-tempo tap.
    ///
    /// Two or more taps in quick succession set the tempo to the mean tap
    /// interval; every tap re-aligns the beat phase to the tap itself.
    pub fn tap(&mut self, now: Instant) {
        if let Some(&last) = self.taps.last()
            && now.saturating_duration_since(last) > TAP_RESET
        {
            self.taps.clear();
        }
        self.taps.push(now);
        if self.taps.len() > TAP_WINDOW {
            self.taps.remove(0);
        }
        if self.taps.len() >= 2 {
            let span = self
                .taps
                .last()
                .unwrap()
                .saturating_duration_since(self.taps[0]);
            let interval = span.as_secs_f64() / (self.taps.len() - 1) as f64;
            if interval > 0.0 {
                self.bpm = 60.0 / interval;
                info!("tap tempo: {:.1} bpm", self.bpm);
            }
        }
        // Snap the beat boundary to the tap.
        self.beats = self.beats.round();
        self.last = Some(self.last.map_or(now, |l| l.max(now)));
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn at(base: Instant, secs: f64) -> Instant {
        base + Duration::from_secs_f64(secs)
    }

    #[test]
    fn test_beat_positions() {
        let base = Instant::now();
        let mut m = Metronome::new(120.0, 4, 8);
        let s = m.snapshot(base);
        assert_eq!(0, s.beat);
        assert_eq!(0.0, s.beat_phase);

        // 120 bpm = 2 beats per second.
        let s = m.snapshot(at(base, 1.25));
        assert_eq!(2, s.beat);
        assert!((s.beat_phase - 0.5).abs() < 1e-9);
        assert_eq!(0, s.bar);
        assert!((s.bar_phase - 2.5 / 4.0).abs() < 1e-9);

        // 16 beats = 4 bars = half a phrase.
        let s = m.snapshot(at(base, 8.0));
        assert_eq!(16, s.beat);
        assert_eq!(4, s.bar);
        assert_eq!(0, s.phrase);
        assert!((s.phrase_phase - 0.5).abs() < 1e-9);
        assert!((s.beats() - 16.0).abs() < 1e-9);
    }

    #[test]
    fn test_snapshot_monotonic() {
        let base = Instant::now();
        let mut m = Metronome::new(120.0, 4, 8);
        m.snapshot(at(base, 1.0));
        // A backwards wall-clock step must not produce a backwards snapshot.
        let s = m.snapshot(base);
        assert_eq!(Duration::from_secs(1), s.instant);
    }

    #[test]
    fn test_tap_tempo() {
        let base = Instant::now();
        let mut m = Metronome::new(120.0, 4, 8);
        // Taps at 0.5s intervals: 120 bpm.
        for i in 0..4 {
            m.tap(at(base, i as f64 * 0.5));
        }
        assert!((m.bpm() - 120.0).abs() < 1e-6);
        // Faster taps raise the tempo; the gap resets the gesture.
        for i in 0..4 {
            m.tap(at(base, 10.0 + i as f64 * 0.25));
        }
        assert!((m.bpm() - 240.0).abs() < 1e-6);
    }

    #[test]
    fn test_sync_overrides_bpm() {
        struct Fixed(f64);
        impl SyncSource for Fixed {
            fn bpm(&mut self, _: Instant) -> Option<f64> {
                Some(self.0)
            }
        }
        let base = Instant::now();
        let mut m = Metronome::new(120.0, 4, 8);
        m.set_sync(Box::new(Fixed(90.0)));
        let s = m.snapshot(base);
        assert_eq!(90.0, s.bpm);
    }
}
