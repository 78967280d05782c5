//! A programmable stage-lighting engine.
//!
//! The engine maintains a live model of a show (patched fixtures with DMX
//! addresses and 3-D placement), runs a periodic render loop that composes
//! every concurrently active effect into byte-accurate DMX frames, and hands
//! those frames to a transport at a steady rate. Composition is deterministic
//! and priority-ordered: effects emit typed assigners each frame, a fade
//! kernel blends them as effects enter and leave, and a resolver turns the
//! final assignments into bytes.
//!
//! The control surfaces (MIDI/OSC/web), DMX hardware transports, and fixture
//! library imports live in hosting applications; this crate is the rendering
//! core they drive.

pub mod assign;
pub mod color;
pub mod config;
pub mod dmx;
pub mod effect;
pub mod effects;
pub mod extension;
pub mod fixture;
pub mod metronome;
pub mod param;
pub mod resolve;
pub mod show;
pub mod spatial;
mod util;

pub use assign::{Assigner, Assignment, Kind, Target, Value};
pub use color::Hsl;
pub use config::{ShowFile, ShowOptions};
pub use dmx::{DmxAddr, DmxBuffer, DmxTransport, OfflineTransport, UniverseId};
pub use effect::{Effect, EffectId, TimeSpan};
pub use fixture::{FixtureDef, FixtureId, HeadId, Patch};
pub use metronome::{Metronome, Snapshot};
pub use param::{FrameCtx, Param};
pub use show::{Metrics, Show, TransportError};
pub use spatial::Placement;
