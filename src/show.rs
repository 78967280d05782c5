//! The show: a renderer thread folding active effects into DMX frames.
//!
//! All control-plane calls are thread-safe and return immediately; their
//! effects are observed at the next frame boundary, when the renderer drains
//! its command queue. The renderer holds no locks while composing a frame:
//! the patch and variables are published through [`arc_swap`] and swapped
//! whole.
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{Receiver, Sender, channel};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{Result, bail};
use arc_swap::ArcSwap;
use log::{error, info, warn};
use ordermap::OrderMap;
use thiserror::Error;

use crate::assign::{self, Assigner, Assignment, Kind, Target};
use crate::config::ShowOptions;
use crate::dmx::{DmxBuffer, DmxTransport, UNIVERSE_SIZE, UniverseId};
use crate::effect::{Effect, EffectId, EffectState, TimeSpan};
use crate::extension::{ExtensionBuffer, ExtensionHooks, ExtensionRegistry};
use crate::fixture::{FixtureDef, FixtureId, HeadId, Patch};
use crate::metronome::{Metronome, Snapshot, SyncSource};
use crate::param::{FrameCtx, Variables};
use crate::resolve::Resolver;
use crate::spatial::Placement;
use crate::util::RollingWindow;

/// A DMX transport failure, forwarded to the hosting application.
///
/// Rendering continues after these; the next frame may succeed.
#[derive(Debug, Error)]
#[error("DMX transport failure on universe {universe}")]
pub struct TransportError {
    pub universe: UniverseId,
    #[source]
    pub source: anyhow::Error,
}

/// A live statistics snapshot, republished after every frame.
#[derive(Clone, Debug)]
pub struct Metrics {
    /// Engine version.
    pub version: &'static str,
    /// Wall-clock time since the first frame.
    pub total_time: Duration,
    pub frames_sent: u64,
    /// Mean duration over the recent window.
    pub average_duration: Duration,
    /// The most recent frame durations, oldest first (up to 30).
    pub recent_durations: Vec<Duration>,
    /// Overruns within the recent window.
    pub recent_overruns: u64,
    /// Total frames that exceeded the refresh interval.
    pub overruns: u64,
    /// Total out-of-range values clamped by the resolver.
    pub clamped_writes: u64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION"),
            total_time: Duration::ZERO,
            frames_sent: 0,
            average_duration: Duration::ZERO,
            recent_durations: Vec::new(),
            recent_overruns: 0,
            overruns: 0,
            clamped_writes: 0,
        }
    }
}

/// Frame durations kept in the metrics window.
const METRICS_WINDOW: usize = 30;

enum Command {
    AddEffect {
        id: EffectId,
        key: String,
        priority: i32,
        effect: Box<dyn Effect>,
    },
    EndEffect(EffectId),
    KillEffect(EffectId),
    ClearEffects,
    SetVariable(String, f64),
    Tap,
    SetBpm(f64),
    Sync(Box<dyn SyncSource>),
    RegisterExtension {
        key: String,
        kinds: Vec<String>,
        buffer: ExtensionBuffer,
        hooks: ExtensionHooks,
    },
    SetExtensionOrder {
        key: String,
        kinds: Vec<String>,
    },
}

/// A running show: the control-plane handle owned by the hosting application.
///
/// The show's lifetime spans `start()`..`stop()`; there is no process-wide
/// state.
pub struct Show {
    options: ShowOptions,
    patch: Arc<ArcSwap<Patch>>,
    patch_lock: Mutex<()>,
    commands: Sender<Command>,
    metrics: Arc<ArcSwap<Metrics>>,
    variables: Arc<ArcSwap<Variables>>,
    errors: Option<Receiver<TransportError>>,
    next_effect: AtomicUsize,
    running: Arc<AtomicBool>,
    renderer: Option<RenderLoop>,
    worker: Option<JoinHandle<()>>,
}

impl Show {
    pub fn new(options: ShowOptions, transport: Box<dyn DmxTransport>) -> Result<Self> {
        options.validate()?;
        let patch = Arc::new(ArcSwap::from_pointee(Patch::new()));
        let metrics = Arc::new(ArcSwap::from_pointee(Metrics::default()));
        let variables = Arc::new(ArcSwap::from_pointee(Variables::new()));
        let running = Arc::new(AtomicBool::new(false));
        let (commands, command_rx) = channel();
        let (error_tx, error_rx) = channel();

        let renderer = RenderLoop {
            options,
            patch: patch.clone(),
            metronome: Metronome::new(options.bpm, options.bar_length, options.phrase_length),
            commands: command_rx,
            transport,
            effects: Vec::new(),
            next_seq: 0,
            variables: Variables::new(),
            variables_out: variables.clone(),
            extensions: ExtensionRegistry::default(),
            buffers: Vec::new(),
            metrics_out: metrics.clone(),
            errors: error_tx,
            running: running.clone(),
            window: RollingWindow::new(METRICS_WINDOW),
            frames: 0,
            first_frame: None,
            overruns: 0,
            clamped: 0,
        };

        Ok(Self {
            options,
            patch,
            patch_lock: Mutex::new(()),
            commands,
            metrics,
            variables,
            errors: Some(error_rx),
            next_effect: AtomicUsize::new(0),
            running,
            renderer: Some(renderer),
            worker: None,
        })
    }

    /// Patch a fixture. Fails on any address conflict, leaving the existing
    /// patch untouched; on success the renderer sees the new fixture at its
    /// next frame.
    pub fn patch_fixture(
        &self,
        def: &FixtureDef,
        universe: UniverseId,
        addr: crate::dmx::DmxAddr,
        placement: Placement,
    ) -> Result<FixtureId> {
        let _guard = self.patch_lock.lock().unwrap();
        let mut next = (**self.patch.load()).clone();
        let id = next.patch(def, universe, addr, placement)?;
        self.patch.store(Arc::new(next));
        Ok(id)
    }

    /// The current patch snapshot.
    pub fn patch(&self) -> Arc<Patch> {
        self.patch.load_full()
    }

    /// Every head of a patched fixture.
    pub fn heads_of(&self, id: FixtureId) -> Result<Vec<HeadId>> {
        Ok(self.patch().fixture(id)?.head_ids().collect())
    }

    /// Submit an effect. Lower priorities compose first; an effect already
    /// running under the same key is gracefully ended.
    pub fn add_effect(&self, priority: i32, key: &str, effect: Box<dyn Effect>) -> EffectId {
        let id = EffectId(self.next_effect.fetch_add(1, Ordering::Relaxed));
        self.send(Command::AddEffect {
            id,
            key: key.to_string(),
            priority,
            effect,
        });
        id
    }

    /// Ask an effect to end gracefully, honoring its fade-out.
    pub fn end_effect(&self, id: EffectId) {
        self.send(Command::EndEffect(id));
    }

    /// Remove an effect immediately, skipping its fade-out.
    pub fn kill_effect(&self, id: EffectId) {
        self.send(Command::KillEffect(id));
    }

    /// Gracefully end every active effect.
    pub fn clear_effects(&self) {
        self.send(Command::ClearEffects);
    }

    pub fn set_variable(&self, name: &str, value: f64) {
        self.send(Command::SetVariable(name.to_string(), value));
    }

    /// Read a variable from the most recently published frame state.
    pub fn get_variable(&self, name: &str) -> Option<f64> {
        self.variables.load().get(name).copied()
    }

    pub fn metronome_tap(&self) {
        self.send(Command::Tap);
    }

    pub fn set_bpm(&self, bpm: f64) {
        self.send(Command::SetBpm(bpm));
    }

    pub fn sync(&self, source: Box<dyn SyncSource>) {
        self.send(Command::Sync(source));
    }

    /// Register an extension: new assignment kinds with their own resolver,
    /// optional fade, and per-frame buffer hooks.
    pub fn register_extension(
        &self,
        key: &str,
        kinds: Vec<String>,
        buffer: ExtensionBuffer,
        hooks: ExtensionHooks,
    ) {
        self.send(Command::RegisterExtension {
            key: key.to_string(),
            kinds,
            buffer,
            hooks,
        });
    }

    pub fn set_extension_resolution_order(&self, key: &str, kinds: Vec<String>) {
        self.send(Command::SetExtensionOrder {
            key: key.to_string(),
            kinds,
        });
    }

    /// The latest statistics snapshot.
    pub fn metrics(&self) -> Arc<Metrics> {
        self.metrics.load_full()
    }

    /// Take the transport-error receiver. Yields at most once.
    pub fn errors(&mut self) -> Option<Receiver<TransportError>> {
        self.errors.take()
    }

    /// Spawn the renderer thread.
    pub fn start(&mut self) -> Result<()> {
        let Some(renderer) = self.renderer.take() else {
            bail!("show has already been started");
        };
        self.running.store(true, Ordering::SeqCst);
        info!(
            "Starting renderer at {}ms refresh.",
            self.options.refresh_interval_ms
        );
        self.worker = Some(
            std::thread::Builder::new()
                .name("arclight-render".to_string())
                .spawn(move || renderer.run())?,
        );
        Ok(())
    }

    /// Stop the renderer and join it; any in-flight frame completes.
    pub fn stop(&mut self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            bail!("renderer thread panicked");
        }
        Ok(())
    }

    fn send(&self, command: Command) {
        // A dropped receiver means the show has stopped; commands are then
        // inert by design.
        let _ = self.commands.send(command);
    }
}

impl Drop for Show {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

struct ActiveEffect {
    id: EffectId,
    key: String,
    priority: i32,
    seq: u64,
    effect: Box<dyn Effect>,
    state: EffectState,
    started: Option<Snapshot>,
    ending: Option<Snapshot>,
    end_requested: bool,
    end_confirmed: bool,
    fade_in: Option<TimeSpan>,
    fade_out: Option<TimeSpan>,
}

struct RenderLoop {
    options: ShowOptions,
    patch: Arc<ArcSwap<Patch>>,
    metronome: Metronome,
    commands: Receiver<Command>,
    transport: Box<dyn DmxTransport>,
    effects: Vec<ActiveEffect>,
    next_seq: u64,
    variables: Variables,
    variables_out: Arc<ArcSwap<Variables>>,
    extensions: ExtensionRegistry,
    buffers: Vec<DmxBuffer>,
    metrics_out: Arc<ArcSwap<Metrics>>,
    errors: Sender<TransportError>,
    running: Arc<AtomicBool>,
    window: RollingWindow,
    frames: u64,
    first_frame: Option<Instant>,
    overruns: u64,
    clamped: u64,
}

impl RenderLoop {
    /// Run until stopped. Each tick emits exactly one frame; a late frame
    /// pulls the schedule forward rather than skipping.
    fn run(mut self) {
        let interval = self.options.refresh_interval();
        let mut deadline = Instant::now();
        while self.running.load(Ordering::Relaxed) {
            self.frame(Instant::now());
            deadline += interval;
            let now = Instant::now();
            if now < deadline {
                std::thread::sleep(deadline - now);
            } else {
                deadline = now;
            }
        }
        info!("Renderer stopped after {} frame(s).", self.frames);
    }

    /// Render one frame at the given instant.
    fn frame(&mut self, now: Instant) {
        let work_start = Instant::now();
        let interval = self.options.refresh_interval();

        // 1. Capture musical time, then apply pending control commands.
        let snapshot = self.metronome.snapshot(now);
        self.drain_commands(now);
        let patch = self.patch.load_full();

        // 2. Zero the universe buffers and any extension buffers.
        let capacity = patch.universe_capacity();
        if self.buffers.len() != capacity {
            self.buffers.resize(capacity, [0u8; UNIVERSE_SIZE]);
        }
        for buffer in &mut self.buffers {
            *buffer = [0u8; UNIVERSE_SIZE];
        }
        self.extensions.empty_buffers();

        // 3-4. Advance lifecycles, gather assigners, fold them into final
        // assignments. Effects are taken out of self so the frame context can
        // borrow the rest of the renderer state.
        let mut effects = std::mem::take(&mut self.effects);
        let ctx = FrameCtx {
            patch: &patch,
            snapshot: &snapshot,
            variables: &self.variables,
        };
        Self::advance_lifecycles(&mut effects, &ctx, &snapshot);
        let groups = Self::generate(&mut effects, &ctx);
        let assignments = Self::fold(&ctx, &self.extensions, &mut effects, groups, &snapshot);

        // 5. Resolve final assignments into buffers.
        let wheel = self.options.wheel();
        let mut resolver = Resolver::new(&patch, &wheel, &mut self.buffers);
        for assignment in &assignments {
            let result = match &assignment.kind {
                Kind::Extension(tag) => self.extensions.resolve(tag, assignment),
                _ => resolver.resolve(assignment),
            };
            if let Err(err) = result {
                let owner = effects.iter_mut().find(|e| e.id == assignment.effect);
                match owner {
                    Some(e) => {
                        error!(
                            "{} '{}' produced an unresolvable assignment: {err:#}; removing it.",
                            e.id, e.key
                        );
                        e.state = EffectState::Ended;
                    }
                    None => error!("unresolvable assignment: {err:#}."),
                }
            }
        }
        self.clamped += resolver.clamped;

        // 6. Fire send hooks, then hand frames to the transport.
        self.extensions.send_buffers();
        for (universe, buffer) in self.buffers.iter().enumerate() {
            if let Err(source) = self.transport.write(universe, buffer) {
                error!("DMX transport error on universe {universe}: {source:#}.");
                let _ = self.errors.send(TransportError { universe, source });
            }
        }

        // 7. Timing metrics.
        let duration = work_start.elapsed();
        if duration > interval {
            warn!(
                "Frame overran the {:?} refresh interval: took {:?}.",
                interval, duration
            );
            self.overruns += 1;
        }
        self.window.push(duration);
        self.frames += 1;
        let first = *self.first_frame.get_or_insert(work_start);
        self.metrics_out.store(Arc::new(Metrics {
            version: env!("CARGO_PKG_VERSION"),
            total_time: work_start + duration - first,
            frames_sent: self.frames,
            average_duration: self.window.average(),
            recent_durations: self.window.iter().collect(),
            recent_overruns: self.window.iter().filter(|d| *d > interval).count() as u64,
            overruns: self.overruns,
            clamped_writes: self.clamped,
        }));

        // 8. Drop effects that ended this frame.
        effects.retain(|e| {
            if e.state == EffectState::Ended {
                info!("Removing ended {} '{}'.", e.id, e.key);
                false
            } else {
                true
            }
        });
        self.effects = effects;
    }

    fn drain_commands(&mut self, now: Instant) {
        while let Ok(command) = self.commands.try_recv() {
            self.apply(command, now);
        }
    }

    fn apply(&mut self, command: Command, now: Instant) {
        match command {
            Command::AddEffect {
                id,
                key,
                priority,
                effect,
            } => {
                // A new submission under a live key supersedes the old effect.
                for existing in &mut self.effects {
                    if existing.key == key && existing.state != EffectState::Ended {
                        existing.end_requested = true;
                    }
                }
                let seq = self.next_seq;
                self.next_seq += 1;
                info!("Adding {id} '{key}' at priority {priority}.");
                self.effects.push(ActiveEffect {
                    id,
                    key,
                    priority,
                    seq,
                    state: EffectState::Building,
                    started: None,
                    ending: None,
                    end_requested: false,
                    end_confirmed: false,
                    fade_in: effect.fade_in(),
                    fade_out: effect.fade_out(),
                    effect,
                });
                self.effects.sort_by_key(|e| (e.priority, e.seq));
            }
            Command::EndEffect(id) => {
                // Ending an effect that is already ending (or gone) is a no-op.
                if let Some(e) = self
                    .effects
                    .iter_mut()
                    .find(|e| e.id == id && e.state < EffectState::Ending)
                {
                    e.end_requested = true;
                }
            }
            Command::KillEffect(id) => {
                if let Some(e) = self.effects.iter_mut().find(|e| e.id == id) {
                    e.state = EffectState::Ended;
                }
            }
            Command::ClearEffects => {
                for e in &mut self.effects {
                    if e.state != EffectState::Ended {
                        e.end_requested = true;
                    }
                }
            }
            Command::SetVariable(name, value) => {
                self.variables.insert(name, value);
                self.variables_out.store(Arc::new(self.variables.clone()));
            }
            Command::Tap => self.metronome.tap(now),
            Command::SetBpm(bpm) => self.metronome.set_bpm(bpm),
            Command::Sync(source) => self.metronome.set_sync(source),
            Command::RegisterExtension {
                key,
                kinds,
                buffer,
                hooks,
            } => {
                if let Err(err) = self.extensions.register(&key, kinds, buffer, hooks) {
                    error!("Extension registration failed: {err:#}.");
                }
            }
            Command::SetExtensionOrder { key, kinds } => {
                if let Err(err) = self.extensions.set_resolution_order(&key, kinds) {
                    error!("Extension re-ordering failed: {err:#}.");
                }
            }
        }
    }

    fn advance_lifecycles(effects: &mut [ActiveEffect], ctx: &FrameCtx, snapshot: &Snapshot) {
        for e in effects {
            if e.state == EffectState::Building {
                e.state = EffectState::Running;
                e.started = Some(*snapshot);
            }
            if e.state == EffectState::Running
                && (e.end_requested || !e.effect.still_active(ctx))
            {
                e.state = EffectState::Ending;
                e.ending = Some(*snapshot);
            }
            if e.state == EffectState::Ending {
                if !e.end_confirmed {
                    e.end_confirmed = e.effect.end(ctx);
                }
                let fade_done = match (e.fade_out, e.ending.as_ref()) {
                    (Some(fade), Some(since)) => fade.elapsed(since, snapshot),
                    _ => true,
                };
                if e.end_confirmed && fade_done {
                    e.state = EffectState::Ended;
                }
            }
        }
    }

    /// Ask every live effect for its assigners and group them by
    /// `(kind, target)`, preserving submission order throughout.
    fn generate(
        effects: &mut [ActiveEffect],
        ctx: &FrameCtx,
    ) -> OrderMap<(Kind, Target), Vec<(usize, Assigner)>> {
        let mut groups: OrderMap<(Kind, Target), Vec<(usize, Assigner)>> = OrderMap::new();
        for (idx, e) in effects.iter_mut().enumerate() {
            if e.state == EffectState::Ended {
                continue;
            }
            let generated = catch_unwind(AssertUnwindSafe(|| e.effect.generate(ctx)));
            let assigners = match generated {
                Ok(Ok(assigners)) => assigners,
                Ok(Err(err)) => {
                    error!("{} '{}' failed to generate: {err:#}; removing it.", e.id, e.key);
                    e.state = EffectState::Ended;
                    continue;
                }
                Err(_) => {
                    error!("{} '{}' panicked in generate; removing it.", e.id, e.key);
                    e.state = EffectState::Ended;
                    continue;
                }
            };
            for assigner in assigners {
                groups
                    .entry((assigner.kind.clone(), assigner.target.clone()))
                    .or_default()
                    .push((idx, assigner));
            }
        }
        groups
    }

    /// Fold each target's assigners, lowest priority first, applying fade
    /// windows as effects enter and leave. A misbehaving assigner removes its
    /// effect and leaves the previous assignment standing.
    fn fold(
        ctx: &FrameCtx,
        extensions: &ExtensionRegistry,
        effects: &mut [ActiveEffect],
        mut groups: OrderMap<(Kind, Target), Vec<(usize, Assigner)>>,
        snapshot: &Snapshot,
    ) -> Vec<Assignment> {
        let mut assignments = Vec::with_capacity(groups.len());
        let stages: Vec<Kind> = Kind::CORE
            .into_iter()
            .chain(extensions.resolution_kinds())
            .collect();
        for stage in &stages {
            let keys: Vec<(Kind, Target)> = groups
                .keys()
                .filter(|(kind, _)| kind == stage)
                .cloned()
                .collect();
            for key in keys {
                let assigners = groups.remove(&key).unwrap();
                let mut prev: Option<Assignment> = None;
                for (idx, assigner) in assigners {
                    if effects[idx].state == EffectState::Ended {
                        continue;
                    }
                    let folded = Self::fold_one(
                        ctx,
                        extensions,
                        &effects[idx],
                        prev.as_ref(),
                        assigner,
                        snapshot,
                    );
                    match folded {
                        Ok(next) => prev = next,
                        Err(err) => {
                            let e = &mut effects[idx];
                            error!("{} '{}': {err:#}; removing it.", e.id, e.key);
                            e.state = EffectState::Ended;
                        }
                    }
                }
                if let Some(assignment) = prev {
                    assignments.push(assignment);
                }
            }
        }
        for ((kind, target), _) in groups {
            // Only possible if an effect emitted an unregistered extension kind.
            warn!("discarding assigners of unknown kind {kind} for {target}");
        }
        assignments
    }

    fn fold_one(
        ctx: &FrameCtx,
        extensions: &ExtensionRegistry,
        e: &ActiveEffect,
        prev: Option<&Assignment>,
        assigner: Assigner,
        snapshot: &Snapshot,
    ) -> Result<Option<Assignment>> {
        let produced = assigner.produce(ctx, prev, e.id)?;
        let mut current = produced;

        if let (Some(fade), Some(started)) = (e.fade_in, e.started.as_ref()) {
            let progress = fade.progress(started, snapshot);
            if progress < 1.0 {
                current = Self::fade_checked(ctx, extensions, prev, current.as_ref(), progress)?;
            }
        }
        if e.state == EffectState::Ending
            && let (Some(fade), Some(since)) = (e.fade_out, e.ending.as_ref())
        {
            let progress = fade.progress(since, snapshot);
            current = if progress < 1.0 {
                Self::fade_checked(ctx, extensions, current.as_ref(), prev, progress)?
            } else {
                // Fully faded out but still waiting for the effect to finish
                // shutting down; it no longer contributes.
                prev.cloned()
            };
        }
        Ok(current)
    }

    /// Fade, preferring an extension's registered fade for its own kinds.
    fn fade_checked(
        ctx: &FrameCtx,
        extensions: &ExtensionRegistry,
        from: Option<&Assignment>,
        to: Option<&Assignment>,
        f: f64,
    ) -> Result<Option<Assignment>> {
        if let Some(Kind::Extension(tag)) = to.or(from).map(|a| &a.kind)
            && let Some(result) = extensions.fade(tag, from, to, f)
        {
            return result;
        }
        assign::fade(ctx, from, to, f)
    }
}
