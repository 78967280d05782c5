use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result, anyhow};
use clap::{Args, Parser, Subcommand};
use log::LevelFilter;
use simplelog::{Config as LogConfig, SimpleLogger};

use arclight::color::Hsl;
use arclight::config::ShowFile;
use arclight::dmx::OfflineTransport;
use arclight::effects::{DimmerLevel, SolidColor, Sweep};
use arclight::fixture::{HeadId, defs};
use arclight::param::{Mapped, Oscillator, Param, TimeBase, Waveform};
use arclight::show::Show;

#[derive(Parser)]
#[command(about)]
struct Cli {
    /// If true, provide verbose logging.
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a show against the offline transport with a demo effect stack.
    Run(RunArgs),

    /// Check that the provided show file is valid, then quit.
    Check(CheckArgs),

    /// List the built-in fixture definitions.
    Fixtures,
}

#[derive(Args)]
struct RunArgs {
    /// Path to a YAML show file.
    show_file: PathBuf,

    /// Stop after this many seconds; run forever if omitted.
    #[arg(long)]
    duration_secs: Option<u64>,
}

#[derive(Args)]
struct CheckArgs {
    /// Path to a YAML show file.
    show_file: PathBuf,
}

fn main() -> Result<()> {
    let args = Cli::try_parse()?;

    let log_level = if args.debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    SimpleLogger::init(log_level, LogConfig::default())?;

    match args.command {
        Command::Run(args) => run_show(args),
        Command::Check(args) => check_show(args),
        Command::Fixtures => list_fixtures(),
    }
}

fn run_show(args: RunArgs) -> Result<()> {
    let show_file = ShowFile::from_file(&args.show_file)?;

    let mut show = Show::new(show_file.options, Box::new(OfflineTransport::default()))?;
    for entry in &show_file.fixtures {
        let def = defs::by_name(&entry.fixture)
            .ok_or_else(|| anyhow!("unknown fixture '{}'", entry.fixture))?;
        show.patch_fixture(&def, entry.universe, entry.addr, entry.placement())
            .with_context(|| format!("patching {}", entry.fixture))?;
    }

    let (color_heads, dimmer_heads, mover_heads) = classify_heads(&show);
    println!(
        "Patched {} fixture(s): {} color head(s), {} dimmer head(s), {} mover(s).",
        show.patch().len(),
        color_heads.len(),
        dimmer_heads.len(),
        mover_heads.len()
    );

    show.start()?;
    demo_effects(&show, color_heads, dimmer_heads, mover_heads);

    println!("Running show.");
    match args.duration_secs {
        Some(secs) => std::thread::sleep(Duration::from_secs(secs)),
        None => loop {
            std::thread::sleep(Duration::from_secs(1));
        },
    }
    show.stop()?;

    let metrics = show.metrics();
    println!(
        "Rendered {} frame(s) in {:.1?} (avg {:.2?}/frame, {} overrun(s)).",
        metrics.frames_sent, metrics.total_time, metrics.average_duration, metrics.overruns
    );
    Ok(())
}

/// Sort every patched head into the demo roles it can play.
fn classify_heads(show: &Show) -> (Vec<HeadId>, Vec<HeadId>, Vec<HeadId>) {
    let mut color = Vec::new();
    let mut dimmer = Vec::new();
    let mut mover = Vec::new();
    for fixture in show.patch().iter() {
        for head in &fixture.heads {
            if head.color_channels().next().is_some() || head.wheel_entries().next().is_some() {
                color.push(head.id);
            }
            if head.dimmer().is_some() {
                dimmer.push(head.id);
            }
            if head.calibration.is_some() && head.pan().is_some() && head.tilt().is_some() {
                mover.push(head.id);
            }
        }
    }
    (color, dimmer, mover)
}

/// A bar-synced rainbow, full dimmers, and a lazy figure-sweep for movers.
fn demo_effects(
    show: &Show,
    color_heads: Vec<HeadId>,
    dimmer_heads: Vec<HeadId>,
    mover_heads: Vec<HeadId>,
) {
    if !color_heads.is_empty() {
        let rainbow = Param::Dynamic(Arc::new(Mapped {
            inner: Param::Dynamic(Arc::new(
                Oscillator::new(Waveform::Sawtooth, TimeBase::Bar).with_range(0.0, 360.0),
            )),
            f: Arc::new(|hue| Hsl::new(hue, 100.0, 50.0)),
        }));
        show.add_effect(10, "rainbow", Box::new(SolidColor::new(color_heads, rainbow)));
    }
    if !dimmer_heads.is_empty() {
        show.add_effect(20, "full", Box::new(DimmerLevel::new(dimmer_heads, 100.0)));
    }
    if !mover_heads.is_empty() {
        let pan = Param::Dynamic(Arc::new(
            Oscillator::new(Waveform::Sine, TimeBase::Bar).with_range(-1.2, 1.2),
        ));
        let tilt = Param::Dynamic(Arc::new(
            Oscillator::new(Waveform::Triangle, TimeBase::Phrase).with_range(0.1, 0.7),
        ));
        show.add_effect(30, "sweep", Box::new(Sweep::new(mover_heads, pan, tilt)));
    }
}

fn check_show(args: CheckArgs) -> Result<()> {
    let show_file = ShowFile::from_file(&args.show_file)?;
    let patch = show_file.build_patch()?;
    println!(
        "Show is OK: {} fixture(s) across {} universe(s).",
        patch.len(),
        patch.universes().len()
    );
    Ok(())
}

fn list_fixtures() -> Result<()> {
    for name in defs::names() {
        let def = defs::by_name(name).unwrap();
        println!(
            "{name}: {} channel(s), {} head(s)",
            def.footprint(),
            def.heads.len() + 1
        );
    }
    Ok(())
}
