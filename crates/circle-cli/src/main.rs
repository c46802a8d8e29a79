use anyhow::Result;
use circle_gc::CollectorConfig;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::filter::EnvFilter;

mod config;
mod scene;

use scene::{Action, Scene};

#[derive(Parser)]
#[command(name = "circle", version, about = "Reference cycle collector playground")]
struct Cli {
    /// Path to circle.toml (searched upwards from the current directory by default)
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply actions in order
    Run {
        #[arg(value_enum, required = true)]
        actions: Vec<Action>,

        #[command(flatten)]
        options: SceneOptions,
    },
    /// Build every kind of graph, inspect it, collect, and report what survived
    Demo {
        #[command(flatten)]
        options: SceneOptions,
    },
}

#[derive(Args)]
struct SceneOptions {
    /// Repeat each building action this many times
    #[arg(long, default_value_t = 1)]
    count: usize,

    /// Nodes per cycle or chain (overrides circle.toml)
    #[arg(long)]
    length: Option<usize>,

    /// Run every search to completion
    #[arg(long)]
    gather_all: bool,

    /// Report leaked cycles without breaking them
    #[arg(long)]
    dry_run: bool,
}

const DEMO: &[Action] = &[
    Action::MakeCycle,
    Action::LeakCycle,
    Action::MakeNonCycle,
    Action::LeakClosure,
    Action::LeakContainer,
    Action::Status,
    Action::Infos,
    Action::Collect,
    Action::Status,
    Action::Release,
    Action::Collect,
    Action::Status,
];

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = config::load_config(cli.config.as_deref())?;

    let (actions, options) = match cli.command {
        Commands::Run { actions, options } => (actions, options),
        Commands::Demo { options } => (DEMO.to_vec(), options),
    };

    let mut collector = CollectorConfig::from(&config.collector);
    if options.gather_all {
        collector.early_exit = false;
    }
    if options.dry_run {
        collector.break_cycles = false;
    }
    let length = options.length.unwrap_or(config.scene.length);

    let mut scene = Scene::new(collector, length);
    let mut out = std::io::stdout().lock();
    for action in actions {
        let repeat = if is_builder(action) { options.count } else { 1 };
        for _ in 0..repeat {
            scene.apply(action, &mut out)?;
        }
    }

    let stats = scene.registry().stats();
    tracing::info!(
        collections = stats.collections,
        cycles_broken = stats.cycles_broken,
        edges_cleared = stats.edges_cleared,
        pause_us = stats.total_time.as_micros() as u64,
        "Done"
    );

    Ok(())
}

fn is_builder(action: Action) -> bool {
    matches!(
        action,
        Action::MakeCycle
            | Action::LeakCycle
            | Action::MakeNonCycle
            | Action::LeakClosure
            | Action::LeakContainer
    )
}
