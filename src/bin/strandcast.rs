use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context as _;
use clap::{Parser, Subcommand};

use strandcast::{
    Config, Endpoint, FillRenderable, GroupId, HsiPixel, Pipeline, Registry, SweepRenderable,
    shared,
};

#[derive(Parser, Debug)]
#[command(name = "strandcast", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the render server.
    Serve(ServeArgs),
    /// Parse a config file and print the effective settings.
    CheckConfig(CheckConfigArgs),
    /// Start a pipeline with a demo mapping and print the plan snapshot.
    DumpPlan(DumpPlanArgs),
}

#[derive(Parser, Debug)]
struct ServeArgs {
    /// Config JSON path. Defaults apply if omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Stop after this many seconds (runs forever if omitted).
    #[arg(long)]
    run_secs: Option<u64>,

    /// Install a hue sweep over every enabled stored group at startup.
    #[arg(long, default_value_t = false)]
    demo: bool,
}

#[derive(Parser, Debug)]
struct CheckConfigArgs {
    /// Config JSON path.
    #[arg(long)]
    config: PathBuf,
}

#[derive(Parser, Debug)]
struct DumpPlanArgs {
    /// Config JSON path. Defaults apply if omitted.
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Command::Serve(args) => cmd_serve(args),
        Command::CheckConfig(args) => cmd_check_config(args),
        Command::DumpPlan(args) => cmd_dump_plan(args),
    }
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<Config> {
    match path {
        Some(path) => {
            Config::from_path(path).with_context(|| format!("load config '{}'", path.display()))
        }
        None => Ok(Config::default()),
    }
}

fn cmd_serve(args: ServeArgs) -> anyhow::Result<()> {
    let config = load_config(args.config.as_ref())?;
    let registry = std::sync::Arc::new(
        Registry::load(&config.store.path)
            .with_context(|| format!("load store '{}'", config.store.path.display()))?,
    );

    Pipeline::start(&config).context("start render pipeline")?;
    let pipeline = Pipeline::shared().context("pipeline instance")?;
    let endpoint = Endpoint::new(
        std::sync::Arc::clone(&registry),
        std::sync::Arc::clone(&pipeline),
        config.command.human_readable_replies,
    );

    if args.demo {
        let mut installed = 0usize;
        for group in registry.all_groups().into_iter().filter(|g| g.enabled) {
            let sweep = shared(SweepRenderable::new(0, 2.0));
            pipeline
                .add_group(sweep, &group)
                .with_context(|| format!("install demo mapping for group {}", group.id))?;
            installed += 1;
        }
        eprintln!("installed demo sweep on {installed} groups");
    }

    eprintln!(
        "strandcast serving at {} fps, {} px framebuffer",
        config.render.fps, config.render.framebuffer_pixels
    );

    // Command requests arrive as JSON lines on stdin, one reply line each.
    // A timed run skips the command loop; useful for smoke tests.
    match args.run_secs {
        Some(secs) => std::thread::sleep(Duration::from_secs(secs)),
        None => {
            use std::io::BufRead as _;
            for line in std::io::stdin().lock().lines() {
                let line = line.context("read command request")?;
                if line.trim().is_empty() {
                    continue;
                }
                println!("{}", endpoint.handle_json(&line));
            }
        }
    }

    eprintln!("{}", pipeline.dump());
    Pipeline::stop();
    registry
        .save(&config.store.path)
        .with_context(|| format!("save store '{}'", config.store.path.display()))?;
    Ok(())
}

fn cmd_check_config(args: CheckConfigArgs) -> anyhow::Result<()> {
    let config = load_config(Some(&args.config))?;
    let rendered = serde_json::to_string_pretty(&config).context("render effective config")?;
    println!("{rendered}");
    Ok(())
}

fn cmd_dump_plan(args: DumpPlanArgs) -> anyhow::Result<()> {
    let config = load_config(args.config.as_ref())?;
    let pipeline = Pipeline::launch(&config).context("start render pipeline")?;

    let group = strandcast::Group {
        id: GroupId(1),
        name: "demo".into(),
        enabled: true,
        start: 0,
        end: config.render.framebuffer_pixels.saturating_sub(1),
        brightness: 1.0,
        mirrored: false,
    };
    let fill = shared(FillRenderable::new(0, HsiPixel::clamped(0.0, 1.0, 1.0)));
    pipeline.add_group(fill, &group).context("add demo mapping")?;

    std::thread::sleep(pipeline_settle(&config));
    println!("{}", pipeline.dump());
    pipeline.shutdown();
    Ok(())
}

/// Long enough for a couple of frames at the configured rate.
fn pipeline_settle(config: &Config) -> Duration {
    Duration::from_secs_f64((2.0 / config.render.fps).clamp(0.01, 1.0))
}
