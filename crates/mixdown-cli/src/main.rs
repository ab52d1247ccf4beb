//! mixdown: offline render and live playback driver for the mixer engine

mod args;
mod config;
mod demo;
mod session;

use anyhow::{bail, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use args::{Args, Command, ConfigAction};

fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.debug { "mixdown=debug" } else { "mixdown=info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();

    let path = args.config.clone().unwrap_or_else(config::config_path);

    match args.command {
        Command::Render(render) => {
            let mut engine = config::load_config(&path)?;
            render.engine.apply(&mut engine);
            let report = session::render(&engine, &render)?;
            if render.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "Rendered {} frames ({:.2}s, {} Hz, {}) to {} in {} ms, peaks L {:.2} R {:.2}",
                    report.frames,
                    report.seconds,
                    report.sample_rate,
                    report.quality,
                    report.output.display(),
                    report.elapsed_ms,
                    report.peak_left,
                    report.peak_right,
                );
            }
        }
        Command::Play(play) => {
            let mut engine = config::load_config(&path)?;
            play.engine.apply(&mut engine);
            session::play(engine, &play)?;
        }
        Command::Devices => {
            for (i, candidate) in mixdown_engine::default_candidates().iter().enumerate() {
                println!("{}: {}", i, candidate.name());
            }
            println!("fallback: {}", mixdown_engine::NullDevice::NAME);
        }
        Command::Config { action } => match action {
            ConfigAction::Path => println!("{}", path.display()),
            ConfigAction::Show => {
                let engine = config::load_config(&path)?;
                print!("{}", toml::to_string_pretty(&engine)?);
            }
            ConfigAction::Init { force } => {
                if path.exists() && !force {
                    bail!("{} already exists (use --force to overwrite)", path.display());
                }
                config::save_config(&path, &mixdown_core::EngineConfig::default())?;
                tracing::info!(path = %path.display(), "Wrote default settings");
            }
        },
    }

    Ok(())
}
