//! Command-line argument parsing

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use mixdown_core::{EngineConfig, QualityConfig, QualityMode};

/// mixdown: real-time audio mixer engine
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Settings file (default: <config dir>/mixdown/config.toml)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, default_value = "false")]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Render the demo arrangement into a WAV file
    Render(RenderArgs),
    /// Play the demo arrangement on the first working audio backend
    Play(PlayArgs),
    /// List audio backends in the order they are tried
    Devices,
    /// Inspect or create the settings file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the settings file location
    Path,
    /// Print the effective settings as TOML
    Show,
    /// Write the default settings
    Init {
        /// Overwrite an existing file
        #[arg(long, default_value = "false")]
        force: bool,
    },
}

/// Settings that may be overridden per invocation
#[derive(clap::Args, Debug, Default, Clone)]
pub struct EngineOverrides {
    /// Quality preset (draft, high-quality, final-mix)
    #[arg(short, long)]
    pub quality: Option<QualityMode>,

    /// Frames per period
    #[arg(long)]
    pub frames: Option<usize>,

    /// Base sample rate in Hz
    #[arg(long)]
    pub sample_rate: Option<u32>,

    /// Master bus channel count
    #[arg(long)]
    pub channels: Option<usize>,

    /// Worker threads (0 uses every core)
    #[arg(long)]
    pub workers: Option<usize>,

    /// Master gain
    #[arg(long)]
    pub gain: Option<f32>,
}

impl EngineOverrides {
    pub fn apply(&self, config: &mut EngineConfig) {
        if let Some(mode) = self.quality {
            config.quality = QualityConfig::Preset(mode);
        }
        if let Some(frames) = self.frames {
            config.frames_per_period = frames;
        }
        if let Some(rate) = self.sample_rate {
            config.sample_rate = rate;
        }
        if let Some(channels) = self.channels {
            config.channels = channels;
        }
        if let Some(workers) = self.workers {
            config.worker_threads = workers;
        }
        if let Some(gain) = self.gain {
            config.master_gain = gain;
        }
    }
}

#[derive(clap::Args, Debug)]
pub struct RenderArgs {
    /// Output WAV file
    #[arg(short, long)]
    pub output: PathBuf,

    /// Length of the render in seconds
    #[arg(short, long, default_value_t = 4.0)]
    pub seconds: f64,

    /// WAV file to play alongside the demo
    #[arg(long)]
    pub sample: Option<PathBuf>,

    /// Print the render report as JSON
    #[arg(long, default_value = "false")]
    pub json: bool,

    #[command(flatten)]
    pub engine: EngineOverrides,
}

#[derive(clap::Args, Debug)]
pub struct PlayArgs {
    /// Playback length in seconds
    #[arg(short, long, default_value_t = 4.0)]
    pub seconds: f64,

    /// WAV file to play alongside the demo
    #[arg(long)]
    pub sample: Option<PathBuf>,

    /// Audio backend to try first
    #[arg(short, long)]
    pub backend: Option<String>,

    /// Render directly in the device callback instead of prebuffering
    #[arg(long, default_value = "false")]
    pub no_fifo: bool,

    #[command(flatten)]
    pub engine: EngineOverrides,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_arguments() {
        let args = Args::try_parse_from([
            "mixdown",
            "render",
            "-o",
            "out.wav",
            "--seconds",
            "2",
            "--quality",
            "hq",
            "--frames",
            "512",
        ])
        .unwrap();

        let Command::Render(render) = args.command else { panic!("expected render") };
        assert_eq!(render.output, PathBuf::from("out.wav"));
        assert_eq!(render.seconds, 2.0);
        assert_eq!(render.engine.quality, Some(QualityMode::HighQuality));
        assert_eq!(render.engine.frames, Some(512));
        assert!(!render.json);
    }

    #[test]
    fn test_unknown_quality_rejected() {
        let result =
            Args::try_parse_from(["mixdown", "render", "-o", "out.wav", "--quality", "lofi"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_overrides_applied() {
        let overrides = EngineOverrides {
            quality: Some(QualityMode::FinalMix),
            sample_rate: Some(48000),
            gain: Some(0.5),
            ..Default::default()
        };
        let mut config = EngineConfig::default();
        overrides.apply(&mut config);

        assert_eq!(config.quality, QualityConfig::Preset(QualityMode::FinalMix));
        assert_eq!(config.sample_rate, 48000);
        assert_eq!(config.master_gain, 0.5);
        assert_eq!(config.frames_per_period, EngineConfig::default().frames_per_period);
    }

    #[test]
    fn test_config_subcommand() {
        let args =
            Args::try_parse_from(["mixdown", "--config", "alt.toml", "config", "init", "--force"])
                .unwrap();
        assert_eq!(args.config, Some(PathBuf::from("alt.toml")));
        assert!(matches!(
            args.command,
            Command::Config { action: ConfigAction::Init { force: true } }
        ));
    }
}
