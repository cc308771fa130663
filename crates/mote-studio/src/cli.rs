use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use mote_engine::config::{
    DEFAULT_EXPONENT, DEFAULT_PARTICLE_SIZE, DEFAULT_TIME_STEP, SimulationConfig,
};

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum BackendChoice {
    /// Deterministic CPU emulation.
    Soft,
    /// Headless GPU device through wgpu.
    Wgpu,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum View {
    /// One billboard per particle.
    Particles,
    /// Channel visualizer, one texel per particle.
    Debug,
}

/// Headless driver for the mote particle simulation.
#[derive(Debug, Parser)]
#[command(name = "mote-studio", version)]
pub struct Cli {
    /// Particle count is 2^exponent; must be even.
    #[arg(long, default_value_t = DEFAULT_EXPONENT)]
    pub exponent: u32,

    /// Integration time step in seconds.
    #[arg(long, default_value_t = DEFAULT_TIME_STEP, allow_negative_numbers = true)]
    pub dt: f32,

    /// Particle diameter.
    #[arg(long, default_value_t = DEFAULT_PARTICLE_SIZE)]
    pub diameter: f32,

    /// Frames to simulate.
    #[arg(long, default_value_t = 120)]
    pub frames: u32,

    /// RNG seed for the initial particles.
    #[arg(long)]
    pub seed: Option<u64>,

    #[arg(long, value_enum, default_value_t = BackendChoice::Soft)]
    pub backend: BackendChoice,

    /// Write the final frame to this PNG.
    #[arg(long)]
    pub snapshot: Option<PathBuf>,

    /// What the snapshot shows.
    #[arg(long, value_enum, default_value_t = View::Particles)]
    pub view: View,

    /// Snapshot width and height in pixels.
    #[arg(long, default_value_t = 512)]
    pub size: u32,

    /// Load WGSL stages from this directory instead of the built-in ones.
    #[arg(long)]
    pub shaders: Option<PathBuf>,

    /// Log filter, `env_logger` syntax. Overrides `RUST_LOG`.
    #[arg(long)]
    pub log: Option<String>,
}

impl Cli {
    pub fn config(&self) -> SimulationConfig {
        SimulationConfig {
            exponent: self.exponent,
            time_step: self.dt,
            particle_size: self.diameter,
            seed: self.seed,
            ..SimulationConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cli = Cli::try_parse_from(["mote-studio"]).unwrap();
        assert_eq!(cli.backend, BackendChoice::Soft);
        assert_eq!(cli.view, View::Particles);
        assert_eq!(cli.config(), SimulationConfig::default());
        assert!(cli.snapshot.is_none());
    }

    #[test]
    fn every_flag() {
        let cli = Cli::try_parse_from([
            "mote-studio",
            "--exponent",
            "8",
            "--dt",
            "0.005",
            "--diameter",
            "0.1",
            "--frames",
            "10",
            "--seed",
            "42",
            "--backend",
            "wgpu",
            "--snapshot",
            "out.png",
            "--view",
            "debug",
        ])
        .unwrap();
        let config = cli.config();
        assert_eq!(config.exponent, 8);
        assert_eq!(config.time_step, 0.005);
        assert_eq!(config.particle_size, 0.1);
        assert_eq!(config.seed, Some(42));
        assert_eq!(cli.frames, 10);
        assert_eq!(cli.backend, BackendChoice::Wgpu);
        assert_eq!(cli.view, View::Debug);
        assert_eq!(cli.snapshot, Some(PathBuf::from("out.png")));
    }

    #[test]
    fn negative_dt_parses_and_fails_validation() {
        let cli = Cli::try_parse_from(["mote-studio", "--dt", "-0.01"]).unwrap();
        assert!(cli.config().validate().is_err());
    }

    #[test]
    fn unknown_backend_is_rejected() {
        assert!(Cli::try_parse_from(["mote-studio", "--backend", "gl"]).is_err());
    }
}
