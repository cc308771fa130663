mod camera;
mod cli;
mod snapshot;

use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use mote_engine::SimulationContext;
use mote_engine::backend::{Backend, SoftwareBackend, WgpuBackend};
use mote_engine::device::GpuInit;
use mote_engine::logging::{LoggingConfig, init_logging};
use mote_engine::render::ground_plane;
use mote_engine::stages::{EmbeddedShaders, ShaderDir};

use cli::{BackendChoice, Cli, View};

const BACKGROUND: [f32; 4] = [0.05, 0.05, 0.08, 1.0];

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(LoggingConfig {
        env_filter: cli.log.clone(),
        ..LoggingConfig::default()
    });

    match cli.backend {
        BackendChoice::Soft => run(SoftwareBackend::new(), &cli),
        BackendChoice::Wgpu => {
            let backend = pollster::block_on(WgpuBackend::new_headless(GpuInit::default()))
                .context("creating the wgpu backend")?;
            run(backend, &cli)
        }
    }
}

fn run<B: Backend>(backend: B, cli: &Cli) -> Result<()> {
    let config = cli.config();
    config.validate().context("invalid simulation parameters")?;

    let setup = match &cli.shaders {
        Some(dir) => pollster::block_on(SimulationContext::new(backend, &config, &ShaderDir::new(dir))),
        None => pollster::block_on(SimulationContext::new(backend, &config, &EmbeddedShaders)),
    };
    let mut ctx = setup.context("simulation setup failed")?;
    log::info!(
        "stepping {} particles for {} frames on {}",
        ctx.params().num_particles,
        cli.frames,
        ctx.backend().name()
    );

    let started = Instant::now();
    for frame in 0..cli.frames {
        ctx.step()
            .with_context(|| format!("frame {frame} failed"))?;
    }
    ctx.finish()?;
    let elapsed = started.elapsed();
    log::info!(
        "{} frames in {:.2?} ({:.2?}/frame)",
        cli.frames,
        elapsed,
        elapsed / cli.frames.max(1)
    );

    if let Some(path) = &cli.snapshot {
        let target = ctx.create_display_target(cli.size, cli.size)?;
        match cli.view {
            View::Particles => {
                let camera = camera::orbit(ctx.frame_index(), 1.0);
                let (vertices, indices) = ground_plane(1.0);
                let floor = ctx.upload_mesh(&vertices, &indices)?;
                ctx.render_ambient(&target, camera, &floor, Some(BACKGROUND))?;
                ctx.render_particles(&target, camera, None)?;
            }
            View::Debug => ctx.render_debug(&target)?,
        }
        let pixels = target.read(ctx.backend_mut())?;
        snapshot::write_png(path, target.width, target.height, &pixels)?;
        log::info!("snapshot written to {}", path.display());
    }

    Ok(())
}
