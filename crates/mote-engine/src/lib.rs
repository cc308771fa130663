//! Mote engine crate.
//!
//! Texture-resident particle simulation: per-particle position, velocity and
//! force live in RGBA32F textures and are advanced each frame by a ping-pong
//! Euler/RK2 render-to-texture pipeline. Renderers read the same textures.

pub mod backend;
pub mod device;
pub mod logging;

pub mod config;
pub mod error;
pub mod pipeline;
pub mod render;
pub mod stages;
pub mod state;

mod context;

pub use context::SimulationContext;
pub use error::{ConfigError, SimError, SimResult};
