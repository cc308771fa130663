//! Particle state: CPU initial arrays, the texture/framebuffer factory and the
//! four GPU snapshots.

mod buffers;
mod factory;
mod particles;

pub use buffers::{BufferRole, Channel, Snapshot, StateBufferSet};
pub use factory::{DisplayTarget, check_complete, create_channel_texture, create_display_target};
pub use particles::ParticleState;
