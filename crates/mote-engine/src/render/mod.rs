//! Renderers reading the current snapshot, and scene meshes.

mod mesh;
mod passes;

pub use mesh::{Mesh, MeshVertex, ground_plane};
pub use passes::{render_ambient, render_debug, render_particles};
