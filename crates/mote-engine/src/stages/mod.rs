//! Shader stages: the six programs, their parameter contracts, and loading.
//!
//! A [`Stage`] pairs a compiled program with the locations of its contract
//! parameters. Parameters the program does not consume resolve to `None` and
//! are silently skipped when bound.

mod kind;
mod loader;
mod registry;

pub use kind::{INDEX_LAYOUT, MESH_LAYOUT, QUAD_LAYOUT, StageKind};
pub use loader::{EmbeddedShaders, ShaderDir, StageLoader, StageSources};
pub use registry::{ShaderParamUnresolved, Stage, StageRegistry, bind_params, load_stage};
