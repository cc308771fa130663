use std::path::{Path, PathBuf};

use anyhow::Context;
use futures::future::{self, BoxFuture, FutureExt};

use super::StageKind;

/// WGSL sources of one stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSources {
    pub vertex: String,
    pub fragment: String,
}

/// Asynchronous source provider for stage programs.
///
/// Loading only delivers text; compilation happens once every stage's sources
/// have arrived.
pub trait StageLoader {
    fn load(&self, kind: StageKind) -> BoxFuture<'_, anyhow::Result<StageSources>>;
}

/// Sources compiled into the crate.
#[derive(Debug, Default, Copy, Clone)]
pub struct EmbeddedShaders;

impl EmbeddedShaders {
    pub fn sources(kind: StageKind) -> (&'static str, &'static str) {
        const QUAD: &str = include_str!("shaders/quad.vert.wgsl");
        match kind {
            StageKind::Force => (QUAD, include_str!("shaders/forces.frag.wgsl")),
            StageKind::Euler => (QUAD, include_str!("shaders/euler.frag.wgsl")),
            StageKind::Rk2 => (QUAD, include_str!("shaders/rk2.frag.wgsl")),
            StageKind::Debug => (QUAD, include_str!("shaders/debug.frag.wgsl")),
            StageKind::Particle => (
                include_str!("shaders/particle.vert.wgsl"),
                include_str!("shaders/particle.frag.wgsl"),
            ),
            StageKind::Ambient => (
                include_str!("shaders/ambient.vert.wgsl"),
                include_str!("shaders/ambient.frag.wgsl"),
            ),
        }
    }
}

impl StageLoader for EmbeddedShaders {
    fn load(&self, kind: StageKind) -> BoxFuture<'_, anyhow::Result<StageSources>> {
        let (vertex, fragment) = Self::sources(kind);
        future::ready(Ok(StageSources {
            vertex: vertex.to_string(),
            fragment: fragment.to_string(),
        }))
        .boxed()
    }
}

/// Reads sources from a directory laid out like the embedded set
/// (`quad.vert.wgsl`, `forces.frag.wgsl`, ...).
///
/// Files are read synchronously when [`StageLoader::load`] is called; the
/// returned future is already resolved.
#[derive(Debug, Clone)]
pub struct ShaderDir {
    root: PathBuf,
}

impl ShaderDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn read(&self, name: &str) -> anyhow::Result<String> {
        let path = self.root.join(name);
        std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read shader {}", path.display()))
    }
}

impl StageLoader for ShaderDir {
    fn load(&self, kind: StageKind) -> BoxFuture<'_, anyhow::Result<StageSources>> {
        let (vertex, fragment) = kind.shader_files();
        let sources = self.read(vertex).and_then(|vertex| {
            Ok(StageSources {
                vertex,
                fragment: self.read(fragment)?,
            })
        });
        future::ready(sources).boxed()
    }
}
