use std::fmt;

use crate::backend::{VertexAttrib, VertexLayout, VertexStep};

/// The six programs of the simulation and render pipeline.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StageKind {
    /// Pairwise contact, boundary and gravity forces.
    Force,
    /// Euler predictor.
    Euler,
    /// Heun corrector.
    Rk2,
    /// Instanced billboard per particle.
    Particle,
    /// Full-screen channel visualizer.
    Debug,
    /// Lit mesh pass for scene geometry.
    Ambient,
}

const QUAD_ATTRS: &[VertexAttrib] = &[VertexAttrib {
    name: "position",
    components: 2,
    offset: 0,
}];

const INDEX_ATTRS: &[VertexAttrib] = &[VertexAttrib {
    name: "idx",
    components: 1,
    offset: 0,
}];

const MESH_ATTRS: &[VertexAttrib] = &[
    VertexAttrib {
        name: "position",
        components: 3,
        offset: 0,
    },
    VertexAttrib {
        name: "normal",
        components: 3,
        offset: 12,
    },
    VertexAttrib {
        name: "uv",
        components: 2,
        offset: 24,
    },
];

/// Interleaved `position.xy` quad stream.
pub const QUAD_LAYOUT: VertexLayout = VertexLayout {
    stride: 8,
    step: VertexStep::PerVertex,
    attributes: QUAD_ATTRS,
};

/// One `f32` particle index per instance.
pub const INDEX_LAYOUT: VertexLayout = VertexLayout {
    stride: 4,
    step: VertexStep::PerInstance,
    attributes: INDEX_ATTRS,
};

/// Interleaved `position.xyz, normal.xyz, uv.xy` mesh stream.
pub const MESH_LAYOUT: VertexLayout = VertexLayout {
    stride: 32,
    step: VertexStep::PerVertex,
    attributes: MESH_ATTRS,
};

impl StageKind {
    /// Load order of the registry.
    pub const ALL: [StageKind; 6] = [
        StageKind::Force,
        StageKind::Particle,
        StageKind::Euler,
        StageKind::Rk2,
        StageKind::Debug,
        StageKind::Ambient,
    ];

    /// Parameter names the stage's program is expected to consume, uniforms
    /// first, then vertex attributes.
    pub fn params(self) -> &'static [&'static str] {
        match self {
            StageKind::Force => &["posTex", "velTex", "side", "diameter", "dt", "position"],
            StageKind::Particle => &["cameraMat", "posTex", "velTex", "forceTex", "side", "idx"],
            StageKind::Euler => &[
                "posTex", "velTex", "forceTex", "side", "diameter", "dt", "position",
            ],
            StageKind::Rk2 => &[
                "posTex",
                "velTex1",
                "forceTex1",
                "velTex2",
                "forceTex2",
                "side",
                "diameter",
                "dt",
                "position",
            ],
            StageKind::Debug => &["posTex", "velTex", "forceTex", "side", "position"],
            StageKind::Ambient => &["cameraMat", "posTex", "position", "normal", "uv"],
        }
    }

    /// Vertex stream consumed by the stage.
    pub fn vertex_layout(self) -> VertexLayout {
        match self {
            StageKind::Force | StageKind::Euler | StageKind::Rk2 | StageKind::Debug => QUAD_LAYOUT,
            StageKind::Particle => INDEX_LAYOUT,
            StageKind::Ambient => MESH_LAYOUT,
        }
    }

    /// `(vertex, fragment)` shader file names.
    pub fn shader_files(self) -> (&'static str, &'static str) {
        match self {
            StageKind::Force => ("quad.vert.wgsl", "forces.frag.wgsl"),
            StageKind::Euler => ("quad.vert.wgsl", "euler.frag.wgsl"),
            StageKind::Rk2 => ("quad.vert.wgsl", "rk2.frag.wgsl"),
            StageKind::Debug => ("quad.vert.wgsl", "debug.frag.wgsl"),
            StageKind::Particle => ("particle.vert.wgsl", "particle.frag.wgsl"),
            StageKind::Ambient => ("ambient.vert.wgsl", "ambient.frag.wgsl"),
        }
    }

    /// Whether the stage is drawn as a full-screen quad over the target.
    pub fn is_full_screen(self) -> bool {
        self.vertex_layout() == QUAD_LAYOUT
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StageKind::Force => "force",
            StageKind::Euler => "euler",
            StageKind::Rk2 => "rk2",
            StageKind::Particle => "particle",
            StageKind::Debug => "debug",
            StageKind::Ambient => "ambient",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
