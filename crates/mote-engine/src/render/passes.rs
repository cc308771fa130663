//! Read-only consumers of the current snapshot.
//!
//! Each renderer samples the snapshot's textures and writes only to a
//! [`DisplayTarget`]; the simulation state is never a render target here.

use glam::Mat4;

use super::Mesh;
use crate::backend::{Backend, Geometry, ParamValue, TextureId};
use crate::error::SimResult;
use crate::pipeline::{PassKind, PassPlan, run_pass};
use crate::stages::{StageKind, StageRegistry};
use crate::state::{DisplayTarget, Snapshot, StateBufferSet};

fn channel_reads(snapshot: &Snapshot) -> Vec<(&'static str, TextureId)> {
    vec![
        ("posTex", snapshot.position),
        ("velTex", snapshot.velocity),
        ("forceTex", snapshot.force),
    ]
}

/// Draws one billboard per particle, colored by speed and force load.
pub fn render_particles<B: Backend + ?Sized>(
    backend: &mut B,
    stages: &StageRegistry,
    buffers: &StateBufferSet,
    snapshot: &Snapshot,
    target: &DisplayTarget,
    camera: Mat4,
    clear: Option<[f32; 4]>,
) -> SimResult<()> {
    let plan = PassPlan {
        kind: PassKind::Particles,
        target: target.framebuffer,
        reads: channel_reads(snapshot),
        writes: vec![target.texture],
    };
    let uniforms = [
        ("cameraMat", ParamValue::Mat4(camera.to_cols_array_2d())),
        ("side", ParamValue::Float(buffers.side() as f32)),
    ];
    let geometry = Geometry::Instances {
        buffer: buffers.index_buffer(),
        count: buffers.num_particles(),
    };
    run_pass(
        backend,
        stages.get(StageKind::Particle),
        &plan,
        &uniforms,
        geometry,
        clear,
    )
}

/// Visualizes the snapshot's channels over the whole target: position height
/// in red, speed in green, force magnitude in blue.
pub fn render_debug<B: Backend + ?Sized>(
    backend: &mut B,
    stages: &StageRegistry,
    buffers: &StateBufferSet,
    snapshot: &Snapshot,
    target: &DisplayTarget,
) -> SimResult<()> {
    let plan = PassPlan {
        kind: PassKind::Debug,
        target: target.framebuffer,
        reads: channel_reads(snapshot),
        writes: vec![target.texture],
    };
    let uniforms = [("side", ParamValue::Float(buffers.side() as f32))];
    run_pass(
        backend,
        stages.get(StageKind::Debug),
        &plan,
        &uniforms,
        Geometry::FullScreenQuad,
        None,
    )
}

/// Draws scene geometry with ambient plus Lambert lighting.
pub fn render_ambient<B: Backend + ?Sized>(
    backend: &mut B,
    stages: &StageRegistry,
    snapshot: &Snapshot,
    target: &DisplayTarget,
    camera: Mat4,
    mesh: &Mesh,
    clear: Option<[f32; 4]>,
) -> SimResult<()> {
    let plan = PassPlan {
        kind: PassKind::Ambient,
        target: target.framebuffer,
        reads: vec![("posTex", snapshot.position)],
        writes: vec![target.texture],
    };
    let uniforms = [("cameraMat", ParamValue::Mat4(camera.to_cols_array_2d()))];
    run_pass(
        backend,
        stages.get(StageKind::Ambient),
        &plan,
        &uniforms,
        mesh.geometry(),
        clear,
    )
}
