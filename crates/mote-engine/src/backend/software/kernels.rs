//! CPU kernels for the six stage programs.
//!
//! Each kernel evaluates the same math as the matching WGSL entry points:
//! full-screen stages run once per target texel, the particle and ambient
//! stages splat one point per particle or mesh vertex.

use std::collections::BTreeMap;

use glam::{Mat4, Vec2, Vec3, Vec4};

use crate::backend::{ParamValue, TEXEL_COMPONENTS, TextureId};
use crate::error::BackendError;
use crate::stages::StageKind;

const GRAVITY: Vec3 = Vec3::new(0.0, -9.8, 0.0);
const STIFFNESS: f32 = 800.0;
const DAMPING: f32 = 4.0;
const BOX_HALF_EXTENT: f32 = 1.0;

const LIGHT_DIR: Vec3 = Vec3::new(0.3, 1.0, 0.5);
const BASE_COLOR: Vec3 = Vec3::new(0.55, 0.55, 0.6);
const AMBIENT: f32 = 0.25;

/// Parameter values of one draw, keyed by the name the program declares.
#[derive(Debug, Default)]
pub(super) struct Inputs {
    values: BTreeMap<String, ParamValue>,
}

impl Inputs {
    pub(super) fn set(&mut self, name: &str, value: ParamValue) {
        self.values.insert(name.to_string(), value);
    }

    fn texture(&self, name: &'static str) -> Result<TextureId, BackendError> {
        match self.values.get(name) {
            Some(ParamValue::Texture(t)) => Ok(*t),
            _ => Err(BackendError::NothingBound(name)),
        }
    }

    fn float(&self, name: &'static str) -> Result<f32, BackendError> {
        match self.values.get(name) {
            Some(ParamValue::Float(v)) => Ok(*v),
            _ => Err(BackendError::NothingBound(name)),
        }
    }

    fn mat4(&self, name: &'static str) -> Result<Mat4, BackendError> {
        match self.values.get(name) {
            Some(ParamValue::Mat4(m)) => Ok(Mat4::from_cols_array_2d(m)),
            _ => Err(BackendError::NothingBound(name)),
        }
    }
}

/// Read-only texel access, `textureLoad` semantics: out-of-range reads
/// return zero.
#[derive(Debug, Copy, Clone)]
pub(super) struct View<'a> {
    pub width: u32,
    pub height: u32,
    pub data: &'a [f32],
}

impl View<'_> {
    fn load(&self, x: i64, y: i64) -> Vec4 {
        if x < 0 || y < 0 || x >= i64::from(self.width) || y >= i64::from(self.height) {
            return Vec4::ZERO;
        }
        let i = (y as usize * self.width as usize + x as usize) * TEXEL_COMPONENTS;
        Vec4::from_slice(&self.data[i..i + TEXEL_COMPONENTS])
    }

    fn xyz(&self, x: i64, y: i64) -> Vec3 {
        self.load(x, y).truncate()
    }
}

/// Color attachment being written by a draw.
#[derive(Debug)]
pub(super) struct Target {
    pub slot: u32,
    pub width: u32,
    pub height: u32,
    pub data: Vec<f32>,
}

impl Target {
    fn store(&mut self, x: u32, y: u32, value: Vec4) {
        let i = (y as usize * self.width as usize + x as usize) * TEXEL_COMPONENTS;
        value.write_to_slice(&mut self.data[i..i + TEXEL_COMPONENTS]);
    }

    /// Writes a point at clip-space `clip`, dropping it when outside the
    /// view volume.
    fn splat(&mut self, clip: Vec4, color: Vec4) {
        if clip.w <= 0.0 {
            return;
        }
        let ndc = clip.truncate() / clip.w;
        if ndc.x.abs() > 1.0 || ndc.y.abs() > 1.0 || !(0.0..=1.0).contains(&ndc.z) {
            return;
        }
        let x = ((ndc.x * 0.5 + 0.5) * self.width as f32) as u32;
        let y = ((0.5 - ndc.y * 0.5) * self.height as f32) as u32;
        self.store(x.min(self.width - 1), y.min(self.height - 1), color);
    }
}

fn fetch<'a, S>(sample: &S, inputs: &Inputs, name: &'static str) -> Result<View<'a>, BackendError>
where
    S: Fn(TextureId) -> Option<View<'a>>,
{
    let texture = inputs.texture(name)?;
    sample(texture).ok_or(BackendError::Unallocated(texture))
}

/// Runs `shade` for every texel of the targets and stores the returned
/// `(slot, value)` pairs. Slots the draw does not write are ignored.
fn per_texel<const N: usize, F>(targets: &mut [Target], mut shade: F)
where
    F: FnMut(i64, i64, Vec2) -> [(u32, Vec4); N],
{
    let Some((width, height)) = targets.first().map(|t| (t.width, t.height)) else {
        return;
    };
    for y in 0..height {
        for x in 0..width {
            let uv = Vec2::new(
                (x as f32 + 0.5) / width as f32,
                (y as f32 + 0.5) / height as f32,
            );
            for (slot, value) in shade(i64::from(x), i64::from(y), uv) {
                if let Some(target) = targets.iter_mut().find(|t| t.slot == slot) {
                    target.store(x, y, value);
                }
            }
        }
    }
}

fn spring(penetration: f32, separation: f32) -> f32 {
    STIFFNESS * penetration - DAMPING * separation
}

fn wall(p: f32, v: f32, radius: f32) -> f32 {
    let mut f = 0.0;
    let low = radius - BOX_HALF_EXTENT - p;
    if low > 0.0 {
        f += spring(low, v);
    }
    let high = p - (BOX_HALF_EXTENT - radius);
    if high > 0.0 {
        f -= spring(high, -v);
    }
    f
}

/// Full-screen stages: force, Euler, RK2, debug.
pub(super) fn full_screen<'a, S>(
    kind: StageKind,
    inputs: &Inputs,
    sample: &S,
    targets: &mut [Target],
) -> Result<(), BackendError>
where
    S: Fn(TextureId) -> Option<View<'a>>,
{
    match kind {
        StageKind::Force => {
            let pos = fetch(sample, inputs, "posTex")?;
            let vel = fetch(sample, inputs, "velTex")?;
            let n = inputs.float("side")? as i64;
            let diameter = inputs.float("diameter")?;
            let radius = 0.5 * diameter;

            per_texel(targets, |x, y, _| {
                let p = pos.xyz(x, y);
                let v = vel.xyz(x, y);
                let mut f = GRAVITY;
                for oy in 0..n {
                    for ox in 0..n {
                        if (ox, oy) == (x, y) {
                            continue;
                        }
                        let d = p - pos.xyz(ox, oy);
                        let dist = d.length();
                        if dist >= diameter || dist <= 1e-6 {
                            continue;
                        }
                        let normal = d / dist;
                        let u = vel.xyz(ox, oy);
                        f += normal * spring(diameter - dist, (v - u).dot(normal));
                    }
                }
                f.x += wall(p.x, v.x, radius);
                let floor_depth = radius - p.y;
                if floor_depth > 0.0 {
                    f.y += spring(floor_depth, v.y);
                }
                f.z += wall(p.z, v.z, radius);
                [(2, f.extend(1.0))]
            });
        }
        StageKind::Euler => {
            let pos = fetch(sample, inputs, "posTex")?;
            let vel = fetch(sample, inputs, "velTex")?;
            let force = fetch(sample, inputs, "forceTex")?;
            let dt = inputs.float("dt")?;

            per_texel(targets, |x, y, _| {
                let p = pos.xyz(x, y);
                let v = vel.xyz(x, y);
                let f = force.xyz(x, y);
                [(0, (p + v * dt).extend(1.0)), (1, (v + f * dt).extend(1.0))]
            });
        }
        StageKind::Rk2 => {
            let pos = fetch(sample, inputs, "posTex")?;
            let vel1 = fetch(sample, inputs, "velTex1")?;
            let force1 = fetch(sample, inputs, "forceTex1")?;
            let vel2 = fetch(sample, inputs, "velTex2")?;
            let force2 = fetch(sample, inputs, "forceTex2")?;
            let h = 0.5 * inputs.float("dt")?;

            per_texel(targets, |x, y, _| {
                let p1 = pos.xyz(x, y);
                let v1 = vel1.xyz(x, y);
                let f1 = force1.xyz(x, y);
                let v2 = vel2.xyz(x, y);
                let f2 = force2.xyz(x, y);
                [
                    (0, (p1 + h * (v1 + v2)).extend(1.0)),
                    (1, (v1 + h * (f1 + f2)).extend(1.0)),
                    (2, (0.5 * (f1 + f2)).extend(1.0)),
                ]
            });
        }
        StageKind::Debug => {
            let pos = fetch(sample, inputs, "posTex")?;
            let vel = fetch(sample, inputs, "velTex")?;
            let force = fetch(sample, inputs, "forceTex")?;
            let side = inputs.float("side")?;
            let last = side as i64 - 1;

            per_texel(targets, |_, _, uv| {
                let texel = (uv * side).floor();
                let x = (texel.x as i64).clamp(0, last.max(0));
                let y = (texel.y as i64).clamp(0, last.max(0));
                let color = Vec4::new(
                    (pos.load(x, y).y * 0.5).clamp(0.0, 1.0),
                    (vel.xyz(x, y).length() * 0.25).clamp(0.0, 1.0),
                    (force.xyz(x, y).length() * 0.02).clamp(0.0, 1.0),
                    1.0,
                );
                [(0, color)]
            });
        }
        StageKind::Particle | StageKind::Ambient => {
            return Err(BackendError::Unsupported("full-screen draw of a point stage"));
        }
    }
    Ok(())
}

/// Particle stage: one point per index in `indices`.
pub(super) fn particles<'a, S>(
    inputs: &Inputs,
    sample: &S,
    indices: &[f32],
    targets: &mut [Target],
) -> Result<(), BackendError>
where
    S: Fn(TextureId) -> Option<View<'a>>,
{
    let camera = inputs.mat4("cameraMat")?;
    let pos = fetch(sample, inputs, "posTex")?;
    let vel = fetch(sample, inputs, "velTex")?;
    let force = fetch(sample, inputs, "forceTex")?;
    let side = (inputs.float("side")? as i64).max(1);

    for &idx in indices {
        let i = idx as i64;
        let (x, y) = (i % side, i / side);
        let speed = (vel.xyz(x, y).length() * 0.25).clamp(0.0, 1.0);
        let load = (force.xyz(x, y).length() * 0.02).clamp(0.0, 1.0);
        let color = Vec4::new(speed, load, 1.0 - speed, 1.0);
        let clip = camera * pos.xyz(x, y).extend(1.0);
        for target in targets.iter_mut().filter(|t| t.slot == 0) {
            target.splat(clip, color);
        }
    }
    Ok(())
}

/// Ambient stage: one lit point per indexed mesh vertex.
/// Vertices are interleaved `position.xyz, normal.xyz, uv.xy`.
pub(super) fn mesh(
    inputs: &Inputs,
    vertices: &[f32],
    indices: &[u32],
    targets: &mut [Target],
) -> Result<(), BackendError> {
    const STRIDE: usize = 8;

    let camera = inputs.mat4("cameraMat")?;
    let light = LIGHT_DIR.normalize();

    for &index in indices {
        let base = index as usize * STRIDE;
        let Some(vertex) = vertices.get(base..base + STRIDE) else {
            continue;
        };
        let position = Vec3::from_slice(&vertex[0..3]);
        let normal = Vec3::from_slice(&vertex[3..6]).normalize_or_zero();
        let lambert = normal.dot(light).max(0.0);
        let color = (BASE_COLOR * (AMBIENT + (1.0 - AMBIENT) * lambert)).extend(1.0);
        let clip = camera * position.extend(1.0);
        for target in targets.iter_mut().filter(|t| t.slot == 0) {
            target.splat(clip, color);
        }
    }
    Ok(())
}
