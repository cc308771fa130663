//! Graphics backends.
//!
//! The simulation core talks to the GPU through [`Backend`], a small GL-style
//! surface: named textures and framebuffers, a global bind state (bound texture,
//! bound framebuffer), programs with reflected parameter locations, and draws
//! into the bound framebuffer.
//!
//! Two implementations:
//! - [`WgpuBackend`]: executes on a real device through wgpu.
//! - [`SoftwareBackend`]: deterministic CPU emulation of the same programs,
//!   used by tests and headless runs without an adapter.
//!
//! Bind state is global and must be left as found; use the guards in
//! [`bind`] instead of calling `bind_*` directly.

pub mod bind;
mod framebuffer;
mod reflect;
pub mod software;
mod wgpu_backend;

use std::collections::BTreeMap;
use std::fmt;

use crate::error::BackendError;
use crate::stages::StageKind;

pub use bind::{FramebufferBinding, ResourceScope, TextureBinding};
pub use framebuffer::{FramebufferState, FramebufferStatus};
pub use reflect::ProgramInterface;
pub use software::SoftwareBackend;
pub use wgpu_backend::WgpuBackend;

/// Color slots a framebuffer can expose. Matches wgpu's default limit.
pub const MAX_COLOR_SLOTS: u32 = 8;

/// Floats per texel (RGBA32F).
pub const TEXEL_COMPONENTS: usize = 4;

macro_rules! handle {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u32);

        impl $name {
            pub(crate) const KIND: &'static str = $kind;

            #[inline]
            pub fn raw(self) -> u32 {
                self.0
            }

            pub(crate) fn unknown(self) -> BackendError {
                BackendError::UnknownHandle { kind: Self::KIND, id: self.0 }
            }
        }
    };
}

handle!(
    /// Texture name. Storage is allocated by [`Backend::tex_image_2d`].
    TextureId, "texture"
);
handle!(
    /// Framebuffer name: a set of color slots plus active draw buffers.
    FramebufferId, "framebuffer"
);
handle!(
    /// Compiled program (vertex + fragment) with its reflected interface.
    ProgramId, "program"
);
handle!(
    /// Static vertex or index buffer.
    BufferId, "buffer"
);

/// Monotonic handle allocator shared by both backends.
#[derive(Debug, Default)]
pub(crate) struct HandleAllocator {
    next: u32,
}

impl HandleAllocator {
    fn bump(&mut self) -> u32 {
        self.next = self.next.wrapping_add(1);
        self.next
    }

    pub(crate) fn texture(&mut self) -> TextureId {
        TextureId(self.bump())
    }

    pub(crate) fn framebuffer(&mut self) -> FramebufferId {
        FramebufferId(self.bump())
    }

    pub(crate) fn program(&mut self) -> ProgramId {
        ProgramId(self.bump())
    }

    pub(crate) fn buffer(&mut self) -> BufferId {
        BufferId(self.bump())
    }
}

/// Texture sampling filter.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FilterMode {
    Nearest,
    Linear,
}

/// Capability limits relevant to the simulation.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct BackendLimits {
    /// Largest texture width/height.
    pub max_texture_side: u32,
    /// Simultaneous color attachments per framebuffer.
    pub max_color_attachments: u32,
}

impl Default for BackendLimits {
    fn default() -> Self {
        Self {
            max_texture_side: 8192,
            max_color_attachments: MAX_COLOR_SLOTS,
        }
    }
}

/// Global binding state. Both backends track it the same way.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct Bindings {
    pub texture: Option<TextureId>,
    pub framebuffer: Option<FramebufferId>,
}

/// Resolved location of a named program parameter.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ParamLocation {
    /// Sampled texture at `@group(g) @binding(b)`.
    Texture { group: u32, binding: u32 },
    /// Uniform value at `@group(g) @binding(b)`, `size` bytes.
    Uniform { group: u32, binding: u32, size: u32 },
    /// Vertex attribute at `@location(n)`.
    Attribute { location: u32 },
}

/// Value assigned to a parameter for one draw.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum ParamValue {
    Texture(TextureId),
    Float(f32),
    /// Column-major 4x4 matrix.
    Mat4([[f32; 4]; 4]),
}

impl ParamValue {
    /// Raw little-endian bytes for uniform upload. Textures have none.
    pub fn uniform_bytes(&self) -> Vec<u8> {
        match self {
            ParamValue::Texture(_) => Vec::new(),
            ParamValue::Float(v) => bytemuck::bytes_of(v).to_vec(),
            ParamValue::Mat4(m) => bytemuck::cast_slice(m.as_slice()).to_vec(),
        }
    }
}

/// A parameter location paired with the value to use for a draw.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ParamBinding {
    pub location: ParamLocation,
    pub value: ParamValue,
}

/// Step rate of a vertex stream.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum VertexStep {
    PerVertex,
    PerInstance,
}

/// One named float attribute inside a vertex stream.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct VertexAttrib {
    pub name: &'static str,
    /// Number of f32 components (1..=4).
    pub components: u32,
    /// Byte offset inside one element.
    pub offset: u32,
}

/// Layout of the single vertex stream a program consumes.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct VertexLayout {
    pub stride: u32,
    pub step: VertexStep,
    pub attributes: &'static [VertexAttrib],
}

/// Sources and stream layout for one program.
#[derive(Debug, Copy, Clone)]
pub struct ProgramSource<'a> {
    pub kind: StageKind,
    pub vertex: &'a str,
    pub fragment: &'a str,
}

/// Geometry submitted by a draw.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Geometry {
    /// Two triangles covering the target; one fragment per texel.
    FullScreenQuad,
    /// One billboard (6 vertices) per element of an instance stream.
    Instances { buffer: BufferId, count: u32 },
    /// Indexed triangle mesh.
    Mesh {
        vertices: BufferId,
        indices: BufferId,
        index_count: u32,
    },
}

/// A draw into the currently bound framebuffer.
#[derive(Debug, Clone)]
pub struct DrawCall<'a> {
    pub label: &'static str,
    pub program: ProgramId,
    pub params: &'a [ParamBinding],
    pub geometry: Geometry,
    /// Clear the written slots to this color before drawing.
    pub clear: Option<[f32; 4]>,
}

impl DrawCall<'_> {
    /// Textures sampled by this draw.
    pub fn sampled_textures(&self) -> impl Iterator<Item = TextureId> + '_ {
        self.params.iter().filter_map(|p| match p.value {
            ParamValue::Texture(t) => Some(t),
            _ => None,
        })
    }
}

/// GL-style graphics surface used by the simulation core.
///
/// Texture and framebuffer operations act on the *bound* object, mirroring the
/// GPU's global bind state. Callers must restore that state after use (see
/// [`bind::TextureBinding`] and [`bind::FramebufferBinding`]).
pub trait Backend {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    fn limits(&self) -> BackendLimits;

    /// Current bind state.
    fn bindings(&self) -> Bindings;

    // ── textures ──────────────────────────────────────────────────────────

    fn create_texture(&mut self) -> TextureId;
    fn delete_texture(&mut self, texture: TextureId);
    fn bind_texture(&mut self, texture: Option<TextureId>) -> Result<(), BackendError>;

    /// Sets min/mag filtering on the bound texture.
    fn set_texture_filter(&mut self, filter: FilterMode) -> Result<(), BackendError>;

    /// Allocates RGBA32F storage for the bound texture, optionally seeded with
    /// `width * height * 4` floats.
    fn tex_image_2d(
        &mut self,
        width: u32,
        height: u32,
        data: Option<&[f32]>,
    ) -> Result<(), BackendError>;

    /// `(width, height)` of an allocated texture.
    fn texture_size(&self, texture: TextureId) -> Option<(u32, u32)>;

    /// Min/mag filter last set on a texture.
    fn texture_filter(&self, texture: TextureId) -> Option<FilterMode>;

    /// Reads back the full texture content as RGBA floats, row-major.
    fn read_texture(&mut self, texture: TextureId) -> Result<Vec<f32>, BackendError>;

    // ── framebuffers ──────────────────────────────────────────────────────

    fn create_framebuffer(&mut self) -> FramebufferId;
    fn delete_framebuffer(&mut self, framebuffer: FramebufferId);
    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferId>)
    -> Result<(), BackendError>;

    /// Attaches `texture` to color `slot` of the bound framebuffer.
    fn framebuffer_texture_2d(&mut self, slot: u32, texture: TextureId)
    -> Result<(), BackendError>;

    /// Selects the active draw buffers of the bound framebuffer.
    fn draw_buffers(&mut self, slots: &[u32]) -> Result<(), BackendError>;

    /// Attachment and draw-buffer state of a framebuffer.
    fn framebuffer_state(&self, framebuffer: FramebufferId) -> Option<&FramebufferState>;

    /// Completeness of the bound framebuffer.
    fn check_framebuffer_status(&self) -> FramebufferStatus {
        let Some(fb) = self.bindings().framebuffer else {
            return FramebufferStatus::NotBound;
        };
        match self.framebuffer_state(fb) {
            Some(state) => state.status(self.limits(), |t| self.texture_size(t)),
            None => FramebufferStatus::NotBound,
        }
    }

    // ── programs & buffers ────────────────────────────────────────────────

    fn create_program(&mut self, source: &ProgramSource<'_>) -> Result<ProgramId, BackendError>;
    fn delete_program(&mut self, program: ProgramId);
    fn program_interface(&self, program: ProgramId) -> Option<&ProgramInterface>;

    fn create_vertex_buffer(&mut self, data: &[f32]) -> Result<BufferId, BackendError>;
    fn create_index_buffer(&mut self, data: &[u32]) -> Result<BufferId, BackendError>;
    fn delete_buffer(&mut self, buffer: BufferId);

    // ── execution ─────────────────────────────────────────────────────────

    /// Issues a draw into the bound framebuffer.
    fn draw(&mut self, call: &DrawCall<'_>) -> Result<(), BackendError>;

    /// Blocks until every submitted draw has completed.
    fn finish(&mut self) -> Result<(), BackendError>;
}

impl<B: Backend + ?Sized> Backend for &mut B {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn limits(&self) -> BackendLimits {
        (**self).limits()
    }

    fn bindings(&self) -> Bindings {
        (**self).bindings()
    }

    fn create_texture(&mut self) -> TextureId {
        (**self).create_texture()
    }

    fn delete_texture(&mut self, texture: TextureId) {
        (**self).delete_texture(texture)
    }

    fn bind_texture(&mut self, texture: Option<TextureId>) -> Result<(), BackendError> {
        (**self).bind_texture(texture)
    }

    fn set_texture_filter(&mut self, filter: FilterMode) -> Result<(), BackendError> {
        (**self).set_texture_filter(filter)
    }

    fn tex_image_2d(
        &mut self,
        width: u32,
        height: u32,
        data: Option<&[f32]>,
    ) -> Result<(), BackendError> {
        (**self).tex_image_2d(width, height, data)
    }

    fn texture_size(&self, texture: TextureId) -> Option<(u32, u32)> {
        (**self).texture_size(texture)
    }

    fn texture_filter(&self, texture: TextureId) -> Option<FilterMode> {
        (**self).texture_filter(texture)
    }

    fn read_texture(&mut self, texture: TextureId) -> Result<Vec<f32>, BackendError> {
        (**self).read_texture(texture)
    }

    fn create_framebuffer(&mut self) -> FramebufferId {
        (**self).create_framebuffer()
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferId) {
        (**self).delete_framebuffer(framebuffer)
    }

    fn bind_framebuffer(
        &mut self,
        framebuffer: Option<FramebufferId>,
    ) -> Result<(), BackendError> {
        (**self).bind_framebuffer(framebuffer)
    }

    fn framebuffer_texture_2d(
        &mut self,
        slot: u32,
        texture: TextureId,
    ) -> Result<(), BackendError> {
        (**self).framebuffer_texture_2d(slot, texture)
    }

    fn draw_buffers(&mut self, slots: &[u32]) -> Result<(), BackendError> {
        (**self).draw_buffers(slots)
    }

    fn framebuffer_state(&self, framebuffer: FramebufferId) -> Option<&FramebufferState> {
        (**self).framebuffer_state(framebuffer)
    }

    fn check_framebuffer_status(&self) -> FramebufferStatus {
        (**self).check_framebuffer_status()
    }

    fn create_program(&mut self, source: &ProgramSource<'_>) -> Result<ProgramId, BackendError> {
        (**self).create_program(source)
    }

    fn delete_program(&mut self, program: ProgramId) {
        (**self).delete_program(program)
    }

    fn program_interface(&self, program: ProgramId) -> Option<&ProgramInterface> {
        (**self).program_interface(program)
    }

    fn create_vertex_buffer(&mut self, data: &[f32]) -> Result<BufferId, BackendError> {
        (**self).create_vertex_buffer(data)
    }

    fn create_index_buffer(&mut self, data: &[u32]) -> Result<BufferId, BackendError> {
        (**self).create_index_buffer(data)
    }

    fn delete_buffer(&mut self, buffer: BufferId) {
        (**self).delete_buffer(buffer)
    }

    fn draw(&mut self, call: &DrawCall<'_>) -> Result<(), BackendError> {
        (**self).draw(call)
    }

    fn finish(&mut self) -> Result<(), BackendError> {
        (**self).finish()
    }
}

/// Validates a draw against the bound framebuffer and returns the slots it
/// writes, keyed by slot, with their textures.
///
/// Shared by both backends so that feedback and draw-buffer rules are
/// identical everywhere.
pub(crate) fn resolve_draw_targets<B: Backend + ?Sized>(
    backend: &B,
    call: &DrawCall<'_>,
    outputs: &[u32],
) -> Result<BTreeMap<u32, TextureId>, BackendError> {
    let fb = backend
        .bindings()
        .framebuffer
        .ok_or(BackendError::NothingBound("framebuffer"))?;
    let state = backend.framebuffer_state(fb).ok_or(fb.unknown())?;

    let status = state.status(backend.limits(), |t| backend.texture_size(t));
    if status != FramebufferStatus::Complete {
        return Err(BackendError::IncompleteTarget(status));
    }

    let mut targets = BTreeMap::new();
    for &slot in outputs {
        if !state.draw_buffers().contains(&slot) {
            return Err(BackendError::OutputNotDrawn { slot });
        }
        let texture = state
            .attachment(slot)
            .ok_or(BackendError::OutputNotDrawn { slot })?;
        targets.insert(slot, texture);
    }

    for sampled in call.sampled_textures() {
        if targets.values().any(|&t| t == sampled) {
            return Err(BackendError::FeedbackLoop(sampled));
        }
    }

    Ok(targets)
}

impl fmt::Display for ParamLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamLocation::Texture { group, binding } => {
                write!(f, "texture @group({group}) @binding({binding})")
            }
            ParamLocation::Uniform {
                group,
                binding,
                size,
            } => write!(f, "uniform @group({group}) @binding({binding}) [{size}B]"),
            ParamLocation::Attribute { location } => write!(f, "attribute @location({location})"),
        }
    }
}
