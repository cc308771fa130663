//! CPU emulation of the [`Backend`] surface.
//!
//! Programs are reflected from the same WGSL the GPU backend compiles, so
//! parameter resolution (including unused parameters) is identical. Draws are
//! executed by the CPU kernels in [`kernels`], selected by the program's stage.
//! Results are deterministic: the same inputs always produce the same bits.

mod kernels;

use std::collections::HashMap;

use super::{
    Backend, BackendLimits, Bindings, BufferId, DrawCall, FilterMode, FramebufferId,
    FramebufferState, HandleAllocator, ProgramId, ProgramInterface, ProgramSource,
    TEXEL_COMPONENTS, TextureId, resolve_draw_targets,
};
use crate::error::BackendError;
use crate::stages::StageKind;

use kernels::{Inputs, Target};

#[derive(Debug, Clone)]
struct Image {
    width: u32,
    height: u32,
    data: Vec<f32>,
}

#[derive(Debug, Clone)]
struct SoftTexture {
    filter: FilterMode,
    image: Option<Image>,
}

#[derive(Debug)]
struct SoftProgram {
    kind: StageKind,
    interface: ProgramInterface,
}

#[derive(Debug, Clone)]
enum SoftBuffer {
    Vertex(Vec<f32>),
    Index(Vec<u32>),
}

/// Deterministic CPU backend.
#[derive(Debug, Default)]
pub struct SoftwareBackend {
    limits: BackendLimits,
    ids: HandleAllocator,
    bindings: Bindings,
    textures: HashMap<TextureId, SoftTexture>,
    framebuffers: HashMap<FramebufferId, FramebufferState>,
    programs: HashMap<ProgramId, SoftProgram>,
    buffers: HashMap<BufferId, SoftBuffer>,
    draws: u64,
}

impl SoftwareBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend reporting custom limits, e.g. fewer color attachments.
    pub fn with_limits(limits: BackendLimits) -> Self {
        Self {
            limits,
            ..Self::default()
        }
    }

    /// Textures, framebuffers, programs and buffers currently alive.
    pub fn live_resources(&self) -> usize {
        self.textures.len() + self.framebuffers.len() + self.programs.len() + self.buffers.len()
    }

    /// Draw calls executed so far.
    pub fn draw_count(&self) -> u64 {
        self.draws
    }

    fn bound_texture_mut(&mut self) -> Result<&mut SoftTexture, BackendError> {
        let id = self
            .bindings
            .texture
            .ok_or(BackendError::NothingBound("texture"))?;
        self.textures.get_mut(&id).ok_or(id.unknown())
    }

    fn bound_framebuffer_mut(&mut self) -> Result<&mut FramebufferState, BackendError> {
        let id = self
            .bindings
            .framebuffer
            .ok_or(BackendError::NothingBound("framebuffer"))?;
        self.framebuffers.get_mut(&id).ok_or(id.unknown())
    }

    fn vertex_data(&self, buffer: BufferId) -> Result<&[f32], BackendError> {
        match self.buffers.get(&buffer) {
            Some(SoftBuffer::Vertex(data)) => Ok(data),
            _ => Err(buffer.unknown()),
        }
    }

    fn index_data(&self, buffer: BufferId) -> Result<&[u32], BackendError> {
        match self.buffers.get(&buffer) {
            Some(SoftBuffer::Index(data)) => Ok(data),
            _ => Err(buffer.unknown()),
        }
    }
}

impl Backend for SoftwareBackend {
    fn name(&self) -> &'static str {
        "software"
    }

    fn limits(&self) -> BackendLimits {
        self.limits
    }

    fn bindings(&self) -> Bindings {
        self.bindings
    }

    // ── textures ──────────────────────────────────────────────────────────

    fn create_texture(&mut self) -> TextureId {
        let id = self.ids.texture();
        self.textures.insert(
            id,
            SoftTexture {
                filter: FilterMode::Linear,
                image: None,
            },
        );
        id
    }

    fn delete_texture(&mut self, texture: TextureId) {
        if self.textures.remove(&texture).is_none() {
            return;
        }
        if self.bindings.texture == Some(texture) {
            self.bindings.texture = None;
        }
        for fb in self.framebuffers.values_mut() {
            fb.detach_texture(texture);
        }
    }

    fn bind_texture(&mut self, texture: Option<TextureId>) -> Result<(), BackendError> {
        if let Some(id) = texture {
            if !self.textures.contains_key(&id) {
                return Err(id.unknown());
            }
        }
        self.bindings.texture = texture;
        Ok(())
    }

    fn set_texture_filter(&mut self, filter: FilterMode) -> Result<(), BackendError> {
        self.bound_texture_mut()?.filter = filter;
        Ok(())
    }

    fn tex_image_2d(
        &mut self,
        width: u32,
        height: u32,
        data: Option<&[f32]>,
    ) -> Result<(), BackendError> {
        let max = self.limits.max_texture_side;
        if width > max || height > max {
            return Err(BackendError::Unsupported("texture larger than max_texture_side"));
        }
        let expected = width as usize * height as usize * TEXEL_COMPONENTS;
        let data = match data {
            Some(d) if d.len() != expected => {
                return Err(BackendError::UploadLength {
                    expected,
                    actual: d.len(),
                });
            }
            Some(d) => d.to_vec(),
            None => vec![0.0; expected],
        };
        self.bound_texture_mut()?.image = Some(Image {
            width,
            height,
            data,
        });
        Ok(())
    }

    fn texture_size(&self, texture: TextureId) -> Option<(u32, u32)> {
        let image = self.textures.get(&texture)?.image.as_ref()?;
        Some((image.width, image.height))
    }

    fn texture_filter(&self, texture: TextureId) -> Option<FilterMode> {
        self.textures.get(&texture).map(|t| t.filter)
    }

    fn read_texture(&mut self, texture: TextureId) -> Result<Vec<f32>, BackendError> {
        let tex = self.textures.get(&texture).ok_or(texture.unknown())?;
        tex.image
            .as_ref()
            .map(|i| i.data.clone())
            .ok_or(BackendError::Unallocated(texture))
    }

    // ── framebuffers ──────────────────────────────────────────────────────

    fn create_framebuffer(&mut self) -> FramebufferId {
        let id = self.ids.framebuffer();
        self.framebuffers.insert(id, FramebufferState::default());
        id
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferId) {
        if self.framebuffers.remove(&framebuffer).is_some()
            && self.bindings.framebuffer == Some(framebuffer)
        {
            self.bindings.framebuffer = None;
        }
    }

    fn bind_framebuffer(
        &mut self,
        framebuffer: Option<FramebufferId>,
    ) -> Result<(), BackendError> {
        if let Some(id) = framebuffer {
            if !self.framebuffers.contains_key(&id) {
                return Err(id.unknown());
            }
        }
        self.bindings.framebuffer = framebuffer;
        Ok(())
    }

    fn framebuffer_texture_2d(
        &mut self,
        slot: u32,
        texture: TextureId,
    ) -> Result<(), BackendError> {
        let max = self.limits.max_color_attachments;
        if slot >= super::MAX_COLOR_SLOTS {
            return Err(BackendError::SlotOutOfRange { slot, max });
        }
        if !self.textures.contains_key(&texture) {
            return Err(texture.unknown());
        }
        // Slots past the backend limit are accepted here and reported by the
        // completeness check, as GL does.
        self.bound_framebuffer_mut()?.attach(slot, texture);
        Ok(())
    }

    fn draw_buffers(&mut self, slots: &[u32]) -> Result<(), BackendError> {
        let max = self.limits.max_color_attachments;
        if let Some(&slot) = slots.iter().find(|&&s| s >= super::MAX_COLOR_SLOTS) {
            return Err(BackendError::SlotOutOfRange { slot, max });
        }
        self.bound_framebuffer_mut()?.set_draw_buffers(slots);
        Ok(())
    }

    fn framebuffer_state(&self, framebuffer: FramebufferId) -> Option<&FramebufferState> {
        self.framebuffers.get(&framebuffer)
    }

    // ── programs & buffers ────────────────────────────────────────────────

    fn create_program(&mut self, source: &ProgramSource<'_>) -> Result<ProgramId, BackendError> {
        let interface =
            ProgramInterface::from_wgsl(source.kind.as_str(), source.vertex, source.fragment)?;
        let id = self.ids.program();
        self.programs.insert(
            id,
            SoftProgram {
                kind: source.kind,
                interface,
            },
        );
        Ok(id)
    }

    fn delete_program(&mut self, program: ProgramId) {
        self.programs.remove(&program);
    }

    fn program_interface(&self, program: ProgramId) -> Option<&ProgramInterface> {
        self.programs.get(&program).map(|p| &p.interface)
    }

    fn create_vertex_buffer(&mut self, data: &[f32]) -> Result<BufferId, BackendError> {
        let id = self.ids.buffer();
        self.buffers.insert(id, SoftBuffer::Vertex(data.to_vec()));
        Ok(id)
    }

    fn create_index_buffer(&mut self, data: &[u32]) -> Result<BufferId, BackendError> {
        let id = self.ids.buffer();
        self.buffers.insert(id, SoftBuffer::Index(data.to_vec()));
        Ok(id)
    }

    fn delete_buffer(&mut self, buffer: BufferId) {
        self.buffers.remove(&buffer);
    }

    // ── execution ─────────────────────────────────────────────────────────

    fn draw(&mut self, call: &DrawCall<'_>) -> Result<(), BackendError> {
        let program = self
            .programs
            .get(&call.program)
            .ok_or(call.program.unknown())?;
        let targets = resolve_draw_targets(self, call, program.interface.outputs())?;

        let mut images = Vec::with_capacity(targets.len());
        for (&slot, &texture) in &targets {
            let image = self
                .textures
                .get(&texture)
                .and_then(|t| t.image.as_ref())
                .ok_or(BackendError::Unallocated(texture))?;
            let data = match call.clear {
                Some(color) => color.repeat(image.data.len() / TEXEL_COMPONENTS),
                None => image.data.clone(),
            };
            images.push(Target {
                slot,
                width: image.width,
                height: image.height,
                data,
            });
        }

        let mut inputs = Inputs::default();
        for binding in call.params {
            let Some(name) = program.interface.name_of(binding.location) else {
                continue;
            };
            inputs.set(name, binding.value);
        }

        let textures = &self.textures;
        let sample = |t: TextureId| {
            textures
                .get(&t)
                .and_then(|t| t.image.as_ref())
                .map(|i| kernels::View {
                    width: i.width,
                    height: i.height,
                    data: &i.data,
                })
        };

        log::trace!("software draw `{}` ({}) -> {} targets", call.label, program.kind, images.len());
        match (program.kind, call.geometry) {
            (kind, super::Geometry::FullScreenQuad) if kind.is_full_screen() => {
                kernels::full_screen(kind, &inputs, &sample, &mut images)?;
            }
            (StageKind::Particle, super::Geometry::Instances { buffer, count }) => {
                let indices = self.vertex_data(buffer)?;
                let count = (count as usize).min(indices.len());
                kernels::particles(&inputs, &sample, &indices[..count], &mut images)?;
            }
            (
                StageKind::Ambient,
                super::Geometry::Mesh {
                    vertices,
                    indices,
                    index_count,
                },
            ) => {
                let vertices = self.vertex_data(vertices)?;
                let indices = self.index_data(indices)?;
                let count = (index_count as usize).min(indices.len());
                kernels::mesh(&inputs, vertices, &indices[..count], &mut images)?;
            }
            _ => return Err(BackendError::Unsupported("geometry for this program")),
        }

        for image in images {
            if let Some(Image { data, .. }) = targets
                .get(&image.slot)
                .and_then(|t| self.textures.get_mut(t))
                .and_then(|t| t.image.as_mut())
            {
                *data = image.data;
            }
        }
        self.draws += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), BackendError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Geometry, ParamBinding, ParamValue};
    use crate::stages::EmbeddedShaders;

    fn texture_with(gpu: &mut SoftwareBackend, side: u32, data: &[f32]) -> TextureId {
        let t = gpu.create_texture();
        gpu.bind_texture(Some(t)).unwrap();
        gpu.tex_image_2d(side, side, Some(data)).unwrap();
        gpu.bind_texture(None).unwrap();
        t
    }

    fn program(gpu: &mut SoftwareBackend, kind: StageKind) -> ProgramId {
        let (vertex, fragment) = EmbeddedShaders::sources(kind);
        gpu.create_program(&ProgramSource {
            kind,
            vertex,
            fragment,
        })
        .unwrap()
    }

    fn bind(gpu: &SoftwareBackend, program: ProgramId, name: &str, value: ParamValue) -> ParamBinding {
        ParamBinding {
            location: gpu.program_interface(program).unwrap().location(name).unwrap(),
            value,
        }
    }

    // ── textures ──────────────────────────────────────────────────────────

    #[test]
    fn upload_then_read_back() {
        let mut gpu = SoftwareBackend::new();
        let data: Vec<f32> = (0..16).map(|i| i as f32).collect();
        let t = texture_with(&mut gpu, 2, &data);
        assert_eq!(gpu.read_texture(t).unwrap(), data);
        assert_eq!(gpu.texture_size(t), Some((2, 2)));
    }

    #[test]
    fn wrong_upload_length_is_rejected() {
        let mut gpu = SoftwareBackend::new();
        let t = gpu.create_texture();
        gpu.bind_texture(Some(t)).unwrap();
        let err = gpu.tex_image_2d(2, 2, Some(&[0.0; 3])).unwrap_err();
        assert!(matches!(err, BackendError::UploadLength { expected: 16, actual: 3 }));
        assert_eq!(gpu.texture_size(t), None);
    }

    #[test]
    fn deleting_bound_texture_unbinds_and_detaches() {
        let mut gpu = SoftwareBackend::new();
        let t = texture_with(&mut gpu, 1, &[0.0; 4]);
        let fb = gpu.create_framebuffer();
        gpu.bind_framebuffer(Some(fb)).unwrap();
        gpu.framebuffer_texture_2d(0, t).unwrap();
        gpu.bind_texture(Some(t)).unwrap();
        gpu.delete_texture(t);
        assert_eq!(gpu.bindings().texture, None);
        assert_eq!(gpu.framebuffer_state(fb).unwrap().attachment(0), None);
    }

    // ── draws ─────────────────────────────────────────────────────────────

    #[test]
    fn euler_kernel_integrates_one_step() {
        let mut gpu = SoftwareBackend::new();
        let pos = texture_with(&mut gpu, 1, &[0.0, 1.0, 0.0, 1.0]);
        let vel = texture_with(&mut gpu, 1, &[1.0, 0.0, 0.0, 1.0]);
        let force = texture_with(&mut gpu, 1, &[0.0, -10.0, 0.0, 1.0]);
        let out_pos = texture_with(&mut gpu, 1, &[0.0; 4]);
        let out_vel = texture_with(&mut gpu, 1, &[0.0; 4]);

        let fb = gpu.create_framebuffer();
        gpu.bind_framebuffer(Some(fb)).unwrap();
        gpu.framebuffer_texture_2d(0, out_pos).unwrap();
        gpu.framebuffer_texture_2d(1, out_vel).unwrap();
        gpu.draw_buffers(&[0, 1]).unwrap();

        let euler = program(&mut gpu, StageKind::Euler);
        let params = [
            bind(&gpu, euler, "posTex", ParamValue::Texture(pos)),
            bind(&gpu, euler, "velTex", ParamValue::Texture(vel)),
            bind(&gpu, euler, "forceTex", ParamValue::Texture(force)),
            bind(&gpu, euler, "dt", ParamValue::Float(0.5)),
        ];
        gpu.draw(&DrawCall {
            label: "euler",
            program: euler,
            params: &params,
            geometry: Geometry::FullScreenQuad,
            clear: None,
        })
        .unwrap();

        assert_eq!(gpu.read_texture(out_pos).unwrap(), vec![0.5, 1.0, 0.0, 1.0]);
        assert_eq!(gpu.read_texture(out_vel).unwrap(), vec![1.0, -5.0, 0.0, 1.0]);
        assert_eq!(gpu.draw_count(), 1);
    }

    #[test]
    fn sampling_a_target_is_a_feedback_loop() {
        let mut gpu = SoftwareBackend::new();
        let pos = texture_with(&mut gpu, 1, &[0.0; 4]);
        let vel = texture_with(&mut gpu, 1, &[0.0; 4]);
        let fb = gpu.create_framebuffer();
        gpu.bind_framebuffer(Some(fb)).unwrap();
        gpu.framebuffer_texture_2d(0, pos).unwrap();
        gpu.framebuffer_texture_2d(1, vel).unwrap();
        gpu.draw_buffers(&[0, 1]).unwrap();

        let euler = program(&mut gpu, StageKind::Euler);
        let params = [bind(&gpu, euler, "posTex", ParamValue::Texture(pos))];
        let err = gpu
            .draw(&DrawCall {
                label: "euler",
                program: euler,
                params: &params,
                geometry: Geometry::FullScreenQuad,
                clear: None,
            })
            .unwrap_err();
        assert!(matches!(err, BackendError::FeedbackLoop(t) if t == pos));
    }

    #[test]
    fn draw_without_framebuffer_fails() {
        let mut gpu = SoftwareBackend::new();
        let euler = program(&mut gpu, StageKind::Euler);
        let err = gpu
            .draw(&DrawCall {
                label: "euler",
                program: euler,
                params: &[],
                geometry: Geometry::FullScreenQuad,
                clear: None,
            })
            .unwrap_err();
        assert!(matches!(err, BackendError::NothingBound("framebuffer")));
    }

    #[test]
    fn live_resources_tracks_every_kind() {
        let mut gpu = SoftwareBackend::new();
        let t = gpu.create_texture();
        let fb = gpu.create_framebuffer();
        let b = gpu.create_vertex_buffer(&[0.0]).unwrap();
        let p = program(&mut gpu, StageKind::Debug);
        assert_eq!(gpu.live_resources(), 4);
        gpu.delete_texture(t);
        gpu.delete_framebuffer(fb);
        gpu.delete_buffer(b);
        gpu.delete_program(p);
        assert_eq!(gpu.live_resources(), 0);
    }
}
