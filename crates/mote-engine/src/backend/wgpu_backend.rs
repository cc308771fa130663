//! GPU execution of the [`Backend`] surface through wgpu.
//!
//! Textures are RGBA32F and read with `textureLoad`, so no samplers are
//! involved. Each program owns a pipeline whose color targets mirror its
//! fragment outputs, plus one uniform buffer per resolved uniform. Every draw
//! is recorded into its own encoder and submitted immediately, which keeps
//! pass ordering strict: a later pass always observes an earlier pass's
//! writes.

use std::collections::{BTreeMap, HashMap};
use std::sync::mpsc;

use bytemuck::{Pod, Zeroable};
use wgpu::util::DeviceExt;

use super::{
    Backend, BackendLimits, Bindings, BufferId, DrawCall, FilterMode, FramebufferId,
    FramebufferState, Geometry, HandleAllocator, MAX_COLOR_SLOTS, ParamLocation, ParamValue,
    ProgramId, ProgramInterface, ProgramSource, TEXEL_COMPONENTS, TextureId, VertexStep,
    resolve_draw_targets,
};
use crate::device::{Gpu, GpuInit};
use crate::error::BackendError;
use crate::stages::StageKind;

const TEXTURE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba32Float;
const BYTES_PER_TEXEL: u32 = (TEXEL_COMPONENTS * std::mem::size_of::<f32>()) as u32;

// ── full-screen quad ──────────────────────────────────────────────────────

#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
struct QuadVertex {
    position: [f32; 2], // NDC
}

const QUAD_VERTICES: [QuadVertex; 4] = [
    QuadVertex { position: [-1.0, -1.0] },
    QuadVertex { position: [1.0, -1.0] },
    QuadVertex { position: [1.0, 1.0] },
    QuadVertex { position: [-1.0, 1.0] },
];

const QUAD_INDICES: [u16; 6] = [0, 1, 2, 0, 2, 3];

/// Vertices per particle billboard.
const BILLBOARD_VERTICES: u32 = 6;

// ── resources ─────────────────────────────────────────────────────────────

struct Storage {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    width: u32,
    height: u32,
}

struct GpuTexture {
    filter: FilterMode,
    storage: Option<Storage>,
}

struct GpuProgram {
    kind: StageKind,
    interface: ProgramInterface,
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    /// One buffer per resolved uniform, keyed by binding.
    uniforms: BTreeMap<u32, wgpu::Buffer>,
}

enum GpuBuffer {
    Vertex(wgpu::Buffer),
    Index(wgpu::Buffer),
}

/// Backend executing on a wgpu device.
pub struct WgpuBackend {
    gpu: Gpu,
    limits: BackendLimits,
    ids: HandleAllocator,
    bindings: Bindings,
    textures: HashMap<TextureId, GpuTexture>,
    framebuffers: HashMap<FramebufferId, FramebufferState>,
    programs: HashMap<ProgramId, GpuProgram>,
    buffers: HashMap<BufferId, GpuBuffer>,
    quad_vbo: wgpu::Buffer,
    quad_ibo: wgpu::Buffer,
}

impl WgpuBackend {
    /// Requests a headless device and wraps it.
    pub async fn new_headless(init: GpuInit) -> anyhow::Result<Self> {
        let gpu = Gpu::new_headless(init).await?;
        Ok(Self::new(gpu))
    }

    pub fn new(gpu: Gpu) -> Self {
        let device_limits = gpu.device().limits();
        let limits = BackendLimits {
            max_texture_side: device_limits.max_texture_dimension_2d,
            max_color_attachments: device_limits.max_color_attachments.min(MAX_COLOR_SLOTS),
        };

        let quad_vbo = gpu
            .device()
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("mote quad vbo"),
                contents: bytemuck::cast_slice(&QUAD_VERTICES),
                usage: wgpu::BufferUsages::VERTEX,
            });
        let quad_ibo = gpu
            .device()
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("mote quad ibo"),
                contents: bytemuck::cast_slice(&QUAD_INDICES),
                usage: wgpu::BufferUsages::INDEX,
            });

        Self {
            gpu,
            limits,
            ids: HandleAllocator::default(),
            bindings: Bindings::default(),
            textures: HashMap::new(),
            framebuffers: HashMap::new(),
            programs: HashMap::new(),
            buffers: HashMap::new(),
            quad_vbo,
            quad_ibo,
        }
    }

    pub fn gpu(&self) -> &Gpu {
        &self.gpu
    }

    fn bound_texture_mut(&mut self) -> Result<(TextureId, &mut GpuTexture), BackendError> {
        let id = self
            .bindings
            .texture
            .ok_or(BackendError::NothingBound("texture"))?;
        let texture = self.textures.get_mut(&id).ok_or(id.unknown())?;
        Ok((id, texture))
    }

    fn bound_framebuffer_mut(&mut self) -> Result<&mut FramebufferState, BackendError> {
        let id = self
            .bindings
            .framebuffer
            .ok_or(BackendError::NothingBound("framebuffer"))?;
        self.framebuffers.get_mut(&id).ok_or(id.unknown())
    }

    fn view(&self, texture: TextureId) -> Result<&wgpu::TextureView, BackendError> {
        self.textures
            .get(&texture)
            .ok_or(texture.unknown())?
            .storage
            .as_ref()
            .map(|s| &s.view)
            .ok_or(BackendError::Unallocated(texture))
    }

    fn build_pipeline(
        &self,
        source: &ProgramSource<'_>,
        interface: &ProgramInterface,
    ) -> (wgpu::RenderPipeline, wgpu::BindGroupLayout) {
        let device = self.gpu.device();
        let label = source.kind.as_str();

        let vertex_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(label),
            source: wgpu::ShaderSource::Wgsl(source.vertex.into()),
        });
        let fragment_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(label),
            source: wgpu::ShaderSource::Wgsl(source.fragment.into()),
        });

        let entries: Vec<wgpu::BindGroupLayoutEntry> = interface
            .resource_bindings()
            .into_iter()
            .filter_map(|location| {
                let (binding, ty) = match location {
                    ParamLocation::Texture { binding, .. } => (
                        binding,
                        wgpu::BindingType::Texture {
                            sample_type: wgpu::TextureSampleType::Float { filterable: false },
                            view_dimension: wgpu::TextureViewDimension::D2,
                            multisampled: false,
                        },
                    ),
                    ParamLocation::Uniform { binding, .. } => (
                        binding,
                        wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Uniform,
                            has_dynamic_offset: false,
                            min_binding_size: None,
                        },
                    ),
                    ParamLocation::Attribute { .. } => return None,
                };
                Some(wgpu::BindGroupLayoutEntry {
                    binding,
                    visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                    ty,
                    count: None,
                })
            })
            .collect();

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(label),
            entries: &entries,
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(label),
            bind_group_layouts: &[&bind_group_layout],
            immediate_size: 0,
        });

        // Only attributes the vertex shader consumes go into the layout.
        let layout = source.kind.vertex_layout();
        let attributes: Vec<wgpu::VertexAttribute> = layout
            .attributes
            .iter()
            .filter_map(|attr| match interface.location(attr.name) {
                Some(ParamLocation::Attribute { location }) => Some(wgpu::VertexAttribute {
                    format: match attr.components {
                        1 => wgpu::VertexFormat::Float32,
                        2 => wgpu::VertexFormat::Float32x2,
                        3 => wgpu::VertexFormat::Float32x3,
                        _ => wgpu::VertexFormat::Float32x4,
                    },
                    offset: u64::from(attr.offset),
                    shader_location: location,
                }),
                _ => None,
            })
            .collect();
        let vertex_buffers = [wgpu::VertexBufferLayout {
            array_stride: u64::from(layout.stride),
            step_mode: match layout.step {
                VertexStep::PerVertex => wgpu::VertexStepMode::Vertex,
                VertexStep::PerInstance => wgpu::VertexStepMode::Instance,
            },
            attributes: &attributes,
        }];

        // Sparse: slots the program does not write stay `None`.
        let last = interface.outputs().last().copied().unwrap_or(0);
        let targets: Vec<Option<wgpu::ColorTargetState>> = (0..=last)
            .map(|slot| {
                interface
                    .outputs()
                    .contains(&slot)
                    .then_some(wgpu::ColorTargetState {
                        format: TEXTURE_FORMAT,
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    })
            })
            .collect();

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(label),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &vertex_module,
                entry_point: Some("vs_main"),
                compilation_options: Default::default(),
                buffers: &vertex_buffers,
            },
            fragment: Some(wgpu::FragmentState {
                module: &fragment_module,
                entry_point: Some("fs_main"),
                compilation_options: Default::default(),
                targets: &targets,
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                cull_mode: None,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview_mask: None,
            cache: None,
        });

        (pipeline, bind_group_layout)
    }
}

impl Backend for WgpuBackend {
    fn name(&self) -> &'static str {
        "wgpu"
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
            GpuTexture {
                filter: FilterMode::Linear,
                storage: None,
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
        // Recorded for inspection; texel fetches ignore filtering.
        self.bound_texture_mut()?.1.filter = filter;
        Ok(())
    }

    fn tex_image_2d(
        &mut self,
        width: u32,
        height: u32,
        data: Option<&[f32]>,
    ) -> Result<(), BackendError> {
        let max = self.limits.max_texture_side;
        if width == 0 || height == 0 || width > max || height > max {
            return Err(BackendError::Unsupported("texture size outside device limits"));
        }
        let expected = width as usize * height as usize * TEXEL_COMPONENTS;
        if let Some(d) = data {
            if d.len() != expected {
                return Err(BackendError::UploadLength {
                    expected,
                    actual: d.len(),
                });
            }
        }

        let (id, _) = self.bound_texture_mut()?;
        let size = wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        };
        let texture = self.gpu.device().create_texture(&wgpu::TextureDescriptor {
            label: Some("mote state texture"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TEXTURE_FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });

        // wgpu zero-initializes storage, so `None` needs no upload.
        if let Some(d) = data {
            self.gpu.queue().write_texture(
                wgpu::TexelCopyTextureInfo {
                    texture: &texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                bytemuck::cast_slice(d),
                wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(width * BYTES_PER_TEXEL),
                    rows_per_image: Some(height),
                },
                size,
            );
        }

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        log::trace!("texture {id:?}: {width}x{height} allocated");
        self.bound_texture_mut()?.1.storage = Some(Storage {
            texture,
            view,
            width,
            height,
        });
        Ok(())
    }

    fn texture_size(&self, texture: TextureId) -> Option<(u32, u32)> {
        let storage = self.textures.get(&texture)?.storage.as_ref()?;
        Some((storage.width, storage.height))
    }

    fn texture_filter(&self, texture: TextureId) -> Option<FilterMode> {
        self.textures.get(&texture).map(|t| t.filter)
    }

    fn read_texture(&mut self, texture: TextureId) -> Result<Vec<f32>, BackendError> {
        let storage = self
            .textures
            .get(&texture)
            .ok_or(texture.unknown())?
            .storage
            .as_ref()
            .ok_or(BackendError::Unallocated(texture))?;
        let (width, height) = (storage.width, storage.height);

        // Rows in the staging buffer must be COPY_BYTES_PER_ROW_ALIGNMENT aligned.
        let unpadded_bytes_per_row = width * BYTES_PER_TEXEL;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded_bytes_per_row = unpadded_bytes_per_row.div_ceil(align) * align;

        let device = self.gpu.device();
        let staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("mote readback"),
            size: u64::from(padded_bytes_per_row) * u64::from(height),
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("mote readback encoder"),
        });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &storage.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_bytes_per_row),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.gpu.queue().submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.gpu
            .wait_idle()
            .map_err(|e| BackendError::Readback(format!("{e:#}")))?;
        rx.recv()
            .map_err(|e| BackendError::Readback(e.to_string()))?
            .map_err(|e| BackendError::Readback(e.to_string()))?;

        let mut texels = Vec::with_capacity(width as usize * height as usize * TEXEL_COMPONENTS);
        {
            let data = slice.get_mapped_range();
            for y in 0..height {
                let start = (y * padded_bytes_per_row) as usize;
                let end = start + unpadded_bytes_per_row as usize;
                texels.extend_from_slice(bytemuck::cast_slice(&data[start..end]));
            }
        }
        staging.unmap();
        Ok(texels)
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
        if slot >= MAX_COLOR_SLOTS {
            return Err(BackendError::SlotOutOfRange {
                slot,
                max: self.limits.max_color_attachments,
            });
        }
        if !self.textures.contains_key(&texture) {
            return Err(texture.unknown());
        }
        self.bound_framebuffer_mut()?.attach(slot, texture);
        Ok(())
    }

    fn draw_buffers(&mut self, slots: &[u32]) -> Result<(), BackendError> {
        if let Some(&slot) = slots.iter().find(|&&s| s >= MAX_COLOR_SLOTS) {
            return Err(BackendError::SlotOutOfRange {
                slot,
                max: self.limits.max_color_attachments,
            });
        }
        self.bound_framebuffer_mut()?.set_draw_buffers(slots);
        Ok(())
    }

    fn framebuffer_state(&self, framebuffer: FramebufferId) -> Option<&FramebufferState> {
        self.framebuffers.get(&framebuffer)
    }

    // ── programs & buffers ────────────────────────────────────────────────

    fn create_program(&mut self, source: &ProgramSource<'_>) -> Result<ProgramId, BackendError> {
        // naga validation up front, so wgpu never sees an invalid module.
        let interface =
            ProgramInterface::from_wgsl(source.kind.as_str(), source.vertex, source.fragment)?;
        let (pipeline, bind_group_layout) = self.build_pipeline(source, &interface);

        let uniforms = interface
            .resource_bindings()
            .into_iter()
            .filter_map(|location| match location {
                ParamLocation::Uniform { binding, size, .. } => Some((
                    binding,
                    self.gpu.device().create_buffer(&wgpu::BufferDescriptor {
                        label: Some("mote uniform"),
                        size: u64::from(size),
                        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                        mapped_at_creation: false,
                    }),
                )),
                _ => None,
            })
            .collect();

        let id = self.ids.program();
        self.programs.insert(
            id,
            GpuProgram {
                kind: source.kind,
                interface,
                pipeline,
                bind_group_layout,
                uniforms,
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
        if data.is_empty() {
            return Err(BackendError::Unsupported("empty vertex buffer"));
        }
        let buffer = self
            .gpu
            .device()
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("mote vertex buffer"),
                contents: bytemuck::cast_slice(data),
                usage: wgpu::BufferUsages::VERTEX,
            });
        let id = self.ids.buffer();
        self.buffers.insert(id, GpuBuffer::Vertex(buffer));
        Ok(id)
    }

    fn create_index_buffer(&mut self, data: &[u32]) -> Result<BufferId, BackendError> {
        if data.is_empty() {
            return Err(BackendError::Unsupported("empty index buffer"));
        }
        let buffer = self
            .gpu
            .device()
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("mote index buffer"),
                contents: bytemuck::cast_slice(data),
                usage: wgpu::BufferUsages::INDEX,
            });
        let id = self.ids.buffer();
        self.buffers.insert(id, GpuBuffer::Index(buffer));
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
        let queue = self.gpu.queue();

        // Uniform writes are ordered before the submit below.
        for (&binding, buffer) in &program.uniforms {
            let value = call.params.iter().find(|p| {
                matches!(p.location, ParamLocation::Uniform { binding: b, .. } if b == binding)
            });
            let mut bytes = value.map(|p| p.value.uniform_bytes()).unwrap_or_default();
            bytes.resize(buffer.size() as usize, 0);
            queue.write_buffer(buffer, 0, &bytes);
        }

        let mut entries = Vec::new();
        for location in program.interface.resource_bindings() {
            match location {
                ParamLocation::Texture { binding, .. } => {
                    let texture = call
                        .params
                        .iter()
                        .find_map(|p| match (p.location, p.value) {
                            (ParamLocation::Texture { binding: b, .. }, ParamValue::Texture(t))
                                if b == binding =>
                            {
                                Some(t)
                            }
                            _ => None,
                        })
                        .ok_or(BackendError::NothingBound("texture parameter"))?;
                    entries.push(wgpu::BindGroupEntry {
                        binding,
                        resource: wgpu::BindingResource::TextureView(self.view(texture)?),
                    });
                }
                ParamLocation::Uniform { binding, .. } => {
                    if let Some(buffer) = program.uniforms.get(&binding) {
                        entries.push(wgpu::BindGroupEntry {
                            binding,
                            resource: buffer.as_entire_binding(),
                        });
                    }
                }
                ParamLocation::Attribute { .. } => {}
            }
        }

        let device = self.gpu.device();
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(call.label),
            layout: &program.bind_group_layout,
            entries: &entries,
        });

        let load = match call.clear {
            Some([r, g, b, a]) => wgpu::LoadOp::Clear(wgpu::Color {
                r: f64::from(r),
                g: f64::from(g),
                b: f64::from(b),
                a: f64::from(a),
            }),
            None => wgpu::LoadOp::Load,
        };
        let last = targets.keys().next_back().copied().unwrap_or(0);
        let mut color_attachments = Vec::with_capacity(last as usize + 1);
        for slot in 0..=last {
            let attachment = match targets.get(&slot) {
                Some(&texture) => Some(wgpu::RenderPassColorAttachment {
                    view: self.view(texture)?,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load,
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                }),
                None => None,
            };
            color_attachments.push(attachment);
        }

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some(call.label),
        });
        {
            let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some(call.label),
                color_attachments: &color_attachments,
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });
            rpass.set_pipeline(&program.pipeline);
            rpass.set_bind_group(0, &bind_group, &[]);

            match call.geometry {
                Geometry::FullScreenQuad => {
                    rpass.set_vertex_buffer(0, self.quad_vbo.slice(..));
                    rpass.set_index_buffer(self.quad_ibo.slice(..), wgpu::IndexFormat::Uint16);
                    rpass.draw_indexed(0..QUAD_INDICES.len() as u32, 0, 0..1);
                }
                Geometry::Instances { buffer, count } => {
                    let Some(GpuBuffer::Vertex(vbo)) = self.buffers.get(&buffer) else {
                        return Err(buffer.unknown());
                    };
                    rpass.set_vertex_buffer(0, vbo.slice(..));
                    rpass.draw(0..BILLBOARD_VERTICES, 0..count);
                }
                Geometry::Mesh {
                    vertices,
                    indices,
                    index_count,
                } => {
                    let Some(GpuBuffer::Vertex(vbo)) = self.buffers.get(&vertices) else {
                        return Err(vertices.unknown());
                    };
                    let Some(GpuBuffer::Index(ibo)) = self.buffers.get(&indices) else {
                        return Err(indices.unknown());
                    };
                    rpass.set_vertex_buffer(0, vbo.slice(..));
                    rpass.set_index_buffer(ibo.slice(..), wgpu::IndexFormat::Uint32);
                    rpass.draw_indexed(0..index_count, 0, 0..1);
                }
            }
        }

        log::trace!("wgpu draw `{}` ({})", call.label, program.kind);
        queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    fn finish(&mut self) -> Result<(), BackendError> {
        self.gpu
            .wait_idle()
            .map_err(|e| BackendError::Device(format!("{e:#}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SimulationContext;
    use crate::backend::SoftwareBackend;
    use crate::config::SimulationConfig;
    use crate::error::SimError;
    use crate::render::render_debug;
    use crate::stages::{EmbeddedShaders, StageRegistry};
    use crate::state::{BufferRole, Channel, DisplayTarget, ParticleState, StateBufferSet};

    /// `None` on machines without any adapter; callers return early.
    fn headless() -> Option<WgpuBackend> {
        match pollster::block_on(WgpuBackend::new_headless(GpuInit::default())) {
            Ok(gpu) => Some(gpu),
            Err(err) => {
                eprintln!("skipping wgpu test: {err:#}");
                None
            }
        }
    }

    fn config(exponent: u32) -> SimulationConfig {
        SimulationConfig {
            exponent,
            seed: Some(11),
            ..SimulationConfig::default()
        }
    }

    fn assert_close(label: &str, gpu: &[f32], cpu: &[f32]) {
        assert_eq!(gpu.len(), cpu.len(), "{label}");
        for (i, (g, c)) in gpu.iter().zip(cpu).enumerate() {
            let tolerance = 1e-3 * c.abs().max(1.0);
            assert!((g - c).abs() <= tolerance, "{label}[{i}]: wgpu {g}, software {c}");
        }
    }

    // ── textures ──────────────────────────────────────────────────────────

    #[test]
    fn readback_strips_row_padding() {
        let Some(mut gpu) = headless() else { return };
        // 3 texels per row is 48 bytes, well short of the copy alignment.
        let data: Vec<f32> = (0..3 * 3 * 4).map(|i| i as f32 * 0.5).collect();
        let texture = gpu.create_texture();
        gpu.bind_texture(Some(texture)).unwrap();
        gpu.tex_image_2d(3, 3, Some(&data)).unwrap();
        gpu.bind_texture(None).unwrap();

        assert_eq!(gpu.read_texture(texture).unwrap(), data);
    }

    // ── setup ─────────────────────────────────────────────────────────────

    #[test]
    fn exponent_ten_builds_four_complete_32x32_sets() {
        let Some(mut gpu) = headless() else { return };
        let state = ParticleState::from_config(&config(10)).unwrap();
        let set = StateBufferSet::build(&mut gpu, &state).unwrap();

        for role in BufferRole::ALL {
            let snapshot = *set.snapshot(role);
            let fb = gpu.framebuffer_state(snapshot.framebuffer).unwrap();
            assert_eq!(fb.draw_buffers(), [0, 1, 2]);
            for texture in snapshot.textures() {
                assert_eq!(gpu.texture_size(texture), Some((32, 32)));
            }
            assert_eq!(set.read_channel(&mut gpu, role, Channel::Position).unwrap(), state.positions());
            assert_eq!(set.read_channel(&mut gpu, role, Channel::Velocity).unwrap(), state.velocities());
            assert_eq!(set.read_channel(&mut gpu, role, Channel::Force).unwrap(), state.forces());
        }
        set.release(&mut gpu);
    }

    // ── execution ─────────────────────────────────────────────────────────

    #[test]
    fn one_step_matches_the_software_backend() {
        let Some(gpu) = headless() else { return };
        let mut on_gpu =
            pollster::block_on(SimulationContext::new(gpu, &config(10), &EmbeddedShaders))
                .unwrap();
        let mut on_cpu = pollster::block_on(SimulationContext::new(
            SoftwareBackend::new(),
            &config(10),
            &EmbeddedShaders,
        ))
        .unwrap();

        on_gpu.step().unwrap();
        on_cpu.step().unwrap();
        assert_eq!(on_gpu.current_role(), on_cpu.current_role());

        for role in BufferRole::ALL {
            for channel in Channel::ALL {
                let label = format!("{role} {channel:?}");
                assert_close(
                    &label,
                    &on_gpu.read_snapshot(role, channel).unwrap(),
                    &on_cpu.read_snapshot(role, channel).unwrap(),
                );
            }
        }
    }

    #[test]
    fn sampling_the_target_is_refused_before_submission() {
        let Some(mut gpu) = headless() else { return };
        let state = ParticleState::from_config(&config(2)).unwrap();
        let stages = pollster::block_on(StageRegistry::load_all(&mut gpu, &EmbeddedShaders)).unwrap();
        let set = StateBufferSet::build(&mut gpu, &state).unwrap();

        let snapshot = *set.snapshot(BufferRole::A);
        let hijacked = DisplayTarget {
            framebuffer: snapshot.framebuffer,
            texture: snapshot.position,
            width: 2,
            height: 2,
        };
        let err = render_debug(&mut gpu, &stages, &set, &snapshot, &hijacked).unwrap_err();
        assert!(matches!(
            err,
            SimError::FeedbackLoop { texture, .. } if texture == snapshot.position
        ));
        assert_eq!(
            set.read_channel(&mut gpu, BufferRole::A, Channel::Position).unwrap(),
            state.positions()
        );

        set.release(&mut gpu);
        stages.release(&mut gpu);
    }
}
