//! Scoped acquisition of bind state and GPU resources.
//!
//! The bound texture and bound framebuffer are process-global. Every component
//! that binds something goes through [`TextureBinding`] / [`FramebufferBinding`],
//! which restore the previous binding when dropped, including on early `?`
//! returns.
//!
//! [`ResourceScope`] records everything created during a multi-step setup and
//! releases it on drop unless [`ResourceScope::commit`] was called.

use std::ops::{Deref, DerefMut};

use super::{Backend, BufferId, FramebufferId, ProgramId, ProgramSource, TextureId};
use crate::error::BackendError;

/// Binds a texture for the guard's lifetime.
pub struct TextureBinding<'a, B: Backend + ?Sized> {
    backend: &'a mut B,
    previous: Option<TextureId>,
}

impl<'a, B: Backend + ?Sized> TextureBinding<'a, B> {
    pub fn bind(backend: &'a mut B, texture: TextureId) -> Result<Self, BackendError> {
        let previous = backend.bindings().texture;
        backend.bind_texture(Some(texture))?;
        Ok(Self { backend, previous })
    }
}

impl<B: Backend + ?Sized> Deref for TextureBinding<'_, B> {
    type Target = B;

    fn deref(&self) -> &B {
        &*self.backend
    }
}

impl<B: Backend + ?Sized> DerefMut for TextureBinding<'_, B> {
    fn deref_mut(&mut self) -> &mut B {
        &mut *self.backend
    }
}

impl<B: Backend + ?Sized> Drop for TextureBinding<'_, B> {
    fn drop(&mut self) {
        if let Err(err) = self.backend.bind_texture(self.previous) {
            // The previous texture was deleted while we held the binding.
            log::warn!("could not restore texture binding: {err}");
            let _ = self.backend.bind_texture(None);
        }
    }
}

/// Binds a framebuffer for the guard's lifetime.
pub struct FramebufferBinding<'a, B: Backend + ?Sized> {
    backend: &'a mut B,
    previous: Option<FramebufferId>,
}

impl<'a, B: Backend + ?Sized> FramebufferBinding<'a, B> {
    pub fn bind(backend: &'a mut B, framebuffer: FramebufferId) -> Result<Self, BackendError> {
        let previous = backend.bindings().framebuffer;
        backend.bind_framebuffer(Some(framebuffer))?;
        Ok(Self { backend, previous })
    }
}

impl<B: Backend + ?Sized> Deref for FramebufferBinding<'_, B> {
    type Target = B;

    fn deref(&self) -> &B {
        &*self.backend
    }
}

impl<B: Backend + ?Sized> DerefMut for FramebufferBinding<'_, B> {
    fn deref_mut(&mut self) -> &mut B {
        &mut *self.backend
    }
}

impl<B: Backend + ?Sized> Drop for FramebufferBinding<'_, B> {
    fn drop(&mut self) {
        if let Err(err) = self.backend.bind_framebuffer(self.previous) {
            log::warn!("could not restore framebuffer binding: {err}");
            let _ = self.backend.bind_framebuffer(None);
        }
    }
}

/// Records resources created during setup; releases them on drop unless
/// committed.
pub struct ResourceScope<'a, B: Backend + ?Sized> {
    backend: &'a mut B,
    textures: Vec<TextureId>,
    framebuffers: Vec<FramebufferId>,
    programs: Vec<ProgramId>,
    buffers: Vec<BufferId>,
    committed: bool,
}

impl<'a, B: Backend + ?Sized> ResourceScope<'a, B> {
    pub fn new(backend: &'a mut B) -> Self {
        Self {
            backend,
            textures: Vec::new(),
            framebuffers: Vec::new(),
            programs: Vec::new(),
            buffers: Vec::new(),
            committed: false,
        }
    }

    pub fn create_texture(&mut self) -> TextureId {
        let texture = self.backend.create_texture();
        self.textures.push(texture);
        texture
    }

    /// Takes responsibility for a texture created outside the scope.
    pub fn adopt_texture(&mut self, texture: TextureId) {
        self.textures.push(texture);
    }

    pub fn create_framebuffer(&mut self) -> FramebufferId {
        let framebuffer = self.backend.create_framebuffer();
        self.framebuffers.push(framebuffer);
        framebuffer
    }

    pub fn create_program(&mut self, source: &ProgramSource<'_>) -> Result<ProgramId, BackendError> {
        let program = self.backend.create_program(source)?;
        self.programs.push(program);
        Ok(program)
    }

    pub fn create_vertex_buffer(&mut self, data: &[f32]) -> Result<BufferId, BackendError> {
        let buffer = self.backend.create_vertex_buffer(data)?;
        self.buffers.push(buffer);
        Ok(buffer)
    }

    pub fn create_index_buffer(&mut self, data: &[u32]) -> Result<BufferId, BackendError> {
        let buffer = self.backend.create_index_buffer(data)?;
        self.buffers.push(buffer);
        Ok(buffer)
    }

    /// Number of resources that would be released on drop.
    pub fn pending(&self) -> usize {
        self.textures.len() + self.framebuffers.len() + self.programs.len() + self.buffers.len()
    }

    /// Keeps every recorded resource alive; ownership passes to the caller.
    pub fn commit(mut self) {
        self.committed = true;
    }
}

impl<B: Backend + ?Sized> Deref for ResourceScope<'_, B> {
    type Target = B;

    fn deref(&self) -> &B {
        &*self.backend
    }
}

impl<B: Backend + ?Sized> DerefMut for ResourceScope<'_, B> {
    fn deref_mut(&mut self) -> &mut B {
        &mut *self.backend
    }
}

impl<B: Backend + ?Sized> Drop for ResourceScope<'_, B> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        let pending = self.pending();
        if pending > 0 {
            log::warn!("setup aborted; releasing {pending} GPU resources");
        }
        // Framebuffers first so no attachment outlives its texture.
        for fb in self.framebuffers.drain(..).rev() {
            self.backend.delete_framebuffer(fb);
        }
        for texture in self.textures.drain(..).rev() {
            self.backend.delete_texture(texture);
        }
        for program in self.programs.drain(..).rev() {
            self.backend.delete_program(program);
        }
        for buffer in self.buffers.drain(..).rev() {
            self.backend.delete_buffer(buffer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SoftwareBackend;

    #[test]
    fn texture_binding_restores_previous() {
        let mut gpu = SoftwareBackend::new();
        let outer = gpu.create_texture();
        let inner = gpu.create_texture();
        gpu.bind_texture(Some(outer)).unwrap();
        {
            let bound = TextureBinding::bind(&mut gpu, inner).unwrap();
            assert_eq!(bound.bindings().texture, Some(inner));
        }
        assert_eq!(gpu.bindings().texture, Some(outer));
    }

    #[test]
    fn binding_unknown_texture_leaves_state_alone() {
        let mut gpu = SoftwareBackend::new();
        let t = gpu.create_texture();
        gpu.delete_texture(t);
        assert!(TextureBinding::bind(&mut gpu, t).is_err());
        assert_eq!(gpu.bindings().texture, None);
    }

    #[test]
    fn framebuffer_binding_restores_none() {
        let mut gpu = SoftwareBackend::new();
        let fb = gpu.create_framebuffer();
        {
            let _bound = FramebufferBinding::bind(&mut gpu, fb).unwrap();
        }
        assert_eq!(gpu.bindings().framebuffer, None);
    }

    #[test]
    fn uncommitted_scope_releases_everything() {
        let mut gpu = SoftwareBackend::new();
        {
            let mut scope = ResourceScope::new(&mut gpu);
            scope.create_texture();
            scope.create_texture();
            scope.create_framebuffer();
            assert_eq!(scope.pending(), 3);
        }
        assert_eq!(gpu.live_resources(), 0);
    }

    #[test]
    fn adopted_texture_is_released_with_the_scope() {
        let mut gpu = SoftwareBackend::new();
        let outside = gpu.create_texture();
        {
            let mut scope = ResourceScope::new(&mut gpu);
            scope.adopt_texture(outside);
        }
        assert_eq!(gpu.live_resources(), 0);
    }

    #[test]
    fn committed_scope_keeps_resources() {
        let mut gpu = SoftwareBackend::new();
        {
            let mut scope = ResourceScope::new(&mut gpu);
            scope.create_texture();
            scope.create_framebuffer();
            scope.commit();
        }
        assert_eq!(gpu.live_resources(), 2);
    }
}
