//! Texture and framebuffer creation.
//!
//! Every function here leaves the texture and framebuffer bindings exactly as
//! it found them, on success and on every error path.

use super::Channel;
use crate::backend::{
    Backend, FilterMode, FramebufferBinding, FramebufferId, FramebufferStatus, ResourceScope,
    TEXEL_COMPONENTS, TextureBinding, TextureId,
};
use crate::error::{ConfigError, SimResult};

/// Allocates a `side x side` RGBA32F texture with nearest filtering and
/// attaches it to `channel`'s slot of `framebuffer`.
///
/// `data`, when given, must hold exactly `side * side * 4` floats; otherwise
/// the texture is left uninitialized. Other slots of the framebuffer are not
/// touched. On failure the texture is deleted.
pub fn create_channel_texture<B: Backend + ?Sized>(
    backend: &mut B,
    framebuffer: FramebufferId,
    channel: Channel,
    side: u32,
    data: Option<&[f32]>,
) -> SimResult<TextureId> {
    create_slot_texture(backend, framebuffer, channel.slot(), side, side, data)
}

fn create_slot_texture<B: Backend + ?Sized>(
    backend: &mut B,
    framebuffer: FramebufferId,
    slot: u32,
    width: u32,
    height: u32,
    data: Option<&[f32]>,
) -> SimResult<TextureId> {
    if let Some(data) = data {
        let expected = width as usize * height as usize * TEXEL_COMPONENTS;
        if data.len() != expected {
            return Err(ConfigError::DataLength {
                expected,
                actual: data.len(),
            }
            .into());
        }
    }

    let mut scope = ResourceScope::new(backend);
    let texture = scope.create_texture();
    {
        let mut bound = TextureBinding::bind(&mut *scope, texture)?;
        bound.set_texture_filter(FilterMode::Nearest)?;
        bound.tex_image_2d(width, height, data)?;
    }
    {
        let mut bound = FramebufferBinding::bind(&mut *scope, framebuffer)?;
        bound.framebuffer_texture_2d(slot, texture)?;
    }
    scope.commit();
    Ok(texture)
}

/// Completeness of `framebuffer` with its current attachments and draw
/// buffers.
pub fn check_complete<B: Backend + ?Sized>(
    backend: &mut B,
    framebuffer: FramebufferId,
) -> SimResult<FramebufferStatus> {
    let bound = FramebufferBinding::bind(backend, framebuffer)?;
    Ok(bound.check_framebuffer_status())
}

/// Offscreen single-slot color target for the renderers.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DisplayTarget {
    pub framebuffer: FramebufferId,
    pub texture: TextureId,
    pub width: u32,
    pub height: u32,
}

impl DisplayTarget {
    /// Reads the target back as RGBA floats, row-major.
    pub fn read<B: Backend + ?Sized>(&self, backend: &mut B) -> SimResult<Vec<f32>> {
        Ok(backend.read_texture(self.texture)?)
    }

    pub fn release<B: Backend + ?Sized>(self, backend: &mut B) {
        backend.delete_framebuffer(self.framebuffer);
        backend.delete_texture(self.texture);
    }
}

/// Creates a `width x height` target drawing to slot 0.
pub fn create_display_target<B: Backend + ?Sized>(
    backend: &mut B,
    width: u32,
    height: u32,
) -> SimResult<DisplayTarget> {
    if width == 0 || height == 0 {
        return Err(ConfigError::EmptyTarget { width, height }.into());
    }
    let max = backend.limits().max_texture_side;
    if width > max || height > max {
        return Err(ConfigError::TextureTooLarge {
            side: width.max(height),
            max,
        }
        .into());
    }

    let mut scope = ResourceScope::new(backend);
    let framebuffer = scope.create_framebuffer();
    let texture = create_slot_texture(&mut *scope, framebuffer, 0, width, height, None)?;
    scope.adopt_texture(texture);
    {
        let mut bound = FramebufferBinding::bind(&mut *scope, framebuffer)?;
        bound.draw_buffers(&[0])?;
    }
    scope.commit();
    log::debug!("display target {width}x{height} ready");

    Ok(DisplayTarget {
        framebuffer,
        texture,
        width,
        height,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Bindings, SoftwareBackend};
    use crate::error::SimError;

    // ── channel textures ──────────────────────────────────────────────────

    #[test]
    fn texture_is_attached_at_the_channel_slot() {
        let mut gpu = SoftwareBackend::new();
        let fb = gpu.create_framebuffer();
        let t = create_channel_texture(&mut gpu, fb, Channel::Force, 4, None).unwrap();
        let state = gpu.framebuffer_state(fb).unwrap();
        assert_eq!(state.attachment(2), Some(t));
        assert_eq!(state.attachment_count(), 1);
        assert_eq!(gpu.texture_size(t), Some((4, 4)));
        assert_eq!(gpu.texture_filter(t), Some(FilterMode::Nearest));
    }

    #[test]
    fn other_slots_are_left_alone() {
        let mut gpu = SoftwareBackend::new();
        let fb = gpu.create_framebuffer();
        let pos = create_channel_texture(&mut gpu, fb, Channel::Position, 2, None).unwrap();
        let vel = create_channel_texture(&mut gpu, fb, Channel::Velocity, 2, None).unwrap();
        let state = gpu.framebuffer_state(fb).unwrap();
        assert_eq!(state.attachment(0), Some(pos));
        assert_eq!(state.attachment(1), Some(vel));
    }

    #[test]
    fn nothing_bound_before_means_nothing_bound_after() {
        let mut gpu = SoftwareBackend::new();
        let fb = gpu.create_framebuffer();
        create_channel_texture(&mut gpu, fb, Channel::Position, 2, None).unwrap();
        assert_eq!(gpu.bindings(), Bindings::default());
    }

    #[test]
    fn prior_bindings_are_restored() {
        let mut gpu = SoftwareBackend::new();
        let other_tex = gpu.create_texture();
        let other_fb = gpu.create_framebuffer();
        gpu.bind_texture(Some(other_tex)).unwrap();
        gpu.bind_framebuffer(Some(other_fb)).unwrap();

        let fb = gpu.create_framebuffer();
        create_channel_texture(&mut gpu, fb, Channel::Velocity, 2, None).unwrap();
        assert_eq!(gpu.bindings().texture, Some(other_tex));
        assert_eq!(gpu.bindings().framebuffer, Some(other_fb));
    }

    #[test]
    fn seeded_data_reads_back() {
        let mut gpu = SoftwareBackend::new();
        let fb = gpu.create_framebuffer();
        let data: Vec<f32> = (0..16).map(|i| i as f32 * 0.5).collect();
        let t = create_channel_texture(&mut gpu, fb, Channel::Position, 2, Some(&data)).unwrap();
        assert_eq!(gpu.read_texture(t).unwrap(), data);
    }

    #[test]
    fn wrong_data_length_creates_nothing() {
        let mut gpu = SoftwareBackend::new();
        let fb = gpu.create_framebuffer();
        let err = create_channel_texture(&mut gpu, fb, Channel::Position, 2, Some(&[0.0; 15]))
            .unwrap_err();
        assert!(matches!(
            err,
            SimError::Config(ConfigError::DataLength {
                expected: 16,
                actual: 15
            })
        ));
        assert_eq!(gpu.live_resources(), 1);
        assert_eq!(gpu.bindings(), Bindings::default());
    }

    #[test]
    fn unknown_framebuffer_releases_the_texture() {
        let mut gpu = SoftwareBackend::new();
        let fb = gpu.create_framebuffer();
        gpu.delete_framebuffer(fb);
        assert!(create_channel_texture(&mut gpu, fb, Channel::Position, 2, None).is_err());
        assert_eq!(gpu.live_resources(), 0);
        assert_eq!(gpu.bindings(), Bindings::default());
    }

    // ── completeness ──────────────────────────────────────────────────────

    #[test]
    fn empty_framebuffer_is_not_complete() {
        let mut gpu = SoftwareBackend::new();
        let fb = gpu.create_framebuffer();
        assert_eq!(
            check_complete(&mut gpu, fb).unwrap(),
            FramebufferStatus::NoAttachments
        );
        assert_eq!(gpu.bindings().framebuffer, None);
    }

    // ── display targets ───────────────────────────────────────────────────

    #[test]
    fn display_target_is_complete() {
        let mut gpu = SoftwareBackend::new();
        let target = create_display_target(&mut gpu, 16, 8).unwrap();
        assert_eq!(gpu.texture_size(target.texture), Some((16, 8)));
        assert_eq!(
            check_complete(&mut gpu, target.framebuffer).unwrap(),
            FramebufferStatus::Complete
        );
        target.release(&mut gpu);
        assert_eq!(gpu.live_resources(), 0);
    }

    #[test]
    fn empty_display_target_is_rejected() {
        let mut gpu = SoftwareBackend::new();
        assert!(matches!(
            create_display_target(&mut gpu, 0, 8),
            Err(SimError::Config(ConfigError::EmptyTarget { .. }))
        ));
        assert_eq!(gpu.live_resources(), 0);
    }
}
