use std::fmt;

use super::{ParticleState, check_complete, create_channel_texture};
use crate::backend::{
    Backend, BufferId, FramebufferBinding, FramebufferId, FramebufferStatus, ResourceScope,
    TextureId,
};
use crate::error::{ConfigError, SimError, SimResult};

/// Identity of one of the four state snapshots.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BufferRole {
    A,
    Rk2A,
    Rk2B,
    B,
}

impl BufferRole {
    pub const ALL: [BufferRole; 4] = [
        BufferRole::A,
        BufferRole::Rk2A,
        BufferRole::Rk2B,
        BufferRole::B,
    ];

    #[inline]
    pub fn index(self) -> usize {
        match self {
            BufferRole::A => 0,
            BufferRole::Rk2A => 1,
            BufferRole::Rk2B => 2,
            BufferRole::B => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BufferRole::A => "A",
            BufferRole::Rk2A => "RK2_A",
            BufferRole::Rk2B => "RK2_B",
            BufferRole::B => "B",
        }
    }
}

impl fmt::Display for BufferRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-particle state channel; each one lives at a fixed color slot.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Channel {
    Position,
    Velocity,
    Force,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Position, Channel::Velocity, Channel::Force];

    #[inline]
    pub fn slot(self) -> u32 {
        match self {
            Channel::Position => 0,
            Channel::Velocity => 1,
            Channel::Force => 2,
        }
    }
}

/// Position, velocity and force textures attached to one framebuffer at
/// slots 0, 1 and 2, all three active as draw buffers.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub role: BufferRole,
    pub framebuffer: FramebufferId,
    pub position: TextureId,
    pub velocity: TextureId,
    pub force: TextureId,
}

impl Snapshot {
    pub fn texture(&self, channel: Channel) -> TextureId {
        match channel {
            Channel::Position => self.position,
            Channel::Velocity => self.velocity,
            Channel::Force => self.force,
        }
    }

    /// Textures in slot order.
    pub fn textures(&self) -> [TextureId; 3] {
        [self.position, self.velocity, self.force]
    }
}

/// The four GPU snapshots plus the static particle index stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StateBufferSet {
    snapshots: [Snapshot; 4],
    side: u32,
    num_particles: u32,
    index_buffer: BufferId,
}

impl StateBufferSet {
    /// Uploads `state` into four independent snapshots.
    ///
    /// Each snapshot gets fresh textures seeded with its own copy of the CPU
    /// arrays. Completeness is checked as soon as a snapshot's attachments are
    /// in place. On any error every resource created so far is released.
    pub fn build<B: Backend + ?Sized>(backend: &mut B, state: &ParticleState) -> SimResult<Self> {
        let side = state.side();
        let max = backend.limits().max_texture_side;
        if side > max {
            return Err(ConfigError::TextureTooLarge { side, max }.into());
        }

        let mut scope = ResourceScope::new(backend);
        let snapshots = [
            build_snapshot(&mut scope, BufferRole::A, state)?,
            build_snapshot(&mut scope, BufferRole::Rk2A, state)?,
            build_snapshot(&mut scope, BufferRole::Rk2B, state)?,
            build_snapshot(&mut scope, BufferRole::B, state)?,
        ];
        let index_buffer = scope.create_vertex_buffer(state.indices())?;
        scope.commit();

        log::info!(
            "state buffers ready: {} particles, {side}x{side} textures, 4 snapshots",
            state.num_particles()
        );
        Ok(Self {
            snapshots,
            side,
            num_particles: state.num_particles(),
            index_buffer,
        })
    }

    pub fn snapshot(&self, role: BufferRole) -> &Snapshot {
        &self.snapshots[role.index()]
    }

    pub fn snapshots(&self) -> &[Snapshot; 4] {
        &self.snapshots
    }

    pub fn side(&self) -> u32 {
        self.side
    }

    pub fn num_particles(&self) -> u32 {
        self.num_particles
    }

    /// Static vertex buffer holding `[0, 1, ..., N-1]`.
    pub fn index_buffer(&self) -> BufferId {
        self.index_buffer
    }

    /// Reads one channel of one snapshot back as RGBA floats.
    pub fn read_channel<B: Backend + ?Sized>(
        &self,
        backend: &mut B,
        role: BufferRole,
        channel: Channel,
    ) -> SimResult<Vec<f32>> {
        Ok(backend.read_texture(self.snapshot(role).texture(channel))?)
    }

    /// Deletes every framebuffer, texture and the index buffer.
    pub fn release<B: Backend + ?Sized>(self, backend: &mut B) {
        self.delete_all(backend);
    }

    pub(crate) fn delete_all<B: Backend + ?Sized>(&self, backend: &mut B) {
        for snapshot in &self.snapshots {
            backend.delete_framebuffer(snapshot.framebuffer);
            for texture in snapshot.textures() {
                backend.delete_texture(texture);
            }
        }
        backend.delete_buffer(self.index_buffer);
    }
}

fn build_snapshot<B: Backend + ?Sized>(
    scope: &mut ResourceScope<'_, B>,
    role: BufferRole,
    state: &ParticleState,
) -> SimResult<Snapshot> {
    let framebuffer = scope.create_framebuffer();
    attach_snapshot(scope, framebuffer, role, state)
}

/// Attaches fresh channel textures to `framebuffer`, checks completeness and
/// only then activates the three draw buffers.
fn attach_snapshot<B: Backend + ?Sized>(
    scope: &mut ResourceScope<'_, B>,
    framebuffer: FramebufferId,
    role: BufferRole,
    state: &ParticleState,
) -> SimResult<Snapshot> {
    let side = state.side();
    let mut attach = |channel: Channel, data: &[f32]| -> SimResult<TextureId> {
        let texture = create_channel_texture(&mut **scope, framebuffer, channel, side, Some(data))?;
        scope.adopt_texture(texture);
        Ok(texture)
    };
    let position = attach(Channel::Position, state.positions())?;
    let velocity = attach(Channel::Velocity, state.velocities())?;
    let force = attach(Channel::Force, state.forces())?;

    let status = check_complete(&mut **scope, framebuffer)?;
    if status != FramebufferStatus::Complete {
        return Err(SimError::FramebufferIncomplete { role, status });
    }
    {
        let mut bound = FramebufferBinding::bind(&mut **scope, framebuffer)?;
        bound.draw_buffers(&Channel::ALL.map(Channel::slot))?;
    }

    log::debug!("snapshot {role} attached to framebuffer {}", framebuffer.raw());
    Ok(Snapshot {
        role,
        framebuffer,
        position,
        velocity,
        force,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendLimits, Bindings, FramebufferState, SoftwareBackend};
    use crate::config::SimulationConfig;

    fn particles(exponent: u32) -> ParticleState {
        ParticleState::from_config(&SimulationConfig {
            exponent,
            seed: Some(7),
            ..SimulationConfig::default()
        })
        .unwrap()
    }

    // ── layout ────────────────────────────────────────────────────────────

    #[test]
    fn exponent_ten_builds_four_sets_of_three_32x32_textures() {
        let mut gpu = SoftwareBackend::new();
        let set = StateBufferSet::build(&mut gpu, &particles(10)).unwrap();
        assert_eq!(set.side(), 32);
        assert_eq!(set.num_particles(), 1024);

        let mut seen = Vec::new();
        for role in BufferRole::ALL {
            let snapshot = set.snapshot(role);
            assert_eq!(snapshot.role, role);
            let fb = gpu.framebuffer_state(snapshot.framebuffer).unwrap();
            assert_eq!(fb.attachment_count(), 3);
            assert_eq!(fb.draw_buffers(), [0, 1, 2]);
            for channel in Channel::ALL {
                assert_eq!(fb.attachment(channel.slot()), Some(snapshot.texture(channel)));
            }
            for texture in snapshot.textures() {
                assert_eq!(gpu.read_texture(texture).unwrap().len(), 32 * 32 * 4);
                assert!(!seen.contains(&texture));
                seen.push(texture);
            }
        }
        // 12 textures, 4 framebuffers, 1 index buffer.
        assert_eq!(gpu.live_resources(), 17);
    }

    #[test]
    fn every_snapshot_reads_back_the_seeded_arrays() {
        let mut gpu = SoftwareBackend::new();
        let state = particles(4);
        let set = StateBufferSet::build(&mut gpu, &state).unwrap();
        for role in BufferRole::ALL {
            assert_eq!(set.read_channel(&mut gpu, role, Channel::Position).unwrap(), state.positions());
            assert_eq!(set.read_channel(&mut gpu, role, Channel::Velocity).unwrap(), state.velocities());
            assert_eq!(set.read_channel(&mut gpu, role, Channel::Force).unwrap(), state.forces());
        }
    }

    #[test]
    fn build_leaves_bindings_untouched() {
        let mut gpu = SoftwareBackend::new();
        StateBufferSet::build(&mut gpu, &particles(2)).unwrap();
        assert_eq!(gpu.bindings(), Bindings::default());
    }

    #[test]
    fn role_names() {
        let names: Vec<String> = BufferRole::ALL.iter().map(|r| r.to_string()).collect();
        assert_eq!(names, ["A", "RK2_A", "RK2_B", "B"]);
    }

    // ── failure ───────────────────────────────────────────────────────────

    #[test]
    fn too_few_color_attachments_is_incomplete_and_leaks_nothing() {
        let mut gpu = SoftwareBackend::with_limits(BackendLimits {
            max_color_attachments: 2,
            ..BackendLimits::default()
        });
        let err = StateBufferSet::build(&mut gpu, &particles(4)).unwrap_err();
        assert!(matches!(
            err,
            SimError::FramebufferIncomplete {
                role: BufferRole::A,
                status: FramebufferStatus::TooManyAttachments { count: 3, max: 2 },
            }
        ));
        assert_eq!(gpu.live_resources(), 0);
        assert_eq!(gpu.bindings(), Bindings::default());
    }

    #[test]
    fn incomplete_framebuffer_keeps_its_default_draw_buffers() {
        let mut gpu = SoftwareBackend::with_limits(BackendLimits {
            max_color_attachments: 2,
            ..BackendLimits::default()
        });
        let mut scope = ResourceScope::new(&mut gpu);
        let fb = scope.create_framebuffer();
        let err = attach_snapshot(&mut scope, fb, BufferRole::Rk2B, &particles(2)).unwrap_err();
        assert!(matches!(err, SimError::FramebufferIncomplete { role: BufferRole::Rk2B, .. }));

        let state = scope.framebuffer_state(fb).unwrap();
        assert_eq!(state.attachment_count(), 3);
        assert_eq!(state.draw_buffers(), FramebufferState::default().draw_buffers());
    }

    #[test]
    fn side_beyond_backend_limit_is_rejected() {
        let mut gpu = SoftwareBackend::with_limits(BackendLimits {
            max_texture_side: 8,
            ..BackendLimits::default()
        });
        let err = StateBufferSet::build(&mut gpu, &particles(8)).unwrap_err();
        assert!(matches!(
            err,
            SimError::Config(ConfigError::TextureTooLarge { side: 16, max: 8 })
        ));
        assert_eq!(gpu.live_resources(), 0);
    }

    #[test]
    fn release_deletes_everything() {
        let mut gpu = SoftwareBackend::new();
        let set = StateBufferSet::build(&mut gpu, &particles(2)).unwrap();
        set.release(&mut gpu);
        assert_eq!(gpu.live_resources(), 0);
    }
}
