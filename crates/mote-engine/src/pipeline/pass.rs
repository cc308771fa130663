use std::fmt;

use crate::backend::{FramebufferId, TextureId};
use crate::error::{SimError, SimResult};
use crate::stages::StageKind;

/// Every kind of draw the pipeline issues.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum PassKind {
    Force,
    Euler,
    CorrectorForce,
    Rk2,
    Particles,
    Debug,
    Ambient,
}

impl PassKind {
    /// Program the pass runs.
    pub fn stage(self) -> StageKind {
        match self {
            PassKind::Force | PassKind::CorrectorForce => StageKind::Force,
            PassKind::Euler => StageKind::Euler,
            PassKind::Rk2 => StageKind::Rk2,
            PassKind::Particles => StageKind::Particle,
            PassKind::Debug => StageKind::Debug,
            PassKind::Ambient => StageKind::Ambient,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PassKind::Force => "force",
            PassKind::Euler => "euler",
            PassKind::CorrectorForce => "corrector force",
            PassKind::Rk2 => "rk2",
            PassKind::Particles => "particles",
            PassKind::Debug => "debug",
            PassKind::Ambient => "ambient",
        }
    }
}

impl fmt::Display for PassKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The textures one pass samples and the textures it writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassPlan {
    pub kind: PassKind,
    /// Framebuffer bound while the pass draws.
    pub target: FramebufferId,
    /// Sampled textures keyed by the program parameter they feed.
    pub reads: Vec<(&'static str, TextureId)>,
    pub writes: Vec<TextureId>,
}

impl PassPlan {
    /// Rejects a plan that samples a texture it also writes.
    pub fn validate(&self) -> SimResult<()> {
        match self
            .reads
            .iter()
            .find(|(_, texture)| self.writes.contains(texture))
        {
            Some(&(_, texture)) => Err(SimError::FeedbackLoop {
                pass: self.kind,
                texture,
            }),
            None => Ok(()),
        }
    }

    pub fn read_textures(&self) -> impl Iterator<Item = TextureId> + '_ {
        self.reads.iter().map(|&(_, texture)| texture)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Backend, SoftwareBackend};

    #[test]
    fn overlapping_read_and_write_is_a_feedback_loop() {
        let mut gpu = SoftwareBackend::new();
        let shared = gpu.create_texture();
        let other = gpu.create_texture();
        let plan = PassPlan {
            kind: PassKind::Euler,
            target: gpu.create_framebuffer(),
            reads: vec![("posTex", other), ("velTex", shared)],
            writes: vec![shared],
        };
        assert!(matches!(
            plan.validate(),
            Err(SimError::FeedbackLoop { pass: PassKind::Euler, texture }) if texture == shared
        ));
    }

    #[test]
    fn corrector_runs_the_force_program() {
        assert_eq!(PassKind::CorrectorForce.stage(), StageKind::Force);
        assert_eq!(PassKind::CorrectorForce.to_string(), "corrector force");
    }
}
