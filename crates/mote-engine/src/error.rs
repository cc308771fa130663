//! Error taxonomy for the simulation core.
//!
//! - [`ConfigError`]: rejected inputs (exponent, time step, sizes). Fatal for the
//!   requested operation, never retried.
//! - [`SimError`]: everything that can abort setup or a frame step.
//! - [`BackendError`]: failures reported by a graphics backend.
//!
//! Unresolved shader parameters are deliberately *not* errors; see
//! [`crate::stages::ShaderParamUnresolved`].

use thiserror::Error;

use crate::backend::{FramebufferStatus, TextureId};
use crate::pipeline::PassKind;
use crate::stages::StageKind;
use crate::state::BufferRole;

/// Invalid configuration or per-frame parameter.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("particle exponent {0} is odd; texture side would not be an integer")]
    OddExponent(u32),

    #[error("particle exponent {exponent} exceeds the supported maximum {max}")]
    ExponentOutOfRange { exponent: u32, max: u32 },

    #[error("texture side {side} exceeds the backend limit {max}")]
    TextureTooLarge { side: u32, max: u32 },

    #[error("time step must be finite and positive, got {0}")]
    NonPositiveTimeStep(f32),

    #[error("particle diameter must be finite and positive, got {0}")]
    InvalidDiameter(f32),

    #[error("{name} bounds are empty or not finite: [{min}, {max})")]
    InvalidBounds {
        name: &'static str,
        min: f32,
        max: f32,
    },

    #[error("{0} particles do not fill a power-of-two texture side")]
    ParticleCount(u32),

    #[error("initial data has {actual} floats, expected {expected}")]
    DataLength { expected: usize, actual: usize },

    #[error("display target must be non-empty, got {width}x{height}")]
    EmptyTarget { width: u32, height: u32 },
}

/// Failures reported by a [`crate::backend::Backend`] implementation.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("unknown {kind} handle {id}")]
    UnknownHandle { kind: &'static str, id: u32 },

    #[error("no {0} is bound")]
    NothingBound(&'static str),

    #[error("texture {0:?} has no storage allocated")]
    Unallocated(TextureId),

    #[error("color slot {slot} exceeds the backend limit {max}")]
    SlotOutOfRange { slot: u32, max: u32 },

    #[error("texture upload has {actual} floats, expected {expected}")]
    UploadLength { expected: usize, actual: usize },

    #[error("{0} is not supported by this backend")]
    Unsupported(&'static str),

    #[error("shader `{label}` failed to compile:\n{message}")]
    Shader { label: String, message: String },

    #[error("program writes color slot {slot}, which is not an active draw buffer")]
    OutputNotDrawn { slot: u32 },

    #[error("framebuffer is not complete: {0}")]
    IncompleteTarget(FramebufferStatus),

    #[error("texture {0:?} is both sampled and written by the same draw")]
    FeedbackLoop(TextureId),

    #[error("GPU read-back failed: {0}")]
    Readback(String),

    #[error("GPU device unavailable: {0}")]
    Device(String),
}

/// Errors surfaced by simulation setup and stepping.
#[derive(Debug, Error)]
pub enum SimError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("framebuffer for buffer set {role} is incomplete: {status}")]
    FramebufferIncomplete {
        role: BufferRole,
        status: FramebufferStatus,
    },

    #[error("stage {stage} failed to load: {source}")]
    StageLoad {
        stage: StageKind,
        #[source]
        source: anyhow::Error,
    },

    #[error("{pass} pass would read and write texture {texture:?}")]
    FeedbackLoop { pass: PassKind, texture: TextureId },

    #[error(transparent)]
    Backend(#[from] BackendError),
}

pub type SimResult<T> = Result<T, SimError>;
