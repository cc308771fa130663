//! Headless GPU device management.
//!
//! Creates the wgpu Instance/Adapter/Device/Queue without a surface; every
//! render target in this crate is an offscreen texture.

mod gpu;

pub use gpu::{Gpu, GpuInit};
