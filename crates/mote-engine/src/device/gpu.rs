use anyhow::{Context, Result};

/// Initialization parameters for the headless GPU layer.
#[derive(Debug, Clone)]
pub struct GpuInit {
    pub power_preference: wgpu::PowerPreference,

    /// Required wgpu features. The simulation needs none beyond the baseline.
    pub required_features: wgpu::Features,

    /// Limits requested from the adapter/device.
    ///
    /// `max_color_attachments` must be at least 3 for the snapshot
    /// framebuffers.
    pub required_limits: wgpu::Limits,

    /// Use a software adapter (e.g. lavapipe, WARP) even when hardware exists.
    pub force_fallback_adapter: bool,
}

impl Default for GpuInit {
    fn default() -> Self {
        Self {
            power_preference: wgpu::PowerPreference::HighPerformance,
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            force_fallback_adapter: false,
        }
    }
}

/// Owns the wgpu core objects.
pub struct Gpu {
    adapter: wgpu::Adapter,
    device: wgpu::Device,
    queue: wgpu::Queue,
}

impl Gpu {
    /// Requests an adapter and device with no surface attached.
    ///
    /// Adapter/device acquisition is asynchronous under wgpu; drive it with
    /// `pollster::block_on` from synchronous code.
    pub async fn new_headless(init: GpuInit) -> Result<Self> {
        let GpuInit {
            power_preference,
            required_features,
            required_limits,
            force_fallback_adapter,
        } = init;

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference,
                compatible_surface: None,
                force_fallback_adapter,
            })
            .await
            .context("failed to find a suitable GPU adapter")?;

        let info = adapter.get_info();
        log::info!("adapter: {} ({:?})", info.name, info.backend);

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("mote-engine device"),
                required_features,
                required_limits,
                experimental_features: wgpu::ExperimentalFeatures::disabled(),
                memory_hints: wgpu::MemoryHints::Performance,
                trace: wgpu::Trace::Off,
            })
            .await
            .context("failed to create wgpu device/queue")?;

        Ok(Self {
            adapter,
            device,
            queue,
        })
    }

    pub fn adapter_info(&self) -> wgpu::AdapterInfo {
        self.adapter.get_info()
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Blocks until all submitted work has completed.
    pub fn wait_idle(&self) -> Result<()> {
        self.device
            .poll(wgpu::PollType::Wait {
                submission_index: None,
                timeout: None,
            })
            .context("device poll failed")?;
        Ok(())
    }
}
