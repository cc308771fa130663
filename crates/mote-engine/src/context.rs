//! The simulation context: one value owning everything a running simulation
//! needs.

use glam::Mat4;

use crate::backend::Backend;
use crate::config::{SimulationConfig, SimulationParams, validate_time_step};
use crate::error::{ConfigError, SimResult};
use crate::pipeline::Orchestrator;
use crate::render::{self, Mesh, MeshVertex};
use crate::stages::{StageLoader, StageRegistry};
use crate::state::{
    self, BufferRole, Channel, DisplayTarget, ParticleState, Snapshot, StateBufferSet,
};

/// Backend, compiled stages, state snapshots, parameters and frame
/// sequencing of one simulation.
///
/// Dropping the context releases every backend resource it created,
/// including display targets and meshes made through it.
pub struct SimulationContext<B: Backend> {
    backend: B,
    stages: StageRegistry,
    buffers: StateBufferSet,
    orchestrator: Orchestrator,
    params: SimulationParams,
    targets: Vec<DisplayTarget>,
    meshes: Vec<Mesh>,
}

impl<B: Backend> SimulationContext<B> {
    /// Seeds particles from `config`, loads every stage and uploads the
    /// four snapshots.
    pub async fn new<L>(backend: B, config: &SimulationConfig, loader: &L) -> SimResult<Self>
    where
        L: StageLoader + ?Sized,
    {
        let state = ParticleState::from_config(config)?;
        Self::with_state(backend, config, &state, loader).await
    }

    /// Like [`new`](Self::new) with explicit initial particle data. Only the
    /// config's time step and diameter are checked; exponent and bounds are
    /// ignored since every [`ParticleState`] already holds `2^exponent`
    /// particles with an even exponent.
    pub async fn with_state<L>(
        mut backend: B,
        config: &SimulationConfig,
        state: &ParticleState,
        loader: &L,
    ) -> SimResult<Self>
    where
        L: StageLoader + ?Sized,
    {
        let time_step = validate_time_step(config.time_step)?;
        if !(config.particle_size.is_finite() && config.particle_size > 0.0) {
            return Err(ConfigError::InvalidDiameter(config.particle_size).into());
        }

        let stages = StageRegistry::load_all(&mut backend, loader).await?;
        let buffers = match StateBufferSet::build(&mut backend, state) {
            Ok(buffers) => buffers,
            Err(err) => {
                stages.release(&mut backend);
                return Err(err);
            }
        };

        let params = SimulationParams {
            time_step,
            particle_size: config.particle_size,
            num_particles: state.num_particles(),
            tex_side_length: state.side(),
        };
        log::info!(
            "simulation ready on {} backend: {} particles, dt {}, diameter {}",
            backend.name(),
            params.num_particles,
            params.time_step,
            params.particle_size
        );

        Ok(Self {
            backend,
            stages,
            buffers,
            orchestrator: Orchestrator::new(),
            params,
            targets: Vec::new(),
            meshes: Vec::new(),
        })
    }

    // ── stepping ──────────────────────────────────────────────────────────

    /// Advances one frame. A rejected frame leaves the state untouched.
    pub fn step(&mut self) -> SimResult<()> {
        self.orchestrator
            .step(&mut self.backend, &self.stages, &self.buffers, &self.params)
    }

    /// Advances `frames` frames, stopping at the first failure.
    pub fn step_n(&mut self, frames: u32) -> SimResult<()> {
        for _ in 0..frames {
            self.step()?;
        }
        Ok(())
    }

    /// Sets the time step used by subsequent frames. Validated when the next
    /// frame runs.
    pub fn set_time_step(&mut self, dt: f32) {
        self.params.time_step = dt;
    }

    pub fn time_step(&self) -> f32 {
        self.params.time_step
    }

    pub fn params(&self) -> &SimulationParams {
        &self.params
    }

    pub fn frame_index(&self) -> u64 {
        self.orchestrator.frame_index()
    }

    // ── state access ──────────────────────────────────────────────────────

    pub fn current_role(&self) -> BufferRole {
        self.orchestrator.current()
    }

    /// Read-only handles of the latest completed state.
    pub fn current_textures(&self) -> Snapshot {
        *self.buffers.snapshot(self.current_role())
    }

    /// Reads one channel of the current state back to the CPU.
    pub fn read_channel(&mut self, channel: Channel) -> SimResult<Vec<f32>> {
        let role = self.current_role();
        self.buffers.read_channel(&mut self.backend, role, channel)
    }

    /// Reads one channel of any snapshot back to the CPU.
    pub fn read_snapshot(&mut self, role: BufferRole, channel: Channel) -> SimResult<Vec<f32>> {
        self.buffers.read_channel(&mut self.backend, role, channel)
    }

    // ── rendering ─────────────────────────────────────────────────────────

    pub fn create_display_target(&mut self, width: u32, height: u32) -> SimResult<DisplayTarget> {
        let target = state::create_display_target(&mut self.backend, width, height)?;
        self.targets.push(target);
        Ok(target)
    }

    pub fn release_display_target(&mut self, target: DisplayTarget) {
        self.targets.retain(|t| *t != target);
        target.release(&mut self.backend);
    }

    pub fn upload_mesh(&mut self, vertices: &[MeshVertex], indices: &[u32]) -> SimResult<Mesh> {
        let mesh = Mesh::upload(&mut self.backend, vertices, indices)?;
        self.meshes.push(mesh);
        Ok(mesh)
    }

    pub fn release_mesh(&mut self, mesh: Mesh) {
        self.meshes.retain(|m| *m != mesh);
        mesh.release(&mut self.backend);
    }

    pub fn render_particles(
        &mut self,
        target: &DisplayTarget,
        camera: Mat4,
        clear: Option<[f32; 4]>,
    ) -> SimResult<()> {
        let snapshot = self.current_textures();
        render::render_particles(
            &mut self.backend,
            &self.stages,
            &self.buffers,
            &snapshot,
            target,
            camera,
            clear,
        )
    }

    pub fn render_debug(&mut self, target: &DisplayTarget) -> SimResult<()> {
        let snapshot = self.current_textures();
        render::render_debug(&mut self.backend, &self.stages, &self.buffers, &snapshot, target)
    }

    pub fn render_ambient(
        &mut self,
        target: &DisplayTarget,
        camera: Mat4,
        mesh: &Mesh,
        clear: Option<[f32; 4]>,
    ) -> SimResult<()> {
        let snapshot = self.current_textures();
        render::render_ambient(
            &mut self.backend,
            &self.stages,
            &snapshot,
            target,
            camera,
            mesh,
            clear,
        )
    }

    /// Blocks until every submitted pass has completed.
    pub fn finish(&mut self) -> SimResult<()> {
        Ok(self.backend.finish()?)
    }

    // ── accessors ─────────────────────────────────────────────────────────

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Mutable backend access. Deleting resources owned by the context
    /// invalidates it.
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn stages(&self) -> &StageRegistry {
        &self.stages
    }

    pub fn buffers(&self) -> &StateBufferSet {
        &self.buffers
    }
}

impl<B: Backend> Drop for SimulationContext<B> {
    fn drop(&mut self) {
        for target in self.targets.drain(..) {
            target.release(&mut self.backend);
        }
        for mesh in self.meshes.drain(..) {
            mesh.release(&mut self.backend);
        }
        self.buffers.delete_all(&mut self.backend);
        self.stages.delete_all(&mut self.backend);
        log::debug!("simulation context released");
    }
}
