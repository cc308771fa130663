use super::{PassKind, PassPlan, RoleRing};
use crate::backend::{Backend, DrawCall, FramebufferBinding, Geometry, ParamValue};
use crate::config::{SimulationParams, validate_time_step};
use crate::error::SimResult;
use crate::stages::{Stage, StageRegistry};
use crate::state::{BufferRole, StateBufferSet};

/// Sequences the four simulation passes of a frame and owns the role ring.
#[derive(Debug, Clone, Default)]
pub struct Orchestrator {
    ring: RoleRing,
    frame_index: u64,
}

impl Orchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot holding the latest completed state.
    pub fn current(&self) -> BufferRole {
        self.ring.current()
    }

    pub fn ring(&self) -> RoleRing {
        self.ring
    }

    /// Completed steps.
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Passes of the next frame, in submission order.
    pub fn plan_frame(&self, buffers: &StateBufferSet) -> [PassPlan; 4] {
        let read = buffers.snapshot(self.ring.current());
        let scratch = buffers.snapshot(self.ring.scratch());
        let next = buffers.snapshot(self.ring.next());

        [
            PassPlan {
                kind: PassKind::Force,
                target: read.framebuffer,
                reads: vec![("posTex", read.position), ("velTex", read.velocity)],
                writes: vec![read.force],
            },
            PassPlan {
                kind: PassKind::Euler,
                target: scratch.framebuffer,
                reads: vec![
                    ("posTex", read.position),
                    ("velTex", read.velocity),
                    ("forceTex", read.force),
                ],
                writes: vec![scratch.position, scratch.velocity],
            },
            PassPlan {
                kind: PassKind::CorrectorForce,
                target: scratch.framebuffer,
                reads: vec![("posTex", scratch.position), ("velTex", scratch.velocity)],
                writes: vec![scratch.force],
            },
            PassPlan {
                kind: PassKind::Rk2,
                target: next.framebuffer,
                reads: vec![
                    ("posTex", read.position),
                    ("velTex1", read.velocity),
                    ("forceTex1", read.force),
                    ("velTex2", scratch.velocity),
                    ("forceTex2", scratch.force),
                ],
                writes: next.textures().to_vec(),
            },
        ]
    }

    /// Advances the simulation by one time step.
    ///
    /// The time step and every pass plan are validated before anything is
    /// submitted; a rejected frame leaves all snapshots untouched and the
    /// roles unchanged.
    pub fn step<B: Backend + ?Sized>(
        &mut self,
        backend: &mut B,
        stages: &StageRegistry,
        buffers: &StateBufferSet,
        params: &SimulationParams,
    ) -> SimResult<()> {
        let dt = validate_time_step(params.time_step)?;
        let plans = self.plan_frame(buffers);
        for plan in &plans {
            plan.validate()?;
        }

        let uniforms = [
            ("side", ParamValue::Float(params.tex_side_length as f32)),
            ("diameter", ParamValue::Float(params.particle_size)),
            ("dt", ParamValue::Float(dt)),
        ];
        for plan in &plans {
            let stage = stages.get(plan.kind.stage());
            run_pass(backend, stage, plan, &uniforms, Geometry::FullScreenQuad, None)?;
        }

        self.ring.advance();
        self.frame_index += 1;
        log::trace!(
            "frame {} done, current snapshot {}",
            self.frame_index,
            self.ring.current()
        );
        Ok(())
    }
}

/// Binds `plan.target` and issues one draw of `stage` with the plan's
/// textures plus `uniforms`. Parameters the program does not consume are
/// dropped.
pub(crate) fn run_pass<B: Backend + ?Sized>(
    backend: &mut B,
    stage: &Stage,
    plan: &PassPlan,
    uniforms: &[(&str, ParamValue)],
    geometry: Geometry,
    clear: Option<[f32; 4]>,
) -> SimResult<()> {
    plan.validate()?;
    let mut values: Vec<(&str, ParamValue)> = plan
        .reads
        .iter()
        .map(|&(name, texture)| (name, ParamValue::Texture(texture)))
        .collect();
    values.extend_from_slice(uniforms);
    let params = stage.bind(&values);

    let mut bound = FramebufferBinding::bind(backend, plan.target)?;
    log::trace!("{} pass: {} params", plan.kind, params.len());
    bound.draw(&DrawCall {
        label: plan.kind.as_str(),
        program: stage.program(),
        params: &params,
        geometry,
        clear,
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Bindings, SoftwareBackend};
    use crate::config::SimulationConfig;
    use crate::error::{ConfigError, SimError};
    use crate::stages::EmbeddedShaders;
    use crate::state::{Channel, ParticleState};

    struct Fixture {
        gpu: SoftwareBackend,
        stages: StageRegistry,
        buffers: StateBufferSet,
        params: SimulationParams,
    }

    fn fixture(state: ParticleState) -> Fixture {
        let mut gpu = SoftwareBackend::new();
        let stages = pollster::block_on(StageRegistry::load_all(&mut gpu, &EmbeddedShaders)).unwrap();
        let buffers = StateBufferSet::build(&mut gpu, &state).unwrap();
        let params = SimulationParams {
            time_step: 0.01,
            particle_size: 0.15,
            num_particles: state.num_particles(),
            tex_side_length: state.side(),
        };
        Fixture {
            gpu,
            stages,
            buffers,
            params,
        }
    }

    fn seeded(exponent: u32) -> ParticleState {
        ParticleState::from_config(&SimulationConfig {
            exponent,
            seed: Some(11),
            ..SimulationConfig::default()
        })
        .unwrap()
    }

    fn dump(f: &mut Fixture) -> Vec<Vec<f32>> {
        let mut out = Vec::new();
        for role in BufferRole::ALL {
            for channel in Channel::ALL {
                out.push(f.buffers.read_channel(&mut f.gpu, role, channel).unwrap());
            }
        }
        out
    }

    // ── planning ──────────────────────────────────────────────────────────

    #[test]
    fn no_pass_reads_what_it_writes() {
        let f = fixture(seeded(2));
        let mut orchestrator = Orchestrator::new();
        for _ in 0..2 {
            for plan in orchestrator.plan_frame(&f.buffers) {
                assert!(plan.validate().is_ok(), "{} pass overlaps", plan.kind);
                for t in plan.read_textures() {
                    assert!(!plan.writes.contains(&t));
                }
            }
            orchestrator.ring.advance();
        }
    }

    #[test]
    fn frame_reads_current_and_writes_next() {
        let f = fixture(seeded(2));
        let orchestrator = Orchestrator::new();
        let plans = orchestrator.plan_frame(&f.buffers);
        let kinds: Vec<PassKind> = plans.iter().map(|p| p.kind).collect();
        assert_eq!(
            kinds,
            [PassKind::Force, PassKind::Euler, PassKind::CorrectorForce, PassKind::Rk2]
        );

        let a = f.buffers.snapshot(BufferRole::A);
        let scratch = f.buffers.snapshot(BufferRole::Rk2A);
        let b = f.buffers.snapshot(BufferRole::B);
        assert_eq!(plans[0].writes, [a.force]);
        assert_eq!(plans[1].target, scratch.framebuffer);
        assert_eq!(plans[3].target, b.framebuffer);
        assert_eq!(plans[3].writes, b.textures());
    }

    // ── stepping ──────────────────────────────────────────────────────────

    #[test]
    fn step_swaps_current_and_next() {
        let mut f = fixture(seeded(2));
        let mut orchestrator = Orchestrator::new();
        orchestrator
            .step(&mut f.gpu, &f.stages, &f.buffers, &f.params)
            .unwrap();
        assert_eq!(orchestrator.current(), BufferRole::B);
        assert_eq!(orchestrator.frame_index(), 1);
        assert_eq!(f.gpu.draw_count(), 4);
        orchestrator
            .step(&mut f.gpu, &f.stages, &f.buffers, &f.params)
            .unwrap();
        assert_eq!(orchestrator.current(), BufferRole::A);
        assert_eq!(f.gpu.bindings(), Bindings::default());
    }

    #[test]
    fn bad_time_step_leaves_every_snapshot_identical() {
        let mut f = fixture(seeded(2));
        let before = dump(&mut f);
        let mut orchestrator = Orchestrator::new();
        for dt in [0.0, -0.01, f32::NAN] {
            let params = SimulationParams {
                time_step: dt,
                ..f.params
            };
            let err = orchestrator
                .step(&mut f.gpu, &f.stages, &f.buffers, &params)
                .unwrap_err();
            assert!(matches!(
                err,
                SimError::Config(ConfigError::NonPositiveTimeStep(_))
            ));
        }
        assert_eq!(dump(&mut f), before);
        assert_eq!(f.gpu.draw_count(), 0);
        assert_eq!(orchestrator.current(), BufferRole::A);
        assert_eq!(orchestrator.frame_index(), 0);
    }

    #[test]
    fn free_fall_matches_heun() {
        let state = ParticleState::from_parts(vec![0.0, 1.5, 0.0, 1.0], vec![0.0, 0.0, 0.0, 1.0])
            .unwrap();
        let mut f = fixture(state);
        let mut orchestrator = Orchestrator::new();
        orchestrator
            .step(&mut f.gpu, &f.stages, &f.buffers, &f.params)
            .unwrap();

        let role = orchestrator.current();
        let p = f.buffers.read_channel(&mut f.gpu, role, Channel::Position).unwrap();
        let v = f.buffers.read_channel(&mut f.gpu, role, Channel::Velocity).unwrap();
        let force = f.buffers.read_channel(&mut f.gpu, role, Channel::Force).unwrap();

        let dt = 0.01f32;
        let v2 = -9.8 * dt;
        assert!((p[1] - (1.5 + 0.5 * dt * v2)).abs() < 1e-6, "y = {}", p[1]);
        assert!((v[1] - v2).abs() < 1e-6, "vy = {}", v[1]);
        assert!((force[1] + 9.8).abs() < 1e-5, "fy = {}", force[1]);
        assert_eq!([p[3], v[3], force[3]], [1.0, 1.0, 1.0]);
    }
}
