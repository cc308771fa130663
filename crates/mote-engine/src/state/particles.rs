use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::backend::TEXEL_COMPONENTS;
use crate::config::{SimulationConfig, texture_side};
use crate::error::ConfigError;

/// CPU-side initial particle data, one RGBA texel per particle.
#[derive(Debug, Clone, PartialEq)]
pub struct ParticleState {
    num_particles: u32,
    side: u32,
    positions: Vec<f32>,
    velocities: Vec<f32>,
    forces: Vec<f32>,
    indices: Vec<f32>,
}

impl ParticleState {
    /// Generates `2^exponent` particles.
    ///
    /// Per particle, with `r` uniform in `[0, 1)` drawn per component:
    /// - position `(r*(max-min) - min/2, r*(max-min) + min, r*(max-min) - min/2, 1)`
    ///   over the grid bounds
    /// - velocity components uniform over the velocity bounds, `w = 1`
    /// - force `(0, 0, 0, 1)`
    pub fn initialize<R: Rng + ?Sized>(
        config: &SimulationConfig,
        rng: &mut R,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let side = texture_side(config.exponent)?;
        let num_particles = side * side;
        let n = num_particles as usize;

        let grid = config.grid_bounds;
        let vel = config.velocity_bounds;

        let mut positions = Vec::with_capacity(n * TEXEL_COMPONENTS);
        let mut velocities = Vec::with_capacity(n * TEXEL_COMPONENTS);
        for _ in 0..n {
            let mut unit = || rng.gen_range(0.0f32..1.0);
            positions.extend([
                unit() * grid.span() - grid.min / 2.0,
                unit() * grid.span() + grid.min,
                unit() * grid.span() - grid.min / 2.0,
                1.0,
            ]);
        }
        for _ in 0..n {
            let mut component = || rng.gen_range(0.0f32..1.0) * vel.span() + vel.min;
            velocities.extend([component(), component(), component(), 1.0]);
        }

        let forces = [0.0, 0.0, 0.0, 1.0].repeat(n);
        let indices = (0..num_particles).map(|i| i as f32).collect();

        Ok(Self {
            num_particles,
            side,
            positions,
            velocities,
            forces,
            indices,
        })
    }

    /// Deterministic variant of [`initialize`](Self::initialize). Uses the
    /// config's seed, or OS entropy when it has none.
    pub fn from_config(config: &SimulationConfig) -> Result<Self, ConfigError> {
        let mut rng = match config.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        Self::initialize(config, &mut rng)
    }

    /// Builds a state from explicit position and velocity arrays, with zero
    /// forces. Both arrays must hold `4 * side * side` floats where `side` is
    /// a power of two, i.e. `2^exponent` particles with an even exponent.
    pub fn from_parts(positions: Vec<f32>, velocities: Vec<f32>) -> Result<Self, ConfigError> {
        let texels = positions.len() / TEXEL_COMPONENTS;
        let side = (texels as f64).sqrt() as u32;
        let num_particles = side * side;
        let expected = num_particles as usize * TEXEL_COMPONENTS;
        for actual in [positions.len(), velocities.len()] {
            if actual != expected || num_particles == 0 {
                return Err(ConfigError::DataLength { expected, actual });
            }
        }
        if !side.is_power_of_two() {
            return Err(ConfigError::ParticleCount(num_particles));
        }
        texture_side(2 * side.trailing_zeros())?;

        Ok(Self {
            num_particles,
            side,
            positions,
            velocities,
            forces: [0.0, 0.0, 0.0, 1.0].repeat(num_particles as usize),
            indices: (0..num_particles).map(|i| i as f32).collect(),
        })
    }

    pub fn num_particles(&self) -> u32 {
        self.num_particles
    }

    pub fn side(&self) -> u32 {
        self.side
    }

    pub fn positions(&self) -> &[f32] {
        &self.positions
    }

    pub fn velocities(&self) -> &[f32] {
        &self.velocities
    }

    pub fn forces(&self) -> &[f32] {
        &self.forces
    }

    /// `[0, 1, ..., N-1]` as floats, the particle renderer's instance stream.
    pub fn indices(&self) -> &[f32] {
        &self.indices
    }
}
