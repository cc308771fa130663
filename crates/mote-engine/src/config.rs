//! Simulation configuration.

use crate::error::ConfigError;

/// Largest accepted particle exponent (`2^24` particles, 4096² textures).
pub const MAX_EXPONENT: u32 = 24;

pub const DEFAULT_EXPONENT: u32 = 10;
pub const DEFAULT_TIME_STEP: f32 = 0.01;
pub const DEFAULT_PARTICLE_SIZE: f32 = 0.15;

/// Half-open `[min, max)` range.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Bounds {
    pub min: f32,
    pub max: f32,
}

impl Bounds {
    pub const fn new(min: f32, max: f32) -> Self {
        Self { min, max }
    }

    pub fn span(&self) -> f32 {
        self.max - self.min
    }

    fn validate(&self, name: &'static str) -> Result<(), ConfigError> {
        if self.min.is_finite() && self.max.is_finite() && self.min < self.max {
            Ok(())
        } else {
            Err(ConfigError::InvalidBounds {
                name,
                min: self.min,
                max: self.max,
            })
        }
    }
}

/// Initialization inputs of a simulation.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationConfig {
    /// `num_particles = 2^exponent`; must be even.
    pub exponent: u32,
    /// Spawn volume parameters; see [`crate::state::ParticleState::initialize`].
    pub grid_bounds: Bounds,
    /// Per-component initial velocity range.
    pub velocity_bounds: Bounds,
    pub time_step: f32,
    /// Particle diameter.
    pub particle_size: f32,
    /// RNG seed. `None` draws one from the OS.
    pub seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            exponent: DEFAULT_EXPONENT,
            grid_bounds: Bounds::new(1.0, 2.0),
            velocity_bounds: Bounds::new(-1.0, 1.0),
            time_step: DEFAULT_TIME_STEP,
            particle_size: DEFAULT_PARTICLE_SIZE,
            seed: None,
        }
    }
}

impl SimulationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        texture_side(self.exponent)?;
        validate_time_step(self.time_step)?;
        if !(self.particle_size.is_finite() && self.particle_size > 0.0) {
            return Err(ConfigError::InvalidDiameter(self.particle_size));
        }
        self.grid_bounds.validate("grid")?;
        self.velocity_bounds.validate("velocity")?;
        Ok(())
    }
}

/// Side length of the square state textures for `2^exponent` particles.
pub fn texture_side(exponent: u32) -> Result<u32, ConfigError> {
    if exponent % 2 != 0 {
        return Err(ConfigError::OddExponent(exponent));
    }
    if exponent > MAX_EXPONENT {
        return Err(ConfigError::ExponentOutOfRange {
            exponent,
            max: MAX_EXPONENT,
        });
    }
    Ok(1 << (exponent / 2))
}

pub fn validate_time_step(dt: f32) -> Result<f32, ConfigError> {
    if dt.is_finite() && dt > 0.0 {
        Ok(dt)
    } else {
        Err(ConfigError::NonPositiveTimeStep(dt))
    }
}

/// Per-frame parameters fed to the stage programs.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct SimulationParams {
    pub time_step: f32,
    pub particle_size: f32,
    pub num_particles: u32,
    pub tex_side_length: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn even_exponents_give_integer_sides() {
        assert_eq!(texture_side(0), Ok(1));
        assert_eq!(texture_side(10), Ok(32));
        assert_eq!(texture_side(MAX_EXPONENT), Ok(4096));
    }

    #[test]
    fn odd_exponent_is_rejected() {
        assert_eq!(texture_side(9), Err(ConfigError::OddExponent(9)));
    }

    #[test]
    fn exponent_above_max_is_rejected() {
        assert!(matches!(
            texture_side(MAX_EXPONENT + 2),
            Err(ConfigError::ExponentOutOfRange { .. })
        ));
    }

    #[test]
    fn time_step_must_be_positive_and_finite() {
        assert!(validate_time_step(0.01).is_ok());
        for dt in [0.0, -0.01, f32::NAN, f32::INFINITY] {
            assert!(validate_time_step(dt).is_err(), "{dt} accepted");
        }
    }

    #[test]
    fn defaults_validate() {
        assert_eq!(SimulationConfig::default().validate(), Ok(()));
    }

    #[test]
    fn empty_bounds_are_rejected() {
        let config = SimulationConfig {
            velocity_bounds: Bounds::new(1.0, 1.0),
            ..SimulationConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidBounds { name: "velocity", .. })
        ));
    }

    #[test]
    fn zero_diameter_is_rejected() {
        let config = SimulationConfig {
            particle_size: 0.0,
            ..SimulationConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::InvalidDiameter(0.0)));
    }
}
