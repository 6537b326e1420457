//! Particle storage for the N-body simulation
//!
//! A particle is an index into two parallel arrays of 4-component vectors.
//! Positions carry `w = 1.0` so they can be bound directly as vertex data;
//! velocities keep `w = 0.0`.

use crate::constants::{DEFAULT_SEED, POSITION_W, SPAWN_HALF_EXTENT};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// GPU-compatible vec4<f32>, 16 bytes with no padding
pub type Float4 = [f32; 4];

/// Size in bytes of one position or velocity element
pub const FLOAT4_SIZE: u64 = std::mem::size_of::<Float4>() as u64;

/// How initial positions are randomized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeedPolicy {
    /// Same distribution on every run
    Fixed(u64),
    /// Seeded from the operating system
    Entropy,
}

impl Default for SeedPolicy {
    fn default() -> Self {
        Self::Fixed(DEFAULT_SEED)
    }
}

impl SeedPolicy {
    fn rng(self) -> StdRng {
        match self {
            Self::Fixed(seed) => StdRng::seed_from_u64(seed),
            Self::Entropy => StdRng::from_os_rng(),
        }
    }
}

/// Parallel position and velocity arrays, always the same length
#[derive(Debug, Clone, PartialEq)]
pub struct ParticleBuffers {
    positions: Vec<Float4>,
    velocities: Vec<Float4>,
}

impl ParticleBuffers {
    /// Allocate `count` particles with positions uniform in the spawn cube and zero velocity
    pub fn initialize(count: usize, seed: SeedPolicy) -> Self {
        let mut rng = seed.rng();
        let range = -SPAWN_HALF_EXTENT..=SPAWN_HALF_EXTENT;

        let positions = (0..count)
            .map(|_| {
                [
                    rng.random_range(range.clone()),
                    rng.random_range(range.clone()),
                    rng.random_range(range.clone()),
                    POSITION_W,
                ]
            })
            .collect();

        Self {
            positions,
            velocities: vec![[0.0; 4]; count],
        }
    }

    /// Build from explicit arrays. Returns `None` when the lengths differ.
    pub fn from_parts(positions: Vec<Float4>, velocities: Vec<Float4>) -> Option<Self> {
        (positions.len() == velocities.len()).then_some(Self {
            positions,
            velocities,
        })
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn positions(&self) -> &[Float4] {
        &self.positions
    }

    pub fn velocities(&self) -> &[Float4] {
        &self.velocities
    }

    /// Split borrow for kernels that read one array and write the other
    pub fn split_mut(&mut self) -> (&mut [Float4], &mut [Float4]) {
        (&mut self.positions, &mut self.velocities)
    }

    /// True when no component of either array is NaN or infinite
    pub fn is_finite(&self) -> bool {
        self.positions
            .iter()
            .chain(self.velocities.iter())
            .flatten()
            .all(|c| c.is_finite())
    }

    pub fn into_parts(self) -> (Vec<Float4>, Vec<Float4>) {
        (self.positions, self.velocities)
    }
}
