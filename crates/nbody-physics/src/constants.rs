//! Simulation constants

/// Default number of simulated bodies
pub const DEFAULT_PARTICLE_COUNT: u32 = 10_000;

/// Default integration timestep
pub const DEFAULT_TIMESTEP: f32 = 0.0001;

/// Added to every pairwise distance so coincident bodies never divide by zero
pub const SOFTENING: f32 = 0.001;

/// Initial positions are drawn uniformly from [-SPAWN_HALF_EXTENT, SPAWN_HALF_EXTENT] per axis
pub const SPAWN_HALF_EXTENT: f32 = 0.5;

/// Default seed for the fixed seed policy (the canonical Mersenne Twister default)
pub const DEFAULT_SEED: u64 = 5489;

/// Homogeneous coordinate stored in every position
pub const POSITION_W: f32 = 1.0;
