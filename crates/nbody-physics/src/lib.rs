//! # N-Body Physics
//!
//! Particle data model, constants and CPU reference kernels for the
//! gravitational N-body simulation. The GPU kernels in `nbody-simulation`
//! mirror the routines in [`forces`] one-to-one.

pub mod constants;
pub mod forces;
pub mod particle;

pub use constants::*;
pub use forces::*;
pub use particle::*;
