//! Gravitational kernels
//!
//! CPU implementations of the two simulation kernels. They serve as the
//! reference the GPU shaders are checked against and as the compute path of
//! the CPU fallback backend. Each kernel is a data-parallel map over particle
//! indices (rayon); returning from the call is the completion barrier.

use crate::constants::SOFTENING;
use crate::particle::{Float4, ParticleBuffers};
use glam::Vec4;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Which particles contribute to the velocity of particle `gid`
#[repr(u32)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForceModel {
    /// Only indices `i < gid`. Particle 0 never accelerates. Not reciprocal.
    #[default]
    LowerIndex = 0,
    /// Every index `i != gid`, giving equal and opposite pair forces
    Symmetric = 1,
}

impl ForceModel {
    /// Exclusive upper bound of the source index loop for `gid`
    pub fn source_end(self, gid: usize, count: usize) -> usize {
        match self {
            Self::LowerIndex => gid,
            Self::Symmetric => count,
        }
    }
}

/// Velocity change that particle `other` imparts on `origin` over one step
///
/// `r = other - origin`, `f = dt / (|r| + SOFTENING)^3`, result `f * r`.
/// All four components take part, matching the shader's vec4 arithmetic.
#[inline]
pub fn pair_contribution(origin: Vec4, other: Vec4, dt: f32) -> Vec4 {
    let r = other - origin;
    let mut f = r.length() + SOFTENING;
    f *= f * f;
    f = dt / f;
    f * r
}

/// Accumulate pairwise gravity into `velocities`
pub fn update_velocity(
    positions: &[Float4],
    velocities: &mut [Float4],
    dt: f32,
    model: ForceModel,
) {
    debug_assert_eq!(positions.len(), velocities.len());
    let count = positions.len();

    velocities
        .par_iter_mut()
        .enumerate()
        .for_each(|(gid, velocity)| {
            let origin = Vec4::from_array(positions[gid]);
            let mut v = Vec4::from_array(*velocity);

            for (i, other) in positions[..model.source_end(gid, count)].iter().enumerate() {
                if i != gid {
                    v += pair_contribution(origin, Vec4::from_array(*other), dt);
                }
            }

            *velocity = v.to_array();
        });
}

/// Explicit Euler position update; `w` is left untouched
pub fn update_position(positions: &mut [Float4], velocities: &[Float4], dt: f32) {
    debug_assert_eq!(positions.len(), velocities.len());

    positions
        .par_iter_mut()
        .zip(velocities.par_iter())
        .for_each(|(position, velocity)| {
            for axis in 0..3 {
                position[axis] += dt * velocity[axis];
            }
        });
}

/// One full simulation step: velocity pass, barrier, position pass
pub fn step(buffers: &mut ParticleBuffers, dt: f32, model: ForceModel) {
    let (positions, velocities) = buffers.split_mut();
    update_velocity(positions, velocities, dt, model);
    update_position(positions, velocities, dt);
}
