//! CPU fallback session
//!
//! Runs the reference kernels with rayon over host arrays. The handoff
//! protocol is enforced exactly as on the GPU so the frame driver cannot tell
//! the backends apart.

use crate::error::SimulationError;
use crate::ownership::{BufferOwner, BufferOwnership};
use crate::params::SimulationConfig;
use crate::session::{Completion, Kernel, Simulation};
use nbody_physics::{forces, Float4, ForceModel, ParticleBuffers};

pub struct CpuSimulation {
    buffers: ParticleBuffers,
    ownership: BufferOwnership,
    force_model: ForceModel,
    particle_count: u32,
}

impl CpuSimulation {
    /// Fails when the arrays hold more particles than a `u32` index can address
    pub fn new(buffers: ParticleBuffers, force_model: ForceModel) -> Result<Self, SimulationError> {
        let particle_count = checked_particle_count(buffers.len())?;
        log::info!(
            "CPU simulation with {} particles ({} threads)",
            particle_count,
            rayon::current_num_threads()
        );
        Ok(Self {
            buffers,
            ownership: BufferOwnership::new(),
            force_model,
            particle_count,
        })
    }

    pub fn from_config(config: &SimulationConfig) -> Result<Self, SimulationError> {
        let buffers = ParticleBuffers::initialize(config.particle_count as usize, config.seed);
        Self::new(buffers, config.force_model)
    }

    /// Build a session from host arrays, which must be the same length
    pub fn from_arrays(
        positions: Vec<Float4>,
        velocities: Vec<Float4>,
        force_model: ForceModel,
    ) -> Result<Self, SimulationError> {
        let (p, v) = (positions.len(), velocities.len());
        let buffers = ParticleBuffers::from_parts(positions, velocities).ok_or(
            SimulationError::LengthMismatch {
                positions: p,
                velocities: v,
            },
        )?;
        Self::new(buffers, force_model)
    }

    /// Positions as vertex data. Only legal while graphics owns the buffer.
    pub fn positions(&self) -> Result<&[Float4], SimulationError> {
        self.ownership.require(BufferOwner::Graphics)?;
        Ok(self.buffers.positions())
    }

    pub fn velocities(&self) -> &[Float4] {
        self.buffers.velocities()
    }

    pub fn buffers(&self) -> &ParticleBuffers {
        &self.buffers
    }

    pub fn handoffs(&self) -> u64 {
        self.ownership.handoffs()
    }
}

impl Simulation for CpuSimulation {
    fn particle_count(&self) -> u32 {
        self.particle_count
    }

    fn owner(&self) -> BufferOwner {
        self.ownership.owner()
    }

    fn acquire(&mut self) -> Result<(), SimulationError> {
        self.ownership.acquire()
    }

    fn release(&mut self) -> Result<(), SimulationError> {
        self.ownership.release()
    }

    fn dispatch(&mut self, kernel: Kernel, dt: f32) -> Result<Completion, SimulationError> {
        self.ownership.require(BufferOwner::Compute)?;

        let (positions, velocities) = self.buffers.split_mut();
        match kernel {
            Kernel::UpdateVelocity => {
                forces::update_velocity(positions, velocities, dt, self.force_model)
            }
            Kernel::UpdatePosition => forces::update_position(positions, velocities, dt),
        }
        Ok(Completion::Done)
    }
}

fn checked_particle_count(len: usize) -> Result<u32, SimulationError> {
    u32::try_from(len).map_err(|_| SimulationError::TooManyParticles(len))
}
