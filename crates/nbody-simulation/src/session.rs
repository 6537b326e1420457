//! Session protocol shared by the GPU and CPU backends

use crate::error::SimulationError;
use crate::ownership::BufferOwner;
use std::fmt;

/// The two kernels of the compiled program
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kernel {
    UpdateVelocity,
    UpdatePosition,
}

impl Kernel {
    /// Launch order within one frame
    pub const FRAME_ORDER: [Kernel; 2] = [Kernel::UpdateVelocity, Kernel::UpdatePosition];

    /// WGSL entry point name
    pub fn entry_point(self) -> &'static str {
        match self {
            Self::UpdateVelocity => "update_velocity",
            Self::UpdatePosition => "update_position",
        }
    }
}

impl fmt::Display for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.entry_point())
    }
}

/// Result of waiting on one dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Done,
    /// The watchdog expired before the device finished
    TimedOut,
}

/// What a frame did to the simulation state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// First frame: drawn without simulating
    Primed,
    /// Both kernels completed
    Simulated,
    /// A device wait timed out; the frame is dropped and drawing proceeds
    Skipped { kernel: Kernel },
}

/// A compute session owning the particle buffers and the handoff protocol
pub trait Simulation {
    fn particle_count(&self) -> u32;

    /// Current holder of the position buffer
    fn owner(&self) -> BufferOwner;

    /// Take the position buffer for compute, blocking until graphics is done with it
    fn acquire(&mut self) -> Result<(), SimulationError>;

    /// Hand the position buffer back to graphics
    fn release(&mut self) -> Result<(), SimulationError>;

    /// Launch `kernel` over every particle index and block until it completes.
    /// Requires compute ownership.
    fn dispatch(&mut self, kernel: Kernel, dt: f32) -> Result<Completion, SimulationError>;

    /// Acquire, run both kernels with a full barrier between them, release.
    ///
    /// An `Err` is fatal: the buffer is not released, so the session is left
    /// owned by compute and must not be driven further.
    fn run_frame(&mut self, dt: f32) -> Result<FrameOutcome, SimulationError> {
        self.acquire()?;

        let mut outcome = FrameOutcome::Simulated;
        for kernel in Kernel::FRAME_ORDER {
            if self.dispatch(kernel, dt)? == Completion::TimedOut {
                log::warn!("{} exceeded the device watchdog, skipping frame", kernel);
                outcome = FrameOutcome::Skipped { kernel };
                break;
            }
        }

        self.release()?;
        Ok(outcome)
    }
}
