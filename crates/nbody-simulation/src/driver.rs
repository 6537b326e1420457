//! Per-frame orchestration: simulate (except on the first frame), then draw

use crate::error::SimulationError;
use crate::ownership::BufferOwner;
use crate::session::{FrameOutcome, Simulation};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePhase {
    /// Nothing drawn yet; the next frame shows the initial distribution
    Priming,
    Running,
}

#[derive(Debug)]
pub struct FrameDriver {
    phase: FramePhase,
    dt: f32,
    frames: u64,
    skipped: u64,
}

impl FrameDriver {
    pub fn new(dt: f32) -> Self {
        Self {
            phase: FramePhase::Priming,
            dt,
            frames: 0,
            skipped: 0,
        }
    }

    pub fn phase(&self) -> FramePhase {
        self.phase
    }

    pub fn timestep(&self) -> f32 {
        self.dt
    }

    /// Frames drawn so far
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Frames whose simulation step was dropped by the watchdog
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Run one frame. `draw` is called once the position buffer is back with graphics.
    pub fn frame<S, F, R>(
        &mut self,
        simulation: &mut S,
        draw: F,
    ) -> Result<(FrameOutcome, R), SimulationError>
    where
        S: Simulation,
        F: FnOnce(&S) -> R,
    {
        let outcome = match self.phase {
            FramePhase::Priming => FrameOutcome::Primed,
            FramePhase::Running => simulation.run_frame(self.dt)?,
        };

        if let FrameOutcome::Skipped { .. } = outcome {
            self.skipped += 1;
        }

        if simulation.owner() != BufferOwner::Graphics {
            return Err(SimulationError::Ownership {
                expected: BufferOwner::Graphics,
                actual: simulation.owner(),
            });
        }

        let drawn = draw(simulation);

        if self.phase == FramePhase::Priming {
            log::debug!("Priming frame drawn, simulation starts next frame");
            self.phase = FramePhase::Running;
        }
        self.frames += 1;

        Ok((outcome, drawn))
    }
}
