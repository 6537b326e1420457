//! Exclusive-access protocol for the shared position buffer
//!
//! The position buffer belongs to exactly one subsystem at a time. Graphics
//! holds it by default; compute takes it with `acquire` and hands it back with
//! `release`. These two transitions are the only way the owner changes.

use crate::error::SimulationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferOwner {
    /// Rasterizer may read it as vertex data
    Graphics,
    /// Kernels may read and write it
    Compute,
}

#[derive(Debug)]
pub struct BufferOwnership {
    owner: BufferOwner,
    handoffs: u64,
}

impl Default for BufferOwnership {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferOwnership {
    pub fn new() -> Self {
        Self {
            owner: BufferOwner::Graphics,
            handoffs: 0,
        }
    }

    pub fn owner(&self) -> BufferOwner {
        self.owner
    }

    /// Completed acquire/release round trips
    pub fn handoffs(&self) -> u64 {
        self.handoffs
    }

    /// Graphics -> Compute. Acquiring twice is a pairing violation.
    pub fn acquire(&mut self) -> Result<(), SimulationError> {
        self.require(BufferOwner::Graphics)?;
        self.owner = BufferOwner::Compute;
        Ok(())
    }

    /// Compute -> Graphics. Releasing without an acquire is a pairing violation.
    pub fn release(&mut self) -> Result<(), SimulationError> {
        self.require(BufferOwner::Compute)?;
        self.owner = BufferOwner::Graphics;
        self.handoffs += 1;
        Ok(())
    }

    pub fn require(&self, expected: BufferOwner) -> Result<(), SimulationError> {
        if self.owner == expected {
            Ok(())
        } else {
            Err(SimulationError::Ownership {
                expected,
                actual: self.owner,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_with_graphics() {
        let ownership = BufferOwnership::new();
        assert_eq!(ownership.owner(), BufferOwner::Graphics);
        assert_eq!(ownership.handoffs(), 0);
    }

    #[test]
    fn test_round_trip() {
        let mut ownership = BufferOwnership::new();
        ownership.acquire().unwrap();
        assert_eq!(ownership.owner(), BufferOwner::Compute);
        ownership.release().unwrap();
        assert_eq!(ownership.owner(), BufferOwner::Graphics);
        assert_eq!(ownership.handoffs(), 1);
    }

    #[test]
    fn test_nested_acquire_rejected() {
        let mut ownership = BufferOwnership::new();
        ownership.acquire().unwrap();
        let err = ownership.acquire().unwrap_err();
        assert!(matches!(
            err,
            SimulationError::Ownership {
                expected: BufferOwner::Graphics,
                actual: BufferOwner::Compute,
            }
        ));
        assert_eq!(ownership.owner(), BufferOwner::Compute);
    }

    #[test]
    fn test_release_without_acquire_rejected() {
        let mut ownership = BufferOwnership::new();
        assert!(ownership.release().is_err());
        assert_eq!(ownership.owner(), BufferOwner::Graphics);
        assert_eq!(ownership.handoffs(), 0);
    }
}
