//! Simulation and configuration errors

use crate::ownership::BufferOwner;
use crate::session::Kernel;
use thiserror::Error;

/// Errors raised while creating or driving a simulation session.
///
/// Every variant is fatal for the session: startup variants abort before the
/// frame loop, runtime variants end it. Watchdog expiry is not an error; it
/// surfaces as [`crate::FrameOutcome::Skipped`].
#[derive(Error, Debug)]
pub enum SimulationError {
    /// No adapter could be found.
    #[error("No compatible compute adapter: {0}")]
    AdapterRequest(#[from] wgpu::RequestAdapterError),

    /// The adapter refused to create a device.
    #[error("Failed to request device: {0}")]
    DeviceRequest(#[from] wgpu::RequestDeviceError),

    /// Kernel source failed to compile or link for the device.
    #[error("Compute program failed to build: {0}")]
    ProgramBuild(String),

    /// The graphics-side vertex store is unusable as a compute buffer.
    #[error("Cannot import position buffer into compute: {0}")]
    SharedBufferImport(String),

    /// Position and velocity arrays disagree in length.
    #[error("Buffer length mismatch: {positions} positions, {velocities} velocities")]
    LengthMismatch { positions: usize, velocities: usize },

    /// More particles than a `u32` kernel index can address.
    #[error("{0} particles exceed the u32 index range")]
    TooManyParticles(usize),

    /// Acquire/release pairing was violated.
    #[error("Position buffer is owned by {actual:?}, expected {expected:?}")]
    Ownership {
        expected: BufferOwner,
        actual: BufferOwner,
    },

    /// The device reported a fault while a kernel ran.
    #[error("Device fault during {kernel}: {reason}")]
    DeviceFault { kernel: Kernel, reason: String },

    /// Waiting for outstanding graphics work failed.
    #[error("Device wait failed: {0}")]
    DeviceWait(String),

    /// Copying a buffer back to the host failed.
    #[error("Buffer readback failed: {0}")]
    Readback(String),
}

/// Errors raised while loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}
