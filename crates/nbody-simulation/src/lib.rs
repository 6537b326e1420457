//! # N-Body Simulation Engine
//!
//! Compute sessions that advance the particle state and hand the shared
//! position buffer back and forth between compute and graphics.

pub mod cpu;
pub mod driver;
pub mod error;
pub mod ownership;
pub mod params;
pub mod session;
pub mod simulation;

pub use cpu::*;
pub use driver::*;
pub use error::*;
pub use ownership::*;
pub use params::*;
pub use session::*;
pub use simulation::*;
