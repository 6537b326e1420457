//! # N-Body Renderer
//!
//! Graphics side of the simulation: allocates the vertex store that compute
//! imports as its position buffer and draws it as a point list.

pub mod camera;
pub mod renderer;

pub use camera::*;
pub use renderer::*;
