//! Post-transform vertex capture
//!
//! Captures what the vertex, geometry and tessellation stages produced for
//! one recorded draw by replaying it with stream output enabled:
//! 1. Patches the draw's pipeline to stream its last stage into a scratch buffer
//! 2. Rebases indexed draws so only referenced vertices are captured
//! 3. Probes and grows the scratch pool until expanding stages fit
//! 4. Reads the records back and infers the projection's near/far planes
//! 5. Caches the results per draw, with aliasing of identical draws

pub mod cache;
pub mod config;
pub mod decl;
pub mod decode;
pub mod desc;
pub mod device;
pub mod engine;
pub mod error;
pub mod executor;
pub mod patch;
pub mod probe;
pub mod rebase;
pub mod replay;
pub mod result;
pub mod scratch;

#[cfg(test)]
mod mock;

pub use config::CaptureConfig;
pub use device::{GpuDevice, ReplayDevice, ResourceManager};
pub use engine::PostVsEngine;
pub use error::{CaptureError, DeviceError};
pub use replay::{CaptureRequest, DrawCallback, DrawId, ReplayController};
pub use result::{MeshDescriptor, MeshStage, StageResult};
