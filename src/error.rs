//! Error Module
//!
//! Every failure the engine can hit while capturing one draw. The `Display`
//! text doubles as the status string stored on the affected stage result.

use thiserror::Error;

/// HRESULT-style code for an allocation that the device refused.
pub const E_OUTOFMEMORY: u32 = 0x8007_000E;
/// HRESULT-style code for an invalid argument.
pub const E_INVALIDARG: u32 = 0x8007_0057;
/// HRESULT-style code for an unspecified failure.
pub const E_FAIL: u32 = 0x8000_4005;

/// A failed call into the device or resource manager.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{operation} failed: HRESULT 0x{code:08X}")]
pub struct DeviceError {
    pub operation: &'static str,
    pub code: u32,
}

impl DeviceError {
    pub fn new(operation: &'static str, code: u32) -> Self {
        Self { operation, code }
    }

    pub fn is_out_of_memory(&self) -> bool {
        self.code == E_OUTOFMEMORY
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CaptureError {
    // No capturable pipeline
    #[error("No pipeline bound")]
    NoPipeline,
    #[error("No graphics pipeline bound")]
    NotGraphics,
    #[error("No vertex shader in pipeline")]
    NoVertexShader,
    #[error("Empty drawcall (0 indices/vertices)")]
    NoIndices,
    #[error("Empty drawcall (0 instances)")]
    NoInstances,
    #[error("Shader {0} has no reflection data")]
    MissingReflection(u64),
    #[error("Root signature {0} could not be resolved")]
    MissingRootSignature(u64),

    // Resource exhaustion
    #[error("Stream-out buffer size {0} is close to or over 4GB")]
    CapacityGuard(u64),
    #[error("{stage} output generated {bytes} bytes of data which ran out of memory")]
    OutOfMemory { stage: &'static str, bytes: u64 },

    // Device failure
    #[error("Couldn't enable stream-out in root signature: {0}")]
    RootSignature(DeviceError),
    #[error("Couldn't create patched graphics pipeline: {0}")]
    Pipeline(DeviceError),
    #[error("Couldn't get stream-out statistics: {0}")]
    Statistics(DeviceError),
    #[error("Couldn't read back {stage} output data from GPU")]
    Readback { stage: &'static str },
    #[error("Couldn't submit capture work: {0}")]
    Submit(DeviceError),
    #[error(transparent)]
    Device(#[from] DeviceError),

    // Batch capture
    #[error("Replay failed: {0}")]
    Replay(String),
}

impl CaptureError {
    /// True for failures that come from running out of scratch memory.
    pub fn is_exhaustion(&self) -> bool {
        matches!(
            self,
            CaptureError::CapacityGuard(_) | CaptureError::OutOfMemory { .. }
        )
    }
}

pub type Result<T, E = CaptureError> = std::result::Result<T, E>;
