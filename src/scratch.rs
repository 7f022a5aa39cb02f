//! Scratch Buffer Pool
//!
//! Owns the stream-output target, its CPU-readable staging copy, the
//! worst-case patched index buffer and the statistics query heap. The pool
//! is recreated wholesale whenever more space is needed; its capacity only
//! ever grows within a session.

use tracing::{debug, error, info, warn};

use crate::config::CaptureConfig;
use crate::desc::{align_up, HeapKind, COUNTER_BYTES, VEC4F_BYTES};
use crate::device::{BufferDesc, BufferHandle, GpuDevice, QueryHeapHandle};
use crate::error::{CaptureError, DeviceError, Result};

/// Live objects of the pool at its current capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScratchBuffers {
    /// GPU stream-output target, `capacity + COUNTER_BYTES` long
    pub output: BufferHandle,
    /// Readback copy of `output`
    pub staging: BufferHandle,
    /// Holds unique vertex indices, one u32 per float4 of capacity
    pub patched_index: BufferHandle,
    pub query_heap: QueryHeapHandle,
}

#[derive(Debug, Default)]
pub struct ScratchPool {
    capacity: u64,
    buffers: Option<ScratchBuffers>,
}

/// Capacity to recreate the pool at. At least double the current size and
/// at least `required`; doubling continues up to the configured limit after
/// which the requirement is rounded up to the growth granule.
pub fn grow_capacity(current: u64, required: u64, config: &CaptureConfig) -> u64 {
    let mut size = if current == 0 {
        config.initial_capacity.max(1)
    } else {
        current.saturating_mul(2)
    };

    while size < required && size < config.doubling_limit {
        size = size.saturating_mul(2);
    }

    if size < required {
        size = align_up(required, config.growth_granule.max(1));
    }

    size
}

impl ScratchPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn buffers(&self) -> Option<ScratchBuffers> {
        self.buffers
    }

    /// Make sure the pool holds at least `required` bytes. Returns whether
    /// the pool was recreated. On failure the pool is left empty with zero
    /// capacity; the next request starts over from the initial size.
    pub fn ensure_capacity<D: GpuDevice + ?Sized>(
        &mut self,
        device: &mut D,
        required: u64,
        stage: &'static str,
        config: &CaptureConfig,
    ) -> Result<bool> {
        if self.buffers.is_some() && self.capacity >= required {
            return Ok(false);
        }

        let old = self.capacity;
        let new = grow_capacity(old, required, config);
        if self.buffers.is_some() {
            warn!("Resizing stream-out buffer from {} to {} for {} output", old, new, stage);
        } else {
            info!("Creating stream-out buffers with capacity {}", new);
        }

        // in-flight work may still reference the old objects
        device.gpu_sync();
        self.release(device);

        if new >= config.capacity_guard {
            error!(
                "Stream-out buffer size {} is close to or over 4GB, out of memory very likely so skipping",
                new
            );
            return Err(CaptureError::CapacityGuard(new));
        }

        match Self::create(device, new, config) {
            Ok(buffers) => {
                self.buffers = Some(buffers);
                self.capacity = new;
                Ok(true)
            }
            Err(e) => {
                error!("Failed to create stream-out buffers: {}", e);
                Err(CaptureError::OutOfMemory { stage, bytes: new })
            }
        }
    }

    /// [`ensure_capacity`](Self::ensure_capacity), then the live objects.
    pub fn acquire<D: GpuDevice + ?Sized>(
        &mut self,
        device: &mut D,
        required: u64,
        stage: &'static str,
        config: &CaptureConfig,
    ) -> Result<ScratchBuffers> {
        self.ensure_capacity(device, required, stage, config)?;
        self.buffers.ok_or(CaptureError::OutOfMemory {
            stage,
            bytes: required,
        })
    }

    fn create<D: GpuDevice + ?Sized>(
        device: &mut D,
        capacity: u64,
        config: &CaptureConfig,
    ) -> std::result::Result<ScratchBuffers, DeviceError> {
        let mut output_desc = BufferDesc::new(
            capacity + COUNTER_BYTES,
            HeapKind::Default,
            "m_SOBuffer",
        );
        output_desc.allow_unordered_access = true;
        let output = device.create_buffer(&output_desc)?;

        let staging_desc = BufferDesc::new(
            capacity + COUNTER_BYTES,
            HeapKind::Readback,
            "m_SOStagingBuffer",
        );
        let staging = match device.create_buffer(&staging_desc) {
            Ok(b) => b,
            Err(e) => {
                device.release_buffer(output);
                return Err(e);
            }
        };

        // worst case: every vertex unique, one float4 each
        let index_desc = BufferDesc::new(
            capacity / VEC4F_BYTES,
            HeapKind::Upload,
            "m_SOPatchedIndexBuffer",
        );
        let patched_index = match device.create_buffer(&index_desc) {
            Ok(b) => b,
            Err(e) => {
                device.release_buffer(staging);
                device.release_buffer(output);
                return Err(e);
            }
        };

        let query_heap = match device.create_query_heap(config.query_slots) {
            Ok(h) => h,
            Err(e) => {
                device.release_buffer(patched_index);
                device.release_buffer(staging);
                device.release_buffer(output);
                return Err(e);
            }
        };

        debug!("Stream-out buffers created: {:?}", output);

        Ok(ScratchBuffers {
            output,
            staging,
            patched_index,
            query_heap,
        })
    }

    /// Release every pool object. The caller guarantees the GPU is idle.
    pub fn release<D: GpuDevice + ?Sized>(&mut self, device: &mut D) {
        if let Some(buffers) = self.buffers.take() {
            device.release_buffer(buffers.output);
            device.release_buffer(buffers.staging);
            device.release_buffer(buffers.patched_index);
            device.release_query_heap(buffers.query_heap);
        }
        self.capacity = 0;
    }
}
