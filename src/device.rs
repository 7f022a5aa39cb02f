//! Device Module
//!
//! The capture engine never owns a GPU. It talks to the host's device and
//! resource manager through the traits here, and hands work to the device as
//! recorded command lists.

use std::ops::{Deref, DerefMut, Range};

use tracing::trace;

use crate::desc::{
    HeapKind, IndexFormat, PipelineDesc, PipelineState, ResourceId, ResourceState,
    RootSignatureDesc, ShaderReflection, Topology,
};
use crate::error::DeviceError;
use crate::replay::RenderState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryHeapHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PipelineHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RootSignatureHandle(pub u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferDesc {
    pub size: u64,
    pub heap: HeapKind,
    /// Needed to clear the stream-out counter through a UAV
    pub allow_unordered_access: bool,
    pub name: String,
}

impl BufferDesc {
    pub fn new(size: u64, heap: HeapKind, name: impl Into<String>) -> Self {
        Self {
            size,
            heap,
            allow_unordered_access: false,
            name: name.into(),
        }
    }
}

// =============================================================================
// Command lists
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexBufferView {
    pub buffer: BufferHandle,
    pub format: IndexFormat,
    pub size: u64,
}

/// Stream-output target: records land at `offset`, the running byte count
/// lives at `filled_size_offset` in the same buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamOutputView {
    pub buffer: BufferHandle,
    pub offset: u64,
    pub size: u64,
    pub filled_size_offset: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DrawArgs {
    pub vertex_count: u32,
    pub instance_count: u32,
    pub start_vertex: u32,
    pub start_instance: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DrawIndexedArgs {
    pub index_count: u32,
    pub instance_count: u32,
    pub start_index: u32,
    pub base_vertex: i32,
    pub start_instance: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Re-apply the application's render state as it was at the draw
    ApplyRenderState(Box<RenderState>),
    SetPipeline(PipelineHandle),
    SetRootSignature(RootSignatureHandle),
    /// Re-bind the application's root arguments against the current signature
    ApplyRootElements,
    SetIndexBuffer(IndexBufferView),
    SetTopology(Topology),
    SetStreamOutput(StreamOutputView),
    Draw(DrawArgs),
    DrawIndexed(DrawIndexedArgs),
    BeginStatistics {
        heap: QueryHeapHandle,
        slot: u32,
    },
    EndStatistics {
        heap: QueryHeapHandle,
        slot: u32,
    },
    ResolveStatistics {
        heap: QueryHeapHandle,
        slot: u32,
        dest: BufferHandle,
        dest_offset: u64,
    },
    Barrier {
        buffer: BufferHandle,
        before: ResourceState,
        after: ResourceState,
    },
    CopyBuffer {
        dest: BufferHandle,
        source: BufferHandle,
    },
    Discard(BufferHandle),
    ClearCounters {
        buffer: BufferHandle,
        bytes: u64,
    },
}

/// A list of commands waiting for submission.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandList {
    commands: Vec<Command>,
}

impl CommandList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, command: Command) {
        trace!("record {:?}", command);
        self.commands.push(command);
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

// =============================================================================
// Collaborator traits
// =============================================================================

/// Object creation, submission and readback on the replay device.
pub trait GpuDevice {
    fn create_buffer(&mut self, desc: &BufferDesc) -> Result<BufferHandle, DeviceError>;
    fn release_buffer(&mut self, buffer: BufferHandle);

    fn create_query_heap(&mut self, slots: u32) -> Result<QueryHeapHandle, DeviceError>;
    fn release_query_heap(&mut self, heap: QueryHeapHandle);

    fn create_root_signature(
        &mut self,
        desc: &RootSignatureDesc,
    ) -> Result<RootSignatureHandle, DeviceError>;
    fn release_root_signature(&mut self, signature: RootSignatureHandle);

    fn create_pipeline(&mut self, desc: &PipelineDesc) -> Result<PipelineHandle, DeviceError>;
    fn release_pipeline(&mut self, pipeline: PipelineHandle);

    /// Write CPU bytes into a CPU-visible buffer.
    fn fill_buffer(
        &mut self,
        buffer: BufferHandle,
        offset: u64,
        data: &[u8],
    ) -> Result<(), DeviceError>;

    fn map(&mut self, buffer: BufferHandle, range: Range<u64>) -> Result<(), DeviceError>;
    /// The currently mapped range of `buffer`, if any.
    fn mapped_bytes(&self, buffer: BufferHandle) -> Option<&[u8]>;
    fn unmap(&mut self, buffer: BufferHandle);

    fn execute(&mut self, list: CommandList) -> Result<(), DeviceError>;
    /// Block until the GPU is idle.
    fn gpu_sync(&mut self);

    /// While enabled, allocation failures are reported as errors instead of
    /// being treated as a lost device.
    fn set_oom_handling(&mut self, enabled: bool);
}

/// Resolution of application objects recorded in the captured frame.
pub trait ResourceManager {
    fn pipeline_state(&self, id: ResourceId) -> Option<PipelineState>;
    fn root_signature(&self, id: ResourceId) -> Option<RootSignatureDesc>;
    fn shader_reflection(&self, id: ResourceId) -> Option<ShaderReflection>;
    fn buffer_data(
        &mut self,
        id: ResourceId,
        offset: u64,
        len: u64,
    ) -> Result<Vec<u8>, DeviceError>;
}

/// Everything a per-draw capture needs from the replay side.
pub trait ReplayDevice: GpuDevice + ResourceManager {}

impl<T: GpuDevice + ResourceManager + ?Sized> ReplayDevice for T {}

// =============================================================================
// Scoped capabilities
// =============================================================================

/// Out-of-memory-as-failure handling for as long as the scope lives. All
/// device access during a capture goes through the scope.
pub struct OomScope<'a, D: GpuDevice + ?Sized> {
    device: &'a mut D,
}

impl<'a, D: GpuDevice + ?Sized> OomScope<'a, D> {
    pub fn acquire(device: &'a mut D) -> Self {
        device.set_oom_handling(true);
        Self { device }
    }
}

impl<D: GpuDevice + ?Sized> Deref for OomScope<'_, D> {
    type Target = D;

    fn deref(&self) -> &D {
        self.device
    }
}

impl<D: GpuDevice + ?Sized> DerefMut for OomScope<'_, D> {
    fn deref_mut(&mut self) -> &mut D {
        self.device
    }
}

impl<D: GpuDevice + ?Sized> Drop for OomScope<'_, D> {
    fn drop(&mut self) {
        self.device.set_oom_handling(false);
    }
}

/// A mapped buffer range, unmapped on drop.
pub struct MappedRange<'a, D: GpuDevice + ?Sized> {
    device: &'a mut D,
    buffer: BufferHandle,
}

impl<'a, D: GpuDevice + ?Sized> MappedRange<'a, D> {
    pub fn map(
        device: &'a mut D,
        buffer: BufferHandle,
        range: Range<u64>,
    ) -> Result<Self, DeviceError> {
        device.map(buffer, range)?;
        Ok(Self { device, buffer })
    }

    pub fn bytes(&self) -> &[u8] {
        self.device.mapped_bytes(self.buffer).unwrap_or(&[])
    }
}

impl<D: GpuDevice + ?Sized> Drop for MappedRange<'_, D> {
    fn drop(&mut self) {
        self.device.unmap(self.buffer);
    }
}
