//! Result Types
//!
//! What a capture leaves behind for one draw, and the mesh description a
//! viewer needs to draw it.

use crate::decode::InstanceExtent;
use crate::desc::{IndexFormat, Topology};
use crate::device::{BufferHandle, GpuDevice};

/// Which captured stage a mesh is requested for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MeshStage {
    /// Output of the vertex shader
    VertexOut,
    /// Output of the last geometry or tessellation stage
    GeometryOut,
}

/// Captured output of one stage of one draw.
#[derive(Debug, Clone, PartialEq)]
pub struct StageResult {
    /// Empty on success, otherwise why there is no data
    pub status: String,
    /// CPU-visible copy of the captured records
    pub buffer: Option<BufferHandle>,
    /// Rebased index buffer for indexed vertex captures
    pub index_buffer: Option<BufferHandle>,
    pub index_format: Option<IndexFormat>,
    pub use_indices: bool,
    pub vertex_stride: u32,
    /// Bytes per instance for vertex captures of instanced draws
    pub instance_stride: u32,
    pub topology: Topology,
    pub num_verts: u32,
    /// The first field of every record is a float4 clip-space position
    pub has_position: bool,
    pub near_plane: f32,
    pub far_plane: f32,
    /// Per-instance extents of an incremental capture
    pub instances: Vec<InstanceExtent>,
}

impl Default for StageResult {
    fn default() -> Self {
        Self {
            status: String::new(),
            buffer: None,
            index_buffer: None,
            index_format: None,
            use_indices: false,
            vertex_stride: 0,
            instance_stride: 0,
            topology: Topology::Undefined,
            num_verts: 0,
            has_position: false,
            near_plane: 0.0,
            far_plane: 0.0,
            instances: Vec::new(),
        }
    }
}

impl StageResult {
    pub fn failed(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            ..Self::default()
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status.is_empty()
    }

    /// Release the device buffers this result owns.
    pub fn release<D: GpuDevice + ?Sized>(&mut self, device: &mut D) {
        if let Some(buffer) = self.buffer.take() {
            device.release_buffer(buffer);
        }
        if let Some(buffer) = self.index_buffer.take() {
            device.release_buffer(buffer);
        }
    }

    /// Mesh for one instance of this stage.
    pub fn mesh(&self, instance: u32) -> MeshDescriptor {
        let mut mesh = MeshDescriptor {
            vertex_buffer: self.buffer,
            vertex_byte_offset: u64::from(self.instance_stride) * u64::from(instance),
            vertex_byte_stride: self.vertex_stride,
            index_buffer: None,
            index_byte_stride: 0,
            topology: self.topology,
            num_indices: self.num_verts,
            component_count: 4,
            component_byte_width: 4,
            unproject: self.has_position,
            near_plane: self.near_plane,
            far_plane: self.far_plane,
            status: self.status.clone(),
        };

        if self.use_indices {
            if let (Some(buffer), Some(format)) = (self.index_buffer, self.index_format) {
                mesh.index_buffer = Some(buffer);
                mesh.index_byte_stride = format.width();
            }
        }

        if let Some(extent) = self.instances.get(instance as usize) {
            mesh.vertex_byte_offset = extent.byte_offset;
            mesh.num_indices = extent.vertex_count;
        }

        mesh
    }
}

/// Both captured stages of one draw.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PostVsData {
    pub vertex: StageResult,
    pub geometry: StageResult,
}

impl PostVsData {
    pub fn stage(&self, stage: MeshStage) -> &StageResult {
        match stage {
            MeshStage::VertexOut => &self.vertex,
            MeshStage::GeometryOut => &self.geometry,
        }
    }

    pub fn release<D: GpuDevice + ?Sized>(&mut self, device: &mut D) {
        self.vertex.release(device);
        self.geometry.release(device);
    }
}

/// Everything needed to draw a captured mesh.
#[derive(Debug, Clone, PartialEq)]
pub struct MeshDescriptor {
    pub vertex_buffer: Option<BufferHandle>,
    pub vertex_byte_offset: u64,
    pub vertex_byte_stride: u32,
    pub index_buffer: Option<BufferHandle>,
    pub index_byte_stride: u32,
    pub topology: Topology,
    pub num_indices: u32,
    /// Position format: float components per field
    pub component_count: u32,
    pub component_byte_width: u32,
    /// Positions are clip space and can be unprojected with the planes below
    pub unproject: bool,
    pub near_plane: f32,
    pub far_plane: f32,
    pub status: String,
}

impl MeshDescriptor {
    /// Mesh for a draw that was never captured.
    pub fn empty() -> Self {
        StageResult::default().mesh(0)
    }
}
