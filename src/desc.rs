//! Pipeline Description Types
//!
//! Plain-data descriptions of pipelines, root signatures and shader output
//! signatures, plus the fixed layouts read back from the GPU. These mirror
//! the D3D12 structures the capture pass patches.

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};

use crate::device::RootSignatureHandle;

/// Opaque identifier of an application resource (pipeline, shader, buffer).
pub type ResourceId = u64;

/// Bytes reserved at the start of the capture buffer for the filled-size
/// counter.
pub const COUNTER_BYTES: u64 = 64;

/// Size of one filled-size counter slot.
pub const COUNTER_SLOT_BYTES: u64 = std::mem::size_of::<u64>() as u64;

/// Number of render target slots in a pipeline description.
pub const RENDER_TARGET_SLOTS: usize = 8;

pub const FORMAT_UNKNOWN: u32 = 0;

// =============================================================================
// Topology
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Topology {
    #[default]
    Undefined,
    PointList,
    LineList,
    LineStrip,
    TriangleList,
    TriangleStrip,
    LineListAdj,
    LineStripAdj,
    TriangleListAdj,
    TriangleStripAdj,
    PatchList(u8),
}

/// Topology class a pipeline is compiled against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TopologyType {
    #[default]
    Undefined,
    Point,
    Line,
    Triangle,
    Patch,
}

impl Topology {
    pub fn topology_type(self) -> TopologyType {
        match self {
            Topology::Undefined => TopologyType::Undefined,
            Topology::PointList => TopologyType::Point,
            Topology::LineList
            | Topology::LineStrip
            | Topology::LineListAdj
            | Topology::LineStripAdj => TopologyType::Line,
            Topology::TriangleList
            | Topology::TriangleStrip
            | Topology::TriangleListAdj
            | Topology::TriangleStripAdj => TopologyType::Triangle,
            Topology::PatchList(_) => TopologyType::Patch,
        }
    }

    /// Stream output writes strips as lists.
    pub fn expanded(self) -> Topology {
        match self {
            Topology::TriangleStrip => Topology::TriangleList,
            Topology::LineStrip => Topology::LineList,
            Topology::TriangleStripAdj => Topology::TriangleListAdj,
            Topology::LineStripAdj => Topology::LineListAdj,
            other => other,
        }
    }

    /// Vertices stored per primitive when this topology is streamed out.
    pub fn stream_out_vertices_per_primitive(self) -> u64 {
        match self.topology_type() {
            TopologyType::Point => 1,
            TopologyType::Line => 2,
            _ => 3,
        }
    }
}

// =============================================================================
// Index buffers
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexFormat {
    Uint16,
    Uint32,
}

impl IndexFormat {
    pub fn from_width(width: u32) -> Option<Self> {
        match width {
            2 => Some(IndexFormat::Uint16),
            4 => Some(IndexFormat::Uint32),
            _ => None,
        }
    }

    pub fn width(self) -> u32 {
        match self {
            IndexFormat::Uint16 => 2,
            IndexFormat::Uint32 => 4,
        }
    }
}

/// Primitive restart configuration of a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StripCut {
    #[default]
    Disabled,
    Cut16,
    Cut32,
}

impl StripCut {
    pub fn sentinel(self) -> Option<u32> {
        match self {
            StripCut::Disabled => None,
            StripCut::Cut16 => Some(0xFFFF),
            StripCut::Cut32 => Some(0xFFFF_FFFF),
        }
    }
}

// =============================================================================
// Shader reflection
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SystemValue {
    #[default]
    Undefined,
    Position,
    ClipDistance,
    CullDistance,
    RenderTargetArrayIndex,
    ViewportArrayIndex,
    VertexId,
    PrimitiveId,
    InstanceId,
}

/// One entry of a shader's output signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureElement {
    pub semantic_name: String,
    pub semantic_index: u32,
    pub component_count: u8,
    pub system_value: SystemValue,
    pub stream: u32,
}

impl SignatureElement {
    pub fn new(semantic_name: &str, semantic_index: u32, component_count: u8) -> Self {
        Self {
            semantic_name: semantic_name.to_string(),
            semantic_index,
            component_count,
            system_value: SystemValue::Undefined,
            stream: 0,
        }
    }

    pub fn position(semantic_name: &str, component_count: u8) -> Self {
        Self {
            system_value: SystemValue::Position,
            ..Self::new(semantic_name, 0, component_count)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ShaderReflection {
    pub output_signature: Vec<SignatureElement>,
    /// Declared output topology (geometry/domain stages only)
    pub output_topology: Topology,
}

// =============================================================================
// Stream output
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoDeclarationEntry {
    pub stream: u32,
    pub semantic_name: String,
    pub semantic_index: u32,
    pub start_component: u8,
    pub component_count: u8,
    pub output_slot: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StreamOutputDesc {
    pub entries: Vec<SoDeclarationEntry>,
    pub buffer_strides: Vec<u32>,
    /// None disables rasterization of every stream
    pub rasterized_stream: Option<u32>,
}

// =============================================================================
// Pipeline state
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShaderRef {
    pub id: ResourceId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RootSignatureRef {
    /// The application's own root signature
    Application(ResourceId),
    /// A signature created by the capture engine
    Patched(RootSignatureHandle),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DepthStencilDesc {
    pub depth_enable: bool,
    pub depth_write: bool,
    pub stencil_enable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleDesc {
    pub count: u32,
    pub quality: u32,
}

impl Default for SampleDesc {
    fn default() -> Self {
        Self {
            count: 1,
            quality: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineDesc {
    pub root_signature: RootSignatureRef,
    pub vs: Option<ShaderRef>,
    pub hs: Option<ShaderRef>,
    pub ds: Option<ShaderRef>,
    pub gs: Option<ShaderRef>,
    pub ps: Option<ShaderRef>,
    pub stream_output: StreamOutputDesc,
    pub depth_stencil: DepthStencilDesc,
    pub topology_type: TopologyType,
    pub sample: SampleDesc,
    pub rtv_formats: [u32; RENDER_TARGET_SLOTS],
    pub dsv_format: u32,
    pub strip_cut: StripCut,
    pub view_instance_count: u32,
}

impl PipelineDesc {
    /// A graphics pipeline with only a vertex shader bound.
    pub fn new(root_signature: ResourceId, vs: ResourceId) -> Self {
        Self {
            root_signature: RootSignatureRef::Application(root_signature),
            vs: Some(ShaderRef { id: vs }),
            hs: None,
            ds: None,
            gs: None,
            ps: None,
            stream_output: StreamOutputDesc::default(),
            depth_stencil: DepthStencilDesc::default(),
            topology_type: TopologyType::Triangle,
            sample: SampleDesc::default(),
            rtv_formats: [FORMAT_UNKNOWN; RENDER_TARGET_SLOTS],
            dsv_format: FORMAT_UNKNOWN,
            strip_cut: StripCut::Disabled,
            view_instance_count: 0,
        }
    }

    /// Last stage before rasterization that expands geometry. Stream output
    /// taps the geometry shader when both it and a domain shader are bound.
    pub fn last_expansion_stage(&self) -> Option<ShaderRef> {
        self.gs.or(self.ds)
    }
}

/// A live pipeline as resolved by the resource manager.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineState {
    pub graphics: bool,
    pub desc: PipelineDesc,
}

// =============================================================================
// Root signatures
// =============================================================================

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct RootSignatureFlags: u32 {
        const ALLOW_INPUT_ASSEMBLER_INPUT_LAYOUT = 0x1;
        const DENY_VERTEX_SHADER_ROOT_ACCESS = 0x2;
        const DENY_HULL_SHADER_ROOT_ACCESS = 0x4;
        const DENY_DOMAIN_SHADER_ROOT_ACCESS = 0x8;
        const DENY_GEOMETRY_SHADER_ROOT_ACCESS = 0x10;
        const DENY_PIXEL_SHADER_ROOT_ACCESS = 0x20;
        const ALLOW_STREAM_OUTPUT = 0x40;
        const LOCAL_ROOT_SIGNATURE = 0x80;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RootParameterKind {
    Constants { count: u32 },
    ConstantBuffer,
    ShaderResource,
    UnorderedAccess,
    DescriptorTable { ranges: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RootParameter {
    pub kind: RootParameterKind,
    pub shader_register: u32,
    pub register_space: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RootSignatureDesc {
    pub flags: RootSignatureFlags,
    pub parameters: Vec<RootParameter>,
    pub static_sampler_count: u32,
}

// =============================================================================
// Resources
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeapKind {
    /// GPU-local
    Default,
    /// CPU-writable
    Upload,
    /// CPU-readable
    Readback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceState {
    Common,
    StreamOut,
    CopySource,
    CopyDest,
    UnorderedAccess,
    GenericRead,
}

// =============================================================================
// Readback layouts
// =============================================================================

/// Layout of a resolved stream-output statistics query.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct SoStatistics {
    pub primitives_written: u64,
    pub primitives_storage_needed: u64,
}

pub const SO_STATISTICS_BYTES: u64 = std::mem::size_of::<SoStatistics>() as u64;

/// Homogeneous clip-space position as captured.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct Vec4f {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

pub const VEC4F_BYTES: u64 = std::mem::size_of::<Vec4f>() as u64;

// =============================================================================
// Helper Functions
// =============================================================================

pub const fn align_up(x: u64, align: u64) -> u64 {
    (x + align - 1) / align * align
}
