//! Capture Engine
//!
//! Orchestrates the per-draw capture: preflight checks, the vertex pass and
//! the geometry/tessellation pass, each producing its own result. Failures
//! stay scoped to the stage that hit them.

use tracing::{debug, error, info, info_span, warn};

use crate::cache::ResultCache;
use crate::config::CaptureConfig;
use crate::decl::StreamDeclaration;
use crate::decode::{derive_depth_planes, positions, read_capture, DepthPlanes, Readback};
use crate::desc::{HeapKind, IndexFormat, PipelineDesc, Topology, COUNTER_BYTES};
use crate::device::{
    BufferDesc, BufferHandle, Command, DrawIndexedArgs, GpuDevice, IndexBufferView, OomScope,
    PipelineHandle, ReplayDevice, ResourceManager, RootSignatureHandle,
};
use crate::error::{CaptureError, Result};
use crate::executor::CaptureExecutor;
use crate::patch::{stream_out_root_signature, CaptureStages, PipelinePatch};
use crate::probe::{capture_incremental, capture_single, OutputShape};
use crate::rebase::{rebase, RebasedIndices};
use crate::replay::{CaptureRequest, DrawCallback, DrawId, ReplayController, ReplayMode};
use crate::result::{MeshDescriptor, MeshStage, PostVsData, StageResult};
use crate::scratch::{ScratchBuffers, ScratchPool};

/// Status of a stage whose shader declares no outputs.
pub const NO_OUTPUT: &str = "Shader has no output signature";
/// Geometry status when neither stage exists.
pub const NO_EXPANSION_STAGE: &str = "No geometry and no tessellation shader bound.";
/// Geometry status when a prerequisite shared with the vertex pass failed.
pub const VERTEX_STAGE_FAILED: &str =
    "No geometry/tessellation output fetched due to error processing vertex stage.";

const VERTEX: &str = "Vertex";
const EXPANSION: &str = "Geometry/tessellation";

pub struct PostVsEngine {
    config: CaptureConfig,
    pool: ScratchPool,
    cache: ResultCache,
}

impl PostVsEngine {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            pool: ScratchPool::new(),
            cache: ResultCache::new(),
        }
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub fn scratch_capacity(&self) -> u64 {
        self.pool.capacity()
    }

    /// Capture `request`'s draw unless its output is already cached.
    pub fn capture<D: ReplayDevice + ?Sized>(&mut self, device: &mut D, request: &CaptureRequest) {
        let draw = request.draw_id();
        if self.cache.contains(draw) {
            debug!("Draw {} already captured", draw);
            return;
        }

        let span = info_span!("postvs", draw);
        let _enter = span.enter();

        let mut device = OomScope::acquire(device);
        let data = self.capture_draw(&mut *device, request);
        if let Some(mut rejected) = self.cache.insert(draw, data) {
            rejected.release(&mut *device);
        }
    }

    /// Replay the frame and capture every draw in `draws` as replay reaches it.
    pub fn capture_range<R: ReplayController>(&mut self, replay: &mut R, draws: &[DrawId]) -> Result<()> {
        let (first, last) = match (draws.iter().min(), draws.iter().max()) {
            (Some(&first), Some(&last)) => (first, last),
            _ => return Ok(()),
        };

        info!("Capturing post-transform data for {} draws", draws.len());

        replay
            .replay_up_to(first, false)
            .map_err(|e| CaptureError::Replay(e.to_string()))?;

        let mut hook = CaptureHook {
            engine: self,
            draws,
        };
        replay
            .replay_log(
                first,
                last,
                ReplayMode::Full,
                Some(&mut hook as &mut dyn DrawCallback<R::Device>),
            )
            .map_err(|e| CaptureError::Replay(e.to_string()))
    }

    /// Make `alias` share `primary`'s output.
    pub fn alias(&mut self, primary: DrawId, alias: DrawId) {
        self.cache.alias(primary, alias);
    }

    /// Mesh of a captured draw. Draws that were never captured get an empty
    /// mesh with no status.
    pub fn get_result(&self, draw: DrawId, instance: u32, stage: MeshStage) -> MeshDescriptor {
        self.cache
            .get(draw)
            .map(|data| data.stage(stage).mesh(instance))
            .unwrap_or_else(MeshDescriptor::empty)
    }

    /// [`get_result`](Self::get_result), capturing the draw first if needed.
    pub fn fetch<R: ReplayController>(
        &mut self,
        replay: &mut R,
        draw: DrawId,
        instance: u32,
        stage: MeshStage,
    ) -> Result<MeshDescriptor> {
        if !self.cache.contains(draw) {
            self.capture_range(replay, &[draw])?;
        }
        Ok(self.get_result(draw, instance, stage))
    }

    /// Forget every captured draw, e.g. when the frame is discarded.
    pub fn clear<D: GpuDevice + ?Sized>(&mut self, device: &mut D) {
        device.gpu_sync();
        self.cache.clear(device);
    }

    /// Release everything including the scratch pool.
    pub fn shutdown<D: GpuDevice + ?Sized>(&mut self, device: &mut D) {
        self.clear(device);
        self.pool.release(device);
    }

    // =========================================================================
    // Per-draw capture
    // =========================================================================

    fn capture_draw<D: ReplayDevice + ?Sized>(&mut self, device: &mut D, request: &CaptureRequest) -> PostVsData {
        let desc = match preflight(&*device, request) {
            Ok(desc) => desc,
            Err(e) => {
                info!("Nothing to capture for draw {}: {}", request.draw_id(), e);
                let status = e.to_string();
                return PostVsData {
                    vertex: StageResult::failed(status.clone()),
                    geometry: StageResult::failed(status),
                };
            }
        };

        let topology = request.state.topology;
        let expands = desc.last_expansion_stage().is_some();
        let mut data = PostVsData {
            vertex: StageResult::default(),
            geometry: StageResult::failed(if expands {
                VERTEX_STAGE_FAILED
            } else {
                NO_EXPANSION_STAGE
            }),
        };

        let signature = match stream_out_root_signature(device, &request.state, &desc) {
            Ok(signature) => signature,
            Err(e) => {
                data.vertex = stage_failure(VERTEX, e, topology);
                return data;
            }
        };

        data.vertex = self
            .capture_vertex(device, request, &desc, signature)
            .unwrap_or_else(|e| stage_failure(VERTEX, e, topology));

        if expands {
            data.geometry = self
                .capture_expansion(device, request, &desc, signature)
                .unwrap_or_else(|e| stage_failure(EXPANSION, e, topology));
        }

        if let Some(signature) = signature {
            device.release_root_signature(signature);
        }

        data
    }

    fn capture_vertex<D: ReplayDevice + ?Sized>(
        &mut self,
        device: &mut D,
        request: &CaptureRequest,
        desc: &PipelineDesc,
        signature: Option<RootSignatureHandle>,
    ) -> Result<StageResult> {
        let action = &request.action;
        let topology = request.state.topology;

        let vs = desc.vs.ok_or(CaptureError::NoVertexShader)?;
        let reflection = device
            .shader_reflection(vs.id)
            .ok_or(CaptureError::MissingReflection(vs.id))?;
        let decl = StreamDeclaration::build(&reflection.output_signature);
        if decl.is_empty() {
            return Ok(no_output(topology));
        }
        let stride = decl.stride();

        let rebased = if action.indexed {
            Some(read_indices(device, request, desc)?)
        } else {
            None
        };

        let mut required = u64::from(action.num_indices)
            * u64::from(action.num_instances)
            * u64::from(stride)
            + COUNTER_BYTES;
        if let Some(rebased) = &rebased {
            required = required.max(rebased.required_capacity());
        }
        let buffers = self.pool.acquire(device, required, VERTEX, &self.config)?;

        if let Some(rebased) = &rebased {
            device.fill_buffer(buffers.patched_index, 0, rebased.patched_index_bytes())?;
        }

        let pipeline = PipelinePatch::new(desc, CaptureStages::VertexOnly)
            .stream_output(&decl)
            .root_signature(signature)
            .create(device)?;

        let readback = self.run_vertex_pass(device, request, pipeline, signature, &buffers, rebased.as_ref(), stride);
        device.release_pipeline(pipeline);
        let readback = readback?;

        let mut result = StageResult {
            vertex_stride: stride,
            topology,
            has_position: decl.has_position(),
            ..StageResult::default()
        };
        let planes = self.depth_planes(&readback, &decl);
        result.near_plane = planes.near;
        result.far_plane = planes.far;

        if readback.bytes_written == 0 {
            warn!("Vertex output data from GPU contained no vertex data");
            return Ok(result);
        }

        let buffer = upload(
            device,
            &readback.data,
            format!("PostVS vsoutBuffer for {}", action.id),
        )?;
        result.buffer = Some(buffer);

        if let Some(rebased) = rebased.filter(|r| !r.rewritten.is_empty()) {
            match upload(device, &rebased.rewritten, format!("PostVS idxBuf for {}", action.id)) {
                Ok(index_buffer) => {
                    result.index_buffer = Some(index_buffer);
                    result.index_format = Some(rebased.format);
                }
                Err(e) => {
                    result.release(device);
                    return Err(e);
                }
            }
        }

        result.use_indices = action.indexed;
        result.num_verts = action.num_indices;
        if action.instanced {
            result.instance_stride = (readback.bytes_written / u64::from(action.num_instances.max(1))) as u32;
        }

        Ok(result)
    }

    #[allow(clippy::too_many_arguments)]
    fn run_vertex_pass<D: GpuDevice + ?Sized>(
        &self,
        device: &mut D,
        request: &CaptureRequest,
        pipeline: PipelineHandle,
        signature: Option<RootSignatureHandle>,
        buffers: &ScratchBuffers,
        rebased: Option<&RebasedIndices>,
        stride: u32,
    ) -> Result<Readback> {
        let action = &request.action;
        let capacity = self.pool.capacity();
        let mut executor = CaptureExecutor::new(request, pipeline, signature);

        let mut list = executor.begin();
        list.push(Command::SetTopology(Topology::PointList));
        executor.clear_counters(&mut list, buffers, COUNTER_BYTES);
        list.push(Command::SetStreamOutput(CaptureExecutor::target(
            buffers,
            capacity,
            COUNTER_BYTES,
            0,
        )));

        match rebased {
            Some(rebased) => {
                list.push(Command::SetIndexBuffer(IndexBufferView {
                    buffer: buffers.patched_index,
                    format: IndexFormat::Uint32,
                    size: rebased.patched_index_bytes().len() as u64,
                }));
                list.push(Command::DrawIndexed(DrawIndexedArgs {
                    index_count: rebased.unique.len() as u32,
                    instance_count: action.num_instances,
                    start_index: 0,
                    base_vertex: action.base_vertex,
                    start_instance: action.instance_offset,
                }));
            }
            None => list.push(executor.original_draw(action.num_instances)),
        }

        executor.record_readback(&mut list, buffers, COUNTER_BYTES);
        executor.submit(device, list)?;

        read_capture(device, buffers.staging, capacity, COUNTER_BYTES, 1, stride, "vertex")
    }

    fn capture_expansion<D: ReplayDevice + ?Sized>(
        &mut self,
        device: &mut D,
        request: &CaptureRequest,
        desc: &PipelineDesc,
        signature: Option<RootSignatureHandle>,
    ) -> Result<StageResult> {
        let action = &request.action;

        let last = desc.last_expansion_stage().ok_or(CaptureError::NoVertexShader)?;
        let reflection = device
            .shader_reflection(last.id)
            .ok_or(CaptureError::MissingReflection(last.id))?;
        let output_topology = reflection.output_topology;
        let topology = output_topology.expanded();

        let decl = StreamDeclaration::build(
            reflection
                .output_signature
                .iter()
                .filter(|element| element.stream == 0),
        );
        if decl.is_empty() {
            return Ok(no_output(topology));
        }
        let stride = decl.stride();
        let shape = OutputShape {
            stride,
            vertices_per_primitive: output_topology.stream_out_vertices_per_primitive(),
        };

        let pipeline = PipelinePatch::new(desc, CaptureStages::WithExpansion)
            .stream_output(&decl)
            .root_signature(signature)
            .create(device)?;

        let readback = self.run_expansion_pass(device, request, pipeline, signature, shape);
        device.release_pipeline(pipeline);
        let readback = readback?;

        let planes = self.depth_planes(&readback, &decl);
        let mut result = StageResult {
            vertex_stride: stride,
            topology,
            has_position: decl.has_position(),
            near_plane: planes.near,
            far_plane: planes.far,
            ..StageResult::default()
        };

        if readback.bytes_written == 0 {
            warn!("No detectable output generated by geometry/tessellation shaders");
            return Ok(result);
        }

        let buffer = upload(
            device,
            &readback.data,
            format!("PostVS gsoutBuffer for {}", action.id),
        )?;
        result.buffer = Some(buffer);

        let instances = u64::from(action.num_instances.max(1));
        let mut num_verts = readback.bytes_written / u64::from(stride);
        if action.instanced {
            result.instance_stride = (readback.bytes_written / instances) as u32;
            num_verts /= instances;
        }
        result.num_verts = num_verts as u32;
        result.instances = readback.instances;

        Ok(result)
    }

    fn run_expansion_pass<D: GpuDevice + ?Sized>(
        &mut self,
        device: &mut D,
        request: &CaptureRequest,
        pipeline: PipelineHandle,
        signature: Option<RootSignatureHandle>,
        shape: OutputShape,
    ) -> Result<Readback> {
        let instances = request.action.num_instances;
        let mut executor = CaptureExecutor::new(request, pipeline, signature);

        let layout = if instances > 1 {
            capture_incremental(device, &mut executor, &mut self.pool, shape, instances, EXPANSION, &self.config)?
        } else {
            capture_single(device, &mut executor, &mut self.pool, shape, EXPANSION, &self.config)?
        };
        debug!("Geometry capture took {} submissions", executor.submissions());

        let buffers = self.pool.acquire(device, 0, EXPANSION, &self.config)?;
        read_capture(
            device,
            buffers.staging,
            self.pool.capacity(),
            layout.counter_bytes,
            layout.counter_slots,
            shape.stride,
            "geometry/tessellation",
        )
    }

    fn depth_planes(&self, readback: &Readback, decl: &StreamDeclaration) -> DepthPlanes {
        if decl.has_position() {
            derive_depth_planes(positions(&readback.data, decl.stride()), &self.config)
        } else {
            DepthPlanes {
                near: self.config.default_near_plane,
                far: self.config.default_far_plane,
            }
        }
    }
}

/// Checks that need no GPU work. Returns the bound pipeline's description.
fn preflight<D: ResourceManager + ?Sized>(device: &D, request: &CaptureRequest) -> Result<PipelineDesc> {
    let id = request.state.pipeline.ok_or(CaptureError::NoPipeline)?;
    let state = device.pipeline_state(id).ok_or(CaptureError::NoPipeline)?;

    if !state.graphics {
        return Err(CaptureError::NotGraphics);
    }
    if state.desc.vs.is_none() {
        return Err(CaptureError::NoVertexShader);
    }
    if request.action.num_indices == 0 {
        return Err(CaptureError::NoIndices);
    }
    if request.action.num_instances == 0 {
        return Err(CaptureError::NoInstances);
    }

    Ok(state.desc)
}

/// Read the draw's indices and rebase them onto the unique vertices.
fn read_indices<D: ResourceManager + ?Sized>(
    device: &mut D,
    request: &CaptureRequest,
    desc: &PipelineDesc,
) -> Result<RebasedIndices> {
    let action = &request.action;

    let (data, format) = match request.state.index_buffer {
        Some(binding) => {
            let format = IndexFormat::from_width(binding.width).unwrap_or(IndexFormat::Uint32);
            let width = u64::from(format.width());
            let start = u64::from(action.index_offset) * width;
            let len = (u64::from(action.num_indices) * width).min(binding.size.saturating_sub(start));
            let data = device.buffer_data(binding.buffer, binding.offset + start, len)?;
            (data, format)
        }
        None => {
            warn!("Indexed draw {} has no index buffer bound", action.id);
            (Vec::new(), IndexFormat::Uint32)
        }
    };

    let rebased = rebase(&data, format, action.num_indices, desc.strip_cut);
    debug!(
        "Rebased {} indices onto {} unique vertices",
        rebased.read_count,
        rebased.unique.len()
    );
    Ok(rebased)
}

/// Copy captured bytes into a new CPU-visible buffer.
fn upload<D: GpuDevice + ?Sized>(device: &mut D, data: &[u8], name: String) -> Result<BufferHandle> {
    let buffer = device.create_buffer(&BufferDesc::new(data.len() as u64, HeapKind::Upload, name))?;
    if let Err(e) = device.fill_buffer(buffer, 0, data) {
        device.release_buffer(buffer);
        return Err(e.into());
    }
    Ok(buffer)
}

fn no_output(topology: Topology) -> StageResult {
    StageResult {
        topology,
        ..StageResult::failed(NO_OUTPUT)
    }
}

fn stage_failure(stage: &str, err: CaptureError, topology: Topology) -> StageResult {
    error!("{} capture failed: {}", stage, err);
    StageResult {
        topology,
        ..StageResult::failed(err.to_string())
    }
}

/// Captures requested draws as replay reaches them.
struct CaptureHook<'a> {
    engine: &'a mut PostVsEngine,
    draws: &'a [DrawId],
}

impl<D: ReplayDevice + ?Sized> DrawCallback<D> for CaptureHook<'_> {
    fn pre_draw(&mut self, device: &mut D, request: &CaptureRequest) {
        if self.draws.contains(&request.draw_id()) {
            self.engine.capture(device, request);
        }
    }

    fn alias_draw(&mut self, primary: DrawId, alias: DrawId) {
        if self.draws.contains(&primary) {
            self.engine.alias(primary, alias);
        }
    }
}
