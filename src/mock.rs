//! In-memory device for tests.
//!
//! Simulates just enough of a D3D12 device to run capture passes end to
//! end: buffers are byte vectors, command lists are interpreted on submit,
//! and stream output appends declaration-ordered records at the offset kept
//! in the bound filled-size counter.

use std::collections::HashMap;
use std::ops::Range;

use crate::desc::{
    PipelineDesc, PipelineState, ResourceId, RootSignatureDesc, ShaderReflection,
    SignatureElement, SoStatistics, StreamOutputDesc, SystemValue,
};
use crate::device::{
    BufferDesc, BufferHandle, Command, CommandList, GpuDevice, IndexBufferView, PipelineHandle,
    QueryHeapHandle, ResourceManager, RootSignatureHandle, StreamOutputView,
};
use crate::error::{DeviceError, E_FAIL, E_INVALIDARG, E_OUTOFMEMORY};
use crate::replay::{
    CaptureRequest, DrawCallback, DrawId, RenderState, ReplayController, ReplayMode,
};

/// Route engine logs to the test harness.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

struct MockBuffer {
    desc: BufferDesc,
    data: Vec<u8>,
}

#[derive(Default)]
struct ListState {
    render: RenderState,
    pipeline: Option<PipelineHandle>,
    index_buffer: Option<IndexBufferView>,
    stream_output: Option<StreamOutputView>,
    querying: bool,
    stats: SoStatistics,
}

pub struct MockDevice {
    next_handle: u64,
    buffers: HashMap<BufferHandle, MockBuffer>,
    buffers_created: usize,
    query_heaps: HashMap<QueryHeapHandle, Vec<SoStatistics>>,
    root_signatures: HashMap<RootSignatureHandle, RootSignatureDesc>,
    pipelines: HashMap<PipelineHandle, PipelineDesc>,
    mapped: HashMap<BufferHandle, Range<u64>>,

    app_pipelines: HashMap<ResourceId, PipelineState>,
    app_root_signatures: HashMap<ResourceId, RootSignatureDesc>,
    shaders: HashMap<ResourceId, ShaderReflection>,
    expansions: HashMap<ResourceId, Vec<u32>>,
    app_buffers: HashMap<ResourceId, Vec<u8>>,

    // clip-space z = w * m + c
    projection: (f32, f32),
    allocation_limit: Option<u64>,
    fail_root_signatures: bool,
    fail_expansion_pipelines: bool,
    fail_maps: bool,

    oom_handling: bool,
    oom_transitions: Vec<bool>,
    sync_count: u32,
    submissions: u32,
}

impl MockDevice {
    pub fn new() -> Self {
        let mut device = Self {
            next_handle: 1,
            buffers: HashMap::new(),
            buffers_created: 0,
            query_heaps: HashMap::new(),
            root_signatures: HashMap::new(),
            pipelines: HashMap::new(),
            mapped: HashMap::new(),
            app_pipelines: HashMap::new(),
            app_root_signatures: HashMap::new(),
            shaders: HashMap::new(),
            expansions: HashMap::new(),
            app_buffers: HashMap::new(),
            projection: (1.0, 0.0),
            allocation_limit: None,
            fail_root_signatures: false,
            fail_expansion_pipelines: false,
            fail_maps: false,
            oom_handling: false,
            oom_transitions: Vec::new(),
            sync_count: 0,
            submissions: 0,
        };
        device.set_projection(0.5, 50.0);
        device
    }

    fn handle(&mut self) -> u64 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }

    // ---- scene setup ----

    pub fn add_pipeline(&mut self, id: ResourceId, state: PipelineState) {
        self.app_pipelines.insert(id, state);
    }

    pub fn add_root_signature(&mut self, id: ResourceId, desc: RootSignatureDesc) {
        self.app_root_signatures.insert(id, desc);
    }

    pub fn add_shader(&mut self, id: ResourceId, reflection: ShaderReflection) {
        self.shaders.insert(id, reflection);
    }

    /// Primitives emitted per instance by an expanding stage, cycling.
    pub fn set_expansion(&mut self, shader: ResourceId, per_instance: Vec<u32>) {
        self.expansions.insert(shader, per_instance);
    }

    pub fn add_app_buffer(&mut self, id: ResourceId, data: Vec<u8>) {
        self.app_buffers.insert(id, data);
    }

    /// Perspective projection used for generated clip-space positions.
    pub fn set_projection(&mut self, near: f32, far: f32) {
        let m = far / (far - near);
        self.projection = (m, -far * near / (far - near));
    }

    // ---- failure injection ----

    /// Buffers larger than `limit` fail to allocate with out-of-memory.
    pub fn set_allocation_limit(&mut self, limit: Option<u64>) {
        self.allocation_limit = limit;
    }

    pub fn fail_root_signatures(&mut self, fail: bool) {
        self.fail_root_signatures = fail;
    }

    /// Fail creation of pipelines that keep hull, domain or geometry stages.
    pub fn fail_expansion_pipelines(&mut self, fail: bool) {
        self.fail_expansion_pipelines = fail;
    }

    pub fn fail_maps(&mut self, fail: bool) {
        self.fail_maps = fail;
    }

    // ---- inspection ----

    pub fn oom_handling(&self) -> bool {
        self.oom_handling
    }

    pub fn oom_transitions(&self) -> &[bool] {
        &self.oom_transitions
    }

    pub fn is_mapped(&self, buffer: BufferHandle) -> bool {
        self.mapped.contains_key(&buffer)
    }

    pub fn buffer_size(&self, buffer: BufferHandle) -> Option<u64> {
        self.buffers.get(&buffer).map(|b| b.desc.size)
    }

    pub fn buffer_contents(&self, buffer: BufferHandle) -> Option<&[u8]> {
        self.buffers.get(&buffer).map(|b| b.data.as_slice())
    }

    pub fn buffer_name(&self, buffer: BufferHandle) -> Option<&str> {
        self.buffers.get(&buffer).map(|b| b.desc.name.as_str())
    }

    pub fn created_root_signature(&self, handle: RootSignatureHandle) -> Option<RootSignatureDesc> {
        self.root_signatures.get(&handle).cloned()
    }

    pub fn sync_count(&self) -> u32 {
        self.sync_count
    }

    pub fn submissions(&self) -> u32 {
        self.submissions
    }

    pub fn buffers_created(&self) -> usize {
        self.buffers_created
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    pub fn live_query_heaps(&self) -> usize {
        self.query_heaps.len()
    }

    pub fn live_pipelines(&self) -> usize {
        self.pipelines.len()
    }

    pub fn live_root_signatures(&self) -> usize {
        self.root_signatures.len()
    }

    // ---- simulation ----

    fn component(&self, element: Option<&SignatureElement>, vertex: u32, instance: u32, c: u8) -> f32 {
        let element = match element {
            Some(e) => e,
            None => return 0.0,
        };
        if element.system_value == SystemValue::Position {
            let w = 1.0 + vertex as f32;
            let (m, offset) = self.projection;
            return match c {
                0 => vertex as f32,
                1 => instance as f32,
                2 => w * m + offset,
                _ => w,
            };
        }
        (instance * 1000 + vertex) as f32 + f32::from(c) * 0.25
    }

    fn record(
        &self,
        signature: &[SignatureElement],
        so: &StreamOutputDesc,
        vertex: u32,
        instance: u32,
        out: &mut Vec<u8>,
    ) {
        for entry in &so.entries {
            let element = signature.iter().find(|e| {
                e.semantic_name == entry.semantic_name && e.semantic_index == entry.semantic_index
            });
            for c in entry.start_component..entry.start_component + entry.component_count {
                let value = self.component(element, vertex, instance, c);
                out.extend_from_slice(&value.to_le_bytes());
            }
        }
    }

    /// Append one primitive to the bound stream-output target.
    fn stream_out(&mut self, state: &mut ListState, bytes: &[u8]) -> Result<(), DeviceError> {
        if state.querying {
            state.stats.primitives_storage_needed += 1;
        }
        let view = match state.stream_output {
            Some(v) => v,
            None => return Ok(()),
        };
        let buffer = self
            .buffers
            .get_mut(&view.buffer)
            .ok_or(DeviceError::new("SOSetTargets", E_INVALIDARG))?;

        let at = view.filled_size_offset as usize;
        let filled = u64::from_le_bytes(
            buffer.data[at..at + 8]
                .try_into()
                .map_err(|_| DeviceError::new("SOSetTargets", E_INVALIDARG))?,
        );
        // overflow stops writing, the query still counts
        if filled + bytes.len() as u64 > view.size {
            return Ok(());
        }

        let start = (view.offset + filled) as usize;
        buffer.data[start..start + bytes.len()].copy_from_slice(bytes);
        let filled = filled + bytes.len() as u64;
        buffer.data[at..at + 8].copy_from_slice(&filled.to_le_bytes());

        if state.querying {
            state.stats.primitives_written += 1;
        }
        Ok(())
    }

    fn read_index(&self, state: &ListState, i: u32) -> u32 {
        if let Some(view) = state.index_buffer {
            let width = view.format.width() as usize;
            let at = i as usize * width;
            return self
                .buffers
                .get(&view.buffer)
                .and_then(|b| b.data.get(at..at + width))
                .map(le_index)
                .unwrap_or(0);
        }
        if let Some(binding) = state.render.index_buffer {
            let width = binding.width as usize;
            let at = binding.offset as usize + i as usize * width;
            return self
                .app_buffers
                .get(&binding.buffer)
                .and_then(|b| b.get(at..at + width))
                .map(le_index)
                .unwrap_or(0);
        }
        0
    }

    fn draw(
        &mut self,
        state: &mut ListState,
        vertices: &[u32],
        instance_count: u32,
        start_instance: u32,
    ) -> Result<(), DeviceError> {
        let handle = state.pipeline.ok_or(DeviceError::new("Draw", E_INVALIDARG))?;
        let desc = self
            .pipelines
            .get(&handle)
            .cloned()
            .ok_or(DeviceError::new("Draw", E_INVALIDARG))?;
        let so = desc.stream_output.clone();
        if so.entries.is_empty() {
            return Ok(());
        }

        if let Some(last) = desc.last_expansion_stage() {
            let reflection = self.shaders.get(&last.id).cloned().unwrap_or_default();
            let per_instance = self.expansions.get(&last.id).cloned().unwrap_or_else(|| vec![1]);
            let vpp = reflection.output_topology.stream_out_vertices_per_primitive() as u32;

            for k in 0..instance_count {
                let prims = per_instance[k as usize % per_instance.len()];
                for p in 0..prims {
                    let mut bytes = Vec::new();
                    for j in 0..vpp {
                        self.record(
                            &reflection.output_signature,
                            &so,
                            p * vpp + j,
                            start_instance + k,
                            &mut bytes,
                        );
                    }
                    self.stream_out(state, &bytes)?;
                }
            }
        } else {
            let vs = desc.vs.ok_or(DeviceError::new("Draw", E_INVALIDARG))?;
            let reflection = self.shaders.get(&vs.id).cloned().unwrap_or_default();
            for k in 0..instance_count {
                for &vertex in vertices {
                    let mut bytes = Vec::new();
                    self.record(&reflection.output_signature, &so, vertex, start_instance + k, &mut bytes);
                    self.stream_out(state, &bytes)?;
                }
            }
        }
        Ok(())
    }

    fn write(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) -> Result<(), DeviceError> {
        let target = self
            .buffers
            .get_mut(&buffer)
            .ok_or(DeviceError::new("WriteBuffer", E_INVALIDARG))?;
        let start = offset as usize;
        let end = start + data.len();
        if end > target.data.len() {
            return Err(DeviceError::new("WriteBuffer", E_INVALIDARG));
        }
        target.data[start..end].copy_from_slice(data);
        Ok(())
    }
}

fn le_index(bytes: &[u8]) -> u32 {
    match bytes.len() {
        2 => u32::from(u16::from_le_bytes([bytes[0], bytes[1]])),
        _ => u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
    }
}

impl GpuDevice for MockDevice {
    fn create_buffer(&mut self, desc: &BufferDesc) -> Result<BufferHandle, DeviceError> {
        if self.allocation_limit.map_or(false, |limit| desc.size > limit) {
            return Err(DeviceError::new("CreateCommittedResource", E_OUTOFMEMORY));
        }
        let handle = BufferHandle(self.handle());
        self.buffers.insert(
            handle,
            MockBuffer {
                desc: desc.clone(),
                data: vec![0; desc.size as usize],
            },
        );
        self.buffers_created += 1;
        Ok(handle)
    }

    fn release_buffer(&mut self, buffer: BufferHandle) {
        self.mapped.remove(&buffer);
        self.buffers.remove(&buffer);
    }

    fn create_query_heap(&mut self, slots: u32) -> Result<QueryHeapHandle, DeviceError> {
        let handle = QueryHeapHandle(self.handle());
        self.query_heaps
            .insert(handle, vec![SoStatistics::default(); slots as usize]);
        Ok(handle)
    }

    fn release_query_heap(&mut self, heap: QueryHeapHandle) {
        self.query_heaps.remove(&heap);
    }

    fn create_root_signature(
        &mut self,
        desc: &RootSignatureDesc,
    ) -> Result<RootSignatureHandle, DeviceError> {
        if self.fail_root_signatures {
            return Err(DeviceError::new("CreateRootSignature", E_INVALIDARG));
        }
        let handle = RootSignatureHandle(self.handle());
        self.root_signatures.insert(handle, desc.clone());
        Ok(handle)
    }

    fn release_root_signature(&mut self, signature: RootSignatureHandle) {
        self.root_signatures.remove(&signature);
    }

    fn create_pipeline(&mut self, desc: &PipelineDesc) -> Result<PipelineHandle, DeviceError> {
        let expands = desc.hs.is_some() || desc.ds.is_some() || desc.gs.is_some();
        if self.fail_expansion_pipelines && expands {
            return Err(DeviceError::new("CreateGraphicsPipelineState", E_INVALIDARG));
        }
        let handle = PipelineHandle(self.handle());
        self.pipelines.insert(handle, desc.clone());
        Ok(handle)
    }

    fn release_pipeline(&mut self, pipeline: PipelineHandle) {
        self.pipelines.remove(&pipeline);
    }

    fn fill_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) -> Result<(), DeviceError> {
        self.write(buffer, offset, data)
    }

    fn map(&mut self, buffer: BufferHandle, range: Range<u64>) -> Result<(), DeviceError> {
        if self.fail_maps || !self.buffers.contains_key(&buffer) {
            return Err(DeviceError::new("Map", E_FAIL));
        }
        self.mapped.insert(buffer, range);
        Ok(())
    }

    fn mapped_bytes(&self, buffer: BufferHandle) -> Option<&[u8]> {
        let range = self.mapped.get(&buffer)?;
        let data = &self.buffers.get(&buffer)?.data;
        let end = (range.end as usize).min(data.len());
        let start = (range.start as usize).min(end);
        Some(&data[start..end])
    }

    fn unmap(&mut self, buffer: BufferHandle) {
        self.mapped.remove(&buffer);
    }

    fn execute(&mut self, list: CommandList) -> Result<(), DeviceError> {
        self.submissions += 1;
        let mut state = ListState::default();

        for command in list.commands() {
            match command {
                Command::ApplyRenderState(render) => {
                    state.render = (**render).clone();
                    state.pipeline = None;
                    state.index_buffer = None;
                }
                Command::SetPipeline(pipeline) => state.pipeline = Some(*pipeline),
                Command::SetRootSignature(_) | Command::ApplyRootElements => {}
                Command::SetIndexBuffer(view) => state.index_buffer = Some(*view),
                Command::SetTopology(topology) => state.render.topology = *topology,
                Command::SetStreamOutput(view) => state.stream_output = Some(*view),
                Command::Draw(args) => {
                    let vertices: Vec<u32> =
                        (args.start_vertex..args.start_vertex + args.vertex_count).collect();
                    self.draw(&mut state, &vertices, args.instance_count, args.start_instance)?;
                }
                Command::DrawIndexed(args) => {
                    let vertices: Vec<u32> = (args.start_index..args.start_index + args.index_count)
                        .map(|i| (i64::from(self.read_index(&state, i)) + i64::from(args.base_vertex)) as u32)
                        .collect();
                    self.draw(&mut state, &vertices, args.instance_count, args.start_instance)?;
                }
                Command::BeginStatistics { heap, .. } => {
                    if !self.query_heaps.contains_key(heap) {
                        return Err(DeviceError::new("BeginQuery", E_INVALIDARG));
                    }
                    state.querying = true;
                    state.stats = SoStatistics::default();
                }
                Command::EndStatistics { heap, slot } => {
                    let stats = state.stats;
                    let slot = self
                        .query_heaps
                        .get_mut(heap)
                        .and_then(|h| h.get_mut(*slot as usize))
                        .ok_or(DeviceError::new("EndQuery", E_INVALIDARG))?;
                    *slot = stats;
                    state.querying = false;
                }
                Command::ResolveStatistics {
                    heap,
                    slot,
                    dest,
                    dest_offset,
                } => {
                    let stats = self
                        .query_heaps
                        .get(heap)
                        .and_then(|h| h.get(*slot as usize))
                        .copied()
                        .ok_or(DeviceError::new("ResolveQueryData", E_INVALIDARG))?;
                    self.write(*dest, *dest_offset, bytemuck::bytes_of(&stats))?;
                }
                Command::Barrier { .. } | Command::Discard(_) => {}
                Command::CopyBuffer { dest, source } => {
                    let data = self
                        .buffers
                        .get(source)
                        .map(|b| b.data.clone())
                        .ok_or(DeviceError::new("CopyResource", E_INVALIDARG))?;
                    let len = self.buffer_size(*dest).unwrap_or(0).min(data.len() as u64) as usize;
                    self.write(*dest, 0, &data[..len])?;
                }
                Command::ClearCounters { buffer, bytes } => {
                    self.write(*buffer, 0, &vec![0u8; *bytes as usize])?;
                }
            }
        }
        Ok(())
    }

    fn gpu_sync(&mut self) {
        self.sync_count += 1;
    }

    fn set_oom_handling(&mut self, enabled: bool) {
        self.oom_handling = enabled;
        self.oom_transitions.push(enabled);
    }
}

impl ResourceManager for MockDevice {
    fn pipeline_state(&self, id: ResourceId) -> Option<PipelineState> {
        self.app_pipelines.get(&id).cloned()
    }

    fn root_signature(&self, id: ResourceId) -> Option<RootSignatureDesc> {
        self.app_root_signatures.get(&id).cloned()
    }

    fn shader_reflection(&self, id: ResourceId) -> Option<ShaderReflection> {
        self.shaders.get(&id).cloned()
    }

    fn buffer_data(&mut self, id: ResourceId, offset: u64, len: u64) -> Result<Vec<u8>, DeviceError> {
        let data = self
            .app_buffers
            .get(&id)
            .ok_or(DeviceError::new("GetBufferData", E_INVALIDARG))?;
        let start = (offset as usize).min(data.len());
        let end = (offset.saturating_add(len) as usize).min(data.len());
        Ok(data[start..end].to_vec())
    }
}

/// Replays a fixed list of draws against a [`MockDevice`].
pub struct MockReplay {
    pub device: MockDevice,
    pub draws: Vec<CaptureRequest>,
    /// (primary, alias) pairs reported while replaying
    pub aliases: Vec<(DrawId, DrawId)>,
    pub log: Vec<(DrawId, DrawId, ReplayMode)>,
}

impl MockReplay {
    pub fn new(device: MockDevice, draws: Vec<CaptureRequest>) -> Self {
        Self {
            device,
            draws,
            aliases: Vec::new(),
            log: Vec::new(),
        }
    }
}

impl ReplayController for MockReplay {
    type Device = MockDevice;

    fn replay_log(
        &mut self,
        first: DrawId,
        last: DrawId,
        mode: ReplayMode,
        callback: Option<&mut dyn DrawCallback<MockDevice>>,
    ) -> anyhow::Result<()> {
        if first > last {
            anyhow::bail!("invalid replay range {}..={}", first, last);
        }
        self.log.push((first, last, mode));

        if let Some(callback) = callback {
            for request in &self.draws {
                let id = request.draw_id();
                if id < first || id > last || (id == last && mode == ReplayMode::WithoutDraw) {
                    continue;
                }
                callback.pre_draw(&mut self.device, request);
            }
            for &(primary, alias) in &self.aliases {
                if primary >= first && primary <= last {
                    callback.alias_draw(primary, alias);
                }
            }
        }
        Ok(())
    }
}
