//! Capture Executor
//!
//! Records and submits the command lists of one capture pass: the
//! application's state with the patched pipeline bound, the stream-output
//! target, the draw itself, and the copy of the results to the staging
//! buffer. Every submission waits for the GPU before returning.

use tracing::{debug, error};

use crate::desc::{ResourceState, COUNTER_BYTES, COUNTER_SLOT_BYTES};
use crate::device::{
    Command, CommandList, DrawArgs, DrawIndexedArgs, GpuDevice, PipelineHandle,
    RootSignatureHandle, StreamOutputView,
};
use crate::error::{CaptureError, Result};
use crate::replay::CaptureRequest;
use crate::scratch::ScratchBuffers;

pub struct CaptureExecutor<'a> {
    request: &'a CaptureRequest,
    pipeline: PipelineHandle,
    root_signature: Option<RootSignatureHandle>,
    submissions: u32,
}

impl<'a> CaptureExecutor<'a> {
    pub fn new(
        request: &'a CaptureRequest,
        pipeline: PipelineHandle,
        root_signature: Option<RootSignatureHandle>,
    ) -> Self {
        Self {
            request,
            pipeline,
            root_signature,
            submissions: 0,
        }
    }

    /// Start a list with the draw's state and the capture pipeline bound.
    pub fn begin(&self) -> CommandList {
        let mut list = CommandList::new();
        self.bind(&mut list);
        list
    }

    fn bind(&self, list: &mut CommandList) {
        list.push(Command::ApplyRenderState(Box::new(self.request.state.clone())));
        list.push(Command::SetPipeline(self.pipeline));
        if let Some(signature) = self.root_signature {
            list.push(Command::SetRootSignature(signature));
            list.push(Command::ApplyRootElements);
        }
    }

    /// Stream-output target writing after `counter_bytes` of counters, with
    /// the running byte count kept in counter slot `slot`. `capacity` is the
    /// pool capacity, the buffer itself is `COUNTER_BYTES` longer.
    pub fn target(
        buffers: &ScratchBuffers,
        capacity: u64,
        counter_bytes: u64,
        slot: u64,
    ) -> StreamOutputView {
        StreamOutputView {
            buffer: buffers.output,
            offset: counter_bytes,
            size: (capacity + COUNTER_BYTES).saturating_sub(counter_bytes),
            filled_size_offset: slot * COUNTER_SLOT_BYTES,
        }
    }

    /// The draw as the application recorded it, limited to `instances`.
    pub fn original_draw(&self, instances: u32) -> Command {
        let action = &self.request.action;
        if action.indexed {
            Command::DrawIndexed(DrawIndexedArgs {
                index_count: action.num_indices,
                instance_count: instances,
                start_index: action.index_offset,
                base_vertex: action.base_vertex,
                start_instance: action.instance_offset,
            })
        } else {
            Command::Draw(DrawArgs {
                vertex_count: action.num_indices,
                instance_count: instances,
                start_vertex: action.vertex_offset,
                start_instance: action.instance_offset,
            })
        }
    }

    /// Zero the counter region, bracketed by the barriers stream output needs.
    pub fn clear_counters(&self, list: &mut CommandList, buffers: &ScratchBuffers, bytes: u64) {
        list.push(Command::Barrier {
            buffer: buffers.output,
            before: ResourceState::StreamOut,
            after: ResourceState::UnorderedAccess,
        });
        list.push(Command::ClearCounters {
            buffer: buffers.output,
            bytes,
        });
        list.push(Command::Barrier {
            buffer: buffers.output,
            before: ResourceState::UnorderedAccess,
            after: ResourceState::StreamOut,
        });
    }

    /// Copy the capture to staging, then discard the capture buffer and
    /// reset its counters for the next capture.
    pub fn record_readback(&self, list: &mut CommandList, buffers: &ScratchBuffers, counter_bytes: u64) {
        list.push(Command::Barrier {
            buffer: buffers.output,
            before: ResourceState::StreamOut,
            after: ResourceState::CopySource,
        });
        list.push(Command::CopyBuffer {
            dest: buffers.staging,
            source: buffers.output,
        });
        list.push(Command::Discard(buffers.output));
        list.push(Command::Barrier {
            buffer: buffers.output,
            before: ResourceState::CopySource,
            after: ResourceState::UnorderedAccess,
        });
        list.push(Command::ClearCounters {
            buffer: buffers.output,
            bytes: counter_bytes,
        });
        list.push(Command::Barrier {
            buffer: buffers.output,
            before: ResourceState::UnorderedAccess,
            after: ResourceState::Common,
        });
    }

    /// Execute `list` and wait for the GPU to go idle.
    pub fn submit<D: GpuDevice + ?Sized>(&mut self, device: &mut D, list: CommandList) -> Result<()> {
        debug!(
            "Submitting {} commands for draw {}",
            list.len(),
            self.request.action.id
        );
        let result = device.execute(list);
        device.gpu_sync();
        self.submissions += 1;
        result.map_err(|e| {
            error!("Capture submission failed: {}", e);
            CaptureError::Submit(e)
        })
    }

    /// Submit what has been recorded so far and continue in a fresh list with
    /// the same bindings.
    pub fn flush<D: GpuDevice + ?Sized>(&mut self, device: &mut D, list: &mut CommandList) -> Result<()> {
        let recorded = std::mem::take(list);
        self.submit(device, recorded)?;
        self.bind(list);
        Ok(())
    }

    pub fn submissions(&self) -> u32 {
        self.submissions
    }
}
