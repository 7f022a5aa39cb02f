//! Pipeline Patcher
//!
//! Derives capture variants of an application pipeline. The application's
//! description is never modified: a [`PipelinePatch`] holds named overrides
//! on top of a borrowed base and produces a fresh description.

use tracing::{debug, error};

use crate::decl::StreamDeclaration;
use crate::desc::{
    DepthStencilDesc, PipelineDesc, RootSignatureFlags, RootSignatureRef, SampleDesc,
    StreamOutputDesc, TopologyType, FORMAT_UNKNOWN, RENDER_TARGET_SLOTS,
};
use crate::device::{GpuDevice, PipelineHandle, ReplayDevice, RootSignatureHandle};
use crate::error::{CaptureError, Result};
use crate::replay::RenderState;

/// Which programmable stages ahead of rasterization survive the patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureStages {
    /// Vertex shader only, drawn as points
    VertexOnly,
    /// Vertex plus whichever hull/domain/geometry stages were bound, drawn
    /// with the original topology class
    WithExpansion,
}

#[derive(Debug, Clone)]
pub struct PipelinePatch<'a> {
    base: &'a PipelineDesc,
    stages: CaptureStages,
    stream_output: StreamOutputDesc,
    root_signature: Option<RootSignatureHandle>,
}

impl<'a> PipelinePatch<'a> {
    pub fn new(base: &'a PipelineDesc, stages: CaptureStages) -> Self {
        Self {
            base,
            stages,
            stream_output: StreamOutputDesc::default(),
            root_signature: None,
        }
    }

    pub fn stream_output(mut self, decl: &StreamDeclaration) -> Self {
        self.stream_output = decl.stream_output();
        self
    }

    /// Use a signature that permits stream output instead of the original.
    pub fn root_signature(mut self, signature: Option<RootSignatureHandle>) -> Self {
        self.root_signature = signature;
        self
    }

    pub fn build(&self) -> PipelineDesc {
        let base = self.base;

        let (hs, ds, gs, topology_type) = match self.stages {
            CaptureStages::VertexOnly => (None, None, None, TopologyType::Point),
            CaptureStages::WithExpansion => (base.hs, base.ds, base.gs, base.topology_type),
        };

        PipelineDesc {
            root_signature: self
                .root_signature
                .map(RootSignatureRef::Patched)
                .unwrap_or(base.root_signature),
            vs: base.vs,
            hs,
            ds,
            gs,
            ps: None,
            stream_output: self.stream_output.clone(),
            depth_stencil: DepthStencilDesc {
                depth_enable: false,
                depth_write: false,
                stencil_enable: false,
            },
            topology_type,
            sample: SampleDesc::default(),
            rtv_formats: [FORMAT_UNKNOWN; RENDER_TARGET_SLOTS],
            dsv_format: FORMAT_UNKNOWN,
            strip_cut: base.strip_cut,
            view_instance_count: 0,
        }
    }

    pub fn create<D: GpuDevice + ?Sized>(&self, device: &mut D) -> Result<PipelineHandle> {
        let desc = self.build();
        device.create_pipeline(&desc).map_err(|e| {
            let err = CaptureError::Pipeline(e);
            error!("{}", err);
            err
        })
    }
}

/// Create a copy of the draw's root signature with stream output allowed, if
/// the original doesn't already allow it. Returns `None` when the original
/// can be used as-is.
pub fn stream_out_root_signature<D: ReplayDevice + ?Sized>(
    device: &mut D,
    state: &RenderState,
    pipeline: &PipelineDesc,
) -> Result<Option<RootSignatureHandle>> {
    let id = match (state.root_signature, pipeline.root_signature) {
        (Some(id), _) => id,
        (None, RootSignatureRef::Application(id)) => id,
        (None, RootSignatureRef::Patched(_)) => return Ok(None),
    };

    let mut desc = device
        .root_signature(id)
        .ok_or(CaptureError::MissingRootSignature(id))?;

    if desc.flags.contains(RootSignatureFlags::ALLOW_STREAM_OUTPUT) {
        return Ok(None);
    }

    desc.flags |= RootSignatureFlags::ALLOW_STREAM_OUTPUT;
    let handle = device.create_root_signature(&desc).map_err(|e| {
        let err = CaptureError::RootSignature(e);
        error!("{}", err);
        err
    })?;

    debug!("Created stream-out root signature {:?} for {}", handle, id);
    Ok(Some(handle))
}
