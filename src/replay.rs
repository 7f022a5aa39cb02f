//! Replay Module
//!
//! Interface to the capture/replay engine. The replay engine re-executes the
//! recorded frame and calls back into the capture engine immediately before
//! each draw so it can substitute its own work for that one draw.

use crate::desc::{ResourceId, Topology};
use crate::device::ReplayDevice;

/// Stable handle of one recorded draw within a captured frame.
pub type DrawId = u32;

/// How far a replay goes at its last event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayMode {
    /// Stop before executing the last draw
    WithoutDraw,
    /// Execute the last draw as well
    Full,
}

/// Parameters of the recorded draw call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DrawAction {
    pub id: DrawId,
    /// Index count for indexed draws, vertex count otherwise
    pub num_indices: u32,
    pub num_instances: u32,
    pub index_offset: u32,
    pub vertex_offset: u32,
    pub base_vertex: i32,
    pub instance_offset: u32,
    pub indexed: bool,
    pub instanced: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexBufferBinding {
    pub buffer: ResourceId,
    pub offset: u64,
    pub size: u64,
    /// Bytes per index, 2 or 4
    pub width: u32,
}

/// The application's render state at the draw.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RenderState {
    pub pipeline: Option<ResourceId>,
    pub root_signature: Option<ResourceId>,
    pub topology: Topology,
    pub index_buffer: Option<IndexBufferBinding>,
}

/// Everything known about a draw when replay reaches it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRequest {
    pub action: DrawAction,
    pub state: RenderState,
}

impl CaptureRequest {
    pub fn draw_id(&self) -> DrawId {
        self.action.id
    }
}

/// Hooks fired by the replay engine while replaying a range.
pub trait DrawCallback<D: ReplayDevice + ?Sized> {
    /// Fires immediately before `request`'s draw executes.
    fn pre_draw(&mut self, device: &mut D, request: &CaptureRequest);

    /// Replay determined that `alias` produces the same output as `primary`.
    fn alias_draw(&mut self, primary: DrawId, alias: DrawId);
}

pub trait ReplayController {
    type Device: ReplayDevice;

    /// Replay events `first..=last`. With `ReplayMode::WithoutDraw` the last
    /// draw itself is not executed.
    fn replay_log(
        &mut self,
        first: DrawId,
        last: DrawId,
        mode: ReplayMode,
        callback: Option<&mut dyn DrawCallback<Self::Device>>,
    ) -> anyhow::Result<()>;

    fn replay_up_to(&mut self, draw: DrawId, include_draw: bool) -> anyhow::Result<()> {
        let mode = if include_draw {
            ReplayMode::Full
        } else {
            ReplayMode::WithoutDraw
        };
        self.replay_log(0, draw, mode, None)
    }
}
