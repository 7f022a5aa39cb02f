//! Result Decoder
//!
//! Reads a finished capture back from the staging buffer and recovers what
//! the raw bytes alone can tell: how many bytes each instance wrote and the
//! near/far planes of the projection that produced the clip-space positions.

use tracing::{error, warn};

use crate::config::CaptureConfig;
use crate::desc::{Vec4f, COUNTER_BYTES, COUNTER_SLOT_BYTES, VEC4F_BYTES};
use crate::device::{BufferHandle, GpuDevice, MappedRange};
use crate::error::{CaptureError, Result};

/// Where one instance's vertices live in an expanded multi-instance capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InstanceExtent {
    pub byte_offset: u64,
    pub vertex_count: u32,
}

/// Turn cumulative byte counters (instances 1, 1..2, 1..3, ...) into
/// per-instance extents. Returns the extents and the total byte count.
pub fn instance_extents(cumulative: &[u64], stride: u32) -> (Vec<InstanceExtent>, u64) {
    let stride = u64::from(stride.max(1));
    let mut prev = 0u64;
    let extents = cumulative
        .iter()
        .map(|&count| {
            let extent = InstanceExtent {
                byte_offset: prev,
                vertex_count: (count.saturating_sub(prev) / stride) as u32,
            };
            prev = count;
            extent
        })
        .collect();
    (extents, prev)
}

/// Near and far plane of a projection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthPlanes {
    pub near: f32,
    pub far: f32,
}

/// Derive near/far from clip-space positions, assuming a standard
/// perspective matrix.
///
/// Post-projection z is linear in pre-projection z, and post-projection w is
/// pre-projection z, so `z = w * m + c` with `m = F / (F - N)` and
/// `c = -F * N / (F - N)`. Solving for the planes gives `N = -c / m` and
/// `F = c / (1 - m)`. Two samples far enough apart in both z and w pin down
/// `m` and `c`.
pub fn derive_depth_planes<I>(positions: I, config: &CaptureConfig) -> DepthPlanes
where
    I: IntoIterator<Item = Vec4f>,
{
    let fallback = DepthPlanes {
        near: config.default_near_plane,
        far: config.default_far_plane,
    };

    let mut positions = positions.into_iter();
    let first = match positions.next() {
        Some(p) => p,
        None => return fallback,
    };

    let threshold = config.depth_sample_threshold;
    let mut distinct = false;

    for pos in positions {
        if (pos.w - first.w).abs() <= threshold || (pos.z - first.z).abs() <= threshold {
            continue;
        }
        distinct = true;

        let m = (pos.z - first.z) / (pos.w - first.w);
        let c = pos.z - pos.w * m;

        if m == 1.0 || c == 0.0 {
            continue;
        }

        let near = -c / m;
        if near <= config.min_near_plane {
            continue;
        }

        return DepthPlanes {
            near,
            far: c / (1.0 - m),
        };
    }

    // every z and w identical: positive z below w means reversed depth with
    // an infinite far plane
    if !distinct && first.z > 0.0 && first.w > first.z {
        return DepthPlanes {
            near: first.z,
            far: f32::INFINITY,
        };
    }

    fallback
}

/// Clip-space positions from the first field of each record.
pub fn positions(data: &[u8], stride: u32) -> impl Iterator<Item = Vec4f> + '_ {
    let stride = stride.max(1) as usize;
    data.chunks(stride)
        .filter(|record| record.len() as u64 >= VEC4F_BYTES)
        .map(|record| bytemuck::pod_read_unaligned::<Vec4f>(&record[..VEC4F_BYTES as usize]))
}

/// Bytes of one capture as read back from staging.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Readback {
    pub bytes_written: u64,
    /// Records following the counter region
    pub data: Vec<u8>,
    /// Per-instance extents, only for incremental multi-instance captures
    pub instances: Vec<InstanceExtent>,
}

/// Map the staging buffer and pull out the written records. `counter_slots`
/// greater than one means the counters are cumulative per-instance counts.
pub fn read_capture<D: GpuDevice + ?Sized>(
    device: &mut D,
    staging: BufferHandle,
    capacity: u64,
    counter_bytes: u64,
    counter_slots: u32,
    stride: u32,
    stage: &'static str,
) -> Result<Readback> {
    let view = MappedRange::map(device, staging, 0..capacity + COUNTER_BYTES).map_err(|e| {
        error!("Failed to map stream-out staging buffer: {}", e);
        CaptureError::Readback { stage }
    })?;
    let bytes = view.bytes();

    let counters: Vec<u64> = (0..u64::from(counter_slots.max(1)))
        .map(|slot| {
            let at = (slot * COUNTER_SLOT_BYTES) as usize;
            bytes
                .get(at..at + COUNTER_SLOT_BYTES as usize)
                .map(bytemuck::pod_read_unaligned::<u64>)
                .unwrap_or(0)
        })
        .collect();

    let (instances, mut bytes_written) = if counter_slots > 1 {
        instance_extents(&counters, stride)
    } else {
        (Vec::new(), counters[0])
    };

    if bytes_written == 0 {
        return Ok(Readback::default());
    }

    let start = counter_bytes as usize;
    let available = bytes.len().saturating_sub(start) as u64;
    if bytes_written > available {
        warn!(
            "{} output claims {} bytes but only {} were captured",
            stage, bytes_written, available
        );
        bytes_written = available;
    }

    let data = bytes[start..start + bytes_written as usize].to_vec();

    Ok(Readback {
        bytes_written,
        data,
        instances,
    })
}
