//! Capacity Probe Loop
//!
//! Geometry and tessellation stages can emit an amount of data that is only
//! known after the fact. A statistics query around the draw reports how much
//! storage the stream output needed; the pool is grown until the draw fits.
//!
//! Instanced draws are captured incrementally: draw `n` covers instances
//! `0..n` and records its byte count in counter slot `n - 1`, so each
//! instance's share is the difference between two neighbouring counters.

use tracing::{debug, error};

use crate::config::CaptureConfig;
use crate::desc::{align_up, SoStatistics, COUNTER_BYTES, COUNTER_SLOT_BYTES, SO_STATISTICS_BYTES};
use crate::device::{BufferHandle, Command, CommandList, GpuDevice, MappedRange};
use crate::error::{CaptureError, DeviceError, Result, E_FAIL};
use crate::executor::CaptureExecutor;
use crate::scratch::{ScratchBuffers, ScratchPool};

/// Where the counters of a finished capture live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureLayout {
    /// Size of the counter region preceding the records
    pub counter_bytes: u64,
    /// One for a single capture, the instance count for incremental ones
    pub counter_slots: u32,
}

/// Size of a stream-output draw in records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputShape {
    /// Bytes per record
    pub stride: u32,
    /// Records per output primitive
    pub vertices_per_primitive: u64,
}

impl OutputShape {
    fn bytes_for(&self, stats: &SoStatistics) -> u64 {
        stats
            .primitives_storage_needed
            .saturating_mul(self.vertices_per_primitive)
            .saturating_mul(u64::from(self.stride))
    }
}

/// Counter region holding one slot per instance.
pub fn counter_region(instances: u32) -> u64 {
    align_up(u64::from(instances.max(1)) * COUNTER_SLOT_BYTES, COUNTER_BYTES)
}

/// Read the statistics resolved to the start of the staging buffer.
pub fn read_statistics<D: GpuDevice + ?Sized>(device: &mut D, staging: BufferHandle) -> Result<SoStatistics> {
    let view = MappedRange::map(device, staging, 0..SO_STATISTICS_BYTES).map_err(|e| {
        error!("Couldn't get stream-out statistics: {}", e);
        CaptureError::Statistics(e)
    })?;

    view.bytes()
        .get(..SO_STATISTICS_BYTES as usize)
        .map(bytemuck::pod_read_unaligned::<SoStatistics>)
        .ok_or(CaptureError::Statistics(DeviceError::new("Map", E_FAIL)))
}

/// Record the draw with `instances` instances wrapped in a statistics query.
fn record_probe(
    executor: &CaptureExecutor<'_>,
    list: &mut CommandList,
    buffers: &ScratchBuffers,
    capacity: u64,
    instances: u32,
) {
    executor.clear_counters(list, buffers, COUNTER_BYTES);
    list.push(Command::SetStreamOutput(CaptureExecutor::target(
        buffers,
        capacity,
        COUNTER_BYTES,
        0,
    )));
    list.push(Command::BeginStatistics {
        heap: buffers.query_heap,
        slot: 0,
    });
    list.push(executor.original_draw(instances));
    list.push(Command::EndStatistics {
        heap: buffers.query_heap,
        slot: 0,
    });
    list.push(Command::ResolveStatistics {
        heap: buffers.query_heap,
        slot: 0,
        dest: buffers.staging,
        dest_offset: 0,
    });
}

/// Run the full draw once under a statistics query.
pub fn probe<D: GpuDevice + ?Sized>(
    device: &mut D,
    executor: &mut CaptureExecutor<'_>,
    pool: &mut ScratchPool,
    instances: u32,
    stage: &'static str,
    config: &CaptureConfig,
) -> Result<SoStatistics> {
    let buffers = pool.acquire(device, 0, stage, config)?;
    let mut list = executor.begin();
    record_probe(executor, &mut list, &buffers, pool.capacity(), instances);
    executor.submit(device, list)?;

    let stats = read_statistics(device, buffers.staging)?;
    debug!(
        "Stream-out statistics: {} primitives written, {} needed",
        stats.primitives_written, stats.primitives_storage_needed
    );
    Ok(stats)
}

/// Capture a single-instance draw, retrying at a larger capacity until every
/// primitive fits. The records of the last probe are the capture.
pub fn capture_single<D: GpuDevice + ?Sized>(
    device: &mut D,
    executor: &mut CaptureExecutor<'_>,
    pool: &mut ScratchPool,
    shape: OutputShape,
    stage: &'static str,
    config: &CaptureConfig,
) -> Result<CaptureLayout> {
    loop {
        let stats = probe(device, executor, pool, 1, stage, config)?;
        let required = shape.bytes_for(&stats);
        if pool.capacity() >= required {
            break;
        }
        pool.ensure_capacity(device, required, stage, config)?;
    }

    let buffers = pool.acquire(device, 0, stage, config)?;
    let mut list = executor.begin();
    executor.record_readback(&mut list, &buffers, COUNTER_BYTES);
    executor.submit(device, list)?;

    Ok(CaptureLayout {
        counter_bytes: COUNTER_BYTES,
        counter_slots: 1,
    })
}

/// Capture an instanced draw one growing instance range at a time.
pub fn capture_incremental<D: GpuDevice + ?Sized>(
    device: &mut D,
    executor: &mut CaptureExecutor<'_>,
    pool: &mut ScratchPool,
    shape: OutputShape,
    instances: u32,
    stage: &'static str,
    config: &CaptureConfig,
) -> Result<CaptureLayout> {
    let stats = probe(device, executor, pool, instances, stage, config)?;

    let counter_bytes = counter_region(instances);
    let required = counter_bytes + shape.bytes_for(&stats);
    let buffers = pool.acquire(device, required, stage, config)?;
    let capacity = pool.capacity();

    let mut list = executor.begin();
    executor.clear_counters(&mut list, &buffers, counter_bytes);

    let flush_interval = config.instance_flush_interval.max(1);
    for inst in 1..=instances {
        list.push(Command::SetStreamOutput(CaptureExecutor::target(
            &buffers,
            capacity,
            counter_bytes,
            u64::from(inst - 1),
        )));
        list.push(executor.original_draw(inst));

        // keep huge instance counts from piling up in one list
        if inst % flush_interval == 0 {
            debug!("Flushing incremental capture at instance {} of {}", inst, instances);
            executor.flush(device, &mut list)?;
        }
    }

    executor.record_readback(&mut list, &buffers, counter_bytes);
    executor.submit(device, list)?;

    Ok(CaptureLayout {
        counter_bytes,
        counter_slots: instances,
    })
}
