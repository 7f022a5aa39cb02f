//! Configuration Module
//!
//! Tunables for scratch-pool growth, incremental probing and near/far plane
//! inference. Loadable from TOML so a host tool can override defaults.

use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Capture engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Scratch capacity used the first time the pool is created
    #[serde(default = "default_initial_capacity")]
    pub initial_capacity: u64,

    /// The pool doubles while below this size
    #[serde(default = "default_doubling_limit")]
    pub doubling_limit: u64,

    /// Above the doubling limit, requirements are rounded up to this granule
    #[serde(default = "default_growth_granule")]
    pub growth_granule: u64,

    /// Capacities at or above this are rejected without allocating
    #[serde(default = "default_capacity_guard")]
    pub capacity_guard: u64,

    /// Flush and resync the GPU every N incremental instance draws
    #[serde(default = "default_instance_flush_interval")]
    pub instance_flush_interval: u32,

    /// Near plane reported when none can be derived
    #[serde(default = "default_near_plane")]
    pub default_near_plane: f32,

    /// Far plane reported when none can be derived
    #[serde(default = "default_far_plane")]
    pub default_far_plane: f32,

    /// Minimum |dz| and |dw| between two clip-space samples
    #[serde(default = "default_depth_sample_threshold")]
    pub depth_sample_threshold: f32,

    /// Derived near planes at or below this are rejected
    #[serde(default = "default_min_near_plane")]
    pub min_near_plane: f32,

    /// Slots in the stream-output statistics query heap
    #[serde(default = "default_query_slots")]
    pub query_slots: u32,
}

fn default_initial_capacity() -> u64 {
    32 * 1024 * 1024
}

fn default_doubling_limit() -> u64 {
    256 * 1024 * 1024
}

fn default_growth_granule() -> u64 {
    16 * 1024 * 1024
}

fn default_capacity_guard() -> u64 {
    0xFFFF_0000
}

fn default_instance_flush_interval() -> u32 {
    1000
}

fn default_near_plane() -> f32 {
    0.1
}

fn default_far_plane() -> f32 {
    100.0
}

fn default_depth_sample_threshold() -> f32 {
    0.01
}

fn default_min_near_plane() -> f32 {
    0.000001
}

fn default_query_slots() -> u32 {
    16
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            initial_capacity: default_initial_capacity(),
            doubling_limit: default_doubling_limit(),
            growth_granule: default_growth_granule(),
            capacity_guard: default_capacity_guard(),
            instance_flush_interval: default_instance_flush_interval(),
            default_near_plane: default_near_plane(),
            default_far_plane: default_far_plane(),
            depth_sample_threshold: default_depth_sample_threshold(),
            min_near_plane: default_min_near_plane(),
            query_slots: default_query_slots(),
        }
    }
}

impl CaptureConfig {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: CaptureConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
