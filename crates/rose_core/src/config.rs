use serde::{Deserialize, Serialize};

#[cfg(feature = "cli")]
use clap::Args;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NexusConfig {
    /// Power-iteration budget for the eigen step
    pub eigen_max_iterations: usize,

    /// Convergence tolerance (max component change) for the eigen step
    pub eigen_tolerance: f64,

    /// Blend rate used when re-estimating the pattern library between ticks
    pub reestimate_rate: f64,

    /// Keep a visualizer frame per tick
    pub record_frames: bool,

    /// Accumulate per-pattern statistics for library re-estimation
    pub collect_statistics: bool,
}

impl Default for NexusConfig {
    fn default() -> Self {
        Self {
            eigen_max_iterations: 512,
            eigen_tolerance: 1e-12,
            reestimate_rate: 0.05,
            record_frames: false,
            collect_statistics: false,
        }
    }
}

/// Engine flags as given on the command line. Unset numeric flags leave
/// the file's value alone; switches only turn features on.
#[cfg(feature = "cli")]
#[derive(Debug, Clone, Default, PartialEq, Args)]
pub struct NexusArgs {
    /// Power-iteration budget for the eigen step [default: 512]
    #[arg(long)]
    pub eigen_max_iterations: Option<usize>,

    /// Convergence tolerance (max component change) for the eigen step [default: 1e-12]
    #[arg(long)]
    pub eigen_tolerance: Option<f64>,

    /// Blend rate used when re-estimating the pattern library [default: 0.05]
    #[arg(long)]
    pub reestimate_rate: Option<f64>,

    /// Keep a visualizer frame per tick
    #[arg(long)]
    pub record_frames: bool,

    /// Accumulate per-pattern statistics for library re-estimation
    #[arg(long)]
    pub collect_statistics: bool,
}

#[cfg(feature = "cli")]
impl NexusArgs {
    /// Apply these flags on top of `base` (usually the config file's section).
    pub fn overlay(&self, base: &NexusConfig) -> NexusConfig {
        NexusConfig {
            eigen_max_iterations: self.eigen_max_iterations.unwrap_or(base.eigen_max_iterations),
            eigen_tolerance: self.eigen_tolerance.unwrap_or(base.eigen_tolerance),
            reestimate_rate: self.reestimate_rate.unwrap_or(base.reestimate_rate),
            record_frames: base.record_frames || self.record_frames,
            collect_statistics: base.collect_statistics || self.collect_statistics,
        }
    }
}
