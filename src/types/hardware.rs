//! Hardware status types
//!
//! Execution-mode and performance-metric structures maintained by the
//! model session after loads and generation calls.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Execution mode of the loaded engine.
///
/// `Unknown` is the valid pre-probe state, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HardwareMode {
    Cpu,
    Gpu,
    Unknown,
}

impl std::fmt::Display for HardwareMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            HardwareMode::Cpu => "CPU",
            HardwareMode::Gpu => "GPU",
            HardwareMode::Unknown => "UNKNOWN",
        };
        write!(f, "{}", s)
    }
}

/// Hardware execution state, mutated only by the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HardwareStatus {
    pub mode: HardwareMode,
    /// Layers actually offloaded to the GPU (0 in CPU mode)
    pub gpu_layers: u32,
    /// Whether acceleration indicators were found at probe time
    pub acceleration_available: bool,
    /// When the mode was last reconciled against a loaded engine
    pub last_checked: Option<DateTime<Utc>>,
}

impl Default for HardwareStatus {
    fn default() -> Self {
        Self {
            mode: HardwareMode::Unknown,
            gpu_layers: 0,
            acceleration_available: false,
            last_checked: None,
        }
    }
}

/// Rolling generation-performance metrics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    /// Wall-clock duration of the most recent synchronous call, seconds
    pub last_inference_secs: Option<f64>,
    /// Exponential rolling average of synchronous call durations
    pub avg_inference_secs: Option<f64>,
    /// Wall-clock duration of the most recent streamed response, seconds
    pub last_stream_secs: Option<f64>,
    /// Fragments per second over the most recent streamed response
    pub tokens_per_second: Option<f64>,
}

impl PerformanceMetrics {
    /// Fold one synchronous inference duration into the rolling average.
    pub fn record_inference(&mut self, secs: f64) {
        self.last_inference_secs = Some(secs);
        let avg = match self.avg_inference_secs {
            Some(avg) => avg * 0.9 + secs * 0.1,
            None => secs,
        };
        self.avg_inference_secs = Some(avg);
    }

    /// Record a finished stream: elapsed time and fragment throughput.
    pub fn record_stream(&mut self, secs: f64, tokens: usize) {
        self.last_stream_secs = Some(secs);
        self.tokens_per_second = if secs > 0.0 {
            Some(tokens as f64 / secs)
        } else {
            Some(0.0)
        };
    }
}

/// Serializable snapshot combining status and metrics, as returned by
/// `ModelSession::get_hardware_info`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HardwareInfo {
    pub mode: HardwareMode,
    pub gpu_layers: u32,
    pub acceleration_available: bool,
    pub last_checked: Option<DateTime<Utc>>,
    pub performance_metrics: PerformanceMetrics,
}
