//! GPU detection and process configuration
//!
//! Best-effort detection of CUDA acceleration before an engine loads, and
//! the environment fixups the native engine expects when acceleration is
//! available.

use std::env;
use std::process::Command;

/// Check whether CUDA acceleration is likely available.
///
/// Environment indicators are checked first, then `nvidia-smi`.
pub fn detect_acceleration() -> bool {
    if env_indicates_acceleration(
        env::var("CUDA_VISIBLE_DEVICES").ok().as_deref(),
        env::var("LLAMA_CUBLAS").ok().as_deref(),
    ) {
        tracing::info!("CUDA detected via environment variables");
        return true;
    }

    if nvidia_smi_present() {
        tracing::info!("CUDA detected via nvidia-smi");
        return true;
    }

    tracing::debug!("No CUDA indicators found");
    false
}

/// Pure check over the two environment indicators.
///
/// `CUDA_VISIBLE_DEVICES=-1` explicitly disables the GPU, so it does not
/// count as an indicator.
pub fn env_indicates_acceleration(
    cuda_visible_devices: Option<&str>,
    llama_cublas: Option<&str>,
) -> bool {
    if let Some(devices) = cuda_visible_devices {
        if devices != "-1" {
            return true;
        }
    }
    llama_cublas == Some("1")
}

fn nvidia_smi_present() -> bool {
    Command::new("nvidia-smi")
        .arg("-L")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Set the process environment the way the native engine expects when
/// acceleration is available. A no-op when it is not.
pub fn ensure_acceleration_env(acceleration_available: bool) {
    if !acceleration_available {
        tracing::info!("CUDA not available, leaving GPU configuration alone");
        return;
    }

    if env::var("LLAMA_CUBLAS").as_deref() != Ok("1") {
        env::set_var("LLAMA_CUBLAS", "1");
        tracing::info!("Set LLAMA_CUBLAS=1");
    }

    if env::var("CUDA_VISIBLE_DEVICES").as_deref() == Ok("-1") {
        env::set_var("CUDA_VISIBLE_DEVICES", "0");
        tracing::info!("Changed CUDA_VISIBLE_DEVICES from -1 to 0 to allow GPU use");
    }
}
