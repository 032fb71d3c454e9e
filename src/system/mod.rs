//! System probing
//!
//! Detects acceleration capability for model loading.

pub mod gpu;
