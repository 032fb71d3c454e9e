//! Shared type definitions
//!
//! This module contains all shared data types used across the runtime.

pub mod config;
pub mod hardware;
pub mod message;
pub mod model;
