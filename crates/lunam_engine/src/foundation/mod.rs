//! Foundation module - shared utilities used throughout the engine
//!
//! - Logging setup and re-exported log macros
//! - Math aliases and camera matrices

pub mod logging;
pub mod math;
