//! Foundation module - small cross-cutting utilities
//!
//! Everything the core subsystems share but that isn't specific to any
//! one of them: frame timing and the logging bootstrap.

pub mod logging;
pub mod time;
