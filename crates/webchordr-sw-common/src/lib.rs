//! # webchordr SW Common
//!
//! Logging configuration shared by the offline cache crates and the tools
//! that drive them.

pub mod logging;

pub use logging::{init_logging, LogConfig, LogFormat};
