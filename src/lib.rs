//! dds-verify library

pub mod cli;
pub mod config;
pub mod harness;
pub mod local_logger;
pub mod logger;
pub mod port_utils;
mod prelude;
pub mod spy;
pub mod supervisor;

pub use local_logger::clean_logger;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
