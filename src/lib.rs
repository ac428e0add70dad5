//! pack library
//!
//! Option resolution, build plan derivation and the drivers for each mode.

pub mod cli;
pub mod config;
pub mod error;
pub mod executor;
pub mod plan;
pub mod supervisor;
pub mod toolchain;
pub mod utils;

pub use cli::Cli;
pub use config::{OptionResolver, Options};
pub use plan::{BuildPlan, ConfigBuilder};
