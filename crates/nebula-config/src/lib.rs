//! Configuration for the static geometry batcher.
//!
//! Settings persist to disk as RON files. Supports CLI overrides via clap,
//! hot-reload detection, and forward/backward compatible serialization.

mod cli;
mod config;
mod error;

pub use cli::CliArgs;
pub use config::{BatchingConfig, Config, DebugConfig, RenderConfig, default_config_dir};
pub use error::ConfigError;
