//! Command-line argument parsing for the batching demo.

use std::path::PathBuf;

use clap::Parser;

use crate::Config;

/// Static geometry batcher command-line arguments.
///
/// CLI values override settings loaded from `config.ron`.
#[derive(Parser, Debug, Default)]
#[command(name = "nebula-batch", about = "Static geometry batching demo")]
pub struct CliArgs {
    /// Region cell size in world units (applied to all three axes).
    #[arg(long)]
    pub region_size: Option<f32>,

    /// Regions farther than this are not rendered (0 = unlimited).
    #[arg(long)]
    pub rendering_distance: Option<f32>,

    /// Build stencil shadow volumes.
    #[arg(long)]
    pub shadows: Option<bool>,

    /// Log per-bucket build details.
    #[arg(long)]
    pub log_details: Option<bool>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(size) = args.region_size {
            self.batching.region_dimensions = [size; 3];
        }
        if let Some(distance) = args.rendering_distance {
            self.batching.rendering_distance = distance;
        }
        if let Some(shadows) = args.shadows {
            self.batching.cast_shadows = shadows;
            self.render.stencil_shadows = shadows;
        }
        if let Some(log_details) = args.log_details {
            self.batching.log_details = log_details;
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_override() {
        let mut config = Config::default();
        let args = CliArgs {
            region_size: Some(250.0),
            shadows: Some(true),
            ..Default::default()
        };
        config.apply_cli_overrides(&args);
        assert_eq!(config.batching.region_dimensions, [250.0; 3]);
        assert!(config.batching.cast_shadows);
        assert!(config.render.stencil_shadows);
        // Non-overridden fields retain defaults
        assert_eq!(config.batching.rendering_distance, 0.0);
        assert_eq!(config.debug.log_level, "info");
    }

    #[test]
    fn test_cli_no_override() {
        let original = Config::default();
        let mut config = Config::default();
        config.apply_cli_overrides(&CliArgs::default());
        assert_eq!(config, original);
    }

    #[test]
    fn test_cli_parses_flags() {
        let args = CliArgs::parse_from([
            "nebula-batch",
            "--rendering-distance",
            "1500",
            "--log-level",
            "debug",
        ]);
        assert_eq!(args.rendering_distance, Some(1500.0));
        assert_eq!(args.log_level.as_deref(), Some("debug"));
        assert!(args.shadows.is_none());
    }
}
