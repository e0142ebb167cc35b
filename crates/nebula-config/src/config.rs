//! Configuration structs with sensible defaults and RON persistence.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const CONFIG_FILE: &str = "config.ron";

/// Platform config directory for the batcher, e.g. `~/.config/nebula-batch`.
pub fn default_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("nebula-batch"))
}

/// Top-level batcher configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Static geometry region and visibility settings.
    pub batching: BatchingConfig,
    /// Render-system settings and capabilities.
    pub render: RenderConfig,
    /// Debug/development settings.
    pub debug: DebugConfig,
}

/// Static geometry batching configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BatchingConfig {
    /// Size of one region cell in world units.
    pub region_dimensions: [f32; 3],
    /// World position of the corner of region cell zero.
    pub origin: [f32; 3],
    /// Regions farther than this are not rendered (0 = unlimited).
    pub rendering_distance: f32,
    /// Build shadow edge lists for batched geometry.
    pub cast_shadows: bool,
    /// Initial visibility of every region.
    pub visible: bool,
    /// Render queue group batches are submitted to.
    pub render_queue_group: u8,
    /// Visibility mask applied to every region.
    pub visibility_flags: u32,
    /// Log per-bucket build details.
    pub log_details: bool,
    /// Extrusion distance for shadows from directional lights.
    pub shadow_extrusion_distance: f32,
}

/// Render-system configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RenderConfig {
    /// Use stencil shadow volumes.
    pub stencil_shadows: bool,
    /// The render system can run vertex programs (hardware shadow extrusion).
    pub vertex_programs: bool,
    /// Index capacity of each region's shadow index buffer.
    pub shadow_index_capacity: u32,
}

/// Debug/development configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Log level override (e.g., "debug", "info", "warn").
    pub log_level: String,
    /// Log the full region hierarchy after every build.
    pub dump_hierarchy: bool,
}

// --- Default implementations ---

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            region_dimensions: [1000.0; 3],
            origin: [0.0; 3],
            rendering_distance: 0.0,
            cast_shadows: false,
            visible: true,
            render_queue_group: 50,
            visibility_flags: u32::MAX,
            log_details: false,
            shadow_extrusion_distance: 10_000.0,
        }
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            stencil_shadows: false,
            vertex_programs: false,
            shadow_index_capacity: 51_200,
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            dump_hierarchy: false,
        }
    }
}

// --- Load / Save / Reload ---

impl Config {
    /// Load config from the given directory, or create a default config file.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE);

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
            let config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;
            log::info!("Loaded config from {}", config_path.display());
            Ok(config)
        } else {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Created default config at {}", config_path.display());
            Ok(config)
        }
    }

    /// Save config to the given directory as `config.ron`.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(ConfigError::WriteError)?;

        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(3)
            .separate_tuple_members(true)
            .enumerate_arrays(false);
        let serialized =
            ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::SerializeError)?;

        std::fs::write(config_dir.join(CONFIG_FILE), serialized).map_err(ConfigError::WriteError)?;
        Ok(())
    }

    /// Reject settings that would make region indexing or shadow generation fail.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let batching = &self.batching;
        if batching
            .region_dimensions
            .iter()
            .any(|d| !d.is_finite() || *d <= 0.0)
        {
            return Err(ConfigError::InvalidValue {
                field: "batching.region_dimensions",
                reason: "every axis must be positive and finite",
            });
        }
        if batching.origin.iter().any(|o| !o.is_finite()) {
            return Err(ConfigError::InvalidValue {
                field: "batching.origin",
                reason: "must be finite",
            });
        }
        if !batching.rendering_distance.is_finite() || batching.rendering_distance < 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "batching.rendering_distance",
                reason: "must be zero or positive",
            });
        }
        if self.render.stencil_shadows && self.render.shadow_index_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "render.shadow_index_capacity",
                reason: "must be non-zero when stencil shadows are enabled",
            });
        }
        Ok(())
    }

    /// Hot-reload: returns `Some(new_config)` if the file changed, `None` otherwise.
    pub fn reload(&self, config_dir: &Path) -> Result<Option<Self>, ConfigError> {
        let contents = std::fs::read_to_string(config_dir.join(CONFIG_FILE))
            .map_err(ConfigError::ReadError)?;
        let new_config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;

        if &new_config != self {
            log::info!("Config reloaded with changes");
            Ok(Some(new_config))
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_serializes() {
        let config = Config::default();
        let ron_str =
            ron::ser::to_string_pretty(&config, ron::ser::PrettyConfig::new().depth_limit(3))
                .unwrap();
        assert!(ron_str.contains("rendering_distance: 0.0"));
        assert!(ron_str.contains("shadow_index_capacity: 51200"));
        assert!(ron_str.contains("log_level: \"info\""));
    }

    #[test]
    fn test_config_roundtrip() {
        let mut config = Config::default();
        config.batching.region_dimensions = [250.0, 100.0, 250.0];
        config.render.stencil_shadows = true;
        let ron_str = ron::to_string(&config).unwrap();
        let deserialized: Config = ron::from_str(&ron_str).unwrap();
        assert_eq!(config, deserialized);
    }

    #[test]
    fn test_missing_section_uses_default() {
        let ron_str = "(batching: (cast_shadows: true))";
        let config: Config = ron::from_str(ron_str).unwrap();
        assert!(config.batching.cast_shadows);
        assert_eq!(config.batching.region_dimensions, [1000.0; 3]);
        assert_eq!(config.render, RenderConfig::default());
    }

    #[test]
    fn test_extra_field_ignored() {
        let result: Result<Config, _> = ron::from_str("(future_setting: true)");
        assert!(result.is_ok());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.batching.rendering_distance = 5000.0;
        config.batching.visibility_flags = 0x00FF;
        config.debug.log_level = "debug".to_string();

        config.save(dir.path()).unwrap();
        let loaded = Config::load_or_create(dir.path()).unwrap();
        assert_eq!(config, loaded);
    }

    #[test]
    fn test_load_creates_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_create(dir.path()).unwrap();
        assert_eq!(config, Config::default());
        assert!(dir.path().join(CONFIG_FILE).exists());
    }

    #[test]
    fn test_reload_detects_changes() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();
        config.save(dir.path()).unwrap();

        let mut modified = config.clone();
        modified.render.vertex_programs = true;
        modified.save(dir.path()).unwrap();

        let result = config.reload(dir.path()).unwrap();
        assert!(result.is_some_and(|c| c.render.vertex_programs));
    }

    #[test]
    fn test_reload_no_changes() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();
        config.save(dir.path()).unwrap();
        assert!(config.reload(dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_validate_defaults() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_regions() {
        let mut config = Config::default();
        config.batching.region_dimensions = [100.0, 0.0, 100.0];
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue {
                field: "batching.region_dimensions",
                ..
            })
        ));

        let mut config = Config::default();
        config.render.stencil_shadows = true;
        config.render.shadow_index_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_config_dir_is_namespaced() {
        if let Some(dir) = default_config_dir() {
            assert!(dir.ends_with("nebula-batch"));
        }
    }

    #[test]
    fn test_invalid_ron_produces_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "{{not valid}}").unwrap();
        let result = Config::load_or_create(dir.path());
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }
}
