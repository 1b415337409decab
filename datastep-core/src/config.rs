//! Configuration for the data-step engine.
//!
//! Uses `figment` for layered configuration: defaults -> user config ->
//! workspace config -> environment -> explicit overrides. Configuration is
//! loaded from `~/.config/datastep/config.toml` and/or
//! `.datastep/config.toml` in the workspace directory.

use crate::interface::CsvOptions;
use crate::library::{DEFAULT_DATA_EXTENSION, DEFAULT_HEADER_EXTENSION};
use crate::sort::{DEFAULT_MERGE_FAN_IN, DEFAULT_SPLIT_SIZE};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub library: LibraryConfig,
    #[serde(default)]
    pub canonical: CanonicalConfig,
    #[serde(default)]
    pub delimited: CsvOptions,
    #[serde(default)]
    pub sort: SortConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LibraryConfig {
    /// Directory holding data sets.
    #[serde(default = "default_root")]
    pub root: PathBuf,
}

fn default_root() -> PathBuf {
    PathBuf::from("data")
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
        }
    }
}

/// Canonical storage format settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalConfig {
    #[serde(default = "default_header_extension")]
    pub header_extension: String,
    #[serde(default = "default_data_extension")]
    pub data_extension: String,
    /// gzip level, 0 (store) to 9 (best).
    #[serde(default = "default_compression_level")]
    pub compression_level: u32,
}

fn default_header_extension() -> String {
    DEFAULT_HEADER_EXTENSION.into()
}

fn default_data_extension() -> String {
    DEFAULT_DATA_EXTENSION.into()
}

fn default_compression_level() -> u32 {
    6
}

impl Default for CanonicalConfig {
    fn default() -> Self {
        Self {
            header_extension: default_header_extension(),
            data_extension: default_data_extension(),
            compression_level: default_compression_level(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortConfig {
    #[serde(default = "default_split_size")]
    pub split_size: usize,
    /// Most chunks merged in one pass.
    #[serde(default = "default_merge_fan_in")]
    pub merge_fan_in: usize,
    /// Parent directory for sort scratch files.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_dir: Option<PathBuf>,
}

fn default_split_size() -> usize {
    DEFAULT_SPLIT_SIZE
}

fn default_merge_fan_in() -> usize {
    DEFAULT_MERGE_FAN_IN
}

impl Default for SortConfig {
    fn default() -> Self {
        Self {
            split_size: default_split_size(),
            merge_fan_in: default_merge_fan_in(),
            work_dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive, e.g. `info` or `datastep_core=debug`.
    #[serde(default = "default_level")]
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

fn default_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
        }
    }
}

impl EngineConfig {
    /// Validate the configuration and return a list of problems.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.sort.split_size == 0 {
            warnings.push("sort.split_size is 0; at least one row per chunk is required".to_string());
        }
        if self.sort.merge_fan_in < 2 {
            warnings.push(format!(
                "sort.merge_fan_in is {}; merging needs at least 2 chunks per pass",
                self.sort.merge_fan_in
            ));
        }
        if self.canonical.compression_level > 9 {
            warnings.push(format!(
                "canonical.compression_level is {}; gzip levels run 0-9",
                self.canonical.compression_level
            ));
        }
        if self.canonical.header_extension == self.canonical.data_extension {
            warnings.push(format!(
                "canonical header and data extensions are both '{}'",
                self.canonical.header_extension
            ));
        }
        for ext in [
            &self.canonical.header_extension,
            &self.canonical.data_extension,
            &self.delimited.extension,
        ] {
            if ext.is_empty() || ext.contains('.') {
                warnings.push(format!("file extension '{ext}' must be non-empty without dots"));
            }
        }
        for w in self.delimited.validate() {
            warnings.push(format!("[delimited] {w}"));
        }

        warnings
    }
}

/// Load configuration from the standard locations.
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&EngineConfig>,
) -> Result<EngineConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(EngineConfig::default()));

    // User-level config
    if let Some(config_dir) = directories::ProjectDirs::from("dev", "datastep", "datastep") {
        let user_config = config_dir.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    // Workspace-level config
    if let Some(ws) = workspace {
        let ws_config = ws.join(".datastep").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // Environment variables (DATASTEP_LIBRARY__ROOT, DATASTEP_SORT__SPLIT_SIZE, etc.)
    figment = figment.merge(Env::prefixed("DATASTEP_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(Box::new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::LineEnding;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.library.root, PathBuf::from("data"));
        assert_eq!(config.canonical.header_extension, "hgzip");
        assert_eq!(config.canonical.data_extension, "rgzip");
        assert_eq!(config.sort.split_size, 100_000);
        assert_eq!(config.delimited.delimiter, ',');
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let config = EngineConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let deserialized: EngineConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(deserialized, config);
    }

    #[test]
    fn test_load_config_with_overrides() {
        let mut overrides = EngineConfig::default();
        overrides.sort.split_size = 50;
        overrides.logging.json = true;

        let config = load_config(None, Some(&overrides)).unwrap();
        assert_eq!(config.sort.split_size, 50);
        assert!(config.logging.json);
    }

    #[test]
    fn test_load_config_from_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let config_dir = dir.path().join(".datastep");
        std::fs::create_dir_all(&config_dir).unwrap();
        std::fs::write(
            config_dir.join("config.toml"),
            r#"
[library]
root = "/srv/warehouse"

[delimited]
delimiter = "|"
line_ending = "cr_lf"

[sort]
split_size = 2500
"#,
        )
        .unwrap();

        let config = load_config(Some(dir.path()), None).unwrap();
        assert_eq!(config.library.root, PathBuf::from("/srv/warehouse"));
        assert_eq!(config.delimited.delimiter, '|');
        assert_eq!(config.delimited.line_ending, LineEnding::CrLf);
        assert!(config.delimited.header_row);
        assert_eq!(config.sort.split_size, 2500);
        assert_eq!(config.sort.merge_fan_in, 64);
        assert_eq!(config.canonical.compression_level, 6);
    }

    #[test]
    fn test_validate_reports_problems() {
        let mut config = EngineConfig::default();
        config.sort.split_size = 0;
        config.canonical.compression_level = 12;
        config.canonical.data_extension = "hgzip".into();
        config.sort.merge_fan_in = 1;
        let warnings = config.validate();
        assert_eq!(warnings.len(), 4);
        assert!(warnings[1].contains("merge_fan_in"));
        assert!(warnings[0].contains("split_size"));
    }
}
