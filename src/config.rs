//! Configuration file handling.
//!
//! This module provides loading and parsing of `.rest_shape.json`
//! configuration files: pipeline [`Settings`] plus an optional default catalog
//! fixture for the CLI.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = ".rest_shape.json";

/// Pipeline settings. Every field has a default, so `{}` is a valid file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Keep record representations in render errors and log them
    pub debug: bool,
    /// Add a `links` object for deferred and id-only relations
    pub enable_links: bool,
    /// Add a `self` entry to `links`
    pub enable_self_links: bool,
    /// Prefix links with the record's canonical path
    pub enable_host_relative_links: bool,
    /// Reuse child serializers within one request
    pub enable_serializer_cache: bool,
    /// Defer many-relations whose field does not say otherwise
    pub defer_many_relations: bool,
    /// Default page size; `None` disables paging unless the client asks
    pub page_size: Option<usize>,
    pub max_page_size: Option<usize>,
    pub page_query_param: String,
    pub page_size_query_param: String,
    pub exclude_count_query_param: String,
    /// Bucket prefix for secondary records of the primary resource type
    pub additional_primary_resource_prefix: String,
    /// Serve reads with the dict-row executor
    pub use_fast_executor: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            debug: false,
            enable_links: true,
            enable_self_links: false,
            enable_host_relative_links: true,
            enable_serializer_cache: true,
            defer_many_relations: false,
            page_size: None,
            max_page_size: None,
            page_query_param: "page".to_string(),
            page_size_query_param: "per_page".to_string(),
            exclude_count_query_param: "exclude_count".to_string(),
            additional_primary_resource_prefix: "+".to_string(),
            use_fast_executor: false,
        }
    }
}

/// Top-level configuration file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub settings: Settings,

    /// Catalog fixture used when `--fixture` is not given
    #[serde(default)]
    pub fixture: Option<PathBuf>,
}

impl ConfigFile {
    /// Load configuration from `.rest_shape.json` in the current directory.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The config file doesn't exist
    /// - The file cannot be read
    /// - The JSON is invalid
    pub fn load() -> Result<Self, Box<dyn Error>> {
        let config_path = PathBuf::from(CONFIG_FILE_NAME);

        if !config_path.exists() {
            return Err(format!(
                "Configuration file not found: {CONFIG_FILE_NAME}\n\n\
                 Please create a {CONFIG_FILE_NAME} file in the current directory.\n\n\
                 Example:\n\
                 {{\n  \
                   \"fixture\": \"./catalog.json\",\n  \
                   \"settings\": {{\n    \
                     \"page_size\": 25,\n    \
                     \"enable_links\": false\n  \
                   }}\n\
                 }}\n"
            )
            .into());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from an explicit path.
    pub fn load_from(path: &Path) -> Result<Self, Box<dyn Error>> {
        let content = fs::read_to_string(path).map_err(|e| {
            Box::new(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("Failed to read {}: {}", path.display(), e),
            )) as Box<dyn Error>
        })?;

        let config: ConfigFile = serde_json::from_str(&content).map_err(|e| {
            Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("Invalid JSON in {}: {}", path.display(), e),
            )) as Box<dyn Error>
        })?;

        Ok(config)
    }

    /// Configuration from `path` if given, else from the working directory,
    /// else defaults.
    pub fn resolve(path: Option<&Path>) -> Result<Self, Box<dyn Error>> {
        match path {
            Some(path) => Self::load_from(path),
            None if Path::new(CONFIG_FILE_NAME).exists() => Self::load(),
            None => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_empty_object_uses_defaults() {
        let config: ConfigFile = serde_json::from_str("{}").unwrap();
        assert_eq!(config.settings, Settings::default());
        assert!(config.fixture.is_none());
    }

    #[test]
    fn test_partial_settings() {
        let json = r#"
        {
            "fixture": "./catalog.json",
            "settings": {
                "page_size": 25,
                "defer_many_relations": true,
                "additional_primary_resource_prefix": "~"
            }
        }
        "#;
        let config: ConfigFile = serde_json::from_str(json).unwrap();
        assert_eq!(config.fixture, Some(PathBuf::from("./catalog.json")));
        assert_eq!(config.settings.page_size, Some(25));
        assert!(config.settings.defer_many_relations);
        assert_eq!(config.settings.additional_primary_resource_prefix, "~");
        assert!(config.settings.enable_links);
        assert_eq!(config.settings.page_query_param, "page");
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert!(settings.enable_serializer_cache);
        assert!(settings.enable_host_relative_links);
        assert!(!settings.use_fast_executor);
        assert_eq!(settings.page_size, None);
        assert_eq!(settings.page_size_query_param, "per_page");
    }

    #[test]
    fn test_load_from_path() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(br#"{"settings": {"debug": true}}"#).unwrap();
        file.flush().unwrap();
        let config = ConfigFile::load_from(file.path()).unwrap();
        assert!(config.settings.debug);
    }

    #[test]
    fn test_load_from_invalid_json() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"{ invalid json }").unwrap();
        file.flush().unwrap();
        let err = ConfigFile::load_from(file.path()).unwrap_err();
        assert!(err.to_string().contains("Invalid JSON"));
    }

    #[test]
    #[serial]
    fn test_load_missing_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let old_dir = std::env::current_dir().unwrap();
        std::env::set_current_dir(&temp_dir).unwrap();

        let result = ConfigFile::load();
        let resolved = ConfigFile::resolve(None);

        std::env::set_current_dir(old_dir).unwrap();

        assert!(result.unwrap_err().to_string().contains("not found"));
        assert_eq!(resolved.unwrap().settings, Settings::default());
    }

    #[test]
    #[serial]
    fn test_load_from_working_directory() {
        let temp_dir = tempfile::tempdir().unwrap();
        fs::write(
            temp_dir.path().join(CONFIG_FILE_NAME),
            r#"{"settings": {"page_size": 2}}"#,
        )
        .unwrap();

        let old_dir = std::env::current_dir().unwrap();
        std::env::set_current_dir(&temp_dir).unwrap();

        let config = ConfigFile::load();

        std::env::set_current_dir(old_dir).unwrap();

        assert_eq!(config.unwrap().settings.page_size, Some(2));
    }

    #[test]
    fn test_resolve_explicit_missing_path_is_error() {
        let result = ConfigFile::resolve(Some(Path::new("/nonexistent/.rest_shape.json")));
        assert!(result.is_err());
    }
}
