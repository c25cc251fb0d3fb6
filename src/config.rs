//! Core configuration
//!
//! Loaded once per agent from JSON; every field has a workable default
//! so tests and embedded uses can start from `CoreConfig::default()`.

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::{CoreError, CoreErrorCode, CoreResult};

fn default_zone_name() -> String {
    "tempZone".to_string()
}

fn default_local_host() -> String {
    "localhost".to_string()
}

fn default_descriptor_table_size() -> usize {
    1026
}

fn default_single_buffer_max_bytes() -> i64 {
    32 * 1024 * 1024
}

fn default_catalog_pool_size() -> usize {
    4
}

fn default_vault_path_retry_limit() -> u32 {
    100
}

fn default_path_length_limit() -> usize {
    1024
}

/// Agent-wide settings for the lifecycle core.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CoreConfig {
    /// Name of the local zone; paths rooted elsewhere are forwarded.
    pub zone_name: String,
    /// Hostname used when voting.
    pub local_host: String,
    /// Capacity of the L1 descriptor table.
    pub descriptor_table_size: usize,
    /// Largest transfer carried inline in a single buffer.
    pub single_buffer_max_bytes: i64,
    /// Catalog connection permits.
    pub catalog_pool_size: usize,
    /// Attempts at generating a non-colliding vault path.
    pub vault_path_retry_limit: u32,
    /// Longest accepted logical path.
    pub path_length_limit: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            zone_name: default_zone_name(),
            local_host: default_local_host(),
            descriptor_table_size: default_descriptor_table_size(),
            single_buffer_max_bytes: default_single_buffer_max_bytes(),
            catalog_pool_size: default_catalog_pool_size(),
            vault_path_retry_limit: default_vault_path_retry_limit(),
            path_length_limit: default_path_length_limit(),
        }
    }
}

impl CoreConfig {
    /// Load and validate a JSON config file.
    pub fn from_json_file(path: &Path) -> CoreResult<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            CoreError::with_source(
                CoreErrorCode::ConfigurationError,
                format!("cannot read config [{}]", path.display()),
                e,
            )
        })?;
        let config: CoreConfig = serde_json::from_str(&contents).map_err(|e| {
            CoreError::new(
                CoreErrorCode::ConfigurationError,
                format!("invalid config [{}]: {}", path.display(), e),
            )
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.zone_name.is_empty() {
            return Err(CoreError::new(
                CoreErrorCode::ConfigurationError,
                "zone_name must not be empty",
            ));
        }
        if self.descriptor_table_size < 4 {
            return Err(CoreError::new(
                CoreErrorCode::ConfigurationError,
                "descriptor_table_size must be at least 4 (slots 0-2 are reserved)",
            ));
        }
        if self.single_buffer_max_bytes <= 0 {
            return Err(CoreError::new(
                CoreErrorCode::ConfigurationError,
                "single_buffer_max_bytes must be positive",
            ));
        }
        if self.path_length_limit == 0 {
            return Err(CoreError::new(
                CoreErrorCode::ConfigurationError,
                "path_length_limit must be positive",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        assert!(CoreConfig::default().validate().is_ok());
    }

    #[test]
    fn test_load_from_file_with_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "{{\"zone_name\": \"prodZone\", \"descriptor_table_size\": 64}}"
        )
        .unwrap();
        let config = CoreConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.zone_name, "prodZone");
        assert_eq!(config.descriptor_table_size, 64);
        // Untouched fields keep their defaults.
        assert_eq!(config.catalog_pool_size, 4);
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{\"zone\": \"typo\"}}").unwrap();
        let err = CoreConfig::from_json_file(file.path()).unwrap_err();
        assert_eq!(err.code(), CoreErrorCode::ConfigurationError);
    }

    #[test]
    fn test_undersized_table_is_rejected() {
        let config = CoreConfig {
            descriptor_table_size: 3,
            ..CoreConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = CoreConfig::from_json_file(Path::new("/nonexistent/core.json")).unwrap_err();
        assert_eq!(err.code(), CoreErrorCode::ConfigurationError);
    }
}
