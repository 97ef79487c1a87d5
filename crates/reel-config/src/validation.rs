//! Configuration validation module.
//!
//! Collects every problem in one pass, failing fast at startup rather than
//! when a lane first runs.

use crate::AppConfig;
use reel_commands::CommandsConfig;
use std::collections::HashSet;
use std::fmt;

/// Configuration validation error variants.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValidationError {
    /// No lanes are configured.
    NoLanes,
    /// Two lanes share a name.
    DuplicateLane { name: String },
    /// A lane has an empty name.
    EmptyLaneName,
    /// A lane lists the same resource twice.
    DuplicateResource { lane: String, resource: String },
    /// The queue store URL is not a SQLite URL.
    InvalidStoreUrl { url: String },
    /// Pool size must be at least one.
    InvalidPoolSize { value: u32 },
    /// Timeout value must be positive.
    NonPositiveTimeout { name: String, value: u64 },
    /// Log filter is empty.
    EmptyLogFilter,
}

impl fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoLanes => write!(f, "At least one command lane must be configured"),
            Self::DuplicateLane { name } => write!(f, "Lane '{}' is configured more than once", name),
            Self::EmptyLaneName => write!(f, "Lane names cannot be empty"),
            Self::DuplicateResource { lane, resource } => {
                write!(f, "Lane '{}' lists resource '{}' more than once", lane, resource)
            }
            Self::InvalidStoreUrl { url } => {
                write!(f, "Invalid command store URL: '{}' (expected sqlite:...)", url)
            }
            Self::InvalidPoolSize { value } => {
                write!(f, "Invalid store pool size: {} (must be at least 1)", value)
            }
            Self::NonPositiveTimeout { name, value } => {
                write!(f, "Timeout '{}' must be positive, got {}", name, value)
            }
            Self::EmptyLogFilter => write!(f, "Log filter cannot be empty"),
        }
    }
}

impl std::error::Error for ConfigValidationError {}

/// Result of configuration validation containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    errors: Vec<ConfigValidationError>,
}

impl ValidationResult {
    fn add_error(&mut self, error: ConfigValidationError) {
        self.errors.push(error);
    }

    /// Returns true if validation passed (no errors).
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the validation errors.
    pub fn errors(&self) -> &[ConfigValidationError] {
        &self.errors
    }

    /// Converts to Result, returning Err with all errors if any exist.
    pub fn into_result(self) -> Result<(), Vec<ConfigValidationError>> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self.errors)
        }
    }
}

/// Configuration validator.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validates the entire application configuration.
    ///
    /// Returns Ok(()) if valid, or Err with all validation errors found.
    pub fn validate(config: &AppConfig) -> Result<(), Vec<ConfigValidationError>> {
        let mut result = ValidationResult::default();

        if config.logging.filter.trim().is_empty() {
            result.add_error(ConfigValidationError::EmptyLogFilter);
        }
        Self::validate_commands(&config.commands, &mut result);

        result.into_result()
    }

    fn validate_commands(config: &CommandsConfig, result: &mut ValidationResult) {
        if config.lanes.is_empty() {
            result.add_error(ConfigValidationError::NoLanes);
        }

        let mut names = HashSet::new();
        for lane in &config.lanes {
            if lane.name.trim().is_empty() {
                result.add_error(ConfigValidationError::EmptyLaneName);
            } else if !names.insert(lane.name.as_str()) {
                result.add_error(ConfigValidationError::DuplicateLane {
                    name: lane.name.clone(),
                });
            }

            let mut resources = HashSet::new();
            for resource in &lane.resources {
                if !resources.insert(resource.as_str()) {
                    result.add_error(ConfigValidationError::DuplicateResource {
                        lane: lane.name.clone(),
                        resource: resource.clone(),
                    });
                }
            }
        }

        if !config.store.url.starts_with("sqlite:") {
            result.add_error(ConfigValidationError::InvalidStoreUrl {
                url: config.store.url.clone(),
            });
        }
        if config.store.max_connections == 0 {
            result.add_error(ConfigValidationError::InvalidPoolSize {
                value: config.store.max_connections,
            });
        }

        for (name, value) in [
            ("commands.store.connect_timeout_secs", config.store.connect_timeout_secs),
            ("commands.store_retry_interval_ms", config.store_retry_interval_ms),
            ("commands.shutdown_timeout_secs", config.shutdown_timeout_secs),
        ] {
            if value == 0 {
                result.add_error(ConfigValidationError::NonPositiveTimeout {
                    name: name.to_string(),
                    value,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reel_commands::LaneConfig;

    #[test]
    fn test_default_config_is_valid() {
        assert!(ConfigValidator::validate(&AppConfig::default()).is_ok());
    }

    #[test]
    fn test_lane_errors() {
        let mut config = AppConfig::default();
        config.commands.lanes = vec![
            LaneConfig::new("general", ["anidb_udp", "anidb_udp"]),
            LaneConfig::local("general"),
            LaneConfig::local(" "),
        ];

        let errors = ConfigValidator::validate(&config).unwrap_err();
        assert!(errors.contains(&ConfigValidationError::DuplicateLane { name: "general".into() }));
        assert!(errors.contains(&ConfigValidationError::EmptyLaneName));
        assert!(errors.contains(&ConfigValidationError::DuplicateResource {
            lane: "general".into(),
            resource: "anidb_udp".into(),
        }));
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = AppConfig::default();
        config.commands.lanes.clear();
        config.commands.store.url = "postgres://localhost/reel".into();
        config.commands.store.max_connections = 0;
        config.commands.shutdown_timeout_secs = 0;
        config.logging.filter = String::new();

        let errors = ConfigValidator::validate(&config).unwrap_err();
        assert_eq!(errors.len(), 5);
        assert!(errors.contains(&ConfigValidationError::NoLanes));
        assert!(errors.iter().any(|e| e.to_string().contains("postgres://")));
        assert!(errors.contains(&ConfigValidationError::NonPositiveTimeout {
            name: "commands.shutdown_timeout_secs".into(),
            value: 0,
        }));
    }
}
