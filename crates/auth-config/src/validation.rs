//! Configuration validation utilities

use crate::config::AppConfig;
use thiserror::Error;
use validator::{Validate, ValidationErrors};

#[derive(Debug, Error)]
pub enum ConfigValidationError {
    #[error("Validation failed: {0}")]
    ValidationFailed(#[from] ValidationErrors),

    #[error("Key rotation validation failed: {message}")]
    KeyRotationValidationFailed { message: String },

    #[error("Database validation failed: {message}")]
    DatabaseValidationFailed { message: String },

    #[error("Feature validation failed: {message}")]
    FeatureValidationFailed { message: String },
}

pub struct ConfigValidator;

impl ConfigValidator {
    pub fn validate_config(config: &AppConfig) -> Result<(), ConfigValidationError> {
        // Basic validation using the `validator` crate's derived rules.
        config.validate()?;

        Self::validate_key_rotation_config(config)?;
        Self::validate_database_config(config)?;
        Self::validate_feature_config(config)?;

        Ok(())
    }

    /// Enforces the invariant from spec §4.2: retention must cover the
    /// longest downstream token TTL, or a verifier could stop trusting a
    /// DEPRECATED key while a token signed under it is still live.
    fn validate_key_rotation_config(config: &AppConfig) -> Result<(), ConfigValidationError> {
        let rotation = &config.key_rotation;
        let token_ttl = config.token_issuance.token_ttl_secs.max(0) as u64;

        if rotation.retention_secs < token_ttl {
            return Err(ConfigValidationError::KeyRotationValidationFailed {
                message: format!(
                    "key_rotation.retention_secs ({}) must be >= token_issuance.token_ttl_secs ({})",
                    rotation.retention_secs, token_ttl
                ),
            });
        }

        if rotation.archive_ttl_secs == 0 {
            return Err(ConfigValidationError::KeyRotationValidationFailed {
                message: "key_rotation.archive_ttl_secs must be greater than zero".to_string(),
            });
        }

        Ok(())
    }

    fn validate_database_config(config: &AppConfig) -> Result<(), ConfigValidationError> {
        let db = &config.database;

        if db.max_connections < db.min_connections {
            return Err(ConfigValidationError::DatabaseValidationFailed {
                message: "Max connections must be greater than or equal to min connections"
                    .to_string(),
            });
        }

        if db.max_connections > 1000 {
            return Err(ConfigValidationError::DatabaseValidationFailed {
                message: "Max connections should not exceed 1000 for performance reasons"
                    .to_string(),
            });
        }

        Ok(())
    }

    fn validate_feature_config(config: &AppConfig) -> Result<(), ConfigValidationError> {
        let features = &config.features;

        for (feature, limit) in &features.feature_limits {
            if *limit == 0 {
                return Err(ConfigValidationError::FeatureValidationFailed {
                    message: format!("Feature limit for '{}' cannot be zero", feature),
                });
            }
        }

        Ok(())
    }
}
