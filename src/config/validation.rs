//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, limits > 0)
//! - Check addresses parse before anything binds
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: BridgeConfig → Result<(), Vec<ValidationError>>

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::BridgeConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field}: invalid socket address {value:?}")]
    InvalidAddress { field: &'static str, value: String },

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("database.path must not be empty")]
    EmptyDatabasePath,

    #[error("admin.api_key must not be empty when admin is enabled")]
    MissingAdminKey,
}

/// Check `config` for semantic errors.
pub fn validate_config(config: &BridgeConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: "listener.bind_address",
            value: config.listener.bind_address.clone(),
        });
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidAddress {
            field: "observability.metrics_address",
            value: config.observability.metrics_address.clone(),
        });
    }

    if config.database.path.trim().is_empty() {
        errors.push(ValidationError::EmptyDatabasePath);
    }

    if config.timeouts.request_secs == Some(0) {
        errors.push(ValidationError::Zero {
            field: "timeouts.request_secs",
        });
    }

    if config.limits.max_body_bytes == 0 {
        errors.push(ValidationError::Zero {
            field: "limits.max_body_bytes",
        });
    }

    if config.admin.enabled && config.admin.api_key.trim().is_empty() {
        errors.push(ValidationError::MissingAdminKey);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert_eq!(validate_config(&BridgeConfig::default()), Ok(()));
    }

    #[test]
    fn collects_every_error() {
        let mut config = BridgeConfig::default();
        config.listener.bind_address = "not-an-address".into();
        config.timeouts.request_secs = Some(0);
        config.limits.max_body_bytes = 0;
        config.admin.enabled = true;
        config.admin.api_key = " ".into();

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 4);
        assert!(errors.contains(&ValidationError::MissingAdminKey));
        assert!(errors.contains(&ValidationError::Zero {
            field: "limits.max_body_bytes"
        }));
    }

    #[test]
    fn metrics_address_only_checked_when_enabled() {
        let mut config = BridgeConfig::default();
        config.observability.metrics_address = "nope".into();
        assert!(validate_config(&config).is_ok());

        config.observability.metrics_enabled = true;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(
            errors[0].to_string(),
            "observability.metrics_address: invalid socket address \"nope\""
        );
    }
}
