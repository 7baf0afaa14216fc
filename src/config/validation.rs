//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, ports valid, sizes non-zero)
//! - Keep the request timeout above the database deadlines it contains
//! - Check addresses parse before startup tries to bind them
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: AppConfig → Result<(), Vec<ValidationError>>

use std::net::SocketAddr;

use tracing_subscriber::EnvFilter;

use crate::config::schema::AppConfig;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

pub fn validate_config(config: &AppConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.hostname.trim().is_empty() {
        errors.push(ValidationError::new("listener.hostname", "must not be empty"));
    }

    let database = &config.database;
    if database.host.trim().is_empty() {
        errors.push(ValidationError::new("database.host", "must not be empty"));
    }
    if database.port == 0 {
        errors.push(ValidationError::new("database.port", "must be greater than 0"));
    }
    if database.max_connections == 0 {
        errors.push(ValidationError::new(
            "database.max_connections",
            "must be greater than 0",
        ));
    }
    for (field, secs) in [
        ("database.connect_timeout_secs", database.connect_timeout_secs),
        ("database.acquire_timeout_secs", database.acquire_timeout_secs),
        ("database.query_timeout_secs", database.query_timeout_secs),
        ("database.idle_timeout_secs", database.idle_timeout_secs),
        ("timeouts.request_secs", config.timeouts.request_secs),
    ] {
        if secs == 0 {
            errors.push(ValidationError::new(field, "must be greater than 0"));
        }
    }

    let worst_case = database.worst_case_secs();
    if config.timeouts.request_secs != 0 && config.timeouts.request_secs <= worst_case {
        errors.push(ValidationError::new(
            "timeouts.request_secs",
            format!("must exceed the worst-case database time of {worst_case}s"),
        ));
    }

    if config.limits.max_body_bytes == 0 {
        errors.push(ValidationError::new(
            "limits.max_body_bytes",
            "must be greater than 0",
        ));
    }
    if config.assets.root.trim().is_empty() {
        errors.push(ValidationError::new("assets.root", "must not be empty"));
    }

    let observability = &config.observability;
    if let Err(error) = EnvFilter::try_new(&observability.log_level) {
        errors.push(ValidationError::new(
            "observability.log_level",
            error.to_string(),
        ));
    }
    if observability.metrics_enabled
        && observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("`{}` is not a socket address", observability.metrics_address),
        ));
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
    fn test_defaults_are_valid() {
        assert!(validate_config(&AppConfig::default()).is_ok());
    }

    #[test]
    fn test_reports_every_error() {
        let mut config = AppConfig::default();
        config.database.max_connections = 0;
        config.database.query_timeout_secs = 0;
        config.limits.max_body_bytes = 0;
        config.observability.metrics_enabled = true;
        config.observability.metrics_address = "nowhere".to_string();

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert_eq!(
            fields,
            [
                "database.max_connections",
                "database.query_timeout_secs",
                "limits.max_body_bytes",
                "observability.metrics_address",
            ]
        );
    }

    #[test]
    fn test_request_timeout_must_cover_database_deadlines() {
        let mut config = AppConfig::default();
        config.timeouts.request_secs = 60;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "timeouts.request_secs");
        assert!(errors[0].message.contains("130s"));

        config.database.query_timeout_secs = 10;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_metrics_address_ignored_when_disabled() {
        let mut config = AppConfig::default();
        config.observability.metrics_address = "nowhere".to_string();
        assert!(validate_config(&config).is_ok());
    }
}
