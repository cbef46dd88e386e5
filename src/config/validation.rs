//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (ratio bounds, window size, timeouts > 0)
//! - Check addresses and the backend URL parse
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::config::schema::ProxyConfig;
use crate::resilience::circuit_breaker::{BreakerConfigError, BreakerSettings};

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("breaker: {0}")]
    Breaker(#[from] BreakerConfigError),

    #[error("breaker.open_duration_ms must be greater than 0")]
    OpenDuration,

    #[error("invalid {field} '{value}'")]
    Address { field: &'static str, value: String },

    #[error("backend.url '{url}' is invalid: {reason}")]
    BackendUrl { url: String, reason: String },

    #[error("timeouts.request_secs must be greater than 0")]
    RequestTimeout,

    #[error("admin.api_key must be set when the admin API is enabled")]
    AdminKey,
}

/// Check a parsed configuration, collecting every problem.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let breaker = &config.breaker;
    // Checked one by one so a bad ratio and a bad lookback both surface.
    let ratio_check = BreakerSettings::new(breaker.failure_ratio, 1, Duration::ZERO);
    if let Err(e) = ratio_check {
        errors.push(ValidationError::Breaker(e));
    }
    if breaker.lookback_period < 1 {
        errors.push(ValidationError::Breaker(BreakerConfigError::LookbackPeriod));
    }
    if breaker.open_duration_ms == 0 {
        errors.push(ValidationError::OpenDuration);
    }

    check_address(&mut errors, "listener.bind_address", &config.listener.bind_address);

    if let Err(reason) = check_backend_url(&config.backend.url) {
        errors.push(ValidationError::BackendUrl {
            url: config.backend.url.clone(),
            reason,
        });
    }

    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::RequestTimeout);
    }

    if config.observability.metrics_enabled {
        check_address(
            &mut errors,
            "observability.metrics_address",
            &config.observability.metrics_address,
        );
    }

    if config.admin.enabled {
        check_address(&mut errors, "admin.bind_address", &config.admin.bind_address);
        if config.admin.api_key.is_empty() {
            errors.push(ValidationError::AdminKey);
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_address(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::Address {
            field,
            value: value.to_string(),
        });
    }
}

fn check_backend_url(raw: &str) -> Result<(), String> {
    let url = Url::parse(raw).map_err(|e| e.to_string())?;
    if url.scheme() != "http" {
        return Err(format!("unsupported scheme '{}', only http is forwarded", url.scheme()));
    }
    if url.host_str().is_none() {
        return Err("missing host".to_string());
    }
    if url.query().is_some() || url.fragment().is_some() {
        return Err("query and fragment are not allowed".to_string());
    }
    Ok(())
}
